//! Final per-job report printed to stdout.

use std::fmt::Write as _;

use indicatif::{HumanBytes, HumanDuration};
use ydownloader_core::{JobOutcome, OutcomeKind, OutcomeStatus, RunReport};

fn outcome_line(outcome: &JobOutcome) -> String {
    let name = outcome.display_name();
    let kind = outcome.status.kind();
    let mut line = format!("#{:<4} {:<10} {name}", outcome.ordinal, kind.to_string());
    match &outcome.status {
        OutcomeStatus::Succeeded | OutcomeStatus::Degraded { .. } => {
            if let Some(path) = &outcome.output_path {
                let _ = write!(line, " -> {}", path.display());
            }
            if outcome.bytes > 0 {
                let _ = write!(line, " ({})", HumanBytes(outcome.bytes));
            }
            if let OutcomeStatus::Degraded { reason } = &outcome.status {
                let _ = write!(line, "\n        note: {reason}");
            }
        }
        OutcomeStatus::Failed { error } => {
            let _ = write!(line, "\n        error: {error}");
            if outcome.attempts > 1 {
                let _ = write!(line, " (after {} attempts)", outcome.attempts);
            }
        }
        OutcomeStatus::Cancelled => {}
    }
    line
}

pub(crate) fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        out.push_str(&outcome_line(outcome));
        out.push('\n');
    }
    let _ = write!(
        out,
        "{} succeeded, {} degraded, {} failed, {} cancelled; {} in {}",
        report.count(OutcomeKind::Succeeded),
        report.count(OutcomeKind::Degraded),
        report.count(OutcomeKind::Failed),
        report.count(OutcomeKind::Cancelled),
        HumanBytes(report.total_bytes()),
        HumanDuration(report.elapsed),
    );
    if report.cancelled {
        out.push_str(" (interrupted)");
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use ydownloader_core::JobError;
    use ydownloader_core::download::JobSource;

    use super::*;

    fn outcome(ordinal: usize, status: OutcomeStatus) -> JobOutcome {
        JobOutcome {
            ordinal,
            title: Some(format!("Clip {ordinal}")),
            source: JobSource::Item {
                url: format!("https://example.com/watch?v={ordinal}"),
            },
            status,
            output_path: None,
            bytes: 0,
            attempts: 1,
        }
    }

    #[test]
    fn test_report_lists_every_job_and_summary() {
        let mut ok = outcome(1, OutcomeStatus::Succeeded);
        ok.output_path = Some(PathBuf::from("/tmp/Clip 1.mp4"));
        ok.bytes = 2048;
        let degraded = outcome(
            2,
            OutcomeStatus::Degraded {
                reason: "thumbnail not embedded".to_string(),
            },
        );
        let mut failed = outcome(
            3,
            OutcomeStatus::Failed {
                error: JobError::transient("https://cdn.example.com/3", "timed out"),
            },
        );
        failed.attempts = 3;
        let cancelled = JobOutcome::unfinished(
            4,
            JobSource::Item {
                url: "https://example.com/watch?v=4".to_string(),
            },
            OutcomeStatus::Cancelled,
        );
        let report = RunReport {
            outcomes: vec![ok, degraded, failed, cancelled],
            cancelled: true,
            elapsed: Duration::from_secs(3),
        };

        let text = render_report(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("#1    succeeded  Clip 1 -> /tmp/Clip 1.mp4 (2.00 KiB)"));
        assert!(lines[1].starts_with("#2    degraded   Clip 2"));
        assert!(lines[2].contains("note: thumbnail not embedded"));
        assert!(lines[3].starts_with("#3    failed     Clip 3"));
        assert!(lines[4].contains("timed out"));
        assert!(lines[4].contains("after 3 attempts"));
        assert!(lines[5].starts_with("#4    cancelled  https://example.com/watch?v=4"));
        assert!(lines[6].starts_with("1 succeeded, 1 degraded, 1 failed, 1 cancelled"));
        assert!(lines[6].ends_with("(interrupted)"));
    }
}
