//! Exit status for a finished run.

use std::process::ExitCode;

use ydownloader_core::RunReport;

/// Process-level result of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything succeeded, or partial success without `--fail-on-partial`.
    Success,
    /// Planning failed, or every job failed.
    Failure,
    /// Some job failed and `--fail-on-partial` was given.
    Partial,
    /// Ctrl-C.
    Interrupted,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
            Self::Interrupted => 130,
        }
    }
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        ExitCode::from(exit.code())
    }
}

pub(crate) fn determine_exit_outcome(
    cancelled: bool,
    total: usize,
    failed: usize,
    fail_on_partial: bool,
) -> ProcessExit {
    if cancelled {
        ProcessExit::Interrupted
    } else if total > 0 && failed == total {
        ProcessExit::Failure
    } else if fail_on_partial && failed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Success
    }
}

pub(crate) fn exit_for_report(report: &RunReport, fail_on_partial: bool) -> ProcessExit {
    determine_exit_outcome(
        report.cancelled,
        report.outcomes.len(),
        report.count(ydownloader_core::OutcomeKind::Failed),
        fail_on_partial,
    )
}
