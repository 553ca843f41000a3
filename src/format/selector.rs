//! Deterministic variant selection.

use std::cmp::Ordering;

use tracing::{debug, instrument};

use super::{LabelUnit, NoMatchError, QualityTarget, Selection, VariantDescriptor, VariantKind};
use crate::criteria::{AudioFormat, MediaKind, SelectionCriteria};

/// Picks the variant to fetch for `criteria`.
///
/// The same `(variants, criteria)` pair always yields the same selection,
/// regardless of the order the extractor listed the variants in.
///
/// 1. Filter by kind. Video accepts video and muxed variants; audio accepts
///    audio variants, falling back to muxed ones with `extract_audio` set.
/// 2. Pick the rank tier: highest for `best`, lowest for `worst`; for a label,
///    the exact rank if present, else the nearest lower rank, else the nearest
///    higher one. A label in the wrong unit (`192k` for video) means `best`.
/// 3. Within the tier, keep variants in the desired container when any exist.
/// 4. Order by size (larger first, smaller first for `worst`, unknown sizes
///    last), then by id.
///
/// # Errors
///
/// Returns [`NoMatchError`] when no variant of a usable kind exists.
#[instrument(skip_all, fields(kind = %criteria.kind(), quality = %criteria.effective_quality(), variants = variants.len()))]
pub fn select(
    variants: &[VariantDescriptor],
    criteria: &SelectionCriteria,
) -> Result<Selection, NoMatchError> {
    let (candidates, extract_audio) = filter_by_kind(variants, criteria.kind());
    if candidates.is_empty() {
        return Err(NoMatchError {
            wanted: criteria.kind().to_string(),
        });
    }

    let unit = if extract_audio || criteria.kind() == MediaKind::Video {
        LabelUnit::Height
    } else {
        LabelUnit::Bitrate
    };
    let quality = match criteria.effective_quality() {
        QualityTarget::Label(label) if label.unit != unit => {
            debug!(%label, "label unit does not match variant kind, using best");
            QualityTarget::Best
        }
        other => other,
    };

    let tier = rank_tier(&candidates, quality);
    let container = criteria.target_container();
    let matching: Vec<&VariantDescriptor> = tier
        .iter()
        .copied()
        .filter(|v| container_matches(v, criteria))
        .collect();
    let mut tier = if matching.is_empty() { tier } else { matching };

    let smaller_first = quality == QualityTarget::Worst;
    tier.sort_by(|a, b| compare_size(a.size, b.size, smaller_first).then_with(|| a.id.cmp(&b.id)));

    let Some(chosen) = tier.first().copied() else {
        return Err(NoMatchError {
            wanted: criteria.kind().to_string(),
        });
    };

    let audio_companion = if chosen.kind == VariantKind::Video {
        pick_companion_audio(variants, quality == QualityTarget::Worst, container)
    } else {
        None
    };

    let convert_to = if extract_audio || !container_matches(chosen, criteria) {
        Some(container.to_string())
    } else {
        None
    };

    debug!(
        variant = %chosen.id,
        label = %chosen.label,
        extract_audio,
        convert_to = ?convert_to,
        companion = ?audio_companion.as_ref().map(|a| a.id.as_str()),
        "variant selected"
    );

    Ok(Selection {
        variant: chosen.clone(),
        audio_companion: audio_companion.cloned(),
        extract_audio,
        convert_to,
    })
}

fn filter_by_kind(
    variants: &[VariantDescriptor],
    kind: MediaKind,
) -> (Vec<&VariantDescriptor>, bool) {
    match kind {
        MediaKind::Video => (
            variants
                .iter()
                .filter(|v| matches!(v.kind, VariantKind::Video | VariantKind::Muxed))
                .collect(),
            false,
        ),
        MediaKind::Audio => {
            let audio: Vec<_> = variants
                .iter()
                .filter(|v| v.kind == VariantKind::Audio)
                .collect();
            if audio.is_empty() {
                let muxed: Vec<_> = variants
                    .iter()
                    .filter(|v| v.kind == VariantKind::Muxed)
                    .collect();
                (muxed, true)
            } else {
                (audio, false)
            }
        }
    }
}

fn rank_of(variant: &VariantDescriptor) -> u32 {
    variant.rank.unwrap_or(0)
}

fn rank_tier<'a>(
    candidates: &[&'a VariantDescriptor],
    quality: QualityTarget,
) -> Vec<&'a VariantDescriptor> {
    let ranks = candidates.iter().map(|v| rank_of(v));
    let wanted = match quality {
        QualityTarget::Best => ranks.max(),
        QualityTarget::Worst => ranks.min(),
        QualityTarget::Label(label) => {
            let text = label.to_string();
            let exact: Vec<_> = candidates
                .iter()
                .copied()
                .filter(|v| v.rank == Some(label.value) || v.label.eq_ignore_ascii_case(&text))
                .collect();
            if !exact.is_empty() {
                return exact;
            }
            let below = candidates
                .iter()
                .filter_map(|v| v.rank)
                .filter(|r| *r < label.value)
                .max();
            below.or_else(|| {
                candidates
                    .iter()
                    .filter_map(|v| v.rank)
                    .filter(|r| *r > label.value)
                    .min()
            })
        }
    };

    match wanted {
        Some(rank) => candidates
            .iter()
            .copied()
            .filter(|v| rank_of(v) == rank)
            .collect(),
        // A label against variants without ranks: nothing to compare, keep all.
        None => candidates.to_vec(),
    }
}

fn compare_size(a: Option<u64>, b: Option<u64>, smaller_first: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if smaller_first => a.cmp(&b),
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn codec_starts_with(variant: &VariantDescriptor, prefix: &str) -> bool {
    variant
        .codec
        .as_deref()
        .is_some_and(|c| c.to_ascii_lowercase().starts_with(prefix))
}

fn container_matches(variant: &VariantDescriptor, criteria: &SelectionCriteria) -> bool {
    let container = variant.container.to_ascii_lowercase();
    if criteria.kind() == MediaKind::Video || variant.kind != VariantKind::Audio {
        return container == criteria.target_container();
    }
    match criteria.audio_format() {
        AudioFormat::M4a => {
            container == "m4a" || (container == "mp4" && codec_starts_with(variant, "mp4a"))
        }
        AudioFormat::Opus => container == "opus" || codec_starts_with(variant, "opus"),
        AudioFormat::Mp3 => container == "mp3",
        AudioFormat::Flac => container == "flac",
        AudioFormat::Wav => container == "wav",
    }
}

/// Audio stream muxed with a video-only variant: best (or worst) bitrate,
/// preferring a container that can be muxed into `container` without
/// re-encoding.
fn pick_companion_audio<'a>(
    variants: &'a [VariantDescriptor],
    worst: bool,
    container: &str,
) -> Option<&'a VariantDescriptor> {
    let compatible = |v: &VariantDescriptor| match container {
        "mp4" => v.container == "m4a" || v.container == "mp4",
        "webm" => v.container == "webm",
        _ => true,
    };
    let mut audio: Vec<&VariantDescriptor> = variants
        .iter()
        .filter(|v| v.kind == VariantKind::Audio)
        .collect();
    audio.sort_by(|a, b| {
        compatible(b)
            .cmp(&compatible(a))
            .then_with(|| {
                if worst {
                    rank_of(a).cmp(&rank_of(b))
                } else {
                    rank_of(b).cmp(&rank_of(a))
                }
            })
            .then_with(|| compare_size(a.size, b.size, worst))
            .then_with(|| a.id.cmp(&b.id))
    });
    audio.first().copied()
}
