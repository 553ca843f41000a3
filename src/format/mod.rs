//! Variant descriptions and deterministic format selection.
//!
//! An extractor describes every fetchable encoding of an item as a
//! [`VariantDescriptor`]. [`select`] picks the one to fetch for a given
//! [`SelectionCriteria`](crate::SelectionCriteria).

mod quality;
mod selector;

pub use quality::{LabelUnit, QualityLabel, QualityTarget};
pub use selector::select;

use thiserror::Error;

/// What a variant carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    /// Video track only.
    Video,
    /// Audio track only.
    Audio,
    /// Combined audio and video.
    Muxed,
}

impl VariantKind {
    /// Unit that ranks variants of this kind.
    #[must_use]
    pub fn rank_unit(self) -> LabelUnit {
        match self {
            Self::Video | Self::Muxed => LabelUnit::Height,
            Self::Audio => LabelUnit::Bitrate,
        }
    }
}

/// One fetchable encoding of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDescriptor {
    /// Extractor-side format id; unique per item.
    pub id: String,
    /// Tracks carried.
    pub kind: VariantKind,
    /// Container tag (`mp4`, `webm`, `m4a`).
    pub container: String,
    /// Primary codec tag, when known (`avc1.64001F`, `opus`).
    pub codec: Option<String>,
    /// Display label (`720p`, `128k`).
    pub label: String,
    /// Approximate byte size, when known.
    pub size: Option<u64>,
    /// Height for video and muxed variants, kbps for audio.
    pub rank: Option<u32>,
    /// Stream URL.
    pub url: String,
}

/// Result of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// The variant to fetch.
    pub variant: VariantDescriptor,
    /// Audio variant fetched alongside a video-only variant and muxed in.
    pub audio_companion: Option<VariantDescriptor>,
    /// The audio track must be extracted from a muxed variant.
    pub extract_audio: bool,
    /// Container the post-processor must produce, when selection alone
    /// could not satisfy the preference.
    pub convert_to: Option<String>,
}

/// No variant satisfies the criteria.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no {wanted} variant available")]
pub struct NoMatchError {
    /// What was requested (`video`, `audio`).
    pub wanted: String,
}
