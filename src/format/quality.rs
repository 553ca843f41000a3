//! Quality targets (`best`, `worst`, `720p`, `128k`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Matches `720p`, `1080P`, `128k`, `192 K` and bare numbers.
#[allow(clippy::expect_used)]
static LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,5})\s*([pPkK])?$").expect("label regex is valid") // Static pattern, safe to panic
});

/// Unit of a quality label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelUnit {
    /// Frame height in pixels (`720p`); ranks video and muxed variants.
    Height,
    /// Bitrate in kbps (`128k`); ranks audio variants.
    Bitrate,
}

impl LabelUnit {
    fn suffix(self) -> char {
        match self {
            Self::Height => 'p',
            Self::Bitrate => 'k',
        }
    }
}

/// An explicit quality label such as `480p` or `160k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QualityLabel {
    /// Numeric value, comparable with a variant's rank.
    pub value: u32,
    /// What `value` measures.
    pub unit: LabelUnit,
}

impl QualityLabel {
    /// Parses a label, using `default_unit` when the text has no suffix.
    ///
    /// Returns `None` when the text is not a label or its value is zero.
    #[must_use]
    pub fn parse(text: &str, default_unit: LabelUnit) -> Option<Self> {
        let caps = LABEL_PATTERN.captures(text.trim())?;
        let value: u32 = caps.get(1)?.as_str().parse().ok()?;
        if value == 0 {
            return None;
        }
        let unit = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
            Some(s) if s == "p" => LabelUnit::Height,
            Some(_) => LabelUnit::Bitrate,
            None => default_unit,
        };
        Some(Self { value, unit })
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

/// What quality the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QualityTarget {
    /// Highest rank available.
    #[default]
    Best,
    /// Lowest rank available.
    Worst,
    /// A specific label; the nearest lower rank is used when it is missing.
    Label(QualityLabel),
}

impl QualityTarget {
    /// Parses `best`, `worst` or a label, case-insensitively.
    #[must_use]
    pub fn parse(text: &str, default_unit: LabelUnit) -> Option<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("best") {
            Some(Self::Best)
        } else if text.eq_ignore_ascii_case("worst") {
            Some(Self::Worst)
        } else {
            QualityLabel::parse(text, default_unit).map(Self::Label)
        }
    }
}

impl fmt::Display for QualityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => f.write_str("best"),
            Self::Worst => f.write_str("worst"),
            Self::Label(label) => label.fmt(f),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keywords_case_insensitive() {
        assert_eq!(
            QualityTarget::parse("BEST", LabelUnit::Height),
            Some(QualityTarget::Best)
        );
        assert_eq!(
            QualityTarget::parse(" worst ", LabelUnit::Bitrate),
            Some(QualityTarget::Worst)
        );
    }

    #[test]
    fn test_parse_height_label() {
        let target = QualityTarget::parse("720p", LabelUnit::Bitrate).unwrap();
        assert_eq!(
            target,
            QualityTarget::Label(QualityLabel {
                value: 720,
                unit: LabelUnit::Height
            })
        );
        assert_eq!(target.to_string(), "720p");
    }

    #[test]
    fn test_parse_bitrate_label() {
        let label = QualityLabel::parse("192K", LabelUnit::Height).unwrap();
        assert_eq!(label.unit, LabelUnit::Bitrate);
        assert_eq!(label.value, 192);
        assert_eq!(label.to_string(), "192k");
    }

    #[test]
    fn test_parse_bare_number_uses_default_unit() {
        assert_eq!(
            QualityLabel::parse("1080", LabelUnit::Height).unwrap().unit,
            LabelUnit::Height
        );
        assert_eq!(
            QualityLabel::parse("128", LabelUnit::Bitrate).unwrap().unit,
            LabelUnit::Bitrate
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(QualityTarget::parse("hd", LabelUnit::Height), None);
        assert_eq!(QualityTarget::parse("720x", LabelUnit::Height), None);
        assert_eq!(QualityTarget::parse("0p", LabelUnit::Height), None);
        assert_eq!(QualityTarget::parse("", LabelUnit::Height), None);
    }
}
