//! What the user asked to download: one item or a playlist range.

use std::fmt;

use tracing::warn;
use url::Url;

use crate::planner::PlanError;

/// Scope of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// A single item.
    Single,
    /// Entries `start..=end` of a playlist (1-based); `end == None` means
    /// through the last entry.
    Playlist {
        /// First entry.
        start: usize,
        /// Last entry, inclusive.
        end: Option<usize>,
    },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Playlist { start, end: None } => write!(f, "playlist[{start}..]"),
            Self::Playlist {
                start,
                end: Some(end),
            } => write!(f, "playlist[{start}..={end}]"),
        }
    }
}

/// A validated URL plus scope. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: String,
    scope: Scope,
}

/// Returns true when `url` refers to a playlist (`list=` or `/playlist`).
#[must_use]
pub fn is_playlist_url(url: &str) -> bool {
    url.contains("list=") || url.contains("/playlist")
}

fn validate_url(url: &str) -> Result<Url, PlanError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(PlanError::resolution(url, "URL is empty"));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|e| PlanError::resolution(trimmed, format!("invalid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PlanError::resolution(
            trimmed,
            format!("unsupported scheme '{}', expected http or https", parsed.scheme()),
        ));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(PlanError::resolution(trimmed, "URL has no host"));
    }
    Ok(parsed)
}

/// Removes playlist query parameters so a watch URL resolves to its video.
fn strip_playlist_params(mut url: Url) -> String {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !matches!(k.as_ref(), "list" | "index" | "start_radio"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

impl Target {
    /// A single-item target.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Resolution`] for an empty or non-http(s) URL.
    pub fn single(url: &str) -> Result<Self, PlanError> {
        validate_url(url)?;
        Ok(Self {
            url: url.trim().to_string(),
            scope: Scope::Single,
        })
    }

    /// A playlist target. The range is validated by the planner.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Resolution`] for an empty or non-http(s) URL.
    pub fn playlist(url: &str, start: usize, end: Option<usize>) -> Result<Self, PlanError> {
        validate_url(url)?;
        Ok(Self {
            url: url.trim().to_string(),
            scope: Scope::Playlist { start, end },
        })
    }

    /// Infers the scope from the URL and playlist flags.
    ///
    /// Playlist URLs become playlist targets unless `no_playlist` is set, in
    /// which case playlist parameters are dropped from watch URLs. Range
    /// flags on a single-item target are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Resolution`] for an empty or non-http(s) URL.
    pub fn from_url(
        url: &str,
        no_playlist: bool,
        start: Option<usize>,
        end: Option<usize>,
    ) -> Result<Self, PlanError> {
        let parsed = validate_url(url)?;
        let trimmed = url.trim();

        if is_playlist_url(trimmed) && !no_playlist {
            return Ok(Self {
                url: trimmed.to_string(),
                scope: Scope::Playlist {
                    start: start.unwrap_or(1),
                    end,
                },
            });
        }

        if start.is_some() || end.is_some() {
            warn!(url = trimmed, "playlist range ignored for a single-item target");
        }
        let url = if is_playlist_url(trimmed) && parsed.query_pairs().any(|(k, _)| k == "v") {
            strip_playlist_params(parsed)
        } else {
            trimmed.to_string()
        };
        Ok(Self {
            url,
            scope: Scope::Single,
        })
    }

    /// The target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The target scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_is_playlist_url() {
        assert!(is_playlist_url("https://www.youtube.com/playlist?list=PL123"));
        assert!(is_playlist_url("https://www.youtube.com/watch?v=abc&list=PL123"));
        assert!(!is_playlist_url("https://youtu.be/abc"));
    }

    #[test]
    fn test_from_url_single() {
        let target = Target::from_url("https://youtu.be/abc", false, None, None).unwrap();
        assert_eq!(target.scope(), Scope::Single);
        assert_eq!(target.url(), "https://youtu.be/abc");
    }

    #[test]
    fn test_from_url_playlist_defaults_to_whole_range() {
        let target =
            Target::from_url("https://www.youtube.com/playlist?list=PL1", false, None, None)
                .unwrap();
        assert_eq!(
            target.scope(),
            Scope::Playlist {
                start: 1,
                end: None
            }
        );
    }

    #[test]
    fn test_from_url_playlist_range() {
        let target = Target::from_url(
            "https://www.youtube.com/playlist?list=PL1",
            false,
            Some(5),
            Some(10),
        )
        .unwrap();
        assert_eq!(
            target.scope(),
            Scope::Playlist {
                start: 5,
                end: Some(10)
            }
        );
        assert_eq!(target.scope().to_string(), "playlist[5..=10]");
    }

    #[test]
    fn test_from_url_no_playlist_strips_list_param() {
        let target = Target::from_url(
            "https://www.youtube.com/watch?v=abc&list=PL1&index=3",
            true,
            Some(2),
            None,
        )
        .unwrap();
        assert_eq!(target.scope(), Scope::Single);
        assert_eq!(target.url(), "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn test_from_url_rejects_bad_urls() {
        for bad in ["", "   ", "not a url", "ftp://example.com/v", "file:///etc/passwd"] {
            let err = Target::from_url(bad, false, None, None).unwrap_err();
            assert!(
                matches!(err, PlanError::Resolution { .. }),
                "{bad:?} gave {err:?}"
            );
        }
    }
}
