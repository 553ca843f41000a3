//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download videos, audio and playlists.
///
/// Resolves the URL with `yt-dlp`, picks the best matching encoding,
/// downloads it with resumable rate-limited transfers and finishes it with
/// `ffmpeg` (audio extraction, container conversion, embedding).
///
/// Options left unset fall back to `~/.config/ydownloader/config.toml`,
/// then to built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "ydownloader")]
#[command(author, version, about)]
pub struct Args {
    /// Video, audio or playlist URL
    pub url: String,

    /// Download audio only
    #[arg(short, long)]
    pub audio: bool,

    /// Video quality: best, worst, or a height such as 720p
    #[arg(short, long, value_name = "QUALITY")]
    pub quality: Option<String>,

    /// Audio quality: best, worst, or a bitrate such as 128k
    #[arg(long, value_name = "QUALITY")]
    pub audio_quality: Option<String>,

    /// Video container: mp4, webm, mkv or best
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Audio format: mp3, m4a, opus, flac, wav or best
    #[arg(long, value_name = "FORMAT")]
    pub audio_format: Option<String>,

    /// Output directory (default: ~/Downloads)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Filename template, e.g. "%(uploader)s - %(title)s.%(ext)s"
    #[arg(long, value_name = "TEMPLATE")]
    pub filename: Option<String>,

    /// Embed the thumbnail as cover art
    #[arg(long)]
    pub embed_thumbnail: bool,

    /// Do not embed title/uploader metadata
    #[arg(long)]
    pub no_metadata: bool,

    /// Download subtitles
    #[arg(long)]
    pub subs: bool,

    /// Subtitle languages, comma separated (default: en)
    #[arg(long, value_name = "LANGS", value_delimiter = ',')]
    pub subs_lang: Vec<String>,

    /// Embed subtitles into the output (implies --subs)
    #[arg(long)]
    pub embed_subs: bool,

    /// Skip auto-generated subtitles
    #[arg(long)]
    pub no_auto_subs: bool,

    /// Treat a playlist URL as a single item
    #[arg(long)]
    pub no_playlist: bool,

    /// First playlist entry to download (1-based)
    #[arg(long, value_name = "N")]
    pub playlist_start: Option<usize>,

    /// Last playlist entry to download (inclusive)
    #[arg(long, value_name = "N")]
    pub playlist_end: Option<usize>,

    /// Aggregate download rate ceiling, e.g. 500K, 1M, 1.5G
    #[arg(short = 'r', long, value_name = "RATE")]
    pub rate_limit: Option<String>,

    /// Retry attempts for transient network failures (0-10)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub retries: Option<u32>,

    /// Maximum concurrent downloads (1-16)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: Option<u8>,

    /// Exit with status 2 when any job fails
    #[arg(long)]
    pub fail_on_partial: bool,

    /// Path to the yt-dlp executable
    #[arg(long, value_name = "PATH")]
    pub yt_dlp: Option<PathBuf>,

    /// Path to the ffmpeg executable
    #[arg(long, value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Read defaults from this config file instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress progress display and non-error logs
    #[arg(long)]
    pub quiet: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[test]
    fn test_cli_url_only_parses_with_unset_options() {
        let args = Args::try_parse_from(["ydownloader", URL]).unwrap();
        assert_eq!(args.url, URL);
        assert!(!args.audio);
        assert!(args.quality.is_none());
        assert!(args.concurrency.is_none());
        assert!(args.retries.is_none());
        assert!(args.subs_lang.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_missing_url_is_rejected() {
        let err = Args::try_parse_from(["ydownloader"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["ydownloader", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["ydownloader", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["ydownloader", URL, "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Selection Flags ====================

    #[test]
    fn test_cli_audio_and_quality_short_flags() {
        let args =
            Args::try_parse_from(["ydownloader", "-a", "-q", "720p", "-f", "webm", URL]).unwrap();
        assert!(args.audio);
        assert_eq!(args.quality.as_deref(), Some("720p"));
        assert_eq!(args.format.as_deref(), Some("webm"));
    }

    #[test]
    fn test_cli_subs_lang_splits_on_commas() {
        let args = Args::try_parse_from(["ydownloader", "--subs-lang", "en,de,pt-BR", URL]).unwrap();
        assert_eq!(args.subs_lang, vec!["en", "de", "pt-BR"]);
    }

    #[test]
    fn test_cli_playlist_range() {
        let args = Args::try_parse_from([
            "ydownloader",
            "--playlist-start",
            "5",
            "--playlist-end",
            "10",
            URL,
        ])
        .unwrap();
        assert_eq!(args.playlist_start, Some(5));
        assert_eq!(args.playlist_end, Some(10));
    }

    // ==================== Concurrency / Retries ====================

    #[test]
    fn test_cli_concurrency_bounds() {
        let args = Args::try_parse_from(["ydownloader", "-c", "16", URL]).unwrap();
        assert_eq!(args.concurrency, Some(16));
        let args = Args::try_parse_from(["ydownloader", "--concurrency", "1", URL]).unwrap();
        assert_eq!(args.concurrency, Some(1));
    }

    #[test]
    fn test_cli_concurrency_out_of_range_rejected() {
        for value in ["0", "17"] {
            let err = Args::try_parse_from(["ydownloader", "-c", value, URL]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_retries_over_max_rejected() {
        let err = Args::try_parse_from(["ydownloader", "--retries", "11", URL]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        let args = Args::try_parse_from(["ydownloader", "--retries", "0", URL]).unwrap();
        assert_eq!(args.retries, Some(0));
    }

    // ==================== Verbosity ====================

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["ydownloader", "-vv", URL]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_has_no_short_form() {
        let args = Args::try_parse_from(["ydownloader", "--quiet", URL]).unwrap();
        assert!(args.quiet);
        // -q takes a quality value
        let args = Args::try_parse_from(["ydownloader", "-q", "best", URL]).unwrap();
        assert!(!args.quiet);
    }
}
