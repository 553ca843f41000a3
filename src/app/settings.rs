//! Merges CLI flags, config file values and built-in defaults.
//!
//! Precedence is CLI > config file > defaults. Value options are `Option`s on
//! the command line so "not given" is distinguishable; boolean switches only
//! ever turn a behaviour on (or off, for the `--no-*` forms), so an unset
//! switch defers to the config file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use ydownloader_core::criteria::{MediaKind, PlaylistOptions, SelectionCriteria};
use ydownloader_core::extractor::ytdlp;
use ydownloader_core::media_tool::ffmpeg;
use ydownloader_core::scheduler::DEFAULT_CONCURRENCY;

use super::config::FileConfig;
use crate::cli::Args;

/// Everything the run needs besides the target URL.
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub criteria: SelectionCriteria,
    pub concurrency: usize,
    pub fail_on_partial: bool,
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
}

/// `cli` if set, else `file`.
fn pick<T: Clone>(cli: Option<&T>, file: Option<&T>) -> Option<T> {
    cli.or(file).cloned()
}

/// A switch that is on when given on the command line, else from the file.
fn switch(cli: bool, file: Option<bool>) -> Option<bool> {
    if cli { Some(true) } else { file }
}

/// A `--no-*` switch that turns a default-on option off.
fn negated_switch(cli_off: bool, file: Option<bool>) -> Option<bool> {
    if cli_off { Some(false) } else { file }
}

pub(crate) fn resolve_settings(args: &Args, file: &FileConfig) -> Result<RunSettings> {
    let audio = switch(args.audio, file.audio).unwrap_or(false);
    let mut builder = SelectionCriteria::builder().kind(if audio {
        MediaKind::Audio
    } else {
        MediaKind::Video
    });

    if let Some(quality) = pick(args.quality.as_ref(), file.quality.as_ref()) {
        builder = builder.quality(quality);
    }
    if let Some(quality) = pick(args.audio_quality.as_ref(), file.audio_quality.as_ref()) {
        builder = builder.audio_quality(quality);
    }
    if let Some(format) = pick(args.format.as_ref(), file.video_format.as_ref()) {
        builder = builder.video_format(format);
    }
    if let Some(format) = pick(args.audio_format.as_ref(), file.audio_format.as_ref()) {
        builder = builder.audio_format(format);
    }
    if let Some(template) = pick(args.filename.as_ref(), file.filename_template.as_ref()) {
        builder = builder.filename_template(template);
    }
    if let Some(dir) = pick(args.output.as_ref(), file.output_dir.as_ref()) {
        builder = builder.output_dir(dir);
    }

    let langs = if args.subs_lang.is_empty() {
        file.subtitle_langs.clone()
    } else {
        Some(args.subs_lang.clone())
    };
    if let Some(langs) = langs {
        builder = builder.subtitle_langs(langs);
    }
    if let Some(enabled) = switch(args.subs, file.download_subtitles) {
        builder = builder.download_subtitles(enabled);
    }
    if let Some(enabled) = switch(args.embed_subs, file.embed_subtitles) {
        builder = builder.embed_subtitles(enabled);
    }
    if let Some(enabled) = negated_switch(args.no_auto_subs, file.auto_subtitles) {
        builder = builder.auto_subtitles(enabled);
    }
    if let Some(enabled) = switch(args.embed_thumbnail, file.embed_thumbnail) {
        builder = builder.embed_thumbnail(enabled);
    }
    if let Some(enabled) = negated_switch(args.no_metadata, file.embed_metadata) {
        builder = builder.embed_metadata(enabled);
    }

    builder = builder
        .playlist(PlaylistOptions {
            enabled: !args.no_playlist,
            start: args.playlist_start,
            end: args.playlist_end,
        })
        .rate_limit(pick(args.rate_limit.as_ref(), file.rate_limit.as_ref()));
    if let Some(retries) = pick(args.retries.as_ref(), file.retries.as_ref()) {
        builder = builder.retries(retries);
    }

    let criteria = builder.build().context("Invalid download options")?;

    let concurrency = args
        .concurrency
        .map(usize::from)
        .or(file.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);

    Ok(RunSettings {
        criteria,
        concurrency,
        fail_on_partial: switch(args.fail_on_partial, file.fail_on_partial).unwrap_or(false),
        yt_dlp: pick(args.yt_dlp.as_ref(), file.yt_dlp.as_ref())
            .unwrap_or_else(|| PathBuf::from(ytdlp::DEFAULT_PROGRAM)),
        ffmpeg: pick(args.ffmpeg.as_ref(), file.ffmpeg.as_ref())
            .unwrap_or_else(|| PathBuf::from(ffmpeg::DEFAULT_PROGRAM)),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["ydownloader"];
        argv.extend_from_slice(extra);
        argv.push("https://www.youtube.com/watch?v=abc");
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_without_cli_or_file() {
        let settings = resolve_settings(&args(&[]), &FileConfig::default()).unwrap();
        assert_eq!(settings.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(settings.criteria.kind(), MediaKind::Video);
        assert!(settings.criteria.embed_metadata());
        assert!(!settings.fail_on_partial);
        assert_eq!(settings.yt_dlp, PathBuf::from("yt-dlp"));
        assert_eq!(settings.ffmpeg, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_file_values_apply_when_cli_unset() {
        let file = FileConfig {
            audio: Some(true),
            concurrency: Some(5),
            retries: Some(0),
            embed_metadata: Some(false),
            fail_on_partial: Some(true),
            ..FileConfig::default()
        };
        let settings = resolve_settings(&args(&[]), &file).unwrap();
        assert_eq!(settings.criteria.kind(), MediaKind::Audio);
        assert_eq!(settings.concurrency, 5);
        assert_eq!(settings.criteria.max_attempts(), 1);
        assert!(!settings.criteria.embed_metadata());
        assert!(settings.fail_on_partial);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig {
            concurrency: Some(5),
            rate_limit: Some("1M".to_string()),
            subtitle_langs: Some(vec!["de".to_string()]),
            ..FileConfig::default()
        };
        let settings = resolve_settings(
            &args(&["-c", "2", "-r", "500K", "--subs-lang", "fr,es"]),
            &file,
        )
        .unwrap();
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.criteria.rate_limit(), Some(500 * 1024));
        assert_eq!(settings.criteria.subtitle_langs(), ["fr", "es"]);
    }

    #[test]
    fn test_negated_switch_beats_file() {
        let file = FileConfig {
            auto_subtitles: Some(true),
            ..FileConfig::default()
        };
        let settings = resolve_settings(&args(&["--no-auto-subs"]), &file).unwrap();
        assert!(!settings.criteria.auto_subtitles());
    }

    #[test]
    fn test_invalid_quality_is_error() {
        let err = resolve_settings(&args(&["-q", "ultra"]), &FileConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid download options"));
    }
}
