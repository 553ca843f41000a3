//! Config file loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use ydownloader_core::criteria::MAX_RETRIES;
use ydownloader_core::scheduler::MAX_CONCURRENCY;

/// TOML-backed defaults; every field is optional and CLI flags win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct FileConfig {
    /// Default output directory.
    pub output_dir: Option<PathBuf>,
    /// Download audio only.
    pub audio: Option<bool>,
    pub quality: Option<String>,
    pub audio_quality: Option<String>,
    /// Default video container (`format` on the command line).
    pub video_format: Option<String>,
    pub audio_format: Option<String>,
    pub filename_template: Option<String>,
    pub embed_thumbnail: Option<bool>,
    pub embed_metadata: Option<bool>,
    pub download_subtitles: Option<bool>,
    pub embed_subtitles: Option<bool>,
    pub auto_subtitles: Option<bool>,
    pub subtitle_langs: Option<Vec<String>>,
    /// Aggregate rate ceiling, e.g. `"1M"`.
    pub rate_limit: Option<String>,
    pub retries: Option<u32>,
    pub concurrency: Option<usize>,
    pub fail_on_partial: Option<bool>,
    /// Path to the yt-dlp executable.
    pub yt_dlp: Option<PathBuf>,
    /// Path to the ffmpeg executable.
    pub ffmpeg: Option<PathBuf>,
}

impl FileConfig {
    /// Validates values against the same ranges the CLI enforces.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=MAX_CONCURRENCY).contains(&concurrency)
        {
            bail!(
                "Invalid config value for `concurrency`: {concurrency}. Expected range: 1..={MAX_CONCURRENCY}"
            );
        }
        if let Some(retries) = self.retries
            && retries > MAX_RETRIES
        {
            bail!("Invalid config value for `retries`: {retries}. Expected range: 0..={MAX_RETRIES}");
        }
        Ok(())
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed values; defaults when no file exists.
    pub config: FileConfig,
    pub loaded_from_file: bool,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/ydownloader/config.toml`
/// 2. `$HOME/.config/ydownloader/config.toml`
#[must_use]
pub(crate) fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("ydownloader")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("ydownloader")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads `explicit` when given (it must exist), else the default path if
/// present.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig::default());
    };
    if !path_ref.exists() {
        return Ok(LoadedConfig {
            path,
            ..LoadedConfig::default()
        });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config,
        loaded_from_file: true,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}
