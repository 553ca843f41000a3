//! Filename rendering, sanitization, and path resolution for job outputs.
//!
//! Final names come from a yt-dlp style template (`%(title)s.%(ext)s`).
//! Temporary names are derived from a job-unique token so concurrent jobs
//! never share a file.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs::OpenOptions;

/// Placeholder used for template fields with no value.
const MISSING_FIELD: &str = "NA";

/// Maximum length (in chars) of a rendered file stem.
const MAX_STEM_CHARS: usize = 200;

/// Values available to a filename template.
#[derive(Debug, Clone, Default)]
pub struct TemplateFields {
    /// Item title.
    pub title: Option<String>,
    /// Extractor-side item id.
    pub id: Option<String>,
    /// Uploader or channel name.
    pub uploader: Option<String>,
    /// 1-based position in the playlist, for playlist jobs.
    pub playlist_index: Option<usize>,
    /// File extension without the dot.
    pub ext: String,
}

impl TemplateFields {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "title" => self.title.clone(),
            "id" => self.id.clone(),
            "uploader" | "channel" => self.uploader.clone(),
            "playlist_index" => self.playlist_index.map(|i| i.to_string()),
            "ext" => Some(self.ext.clone()),
            _ => None,
        }
    }
}

/// Renders a `%(field)s` template into a safe file name.
///
/// Unknown or missing fields render as `NA`. Each substituted value is
/// sanitized so it cannot introduce path separators. A template that renders
/// to nothing falls back to `download.<ext>`.
#[must_use]
pub fn render_template(template: &str, fields: &TemplateFields) -> String {
    let mut out = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find(")s") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let key = &after[..end];
        let value = fields
            .lookup(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| MISSING_FIELD.to_string());
        out.push_str(&sanitize_filename(&value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);

    let rendered = sanitize_filename(out.trim());
    if rendered.trim_matches(|c| c == '_' || c == '.').is_empty() {
        return format!("download.{}", fields.ext);
    }
    truncate_stem(&rendered)
}

fn truncate_stem(name: &str) -> String {
    let (stem, ext) = split_extension(name);
    if stem.chars().count() <= MAX_STEM_CHARS {
        return name.to_string();
    }
    let truncated: String = stem.chars().take(MAX_STEM_CHARS).collect();
    format!("{truncated}{ext}")
}

/// Splits `name` into stem and extension (extension keeps its leading dot).
#[must_use]
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

/// Builds the job-unique token used in temporary file names.
///
/// Combines the planner ordinal with the extractor item id, so two jobs of
/// the same run never collide and a re-planned job maps to the same name.
#[must_use]
pub fn job_token(ordinal: usize, item_id: &str) -> String {
    let id = sanitize_filename(item_id).replace('.', "_");
    format!("{ordinal:04}-{id}")
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Reserves a unique path in `dir`, adding a numeric suffix if the name is taken.
///
/// The reservation creates an empty placeholder with `create_new`, so two
/// jobs finishing at the same moment cannot pick the same destination. The
/// caller renames its file over the placeholder.
///
/// Example: `clip.mp4`, then `clip_1.mp4`, `clip_2.mp4`, ...
///
/// # Errors
///
/// Returns the IO error when the directory is not writable.
pub async fn reserve_unique_path(dir: &Path, filename: &str) -> io::Result<PathBuf> {
    let filename = sanitize_filename(filename);
    let (stem, ext) = split_extension(&filename);

    for i in 0..10_000usize {
        let candidate = if i == 0 {
            dir.join(&filename)
        } else {
            dir.join(format!("{stem}_{i}{ext}"))
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {filename} in {}", dir.display()),
    ))
}
