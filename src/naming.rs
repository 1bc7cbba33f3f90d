//! Name normalization shared by discovery, the manifest and the transfer
//! pipeline. Everything here is pure; manifest keys depend on it staying
//! stable between releases.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

pub const VIDEO_EXTENSIONS: &[&str] =
    &[".mp4", ".avi", ".mkv", ".mov", ".webm", ".flv", ".wmv", ".m4v", ".3gp", ".ogv"];

pub const OTHER_FILE_EXTENSIONS: &[&str] = &[
    ".txt", ".pdf", ".doc", ".zip", ".rar", ".jpg", ".png", ".gif", ".json", ".xml", ".mp3",
    ".wav", ".ogg",
];

pub const DEFAULT_IGNORED_FOLDERS: &[&str] = &["Аудио", "Доки"];

const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

// Listing UI appends "dd.mm.yyyy ..." to folder titles.
static DATE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\d{1,2}\.\d{1,2}\.\d{2,4}.*$").expect("valid date suffix pattern")
});

static UNDERSCORE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid underscore pattern"));

/// Replace characters that are unsafe on common file systems with `_`,
/// trim dots/spaces, collapse `_` runs and trim `_` at both ends.
/// Non-ASCII text is left untouched.
pub fn sanitize_segment(raw: &str) -> String {
    let replaced: String =
        raw.chars().map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c }).collect();
    // Trimming can expose new '_' ends and collapsing can expose new '.'
    // ends, so run until nothing changes.
    let mut current = replaced;
    loop {
        let trimmed = current.trim_matches(|c| c == '.' || c == ' ');
        let collapsed = UNDERSCORE_RUN.replace_all(trimmed, "_");
        let next = collapsed.trim_matches('_').to_string();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Newlines in listing titles become spaces; surrounding whitespace goes.
fn flatten_title(raw: &str) -> String {
    raw.replace(['\n', '\r'], " ").trim().to_string()
}

/// Strip the trailing date/time suffix the listing UI adds to titles. Falls
/// back to the (flattened) raw name when stripping leaves under 2 chars.
pub fn clean_display_name(raw: &str) -> String {
    let flat = flatten_title(raw);
    let cleaned = DATE_SUFFIX.replace(&flat, "").trim().to_string();
    if cleaned.chars().count() < 2 { flat } else { cleaned }
}

/// Manifest path segment for a folder title.
pub fn folder_segment(raw: &str) -> String {
    sanitize_segment(&clean_display_name(raw))
}

/// Manifest path segment for a file name. Dates are kept: stripping would
/// also strip the extension.
pub fn file_segment(raw: &str) -> String {
    sanitize_segment(&flatten_title(raw))
}

pub fn join_key(parent: &str, segment: &str) -> String {
    if parent.is_empty() { segment.to_string() } else { format!("{}/{}", parent, segment) }
}

/// Parent folder key of a manifest key (`None` at the tree root).
pub fn parent_key(relative_path: &str) -> Option<&str> {
    relative_path.rsplit_once('/').map(|(parent, _)| parent)
}

pub fn base_name(relative_path: &str) -> &str {
    relative_path.rsplit_once('/').map(|(_, name)| name).unwrap_or(relative_path)
}

fn lower_name(name: &str) -> String {
    flatten_title(name).to_lowercase()
}

pub fn has_video_extension(name: &str) -> bool {
    let n = lower_name(name);
    VIDEO_EXTENSIONS.iter().any(|ext| n.ends_with(ext))
}

pub fn has_other_file_extension(name: &str) -> bool {
    let n = lower_name(name);
    OTHER_FILE_EXTENSIONS.iter().any(|ext| n.ends_with(ext))
}

/// Whatever the listing says an entry looks like, before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindHint {
    Folder,
    File,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    Folder,
    Video,
    Other,
    Ignored,
}

/// Classify a listing entry by name first, hint second. A known extension
/// always wins over a folder hint.
pub fn classify(name: &str, hint: KindHint, ignored_folders: &[String]) -> EntryClass {
    let flat = flatten_title(name);
    if flat.is_empty() {
        return EntryClass::Ignored;
    }
    if has_video_extension(&flat) {
        return EntryClass::Video;
    }
    if has_other_file_extension(&flat) {
        return EntryClass::Other;
    }
    if hint == KindHint::File {
        return EntryClass::Other;
    }
    if ignored_folders.iter().any(|f| f == &flat) {
        return EntryClass::Ignored;
    }
    EntryClass::Folder
}

/// Deterministic local staging path of a manifest key.
pub fn local_path_for(cache_root: &Path, relative_path: &str) -> PathBuf {
    let mut p = cache_root.to_path_buf();
    for seg in relative_path.split('/').filter(|s| !s.trim().is_empty()) {
        p.push(sanitize_segment(seg));
    }
    p
}

/// Destination path of a manifest key under the account root.
pub fn remote_path_for(dest_root: &str, relative_path: &str) -> String {
    let base = dest_root.trim_end_matches('/');
    let tail: Vec<String> = relative_path
        .split('/')
        .filter(|s| !s.trim().is_empty())
        .map(sanitize_segment)
        .collect();
    if tail.is_empty() { base.to_string() } else { format!("{}/{}", base, tail.join("/")) }
}

/// Every ancestor folder of a destination file path below `dest_root`,
/// shallowest first.
pub fn remote_ancestors(dest_root: &str, relative_path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = dest_root.trim_end_matches('/').to_string();
    let segs: Vec<&str> = relative_path.split('/').filter(|s| !s.trim().is_empty()).collect();
    if segs.len() < 2 {
        return out;
    }
    for seg in &segs[..segs.len() - 1] {
        current = format!("{}/{}", current, sanitize_segment(seg));
        out.push(current.clone());
    }
    out
}
