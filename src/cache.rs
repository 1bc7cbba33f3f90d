//! Local staging cache helpers.

use std::path::Path;

use walkdir::WalkDir;

use crate::manifest::{FileStatus, Manifest};
use crate::naming;

/// Create the cache folder of every manifest folder. Returns how many were
/// newly created.
pub fn precreate_folders(cache_root: &Path, manifest: &Manifest) -> std::io::Result<usize> {
    std::fs::create_dir_all(cache_root)?;
    let mut created = 0;
    for folder in manifest.folders() {
        let p = naming::local_path_for(cache_root, &folder.path);
        if !p.is_dir() {
            std::fs::create_dir_all(&p)?;
            created += 1;
        }
    }
    Ok(created)
}

/// A file sitting in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    /// `/`-joined path below the cache root; equals the manifest key for
    /// files the pipeline staged.
    pub relative_path: String,
    pub bytes: u64,
    /// Status of the matching manifest entry, if any.
    pub status: Option<FileStatus>,
    /// Leftover `.part.<pid>` of an interrupted download.
    pub interrupted_download: bool,
}

/// Every file under `cache_root`, sorted by path. Complete entries are
/// normally reclaimed, so anything listed here is waiting to be published,
/// leftover, or unknown to the manifest.
pub fn cached_files(cache_root: &Path, manifest: &Manifest) -> Vec<CachedFile> {
    let mut out = Vec::new();
    for entry in WalkDir::new(cache_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(cache_root) else { continue };
        let relative_path: String = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let interrupted_download = entry.file_name().to_string_lossy().contains(".part.");
        out.push(CachedFile {
            status: manifest.status_of(&relative_path),
            relative_path,
            bytes,
            interrupted_download,
        });
    }
    out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    out
}
