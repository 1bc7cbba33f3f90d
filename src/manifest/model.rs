use std::collections::{HashMap, HashSet};

use crate::error::ManifestError;
use crate::naming;
use crate::remote::RemoteRef;

/// Per-file transfer status. Ordered: a status may only move up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FileStatus {
    #[default]
    NotStarted,
    Partial,
    Complete,
}

impl FileStatus {
    /// Character used inside `- [?]` in the flat section.
    pub fn flat_marker(self) -> char {
        match self {
            FileStatus::NotStarted => ' ',
            FileStatus::Partial => 'p',
            FileStatus::Complete => 'x',
        }
    }

    /// Suffix appended to file names in the tree view.
    pub fn tree_marker(self) -> &'static str {
        match self {
            FileStatus::NotStarted => " [ ]",
            FileStatus::Partial => " [p]",
            FileStatus::Complete => " ✓",
        }
    }

    pub fn from_marker(c: char) -> Option<Self> {
        match c {
            ' ' => Some(FileStatus::NotStarted),
            'p' | 'P' => Some(FileStatus::Partial),
            'x' | 'X' | '✓' => Some(FileStatus::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FileStatus::NotStarted => "not-started",
            FileStatus::Partial => "partial",
            FileStatus::Complete => "complete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    pub name: String,
    /// `/`-joined normalized ancestor names; the folder's manifest key.
    pub path: String,
    /// Absent for folders rebuilt from a persisted manifest.
    pub remote_ref: Option<RemoteRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub relative_path: String,
    pub download_ref: Option<RemoteRef>,
    pub order: usize,
    pub status: FileStatus,
}

impl FileEntry {
    pub fn folder_path(&self) -> Option<&str> {
        naming::parent_key(&self.relative_path)
    }
}

/// Outcome of a status update that was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Unchanged,
    Advanced { from: FileStatus, to: FileStatus },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub not_started: usize,
    pub partial: usize,
    pub complete: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.not_started + self.partial + self.complete
    }
}

/// In-memory manifest. Folders and files keep discovery order; the
/// persisted form is rendered from this alone.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    folders: Vec<FolderNode>,
    files: Vec<FileEntry>,
    folder_index: HashSet<String>,
    file_index: HashMap<String, usize>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }

    pub fn folders(&self) -> &[FolderNode] {
        &self.folders
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn file(&self, relative_path: &str) -> Option<&FileEntry> {
        self.file_index.get(relative_path).map(|&i| &self.files[i])
    }

    pub fn status_of(&self, relative_path: &str) -> Option<FileStatus> {
        self.file(relative_path).map(|f| f.status)
    }

    pub fn has_folder(&self, path: &str) -> bool {
        self.folder_index.contains(path)
    }

    /// Add a folder unless its path is already known. Missing ancestors are
    /// added first so the tree view never has holes.
    pub fn add_folder(&mut self, node: FolderNode) -> bool {
        if node.path.is_empty() || self.folder_index.contains(&node.path) {
            return false;
        }
        if let Some(parent) = naming::parent_key(&node.path)
            && !self.folder_index.contains(parent)
        {
            self.add_folder(FolderNode {
                name: naming::base_name(parent).to_string(),
                path: parent.to_string(),
                remote_ref: None,
            });
        }
        self.folder_index.insert(node.path.clone());
        self.folders.push(node);
        true
    }

    /// Add a file unless its key is already known; returns whether it was new.
    pub fn add_file(&mut self, entry: FileEntry) -> bool {
        if entry.relative_path.is_empty() || self.file_index.contains_key(&entry.relative_path) {
            return false;
        }
        if let Some(parent) = entry.folder_path()
            && !self.folder_index.contains(parent)
        {
            self.add_folder(FolderNode {
                name: naming::base_name(parent).to_string(),
                path: parent.to_string(),
                remote_ref: None,
            });
        }
        self.file_index.insert(entry.relative_path.clone(), self.files.len());
        self.files.push(entry);
        true
    }

    /// Move a file's status forward. Re-applying the current status is a
    /// no-op; moving backward is refused and leaves the entry untouched.
    pub fn set_status(
        &mut self,
        relative_path: &str,
        status: FileStatus,
    ) -> Result<StatusChange, ManifestError> {
        let idx = *self
            .file_index
            .get(relative_path)
            .ok_or_else(|| ManifestError::UnknownEntry(relative_path.to_string()))?;
        let entry = &mut self.files[idx];
        let from = entry.status;
        if status == from {
            return Ok(StatusChange::Unchanged);
        }
        if status < from {
            return Err(ManifestError::BackwardTransition {
                path: relative_path.to_string(),
                from,
                to: status,
            });
        }
        entry.status = status;
        Ok(StatusChange::Advanced { from, to: status })
    }

    pub fn counts(&self) -> StatusCounts {
        let mut c = StatusCounts::default();
        for f in &self.files {
            match f.status {
                FileStatus::NotStarted => c.not_started += 1,
                FileStatus::Partial => c.partial += 1,
                FileStatus::Complete => c.complete += 1,
            }
        }
        c
    }

    /// Indices of `files` in processing order: folder discovery order first,
    /// then `order` within the folder; root-level files come last.
    pub fn processing_order(&self) -> Vec<usize> {
        let rank: HashMap<&str, usize> =
            self.folders.iter().enumerate().map(|(i, f)| (f.path.as_str(), i)).collect();
        let root_rank = self.folders.len();
        let mut idx: Vec<usize> = (0..self.files.len()).collect();
        idx.sort_by_key(|&i| {
            let f = &self.files[i];
            let r = f.folder_path().and_then(|p| rank.get(p).copied()).unwrap_or(root_rank);
            (r, f.order)
        });
        idx
    }
}

/// Keep only keys equal to `folder` or below it.
pub fn matches_folder(relative_path: &str, folder: &str) -> bool {
    let folder = folder.trim_matches('/');
    folder.is_empty()
        || relative_path == folder
        || relative_path.strip_prefix(folder).is_some_and(|rest| rest.starts_with('/'))
}
