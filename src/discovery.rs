//! Recursive discovery of the remote folder tree.
//!
//! Discovery runs in two passes. The first walks the whole folder tree
//! depth-first without looking at files; the second re-enters every folder
//! in discovery order to enumerate its videos, and finally the files at the
//! root. The resulting order is the processing order of the transfer run.

use std::collections::HashSet;

use crate::challenge::{ChallengeHandler, REOPEN_ATTEMPTS};
use crate::error::DiscoveryError;
use crate::manifest::{FileEntry, FileStatus, FolderNode, Manifest};
use crate::naming::{self, EntryClass};
use crate::remote::{RemoteBrowser, RemoteRef, VisibleEntry};

/// Result of one discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    pub folders: Vec<FolderNode>,
    pub files: Vec<FileEntry>,
    /// Branches that could not be enumerated and were skipped.
    pub skipped_branches: usize,
}

impl Discovery {
    pub fn into_manifest(self) -> Manifest {
        let mut m = Manifest::new();
        for f in self.folders {
            m.add_folder(f);
        }
        for f in self.files {
            m.add_file(f);
        }
        m
    }
}

pub struct TreeDiscoverer<'a> {
    browser: &'a mut dyn RemoteBrowser,
    challenge: &'a mut ChallengeHandler,
    ignored_folders: Vec<String>,
    seen_refs: HashSet<RemoteRef>,
    folder_paths: HashSet<String>,
    file_keys: HashSet<String>,
    out: Discovery,
}

impl<'a> TreeDiscoverer<'a> {
    pub fn new(
        browser: &'a mut dyn RemoteBrowser,
        challenge: &'a mut ChallengeHandler,
        ignored_folders: Vec<String>,
    ) -> Self {
        Self {
            browser,
            challenge,
            ignored_folders,
            seen_refs: HashSet::new(),
            folder_paths: HashSet::new(),
            file_keys: HashSet::new(),
            out: Discovery::default(),
        }
    }

    /// Discover everything below `root`. Only a failure to open the root
    /// itself, or an interrupted challenge wait, fails the pass.
    pub fn discover(mut self, root: &RemoteRef) -> Result<Discovery, DiscoveryError> {
        self.seen_refs.insert(root.clone());
        tracing::info!("discovering folders under {}", root);
        self.collect_folders(root, "")?;
        tracing::info!("{} folder(s) found, enumerating videos", self.out.folders.len());

        let folders: Vec<(Option<RemoteRef>, String)> =
            self.out.folders.iter().map(|f| (f.remote_ref.clone(), f.path.clone())).collect();
        for (remote_ref, path) in folders {
            let Some(remote_ref) = remote_ref else { continue };
            let res = self.collect_files(&remote_ref, &path);
            self.branch(res)?;
        }
        self.collect_files(root, "")?;

        tracing::info!(
            "discovery done: {} folder(s), {} video(s), {} skipped branch(es)",
            self.out.folders.len(),
            self.out.files.len(),
            self.out.skipped_branches
        );
        Ok(self.out)
    }

    /// Swallow a branch-local error after logging it; pass fatal ones on.
    fn branch(&mut self, res: Result<(), DiscoveryError>) -> Result<(), DiscoveryError> {
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!("skipping branch: {:#}", anyhow::Error::from(e));
                self.out.skipped_branches += 1;
                Ok(())
            }
        }
    }

    /// Open `location` and wait out any challenge. A challenge that left the
    /// session elsewhere is followed by another visit, a bounded number of
    /// times.
    fn visit(&mut self, location: &RemoteRef, path: &str, restoring: bool) -> Result<(), DiscoveryError> {
        let fail = |source: anyhow::Error| {
            if restoring {
                DiscoveryError::RestoreFailed { path: display(path), source }
            } else {
                DiscoveryError::Navigate { path: display(path), source }
            }
        };
        for _ in 0..REOPEN_ATTEMPTS {
            self.browser.navigate(location).map_err(fail)?;
            if !self.challenge.clear_for(self.browser, location)? {
                return Ok(());
            }
            tracing::info!("challenge left the session away from '{}', opening it again", display(path));
        }
        Err(fail(anyhow::anyhow!("session keeps leaving {} after challenges", location)))
    }

    fn open(&mut self, location: &RemoteRef, path: &str) -> Result<(), DiscoveryError> {
        self.visit(location, path, false)
    }

    fn list(&mut self, location: &RemoteRef, path: &str) -> Result<Vec<VisibleEntry>, DiscoveryError> {
        self.open(location, path)?;
        self.browser
            .list_visible_entries()
            .map_err(|source| DiscoveryError::Listing { path: display(path), source })
    }

    /// Best-effort reference capture for an entry without a direct link.
    /// The session is put back at `location` afterwards.
    fn capture(
        &mut self,
        location: &RemoteRef,
        path: &str,
        entry: &VisibleEntry,
    ) -> Result<Option<RemoteRef>, DiscoveryError> {
        if self.browser.current_location().as_ref() != Some(location) {
            self.restore(location, path)?;
        }
        let captured = match self.browser.capture_by_interaction(entry) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("could not capture a reference for '{}': {:#}", entry.name, e);
                None
            }
        };
        if self.browser.current_location().as_ref() != Some(location) {
            self.restore(location, path)?;
        }
        Ok(captured.filter(|r| r != location))
    }

    fn restore(&mut self, location: &RemoteRef, path: &str) -> Result<(), DiscoveryError> {
        self.visit(location, path, true)
    }

    /// `capture`, except that a failed restore only costs this entry: it is
    /// counted as a skipped branch and the session is taken back to
    /// `location` once more before the scan goes on.
    fn capture_or_skip(
        &mut self,
        location: &RemoteRef,
        path: &str,
        entry: &VisibleEntry,
    ) -> Result<Option<RemoteRef>, DiscoveryError> {
        match self.capture(location, path, entry) {
            Err(e @ DiscoveryError::RestoreFailed { .. }) => {
                tracing::warn!("skipping '{}': {:#}", entry.name, anyhow::Error::from(e));
                self.out.skipped_branches += 1;
                self.restore(location, path)?;
                Ok(None)
            }
            other => other,
        }
    }

    fn collect_folders(&mut self, location: &RemoteRef, base: &str) -> Result<(), DiscoveryError> {
        let entries = self.list(location, base)?;
        tracing::debug!("'{}': {} entries", display(base), entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            self.challenge.checkpoint(self.browser, idx)?;
            if naming::classify(&entry.name, entry.kind_hint, &self.ignored_folders)
                != EntryClass::Folder
            {
                continue;
            }
            let reference = match &entry.remote_ref {
                Some(r) => r.clone(),
                None => match self.capture_or_skip(location, base, entry)? {
                    Some(r) => r,
                    None => {
                        tracing::debug!("no reference for folder '{}', skipped", entry.name);
                        continue;
                    }
                },
            };
            if !self.seen_refs.insert(reference.clone()) {
                continue;
            }
            let segment = naming::folder_segment(&entry.name);
            if segment.is_empty() {
                tracing::warn!("folder name '{}' normalizes to nothing, skipped", entry.name);
                continue;
            }
            let path = naming::join_key(base, &segment);
            if !self.folder_paths.insert(path.clone()) {
                tracing::warn!("folder '{}' appears twice under different references; keeping the first", path);
                continue;
            }
            tracing::info!("found folder {}", path);
            self.out.folders.push(FolderNode {
                name: naming::clean_display_name(&entry.name),
                path: path.clone(),
                remote_ref: Some(reference.clone()),
            });
            let res = self.collect_folders(&reference, &path);
            self.branch(res)?;
        }
        Ok(())
    }

    fn collect_files(&mut self, location: &RemoteRef, base: &str) -> Result<(), DiscoveryError> {
        let entries = self.list(location, base)?;
        let mut order = 0usize;
        for (idx, entry) in entries.iter().enumerate() {
            self.challenge.checkpoint(self.browser, idx)?;
            if naming::classify(&entry.name, entry.kind_hint, &self.ignored_folders)
                != EntryClass::Video
            {
                continue;
            }
            let segment = naming::file_segment(&entry.name);
            let key = naming::join_key(base, &segment);
            if !self.file_keys.insert(key.clone()) {
                tracing::debug!("duplicate file entry '{}' ignored", key);
                continue;
            }
            let download_ref = match &entry.remote_ref {
                Some(r) => Some(r.clone()),
                None => self.capture_or_skip(location, base, entry)?,
            };
            if download_ref.is_none() {
                tracing::debug!("'{}' has no direct reference; it will be looked up by path", key);
            }
            self.out.files.push(FileEntry {
                name: segment,
                relative_path: key,
                download_ref,
                order,
                status: FileStatus::NotStarted,
            });
            order += 1;
        }
        Ok(())
    }
}

fn display(path: &str) -> String {
    if path.is_empty() { "/".to_string() } else { path.to_string() }
}
