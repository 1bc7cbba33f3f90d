use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::model::{FileEntry, FileStatus, FolderNode, Manifest, StatusChange};
use super::{parse, render};
use crate::error::ManifestError;
use crate::naming;
use crate::util::atomic_rename_with_retries;

/// Owns the persisted manifest document of one mirroring target.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the manifest. A missing file is an empty manifest; an unreadable
    /// one is backed up and also treated as empty.
    pub fn load(&self) -> Manifest {
        match self.try_load() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("{}; starting from an empty manifest", e);
                match self.backup_corrupt() {
                    Ok(Some(p)) => tracing::warn!(
                        "unreadable manifest kept at {} for manual reconciliation",
                        p.display()
                    ),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("could not back up unreadable manifest: {}", e),
                }
                Manifest::new()
            }
        }
    }

    fn try_load(&self) -> Result<Manifest, ManifestError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Manifest::new()),
            Err(e) => {
                return Err(ManifestError::Corrupt { path: self.path.clone(), reason: e.to_string() });
            }
        };
        let content = String::from_utf8(bytes).map_err(|e| ManifestError::Corrupt {
            path: self.path.clone(),
            reason: format!("not valid UTF-8: {}", e),
        })?;
        if content.trim().is_empty() {
            return Ok(Manifest::new());
        }
        let parsed = parse::parse(&content);
        if !parsed.recognized {
            return Err(ManifestError::Corrupt {
                path: self.path.clone(),
                reason: "no tree block and no file section".to_string(),
            });
        }
        for key in &parsed.disagreements {
            tracing::warn!("manifest views disagree on '{}'; using the file list", key);
        }
        Ok(from_parsed(&parsed))
    }

    fn backup_corrupt(&self) -> std::io::Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let name = self.path.file_name().and_then(|s| s.to_str()).unwrap_or("manifest.md");
        let backup = self
            .path
            .with_file_name(format!("{}.corrupt-{}", name, Utc::now().format("%Y%m%d_%H%M%S")));
        fs::copy(&self.path, &backup)?;
        Ok(Some(backup))
    }

    /// Replace the persisted document with a rendering of `manifest`. The new
    /// content is written next to the target and renamed over it, so readers
    /// only ever see the old or the new document.
    pub fn save(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        let write_err = |source| ManifestError::Write { path: self.path.clone(), source };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let name = self.path.file_name().and_then(|s| s.to_str()).unwrap_or("manifest.md");
        let tmp = self.path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));
        let result = (|| {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(render::render(manifest).as_bytes())?;
            f.sync_all()?;
            drop(f);
            atomic_rename_with_retries(&tmp, &self.path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        tracing::debug!("manifest saved to {}", self.path.display());
        Ok(())
    }

    /// Advance one entry and persist right away when something changed.
    pub fn advance(
        &self,
        manifest: &mut Manifest,
        relative_path: &str,
        status: FileStatus,
    ) -> Result<StatusChange, ManifestError> {
        let change = manifest.set_status(relative_path, status)?;
        if let StatusChange::Advanced { from, to } = change {
            self.save(manifest)?;
            tracing::debug!("'{}': {} -> {}", relative_path, from, to);
        }
        Ok(change)
    }
}

fn from_parsed(parsed: &parse::ParsedManifest) -> Manifest {
    let mut m = Manifest::new();
    for path in &parsed.folders {
        m.add_folder(FolderNode {
            name: naming::base_name(path).to_string(),
            path: path.clone(),
            remote_ref: None,
        });
    }
    let mut per_folder: HashMap<String, usize> = HashMap::new();
    for (key, status) in parsed.statuses() {
        let folder = naming::parent_key(&key).unwrap_or("").to_string();
        let slot = per_folder.entry(folder).or_insert(0);
        let order = *slot;
        *slot += 1;
        m.add_file(FileEntry {
            name: naming::base_name(&key).to_string(),
            relative_path: key,
            download_ref: None,
            order,
            status,
        });
    }
    m
}

/// Fold a fresh discovery into what was known before. Discovered entries
/// keep discovery order and gain any progress recorded earlier; entries that
/// were not rediscovered are kept after them. Nothing is ever dropped and no
/// status moves backward.
pub fn merge(existing: &Manifest, discovered: &Manifest) -> Manifest {
    let mut out = Manifest::new();
    for folder in discovered.folders() {
        out.add_folder(folder.clone());
    }
    for folder in existing.folders() {
        out.add_folder(folder.clone());
    }
    for file in discovered.files() {
        let mut f = file.clone();
        if let Some(prev) = existing.status_of(&f.relative_path) {
            f.status = f.status.max(prev);
        }
        out.add_file(f);
    }
    let mut carried = 0usize;
    for file in existing.files() {
        if out.add_file(file.clone()) {
            carried += 1;
        }
    }
    if carried > 0 {
        tracing::info!("{} manifest entries were not seen in this discovery and are kept", carried);
    }
    out
}
