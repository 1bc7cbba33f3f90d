use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::{Publish, Stage};
use crate::error::TransferError;
use crate::manifest::{FileEntry, FileStatus, Manifest, ManifestStore, matches_folder};
use crate::naming;
use crate::util::prune_empty_dirs;

pub const DEFAULT_MIN_STAGED_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub cache_dir: PathBuf,
    /// Destination root on the storage account, e.g. `/Videos/Mirror`.
    pub dest_root: String,
    /// A staged file at least this large is trusted and not downloaded again.
    pub min_staged_bytes: u64,
    /// Process at most this many non-complete entries.
    pub limit: Option<usize>,
    /// Only report what would be done.
    pub dry_run: bool,
    /// Never stage; publish what is already in the cache.
    pub upload_only: bool,
    /// Only entries at or below this folder key.
    pub folder_filter: Option<String>,
}

impl PipelineOptions {
    pub fn new(cache_dir: impl Into<PathBuf>, dest_root: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            dest_root: dest_root.into(),
            min_staged_bytes: DEFAULT_MIN_STAGED_BYTES,
            limit: None,
            dry_run: false,
            upload_only: false,
            folder_filter: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub succeeded: usize,
    /// Already complete on entry.
    pub skipped: usize,
    /// `upload_only` entries with nothing staged.
    pub missing: Vec<String>,
    /// `dry_run` plan, one line per entry.
    pub planned: Vec<String>,
    /// Set when the run stopped early; the entry it names is where the next
    /// run resumes.
    pub halted: Option<TransferError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.halted.is_none()
    }
}

enum Outcome {
    Published,
    NothingStaged,
}

pub struct Pipeline<'a> {
    store: &'a ManifestStore,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a ManifestStore, options: PipelineOptions, cancel: CancellationToken) -> Self {
        Self { store, options, cancel }
    }

    fn staged_size(path: &Path) -> Option<u64> {
        std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
    }

    /// Entries this run would touch, in processing order, plus how many
    /// matching entries are already complete.
    fn selection(&self, manifest: &Manifest) -> (Vec<FileEntry>, usize) {
        let mut pending = Vec::new();
        let mut skipped = 0;
        for idx in manifest.processing_order() {
            let entry = &manifest.files()[idx];
            if let Some(folder) = &self.options.folder_filter
                && !matches_folder(&entry.relative_path, folder)
            {
                continue;
            }
            if entry.status == FileStatus::Complete {
                skipped += 1;
            } else if self.options.limit.is_none_or(|n| pending.len() < n) {
                pending.push(entry.clone());
            }
        }
        (pending, skipped)
    }

    /// What `run` would do, without any I/O.
    pub fn plan(&self, manifest: &Manifest) -> RunReport {
        let (pending, skipped) = self.selection(manifest);
        RunReport {
            skipped,
            planned: pending.iter().map(|e| self.plan_line(e)).collect(),
            ..RunReport::default()
        }
    }

    /// Process every non-complete entry in order, one at a time. Stops at the
    /// first failing entry; everything before it is recorded.
    pub fn run(&self, manifest: &mut Manifest, stage: &mut dyn Stage, publish: &mut dyn Publish) -> RunReport {
        if self.options.dry_run {
            return self.plan(manifest);
        }
        let (pending, skipped) = self.selection(manifest);
        let mut report = RunReport { skipped, ..RunReport::default() };
        if let Some(n) = self.options.limit {
            tracing::info!("processing at most {} file(s)", n);
        }

        for (i, entry) in pending.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.halted = Some(TransferError::Interrupted { relative_path: entry.relative_path.clone() });
                break;
            }
            tracing::info!("({}/{}) [{}] {}", i + 1, pending.len(), entry.status, entry.relative_path);
            match self.process(manifest, entry, stage, publish) {
                Ok(Outcome::Published) => report.succeeded += 1,
                Ok(Outcome::NothingStaged) => report.missing.push(entry.relative_path.clone()),
                Err(e) => {
                    tracing::error!("{}", e);
                    report.halted = Some(e);
                    break;
                }
            }
        }
        report
    }

    fn plan_line(&self, entry: &FileEntry) -> String {
        let local = naming::local_path_for(&self.options.cache_dir, &entry.relative_path);
        let staged = Self::staged_size(&local).is_some_and(|n| n >= self.options.min_staged_bytes);
        let step = if staged || self.options.upload_only { "publish" } else { "stage+publish" };
        format!(
            "{} {} -> {}",
            step,
            entry.relative_path,
            naming::remote_path_for(&self.options.dest_root, &entry.relative_path)
        )
    }

    fn interrupted(&self, rel: &str) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Interrupted { relative_path: rel.to_string() });
        }
        Ok(())
    }

    fn process(
        &self,
        manifest: &mut Manifest,
        entry: &FileEntry,
        stage: &mut dyn Stage,
        publish: &mut dyn Publish,
    ) -> Result<Outcome, TransferError> {
        let rel = entry.relative_path.as_str();
        let local = naming::local_path_for(&self.options.cache_dir, rel);
        let remote = naming::remote_path_for(&self.options.dest_root, rel);

        let staged = Self::staged_size(&local).is_some_and(|n| n >= self.options.min_staged_bytes);
        if staged {
            tracing::debug!("'{}' already staged at {}, not downloading", rel, local.display());
        } else if self.options.upload_only {
            tracing::warn!("'{}' has nothing staged at {}, skipped", rel, local.display());
            return Ok(Outcome::NothingStaged);
        } else {
            if entry.status == FileStatus::Partial {
                tracing::info!("'{}' was recorded as staged but the cache copy is gone; staging again", rel);
            }
            if let Err(e) = stage.stage(entry, &local) {
                self.interrupted(rel)?;
                return Err(TransferError::stage(rel, e));
            }
        }
        self.store
            .advance(manifest, rel, FileStatus::Partial)
            .map_err(|e| TransferError::record(rel, e.into()))?;

        self.interrupted(rel)?;

        let mut folders = Vec::new();
        let root = self.options.dest_root.trim_end_matches('/');
        if !root.is_empty() {
            folders.push(root.to_string());
        }
        folders.extend(naming::remote_ancestors(&self.options.dest_root, rel));
        for folder in &folders {
            publish.ensure_folder(folder).map_err(|e| TransferError::publish(rel, e))?;
        }
        if let Err(e) = publish.upload(&local, &remote) {
            self.interrupted(rel)?;
            return Err(TransferError::publish(rel, e));
        }
        self.store
            .advance(manifest, rel, FileStatus::Complete)
            .map_err(|e| TransferError::record(rel, e.into()))?;

        self.reclaim(&local);
        Ok(Outcome::Published)
    }

    /// Delete the staged copy and any cache folders it leaves empty.
    fn reclaim(&self, local: &Path) {
        if let Err(e) = std::fs::remove_file(local) {
            tracing::warn!("could not remove staged copy {}: {}", local.display(), e);
            return;
        }
        if let Some(parent) = local.parent() {
            prune_empty_dirs(parent, &self.options.cache_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::SftpPublisher;
    use crate::transfer::publish::mem::MemSftp;

    struct FakeStage {
        body: Vec<u8>,
        calls: Vec<String>,
        fail_on: Option<String>,
    }

    impl Stage for FakeStage {
        fn stage(&mut self, entry: &FileEntry, local_path: &Path) -> anyhow::Result<u64> {
            self.calls.push(entry.relative_path.clone());
            if self.fail_on.as_deref() == Some(entry.relative_path.as_str()) {
                anyhow::bail!("404");
            }
            std::fs::create_dir_all(local_path.parent().unwrap())?;
            std::fs::write(local_path, &self.body)?;
            Ok(self.body.len() as u64)
        }
    }

    fn file(path: &str, order: usize, status: FileStatus) -> FileEntry {
        FileEntry {
            name: naming::base_name(path).to_string(),
            relative_path: path.to_string(),
            download_ref: None,
            order,
            status,
        }
    }

    fn options(cache: &Path) -> PipelineOptions {
        let mut o = PipelineOptions::new(cache, "/Videos");
        o.min_staged_bytes = 4;
        o
    }

    #[test]
    fn stages_publishes_and_reclaims_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let store = ManifestStore::new(dir.path().join("tree.md"));
        let mut m = Manifest::new();
        m.add_file(file("B/1.mp4", 0, FileStatus::NotStarted));
        m.add_file(file("A/1.mp4", 0, FileStatus::NotStarted));
        m.add_file(file("A/0.mp4", 1, FileStatus::Complete));

        let fs = MemSftp::default();
        let mut publish = SftpPublisher::with_sftp(Box::new(fs.clone()), 1);
        let mut stage = FakeStage { body: b"video bytes".to_vec(), calls: Vec::new(), fail_on: None };
        let report = Pipeline::new(&store, options(&cache), CancellationToken::new())
            .run(&mut m, &mut stage, &mut publish);

        assert!(report.is_success());
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(stage.calls, vec!["B/1.mp4", "A/1.mp4"]);
        assert_eq!(m.status_of("B/1.mp4"), Some(FileStatus::Complete));
        assert!(fs.tree.lock().unwrap().contains_key(Path::new("/Videos/A/1.mp4")));
        // cache fully reclaimed, root kept
        assert!(cache.exists());
        assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 0);
        assert_eq!(store.load().status_of("A/1.mp4"), Some(FileStatus::Complete));
    }

    #[test]
    fn stage_failure_halts_before_later_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("tree.md"));
        let mut m = Manifest::new();
        m.add_file(file("a.mp4", 0, FileStatus::NotStarted));
        m.add_file(file("b.mp4", 1, FileStatus::NotStarted));
        let mut publish = SftpPublisher::with_sftp(Box::new(MemSftp::default()), 1);
        let mut stage =
            FakeStage { body: b"12345".to_vec(), calls: Vec::new(), fail_on: Some("a.mp4".into()) };
        let report = Pipeline::new(&store, options(&dir.path().join("c")), CancellationToken::new())
            .run(&mut m, &mut stage, &mut publish);
        let halted = report.halted.unwrap();
        assert_eq!(halted.relative_path(), "a.mp4");
        assert_eq!(halted.step(), Some(crate::error::TransferStep::Stage));
        assert_eq!(stage.calls, vec!["a.mp4"]);
        assert_eq!(m.status_of("a.mp4"), Some(FileStatus::NotStarted));
    }

    #[test]
    fn limit_and_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("tree.md"));
        let mut m = Manifest::new();
        for i in 0..5 {
            m.add_file(file(&format!("F/{}.mp4", i), i, FileStatus::NotStarted));
        }
        let mut o = options(&dir.path().join("c"));
        o.limit = Some(2);
        o.dry_run = true;
        let mut publish = SftpPublisher::with_sftp(Box::new(MemSftp::default()), 1);
        let mut stage = FakeStage { body: Vec::new(), calls: Vec::new(), fail_on: None };
        let report = Pipeline::new(&store, o, CancellationToken::new()).run(&mut m, &mut stage, &mut publish);
        assert_eq!(report.planned, vec![
            "stage+publish F/0.mp4 -> /Videos/F/0.mp4".to_string(),
            "stage+publish F/1.mp4 -> /Videos/F/1.mp4".to_string(),
        ]);
        assert!(stage.calls.is_empty());
        assert!(!store.exists());
    }

    #[test]
    fn upload_only_reports_missing_without_halting() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("c");
        let store = ManifestStore::new(dir.path().join("tree.md"));
        let mut m = Manifest::new();
        m.add_file(file("a.mp4", 0, FileStatus::NotStarted));
        m.add_file(file("b.mp4", 1, FileStatus::NotStarted));
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("b.mp4"), b"staged!").unwrap();
        let mut o = options(&cache);
        o.upload_only = true;
        let mut publish = SftpPublisher::with_sftp(Box::new(MemSftp::default()), 1);
        let mut stage = FakeStage { body: Vec::new(), calls: Vec::new(), fail_on: None };
        let report = Pipeline::new(&store, o, CancellationToken::new()).run(&mut m, &mut stage, &mut publish);
        assert!(report.is_success());
        assert_eq!(report.missing, vec!["a.mp4".to_string()]);
        assert_eq!(report.succeeded, 1);
        assert_eq!(m.status_of("b.mp4"), Some(FileStatus::Complete));
    }

    #[test]
    fn cancelled_token_stops_before_first_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("tree.md"));
        let mut m = Manifest::new();
        m.add_file(file("a.mp4", 0, FileStatus::NotStarted));
        let token = CancellationToken::new();
        token.cancel();
        let mut publish = SftpPublisher::with_sftp(Box::new(MemSftp::default()), 1);
        let mut stage = FakeStage { body: b"12345".to_vec(), calls: Vec::new(), fail_on: None };
        let report = Pipeline::new(&store, options(&dir.path().join("c")), token).run(&mut m, &mut stage, &mut publish);
        assert!(matches!(report.halted, Some(TransferError::Interrupted { .. })));
        assert!(stage.calls.is_empty());
    }
}
