//! Run orchestration: wires the collaborators together for each mode and
//! reports the outcome.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use crate::cache;
use crate::challenge::{ChallengeHandler, StdinOperator};
use crate::cli::{Commands, TransferArgs};
use crate::config::{Locations, Settings, validate_destination};
use crate::discovery::TreeDiscoverer;
use crate::error::{ConfigError, ExitStatus};
use crate::manifest::{self, FileEntry, FileStatus, Manifest, ManifestStore, StatusCounts};
use crate::remote::{HttpListingBrowser, PathLookup, RemoteRef};
use crate::transfer::{
    BrowserStage, HttpStager, Pipeline, Publish, PublishTarget, RunReport, SftpPublisher, Stage,
};
use crate::util::{human_bytes, set_backoff_ms, try_enable_ansi_on_windows};

/// Where this run publishes to. `target` is absent for dry runs.
struct Destination {
    root: String,
    target: Option<PublishTarget>,
}

/// Stage collaborator for upload-only replays: nothing is ever downloaded.
struct CacheOnly;

impl Stage for CacheOnly {
    fn stage(&mut self, entry: &FileEntry, _local_path: &Path) -> Result<u64> {
        anyhow::bail!("'{}' is not in the cache and this run does not download", entry.relative_path)
    }
}

pub struct App {
    settings: Settings,
    locations: Locations,
    cancel: CancellationToken,
}

/// Exit status for an error that ended a run.
pub fn exit_status_for(err: &anyhow::Error) -> ExitStatus {
    if err.chain().any(|c| c.downcast_ref::<ConfigError>().is_some()) {
        ExitStatus::InvalidConfig
    } else {
        ExitStatus::RuntimeFailure
    }
}

impl App {
    pub fn new(settings: Settings, locations: Locations, cancel: CancellationToken) -> Self {
        set_backoff_ms(settings.backoff_ms);
        Self { settings, locations, cancel }
    }

    pub fn dispatch(&self, command: Commands) -> Result<ExitStatus> {
        match command {
            Commands::Run(args) => self.run(&args),
            Commands::Discover { source } => self.discover_only(source),
            Commands::Replay { args, upload_only } => self.replay(&args, upload_only),
            Commands::Status { folder } => self.status(folder.as_deref()),
        }
    }

    fn store(&self) -> ManifestStore {
        ManifestStore::new(&self.settings.manifest_path)
    }

    fn browser(&self) -> Result<HttpListingBrowser> {
        HttpListingBrowser::new(
            Duration::from_secs(self.settings.http_timeout_secs),
            &self.settings.user_agent,
            &self.settings.challenge_patterns,
        )
    }

    fn challenge(&self) -> ChallengeHandler {
        ChallengeHandler::new(
            Box::new(StdinOperator::spawn(self.cancel.clone())),
            self.settings.challenge_recheck_every,
        )
    }

    fn destination(&self, locations: &Locations, dry_run: bool) -> Result<Destination, ConfigError> {
        if dry_run {
            let root = match locations.dest_path.as_deref() {
                Some(raw) => validate_destination(raw)?,
                None => "/".to_string(),
            };
            return Ok(Destination { root, target: None });
        }
        let root = locations.require_dest_path()?;
        let host = locations.require_dest_host()?;
        let target = PublishTarget::parse(&host, locations.credential.clone())?;
        Ok(Destination { root, target: Some(target) })
    }

    /// Discover below `source` and fold the result into the stored manifest.
    fn discover_into(
        &self,
        browser: &mut HttpListingBrowser,
        challenge: &mut ChallengeHandler,
        source: &RemoteRef,
        store: &ManifestStore,
    ) -> Result<Manifest> {
        let existing = store.load();
        let discovery = TreeDiscoverer::new(browser, challenge, self.settings.ignored_folders.clone())
            .discover(source)
            .context("discovery failed")?;
        let skipped = discovery.skipped_branches;
        let merged = manifest::merge(&existing, &discovery.into_manifest());
        store.save(&merged)?;
        let added = merged.files().len().saturating_sub(existing.files().len());
        println!(
            "Manifest {}: {} folder(s), {} file(s), {} new{}",
            store.path().display(),
            merged.folders().len(),
            merged.files().len(),
            added,
            if skipped > 0 { format!(", {} branch(es) skipped", skipped) } else { String::new() }
        );
        Ok(merged)
    }

    fn run(&self, args: &TransferArgs) -> Result<ExitStatus> {
        let (src, dst) = args.positionals();
        let locations = self.locations.clone().with_overrides(src, dst);
        let source = locations.require_source()?;
        let dest = self.destination(&locations, args.dry_run)?;
        let store = self.store();

        let mut browser = self.browser()?;
        let mut challenge = self.challenge();
        let mut manifest = self.discover_into(&mut browser, &mut challenge, &source, &store)?;

        let fetcher = HttpStager::new(browser.client(), self.cancel.clone(), self.settings.retries);
        let lookup = PathLookup::new(source, self.settings.ignored_folders.clone());
        let mut stage = BrowserStage::new(&mut browser, &mut challenge, Some(lookup), fetcher);
        let status = self.transfer(&mut manifest, &store, &mut stage, &dest, args, false)?;
        println!("Challenge prompts: {}", challenge.prompts());
        Ok(status)
    }

    fn discover_only(&self, source: Option<String>) -> Result<ExitStatus> {
        let locations = self.locations.clone().with_overrides(source, None);
        let source = locations.require_source()?;
        let store = self.store();
        let mut browser = self.browser()?;
        let mut challenge = self.challenge();
        let manifest = self.discover_into(&mut browser, &mut challenge, &source, &store)?;
        let created = cache::precreate_folders(&self.settings.cache_dir, &manifest)
            .with_context(|| format!("creating folders under {}", self.settings.cache_dir.display()))?;
        println!("Created {} cache folder(s) under {}", created, self.settings.cache_dir.display());
        Ok(ExitStatus::Success)
    }

    fn replay(&self, args: &TransferArgs, upload_only: bool) -> Result<ExitStatus> {
        let (src, dst) = args.positionals();
        let locations = self.locations.clone().with_overrides(src, dst);
        let store = self.store();
        if !store.exists() {
            return Err(ConfigError::ManifestMissing(store.path().to_path_buf()).into());
        }
        let source = if upload_only { None } else { Some(locations.require_source()?) };
        let dest = self.destination(&locations, args.dry_run)?;

        let mut manifest = store.load();
        println!("Replaying {} file(s) from {}", manifest.files().len(), store.path().display());

        match source {
            None => self.transfer(&mut manifest, &store, &mut CacheOnly, &dest, args, true),
            Some(source) => {
                let mut browser = self.browser()?;
                let mut challenge = self.challenge();
                let fetcher = HttpStager::new(browser.client(), self.cancel.clone(), self.settings.retries);
                let lookup = PathLookup::new(source, self.settings.ignored_folders.clone());
                let mut stage = BrowserStage::new(&mut browser, &mut challenge, Some(lookup), fetcher);
                self.transfer(&mut manifest, &store, &mut stage, &dest, args, false)
            }
        }
    }

    fn transfer(
        &self,
        manifest: &mut Manifest,
        store: &ManifestStore,
        stage: &mut dyn Stage,
        dest: &Destination,
        args: &TransferArgs,
        upload_only: bool,
    ) -> Result<ExitStatus> {
        match &dest.target {
            Some(target) if !args.dry_run => {
                let mut publisher = SftpPublisher::new(
                    target.clone(),
                    Duration::from_secs(self.settings.sftp_timeout_secs),
                    self.settings.retries,
                    self.cancel.clone(),
                )
                .extension_workaround(args.extension_workaround || self.settings.extension_workaround);
                self.transfer_with(manifest, store, stage, Some(&mut publisher), &dest.root, args, upload_only)
            }
            _ => self.transfer_with(manifest, store, stage, None, &dest.root, args, upload_only),
        }
    }

    /// Run the pipeline against `publish`, or only plan it when there is no
    /// account to publish to.
    #[allow(clippy::too_many_arguments)]
    fn transfer_with(
        &self,
        manifest: &mut Manifest,
        store: &ManifestStore,
        stage: &mut dyn Stage,
        publish: Option<&mut dyn Publish>,
        dest_root: &str,
        args: &TransferArgs,
        upload_only: bool,
    ) -> Result<ExitStatus> {
        let mut options = self.settings.pipeline_options(dest_root);
        options.limit = args.limit();
        options.dry_run = args.dry_run;
        options.upload_only = upload_only;
        options.folder_filter = args.folder.clone();
        if let Some(folder) = &args.folder
            && !manifest.files().iter().any(|f| manifest::matches_folder(&f.relative_path, folder))
        {
            tracing::warn!("no manifest entries under folder '{}'", folder);
        }

        let pipeline = Pipeline::new(store, options, self.cancel.clone());
        let report = match publish {
            Some(publish) if !args.dry_run => pipeline.run(manifest, stage, publish),
            _ => pipeline.plan(manifest),
        };
        print_report(&report, &filtered_counts(manifest, args.folder.as_deref()));
        Ok(if report.is_success() { ExitStatus::Success } else { ExitStatus::RuntimeFailure })
    }

    fn status(&self, folder: Option<&str>) -> Result<ExitStatus> {
        let store = self.store();
        if !store.exists() {
            return Err(ConfigError::ManifestMissing(store.path().to_path_buf()).into());
        }
        let manifest = store.load();
        let counts = filtered_counts(&manifest, folder);
        let title = vec!["Status".cell().bold(true), "Files".cell().bold(true)];
        let rows: Vec<Vec<CellStruct>> = vec![
            vec!["complete".cell(), counts.complete.cell().justify(Justify::Right)],
            vec!["partial".cell(), counts.partial.cell().justify(Justify::Right)],
            vec!["not started".cell(), counts.not_started.cell().justify(Justify::Right)],
            vec!["total".cell().bold(true), counts.total().cell().justify(Justify::Right)],
        ];
        print_stdout(rows.table().title(title)).context("printing status table")?;

        let cached = cache::cached_files(&self.settings.cache_dir, &manifest);
        if !cached.is_empty() {
            let title = vec!["Cached file".cell().bold(true), "Size".cell().bold(true), "Manifest".cell().bold(true)];
            let rows: Vec<Vec<CellStruct>> = cached
                .iter()
                .map(|c| {
                    let state = if c.interrupted_download {
                        "interrupted download".to_string()
                    } else {
                        c.status.map(|s| s.to_string()).unwrap_or_else(|| "untracked".to_string())
                    };
                    vec![
                        c.relative_path.clone().cell(),
                        human_bytes(c.bytes).cell().justify(Justify::Right),
                        state.cell(),
                    ]
                })
                .collect();
            print_stdout(rows.table().title(title)).context("printing cache table")?;
        }
        Ok(ExitStatus::Success)
    }
}

fn filtered_counts(manifest: &Manifest, folder: Option<&str>) -> StatusCounts {
    let mut c = StatusCounts::default();
    for f in manifest.files() {
        if folder.is_some_and(|d| !manifest::matches_folder(&f.relative_path, d)) {
            continue;
        }
        match f.status {
            FileStatus::NotStarted => c.not_started += 1,
            FileStatus::Partial => c.partial += 1,
            FileStatus::Complete => c.complete += 1,
        }
    }
    c
}

fn print_report(report: &RunReport, counts: &StatusCounts) {
    let colored = try_enable_ansi_on_windows();
    if !report.planned.is_empty() {
        println!("Planned:");
        for line in &report.planned {
            println!("  {}", line);
        }
    }
    for rel in &report.missing {
        println!("  not in cache: {}", rel);
    }

    let title = vec!["This run".cell().bold(true), "Files".cell().bold(true)];
    let rows: Vec<Vec<CellStruct>> = vec![
        vec!["succeeded".cell(), report.succeeded.cell().justify(Justify::Right)],
        vec!["skipped (complete)".cell(), report.skipped.cell().justify(Justify::Right)],
        vec!["skipped (not in cache)".cell(), report.missing.len().cell().justify(Justify::Right)],
        vec!["failed".cell(), usize::from(report.halted.is_some()).cell().justify(Justify::Right)],
        vec!["remaining".cell(), (counts.not_started + counts.partial).cell().justify(Justify::Right)],
    ];
    if let Err(e) = print_stdout(rows.table().title(title)) {
        tracing::warn!("could not print summary: {}", e);
    }

    if let Some(e) = &report.halted {
        let step = e.step().map(|s| s.to_string()).unwrap_or_else(|| "interrupt".to_string());
        let line = format!("Stopped at '{}' during {}: {}", e.relative_path(), step, cause_chain(e));
        if colored {
            eprintln!("{}", line.red());
        } else {
            eprintln!("{}", line);
        }
        eprintln!("Run the same command again to resume from this file.");
    } else if colored && report.planned.is_empty() {
        println!("{}", "Done.".green());
    }
}

/// Full cause chain of a transfer error on one line.
fn cause_chain(e: &crate::error::TransferError) -> String {
    let mut parts = Vec::new();
    let mut src = std::error::Error::source(e);
    while let Some(s) = src {
        parts.push(s.to_string());
        src = s.source();
    }
    if parts.is_empty() { e.to_string() } else { parts.join(": ") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FolderNode;

    struct WriteStage;

    impl Stage for WriteStage {
        fn stage(&mut self, _entry: &FileEntry, local_path: &Path) -> Result<u64> {
            if let Some(parent) = local_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(local_path, b"video bytes")?;
            Ok(11)
        }
    }

    struct RefusingAccount;

    impl Publish for RefusingAccount {
        fn ensure_folder(&mut self, _remote_path: &str) -> Result<()> {
            Ok(())
        }
        fn upload(&mut self, _local_path: &Path, _remote_path: &str) -> Result<()> {
            anyhow::bail!("quota exceeded")
        }
    }

    #[test]
    fn config_errors_map_to_exit_1() {
        let e: anyhow::Error = ConfigError::Missing("MIRROR_SOURCE_URL").into();
        assert_eq!(exit_status_for(&e), ExitStatus::InvalidConfig);
        let wrapped = anyhow::Error::from(ConfigError::InvalidDestination("x".into())).context("run");
        assert_eq!(exit_status_for(&wrapped), ExitStatus::InvalidConfig);
        assert_eq!(exit_status_for(&anyhow::anyhow!("network")), ExitStatus::RuntimeFailure);
    }

    #[test]
    fn counts_respect_folder_filter() {
        let mut m = Manifest::new();
        m.add_folder(FolderNode { name: "A".into(), path: "A".into(), remote_ref: None });
        for (p, s) in [("A/1.mp4", FileStatus::Complete), ("A/2.mp4", FileStatus::Partial), ("B/1.mp4", FileStatus::NotStarted)] {
            m.add_file(FileEntry {
                name: crate::naming::base_name(p).into(),
                relative_path: p.into(),
                download_ref: None,
                order: 0,
                status: s,
            });
        }
        let c = filtered_counts(&m, Some("A"));
        assert_eq!((c.complete, c.partial, c.not_started), (1, 1, 0));
        assert_eq!(filtered_counts(&m, None).total(), 3);
    }

    #[test]
    fn dry_run_destination_needs_no_host() {
        let app = App::new(Settings::default(), Locations::default(), CancellationToken::new());
        let d = app.destination(&Locations::default(), true).unwrap();
        assert_eq!(d.root, "/");
        assert!(d.target.is_none());
        assert!(matches!(
            app.destination(&Locations::default(), false),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn failed_publish_exits_with_runtime_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            cache_dir: dir.path().join("videos"),
            manifest_path: dir.path().join("tree.md"),
            min_staged_bytes: 1,
            retries: 0,
            ..Settings::default()
        };
        let app = App::new(settings, Locations::default(), CancellationToken::new());
        let store = app.store();
        let mut m = Manifest::new();
        m.add_file(FileEntry {
            name: "1.mp4".into(),
            relative_path: "Отец/1.mp4".into(),
            download_ref: None,
            order: 0,
            status: FileStatus::NotStarted,
        });
        store.save(&m).unwrap();

        let status = app
            .transfer_with(
                &mut m,
                &store,
                &mut WriteStage,
                Some(&mut RefusingAccount),
                "/Videos",
                &TransferArgs::default(),
                false,
            )
            .unwrap();
        assert_eq!(status, ExitStatus::RuntimeFailure);
        assert_eq!(m.status_of("Отец/1.mp4"), Some(FileStatus::Partial));
        assert_eq!(store.load().status_of("Отец/1.mp4"), Some(FileStatus::Partial));
    }
}
