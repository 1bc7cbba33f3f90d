use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use indicatif::ProgressBar;
use reqwest::blocking::Client;
use tokio_util::sync::CancellationToken;

use super::Stage;
use crate::challenge::ChallengeHandler;
use crate::manifest::FileEntry;
use crate::remote::{PathLookup, RemoteBrowser, RemoteRef, StreamResolver};
use crate::util::{atomic_rename_with_retries, file_progress, human_bytes, retry_operation};

const COPY_BUF: usize = 256 * 1024;

/// Copy `reader` into `<local_path>.part.<pid>` and rename it over
/// `local_path` once complete and synced. The partial file is removed on
/// any failure, including cancellation, so `local_path` only ever holds a
/// whole download.
pub fn copy_to_staged<R: Read>(
    mut reader: R,
    local_path: &Path,
    pb: &ProgressBar,
    cancel: &CancellationToken,
) -> std::io::Result<u64> {
    let name = local_path.file_name().and_then(|s| s.to_str()).unwrap_or("staged");
    let tmp = local_path.with_file_name(format!("{}.part.{}", name, std::process::id()));
    let result = (|| {
        let mut f = File::create(&tmp)?;
        let mut buf = vec![0u8; COPY_BUF];
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "cancelled"));
            }
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            f.write_all(&buf[..n])?;
            written += n as u64;
            pb.inc(n as u64);
        }
        f.sync_all()?;
        drop(f);
        atomic_rename_with_retries(&tmp, local_path)?;
        Ok(written)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Downloads a direct media locator over HTTP.
pub struct HttpStager {
    client: Client,
    cancel: CancellationToken,
    retries: usize,
}

impl HttpStager {
    pub fn new(client: Client, cancel: CancellationToken, retries: usize) -> Self {
        Self { client, cancel, retries }
    }

    pub fn fetch(&self, locator: &RemoteRef, local_path: &Path) -> Result<u64> {
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cache folder {}", parent.display()))?;
        }
        retry_operation(self.retries, "download", || {
            if self.cancel.is_cancelled() {
                bail!("interrupted");
            }
            self.fetch_once(locator, local_path)
        })
    }

    fn fetch_once(&self, locator: &RemoteRef, local_path: &Path) -> Result<u64> {
        let resp = self
            .client
            .get(locator.as_str())
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("GET {}", locator))?;
        let expected = resp.content_length();
        let label = local_path.file_name().and_then(|s| s.to_str()).unwrap_or("download");
        let pb = file_progress(label, expected)?;
        let written = copy_to_staged(resp, local_path, &pb, &self.cancel)
            .with_context(|| format!("writing {}", local_path.display()))?;
        pb.finish_and_clear();
        if let Some(n) = expected
            && n != written
        {
            let _ = std::fs::remove_file(local_path);
            bail!("truncated download: got {} of {} bytes", written, n);
        }
        tracing::info!("downloaded {} ({})", label, human_bytes(written));
        Ok(written)
    }
}

/// Stage collaborator driving the shared browser session: resolves the
/// file's playable locator and downloads it. Entries without a recorded
/// reference (replayed from a manifest) are located by path first.
pub struct BrowserStage<'a, B: RemoteBrowser + StreamResolver> {
    browser: &'a mut B,
    challenge: &'a mut ChallengeHandler,
    lookup: Option<PathLookup>,
    fetcher: HttpStager,
}

impl<'a, B: RemoteBrowser + StreamResolver> BrowserStage<'a, B> {
    pub fn new(
        browser: &'a mut B,
        challenge: &'a mut ChallengeHandler,
        lookup: Option<PathLookup>,
        fetcher: HttpStager,
    ) -> Self {
        Self { browser, challenge, lookup, fetcher }
    }
}

impl<B: RemoteBrowser + StreamResolver> Stage for BrowserStage<'_, B> {
    fn stage(&mut self, entry: &FileEntry, local_path: &Path) -> Result<u64> {
        let file_ref = match &entry.download_ref {
            Some(r) => r.clone(),
            None => {
                let lookup = self
                    .lookup
                    .as_mut()
                    .context("no remote reference recorded for this file")?;
                lookup
                    .locate(&mut *self.browser, self.challenge, &entry.relative_path)?
                    .with_context(|| format!("'{}' is no longer listed remotely", entry.relative_path))?
            }
        };
        let locator = self
            .browser
            .resolve_download_locator(&file_ref)
            .with_context(|| format!("resolving media for {}", file_ref))?;
        tracing::debug!("'{}' -> {}", entry.relative_path, locator);
        self.fetcher.fetch(&locator, local_path)
    }
}
