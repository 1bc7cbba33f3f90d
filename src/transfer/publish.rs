use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use super::Publish;
use super::session::connect_session;
use super::sftp_like::{SftpLike, Ssh2Adapter};
use crate::error::{ConfigError, PublishError};
use crate::util::{file_progress, retry_operation};

/// Where published files go: an SFTP account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub credential: Option<String>,
}

impl PublishTarget {
    /// `user@host[:port]` plus an optional password.
    pub fn parse(raw: &str, credential: Option<String>) -> Result<Self, ConfigError> {
        let (user, host, port) = crate::config::parse_remote_host(raw)
            .map_err(|_| ConfigError::InvalidHost(raw.to_string()))?;
        Ok(Self { user, host, port, credential: credential.filter(|c| !c.is_empty()) })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Create every missing directory of `dir_path`, tolerating ones that
/// already exist or appear concurrently.
fn ensure_remote_dir_all(sftp: &dyn SftpLike, dir_path: &Path) -> Result<(), PublishError> {
    let mut accum = PathBuf::new();
    for comp in dir_path.components() {
        match comp {
            Component::RootDir => accum.push("/"),
            Component::Normal(seg) => accum.push(seg),
            Component::Prefix(_) | Component::CurDir | Component::ParentDir => {}
        }
        let p = accum.as_path();
        if p.as_os_str().is_empty() || p == Path::new("/") {
            continue;
        }
        match sftp.stat_is_file(p) {
            Ok(true) => return Err(PublishError::ExistsAsFile(p.display().to_string())),
            Ok(false) => {}
            Err(_) => {
                if let Err(e) = sftp.mkdir(p, 0o755) {
                    // someone else may have created it in between; look again
                    match sftp.stat_is_file(p) {
                        Ok(true) => return Err(PublishError::ExistsAsFile(p.display().to_string())),
                        Ok(false) => {}
                        Err(_) => return Err(PublishError::Mkdir(p.display().to_string(), e)),
                    }
                }
            }
        }
    }
    Ok(())
}

/// Name the upload is written under before being renamed into place.
fn staging_name(final_name: &str, extension_workaround: bool) -> String {
    if extension_workaround {
        // Some accounts reject media extensions on upload but accept a rename.
        let stem = Path::new(final_name).file_stem().and_then(|s| s.to_str()).unwrap_or(final_name);
        format!("{}.txt", stem)
    } else {
        format!(".{}.part", final_name)
    }
}

fn is_fatal(e: &anyhow::Error) -> bool {
    e.downcast_ref::<PublishError>().is_some_and(|p| !p.is_retriable())
}

pub struct SftpPublisher {
    target: Option<PublishTarget>,
    io_timeout: Duration,
    retries: usize,
    extension_workaround: bool,
    cancel: CancellationToken,
    session: Option<ssh2::Session>,
    sftp: Option<Box<dyn SftpLike>>,
    known_dirs: HashSet<String>,
}

impl SftpPublisher {
    pub fn new(target: PublishTarget, io_timeout: Duration, retries: usize, cancel: CancellationToken) -> Self {
        Self {
            target: Some(target),
            io_timeout,
            retries,
            extension_workaround: false,
            cancel,
            session: None,
            sftp: None,
            known_dirs: HashSet::new(),
        }
    }

    /// Publisher over an already open SFTP handle; it cannot reconnect.
    pub fn with_sftp(sftp: Box<dyn SftpLike>, retries: usize) -> Self {
        Self {
            target: None,
            io_timeout: Duration::from_secs(60),
            retries,
            extension_workaround: false,
            cancel: CancellationToken::new(),
            session: None,
            sftp: Some(sftp),
            known_dirs: HashSet::new(),
        }
    }

    pub fn extension_workaround(mut self, on: bool) -> Self {
        self.extension_workaround = on;
        self
    }

    fn sftp(&mut self) -> Result<&dyn SftpLike> {
        if self.sftp.is_none() {
            let target = self.target.as_ref().context("SFTP connection lost and no target to reconnect to")?;
            let sess = connect_session(target, self.io_timeout)?;
            let sftp = sess.sftp().with_context(|| format!("opening SFTP on {}", target.addr()))?;
            self.session = Some(sess);
            self.sftp = Some(Box::new(Ssh2Adapter(sftp)));
        }
        self.sftp.as_deref().context("no SFTP handle")
    }

    /// Drop the connection so the next attempt starts from a fresh one.
    fn reset(&mut self) {
        if self.target.is_some() {
            self.sftp = None;
            self.session = None;
        }
    }

    fn upload_once(&mut self, local_path: &Path, remote_path: &str) -> Result<()> {
        let final_path = Path::new(remote_path);
        let final_name = final_path
            .file_name()
            .and_then(|s| s.to_str())
            .with_context(|| format!("no file name in {}", remote_path))?
            .to_string();
        let staging = final_path.with_file_name(staging_name(&final_name, self.extension_workaround));
        let cancel = self.cancel.clone();

        let mut src = File::open(local_path).with_context(|| format!("opening {}", local_path.display()))?;
        let total = src.metadata().map(|m| m.len()).ok();
        let pb = file_progress(&format!("upload {}", final_name), total)?;

        let sftp = self.sftp()?;
        let mut dst = sftp
            .create_write(&staging)
            .map_err(|e| anyhow::anyhow!("creating {}: {}", staging.display(), e))?;
        let mut buf = vec![0u8; 256 * 1024];
        loop {
            if cancel.is_cancelled() {
                drop(dst);
                let _ = sftp.unlink(&staging);
                anyhow::bail!("interrupted");
            }
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n]).with_context(|| format!("writing {}", staging.display()))?;
            pb.inc(n as u64);
        }
        dst.flush()?;
        drop(dst);
        pb.finish_and_clear();

        if let Ok(true) = sftp.stat_is_file(final_path) {
            sftp.unlink(final_path).map_err(|_| PublishError::Replace(remote_path.to_string()))?;
        }
        sftp.rename(&staging, final_path)
            .map_err(|e| anyhow::anyhow!("renaming {} to {}: {}", staging.display(), remote_path, e))?;
        tracing::info!("uploaded {}", remote_path);
        Ok(())
    }
}

impl Publish for SftpPublisher {
    fn ensure_folder(&mut self, remote_path: &str) -> Result<()> {
        if self.known_dirs.contains(remote_path) {
            return Ok(());
        }
        retry_operation(self.retries, "mkdir", || {
            let res = self.sftp().and_then(|s| Ok(ensure_remote_dir_all(s, Path::new(remote_path))?));
            match res {
                Ok(()) => Ok(Ok(())),
                Err(e) if is_fatal(&e) => Ok(Err(e)),
                Err(e) => {
                    self.reset();
                    Err(e)
                }
            }
        })??;
        self.known_dirs.insert(remote_path.to_string());
        Ok(())
    }

    fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<()> {
        retry_operation(self.retries, "upload", || match self.upload_once(local_path, remote_path) {
            Ok(()) => Ok(Ok(())),
            Err(e) if is_fatal(&e) || self.cancel.is_cancelled() => Ok(Err(e)),
            Err(e) => {
                self.reset();
                Err(e)
            }
        })?
    }
}


#[cfg(test)]
mod tests {
    use super::mem::MemSftp;
    use super::*;

    fn staged(dir: &Path, body: &[u8]) -> PathBuf {
        let p = dir.join("clip1.mp4");
        std::fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn parses_target() {
        let t = PublishTarget::parse("mirror@storage.example:2222", Some("pw".into())).unwrap();
        assert_eq!(t.addr(), "storage.example:2222");
        assert_eq!(t.user, "mirror");
        assert!(PublishTarget::parse("storage.example", None).is_err());
        assert_eq!(PublishTarget::parse("u@h", Some(String::new())).unwrap().credential, None);
    }

    #[test]
    fn ensure_folder_creates_missing_levels_once() {
        let fs = MemSftp::default();
        let mut p = SftpPublisher::with_sftp(Box::new(fs.clone()), 1);
        p.ensure_folder("/Videos/Отец/Часть 1").unwrap();
        p.ensure_folder("/Videos/Отец").unwrap();
        let tree = fs.tree.lock().unwrap();
        assert_eq!(tree.get(Path::new("/Videos/Отец/Часть 1")), Some(&None));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn ensure_folder_refuses_file_in_the_way() {
        let fs = MemSftp::default();
        fs.tree.lock().unwrap().insert(PathBuf::from("/Videos"), Some(b"x".to_vec()));
        let mut p = SftpPublisher::with_sftp(Box::new(fs), 3);
        let err = p.ensure_folder("/Videos/a").unwrap_err();
        assert!(matches!(err.downcast_ref::<PublishError>(), Some(PublishError::ExistsAsFile(_))));
    }

    #[test]
    fn upload_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let fs = MemSftp::default();
        fs.tree.lock().unwrap().insert(PathBuf::from("/V/clip1.mp4"), Some(b"old".to_vec()));
        let mut p = SftpPublisher::with_sftp(Box::new(fs.clone()), 1);
        p.upload(&staged(dir.path(), b"new bytes"), "/V/clip1.mp4").unwrap();
        let tree = fs.tree.lock().unwrap();
        assert_eq!(tree.get(Path::new("/V/clip1.mp4")), Some(&Some(b"new bytes".to_vec())));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn extension_workaround_uploads_as_txt_then_renames() {
        let dir = tempfile::tempdir().unwrap();
        let fs = MemSftp { rejected_extensions: vec!["mp4".into(), "part".into()], ..Default::default() };
        let local = staged(dir.path(), b"data");

        let mut plain = SftpPublisher::with_sftp(Box::new(fs.clone()), 1);
        assert!(plain.upload(&local, "/V/clip1.mp4").is_err());

        let mut p = SftpPublisher::with_sftp(Box::new(fs.clone()), 1).extension_workaround(true);
        p.upload(&local, "/V/clip1.mp4").unwrap();
        let tree = fs.tree.lock().unwrap();
        assert_eq!(tree.get(Path::new("/V/clip1.mp4")), Some(&Some(b"data".to_vec())));
        assert!(!tree.contains_key(Path::new("/V/clip1.txt")));
    }

    #[test]
    fn staging_names() {
        assert_eq!(staging_name("a.mp4", false), ".a.mp4.part");
        assert_eq!(staging_name("a.mp4", true), "a.txt");
    }
}
