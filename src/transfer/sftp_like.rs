use std::io::Write;
use std::path::Path;

/// The SFTP operations the publisher needs. Boxed so tests can swap in an
/// in-memory file system.
pub trait SftpLike: Send {
    /// `Ok(true)` for a file, `Ok(false)` for a directory, `Err` when the
    /// path cannot be stat'ed (usually: absent).
    fn stat_is_file(&self, p: &Path) -> Result<bool, String>;
    fn mkdir(&self, p: &Path, mode: i32) -> Result<(), String>;
    fn create_write(&self, p: &Path) -> Result<Box<dyn Write + Send>, String>;
    fn rename(&self, src: &Path, dst: &Path) -> Result<(), String>;
    fn unlink(&self, p: &Path) -> Result<(), String>;
}

/// Adapter that owns an `ssh2::Sftp` and implements `SftpLike` so it can be
/// boxed into a trait object.
pub struct Ssh2Adapter(pub ssh2::Sftp);

impl SftpLike for Ssh2Adapter {
    fn stat_is_file(&self, p: &Path) -> Result<bool, String> {
        match self.0.stat(p) {
            Ok(st) => Ok(st.is_file()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn mkdir(&self, p: &Path, mode: i32) -> Result<(), String> {
        self.0.mkdir(p, mode).map_err(|e| e.to_string())
    }

    fn create_write(&self, p: &Path) -> Result<Box<dyn Write + Send>, String> {
        match self.0.create(p) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) => Err(e.to_string()),
        }
    }

    fn rename(&self, src: &Path, dst: &Path) -> Result<(), String> {
        // Plain SFTPv3 rename: servers refuse to overwrite, callers unlink first.
        self.0.rename(src, dst, None).map_err(|e| e.to_string())
    }

    fn unlink(&self, p: &Path) -> Result<(), String> {
        self.0.unlink(p).map_err(|e| e.to_string())
    }
}
