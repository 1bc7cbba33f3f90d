//! Per-file transfer: stage into the local cache, publish to the storage
//! account, reclaim the local copy. The manifest is advanced after each
//! step, so an interrupted run resumes exactly where it stopped.

#[cfg(test)]
pub(crate) mod mock_io;
mod pipeline;
mod publish;
mod session;
pub mod sftp_like;
mod stage;

use std::path::Path;

use crate::manifest::FileEntry;

pub use pipeline::{DEFAULT_MIN_STAGED_BYTES, Pipeline, PipelineOptions, RunReport};
pub use publish::{PublishTarget, SftpPublisher};
pub use stage::{BrowserStage, HttpStager, copy_to_staged};

/// Produces the staged local copy of one file.
pub trait Stage {
    /// Write the file behind `entry` to `local_path`, replacing anything
    /// there. Returns the number of bytes written.
    fn stage(&mut self, entry: &FileEntry, local_path: &Path) -> anyhow::Result<u64>;
}

/// The storage account side.
pub trait Publish {
    /// Create `remote_path` if absent. An existing folder is success.
    fn ensure_folder(&mut self, remote_path: &str) -> anyhow::Result<()>;

    /// Upload `local_path` to `remote_path`, replacing an existing file.
    fn upload(&mut self, local_path: &Path, remote_path: &str) -> anyhow::Result<()>;
}
