pub mod app;
pub mod cache;
pub mod challenge;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod remote;
pub mod shutdown;
pub mod transfer;
pub mod util;

pub use error::{ConfigError, ExitStatus, TransferError};
pub use manifest::{FileEntry, FileStatus, FolderNode, Manifest, ManifestStore};
