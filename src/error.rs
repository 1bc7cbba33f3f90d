use std::path::PathBuf;

use thiserror::Error;

use crate::manifest::FileStatus;

/// Process exit codes reported by the `sm` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    InvalidConfig = 1,
    RuntimeFailure = 2,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Missing or invalid locator, destination path, or credential. Always
/// detected before any remote I/O happens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing {0}: pass it on the command line or set it in the environment / .env")]
    Missing(&'static str),
    #[error("invalid source locator '{0}': expected an http(s) URL")]
    InvalidSource(String),
    #[error("invalid destination path '{0}': must start with '/' (e.g. /Videos/Mirror)")]
    InvalidDestination(String),
    #[error("invalid destination host '{0}': expected user@host[:port]")]
    InvalidHost(String),
    #[error("manifest not found at {0}; run `sm discover` first")]
    ManifestMissing(PathBuf),
    #[error("settings file {0} could not be read: {1}")]
    Settings(PathBuf, String),
}

/// Why a challenge wait ended without the challenge being cleared.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("interrupted while waiting for the operator")]
    Interrupted,
    #[error("operator channel closed while a challenge is still shown")]
    OperatorGone,
}

/// A subtree could not be enumerated. Recovered by skipping that branch.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("could not open folder '{path}': {source}")]
    Navigate {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("could not list folder '{path}': {source}")]
    Listing {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("could not return to '{path}' after probing an entry: {source}")]
    RestoreFailed {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
}

impl DiscoveryError {
    /// Only a challenge interruption ends the whole pass; everything else is
    /// local to one branch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiscoveryError::Challenge(_))
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("unknown manifest entry '{0}'")]
    UnknownEntry(String),
    #[error("refusing to move '{path}' backward from {from} to {to}")]
    BackwardTransition { path: String, from: FileStatus, to: FileStatus },
    #[error("manifest at {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The step of the per-file state machine that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStep {
    Stage,
    Publish,
    Record,
}

impl std::fmt::Display for TransferStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransferStep::Stage => "stage",
            TransferStep::Publish => "publish",
            TransferStep::Record => "record",
        })
    }
}

/// A stage or publish failure for one file. Fatal to the whole run: the
/// first non-complete manifest entry is where the next run resumes.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{step} failed for '{relative_path}': {source}")]
    Step {
        relative_path: String,
        step: TransferStep,
        #[source]
        source: anyhow::Error,
    },
    #[error("interrupted before finishing '{relative_path}'")]
    Interrupted { relative_path: String },
}

impl TransferError {
    pub fn stage(relative_path: &str, source: anyhow::Error) -> Self {
        TransferError::Step { relative_path: relative_path.to_string(), step: TransferStep::Stage, source }
    }

    pub fn publish(relative_path: &str, source: anyhow::Error) -> Self {
        TransferError::Step {
            relative_path: relative_path.to_string(),
            step: TransferStep::Publish,
            source,
        }
    }

    pub fn record(relative_path: &str, source: anyhow::Error) -> Self {
        TransferError::Step {
            relative_path: relative_path.to_string(),
            step: TransferStep::Record,
            source,
        }
    }

    pub fn relative_path(&self) -> &str {
        match self {
            TransferError::Step { relative_path, .. } => relative_path,
            TransferError::Interrupted { relative_path } => relative_path,
        }
    }

    pub fn step(&self) -> Option<TransferStep> {
        match self {
            TransferError::Step { step, .. } => Some(*step),
            TransferError::Interrupted { .. } => None,
        }
    }
}

/// Remote folder creation problems raised by the SFTP publisher.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("remote path exists as a file (expected a directory): {0}")]
    ExistsAsFile(String),
    #[error("failed to create remote directory {0}: {1}")]
    Mkdir(String, String),
    #[error("remote target already exists and could not be replaced: {0}")]
    Replace(String),
    #[error("could not resolve address {0}")]
    NoAddress(String),
    #[error("ssh handshake with {0} failed")]
    Handshake(String),
    #[error("authentication as {user} at {addr} failed")]
    Auth { user: String, addr: String },
}

impl PublishError {
    /// Connection-level problems are worth another attempt; layout
    /// conflicts and credentials are not.
    pub fn is_retriable(&self) -> bool {
        matches!(self, PublishError::NoAddress(_) | PublishError::Handshake(_) | PublishError::Mkdir(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_error_names_path_and_step() {
        let e = TransferError::publish("Отец/clip1.mp4", anyhow::anyhow!("503"));
        let s = e.to_string();
        assert!(s.contains("publish"));
        assert!(s.contains("Отец/clip1.mp4"));
        assert_eq!(e.step(), Some(TransferStep::Publish));
        assert_eq!(e.relative_path(), "Отец/clip1.mp4");
    }

    #[test]
    fn only_challenge_errors_end_discovery() {
        let branch = DiscoveryError::Listing { path: "a".into(), source: anyhow::anyhow!("x") };
        assert!(!branch.is_fatal());
        assert!(DiscoveryError::Challenge(ChallengeError::Interrupted).is_fatal());
    }

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::InvalidConfig.code(), 1);
        assert_eq!(ExitStatus::RuntimeFailure.code(), 2);
    }

    #[test]
    fn credential_problems_are_not_retried() {
        assert!(!PublishError::Auth { user: "u".into(), addr: "h:22".into() }.is_retriable());
        assert!(PublishError::Handshake("h:22".into()).is_retriable());
    }
}
