//! The remote listing as seen through a browser-like session.
//!
//! [`RemoteBrowser`] is the only way discovery and staging touch the remote
//! share. A session is owned by one caller at a time and lent out by
//! `&mut`; nothing here is shared between threads.

mod http;
mod lookup;

pub use http::{DEFAULT_CHALLENGE_PATTERNS, HttpListingBrowser};
pub use lookup::PathLookup;

use crate::naming::KindHint;

/// Opaque locator of a remote folder or file (for the HTTP browser, an
/// absolute URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteRef(String);

impl RemoteRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry as rendered by the listing, captured before classification.
/// `remote_ref` is whatever could be read directly; it may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleEntry {
    pub name: String,
    pub kind_hint: KindHint,
    pub remote_ref: Option<RemoteRef>,
}

impl VisibleEntry {
    pub fn new(name: impl Into<String>, kind_hint: KindHint, remote_ref: Option<RemoteRef>) -> Self {
        Self { name: name.into(), kind_hint, remote_ref }
    }
}

pub trait RemoteBrowser {
    /// Open `location`. Challenge handling is the caller's job.
    fn navigate(&mut self, location: &RemoteRef) -> anyhow::Result<()>;

    /// Entries rendered at the current location, in listing order.
    fn list_visible_entries(&mut self) -> anyhow::Result<Vec<VisibleEntry>>;

    /// Whether the current page shows an anti-automation challenge.
    fn detect_challenge_signals(&mut self) -> anyhow::Result<bool>;

    fn current_location(&self) -> Option<RemoteRef>;

    /// Best-effort capture of an entry's reference by interacting with it
    /// (e.g. clicking). May leave the session elsewhere; callers restore.
    fn capture_by_interaction(&mut self, _entry: &VisibleEntry) -> anyhow::Result<Option<RemoteRef>> {
        Ok(None)
    }
}

pub trait StreamResolver {
    /// Turn a file reference into something the stager can fetch directly.
    fn resolve_download_locator(&mut self, file_ref: &RemoteRef) -> anyhow::Result<RemoteRef>;
}
