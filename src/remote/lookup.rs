use std::collections::HashMap;

use anyhow::{Result, bail};

use super::{RemoteBrowser, RemoteRef, VisibleEntry};
use crate::challenge::{ChallengeHandler, REOPEN_ATTEMPTS};
use crate::naming::{self, EntryClass};

/// Finds a file's remote reference from its manifest key by walking the
/// remote tree one folder segment at a time. Listings are cached per folder
/// for the lifetime of the lookup, so replaying many files of one folder
/// lists it once.
pub struct PathLookup {
    ignored_folders: Vec<String>,
    folder_refs: HashMap<String, RemoteRef>,
    listings: HashMap<String, Vec<VisibleEntry>>,
}

impl PathLookup {
    pub fn new(root: RemoteRef, ignored_folders: Vec<String>) -> Self {
        let mut folder_refs = HashMap::new();
        folder_refs.insert(String::new(), root);
        Self { ignored_folders, folder_refs, listings: HashMap::new() }
    }

    fn listing(
        &mut self,
        browser: &mut dyn RemoteBrowser,
        challenge: &mut ChallengeHandler,
        folder: &str,
    ) -> Result<Option<&[VisibleEntry]>> {
        if !self.listings.contains_key(folder) {
            let Some(location) = self.folder_refs.get(folder).cloned() else { return Ok(None) };
            Self::open(browser, challenge, &location)?;
            let entries = browser.list_visible_entries()?;
            self.listings.insert(folder.to_string(), entries);
        }
        Ok(self.listings.get(folder).map(|v| v.as_slice()))
    }

    fn open(
        browser: &mut dyn RemoteBrowser,
        challenge: &mut ChallengeHandler,
        location: &RemoteRef,
    ) -> Result<()> {
        for _ in 0..REOPEN_ATTEMPTS {
            browser.navigate(location)?;
            if !challenge.clear_for(browser, location)? {
                return Ok(());
            }
        }
        bail!("session keeps leaving {} after challenges", location)
    }

    /// Reference of the folder at `path`, resolving unknown ancestors first.
    fn folder_ref(
        &mut self,
        browser: &mut dyn RemoteBrowser,
        challenge: &mut ChallengeHandler,
        path: &str,
    ) -> Result<Option<RemoteRef>> {
        if let Some(r) = self.folder_refs.get(path) {
            return Ok(Some(r.clone()));
        }
        let parent = naming::parent_key(path).unwrap_or("");
        if self.folder_ref(browser, challenge, parent)?.is_none() {
            return Ok(None);
        }
        let wanted = naming::base_name(path);
        let ignored = self.ignored_folders.clone();
        let found = self.listing(browser, challenge, parent)?.and_then(|entries| {
            entries.iter().find_map(|e| {
                let is_match = naming::classify(&e.name, e.kind_hint, &ignored) == EntryClass::Folder
                    && naming::folder_segment(&e.name) == wanted;
                if is_match { e.remote_ref.clone() } else { None }
            })
        });
        if let Some(r) = &found {
            self.folder_refs.insert(path.to_string(), r.clone());
        }
        Ok(found)
    }

    /// Reference of the file stored under `relative_path`, if it is still
    /// listed remotely.
    pub fn locate(
        &mut self,
        browser: &mut dyn RemoteBrowser,
        challenge: &mut ChallengeHandler,
        relative_path: &str,
    ) -> Result<Option<RemoteRef>> {
        let folder = naming::parent_key(relative_path).unwrap_or("");
        if self.folder_ref(browser, challenge, folder)?.is_none() {
            tracing::debug!("folder '{}' not found remotely", folder);
            return Ok(None);
        }
        let wanted = naming::base_name(relative_path);
        let ignored = self.ignored_folders.clone();
        Ok(self.listing(browser, challenge, folder)?.and_then(|entries| {
            entries.iter().find_map(|e| {
                let is_match = naming::classify(&e.name, e.kind_hint, &ignored) == EntryClass::Video
                    && naming::file_segment(&e.name) == wanted;
                if is_match { e.remote_ref.clone() } else { None }
            })
        }))
    }
}
