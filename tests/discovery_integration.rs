use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use sharemirror::challenge::{ChallengeHandler, Operator};
use sharemirror::discovery::TreeDiscoverer;
use sharemirror::error::ChallengeError;
use sharemirror::manifest::{FileStatus, Manifest, ManifestStore, merge};
use sharemirror::naming::KindHint;
use sharemirror::remote::{RemoteBrowser, RemoteRef, VisibleEntry};

struct AlwaysReady;

impl Operator for AlwaysReady {
    fn wait_for_operator(&mut self, _message: &str) -> Result<(), ChallengeError> {
        Ok(())
    }
}

#[derive(Default)]
struct StaticSite {
    pages: HashMap<&'static str, Vec<VisibleEntry>>,
    current: Option<RemoteRef>,
}

impl RemoteBrowser for StaticSite {
    fn navigate(&mut self, location: &RemoteRef) -> anyhow::Result<()> {
        self.current = Some(location.clone());
        Ok(())
    }

    fn list_visible_entries(&mut self) -> anyhow::Result<Vec<VisibleEntry>> {
        let loc = self.current.as_ref().map(|r| r.as_str()).unwrap_or_default();
        Ok(self.pages.get(loc).cloned().unwrap_or_default())
    }

    fn detect_challenge_signals(&mut self) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn current_location(&self) -> Option<RemoteRef> {
        self.current.clone()
    }
}

fn folder(name: &str, href: &str) -> VisibleEntry {
    VisibleEntry::new(name, KindHint::Folder, Some(RemoteRef::new(href)))
}

fn video(name: &str, href: &str) -> VisibleEntry {
    VisibleEntry::new(name, KindHint::File, Some(RemoteRef::new(href)))
}

fn discover(site: &mut StaticSite) -> Manifest {
    let mut challenge = ChallengeHandler::new(Box::new(AlwaysReady), 5);
    TreeDiscoverer::new(site, &mut challenge, Vec::new())
        .discover(&RemoteRef::new("root"))
        .unwrap()
        .into_manifest()
}

fn site(folder_order: &[&'static str]) -> StaticSite {
    let mut s = StaticSite::default();
    let root = folder_order
        .iter()
        .map(|name| match *name {
            "Отец" => folder("Отец 12.05.2022", "otec"),
            _ => folder("Мама", "mama"),
        })
        .collect();
    s.pages.insert("root", root);
    s.pages.insert("otec", vec![video("1.mp4", "v/1"), video("2.mp4", "v/2")]);
    s.pages.insert("mama", vec![video("3.mp4", "v/3")]);
    s
}

#[test]
fn rediscovery_keeps_recorded_progress() {
    let dir = tempfile::tempdir().unwrap();
    let store = ManifestStore::new(dir.path().join("tree.md"));

    let first = merge(&store.load(), &discover(&mut site(&["Отец", "Мама"])));
    store.save(&first).unwrap();
    assert_eq!(first.files().len(), 3);
    assert_eq!(first.counts().not_started, 3);

    let mut m = store.load();
    store.advance(&mut m, "Отец/1.mp4", FileStatus::Complete).unwrap();
    store.advance(&mut m, "Мама/3.mp4", FileStatus::Partial).unwrap();

    // The listing now renders the folders in the other order.
    let second = merge(&store.load(), &discover(&mut site(&["Мама", "Отец"])));
    store.save(&second).unwrap();

    let reloaded = store.load();
    assert_eq!(reloaded.files().len(), 3);
    assert_eq!(reloaded.status_of("Отец/1.mp4"), Some(FileStatus::Complete));
    assert_eq!(reloaded.status_of("Мама/3.mp4"), Some(FileStatus::Partial));
    assert_eq!(reloaded.status_of("Отец/2.mp4"), Some(FileStatus::NotStarted));
}

#[test]
fn entries_missing_from_a_new_listing_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = ManifestStore::new(dir.path().join("tree.md"));
    let first = discover(&mut site(&["Отец", "Мама"]));
    store.save(&first).unwrap();

    let mut shrunk = site(&["Отец"]);
    shrunk.pages.insert("otec", vec![video("2.mp4", "v/2")]);
    let merged = merge(&store.load(), &discover(&mut shrunk));

    assert_eq!(merged.files().len(), 3);
    assert!(merged.has_folder("Мама"));
    assert!(merged.file("Отец/1.mp4").is_some());
}

/// Operator who solves the challenge shown in the browser window.
struct Solver {
    blocked: Rc<Cell<bool>>,
}

impl Operator for Solver {
    fn wait_for_operator(&mut self, _message: &str) -> Result<(), ChallengeError> {
        self.blocked.set(false);
        Ok(())
    }
}

/// Opening `guarded` the first time redirects to a challenge page; reloading
/// that page keeps the session on it.
struct GuardedSite {
    pages: HashMap<&'static str, Vec<VisibleEntry>>,
    current: Option<RemoteRef>,
    guarded: Option<&'static str>,
    blocked: Rc<Cell<bool>>,
}

impl RemoteBrowser for GuardedSite {
    fn navigate(&mut self, location: &RemoteRef) -> anyhow::Result<()> {
        if self.guarded == Some(location.as_str()) {
            self.guarded = None;
            self.blocked.set(true);
            self.current = Some(RemoteRef::new(format!("captcha?ret={}", location)));
        } else {
            self.current = Some(location.clone());
        }
        Ok(())
    }

    fn list_visible_entries(&mut self) -> anyhow::Result<Vec<VisibleEntry>> {
        let loc = self.current.as_ref().map(|r| r.as_str()).unwrap_or_default();
        Ok(self.pages.get(loc).cloned().unwrap_or_default())
    }

    fn detect_challenge_signals(&mut self) -> anyhow::Result<bool> {
        Ok(self.blocked.get())
    }

    fn current_location(&self) -> Option<RemoteRef> {
        self.current.clone()
    }
}

#[test]
fn challenge_redirect_mid_discovery_lists_the_intended_folder() {
    let blocked = Rc::new(Cell::new(false));
    let mut pages = HashMap::new();
    pages.insert("root", vec![folder("Папка", "a")]);
    pages.insert("a", vec![folder("Sub", "sub")]);
    pages.insert("sub", vec![video("v.mp4", "v/1")]);
    let mut site = GuardedSite { pages, current: None, guarded: Some("a"), blocked: blocked.clone() };

    let mut challenge = ChallengeHandler::new(Box::new(Solver { blocked }), 5);
    let found = TreeDiscoverer::new(&mut site, &mut challenge, Vec::new())
        .discover(&RemoteRef::new("root"))
        .unwrap();

    let folders: Vec<&str> = found.folders.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(folders, vec!["Папка", "Папка/Sub"]);
    let files: Vec<&str> = found.files.iter().map(|f| f.relative_path.as_str()).collect();
    assert_eq!(files, vec!["Папка/Sub/v.mp4"]);
    assert_eq!(found.skipped_branches, 0);
    assert_eq!(challenge.prompts(), 1);
}
