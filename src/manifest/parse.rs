use std::collections::BTreeMap;

use super::model::FileStatus;
use super::render::{BRANCH, FENCE, FILES_HEADING, LAST_BRANCH, NO_FILES};

/// What a manifest document says, before it becomes a [`super::Manifest`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedManifest {
    /// Folder keys from the tree view, in document order.
    pub folders: Vec<String>,
    /// Status per key from the flat section (authoritative).
    pub flat: BTreeMap<String, FileStatus>,
    /// Status per key reconstructed from the tree view.
    pub tree: BTreeMap<String, FileStatus>,
    /// Keys whose tree marker disagrees with the flat marker.
    pub disagreements: Vec<String>,
    /// Whether any known section was found at all.
    pub recognized: bool,
}

impl ParsedManifest {
    /// Merged status map: flat wins, tree fills the gaps.
    pub fn statuses(&self) -> BTreeMap<String, FileStatus> {
        let mut out = self.tree.clone();
        for (k, v) in &self.flat {
            out.insert(k.clone(), *v);
        }
        out
    }
}

/// `- [x] `path`` (the backticks are optional, as older files omitted them).
fn parse_flat_line(line: &str) -> Option<(String, FileStatus)> {
    let rest = line.trim_start().strip_prefix("- [")?;
    let mut chars = rest.chars();
    let marker = chars.next()?;
    let status = FileStatus::from_marker(marker)?;
    let rest = chars.as_str().strip_prefix(']')?;
    let path = rest.trim().trim_matches('`').trim().trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    Some((path.to_string(), status))
}

/// Split a tree line into depth, name and optional file status. Folder names
/// keep their trailing `/`.
fn parse_tree_line(line: &str) -> Option<(usize, String, Option<FileStatus>)> {
    let (prefix, rest) = if let Some(pos) = line.find(BRANCH) {
        (&line[..pos], &line[pos + BRANCH.len()..])
    } else if let Some(pos) = line.find(LAST_BRANCH) {
        (&line[..pos], &line[pos + LAST_BRANCH.len()..])
    } else {
        return None;
    };
    // Every indent unit ("│   " or "    ") is four characters wide.
    let depth = prefix.chars().count() / 4;
    let rest = rest.trim_end();
    for (suffix, status) in [
        (" ✓", FileStatus::Complete),
        (" [x]", FileStatus::Complete),
        (" [X]", FileStatus::Complete),
        (" [p]", FileStatus::Partial),
        (" [P]", FileStatus::Partial),
        (" [ ]", FileStatus::NotStarted),
    ] {
        if let Some(name) = rest.strip_suffix(suffix) {
            return Some((depth, name.trim().to_string(), Some(status)));
        }
    }
    Some((depth, rest.trim().to_string(), None))
}

/// Parse a manifest document. Never fails: unrecognized lines are ignored
/// and `recognized` tells the caller whether anything useful was found.
pub fn parse(content: &str) -> ParsedManifest {
    let mut parsed = ParsedManifest::default();
    let mut in_fence = false;
    let mut fence_seen = false;
    let mut in_files = false;
    let mut stack: Vec<String> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed == FENCE {
            if !fence_seen || in_fence {
                in_fence = !in_fence;
                fence_seen = true;
                parsed.recognized = true;
                continue;
            }
        }
        if in_fence {
            let Some((depth, name, status)) = parse_tree_line(line) else {
                continue;
            };
            stack.truncate(depth);
            match (name.strip_suffix('/'), status) {
                (Some(folder), None) => {
                    stack.push(folder.to_string());
                    parsed.folders.push(stack.join("/"));
                }
                (_, status) => {
                    let key = if stack.is_empty() {
                        name.clone()
                    } else {
                        format!("{}/{}", stack.join("/"), name)
                    };
                    // An unmarked leaf is a file with no progress yet.
                    parsed.tree.insert(key, status.unwrap_or(FileStatus::NotStarted));
                }
            }
            continue;
        }
        if trimmed.starts_with("## ") {
            in_files = trimmed == FILES_HEADING;
            if in_files {
                parsed.recognized = true;
            }
            continue;
        }
        if trimmed.starts_with("# ") {
            in_files = false;
            continue;
        }
        if in_files {
            if trimmed == NO_FILES {
                continue;
            }
            if let Some((path, status)) = parse_flat_line(line) {
                parsed.flat.insert(path, status);
            }
        }
    }

    for (key, flat_status) in &parsed.flat {
        if let Some(tree_status) = parsed.tree.get(key)
            && tree_status != flat_status
        {
            parsed.disagreements.push(key.clone());
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::manifest::model::{FileEntry, FolderNode, Manifest};
    use crate::manifest::render::render;

    #[test]
    fn flat_lines_accept_every_marker() {
        assert_eq!(
            parse_flat_line("- [p] `Отец/clip1.mp4`"),
            Some(("Отец/clip1.mp4".to_string(), FileStatus::Partial))
        );
        assert_eq!(
            parse_flat_line("- [X] `/a.mp4`"),
            Some(("a.mp4".to_string(), FileStatus::Complete))
        );
        assert_eq!(
            parse_flat_line("- [ ] b.mp4"),
            Some(("b.mp4".to_string(), FileStatus::NotStarted))
        );
        assert_eq!(parse_flat_line("- [?] `c.mp4`"), None);
        assert_eq!(parse_flat_line("- ✓ или [x] = файл"), None);
    }

    #[test]
    fn legend_lines_are_not_files() {
        let doc = "## Статус загрузки\n\n- [p] = файл загружен частично\n- [ ] = файл не загружен\n";
        assert!(parse(doc).flat.is_empty());
    }

    #[test]
    fn round_trips_a_rendered_manifest() {
        let mut m = Manifest::new();
        m.add_folder(FolderNode { name: "Пустая".into(), path: "Пустая".into(), remote_ref: None });
        for (p, s) in [
            ("Отец/clip1.mp4", FileStatus::Partial),
            ("Отец/Глава 2/clip2.mp4", FileStatus::Complete),
            ("root.mp4", FileStatus::NotStarted),
        ] {
            m.add_file(FileEntry {
                name: crate::naming::base_name(p).to_string(),
                relative_path: p.to_string(),
                download_ref: None,
                order: 0,
                status: s,
            });
        }
        let parsed = parse(&render(&m));
        assert!(parsed.recognized);
        assert!(parsed.disagreements.is_empty());
        assert_eq!(parsed.flat, parsed.tree);
        assert_eq!(parsed.flat.get("Отец/Глава 2/clip2.mp4"), Some(&FileStatus::Complete));
        assert_eq!(parsed.flat.get("Отец/clip1.mp4"), Some(&FileStatus::Partial));
        assert!(parsed.folders.contains(&"Пустая".to_string()));
        assert!(parsed.folders.contains(&"Отец/Глава 2".to_string()));
    }

    #[test]
    fn tree_view_alone_is_enough() {
        let doc = "# Структура папок и файлов\n\n```\n└── Отец/\n    ├── a.mp4 [x]\n    └── b.mp4 [p]\n```\n";
        let parsed = parse(doc);
        let statuses = parsed.statuses();
        assert_eq!(statuses.get("Отец/a.mp4"), Some(&FileStatus::Complete));
        assert_eq!(statuses.get("Отец/b.mp4"), Some(&FileStatus::Partial));
    }

    #[test]
    fn flat_view_wins_on_disagreement() {
        let doc = "```\n└── a.mp4 [ ]\n```\n\n## Файлы\n\n- [x] `a.mp4`\n";
        let parsed = parse(doc);
        assert_eq!(parsed.disagreements, vec!["a.mp4".to_string()]);
        assert_eq!(parsed.statuses().get("a.mp4"), Some(&FileStatus::Complete));
    }

    #[test]
    fn garbage_is_not_recognized() {
        assert!(!parse("hello\nworld\n").recognized);
    }

    fn any_status() -> impl Strategy<Value = FileStatus> {
        prop_oneof![
            Just(FileStatus::NotStarted),
            Just(FileStatus::Partial),
            Just(FileStatus::Complete),
        ]
    }

    fn any_key() -> impl Strategy<Value = String> {
        (
            prop::collection::vec("[a-zа-я0-9]{1,6}( [a-zа-я0-9]{1,4})?", 0..3),
            "[a-zа-я0-9]{1,8}",
        )
            .prop_map(|(folders, stem)| {
                let mut parts = folders;
                parts.push(format!("{}.mp4", stem));
                parts.join("/")
            })
    }

    proptest! {
        #[test]
        fn rendered_statuses_parse_back(
            files in prop::collection::btree_map(any_key(), any_status(), 0..12)
        ) {
            let mut m = Manifest::new();
            for (order, (key, status)) in files.iter().enumerate() {
                m.add_file(FileEntry {
                    name: crate::naming::base_name(key).to_string(),
                    relative_path: key.clone(),
                    download_ref: None,
                    order,
                    status: *status,
                });
            }
            let parsed = parse(&render(&m));
            prop_assert!(parsed.disagreements.is_empty());
            prop_assert_eq!(parsed.statuses(), files);
        }
    }
}
