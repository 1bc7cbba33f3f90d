use std::collections::BTreeMap;

use super::model::{FileStatus, Manifest};

pub(crate) const TITLE: &str = "# Структура папок и файлов";
pub(crate) const LEGEND_HEADING: &str = "## Статус загрузки";
pub(crate) const FILES_HEADING: &str = "## Файлы";
pub(crate) const NO_FILES: &str = "(Видеофайлы не найдены)";
pub(crate) const FENCE: &str = "```";

const LEGEND: [&str; 3] = [
    "- ✓ или [x] = файл полностью загружен (скачан и залит на Яндекс Диск)",
    "- [p] = файл загружен частично (скачан на компьютер, но не залит на Яндекс Диск)",
    "- [ ] = файл не загружен",
];

pub(crate) const BRANCH: &str = "├── ";
pub(crate) const LAST_BRANCH: &str = "└── ";
const PIPE_INDENT: &str = "│   ";
const BLANK_INDENT: &str = "    ";

#[derive(Debug)]
enum Node {
    Folder(BTreeMap<String, Node>),
    File(FileStatus),
}

fn insert_folder<'a>(root: &'a mut BTreeMap<String, Node>, path: &str) -> Option<&'a mut BTreeMap<String, Node>> {
    let mut current = root;
    for part in path.split('/') {
        let node = current.entry(part.to_string()).or_insert_with(|| Node::Folder(BTreeMap::new()));
        match node {
            Node::Folder(children) => current = children,
            // A file already owns this name; the folder cannot be shown.
            Node::File(_) => return None,
        }
    }
    Some(current)
}

fn build_tree(manifest: &Manifest) -> BTreeMap<String, Node> {
    let mut root = BTreeMap::new();
    for folder in manifest.folders() {
        insert_folder(&mut root, &folder.path);
    }
    for file in manifest.files() {
        let (parent, name) = match file.relative_path.rsplit_once('/') {
            Some((p, n)) => (Some(p), n),
            None => (None, file.relative_path.as_str()),
        };
        let siblings = match parent {
            Some(p) => insert_folder(&mut root, p),
            None => Some(&mut root),
        };
        if let Some(siblings) = siblings {
            siblings.entry(name.to_string()).or_insert(Node::File(file.status));
        }
    }
    root
}

fn render_nodes(nodes: &BTreeMap<String, Node>, prefix: &str, out: &mut Vec<String>) {
    let last = nodes.len().saturating_sub(1);
    for (i, (name, node)) in nodes.iter().enumerate() {
        let (connector, indent) =
            if i == last { (LAST_BRANCH, BLANK_INDENT) } else { (BRANCH, PIPE_INDENT) };
        match node {
            Node::File(status) => {
                out.push(format!("{}{}{}{}", prefix, connector, name, status.tree_marker()));
            }
            Node::Folder(children) => {
                out.push(format!("{}{}{}/", prefix, connector, name));
                render_nodes(children, &format!("{}{}", prefix, indent), out);
            }
        }
    }
}

/// Box-drawing lines of the nested view, children sorted by name.
pub fn tree_lines(manifest: &Manifest) -> Vec<String> {
    let mut out = Vec::new();
    render_nodes(&build_tree(manifest), "", &mut out);
    out
}

/// Render the whole manifest document. Tree and flat sections are both
/// derived from `manifest`, so they cannot disagree.
pub fn render(manifest: &Manifest) -> String {
    let mut s = String::new();
    s.push_str(TITLE);
    s.push_str("\n\n");
    s.push_str(FENCE);
    s.push('\n');
    for line in tree_lines(manifest) {
        s.push_str(&line);
        s.push('\n');
    }
    s.push_str(FENCE);
    s.push_str("\n\n");
    s.push_str(LEGEND_HEADING);
    s.push_str("\n\n");
    for line in LEGEND {
        s.push_str(line);
        s.push('\n');
    }
    s.push('\n');
    s.push_str(FILES_HEADING);
    s.push_str("\n\n");
    if manifest.files().is_empty() {
        s.push_str(NO_FILES);
        s.push('\n');
        return s;
    }
    let mut flat: Vec<_> = manifest.files().iter().collect();
    flat.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    for f in flat {
        s.push_str(&format!("- [{}] `{}`\n", f.status.flat_marker(), f.relative_path));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::model::{FileEntry, FolderNode};

    fn entry(path: &str, status: FileStatus) -> FileEntry {
        FileEntry {
            name: crate::naming::base_name(path).to_string(),
            relative_path: path.to_string(),
            download_ref: None,
            order: 0,
            status,
        }
    }

    #[test]
    fn renders_the_fixed_layout() {
        let mut m = Manifest::new();
        m.add_folder(FolderNode { name: "Отец".into(), path: "Отец".into(), remote_ref: None });
        m.add_folder(FolderNode { name: "Мать".into(), path: "Мать".into(), remote_ref: None });
        m.add_file(entry("Отец/clip2.mp4", FileStatus::Partial));
        m.add_file(entry("Отец/clip1.mp4", FileStatus::Complete));
        m.add_file(entry("intro.mp4", FileStatus::NotStarted));

        let expected = "\
# Структура папок и файлов

```
├── intro.mp4 [ ]
├── Мать/
└── Отец/
    ├── clip1.mp4 ✓
    └── clip2.mp4 [p]
```

## Статус загрузки

- ✓ или [x] = файл полностью загружен (скачан и залит на Яндекс Диск)
- [p] = файл загружен частично (скачан на компьютер, но не залит на Яндекс Диск)
- [ ] = файл не загружен

## Файлы

- [ ] `intro.mp4`
- [x] `Отец/clip1.mp4`
- [p] `Отец/clip2.mp4`
";
        assert_eq!(render(&m), expected);
    }

    #[test]
    fn nested_continuation_uses_pipe_indent() {
        let mut m = Manifest::new();
        m.add_file(entry("a/b/1.mp4", FileStatus::NotStarted));
        m.add_file(entry("c.mp4", FileStatus::NotStarted));
        assert_eq!(
            tree_lines(&m),
            vec!["├── a/", "│   └── b/", "│       └── 1.mp4 [ ]", "└── c.mp4 [ ]"]
        );
    }

    #[test]
    fn folders_only_manifest_has_placeholder() {
        let mut m = Manifest::new();
        m.add_folder(FolderNode { name: "a".into(), path: "a".into(), remote_ref: None });
        let s = render(&m);
        assert!(s.contains("└── a/\n```"));
        assert!(s.ends_with("## Файлы\n\n(Видеофайлы не найдены)\n"));
    }
}
