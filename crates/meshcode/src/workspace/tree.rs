//! File tree construction from container listings.

use serde::{Deserialize, Serialize};

use super::paths::{EntryName, RelativePath, strip_control_chars};

/// Whether a node is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Folder => write!(f, "folder"),
        }
    }
}

/// A node of the project file tree as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileSystemNode {
    File {
        path: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Folder {
        path: String,
        name: String,
        children: Vec<FileSystemNode>,
    },
}

impl FileSystemNode {
    fn new(kind: NodeKind, path: String, name: &str) -> Self {
        match kind {
            NodeKind::File => FileSystemNode::File {
                path,
                name: name.to_string(),
                content: None,
            },
            NodeKind::Folder => FileSystemNode::Folder {
                path,
                name: name.to_string(),
                children: Vec::new(),
            },
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FileSystemNode::File { path, .. } | FileSystemNode::Folder { path, .. } => path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FileSystemNode::File { name, .. } | FileSystemNode::Folder { name, .. } => name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            FileSystemNode::File { .. } => NodeKind::File,
            FileSystemNode::Folder { .. } => NodeKind::Folder,
        }
    }

    pub fn children(&self) -> &[FileSystemNode] {
        match self {
            FileSystemNode::File { .. } => &[],
            FileSystemNode::Folder { children, .. } => children,
        }
    }

    fn set_path(&mut self, new_path: String) {
        match self {
            FileSystemNode::File { path, .. } | FileSystemNode::Folder { path, .. } => {
                *path = new_path
            }
        }
    }

    /// Turn a file node into an empty folder, keeping path and name.
    fn promote_to_folder(&mut self) {
        if let FileSystemNode::File { path, name, .. } = self {
            *self = FileSystemNode::Folder {
                path: std::mem::take(path),
                name: std::mem::take(name),
                children: Vec::new(),
            };
        }
    }
}

/// How the listing command marks entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    /// Directories carry a trailing `/`; everything else is a file.
    Typed,
    /// Plain paths; a final segment without `.` is taken to be a folder.
    Untyped,
}

/// One classified line of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub path: RelativePath,
    pub kind: NodeKind,
}

/// Classify a final path segment.
///
/// An entry flagged as a directory is a folder. Without type information a
/// name lacking a `.` is taken to be a folder.
pub fn classify(name: &str, flagged_dir: bool, format: ListingFormat) -> NodeKind {
    if flagged_dir {
        return NodeKind::Folder;
    }
    match format {
        ListingFormat::Typed => NodeKind::File,
        ListingFormat::Untyped if !name.contains('.') => NodeKind::Folder,
        ListingFormat::Untyped => NodeKind::File,
    }
}

/// Parse the raw output of the listing command into classified entries.
///
/// Lines outside `root`, the root itself and lines that fail sanitization are
/// skipped.
pub fn parse_listing(output: &str, root: &str, format: ListingFormat) -> Vec<ListingEntry> {
    let root = root.trim_end_matches('/');
    let mut entries = Vec::new();

    for raw in output.lines() {
        let line = strip_control_chars(raw);
        let flagged = line.ends_with('/');
        let line = line.trim_end_matches('/');

        let Some(rest) = line.strip_prefix(root) else {
            continue;
        };
        if !rest.starts_with('/') {
            continue;
        }

        let Ok(path) = RelativePath::parse(rest) else {
            continue;
        };
        let Some(name) = path.file_name() else {
            continue;
        };

        let kind = classify(name, flagged, format);
        entries.push(ListingEntry { path, kind });
    }

    entries
}

/// Build a nested tree from classified entries.
///
/// Intermediate folders are created on demand, leaves attach at their final
/// segment and siblings keep the order in which they were first seen.
pub fn build_file_tree(entries: &[ListingEntry]) -> Vec<FileSystemNode> {
    let mut roots = Vec::new();
    for entry in entries {
        let segments: Vec<&str> = entry.path.segments().collect();
        if segments.is_empty() {
            continue;
        }
        insert(&mut roots, &segments, "", entry.kind);
    }
    roots
}

fn insert(nodes: &mut Vec<FileSystemNode>, segments: &[&str], prefix: &str, kind: NodeKind) {
    let name = segments[0];
    let path = format!("{}/{}", prefix, name);
    let is_leaf = segments.len() == 1;

    let index = match nodes.iter().position(|n| n.name() == name) {
        Some(index) => index,
        None => {
            let node_kind = if is_leaf { kind } else { NodeKind::Folder };
            nodes.push(FileSystemNode::new(node_kind, path.clone(), name));
            nodes.len() - 1
        }
    };

    let node = &mut nodes[index];
    if is_leaf {
        if kind == NodeKind::Folder {
            node.promote_to_folder();
        }
        return;
    }

    // Something with children is a folder whatever the heuristic said.
    node.promote_to_folder();
    if let FileSystemNode::Folder { children, .. } = node {
        insert(children, &segments[1..], &path, kind);
    }
}

fn find_mut<'a>(
    nodes: &'a mut [FileSystemNode],
    segments: &[&str],
) -> Option<&'a mut FileSystemNode> {
    let (first, rest) = segments.split_first()?;
    let node = nodes.iter_mut().find(|n| n.name() == *first)?;
    if rest.is_empty() {
        return Some(node);
    }
    match node {
        FileSystemNode::Folder { children, .. } => find_mut(children, rest),
        FileSystemNode::File { .. } => None,
    }
}

/// Rename the node at `path` in place.
///
/// The node keeps its position among its siblings; for folders every
/// descendant path is rewritten under the new prefix. Returns the new path.
pub fn rename_subtree(
    nodes: &mut [FileSystemNode],
    path: &RelativePath,
    new_name: &EntryName,
) -> Option<RelativePath> {
    let new_path = path.with_file_name(new_name)?;
    let segments: Vec<&str> = path.segments().collect();
    let node = find_mut(nodes, &segments)?;

    match node {
        FileSystemNode::File { name, .. } | FileSystemNode::Folder { name, .. } => {
            *name = new_name.as_str().to_string();
        }
    }
    rebase_node(node, path, &new_path);
    Some(new_path)
}

fn rebase_node(node: &mut FileSystemNode, from: &RelativePath, to: &RelativePath) {
    if let Some(rebased) = RelativePath::parse(node.path())
        .ok()
        .and_then(|p| p.rebase(from, to))
    {
        node.set_path(rebased.to_string());
    }
    if let FileSystemNode::Folder { children, .. } = node {
        for child in children.iter_mut() {
            rebase_node(child, from, to);
        }
    }
}
