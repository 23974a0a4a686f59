//! Hierarchical model of the files and folders inside an archive.
//!
//! Nodes live in a flat table and are addressed by [`NodeId`]. Folders hold their children by
//! name, every node knows its parent, and a sorted path index maps full paths to nodes. Paths are
//! `/` separated, relative to the archive root and lower case.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::entry::Entry;
use crate::error::{EntryNotFoundError, Error, Result};

/// Handle of a node in an [`EntryTree`]
///
/// Handles of removed nodes are recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

const ROOT: NodeId = NodeId(0);

#[derive(Debug, Clone)]
enum NodeKind {
    Folder(IndexMap<String, NodeId>),
    File(Entry),
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    kind: NodeKind,
}

/// A direct child of a folder
#[derive(Debug, Clone, Copy)]
pub enum Child<'a> {
    /// A sub folder and its name
    Folder(&'a str),
    /// A file, its name and entry
    File(&'a str, &'a Entry),
}

impl<'a> Child<'a> {
    /// Name of the child inside its folder
    pub fn name(&self) -> &'a str {
        match self {
            Child::Folder(name) | Child::File(name, _) => name,
        }
    }
}

/// Normalize a user supplied path into the form used as tree key
///
/// Backslashes become `/`, empty and `.` segments are dropped and the result is lower-cased.
/// `..` segments and NUL characters are rejected.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(Error::InvalidPath(path.to_owned())),
            s if s.contains('\0') => return Err(Error::InvalidPath(path.to_owned())),
            s => segments.push(s.to_lowercase()),
        }
    }
    Ok(segments.join("/"))
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// The files and folders of an archive
#[derive(Debug, Clone)]
pub struct EntryTree {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    paths: BTreeMap<String, NodeId>,
    files: usize,
}

impl Default for EntryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryTree {
    /// An empty tree holding only the root folder
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            parent: None,
            kind: NodeKind::Folder(IndexMap::new()),
        };

        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            paths: BTreeMap::from([(String::new(), ROOT)]),
            files: 0,
        }
    }

    /// Number of files in the tree
    pub fn len(&self) -> usize {
        self.files
    }

    /// Whether the tree holds no files
    pub fn is_empty(&self) -> bool {
        self.files == 0
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0]
            .as_ref()
            .expect("node ids handed out by the tree always point at live nodes")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0]
            .as_mut()
            .expect("node ids handed out by the tree always point at live nodes")
    }

    fn insert_node(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn attach(&mut self, parent: NodeId, name: &str, kind: NodeKind, path: String) -> NodeId {
        let id = self.insert_node(Node {
            name: name.to_owned(),
            parent: Some(parent),
            kind,
        });
        if let NodeKind::Folder(children) = &mut self.node_mut(parent).kind {
            children.insert(name.to_owned(), id);
        }
        self.paths.insert(path, id);
        id
    }

    fn detach(&mut self, id: NodeId) {
        let node = self.node(id);
        let parent = node.parent.expect("only the root has no parent");
        let name = node.name.clone();
        if let NodeKind::Folder(children) = &mut self.node_mut(parent).kind {
            children.shift_remove(&name);
        }
    }

    /// Fails if an existing ancestor of `path` is a file
    fn check_ancestors(&self, path: &str) -> Result<()> {
        for (i, _) in path.match_indices('/') {
            let prefix = &path[..i];
            if let Some(id) = self.paths.get(prefix) {
                if matches!(self.node(*id).kind, NodeKind::File(_)) {
                    return Err(Error::PathConflict(prefix.to_owned()));
                }
            }
        }
        Ok(())
    }

    /// Creates the missing ancestors of `path` and returns its parent folder
    fn ensure_folders(&mut self, path: &str) -> NodeId {
        let (dir, _) = split_parent(path);
        if dir.is_empty() {
            return ROOT;
        }

        let mut parent = ROOT;
        let mut current = String::with_capacity(dir.len());
        for segment in dir.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);

            parent = match self.paths.get(&current) {
                Some(id) => *id,
                None => self.attach(
                    parent,
                    segment,
                    NodeKind::Folder(IndexMap::new()),
                    current.clone(),
                ),
            };
        }
        parent
    }

    /// Find the node at `path`
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let path = normalize_path(path).ok()?;
        self.paths.get(&path).copied()
    }

    /// Add a file, creating missing parent folders
    pub fn add_file(&mut self, path: &str, entry: Entry) -> Result<NodeId> {
        let path = normalize_path(path)?;
        if path.is_empty() {
            return Err(Error::InvalidPath(path));
        }
        if self.paths.contains_key(&path) {
            return Err(Error::PathConflict(path));
        }
        self.check_ancestors(&path)?;

        let parent = self.ensure_folders(&path);
        let name = split_parent(&path).1.to_owned();
        let id = self.attach(parent, &name, NodeKind::File(entry), path);
        self.files += 1;
        Ok(id)
    }

    /// Add a folder, creating missing parent folders
    ///
    /// Adding a folder that already exists is a no-op.
    pub fn add_folder(&mut self, path: &str) -> Result<NodeId> {
        let path = normalize_path(path)?;
        if let Some(id) = self.paths.get(&path) {
            return match self.node(*id).kind {
                NodeKind::Folder(_) => Ok(*id),
                NodeKind::File(_) => Err(Error::PathConflict(path)),
            };
        }
        self.check_ancestors(&path)?;

        let parent = self.ensure_folders(&path);
        let name = split_parent(&path).1.to_owned();
        Ok(self.attach(parent, &name, NodeKind::Folder(IndexMap::new()), path))
    }

    /// Remove a file or a folder with everything below it
    ///
    /// Returns the number of files removed.
    pub fn remove(&mut self, path: &str) -> Result<usize> {
        let path = normalize_path(path)?;
        if path.is_empty() {
            return Err(Error::InvalidPath(path));
        }
        let id = *self
            .paths
            .get(&path)
            .ok_or_else(|| EntryNotFoundError::Path(path.clone()))?;

        self.detach(id);

        let mut removed = 0;
        let mut pending = vec![(id, path)];
        while let Some((id, node_path)) = pending.pop() {
            let node = self.nodes[id.0]
                .take()
                .expect("node ids handed out by the tree always point at live nodes");
            self.free.push(id.0);
            self.paths.remove(&node_path);

            match node.kind {
                NodeKind::File(_) => removed += 1,
                NodeKind::Folder(children) => {
                    for (name, child) in children {
                        pending.push((child, format!("{node_path}/{name}")));
                    }
                }
            }
        }

        self.files -= removed;
        Ok(removed)
    }

    /// Move a file or folder to a new path, creating missing parent folders
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let from = normalize_path(from)?;
        let to = normalize_path(to)?;
        if from.is_empty() {
            return Err(Error::InvalidPath(from));
        }
        if to.is_empty() {
            return Err(Error::InvalidPath(to));
        }

        let id = *self
            .paths
            .get(&from)
            .ok_or_else(|| EntryNotFoundError::Path(from.clone()))?;
        if from == to {
            return Ok(());
        }
        if self.paths.contains_key(&to) {
            return Err(Error::PathConflict(to));
        }
        let prefix = format!("{from}/");
        if to.starts_with(&prefix) {
            return Err(Error::InvalidPath(to));
        }
        self.check_ancestors(&to)?;

        self.detach(id);
        let parent = self.ensure_folders(&to);
        let name = split_parent(&to).1.to_owned();
        {
            let node = self.node_mut(id);
            node.name = name.clone();
            node.parent = Some(parent);
        }
        if let NodeKind::Folder(children) = &mut self.node_mut(parent).kind {
            children.insert(name, id);
        }

        let moved: Vec<String> = self
            .paths
            .range(from.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&from))
            .filter(|key| **key == from || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = self.paths.remove(&key) {
                self.paths.insert(format!("{to}{}", &key[from.len()..]), node);
            }
        }

        Ok(())
    }

    /// The file entry behind a handle
    pub fn entry(&self, id: NodeId) -> Option<&Entry> {
        match &self.nodes.get(id.0)?.as_ref()?.kind {
            NodeKind::File(entry) => Some(entry),
            NodeKind::Folder(_) => None,
        }
    }

    /// Mutable access to the file entry behind a handle
    pub fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
        match &mut self.nodes.get_mut(id.0)?.as_mut()?.kind {
            NodeKind::File(entry) => Some(entry),
            NodeKind::Folder(_) => None,
        }
    }

    /// The file entry at `path`
    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entry(self.lookup(path)?)
    }

    /// Mutable access to the file entry at `path`
    pub fn get_mut(&mut self, path: &str) -> Option<&mut Entry> {
        let id = self.lookup(path)?;
        self.entry_mut(id)
    }

    /// Whether `path` names a folder
    pub fn is_folder(&self, path: &str) -> bool {
        self.lookup(path)
            .is_some_and(|id| matches!(self.node(id).kind, NodeKind::Folder(_)))
    }

    /// The direct children of the folder at `path`, in insertion order
    pub fn children(&self, path: &str) -> Result<Vec<Child<'_>>> {
        let path = normalize_path(path)?;
        let id = *self
            .paths
            .get(&path)
            .ok_or_else(|| EntryNotFoundError::Path(path.clone()))?;

        match &self.node(id).kind {
            NodeKind::Folder(children) => Ok(children
                .iter()
                .map(|(name, child)| match &self.node(*child).kind {
                    NodeKind::Folder(_) => Child::Folder(name),
                    NodeKind::File(entry) => Child::File(name, entry),
                })
                .collect()),
            NodeKind::File(_) => Err(EntryNotFoundError::Folder(path).into()),
        }
    }

    /// Every file with its full path, ordered by path
    pub fn files(&self) -> impl Iterator<Item = (&str, &Entry)> + '_ {
        self.paths
            .iter()
            .filter_map(|(path, id)| self.entry(*id).map(|entry| (path.as_str(), entry)))
    }

    /// Every file with its handle and full path, ordered by path
    pub fn file_ids(&self) -> impl Iterator<Item = (NodeId, &str)> + '_ {
        self.paths
            .iter()
            .filter(|(_, id)| matches!(self.node(**id).kind, NodeKind::File(_)))
            .map(|(path, id)| (*id, path.as_str()))
    }

    /// Every folder below the root, ordered by path
    pub fn folders(&self) -> impl Iterator<Item = &str> + '_ {
        self.paths
            .iter()
            .filter(|(path, id)| !path.is_empty() && matches!(self.node(**id).kind, NodeKind::Folder(_)))
            .map(|(path, _)| path.as_str())
    }
}
