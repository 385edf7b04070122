//! Directory tree namespace
//!
//! Nodes live in an arena keyed by [`NodeId`]; the root directory is always
//! `NodeId(0)`. A child points at its parent by id only, and directories keep
//! their children's ids in creation order, which is the order `read_dir`
//! reports.
//!
//! The tree is a plain value: it knows nothing about storage or locking.
//! Mutations that touch version history return what they displaced
//! ([`CopyEffect`], removed [`Node`]s) so the repository can adjust block
//! reference counts once the new tree has been persisted.

use crate::content::BlockRef;
use crate::error::{Result, StrongboxError};
use crate::types::{DirEntry, FileType, Metadata};
use crate::utils::{components_to_path, path_components};
use crate::version::{Version, VersionManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Arena index of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct NodeId(u64);

pub(crate) const ROOT: NodeId = NodeId(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum NodeKind {
    Dir { children: Vec<NodeId> },
    File { versions: VersionManager },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Node {
    fn new(name: String, parent: Option<NodeId>, kind: NodeKind) -> Self {
        let now = Utc::now();
        Self {
            name,
            parent,
            kind,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir { .. })
    }

    pub fn versions(&self) -> Option<&VersionManager> {
        match &self.kind {
            NodeKind::File { versions } => Some(versions),
            NodeKind::Dir { .. } => None,
        }
    }

    fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Dir { children } => children,
            NodeKind::File { .. } => &[],
        }
    }

    pub fn metadata(&self) -> Metadata {
        match &self.kind {
            NodeKind::Dir { .. } => Metadata {
                ftype: FileType::Dir,
                len: 0,
                curr_version: 0,
                created_at: self.created_at,
                modified_at: self.modified_at,
            },
            NodeKind::File { versions } => Metadata {
                ftype: FileType::File,
                len: versions.current().len(),
                curr_version: versions.current_num(),
                created_at: self.created_at,
                modified_at: self.modified_at,
            },
        }
    }
}

/// Block references gained and versions evicted by a copy
#[derive(Debug, Default)]
pub(crate) struct CopyEffect {
    pub retained: Vec<BlockRef>,
    pub evicted: Vec<Version>,
}

impl CopyEffect {
    fn merge(&mut self, other: CopyEffect) {
        self.retained.extend(other.retained);
        self.evicted.extend(other.evicted);
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// The namespace of one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DirTree {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl DirTree {
    /// Tree holding only the root directory
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, Node::new(String::new(), None, NodeKind::Dir { children: Vec::new() }));
        Self { nodes, next_id: 1 }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| StrongboxError::NotFound(format!("node {:?}", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| StrongboxError::NotFound(format!("node {:?}", id)))
    }

    fn child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        let node = self.nodes.get(&dir)?;
        node.children()
            .iter()
            .copied()
            .find(|id| self.nodes.get(id).is_some_and(|n| n.name == name))
    }

    /// Walk from the root along `names`
    fn walk(&self, names: &[String], path: &Path) -> Result<NodeId> {
        let mut current = ROOT;
        for name in names {
            let node = self.node(current)?;
            if !node.is_dir() {
                return Err(StrongboxError::IsFile(display(path)));
            }
            current = self
                .child(current, name)
                .ok_or_else(|| StrongboxError::NotFound(display(path)))?;
        }
        Ok(current)
    }

    /// Resolve a path to its node
    pub fn lookup(&self, path: &Path) -> Result<NodeId> {
        let names = path_components(path)?;
        self.walk(&names, path)
    }

    /// Resolve the parent directory of `path` and the final name
    ///
    /// Returns `None` for the root, which has no parent.
    fn parent_of(&self, path: &Path) -> Result<Option<(NodeId, String)>> {
        let mut names = path_components(path)?;
        let Some(name) = names.pop() else {
            return Ok(None);
        };
        let parent = self.walk(&names, path)?;
        if !self.node(parent)?.is_dir() {
            return Err(StrongboxError::IsFile(display(path)));
        }
        Ok(Some((parent, name)))
    }

    /// Absolute path of a node
    pub fn path_of(&self, id: NodeId) -> Result<PathBuf> {
        let mut names = Vec::new();
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            names.push(self.node(current)?.name.clone());
            current = parent;
        }
        names.reverse();
        Ok(components_to_path(&names))
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.lookup(path).is_ok()
    }

    pub fn is_file(&self, path: &Path) -> bool {
        self.lookup(path)
            .and_then(|id| self.node(id))
            .is_ok_and(|n| !n.is_dir())
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        self.lookup(path)
            .and_then(|id| self.node(id))
            .is_ok_and(|n| n.is_dir())
    }

    pub fn metadata(&self, path: &Path) -> Result<Metadata> {
        let id = self.lookup(path)?;
        Ok(self.node(id)?.metadata())
    }

    /// Version history of the file at `id`
    pub fn versions(&self, id: NodeId) -> Result<&VersionManager> {
        let node = self.node(id)?;
        match node.versions() {
            Some(versions) => Ok(versions),
            None => Err(StrongboxError::IsDir(display(&self.path_of(id)?))),
        }
    }

    /// Resolve a path that must be a file
    pub fn lookup_file(&self, path: &Path) -> Result<NodeId> {
        let id = self.lookup(path)?;
        if self.node(id)?.is_dir() {
            return Err(StrongboxError::IsDir(display(path)));
        }
        Ok(id)
    }

    fn insert(&mut self, parent: NodeId, name: String, kind: NodeKind) -> Result<NodeId> {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(name, Some(parent), kind));

        let parent_node = self.node_mut(parent)?;
        match &mut parent_node.kind {
            NodeKind::Dir { children } => children.push(id),
            NodeKind::File { .. } => return Err(StrongboxError::internal("parent is not a directory")),
        }
        parent_node.modified_at = Utc::now();
        Ok(id)
    }

    fn detach(&mut self, id: NodeId) -> Result<()> {
        let parent = self
            .node(id)?
            .parent
            .ok_or(StrongboxError::IsRoot)?;
        let parent_node = self.node_mut(parent)?;
        if let NodeKind::Dir { children } = &mut parent_node.kind {
            children.retain(|c| *c != id);
        }
        parent_node.modified_at = Utc::now();
        Ok(())
    }

    /// Create an empty file
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::AlreadyExists`] if a file exists at `path`
    /// - [`StrongboxError::IsDir`] if a directory exists at `path`
    /// - [`StrongboxError::NotFound`] if the parent directory is missing
    pub fn create_file(&mut self, path: &Path, limit: u8) -> Result<NodeId> {
        let Some((parent, name)) = self.parent_of(path)? else {
            return Err(StrongboxError::IsDir(display(path)));
        };
        if let Some(existing) = self.child(parent, &name) {
            return Err(if self.node(existing)?.is_dir() {
                StrongboxError::IsDir(display(path))
            } else {
                StrongboxError::AlreadyExists(display(path))
            });
        }
        let versions = VersionManager::new(limit)?;
        self.insert(parent, name, NodeKind::File { versions })
    }

    /// Create one directory whose parent exists
    pub fn create_dir(&mut self, path: &Path) -> Result<NodeId> {
        let Some((parent, name)) = self.parent_of(path)? else {
            return Err(StrongboxError::AlreadyExists(display(path)));
        };
        if self.child(parent, &name).is_some() {
            return Err(StrongboxError::AlreadyExists(display(path)));
        }
        self.insert(parent, name, NodeKind::Dir { children: Vec::new() })
    }

    /// Create a directory and every missing ancestor
    ///
    /// Existing ancestors are fine; an existing node at `path` itself is
    /// [`StrongboxError::AlreadyExists`].
    pub fn create_dir_all(&mut self, path: &Path) -> Result<NodeId> {
        let names = path_components(path)?;
        if names.is_empty() || self.exists(path) {
            return Err(StrongboxError::AlreadyExists(display(path)));
        }

        let mut current = ROOT;
        for name in names {
            if !self.node(current)?.is_dir() {
                return Err(StrongboxError::IsFile(display(path)));
            }
            current = match self.child(current, &name) {
                Some(id) => id,
                None => self.insert(current, name, NodeKind::Dir { children: Vec::new() })?,
            };
        }
        if !self.node(current)?.is_dir() {
            return Err(StrongboxError::IsFile(display(path)));
        }
        Ok(current)
    }

    /// Immediate children in creation order
    pub fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let id = self.lookup(path)?;
        let node = self.node(id)?;
        if !node.is_dir() {
            return Err(StrongboxError::IsFile(display(path)));
        }

        let base = self.path_of(id)?;
        node.children()
            .iter()
            .map(|child| {
                let child = self.node(*child)?;
                Ok(DirEntry {
                    path: base.join(&child.name),
                    name: child.name.clone(),
                    metadata: child.metadata(),
                })
            })
            .collect()
    }

    /// Commit a new version to a file
    ///
    /// # Returns
    ///
    /// The version evicted to stay within the limit, if any
    pub fn commit_version(&mut self, id: NodeId, version: Version) -> Result<Option<Version>> {
        let node = self.node_mut(id)?;
        let evicted = match &mut node.kind {
            NodeKind::File { versions } => versions.commit(version),
            NodeKind::Dir { .. } => return Err(StrongboxError::internal("commit to a directory")),
        };
        node.modified_at = Utc::now();
        Ok(evicted)
    }

    /// Remove a file node
    ///
    /// # Returns
    ///
    /// The removed node, whose versions still hold block references
    pub fn remove_file(&mut self, path: &Path) -> Result<Node> {
        let id = self.lookup_file(path)?;
        self.detach(id)?;
        self.node_remove(id)
    }

    /// Remove an empty directory
    pub fn remove_dir(&mut self, path: &Path) -> Result<()> {
        let id = self.lookup(path)?;
        if id == ROOT {
            return Err(StrongboxError::IsRoot);
        }
        let node = self.node(id)?;
        if !node.is_dir() {
            return Err(StrongboxError::IsFile(display(path)));
        }
        if !node.children().is_empty() {
            return Err(StrongboxError::NotEmpty(display(path)));
        }
        self.detach(id)?;
        self.node_remove(id)?;
        Ok(())
    }

    /// Remove a directory and everything below it
    ///
    /// # Returns
    ///
    /// Every removed file node
    pub fn remove_dir_all(&mut self, path: &Path) -> Result<Vec<Node>> {
        let id = self.lookup(path)?;
        if id == ROOT {
            return Err(StrongboxError::IsRoot);
        }
        if !self.node(id)?.is_dir() {
            return Err(StrongboxError::IsFile(display(path)));
        }
        self.detach(id)?;

        let mut files = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node_remove(current)?;
            stack.extend_from_slice(node.children());
            if !node.is_dir() {
                files.push(node);
            }
        }
        Ok(files)
    }

    fn node_remove(&mut self, id: NodeId) -> Result<Node> {
        self.nodes
            .remove(&id)
            .ok_or_else(|| StrongboxError::NotFound(format!("node {:?}", id)))
    }

    /// Ids of every node in the subtree rooted at `id`, `id` included
    fn subtree(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend_from_slice(self.node(current)?.children());
        }
        Ok(out)
    }

    /// Move a node to a new path
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::IsRoot`] if `from` is the root
    /// - [`StrongboxError::NotFound`] if `from` or the parent of `to` is missing
    /// - [`StrongboxError::AlreadyExists`] if `to` is occupied
    /// - [`StrongboxError::InvalidInput`] if `to` lies inside `from`
    pub fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        let id = self.lookup(from)?;
        if id == ROOT {
            return Err(StrongboxError::IsRoot);
        }
        let from_names = path_components(from)?;
        let to_names = path_components(to)?;
        if from_names == to_names {
            return Ok(());
        }
        if to_names.starts_with(&from_names) {
            return Err(StrongboxError::invalid_input(format!(
                "cannot move {} inside itself",
                display(from)
            )));
        }

        let Some((new_parent, new_name)) = self.parent_of(to)? else {
            return Err(StrongboxError::AlreadyExists(display(to)));
        };
        if self.child(new_parent, &new_name).is_some() {
            return Err(StrongboxError::AlreadyExists(display(to)));
        }

        self.detach(id)?;
        let parent_node = self.node_mut(new_parent)?;
        if let NodeKind::Dir { children } = &mut parent_node.kind {
            children.push(id);
        }
        parent_node.modified_at = Utc::now();

        let node = self.node_mut(id)?;
        node.name = new_name;
        node.parent = Some(new_parent);
        Ok(())
    }

    /// Copy a file's current content to `to`
    ///
    /// A new destination starts at version 1 with `limit` and shares the
    /// source's blocks. An existing destination file gets the content as its
    /// next version. Copying a path onto itself does nothing.
    pub fn copy_file(&mut self, from: &Path, to: &Path, limit: u8) -> Result<CopyEffect> {
        let src = self.lookup_file(from)?;
        if path_components(from)? == path_components(to)? {
            return Ok(CopyEffect::default());
        }

        let current = self.versions(src)?.current().clone();

        match self.lookup(to) {
            Ok(dst) => {
                if self.node(dst)?.is_dir() {
                    return Err(StrongboxError::IsDir(display(to)));
                }
                let next = Version::new(
                    self.versions(dst)?.next_num(),
                    current.len(),
                    current.blocks().to_vec(),
                );
                let evicted = self.commit_version(dst, next)?;
                Ok(CopyEffect {
                    retained: current.blocks().to_vec(),
                    evicted: evicted.into_iter().collect(),
                })
            }
            Err(StrongboxError::NotFound(_)) => {
                let Some((parent, name)) = self.parent_of(to)? else {
                    return Err(StrongboxError::IsDir(display(to)));
                };
                let versions = VersionManager::with_initial(limit, current.len(), current.blocks().to_vec())?;
                self.insert(parent, name, NodeKind::File { versions })?;
                Ok(CopyEffect {
                    retained: current.blocks().to_vec(),
                    evicted: Vec::new(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Recursively copy a directory's content into `to`
    ///
    /// `to` is created if missing; its parent must exist. New files get
    /// `limit`.
    pub fn copy_dir_all(&mut self, from: &Path, to: &Path, limit: u8) -> Result<CopyEffect> {
        let src = self.lookup(from)?;
        if !self.node(src)?.is_dir() {
            return Err(StrongboxError::IsFile(display(from)));
        }
        let from_names = path_components(from)?;
        let to_names = path_components(to)?;
        if from_names == to_names {
            return Ok(CopyEffect::default());
        }
        if to_names.starts_with(&from_names) {
            return Err(StrongboxError::invalid_input(format!(
                "cannot copy {} inside itself",
                display(from)
            )));
        }

        match self.lookup(to) {
            Ok(dst) if !self.node(dst)?.is_dir() => return Err(StrongboxError::IsFile(display(to))),
            Ok(_) => {}
            Err(StrongboxError::NotFound(_)) => {
                self.create_dir(to)?;
            }
            Err(e) => return Err(e),
        }

        let children: Vec<(String, bool)> = self
            .node(src)?
            .children()
            .iter()
            .map(|c| self.node(*c).map(|n| (n.name.clone(), n.is_dir())))
            .collect::<Result<_>>()?;

        let mut effect = CopyEffect::default();
        for (name, is_dir) in children {
            let child_from = from.join(&name);
            let child_to = to.join(&name);
            if is_dir {
                effect.merge(self.copy_dir_all(&child_from, &child_to, limit)?);
            } else {
                effect.merge(self.copy_file(&child_from, &child_to, limit)?);
            }
        }
        Ok(effect)
    }

    /// Every block referenced by every retained version
    pub fn all_blocks(&self) -> impl Iterator<Item = &BlockRef> {
        self.nodes
            .values()
            .filter_map(Node::versions)
            .flat_map(|vm| vm.iter())
            .flat_map(|v| v.blocks().iter())
    }

    /// Ids of every node below and including `path`
    pub fn subtree_ids(&self, path: &Path) -> Result<Vec<NodeId>> {
        self.subtree(self.lookup(path)?)
    }
}
