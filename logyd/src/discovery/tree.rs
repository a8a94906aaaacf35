//! The hierarchy of tracked HID++ nodes.
//!
//! Roots are receivers or wired devices, their children are satellites
//! sharing the transport of the root. A root whose own node disappears while
//! satellites are still tracked is kept as *pending removal* and dropped as
//! soon as its last child is gone.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use hidpp::{
    channel::RawHidDevice,
    descriptor::ReportSupport,
    session::{ProtocolSession, ProtocolState, TreePosition},
};
use serde::Serialize;
use thiserror::Error;

use crate::handle::DeviceIdentity;

/// A tracked node.
pub struct DeviceNode<T: RawHidDevice> {
    path: PathBuf,
    display_name: String,
    identity: DeviceIdentity,
    parent: Option<PathBuf>,
    children: BTreeSet<PathBuf>,
    session: Arc<ProtocolSession<T>>,
    pending_removal: bool,
}

impl<T: RawHidDevice> DeviceNode<T> {
    pub fn new(
        path: PathBuf,
        display_name: String,
        identity: DeviceIdentity,
        session: Arc<ProtocolSession<T>>,
    ) -> Self {
        Self {
            path,
            display_name,
            identity,
            parent: None,
            children: BTreeSet::new(),
            session,
            pending_removal: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn parent(&self) -> Option<&Path> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &Path> {
        self.children.iter().map(PathBuf::as_path)
    }

    pub fn session(&self) -> &Arc<ProtocolSession<T>> {
        &self.session
    }

    /// Whether the node itself was removed while it still had children.
    pub fn is_pending_removal(&self) -> bool {
        self.pending_removal
    }
}

/// The result of [`DeviceTree::insert`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InsertOutcome {
    Inserted,

    /// The path was already tracked; the tree is unchanged.
    AlreadyPresent,
}

/// The result of [`DeviceTree::remove`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RemoveOutcome {
    /// The path was not tracked.
    NotPresent,

    /// The node still has children and was marked as pending removal.
    Deferred,

    /// The listed nodes were removed, the requested one first, followed by
    /// parents pending removal that became childless.
    Removed(Vec<PathBuf>),
}

/// Represents an error that occurred when mutating a [`DeviceTree`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// Indicates that a child was inserted under a parent that is not tracked
    /// or already pending removal.
    #[error("parent `{}` is not tracked", .0.display())]
    MissingParent(PathBuf),
}

/// Tracked nodes keyed by their unique path.
pub struct DeviceTree<T: RawHidDevice> {
    nodes: BTreeMap<PathBuf, DeviceNode<T>>,
}

impl<T: RawHidDevice> Default for DeviceTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RawHidDevice> DeviceTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// The number of tracked nodes, including those pending removal.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&DeviceNode<T>> {
        self.nodes.get(path)
    }

    /// Whether the path is tracked and not pending removal.
    pub fn is_live(&self, path: &Path) -> bool {
        self.nodes
            .get(path)
            .is_some_and(|node| !node.pending_removal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceNode<T>> {
        self.nodes.values()
    }

    pub fn roots(&self) -> impl Iterator<Item = &DeviceNode<T>> {
        self.nodes.values().filter(|node| node.parent.is_none())
    }

    /// Inserts a node, as a child of `parent` if given.
    ///
    /// Inserting a path that is already tracked is a no-op.
    pub fn insert(
        &mut self,
        mut node: DeviceNode<T>,
        parent: Option<&Path>,
    ) -> Result<InsertOutcome, TreeError> {
        if self.nodes.contains_key(&node.path) {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        if let Some(parent) = parent {
            let parent_node = self
                .nodes
                .get_mut(parent)
                .filter(|parent_node| !parent_node.pending_removal)
                .ok_or_else(|| TreeError::MissingParent(parent.to_path_buf()))?;

            parent_node.children.insert(node.path.clone());
            node.parent = Some(parent.to_path_buf());
        }

        node.children.clear();
        node.pending_removal = false;
        self.nodes.insert(node.path.clone(), node);

        Ok(InsertOutcome::Inserted)
    }

    /// Handles the removal of the hardware node at `path`.
    pub fn remove(&mut self, path: &Path) -> RemoveOutcome {
        let Some(node) = self.nodes.get_mut(path) else {
            return RemoveOutcome::NotPresent;
        };

        if !node.children.is_empty() {
            node.pending_removal = true;
            return RemoveOutcome::Deferred;
        }

        let mut removed = Vec::new();
        self.detach(path, &mut removed);
        RemoveOutcome::Removed(removed)
    }

    /// Drops every node pending removal that has no children left.
    pub fn sweep(&mut self) -> Vec<PathBuf> {
        let stale: Vec<PathBuf> = self
            .nodes
            .values()
            .filter(|node| node.pending_removal && node.children.is_empty())
            .map(|node| node.path.clone())
            .collect();

        let mut removed = Vec::new();
        for path in stale {
            if self.nodes.contains_key(&path) {
                self.detach(&path, &mut removed);
            }
        }
        removed
    }

    /// Removes a childless node, then walks up removing parents that were
    /// waiting for it.
    fn detach(&mut self, path: &Path, removed: &mut Vec<PathBuf>) {
        let mut next = Some(path.to_path_buf());

        while let Some(path) = next.take() {
            let Some(node) = self.nodes.remove(&path) else {
                break;
            };
            removed.push(path);

            let Some(parent_path) = node.parent else {
                break;
            };
            if let Some(parent) = self.nodes.get_mut(&parent_path) {
                parent.children.remove(&node.path);
                if parent.pending_removal && parent.children.is_empty() {
                    next = Some(parent_path);
                }
            }
        }
    }

    /// Returns a serializable view of the tree, one entry per root.
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.roots().map(|root| self.snapshot_node(root)).collect()
    }

    fn snapshot_node(&self, node: &DeviceNode<T>) -> NodeSnapshot {
        let session = &node.session;

        NodeSnapshot {
            path: node.path.clone(),
            name: node.display_name.clone(),
            identity: node.identity,
            position: session.position(),
            state: session.state(),
            report_support: session.report_support(),
            pending_removal: node.pending_removal,
            children: node
                .children
                .iter()
                .filter_map(|child| self.nodes.get(child))
                .map(|child| self.snapshot_node(child))
                .collect(),
        }
    }
}

/// A point-in-time view of a tracked node and its children.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct NodeSnapshot {
    pub path: PathBuf,
    pub name: String,
    pub identity: DeviceIdentity,
    pub position: TreePosition,
    pub state: ProtocolState,
    pub report_support: ReportSupport,
    pub pending_removal: bool,
    pub children: Vec<NodeSnapshot>,
}
