//! The tree of groups and panes. Nodes are arena entries keyed by stable
//! ids that are never reused; parents and children reference each other by
//! id, never by pointer.

mod pane;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bind::BindScope;
use crate::geom::Size;

pub use pane::{Pane, PaneOptions, PaneStatus};

pub type NodeId = u64;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("node {0} not found")]
    NotFound(NodeId),
    #[error("node {0} is not a group")]
    NotAGroup(NodeId),
    #[error("the root group cannot be removed")]
    RemoveRoot,
    #[error("failed to start pane: {0}")]
    Spawn(#[from] anyhow::Error),
}

#[derive(Clone, Debug)]
pub enum TreeEvent {
    NodeAdded(NodeId),
    /// Carries every id in the removed subtree.
    NodeRemoved { ids: Vec<NodeId> },
}

enum NodeKind {
    Group {
        children: Vec<NodeId>,
        binds: Arc<BindScope>,
    },
    Pane(Arc<Pane>),
}

struct NodeEntry {
    parent: Option<NodeId>,
    kind: NodeKind,
}

struct TreeInner {
    nodes: HashMap<NodeId, NodeEntry>,
    next_id: NodeId,
}

/// Mutations take the writer lock for their full duration; reads share the
/// reader lock.
pub struct Tree {
    inner: RwLock<TreeInner>,
    root: NodeId,
    events: broadcast::Sender<TreeEvent>,
    cancel: CancellationToken,
}

const EVENT_QUEUE: usize = 64;

impl Tree {
    pub fn new() -> Arc<Tree> {
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let mut nodes = HashMap::new();
        nodes.insert(
            1,
            NodeEntry {
                parent: None,
                kind: NodeKind::Group {
                    children: Vec::new(),
                    binds: Arc::new(BindScope::new()),
                },
            },
        );
        Arc::new(Tree {
            inner: RwLock::new(TreeInner { nodes, next_id: 2 }),
            root: 1,
            events,
            cancel: CancellationToken::new(),
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Cancelling the tree cancels every pane's token.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    pub fn new_group(&self, parent: NodeId) -> Result<NodeId, TreeError> {
        let mut inner = self.inner.write().unwrap();
        let id = inner.next_id;

        let entry = inner.nodes.get_mut(&parent).ok_or(TreeError::NotFound(parent))?;
        match &mut entry.kind {
            NodeKind::Group { children, .. } => children.push(id),
            NodeKind::Pane(_) => return Err(TreeError::NotAGroup(parent)),
        }

        inner.nodes.insert(
            id,
            NodeEntry {
                parent: Some(parent),
                kind: NodeKind::Group {
                    children: Vec::new(),
                    binds: Arc::new(BindScope::new()),
                },
            },
        );
        inner.next_id += 1;
        drop(inner);

        let _ = self.events.send(TreeEvent::NodeAdded(id));
        Ok(id)
    }

    pub fn new_pane(
        &self,
        parent: NodeId,
        options: PaneOptions,
        size: Size,
    ) -> Result<Arc<Pane>, TreeError> {
        self.new_pane_with(parent, size, |_| options)
    }

    /// Like [`Tree::new_pane`], but the options see the pane's reserved id,
    /// so the environment published to the child can carry it.
    pub fn new_pane_with(
        &self,
        parent: NodeId,
        size: Size,
        options: impl FnOnce(NodeId) -> PaneOptions,
    ) -> Result<Arc<Pane>, TreeError> {
        let id = self.reserve_child(parent)?;
        let pane = Pane::spawn(id, options(id), size, self.cancel.child_token())?;
        self.insert_pane(parent, pane.clone());
        Ok(pane)
    }

    /// A pane with no subprocess; see [`Pane::memory`].
    pub fn new_memory_pane(&self, parent: NodeId, size: Size) -> Result<Arc<Pane>, TreeError> {
        let id = self.reserve_child(parent)?;
        let pane = Pane::memory(id, size, self.cancel.child_token());
        self.insert_pane(parent, pane.clone());
        Ok(pane)
    }

    /// Allocate an id under the parent group. Ids are unique for the
    /// lifetime of the server and never reused.
    fn reserve_child(&self, parent: NodeId) -> Result<NodeId, TreeError> {
        let mut inner = self.inner.write().unwrap();
        let id = inner.next_id;
        let entry = inner.nodes.get_mut(&parent).ok_or(TreeError::NotFound(parent))?;
        match &mut entry.kind {
            NodeKind::Group { children, .. } => children.push(id),
            NodeKind::Pane(_) => return Err(TreeError::NotAGroup(parent)),
        }
        inner.next_id += 1;
        Ok(id)
    }

    fn insert_pane(&self, parent: NodeId, pane: Arc<Pane>) {
        let id = pane.id();
        let mut inner = self.inner.write().unwrap();
        inner.nodes.insert(
            id,
            NodeEntry {
                parent: Some(parent),
                kind: NodeKind::Pane(pane),
            },
        );
        drop(inner);
        let _ = self.events.send(TreeEvent::NodeAdded(id));
    }

    /// Remove a subtree. Every removed pane's token is cancelled and all
    /// removed ids are published in one event.
    pub fn remove(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        if id == self.root {
            return Err(TreeError::RemoveRoot);
        }

        let mut inner = self.inner.write().unwrap();
        if !inner.nodes.contains_key(&id) {
            return Err(TreeError::NotFound(id));
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(entry) = inner.nodes.remove(&current) {
                match entry.kind {
                    NodeKind::Group { children, .. } => stack.extend(children),
                    NodeKind::Pane(pane) => pane.cancel().cancel(),
                }
                removed.push(current);
            }
        }

        if let Some(parent) = inner.nodes.values_mut().find_map(|entry| match &mut entry.kind {
            NodeKind::Group { children, .. } if children.contains(&id) => Some(children),
            _ => None,
        }) {
            parent.retain(|child| *child != id);
        }
        drop(inner);

        let _ = self.events.send(TreeEvent::NodeRemoved {
            ids: removed.clone(),
        });
        Ok(removed)
    }

    /// The ancestor chain from the root down to `id`, inclusive.
    pub fn path_to(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let inner = self.inner.read().unwrap();
        if !inner.nodes.contains_key(&id) {
            return Err(TreeError::NotFound(id));
        }

        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = inner.nodes.get(&current).and_then(|entry| entry.parent) {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// All panes in depth-first order.
    pub fn leaves(&self) -> Vec<Arc<Pane>> {
        let inner = self.inner.read().unwrap();
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match inner.nodes.get(&id).map(|entry| &entry.kind) {
                Some(NodeKind::Group { children, .. }) => {
                    // DFS order with a stack: push children reversed.
                    stack.extend(children.iter().rev());
                }
                Some(NodeKind::Pane(pane)) => leaves.push(pane.clone()),
                None => {}
            }
        }
        leaves
    }

    pub fn get_pane(&self, id: NodeId) -> Option<Arc<Pane>> {
        let inner = self.inner.read().unwrap();
        match inner.nodes.get(&id).map(|entry| &entry.kind) {
            Some(NodeKind::Pane(pane)) => Some(pane.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.read().unwrap().nodes.contains_key(&id)
    }

    /// The bind scopes along the path to `id`, root first. The effective
    /// bindings are their concatenation, children overriding ancestors.
    pub fn binds_for(&self, id: NodeId) -> Result<Vec<Arc<BindScope>>, TreeError> {
        let path = self.path_to(id)?;
        let inner = self.inner.read().unwrap();
        Ok(path
            .into_iter()
            .filter_map(|node| match inner.nodes.get(&node).map(|entry| &entry.kind) {
                Some(NodeKind::Group { binds, .. }) => Some(binds.clone()),
                _ => None,
            })
            .collect())
    }

    pub fn group_binds(&self, id: NodeId) -> Result<Arc<BindScope>, TreeError> {
        let inner = self.inner.read().unwrap();
        match inner.nodes.get(&id).map(|entry| &entry.kind) {
            Some(NodeKind::Group { binds, .. }) => Ok(binds.clone()),
            Some(NodeKind::Pane(_)) => Err(TreeError::NotAGroup(id)),
            None => Err(TreeError::NotFound(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn groups_and_paths() {
        let tree = Tree::new();
        let group = tree.new_group(tree.root()).expect("group");
        let child = tree.new_group(group).expect("child group");

        assert_eq!(tree.path_to(child).expect("path"), vec![tree.root(), group, child]);
        assert!(tree.path_to(999).is_err());
    }

    #[tokio::test]
    async fn leaves_in_dfs_order() {
        let tree = Tree::new();
        let left = tree.new_group(tree.root()).expect("left");
        let right = tree.new_group(tree.root()).expect("right");
        let a = tree
            .new_memory_pane(left, Size::new(4, 10))
            .expect("pane a");
        let b = tree
            .new_memory_pane(right, Size::new(4, 10))
            .expect("pane b");
        let c = tree
            .new_memory_pane(left, Size::new(4, 10))
            .expect("pane c");

        let order: Vec<NodeId> = tree.leaves().iter().map(|pane| pane.id()).collect();
        assert_eq!(order, vec![a.id(), c.id(), b.id()]);
    }

    #[tokio::test]
    async fn remove_reports_whole_subtree() {
        let tree = Tree::new();
        let group = tree.new_group(tree.root()).expect("group");
        let pane = tree
            .new_memory_pane(group, Size::new(4, 10))
            .expect("pane");
        let mut events = tree.subscribe();

        let removed = tree.remove(group).expect("remove");
        assert!(removed.contains(&group));
        assert!(removed.contains(&pane.id()));
        assert!(!tree.contains(group));
        assert!(!tree.contains(pane.id()));
        assert!(pane.cancel().is_cancelled());

        let event = events.try_recv().expect("event");
        match event {
            TreeEvent::NodeRemoved { ids } => {
                assert_eq!(ids.len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let tree = Tree::new();
        let group = tree.new_group(tree.root()).expect("group");
        tree.remove(group).expect("remove");

        let next = tree.new_group(tree.root()).expect("next group");
        assert!(next > group);
    }

    #[tokio::test]
    async fn binds_concatenate_along_path() {
        let tree = Tree::new();
        let group = tree.new_group(tree.root()).expect("group");
        let pane = tree
            .new_memory_pane(group, Size::new(4, 10))
            .expect("pane");

        let scopes = tree.binds_for(pane.id()).expect("binds");
        assert_eq!(scopes.len(), 2);
    }
}
