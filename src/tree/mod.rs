//! A persistent (immutable, copy-on-write) radix tree.
//!
//! Every mutation goes through a [`TreeTxn`] staged over one committed
//! [`Tree`]; applying it produces a brand new [`Tree`] that shares every
//! untouched subtree with the one it was staged from. Each node carries a
//! [`WatchChannel`] that fires exactly once, the moment the node (or any of
//! its descendants) is superseded by a copy-on-write edit.

mod iter;
mod node;

pub use iter::{iter_all, iter_all_reverse, iter_lower_bound, iter_prefix, iter_reverse_lower_bound, seek_prefix, Iter, RevIter};
pub use node::{Edge, Leaf, Node, NotifiedOnce, WatchChannel};

use std::collections::HashSet;
use std::sync::Arc;

use node::longest_common_prefix;

/// A single committed, immutable snapshot of a radix tree.
pub struct Tree<V> {
    root: Arc<Node<V>>,
}

impl<V> Clone for Tree<V> {
    fn clone(&self) -> Self {
        Tree { root: self.root.clone() }
    }
}

impl<V: Clone> Default for Tree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Tree<V> {
    pub fn new() -> Self {
        Tree { root: Node::empty() }
    }

    pub fn from_root(root: Arc<Node<V>>) -> Self {
        Tree { root }
    }

    pub fn root(&self) -> Arc<Node<V>> {
        self.root.clone()
    }

    pub fn len_hint(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.leaf.is_none() && self.root.edges.is_empty()
    }

    /// Looks up `key`. Returns the leaf if present and the watch channel of
    /// the deepest node actually reached while walking the search path (the
    /// leaf's own channel on a hit, the nearest existing ancestor's on a
    /// miss).
    pub fn get(&self, key: &[u8]) -> (Option<Arc<Leaf<V>>>, Arc<WatchChannel>) {
        let mut last_channel = self.root.channel.clone();
        let mut node = &self.root;
        let mut rest = key;
        loop {
            if rest.is_empty() {
                return (node.leaf.clone(), last_channel);
            }
            match node.get_edge(rest[0]) {
                Some(child) => {
                    if rest.len() < child.prefix.len() || &rest[..child.prefix.len()] != &child.prefix[..] {
                        return (None, last_channel);
                    }
                    rest = &rest[child.prefix.len()..];
                    node = child;
                    last_channel = node.channel.clone();
                }
                None => return (None, last_channel),
            }
        }
    }

    /// Returns the longest key in the tree that is a prefix of `key`,
    /// together with its value.
    pub fn longest_prefix(&self, key: &[u8]) -> Option<Arc<Leaf<V>>> {
        let mut node = &self.root;
        let mut rest = key;
        let mut last = None;
        loop {
            if let Some(leaf) = &node.leaf {
                last = Some(leaf.clone());
            }
            if rest.is_empty() {
                break;
            }
            match node.get_edge(rest[0]) {
                Some(child) => {
                    if rest.len() < child.prefix.len() || &rest[..child.prefix.len()] != &child.prefix[..] {
                        break;
                    }
                    rest = &rest[child.prefix.len()..];
                    node = child;
                }
                None => break,
            }
        }
        last
    }

    pub fn iter(&self) -> Iter<V> {
        iter_all(self.root.clone())
    }

    pub fn iter_reverse(&self) -> RevIter<V> {
        iter_all_reverse(self.root.clone())
    }

    pub fn iter_prefix(&self, prefix: &[u8]) -> Iter<V> {
        iter_prefix(&self.root, prefix)
    }

    pub fn iter_lower_bound(&self, key: &[u8]) -> Iter<V> {
        iter_lower_bound(&self.root, key)
    }

    pub fn iter_reverse_lower_bound(&self, key: &[u8]) -> RevIter<V> {
        iter_reverse_lower_bound(&self.root, key)
    }

    /// The channel that covers the whole tree.
    pub fn root_channel(&self) -> Arc<WatchChannel> {
        self.root.channel.clone()
    }

    /// The channel that covers exactly the keys under `prefix`, or the root
    /// channel if no key currently has that prefix (there is nothing more
    /// specific to subscribe to yet).
    pub fn prefix_channel(&self, prefix: &[u8]) -> Arc<WatchChannel> {
        seek_prefix(&self.root, prefix).map(|n| n.channel.clone()).unwrap_or_else(|| self.root.channel.clone())
    }

    pub fn begin(&self) -> TreeTxn<V> {
        TreeTxn { root: self.root.clone(), dirty: Vec::new() }
    }

    /// Applies a committed transaction's result, replacing this tree's root.
    pub fn apply(&mut self, txn: TreeTxn<V>) -> Vec<Arc<WatchChannel>> {
        let (root, dirty) = txn.commit();
        self.root = root;
        dirty
    }
}

/// A mutable staging area over one [`Tree`]'s root. Every edit clones the
/// path it touches and records the *old* channel of every node it displaces;
/// [`commit`](Self::commit) hands back the new root plus the deduplicated
/// list of channels the caller must fire.
pub struct TreeTxn<V> {
    root: Arc<Node<V>>,
    dirty: Vec<Arc<WatchChannel>>,
}

impl<V: Clone> TreeTxn<V> {
    pub fn root(&self) -> &Arc<Node<V>> {
        &self.root
    }

    pub fn get(&self, key: &[u8]) -> Option<Arc<Leaf<V>>> {
        Tree::from_root(self.root.clone()).get(key).0
    }

    /// Inserts or replaces `key`, returning the value it displaced, if any.
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        let (new_root, old) = insert_rec(&self.root, key, key, value, &mut self.dirty);
        self.root = new_root;
        old
    }

    /// Removes `key`. A no-op (no channels dirtied) if the key is absent.
    pub fn delete(&mut self, key: &[u8]) -> Option<V> {
        match delete_rec(&self.root, key, &mut self.dirty) {
            Some((new_root, value)) => {
                self.root = new_root.unwrap_or_else(Node::empty);
                Some(value)
            }
            None => None,
        }
    }

    /// Removes every key with the given prefix. Returns whether anything was
    /// removed.
    pub fn delete_prefix(&mut self, prefix: &[u8]) -> bool {
        match delete_prefix_rec(&self.root, prefix, &mut self.dirty) {
            Some(new_root) => {
                self.root = new_root.unwrap_or_else(Node::empty);
                true
            }
            None => false,
        }
    }

    /// Finalizes this transaction, returning the new root and the
    /// deduplicated set of channels to fire.
    pub fn commit(self) -> (Arc<Node<V>>, Vec<Arc<WatchChannel>>) {
        let mut seen = HashSet::with_capacity(self.dirty.len());
        let mut fire = Vec::with_capacity(self.dirty.len());
        for ch in self.dirty {
            let ptr = Arc::as_ptr(&ch) as usize;
            if seen.insert(ptr) {
                fire.push(ch);
            }
        }
        (self.root, fire)
    }
}

fn clone_edges<V: Clone>(edges: &[Edge<V>]) -> Vec<Edge<V>> {
    edges.iter().map(|e| Edge { label: e.label, node: e.node.clone() }).collect()
}

fn insert_rec<V: Clone>(
    node: &Arc<Node<V>>,
    full_key: &[u8],
    suffix: &[u8],
    value: V,
    dirty: &mut Vec<Arc<WatchChannel>>,
) -> (Arc<Node<V>>, Option<V>) {
    dirty.push(node.channel.clone());
    let mut new_node: Node<V> = (**node).clone();

    if suffix.is_empty() {
        let old = new_node.leaf.as_ref().map(|l| l.value.clone());
        new_node.leaf = Some(Arc::new(Leaf { key: full_key.to_vec().into_boxed_slice(), value }));
        return (Arc::new(new_node), old);
    }

    match new_node.edge_index(suffix[0]) {
        Ok(idx) => {
            let child = new_node.edges[idx].node.clone();
            let cp = longest_common_prefix(&child.prefix, suffix);
            if cp == child.prefix.len() {
                let (new_child, old) = insert_rec(&child, full_key, &suffix[cp..], value, dirty);
                new_node.edges[idx].node = new_child;
                (Arc::new(new_node), old)
            } else {
                // The new key diverges partway through the existing edge: split it.
                tracing::trace!(common = cp, edge_len = child.prefix.len(), "tree edge split");
                dirty.push(child.channel.clone());
                let trimmed = Arc::new(Node {
                    prefix: child.prefix[cp..].to_vec().into_boxed_slice(),
                    leaf: child.leaf.clone(),
                    edges: clone_edges(&child.edges),
                    channel: WatchChannel::new(),
                });
                let rest = &suffix[cp..];
                let mut branch_edges = vec![Edge { label: trimmed.prefix[0], node: trimmed }];
                let branch_leaf = if rest.is_empty() {
                    Some(Arc::new(Leaf { key: full_key.to_vec().into_boxed_slice(), value }))
                } else {
                    let new_leaf_node = Arc::new(Node {
                        prefix: rest.to_vec().into_boxed_slice(),
                        leaf: Some(Arc::new(Leaf { key: full_key.to_vec().into_boxed_slice(), value })),
                        edges: Vec::new(),
                        channel: WatchChannel::new(),
                    });
                    branch_edges.push(Edge { label: rest[0], node: new_leaf_node });
                    None
                };
                branch_edges.sort_by_key(|e| e.label);
                let branch = Arc::new(Node {
                    prefix: child.prefix[..cp].to_vec().into_boxed_slice(),
                    leaf: branch_leaf,
                    edges: branch_edges,
                    channel: WatchChannel::new(),
                });
                new_node.edges[idx].node = branch;
                (Arc::new(new_node), None)
            }
        }
        Err(idx) => {
            let new_leaf_node = Arc::new(Node {
                prefix: suffix.to_vec().into_boxed_slice(),
                leaf: Some(Arc::new(Leaf { key: full_key.to_vec().into_boxed_slice(), value })),
                edges: Vec::new(),
                channel: WatchChannel::new(),
            });
            new_node.edges.insert(idx, Edge { label: suffix[0], node: new_leaf_node });
            (Arc::new(new_node), None)
        }
    }
}

/// Absorbs a node with exactly one remaining child and no leaf into that
/// child, concatenating edge labels. Mirrors the merge every `delete` and
/// `delete_prefix` must perform to keep the tree maximally compressed.
fn merge_single_child<V: Clone>(mut node: Node<V>, dirty: &mut Vec<Arc<WatchChannel>>) -> Arc<Node<V>> {
    if node.leaf.is_none() && node.edges.len() == 1 {
        let child = node.edges.remove(0).node;
        tracing::trace!(child_prefix_len = child.prefix.len(), "tree node merge");
        dirty.push(child.channel.clone());
        let prefix: Vec<u8> = node.prefix.iter().chain(child.prefix.iter()).copied().collect();
        Arc::new(Node {
            prefix: prefix.into_boxed_slice(),
            leaf: child.leaf.clone(),
            edges: clone_edges(&child.edges),
            channel: WatchChannel::new(),
        })
    } else {
        Arc::new(node)
    }
}

fn delete_rec<V: Clone>(
    node: &Arc<Node<V>>,
    suffix: &[u8],
    dirty: &mut Vec<Arc<WatchChannel>>,
) -> Option<(Option<Arc<Node<V>>>, V)> {
    if suffix.is_empty() {
        let value = node.leaf.as_ref()?.value.clone();
        dirty.push(node.channel.clone());
        let mut new_node: Node<V> = (**node).clone();
        new_node.leaf = None;
        if new_node.edges.is_empty() {
            return Some((None, value));
        }
        Some((Some(merge_single_child(new_node, dirty)), value))
    } else {
        let idx = node.edge_index(suffix[0]).ok()?;
        let child = node.edges[idx].node.clone();
        if suffix.len() < child.prefix.len() || &suffix[..child.prefix.len()] != &child.prefix[..] {
            return None;
        }
        let (new_child, value) = delete_rec(&child, &suffix[child.prefix.len()..], dirty)?;
        dirty.push(node.channel.clone());
        let mut new_node: Node<V> = (**node).clone();
        match new_child {
            Some(new_child) => {
                new_node.edges[idx].node = new_child;
                Some((Some(Arc::new(new_node)), value))
            }
            None => {
                new_node.edges.remove(idx);
                if new_node.leaf.is_none() && new_node.edges.is_empty() {
                    Some((None, value))
                } else {
                    Some((Some(merge_single_child(new_node, dirty)), value))
                }
            }
        }
    }
}

fn collect_all_channels<V>(node: &Arc<Node<V>>, dirty: &mut Vec<Arc<WatchChannel>>) {
    dirty.push(node.channel.clone());
    for edge in &node.edges {
        collect_all_channels(&edge.node, dirty);
    }
}

fn delete_prefix_rec<V: Clone>(
    node: &Arc<Node<V>>,
    suffix: &[u8],
    dirty: &mut Vec<Arc<WatchChannel>>,
) -> Option<Option<Arc<Node<V>>>> {
    if suffix.is_empty() {
        collect_all_channels(node, dirty);
        return Some(None);
    }
    if suffix.len() <= node.prefix.len() {
        return if node.prefix.starts_with(suffix) {
            collect_all_channels(node, dirty);
            Some(None)
        } else {
            None
        };
    }
    if &suffix[..node.prefix.len()] != &node.prefix[..] {
        return None;
    }
    let rest = &suffix[node.prefix.len()..];
    let idx = node.edge_index(rest[0]).ok()?;
    let child = node.edges[idx].node.clone();
    let result = delete_prefix_rec(&child, rest, dirty)?;
    dirty.push(node.channel.clone());
    let mut new_node: Node<V> = (**node).clone();
    match result {
        Some(new_child) => {
            new_node.edges[idx].node = new_child;
            Some(Some(Arc::new(new_node)))
        }
        None => {
            new_node.edges.remove(idx);
            if new_node.leaf.is_none() && new_node.edges.is_empty() {
                Some(None)
            } else {
                Some(Some(merge_single_child(new_node, dirty)))
            }
        }
    }
}
