//! Node layout for the persistent radix tree and its per-node watch channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::sync::Notify;

/// A signal-once, many-waiters notification primitive attached to every tree
/// node. Fired exactly once, on the mutation that invalidates the node; a
/// node produced by a later copy-on-write edit gets a brand new, unfired
/// channel, never this one.
pub struct WatchChannel {
    notify: Notify,
    fired: AtomicBool,
}

impl WatchChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notify: Notify::new(),
            fired: AtomicBool::new(false),
        })
    }

    /// Signals every current and future waiter. Returns `true` the first time
    /// it is called on this channel; later calls are no-ops.
    pub fn fire(&self) -> bool {
        let already = self.fired.swap(true, SeqCst);
        self.notify.notify_waiters();
        !already
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(SeqCst)
    }

    /// A future that resolves once [`fire`](Self::fire) has been called,
    /// including if it already had been before this call.
    pub fn notified(&self) -> NotifiedOnce<'_> {
        NotifiedOnce {
            notified: self.notify.notified(),
            fired: &self.fired,
        }
    }
}

impl Default for WatchChannel {
    fn default() -> Self {
        Self {
            notify: Notify::new(),
            fired: AtomicBool::new(false),
        }
    }
}

pin_project_lite::pin_project! {
    pub struct NotifiedOnce<'a> {
        #[pin]
        notified: tokio::sync::futures::Notified<'a>,
        fired: &'a AtomicBool,
    }
}

impl Future for NotifiedOnce<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut me = self.project();
        while !me.fired.load(SeqCst) {
            ready!(me.notified.as_mut().poll(cx))
        }
        Poll::Ready(())
    }
}

/// A terminal key/value pair. Kept separate from [`Node`] (rather than
/// folding the value directly into the node) so that a node on the search
/// path can have both a leaf and children, as required for keys that are a
/// strict prefix of other keys.
pub struct Leaf<V> {
    pub key: Box<[u8]>,
    pub value: V,
}

/// One outgoing edge from a node, labelled by the first byte of the child's
/// prefix. Edges are kept sorted by `label` so lookups can binary search and
/// so forward/reverse iteration needs no extra sort step.
pub struct Edge<V> {
    pub label: u8,
    pub node: Arc<Node<V>>,
}

/// A single node of the compressed-prefix tree.
///
/// `prefix` is the edge label leading into this node from its parent (empty
/// only at the root). A node may carry a leaf, children, or both — both
/// happens when one key is a strict prefix of another.
pub struct Node<V> {
    pub prefix: Box<[u8]>,
    pub leaf: Option<Arc<Leaf<V>>>,
    pub edges: Vec<Edge<V>>,
    pub channel: Arc<WatchChannel>,
}

impl<V> Node<V> {
    pub fn empty() -> Arc<Self> {
        Arc::new(Node {
            prefix: Box::new([]),
            leaf: None,
            edges: Vec::new(),
            channel: WatchChannel::new(),
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }

    /// Binary search for the edge whose label matches `b`.
    pub fn edge_index(&self, b: u8) -> Result<usize, usize> {
        self.edges.binary_search_by_key(&b, |e| e.label)
    }

    pub fn get_edge(&self, b: u8) -> Option<&Arc<Node<V>>> {
        self.edge_index(b).ok().map(|i| &self.edges[i].node)
    }
}

impl<V> Clone for Node<V> {
    /// A shallow copy: edges and leaf are `Arc`-shared, only the vector and
    /// prefix box are duplicated. Used by the transaction layer as the basis
    /// for copy-on-write edits — the clone gets a *fresh* channel, the
    /// original's channel is what later gets queued to fire.
    fn clone(&self) -> Self {
        Node {
            prefix: self.prefix.clone(),
            leaf: self.leaf.clone(),
            edges: self
                .edges
                .iter()
                .map(|e| Edge { label: e.label, node: e.node.clone() })
                .collect(),
            channel: WatchChannel::new(),
        }
    }
}

/// Returns the length of the common byte prefix of `a` and `b`.
pub fn longest_common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
