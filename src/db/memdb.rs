//! The root handle: holds the published root map under a reader-writer
//! lock and the single writer lock transactions contend for.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::tree::Tree;

use super::schema::{Schema, PRIMARY_INDEX};
use super::txn::Txn;

/// Construction-time knobs. There is no file or environment-variable
/// configuration surface; callers build this directly.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Past this many channels, a watch set collapses to a single
    /// broader-scope fallback channel rather than growing unbounded.
    pub watch_set_fallback_limit: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { watch_set_fallback_limit: 8 }
    }
}

/// A read-only snapshot of the database's counters, incremented under the
/// writer lock and read via relaxed atomic loads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    pub committed_txns: u64,
    pub aborted_txns: u64,
    pub root_generation: u64,
}

#[derive(Default)]
pub(crate) struct DiagnosticsInner {
    pub committed_txns: AtomicU64,
    pub aborted_txns: AtomicU64,
    pub root_generation: AtomicU64,
}

impl DiagnosticsInner {
    fn snapshot(&self) -> Diagnostics {
        Diagnostics {
            committed_txns: self.committed_txns.load(Relaxed),
            aborted_txns: self.aborted_txns.load(Relaxed),
            root_generation: self.root_generation.load(Relaxed),
        }
    }
}

/// A snapshot of every `(table, index)` tree root: precisely what a
/// transaction reads from or publishes to.
pub(crate) struct RootMap<R> {
    pub primary: FxHashMap<String, Tree<Arc<R>>>,
    pub secondary: FxHashMap<(String, String), Tree<Vec<u8>>>,
}

impl<R> Clone for RootMap<R> {
    fn clone(&self) -> Self {
        Self { primary: self.primary.clone(), secondary: self.secondary.clone() }
    }
}

impl<R> RootMap<R> {
    fn empty(schema: &Schema<R>) -> Self {
        let mut primary = FxHashMap::default();
        let mut secondary = FxHashMap::default();
        for table in schema.tables() {
            primary.insert(table.name.clone(), Tree::new());
            for index_name in &table.index_order {
                if index_name != PRIMARY_INDEX {
                    secondary.insert((table.name.clone(), index_name.clone()), Tree::new());
                }
            }
        }
        Self { primary, secondary }
    }
}

pub(crate) struct Inner<R> {
    pub schema: Arc<Schema<R>>,
    pub published: RwLock<Arc<RootMap<R>>>,
    pub writer: Arc<Mutex<()>>,
    pub diagnostics: DiagnosticsInner,
    pub config: DbConfig,
}

/// The database root. Cloning a `MemDb` is cheap — it shares the same
/// published state and writer lock as the original.
pub struct MemDb<R> {
    inner: Arc<Inner<R>>,
    snapshot_only: bool,
}

impl<R> Clone for MemDb<R> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), snapshot_only: self.snapshot_only }
    }
}

impl<R: Send + Sync + 'static> MemDb<R> {
    pub fn new(schema: Schema<R>) -> Self {
        Self::with_config(schema, DbConfig::default())
    }

    pub fn with_config(schema: Schema<R>, config: DbConfig) -> Self {
        let root_map = RootMap::empty(&schema);
        Self {
            inner: Arc::new(Inner {
                schema: Arc::new(schema),
                published: RwLock::new(Arc::new(root_map)),
                writer: Arc::new(Mutex::new(())),
                diagnostics: DiagnosticsInner::default(),
                config,
            }),
            snapshot_only: false,
        }
    }

    /// Opens a transaction. A writable transaction blocks until it
    /// acquires the single writer lock; a read-only transaction captures
    /// the currently published root map and never blocks.
    ///
    /// # Panics
    /// Panics if `writable` is true and this handle was produced by
    /// [`snapshot`](Self::snapshot) — opening another writable transaction
    /// from within one would deadlock on the writer lock, and a snapshot
    /// handle exists precisely to rule that out.
    pub fn txn(&self, writable: bool) -> Txn<R> {
        assert!(!(writable && self.snapshot_only), "cannot open a writable transaction on a snapshot handle");
        let base = self.inner.published.read().clone();
        let guard = writable.then(|| self.inner.writer.lock_arc());
        Txn::new(self.inner.clone(), base, guard)
    }

    /// A read-only clone: the returned handle can never open a writable
    /// transaction, which makes it safe to hand to test code or external
    /// diffing without risking a deadlock against the real writer.
    pub fn snapshot(&self) -> Self {
        Self { inner: self.inner.clone(), snapshot_only: true }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.inner.diagnostics.snapshot()
    }

    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }
}
