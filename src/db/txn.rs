//! The database transaction layer: read-only and writable transactions over
//! a published [`super::memdb::RootMap`], enforcing primary/secondary index
//! consistency on every write.

use std::iter::Map;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use itertools::Either;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::tree::{Iter, Leaf, RevIter, Tree};

use super::indexer::{Arg, ArgsIndexer, ArgsPrefixIndexer, IndexOutcome, MultiIndexer, SingleIndexer};
use super::memdb::{Inner, RootMap};
use super::schema::{IndexSchema, TableSchema, PRIMARY_INDEX};
use super::watch::WatchSet;

type WriterGuard = parking_lot::ArcMutexGuard<parking_lot::RawMutex, ()>;
type PrimaryTxn<R> = crate::tree::TreeTxn<Arc<R>>;
type SecondaryTxn = crate::tree::TreeTxn<Vec<u8>>;

fn leaf_value<R>(leaf: Arc<Leaf<Arc<R>>>) -> Arc<R> {
    leaf.value.clone()
}

type PrimaryMap<R> = Map<Iter<Arc<R>>, fn(Arc<Leaf<Arc<R>>>) -> Arc<R>>;
type PrimaryMapRev<R> = Map<RevIter<Arc<R>>, fn(Arc<Leaf<Arc<R>>>) -> Arc<R>>;

fn map_primary<R>(iter: Iter<Arc<R>>) -> PrimaryMap<R> {
    iter.map(leaf_value::<R>)
}

fn map_primary_rev<R>(iter: RevIter<Arc<R>>) -> PrimaryMapRev<R> {
    iter.map(leaf_value::<R>)
}

/// Walks a secondary index's keys in order, dereferencing each one through
/// the primary tree. A secondary entry whose primary row was deleted inside
/// the same snapshot view it is read against is skipped rather than yielding
/// a stale key.
struct SecondaryDeref<R> {
    inner: Iter<Vec<u8>>,
    primary: Tree<Arc<R>>,
}

impl<R> Iterator for SecondaryDeref<R> {
    type Item = Arc<R>;

    fn next(&mut self) -> Option<Self::Item> {
        for leaf in self.inner.by_ref() {
            if let Some(found) = self.primary.get(&leaf.value).0 {
                return Some(found.value.clone());
            }
        }
        None
    }
}

struct SecondaryDerefRev<R> {
    inner: RevIter<Vec<u8>>,
    primary: Tree<Arc<R>>,
}

impl<R> Iterator for SecondaryDerefRev<R> {
    type Item = Arc<R>;

    fn next(&mut self) -> Option<Self::Item> {
        for leaf in self.inner.by_ref() {
            if let Some(found) = self.primary.get(&leaf.value).0 {
                return Some(found.value.clone());
            }
        }
        None
    }
}

/// A stateful, ascending walk over a table's rows in key order, produced by
/// [`Txn::get`] and [`Txn::lower_bound`]. Scanning the primary index walks
/// its tree directly; scanning a secondary index walks the secondary tree
/// and dereferences each hit through the primary tree one row at a time,
/// mirroring the teacher's unification of its unique/non-unique row shapes.
pub type Cursor<R> = Either<PrimaryMap<R>, SecondaryDeref<R>>;

/// The descending counterpart to [`Cursor`], produced by
/// [`Txn::reverse_lower_bound`].
pub type ReverseCursor<R> = Either<PrimaryMapRev<R>, SecondaryDerefRev<R>>;

/// One edit applied by a committed writable transaction, recorded only when
/// [`Txn::track_changes`] was requested.
pub struct ChangeEntry<R> {
    pub table: String,
    pub before: Option<Arc<R>>,
    pub after: Option<Arc<R>>,
}

/// A read-only or writable transaction. Writable transactions hold the
/// database's single writer lock from construction until commit or abort.
pub struct Txn<R> {
    inner: Arc<Inner<R>>,
    base: Arc<RootMap<R>>,
    writer_guard: Option<WriterGuard>,
    primary_txns: FxHashMap<String, PrimaryTxn<R>>,
    secondary_txns: FxHashMap<(String, String), SecondaryTxn>,
    closed: bool,
    track_changes: bool,
    changes: Vec<ChangeEntry<R>>,
}

impl<R: Send + Sync + 'static> Txn<R> {
    pub(crate) fn new(inner: Arc<Inner<R>>, base: Arc<RootMap<R>>, writer_guard: Option<WriterGuard>) -> Self {
        Self {
            inner,
            base,
            writer_guard,
            primary_txns: FxHashMap::default(),
            secondary_txns: FxHashMap::default(),
            closed: false,
            track_changes: false,
            changes: Vec::new(),
        }
    }

    /// Opts into accumulating a `(table, before, after)` log of every edit
    /// applied by this transaction, returned by [`commit`](Self::commit).
    pub fn track_changes(mut self) -> Self {
        self.track_changes = true;
        self
    }

    pub fn is_writable(&self) -> bool {
        self.writer_guard.is_some()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::TxnClosed)
        } else {
            Ok(())
        }
    }

    fn fallback_limit(&self) -> usize {
        self.inner.config.watch_set_fallback_limit
    }

    fn primary_view(&self, table: &str) -> Tree<Arc<R>> {
        match self.primary_txns.get(table) {
            Some(txn) => Tree::from_root(txn.root().clone()),
            None => self.base.primary[table].clone(),
        }
    }

    fn secondary_view(&self, table: &str, index: &str) -> Tree<Vec<u8>> {
        let key = (table.to_string(), index.to_string());
        match self.secondary_txns.get(&key) {
            Some(txn) => Tree::from_root(txn.root().clone()),
            None => self.base.secondary[&key].clone(),
        }
    }

    fn primary_txn_mut(&mut self, table: &str) -> &mut PrimaryTxn<R> {
        let base = &self.base;
        self.primary_txns.entry(table.to_string()).or_insert_with(|| base.primary[table].begin())
    }

    fn secondary_txn_mut(&mut self, table: &str, index: &str) -> &mut SecondaryTxn {
        let base = &self.base;
        self.secondary_txns
            .entry((table.to_string(), index.to_string()))
            .or_insert_with(|| base.secondary[&(table.to_string(), index.to_string())].begin())
    }

    fn from_args(&self, table: &str, index: &IndexSchema<R>, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        match &index.indexer {
            super::schema::IndexerKind::Single(idx) => idx.from_args(table, &index.name, args),
            super::schema::IndexerKind::Multi(_, args_idx) => args_idx.from_args(table, &index.name, args),
        }
    }

    /// Runs an index's `FromObject`/`FromObjectMulti` capability over
    /// `record`. `Ok(None)` means the index legitimately skips this record
    /// (only possible when `allow_missing`); otherwise every produced key.
    fn compute_keys(&self, table: &str, index: &IndexSchema<R>, record: &R) -> Result<Option<Vec<Vec<u8>>>> {
        match &index.indexer {
            super::schema::IndexerKind::Single(idx) => match idx.from_object(record) {
                IndexOutcome::Key(k) => Ok(Some(vec![k])),
                IndexOutcome::Missing if index.allow_missing => Ok(None),
                IndexOutcome::Missing => Err(Error::MissingRequiredIndex(table.to_string(), index.name.clone())),
            },
            super::schema::IndexerKind::Multi(idx, _) => {
                let keys = idx.from_object_multi(record);
                if keys.is_empty() {
                    if index.allow_missing {
                        Ok(None)
                    } else {
                        Err(Error::MissingRequiredIndex(table.to_string(), index.name.clone()))
                    }
                } else {
                    Ok(Some(keys.into_iter().collect()))
                }
            }
        }
    }

    /// Derives `record`'s primary key. The primary index is always
    /// `IndexerKind::Single` and never `allow_missing` (enforced by
    /// [`TableSchema::validate`]), but its indexer is still caller-supplied,
    /// so a record failing to produce a key is reported rather than
    /// panicked on.
    fn primary_key_of(&self, table: &str, table_schema: &TableSchema<R>, record: &R) -> Result<Vec<u8>> {
        Ok(self
            .compute_keys(table, &table_schema.indexes[PRIMARY_INDEX], record)?
            .expect("primary index enforces allow_missing = false")
            .remove(0))
    }

    /// Deletes every secondary entry `record` currently contributes, across
    /// every non-primary index. Used both when replacing a record (remove
    /// its stale entries before writing the new ones) and when deleting it.
    fn remove_secondary_entries(&mut self, table: &str, table_schema: &TableSchema<R>, record: &R) -> Result<()> {
        let primary_key = self.primary_key_of(table, table_schema, record)?;
        for index_name in &table_schema.index_order {
            if index_name == PRIMARY_INDEX {
                continue;
            }
            let index = &table_schema.indexes[index_name];
            if let Some(keys) = self.compute_keys(table, index, record)? {
                for key in keys {
                    let storage_key = if index.unique { key } else { [key, primary_key.clone()].concat() };
                    self.secondary_txn_mut(table, index_name).delete(&storage_key);
                }
            }
        }
        Ok(())
    }

    /// Writes every secondary entry for a (just-written) primary key,
    /// rejecting a unique-index collision against a *different* primary key.
    fn insert_secondary_entries(&mut self, table: &str, table_schema: &TableSchema<R>, record: &R, primary_key: &[u8]) -> Result<()> {
        for index_name in &table_schema.index_order {
            if index_name == PRIMARY_INDEX {
                continue;
            }
            let index = &table_schema.indexes[index_name];
            let Some(keys) = self.compute_keys(table, index, record)? else { continue };
            for key in keys {
                let storage_key = if index.unique { key.clone() } else { [key.clone(), primary_key.to_vec()].concat() };
                if index.unique {
                    if let Some(existing) = self.secondary_view(table, index_name).get(&storage_key).0 {
                        if existing.value.as_slice() != primary_key {
                            return Err(Error::UniqueConstraintViolation(table.to_string(), index_name.clone()));
                        }
                    }
                }
                self.secondary_txn_mut(table, index_name).insert(&storage_key, primary_key.to_vec());
            }
        }
        Ok(())
    }

    /// Inserts `record`. Replaces any prior record sharing its primary key,
    /// refreshing every secondary entry to match.
    pub fn insert(&mut self, table: &str, record: R) -> Result<()> {
        self.check_open()?;
        assert!(self.is_writable(), "insert called on a read-only transaction");
        let schema = self.inner.schema.clone();
        let table_schema = schema.table(table)?;
        let primary_key = self.primary_key_of(table, table_schema, &record)?;

        let before = self.primary_view(table).get(&primary_key).0.map(|l| l.value.clone());
        if let Some(old) = &before {
            self.remove_secondary_entries(table, table_schema, old)?;
        }

        let record_arc = Arc::new(record);
        self.insert_secondary_entries(table, table_schema, &record_arc, &primary_key)?;
        self.primary_txn_mut(table).insert(&primary_key, record_arc.clone());

        if self.track_changes {
            self.changes.push(ChangeEntry { table: table.to_string(), before, after: Some(record_arc) });
        }
        Ok(())
    }

    /// Deletes the record matching `record`'s primary key. Secondary entries
    /// are derived from the *stored* record, not the argument, so an
    /// argument with stale non-key fields still cleans up correctly.
    pub fn delete(&mut self, table: &str, record: &R) -> Result<()> {
        self.check_open()?;
        assert!(self.is_writable(), "delete called on a read-only transaction");
        let schema = self.inner.schema.clone();
        let table_schema = schema.table(table)?;
        let primary_key = self.primary_key_of(table, table_schema, record)?;
        let stored = self.primary_view(table).get(&primary_key).0.map(|l| l.value.clone()).ok_or(Error::NotFound)?;
        self.remove_secondary_entries(table, table_schema, &stored)?;
        self.primary_txn_mut(table).delete(&primary_key);
        if self.track_changes {
            self.changes.push(ChangeEntry { table: table.to_string(), before: Some(stored), after: None });
        }
        Ok(())
    }

    /// Builds the cursor matching `key` as a prefix on `index_schema`: the
    /// exact row(s) for a unique index, every row sharing the key for a
    /// non-unique one, or (with an empty `key`) a full ordered scan.
    fn matching_cursor(&self, table: &str, index_schema: &IndexSchema<R>, key: &[u8]) -> Cursor<R> {
        if index_schema.name == PRIMARY_INDEX {
            Either::Left(map_primary(self.primary_view(table).iter_prefix(key)))
        } else {
            Either::Right(SecondaryDeref { inner: self.secondary_view(table, &index_schema.name).iter_prefix(key), primary: self.primary_view(table) })
        }
    }

    /// Eagerly materializes [`matching_cursor`](Self::matching_cursor). Used
    /// internally where every matching row must be staged before mutating
    /// the tables underneath the scan (`delete_all`).
    fn collect_matching(&self, table: &str, index_schema: &IndexSchema<R>, key: &[u8]) -> Vec<Arc<R>> {
        self.matching_cursor(table, index_schema, key).collect()
    }

    /// Deletes every record matching `args` on `index`. Returns the count
    /// removed.
    pub fn delete_all(&mut self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<usize> {
        self.check_open()?;
        assert!(self.is_writable(), "deleteAll called on a read-only transaction");
        let schema = self.inner.schema.clone();
        let table_schema = schema.table(table)?;
        let index_schema = schema.index(table, index)?;
        let key = if args.is_empty() { Vec::new() } else { self.from_args(table, index_schema, args)? };
        let records = self.collect_matching(table, index_schema, &key);
        for record in &records {
            self.remove_secondary_entries(table, table_schema, record)?;
            let pk = self.primary_key_of(table, table_schema, record)?;
            self.primary_txn_mut(table).delete(&pk);
            if self.track_changes {
                self.changes.push(ChangeEntry { table: table.to_string(), before: Some(record.clone()), after: None });
            }
        }
        Ok(records.len())
    }

    /// Bulk-deletes a prefix of the primary index. Every matching record's
    /// secondary entries are cleaned up individually before the primary
    /// subtree is dropped in one step.
    pub fn delete_prefix(&mut self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<bool> {
        self.check_open()?;
        assert!(self.is_writable(), "deletePrefix called on a read-only transaction");
        if index != PRIMARY_INDEX {
            return Err(Error::DeletePrefixUnsupported(index.to_string()));
        }
        let schema = self.inner.schema.clone();
        let table_schema = schema.table(table)?;
        let index_schema = schema.index(table, index)?;
        let prefix = match &index_schema.indexer {
            super::schema::IndexerKind::Single(idx) => idx.from_args_prefix(table, index, args)?,
            super::schema::IndexerKind::Multi(_, args_idx) => args_idx.from_args(table, index, args)?,
        };
        let records: Vec<Arc<R>> = self.primary_view(table).iter_prefix(&prefix).map(|l| l.value.clone()).collect();
        if records.is_empty() {
            return Ok(false);
        }
        for record in &records {
            self.remove_secondary_entries(table, table_schema, record)?;
            if self.track_changes {
                self.changes.push(ChangeEntry { table: table.to_string(), before: Some(record.clone()), after: None });
            }
        }
        self.primary_txn_mut(table).delete_prefix(&prefix);
        Ok(true)
    }

    /// Full match on `index`: exact lookup for a unique index, every row
    /// sharing the secondary key for a non-unique one, or (with no args) a
    /// full ordered scan of the index. The returned cursor walks matching
    /// rows lazily in key order rather than collecting them up front.
    pub fn get(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Cursor<R>> {
        self.check_open()?;
        let index_schema = self.inner.schema.index(table, index)?;
        let key = if args.is_empty() { Vec::new() } else { self.from_args(table, index_schema, args)? };
        Ok(self.matching_cursor(table, index_schema, &key))
    }

    pub fn first(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Option<Arc<R>>> {
        Ok(self.get(table, index, args)?.next())
    }

    pub fn last(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Option<Arc<R>>> {
        Ok(self.get(table, index, args)?.last())
    }

    /// Ascending scan starting at the first row `>= args`.
    pub fn lower_bound(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Cursor<R>> {
        self.check_open()?;
        let index_schema = self.inner.schema.index(table, index)?;
        let key = self.from_args(table, index_schema, args)?;
        Ok(if index == PRIMARY_INDEX {
            Either::Left(map_primary(self.primary_view(table).iter_lower_bound(&key)))
        } else {
            Either::Right(SecondaryDeref { inner: self.secondary_view(table, index).iter_lower_bound(&key), primary: self.primary_view(table) })
        })
    }

    /// Descending scan starting at the last row `<= args`.
    pub fn reverse_lower_bound(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<ReverseCursor<R>> {
        self.check_open()?;
        let index_schema = self.inner.schema.index(table, index)?;
        let key = self.from_args(table, index_schema, args)?;
        Ok(if index == PRIMARY_INDEX {
            Either::Left(map_primary_rev(self.primary_view(table).iter_reverse_lower_bound(&key)))
        } else {
            Either::Right(SecondaryDerefRev { inner: self.secondary_view(table, index).iter_reverse_lower_bound(&key), primary: self.primary_view(table) })
        })
    }

    fn scan_channel(&self, table: &str, index: &str, key: &[u8]) -> Result<Arc<crate::tree::WatchChannel>> {
        self.inner.schema.index(table, index)?;
        Ok(if index == PRIMARY_INDEX {
            self.primary_view(table).prefix_channel(key)
        } else {
            self.secondary_view(table, index).prefix_channel(key)
        })
    }

    /// Like [`get`](Self::get), but also registers the scanned subtree's
    /// watch channel with `watch_set` so the caller can block on "anything
    /// under this scope changed."
    pub fn get_watch(&self, table: &str, index: &str, args: &[Arg<'_>], watch_set: &mut WatchSet) -> Result<Cursor<R>> {
        self.check_open()?;
        let index_schema = self.inner.schema.index(table, index)?;
        let key = if args.is_empty() { Vec::new() } else { self.from_args(table, index_schema, args)? };
        let channel = self.scan_channel(table, index, &key)?;
        let limit = self.fallback_limit();
        watch_set.add_with_limit(limit, channel.clone(), || channel);
        Ok(self.matching_cursor(table, index_schema, &key))
    }

    pub fn first_watch(&self, table: &str, index: &str, args: &[Arg<'_>], watch_set: &mut WatchSet) -> Result<Option<Arc<R>>> {
        Ok(self.get_watch(table, index, args, watch_set)?.next())
    }

    /// Finalizes the transaction. A writable transaction's accumulated tree
    /// edits are committed and published atomically, and every dirtied
    /// channel fires; a read-only transaction simply closes. Returns the
    /// change log, populated only if [`track_changes`](Self::track_changes)
    /// was requested.
    pub fn commit(mut self) -> Result<Vec<ChangeEntry<R>>> {
        self.check_open()?;
        self.closed = true;
        if self.writer_guard.is_some() {
            let tables_touched = self.primary_txns.len() + self.secondary_txns.len();
            let mut new_root = (*self.base).clone();
            let mut fired = Vec::new();
            for (table, txn) in self.primary_txns.drain() {
                fired.extend(new_root.primary.get_mut(&table).expect("table present in root map").apply(txn));
            }
            for (key, txn) in self.secondary_txns.drain() {
                fired.extend(new_root.secondary.get_mut(&key).expect("index present in root map").apply(txn));
            }
            *self.inner.published.write() = Arc::new(new_root);
            self.inner.diagnostics.committed_txns.fetch_add(1, Relaxed);
            let generation = self.inner.diagnostics.root_generation.fetch_add(1, Relaxed) + 1;
            for channel in &fired {
                channel.fire();
            }
            tracing::debug!(tables_touched, channels_fired = fired.len(), root_generation = generation, "transaction committed");
        }
        self.writer_guard = None;
        Ok(std::mem::take(&mut self.changes))
    }

    /// Discards every staged edit; the published root map is left
    /// untouched and no channel fires.
    pub fn abort(mut self) -> Result<()> {
        self.check_open()?;
        self.closed = true;
        if self.writer_guard.is_some() {
            self.inner.diagnostics.aborted_txns.fetch_add(1, Relaxed);
            tracing::debug!("transaction aborted");
        }
        self.writer_guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::indexer::{IntFieldIndex, StringFieldIndex};
    use crate::db::memdb::MemDb;
    use crate::db::schema::{IndexSchema, Schema, TableSchema};

    #[derive(Debug, Clone, PartialEq)]
    struct Person {
        email: String,
        name: String,
        age: i32,
    }

    fn person(email: &str, name: &str, age: i32) -> Person {
        Person { email: email.to_string(), name: name.to_string(), age }
    }

    fn schema() -> Schema<Person> {
        Schema::new(vec![TableSchema::new(
            "person",
            vec![
                IndexSchema::single("id", true, StringFieldIndex::required(|p: &Person| p.email.clone())),
                IndexSchema::single("age", false, IntFieldIndex::required(|p: &Person| p.age)),
                IndexSchema::single("name", true, StringFieldIndex::required(|p: &Person| p.name.clone())),
            ],
        )])
        .unwrap()
    }

    fn seed_four(db: &MemDb<Person>) {
        let mut txn = db.txn(true);
        txn.insert("person", person("joe@aol.com", "Joe", 30)).unwrap();
        txn.insert("person", person("lucy@aol.com", "Lucy", 35)).unwrap();
        txn.insert("person", person("tariq@aol.com", "Tariq", 21)).unwrap();
        txn.insert("person", person("dorothy@aol.com", "Dorothy", 53)).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn s1_primary_lookup() {
        let db = MemDb::new(schema());
        let mut txn = db.txn(true);
        txn.insert("person", person("joe@aol.com", "Joe", 30)).unwrap();
        txn.commit().unwrap();

        let txn = db.txn(false);
        let found = txn.first("person", "id", &[Arg::Str("joe@aol.com")]).unwrap();
        assert_eq!(found.unwrap().name, "Joe");
    }

    #[test]
    fn s2_ordered_full_scan() {
        let db = MemDb::new(schema());
        seed_four(&db);

        let txn = db.txn(false);
        let names: Vec<String> = txn.get("person", "id", &[]).unwrap().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["Dorothy", "Joe", "Lucy", "Tariq"]);
    }

    #[test]
    fn s3_range_scan_with_lower_bound() {
        let db = MemDb::new(schema());
        seed_four(&db);

        let txn = db.txn(false);
        let rows = txn.lower_bound("person", "age", &[Arg::I64(25)]).unwrap();
        let in_range: Vec<(String, i32)> = rows.take_while(|r| r.age <= 35).map(|r| (r.name.clone(), r.age)).collect();
        assert_eq!(in_range, vec![("Joe".to_string(), 30), ("Lucy".to_string(), 35)]);
    }

    #[test]
    fn s4_secondary_index_update() {
        let db = MemDb::new(schema());
        let mut txn = db.txn(true);
        txn.insert("person", person("a@x", "A", 10)).unwrap();
        txn.commit().unwrap();

        let mut txn = db.txn(true);
        txn.insert("person", person("a@x", "A", 11)).unwrap();
        txn.commit().unwrap();

        let txn = db.txn(false);
        assert_eq!(txn.get("person", "age", &[Arg::I64(10)]).unwrap().count(), 0);
        assert_eq!(txn.get("person", "age", &[Arg::I64(11)]).unwrap().count(), 1);
    }

    #[test]
    fn s5_unique_collision() {
        let db = MemDb::new(schema());

        let mut txn = db.txn(true);
        txn.insert("person", person("a@x", "A", 10)).unwrap();
        txn.insert("person", person("a@x", "A", 11)).unwrap();
        txn.commit().unwrap();
        let rows: Vec<_> = db.txn(false).get("person", "id", &[Arg::Str("a@x")]).unwrap().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].age, 11);

        let mut txn = db.txn(true);
        txn.insert("person", person("b@x", "B", 20)).unwrap();
        let err = txn.insert("person", person("c@x", "B", 21)).unwrap_err();
        assert!(matches!(err, Error::UniqueConstraintViolation(_, _)));
    }

    #[test]
    fn s6_watch_fires_on_prefix_change() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        rt.block_on(async {
            let db = MemDb::new(schema());
            let txn = db.txn(false);
            let mut watch_set = WatchSet::new();
            txn.get_watch("person", "id", &[], &mut watch_set).unwrap();

            let writer_db = db.clone();
            let handle = tokio::spawn(async move {
                let mut txn = writer_db.txn(true);
                txn.insert("person", person("joe@aol.com", "Joe", 30)).unwrap();
                txn.commit().unwrap();
            });

            let triggered = watch_set.watch(tokio::time::sleep(std::time::Duration::from_secs(1))).await;
            assert!(triggered);
            handle.await.unwrap();
        });
    }

    #[test]
    fn delete_removes_record_and_secondary_entries() {
        let db = MemDb::new(schema());
        let mut txn = db.txn(true);
        let joe = person("joe@aol.com", "Joe", 30);
        txn.insert("person", joe.clone()).unwrap();
        txn.commit().unwrap();

        let mut txn = db.txn(true);
        txn.delete("person", &joe).unwrap();
        txn.commit().unwrap();

        let txn = db.txn(false);
        assert_eq!(txn.get("person", "id", &[Arg::Str("joe@aol.com")]).unwrap().count(), 0);
        assert_eq!(txn.get("person", "age", &[Arg::I64(30)]).unwrap().count(), 0);
    }

    #[test]
    fn delete_absent_primary_key_is_not_found() {
        let db = MemDb::new(schema());
        let mut txn = db.txn(true);
        let err = txn.delete("person", &person("ghost@x", "Ghost", 1)).unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn delete_all_removes_every_match() {
        let db = MemDb::new(schema());
        let mut txn = db.txn(true);
        txn.insert("person", person("a@x", "A", 30)).unwrap();
        txn.insert("person", person("b@x", "B", 30)).unwrap();
        txn.insert("person", person("c@x", "C", 40)).unwrap();
        txn.commit().unwrap();

        let mut txn = db.txn(true);
        let removed = txn.delete_all("person", "age", &[Arg::I64(30)]).unwrap();
        txn.commit().unwrap();

        assert_eq!(removed, 2);
        let txn = db.txn(false);
        assert_eq!(txn.get("person", "id", &[]).unwrap().count(), 1);
    }

    #[test]
    fn delete_prefix_rejected_on_secondary_index() {
        let db = MemDb::new(schema());
        let mut txn = db.txn(true);
        let err = txn.delete_prefix("person", "age", &[Arg::I64(30)]).unwrap_err();
        assert!(matches!(err, Error::DeletePrefixUnsupported(_)));
    }

    #[test]
    fn delete_prefix_removes_matching_primary_keys() {
        let db = MemDb::new(schema());
        let mut txn = db.txn(true);
        txn.insert("person", person("team@x", "Team", 1)).unwrap();
        txn.insert("person", person("test@x", "Test", 2)).unwrap();
        txn.commit().unwrap();

        let mut txn = db.txn(true);
        let removed = txn.delete_prefix("person", "id", &[Arg::Str("tea")]).unwrap();
        txn.commit().unwrap();
        assert!(removed);

        let txn = db.txn(false);
        assert_eq!(txn.get("person", "id", &[Arg::Str("team@x")]).unwrap().count(), 0);
        assert_ne!(txn.get("person", "id", &[Arg::Str("test@x")]).unwrap().count(), 0);
    }

    #[test]
    fn abort_leaves_published_state_untouched() {
        let db = MemDb::new(schema());
        seed_four(&db);

        let mut txn = db.txn(true);
        txn.insert("person", person("new@x", "New", 99)).unwrap();
        txn.abort().unwrap();

        let txn = db.txn(false);
        assert_eq!(txn.get("person", "id", &[]).unwrap().count(), 4);
    }

    #[test]
    fn readonly_txn_commit_is_a_no_op() {
        let db = MemDb::new(schema());
        seed_four(&db);
        let before = db.diagnostics();

        let txn = db.txn(false);
        let changes = txn.commit().unwrap();
        assert!(changes.is_empty());

        let after = db.diagnostics();
        assert_eq!(before.committed_txns, after.committed_txns);
    }

    #[test]
    fn operating_on_a_closed_transaction_errors() {
        let db = MemDb::new(schema());
        let mut txn = db.txn(true);
        txn.insert("person", person("a@x", "A", 1)).unwrap();
        txn.abort().unwrap();
        let err = txn.insert("person", person("b@x", "B", 2)).unwrap_err();
        assert!(matches!(err, Error::TxnClosed));
    }

    #[test]
    fn track_changes_records_before_and_after() {
        let db = MemDb::new(schema());
        let mut txn = db.txn(true).track_changes();
        txn.insert("person", person("a@x", "A", 1)).unwrap();
        let changes = txn.commit().unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].before.is_none());
        assert_eq!(changes[0].after.as_ref().unwrap().name, "A");

        let mut txn = db.txn(true).track_changes();
        txn.insert("person", person("a@x", "A", 2)).unwrap();
        let changes = txn.commit().unwrap();
        assert_eq!(changes[0].before.as_ref().unwrap().age, 1);
        assert_eq!(changes[0].after.as_ref().unwrap().age, 2);
    }
}
