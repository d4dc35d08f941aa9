//! An embedded, in-memory relational store.
//!
//! A database is declared as a [`Schema`] of tables, each with a mandatory
//! unique primary index named `id` and any number of secondary indexes
//! expressed through small indexer traits rather than reflection. Reads and
//! writes happen inside a [`Txn`] opened from a [`MemDb`]: many read-only
//! transactions may run concurrently against a consistent snapshot while at
//! most one writable transaction is open at a time, and every commit
//! publishes a new root atomically and wakes any [`WatchSet`] watching a
//! scope the write touched.
//!
//! Internally, every index is a persistent (copy-on-write) radix tree —
//! see [`tree`] — so a snapshot held by a reader is never mutated out from
//! under it.

mod db;
mod error;
mod tree;

pub use db::{
    encode_bool, encode_int, encode_string, encode_string_lower, parse_uuid_arg, Arg, ArgsIndexer, ArgsPrefixIndexer,
    BoolFieldIndex, ChangeEntry, CompoundIndex, ConditionalIndex, Cursor, DbConfig, Diagnostics, FieldIndexer,
    IndexOutcome, IndexSchema, IndexerKind, IntArg, IntFieldIndex, IntKey, Keys, MemDb, MultiIndexer, ReverseCursor,
    Schema, SingleIndexer, StringFieldIndex, StringSliceFieldIndex, TableSchema, Txn, UuidFieldIndex, WatchSet,
    PRIMARY_INDEX,
};
pub use error::{Error, Result};
