//! The relational layer built over [`crate::tree`]: schema validation, the
//! indexer capability traits, the database transaction engine, and the
//! `MemDb` root that publishes committed state.

mod encoding;
mod indexer;
mod memdb;
mod schema;
mod txn;
mod watch;

pub use encoding::{encode_bool, encode_int, encode_string, encode_string_lower, parse_uuid_arg, IntKey};
pub use indexer::{
    Arg, ArgsIndexer, ArgsPrefixIndexer, BoolFieldIndex, CompoundIndex, ConditionalIndex, FieldIndexer, IndexOutcome,
    IntArg, IntFieldIndex, Keys, MultiIndexer, SingleIndexer, StringFieldIndex, StringSliceFieldIndex, UuidFieldIndex,
};
pub use memdb::{DbConfig, Diagnostics, MemDb};
pub use schema::{IndexSchema, IndexerKind, Schema, TableSchema, PRIMARY_INDEX};
pub use txn::{ChangeEntry, Cursor, ReverseCursor, Txn};
pub use watch::WatchSet;
