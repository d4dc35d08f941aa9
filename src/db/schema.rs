//! Schema declaration and construction-time validation. A schema is built
//! once, validated, and never mutated again — every later lookup (table by
//! name, index by name) runs against this immutable structure.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::indexer::{ArgsIndexer, FieldIndexer, MultiIndexer};

/// Either form of key-producing indexer a table may declare. A `Single`
/// indexer is queried directly for both `FromObject` and `FromArgs`/
/// `FromArgsPrefix`, since every built-in field indexer implements all
/// three; a `Multi` indexer needs a separate args indexer because there is
/// no one record-shaped key to project args against.
pub enum IndexerKind<R> {
    Single(Box<dyn FieldIndexer<R>>),
    Multi(Box<dyn MultiIndexer<R>>, Box<dyn ArgsIndexer>),
}

/// One index on a table.
pub struct IndexSchema<R> {
    pub name: String,
    pub unique: bool,
    pub allow_missing: bool,
    pub(crate) indexer: IndexerKind<R>,
}

impl<R> IndexSchema<R> {
    /// A single-value index built from any of the built-in field indexers
    /// (or a caller type implementing the same trio of capabilities).
    pub fn single<I>(name: impl Into<String>, unique: bool, indexer: I) -> Self
    where
        I: FieldIndexer<R> + 'static,
    {
        Self { name: name.into(), unique, allow_missing: false, indexer: IndexerKind::Single(Box::new(indexer)) }
    }

    /// A multi-value index (`FromObjectMulti`); `args` resolves query
    /// arguments to the same encoding the multi indexer would have produced
    /// for one element.
    pub fn multi<I>(name: impl Into<String>, unique: bool, indexer: I, args: impl ArgsIndexer + 'static) -> Self
    where
        I: MultiIndexer<R> + 'static,
    {
        Self {
            name: name.into(),
            unique,
            allow_missing: false,
            indexer: IndexerKind::Multi(Box::new(indexer), Box::new(args)),
        }
    }

    pub fn allow_missing(mut self) -> Self {
        self.allow_missing = true;
        self
    }
}

/// The primary index's reserved name.
pub const PRIMARY_INDEX: &str = "id";

/// One table: its name and its indexes, keyed by name. `indexes["id"]` is
/// always present after [`TableSchema::validate`] and is the primary index.
pub struct TableSchema<R> {
    pub name: String,
    pub(crate) indexes: FxHashMap<String, IndexSchema<R>>,
    pub(crate) index_order: Vec<String>,
}

impl<R> TableSchema<R> {
    pub fn new(name: impl Into<String>, indexes: Vec<IndexSchema<R>>) -> Self {
        let index_order = indexes.iter().map(|i| i.name.clone()).collect();
        let indexes = indexes.into_iter().map(|i| (i.name.clone(), i)).collect();
        Self { name: name.into(), indexes, index_order }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::SchemaInvalid("table name must not be empty".into()));
        }
        if self.indexes.len() != self.index_order.len() {
            return Err(Error::SchemaInvalid(format!("table `{}` declares duplicate index names", self.name)));
        }
        let primary = self.indexes.get(PRIMARY_INDEX).ok_or_else(|| {
            Error::SchemaInvalid(format!("table `{}` has no primary index named `{PRIMARY_INDEX}`", self.name))
        })?;
        if !primary.unique || primary.allow_missing {
            return Err(Error::SchemaInvalid(format!(
                "table `{}`'s primary index must be unique and not allow missing",
                self.name
            )));
        }
        if !matches!(primary.indexer, IndexerKind::Single(_)) {
            return Err(Error::SchemaInvalid(format!(
                "table `{}`'s primary index must be single-valued (built via `IndexSchema::single`)",
                self.name
            )));
        }
        for name in &self.index_order {
            if name.is_empty() {
                return Err(Error::SchemaInvalid(format!("table `{}` has an empty index name", self.name)));
            }
        }
        Ok(())
    }
}

/// The whole database's immutable shape: every table, validated once.
pub struct Schema<R> {
    pub(crate) tables: FxHashMap<String, TableSchema<R>>,
    pub(crate) table_order: Vec<String>,
}

impl<R> Schema<R> {
    pub fn new(tables: Vec<TableSchema<R>>) -> Result<Self> {
        if tables.is_empty() {
            return Err(Error::SchemaInvalid("a database needs at least one table".into()));
        }
        let table_order: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let mut seen = rustc_hash::FxHashSet::default();
        for name in &table_order {
            if !seen.insert(name.clone()) {
                return Err(Error::SchemaInvalid(format!("duplicate table name `{name}`")));
            }
        }
        for table in &tables {
            table.validate()?;
        }
        let tables = tables.into_iter().map(|t| (t.name.clone(), t)).collect();
        Ok(Self { tables, table_order })
    }

    pub fn table(&self, name: &str) -> Result<&TableSchema<R>> {
        self.tables.get(name).ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    pub fn index<'a>(&'a self, table: &str, index: &str) -> Result<&'a IndexSchema<R>> {
        let table_schema = self.table(table)?;
        table_schema
            .indexes
            .get(index)
            .ok_or_else(|| Error::UnknownIndex(table.to_string(), index.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema<R>> {
        self.table_order.iter().map(move |name| &self.tables[name])
    }
}
