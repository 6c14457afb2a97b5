//! Schema model types for dbsync.
//!
//! This crate contains the in-memory description of a relational schema that
//! is shared between the descriptor codec, the introspector and the DDL
//! renderer in `dbsync-sql`.
//!
//! Every named element (table, column, index, foreign key) is unique within
//! its owner. The `add_*` methods enforce that and return a
//! [`DuplicateDefinition`] instead of silently replacing anything.

use indexmap::IndexMap;
use indexmap::map::Entry;
use std::fmt;

mod value;
pub use value::{Value, parse_bool};

/// Suffix of a data-type token that marks an auto-increment column.
pub const IDENTITY_MARKER: &str = "identity";

/// A named element was added twice to the same owner.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DuplicateDefinition {
    #[error("table '{0}' already exists in the schema")]
    Table(String),

    #[error("table '{table}' already has a column named '{column}'")]
    Column { table: String, column: String },

    #[error("table '{table}' already has a primary key")]
    PrimaryKey { table: String },

    #[error("column '{column}' is already part of the primary key")]
    PrimaryKeyColumn { column: String },

    #[error("table '{table}' already has an index named '{index}'")]
    Index { table: String, index: String },

    #[error("column '{column}' is already part of index '{index}'")]
    IndexColumn { index: String, column: String },

    #[error("table '{table}' already has a foreign key named '{name}'")]
    ForeignKey { table: String, name: String },

    #[error("column '{column}' already has a value assigned")]
    SeedValue { column: String },
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Engine-specific type token, e.g. `varchar(50)` or `int identity`
    pub data_type: String,
    /// Nullability plus default clause, e.g. `NOT NULL DEFAULT ((0))`
    pub options: String,
}

impl Column {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            options: options.into(),
        }
    }

    /// Whether the type token ends with the identity marker.
    pub fn is_identity(&self) -> bool {
        self.data_type
            .trim_end()
            .to_ascii_lowercase()
            .ends_with(IDENTITY_MARKER)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if !self.options.is_empty() {
            write!(f, " {}", self.options)?;
        }
        Ok(())
    }
}

/// A primary key. Column order is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryKey {
    name: Option<String>,
    columns: Vec<String>,
}

impl PrimaryKey {
    /// An empty name is the same as no name.
    pub fn new(name: Option<String>) -> Self {
        Self {
            name: name.filter(|n| !n.is_empty()),
            columns: Vec::new(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(Some(name.into()))
    }

    /// Constraint name, if known.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Key columns, in key order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn add_column(&mut self, column: impl Into<String>) -> Result<(), DuplicateDefinition> {
        let column = column.into();
        if self.columns.contains(&column) {
            return Err(DuplicateDefinition::PrimaryKeyColumn { column });
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Sort order for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending order (default)
    #[default]
    Asc,
    /// Descending order
    Desc,
}

impl SortOrder {
    pub fn from_descending(descending: bool) -> Self {
        if descending {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    pub fn is_descending(self) -> bool {
        self == SortOrder::Desc
    }

    /// Returns the SQL keyword for this sort order, or empty string for ASC (default).
    pub fn to_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "",
            SortOrder::Desc => " DESC",
        }
    }
}

/// A column in an index with its sort order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    /// Column name
    pub name: String,
    /// Sort order (ASC or DESC)
    pub order: SortOrder,
}

impl IndexColumn {
    /// Create a new index column with ascending order.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Asc,
        }
    }

    /// Create a new index column with descending order.
    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Desc,
        }
    }
}

/// A (non-primary) index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name
    pub name: String,
    /// Whether this is the clustered index of the table
    pub clustered: bool,
    /// Whether this is a unique index
    pub unique: bool,
    columns: Vec<IndexColumn>,
}

impl Index {
    pub fn new(name: impl Into<String>, clustered: bool, unique: bool) -> Self {
        Self {
            name: name.into(),
            clustered,
            unique,
            columns: Vec::new(),
        }
    }

    /// Indexed columns, in index order.
    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn add_column(&mut self, column: IndexColumn) -> Result<(), DuplicateDefinition> {
        if self.columns.iter().any(|c| c.name == column.name) {
            return Err(DuplicateDefinition::IndexColumn {
                index: self.name.clone(),
                column: column.name,
            });
        }
        self.columns.push(column);
        Ok(())
    }

    /// Builder form of [`Index::add_column`].
    pub fn with_column(mut self, column: IndexColumn) -> Result<Self, DuplicateDefinition> {
        self.add_column(column)?;
        Ok(self)
    }
}

/// A single-column foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    /// Constraint name
    pub name: String,
    /// Column in this table
    pub column: String,
    /// Referenced table
    pub references_table: String,
    /// Referenced column
    pub references_column: String,
}

impl ForeignKey {
    pub fn new(
        name: impl Into<String>,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
        }
    }
}

/// One row inserted into a table right after the table is created.
///
/// Values keep the order they were assigned in, which is also the column
/// order of the generated insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedRecord {
    values: IndexMap<String, Value>,
}

impl SeedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a value to a column. Each column may be assigned once.
    pub fn set(
        &mut self,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), DuplicateDefinition> {
        match self.values.entry(column.into()) {
            Entry::Occupied(e) => Err(DuplicateDefinition::SeedValue {
                column: e.key().clone(),
            }),
            Entry::Vacant(e) => {
                e.insert(value.into());
                Ok(())
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Column/value pairs in assignment order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for SeedRecord {
    /// Shows at most two values, then a count of the rest.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return write!(f, "(no values)");
        }
        let shown: Vec<String> = self
            .values
            .iter()
            .take(2)
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", shown.join(", "))?;
        if self.values.len() > 2 {
            write!(f, ", {} other...", self.values.len() - 2)?;
        }
        Ok(())
    }
}

/// Seed records grouped by table name, supplied alongside a schema when a
/// descriptor is generated.
#[derive(Debug, Clone, Default)]
pub struct SeedRecords {
    tables: IndexMap<String, Vec<SeedRecord>>,
}

impl SeedRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an empty record for `table` and return it for filling in.
    pub fn add_record(&mut self, table: impl Into<String>) -> &mut SeedRecord {
        let records = self.tables.entry(table.into()).or_default();
        records.push(SeedRecord::new());
        let last = records.len() - 1;
        &mut records[last]
    }

    /// Records for `table`, empty if none were supplied.
    pub fn for_table(&self, table: &str) -> &[SeedRecord] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    primary_key: Option<PrimaryKey>,
    indexes: Vec<Index>,
    foreign_keys: Vec<ForeignKey>,
    seed_records: Vec<SeedRecord>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            seed_records: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn add_column(&mut self, column: Column) -> Result<(), DuplicateDefinition> {
        if self.column(&column.name).is_some() {
            return Err(DuplicateDefinition::Column {
                table: self.name.clone(),
                column: column.name,
            });
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn primary_key(&self) -> Option<&PrimaryKey> {
        self.primary_key.as_ref()
    }

    /// Set the primary key. A table has at most one.
    pub fn set_primary_key(&mut self, key: PrimaryKey) -> Result<(), DuplicateDefinition> {
        if self.primary_key.is_some() {
            return Err(DuplicateDefinition::PrimaryKey {
                table: self.name.clone(),
            });
        }
        self.primary_key = Some(key);
        Ok(())
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn index_mut(&mut self, name: &str) -> Option<&mut Index> {
        self.indexes.iter_mut().find(|i| i.name == name)
    }

    pub fn add_index(&mut self, index: Index) -> Result<&mut Index, DuplicateDefinition> {
        if self.index(&index.name).is_some() {
            return Err(DuplicateDefinition::Index {
                table: self.name.clone(),
                index: index.name,
            });
        }
        self.indexes.push(index);
        let last = self.indexes.len() - 1;
        Ok(&mut self.indexes[last])
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    pub fn add_foreign_key(&mut self, fk: ForeignKey) -> Result<(), DuplicateDefinition> {
        if self.foreign_key(&fk.name).is_some() {
            return Err(DuplicateDefinition::ForeignKey {
                table: self.name.clone(),
                name: fk.name,
            });
        }
        self.foreign_keys.push(fk);
        Ok(())
    }

    pub fn seed_records(&self) -> &[SeedRecord] {
        &self.seed_records
    }

    pub fn add_seed_record(&mut self, record: SeedRecord) {
        self.seed_records.push(record);
    }

    /// A copy holding only what `CREATE TABLE` produces: columns and primary key.
    pub fn created_shape(&self) -> Table {
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            primary_key: self.primary_key.clone(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            seed_records: Vec::new(),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} columns", self.name, self.columns.len())?;
        if let Some(pk) = &self.primary_key {
            write!(f, ", primary key {}", pk.columns().join(", "))?;
        }
        write!(f, ")")
    }
}

/// A complete database schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    tables: IndexMap<String, Table>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty table and return it for filling in.
    pub fn add_table(&mut self, name: impl Into<String>) -> Result<&mut Table, DuplicateDefinition> {
        match self.tables.entry(name.into()) {
            Entry::Occupied(e) => Err(DuplicateDefinition::Table(e.key().clone())),
            Entry::Vacant(e) => {
                let table = Table::new(e.key().clone());
                Ok(e.insert(table))
            }
        }
    }

    /// Add a fully built table.
    pub fn insert_table(&mut self, table: Table) -> Result<(), DuplicateDefinition> {
        match self.tables.entry(table.name.clone()) {
            Entry::Occupied(e) => Err(DuplicateDefinition::Table(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(table);
                Ok(())
            }
        }
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Iterate over all tables, in insertion order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
