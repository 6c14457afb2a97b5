//! Live schema capture.
//!
//! Reads the catalog of a running SQL Server through the system procedures
//! (`sp_tables`, `sp_columns`, `sp_pkeys`, `sp_fkeys`) and, on servers new
//! enough to have them, the `sys.indexes` views.

use crate::config::IntrospectOptions;
use crate::error::BoxError;
use crate::exec::{Executor, ExecutorExt, Row, Traced};
use crate::{ActivityLog, Error, Result};
use dbsync_schema::{
    Column, DuplicateDefinition, ForeignKey, Index, IndexColumn, PrimaryKey, Schema, SortOrder,
    Table,
};
use dbsync_sql::{Statement, quote_ident};

pub const TABLES_QUERY: &str = "EXEC sp_tables";
// `@p1` is the table name and `@p2` its owner. `sp_columns` matches the name
// as a LIKE pattern, so rows are checked against both again on the way in.
pub const COLUMNS_QUERY: &str = "EXEC sp_columns @table_name = @p1, @table_owner = @p2";
pub const PRIMARY_KEYS_QUERY: &str = "EXEC sp_pkeys @table_name = @p1, @table_owner = @p2";
pub const FOREIGN_KEYS_QUERY: &str =
    "EXEC sp_fkeys @fktable_name = @p1, @fktable_owner = @p2";

/// Non-primary indexes of one table (`@p1` is the qualified table name),
/// one row per key column in key order. Heaps and included columns are left
/// out.
pub const INDEXES_QUERY: &str = "SELECT idx.name AS idx_name, idx.type_desc, idx.is_unique, \
cols.name AS col_name, ixc.is_descending_key
FROM sys.indexes idx
JOIN sys.index_columns ixc ON ixc.object_id = idx.object_id AND ixc.index_id = idx.index_id
JOIN sys.columns cols ON cols.object_id = ixc.object_id AND cols.column_id = ixc.column_id
WHERE idx.object_id = OBJECT_ID(@p1)
  AND idx.is_primary_key = 0
  AND idx.type <> 0
  AND ixc.is_included_column = 0
ORDER BY idx.name, ixc.key_ordinal;";

/// Largest size written inline in a type token; anything above is `(max)`.
const MAX_INLINE_LENGTH: i64 = 8000;

/// A captured live schema.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSchema {
    pub schema: Schema,
    /// False when the server was too old for the index catalogs, in which
    /// case no table in `schema` carries indexes.
    pub indexes_captured: bool,
}

/// Capture the live schema visible through `exec`.
///
/// Any query that fails, or returns rows that cannot be decoded, fails the
/// whole capture.
pub fn capture<E: Executor + ?Sized>(
    exec: &mut E,
    options: &IntrospectOptions,
    log: &mut ActivityLog,
) -> Result<LiveSchema> {
    let mut db = exec.traced();

    let version = db
        .server_version()
        .map_err(|e| Error::connectivity("server version", e))?;
    let major = server_major(&version)?;
    let indexes_captured = major >= options.extended_index_min_major;
    if !indexes_captured {
        log.warn(format!(
            "server version {} has no extended index catalogs; indexes are not captured",
            version
        ));
    }

    log.info("reading database tables");
    let names = list_tables(&mut db, options)?;
    log.info(format!("found {} tables", names.len()));

    let mut schema = Schema::new();
    for name in names {
        log.table_debug(&name, "capturing table");
        let table = capture_table(&mut db, &name, options, indexes_captured, log)?;
        schema.insert_table(table)?;
    }

    Ok(LiveSchema {
        schema,
        indexes_captured,
    })
}

/// Major component of a dotted version string such as `"15.0.2000.5"`.
pub fn server_major(version: &str) -> Result<u32> {
    version
        .trim()
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .ok_or_else(|| {
            Error::connectivity(
                "server version",
                format!("unrecognized version string {:?}", version),
            )
        })
}

fn list_tables<E: Executor + ?Sized>(
    db: &mut Traced<'_, E>,
    options: &IntrospectOptions,
) -> Result<Vec<String>> {
    let stmt = Statement::new(TABLES_QUERY);
    let rows = fetch(db, &stmt)?;

    let mut names = Vec::new();
    for row in &rows {
        let name = decode(&stmt, row.text("TABLE_NAME"))?;
        let owner = decode(&stmt, row.text("TABLE_OWNER"))?;
        let kind = decode(&stmt, row.text("TABLE_TYPE"))?;
        if owner == options.owner && kind == "TABLE" && !options.is_excluded(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

fn capture_table<E: Executor + ?Sized>(
    db: &mut Traced<'_, E>,
    name: &str,
    options: &IntrospectOptions,
    with_indexes: bool,
    log: &mut ActivityLog,
) -> Result<Table> {
    let mut table = Table::new(name);

    let owner = options.owner.as_str();

    log.table_debug(name, "reading columns");
    let stmt = Statement::new(COLUMNS_QUERY).bind(name).bind(owner);
    for row in fetch(db, &stmt)? {
        if !decode(&stmt, belongs_to(&row, "TABLE_OWNER", "TABLE_NAME", owner, name))? {
            continue;
        }
        table.add_column(decode(&stmt, column_from_row(&row))?)?;
    }

    log.table_debug(name, "reading primary key");
    let stmt = Statement::new(PRIMARY_KEYS_QUERY).bind(name).bind(owner);
    let mut pk: Option<PrimaryKey> = None;
    for row in fetch(db, &stmt)? {
        if !decode(&stmt, belongs_to(&row, "TABLE_OWNER", "TABLE_NAME", owner, name))? {
            continue;
        }
        let key_name = decode(&stmt, row.text("PK_NAME"))?;
        let column = decode(&stmt, row.text("COLUMN_NAME"))?;
        let key = pk.get_or_insert_with(|| PrimaryKey::named(key_name.clone()));
        if key.name() != Some(key_name.as_str()) {
            return Err(DuplicateDefinition::PrimaryKey {
                table: name.to_string(),
            }
            .into());
        }
        key.add_column(column)?;
    }
    if let Some(pk) = pk {
        table.set_primary_key(pk)?;
    }

    if with_indexes {
        log.table_debug(name, "reading indexes");
        let qualified = format!("{}.{}", quote_ident(owner), quote_ident(name));
        let stmt = Statement::new(INDEXES_QUERY).bind(qualified);
        for row in fetch(db, &stmt)? {
            let idx_name = decode(&stmt, row.text("idx_name"))?;
            let column = IndexColumn {
                name: decode(&stmt, row.text("col_name"))?,
                order: SortOrder::from_descending(decode(
                    &stmt,
                    row.flag("is_descending_key"),
                )?),
            };
            match table.index_mut(&idx_name) {
                Some(idx) => idx.add_column(column)?,
                None => {
                    let clustered = decode(&stmt, row.text("type_desc"))? == "CLUSTERED";
                    let unique = decode(&stmt, row.flag("is_unique"))?;
                    table
                        .add_index(Index::new(idx_name, clustered, unique))?
                        .add_column(column)?;
                }
            }
        }
    }

    log.table_debug(name, "reading foreign keys");
    let stmt = Statement::new(FOREIGN_KEYS_QUERY).bind(name).bind(owner);
    for row in fetch(db, &stmt)? {
        if !decode(&stmt, belongs_to(&row, "FKTABLE_OWNER", "FKTABLE_NAME", owner, name))? {
            continue;
        }
        let fk_name = decode(&stmt, row.text("FK_NAME"))?;
        if table.foreign_key(&fk_name).is_some() {
            log.table_warn(
                name,
                format!(
                    "foreign key '{}' spans several columns; only the first is kept",
                    fk_name
                ),
            );
            continue;
        }
        table.add_foreign_key(ForeignKey::new(
            fk_name,
            decode(&stmt, row.text("FKCOLUMN_NAME"))?,
            decode(&stmt, row.text("PKTABLE_NAME"))?,
            decode(&stmt, row.text("PKCOLUMN_NAME"))?,
        ))?;
    }

    log.table_debug(name, format!("captured {}", table));
    Ok(table)
}

/// Whether a catalog row describes `owner.table` exactly.
fn belongs_to(
    row: &Row,
    owner_key: &str,
    table_key: &str,
    owner: &str,
    table: &str,
) -> std::result::Result<bool, BoxError> {
    Ok(row.text(owner_key)? == owner && row.text(table_key)? == table)
}

fn column_from_row(row: &Row) -> std::result::Result<Column, BoxError> {
    let name = row.text("COLUMN_NAME")?;
    let type_name = row.text("TYPE_NAME")?;
    let default = row.text("COLUMN_DEF")?;
    let nullable = row.integer("NULLABLE")? != 0;

    let size = match type_name.to_ascii_lowercase().as_str() {
        "varchar" | "char" | "varbinary" | "binary" => Some(row.integer("LENGTH")?),
        "nvarchar" | "nchar" => Some(row.integer("PRECISION")?),
        _ => None,
    };
    let data_type = match size {
        Some(size) if size <= 0 || size > MAX_INLINE_LENGTH => format!("{}(max)", type_name),
        Some(size) => format!("{}({})", type_name, size),
        None => type_name,
    };

    let mut options = if nullable { "NULL" } else { "NOT NULL" }.to_string();
    if !default.is_empty() {
        options.push_str(" DEFAULT ");
        options.push_str(&default);
    }

    Ok(Column::new(name, data_type, options))
}

fn fetch<E: Executor + ?Sized>(db: &mut Traced<'_, E>, stmt: &Statement) -> Result<Vec<Row>> {
    db.query(stmt)
        .map_err(|e| Error::connectivity(stmt.sql.as_str(), e))
}

fn decode<T>(
    stmt: &Statement,
    value: std::result::Result<T, BoxError>,
) -> Result<T> {
    value.map_err(|e| Error::connectivity(stmt.sql.as_str(), e))
}
