//! DDL and seed-row statements.
//!
//! Every function here renders exactly one statement. Foreign keys and
//! indexes are never part of `CREATE TABLE`; they are added separately so the
//! tables they depend on exist first.

use crate::{Ident, Statement, placeholder};
use dbsync_schema::{Column, ForeignKey, Index, SeedRecord, Table};

/// Seed and increment given to every identity column.
pub const IDENTITY_SEED: (i64, i64) = (1, 1);

/// Column definition as used in `CREATE TABLE` and `ALTER TABLE ... ADD`.
///
/// Identity columns get an explicit `(seed,increment)` right after the type.
pub fn column_definition(col: &Column) -> String {
    let mut def = format!("{} {}", Ident(&col.name), col.data_type.trim_end());
    if col.is_identity() {
        def.push_str(&format!("({},{})", IDENTITY_SEED.0, IDENTITY_SEED.1));
    }
    if !col.options.trim().is_empty() {
        def.push(' ');
        def.push_str(col.options.trim());
    }
    def
}

/// Generate the CREATE TABLE statement: columns in declared order, then the
/// primary key as a clustered constraint with every key column ascending.
///
/// Seed records are not included, see [`insert_seed_record`].
pub fn create_table(table: &Table) -> Statement {
    let mut sql = format!("CREATE TABLE {} (\n", Ident(table.name()));

    let mut parts: Vec<String> = table
        .columns()
        .iter()
        .map(|col| format!("    {}", column_definition(col)))
        .collect();

    if let Some(pk) = table.primary_key().filter(|pk| !pk.is_empty()) {
        let constraint = match pk.name() {
            Some(name) => format!("CONSTRAINT {} ", Ident(name)),
            None => String::new(),
        };
        let key_columns: Vec<String> = pk
            .columns()
            .iter()
            .map(|c| format!("        {} ASC", Ident(c)))
            .collect();
        parts.push(format!(
            "    {}PRIMARY KEY CLUSTERED (\n{}\n    )",
            constraint,
            key_columns.join(",\n")
        ));
    }

    sql.push_str(&parts.join(",\n"));
    sql.push_str("\n);");

    Statement::new(sql)
}

/// Generate a parameterized INSERT for one seed record, columns in the
/// record's insertion order.
pub fn insert_seed_record(table_name: &str, record: &SeedRecord) -> Statement {
    if record.is_empty() {
        return Statement::new(format!("INSERT INTO {} DEFAULT VALUES;", Ident(table_name)));
    }

    let columns: Vec<String> = record
        .values()
        .map(|(column, _)| Ident(column).to_string())
        .collect();
    let placeholders: Vec<String> = (0..record.len()).map(placeholder).collect();

    let stmt = Statement::new(format!(
        "INSERT INTO {} ({}) VALUES ({});",
        Ident(table_name),
        columns.join(", "),
        placeholders.join(", ")
    ));
    record
        .values()
        .fold(stmt, |stmt, (_, value)| stmt.bind(value.clone()))
}

/// Generate `ALTER TABLE ... ADD` for a single column.
pub fn add_column(table_name: &str, col: &Column) -> Statement {
    Statement::new(format!(
        "ALTER TABLE {} ADD {};",
        Ident(table_name),
        column_definition(col)
    ))
}

/// Generate CREATE INDEX honoring the unique and clustered flags and the
/// sort order of every column.
pub fn create_index(table_name: &str, idx: &Index) -> Statement {
    let unique = if idx.unique { "UNIQUE " } else { "" };
    let clustered = if idx.clustered {
        "CLUSTERED "
    } else {
        "NONCLUSTERED "
    };
    let columns: Vec<String> = idx
        .columns()
        .iter()
        .map(|c| format!("    {}{}", Ident(&c.name), c.order.to_sql()))
        .collect();

    Statement::new(format!(
        "CREATE {}{}INDEX {} ON {} (\n{}\n);",
        unique,
        clustered,
        Ident(&idx.name),
        Ident(table_name),
        columns.join(",\n")
    ))
}

/// Generate a single-column foreign key constraint. `WITH CHECK` makes the
/// server validate rows already in the table.
pub fn add_foreign_key(table_name: &str, fk: &ForeignKey) -> Statement {
    Statement::new(format!(
        "ALTER TABLE {} WITH CHECK ADD CONSTRAINT {}\n    FOREIGN KEY ({})\n    REFERENCES {} ({});",
        Ident(table_name),
        Ident(&fk.name),
        Ident(&fk.column),
        Ident(&fk.references_table),
        Ident(&fk.references_column)
    ))
}
