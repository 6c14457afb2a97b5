//! An in-memory stand-in for SQL Server.
//!
//! It answers the catalog procedures from its own tables and understands the
//! exact statement shapes `dbsync-sql` renders, so tests can run full
//! reconciliation passes and then look at what the "server" ended up with.

#![allow(dead_code)]

use dbsync::{Column, ForeignKey, Index, IndexColumn, PrimaryKey, Row, Statement, Table, Value};
use indexmap::IndexMap;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FakeError(String);

fn fail<T>(msg: impl Into<String>) -> Result<T, FakeError> {
    Err(FakeError(msg.into()))
}

pub type SeedRow = Vec<(String, Value)>;

#[derive(Debug)]
pub struct FakeServer {
    pub version: String,
    version_unavailable: bool,
    tables: IndexMap<String, Table>,
    /// Tables under owners other than `dbo`.
    foreign_owned: Vec<(String, Table)>,
    /// Raw rows appended to a catalog procedure's answer for one table.
    extra_rows: Vec<(String, String, Row)>,
    rows: IndexMap<String, Vec<SeedRow>>,
    /// Every statement passed to `execute`, in order.
    pub executed: Vec<Statement>,
    /// SQL text of every statement passed to `query`, in order.
    pub queries: Vec<String>,
    rejected: Vec<String>,
    failing_queries: Vec<FailingQuery>,
}

#[derive(Debug)]
struct FailingQuery {
    pattern: String,
    /// Matching queries answered normally before the failures start.
    allowed: usize,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            version: "15.0.2000.5".to_string(),
            version_unavailable: false,
            tables: IndexMap::new(),
            foreign_owned: Vec::new(),
            extra_rows: Vec::new(),
            rows: IndexMap::new(),
            executed: Vec::new(),
            queries: Vec::new(),
            rejected: Vec::new(),
            failing_queries: Vec::new(),
        }
    }

    /// A server too old for the `sys.indexes` catalogs.
    pub fn legacy() -> Self {
        Self {
            version: "8.00.2039".to_string(),
            ..Self::new()
        }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.insert(table.name().to_string(), table);
        self
    }

    /// A server whose version lookup fails.
    pub fn without_version(mut self) -> Self {
        self.version_unavailable = true;
        self
    }

    /// A table owned by `owner` instead of `dbo`.
    pub fn with_owned_table(mut self, owner: &str, table: Table) -> Self {
        self.foreign_owned.push((owner.to_string(), table));
        self
    }

    /// Append `row` to the answer `procedure` (e.g. `sp_fkeys`) gives for
    /// `table`, on top of the rows derived from the stored table.
    pub fn with_catalog_row(mut self, procedure: &str, table: &str, row: Row) -> Self {
        self.extra_rows
            .push((procedure.to_string(), table.to_string(), row));
        self
    }

    /// Reject every executed statement whose SQL contains `pattern`.
    pub fn reject(mut self, pattern: &str) -> Self {
        self.rejected.push(pattern.to_string());
        self
    }

    /// Fail every query whose SQL contains `pattern`.
    pub fn fail_query(self, pattern: &str) -> Self {
        self.fail_query_after(pattern, 0)
    }

    /// Answer the first `allowed` queries containing `pattern`, then fail
    /// every later one.
    pub fn fail_query_after(mut self, pattern: &str, allowed: usize) -> Self {
        self.failing_queries.push(FailingQuery {
            pattern: pattern.to_string(),
            allowed,
        });
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Rows inserted into `table` so far.
    pub fn rows(&self, table: &str) -> &[SeedRow] {
        self.rows.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn executed_sql(&self) -> Vec<&str> {
        self.executed.iter().map(|s| s.sql.as_str()).collect()
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, FakeError> {
        match self.tables.get_mut(name) {
            Some(t) => Ok(t),
            None => fail(format!("Invalid object name '{}'.", name)),
        }
    }

    fn table_param(stmt: &Statement) -> Result<String, FakeError> {
        match stmt.param("@p1") {
            Some(Value::Text(name)) => Ok(name.clone()),
            other => fail(format!("expected a table name parameter, got {:?}", other)),
        }
    }

    /// The owner filter in `@p2`, if one was passed.
    fn owner_param(stmt: &Statement) -> Option<String> {
        match stmt.param("@p2") {
            Some(Value::Text(owner)) => Some(owner.clone()),
            _ => None,
        }
    }

    /// Every stored table with its owner.
    fn owned_tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.tables
            .values()
            .map(|t| ("dbo", t))
            .chain(self.foreign_owned.iter().map(|(o, t)| (o.as_str(), t)))
    }

    /// Tables the catalog procedures answer for: names matched with `like`
    /// (or exactly), owners only when an owner filter was given.
    fn lookup<'a>(
        &'a self,
        name: &'a str,
        owner: Option<&'a str>,
        like: bool,
    ) -> impl Iterator<Item = (&'a str, &'a Table)> + 'a {
        self.owned_tables().filter(move |(o, t)| {
            let name_matches = if like {
                like_match(name, t.name())
            } else {
                t.name() == name
            };
            name_matches && owner.is_none_or(|want| want == *o)
        })
    }

    fn extra(&self, procedure: &str, table: &str) -> impl Iterator<Item = Row> + '_ {
        let procedure = procedure.to_string();
        let table = table.to_string();
        self.extra_rows
            .iter()
            .filter(move |(p, t, _)| *p == procedure && *t == table)
            .map(|(_, _, row)| row.clone())
    }

    fn catalog_tables(&self) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .owned_tables()
            .map(|(owner, t)| table_row(t.name(), owner, "TABLE"))
            .collect();
        rows.push(table_row("dtproperties", "dbo", "TABLE"));
        rows.push(table_row("sysobjects", "sys", "SYSTEM TABLE"));
        rows.push(table_row("vActiveUsers", "dbo", "VIEW"));
        rows
    }

    fn catalog_columns(&self, pattern: &str, owner: Option<&str>) -> Vec<Row> {
        let mut rows = Vec::new();
        for (o, t) in self.lookup(pattern, owner, true) {
            rows.extend(t.columns().iter().map(|c| column_row(o, t.name(), c)));
        }
        rows.extend(self.extra("sp_columns", pattern));
        rows
    }

    fn catalog_primary_key(&self, table: &str, owner: Option<&str>) -> Vec<Row> {
        let mut rows = Vec::new();
        for (o, t) in self.lookup(table, owner, false) {
            let Some(pk) = t.primary_key() else {
                continue;
            };
            let pk_name = pk
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("PK__{}", table));
            rows.extend(
                pk.columns()
                    .iter()
                    .map(|c| primary_key_row(o, table, &pk_name, c)),
            );
        }
        rows.extend(self.extra("sp_pkeys", table));
        rows
    }

    fn catalog_indexes(&self, qualified: &str) -> Result<Vec<Row>, FakeError> {
        let major: u32 = self
            .version
            .split('.')
            .next()
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);
        if major < 9 {
            return fail("Invalid object name 'sys.indexes'.");
        }
        let table = qualified
            .strip_prefix("[dbo].[")
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(qualified);
        let Some(t) = self.tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut indexes: Vec<&Index> = t.indexes().iter().collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        let mut rows = Vec::new();
        for idx in indexes {
            for col in idx.columns() {
                rows.push(
                    Row::new()
                        .with("idx_name", idx.name.as_str())
                        .with(
                            "type_desc",
                            if idx.clustered { "CLUSTERED" } else { "NONCLUSTERED" },
                        )
                        .with("is_unique", idx.unique)
                        .with("col_name", col.name.as_str())
                        .with("is_descending_key", col.order.is_descending()),
                );
            }
        }
        Ok(rows)
    }

    fn catalog_foreign_keys(&self, table: &str, owner: Option<&str>) -> Vec<Row> {
        let mut rows = Vec::new();
        for (o, t) in self.lookup(table, owner, false) {
            rows.extend(t.foreign_keys().iter().map(|fk| {
                foreign_key_row(
                    o,
                    table,
                    &fk.name,
                    &fk.column,
                    &fk.references_table,
                    &fk.references_column,
                )
            }));
        }
        rows.extend(self.extra("sp_fkeys", table));
        rows
    }

    fn apply(&mut self, stmt: &Statement) -> Result<u64, FakeError> {
        let sql = stmt.sql.as_str();
        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            self.create_table(rest)?;
            Ok(0)
        } else if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            self.insert(rest, stmt)?;
            Ok(1)
        } else if let Some(rest) = sql.strip_prefix("ALTER TABLE ") {
            let (table, rest) = take_ident(rest)?;
            if let Some(def) = rest.strip_prefix(" ADD ") {
                let def = def.strip_suffix(';').unwrap_or(def);
                let column = parse_column_def(def)?;
                let t = self.table_mut(&table)?;
                if t.column(&column.name).is_some() {
                    return fail(format!(
                        "Column names in each table must be unique. Column name '{}' in table '{}' is specified more than once.",
                        column.name, table
                    ));
                }
                t.add_column(column).map_err(|e| FakeError(e.to_string()))?;
                Ok(0)
            } else if let Some(rest) = rest.strip_prefix(" WITH CHECK ADD CONSTRAINT ") {
                self.add_foreign_key(&table, rest)?;
                Ok(0)
            } else {
                fail(format!("unsupported ALTER TABLE: {}", sql))
            }
        } else if sql.starts_with("CREATE ") && sql.contains("INDEX ") {
            self.create_index(sql)?;
            Ok(0)
        } else {
            fail(format!("unsupported statement: {}", sql))
        }
    }

    fn create_table(&mut self, rest: &str) -> Result<(), FakeError> {
        let (name, _) = take_ident(rest)?;
        if self.tables.contains_key(&name) {
            return fail(format!(
                "There is already an object named '{}' in the database.",
                name
            ));
        }

        let mut table = Table::new(name.as_str());
        let mut pk: Option<PrimaryKey> = None;
        for line in rest.lines().skip(1) {
            let trimmed = line.trim().trim_end_matches(',');
            if trimmed == ");" || trimmed == ")" {
                continue;
            }
            if let Some(key) = pk.as_mut().filter(|_| line.starts_with("        [")) {
                let (column, _) = take_ident(trimmed)?;
                key.add_column(column).map_err(|e| FakeError(e.to_string()))?;
            } else if let Some(after) = trimmed.strip_prefix("CONSTRAINT ") {
                let (pk_name, _) = take_ident(after)?;
                pk = Some(PrimaryKey::named(pk_name));
            } else if trimmed.starts_with("PRIMARY KEY CLUSTERED") {
                pk = Some(PrimaryKey::new(None));
            } else if trimmed.starts_with('[') {
                let column = parse_column_def(trimmed)?;
                table
                    .add_column(column)
                    .map_err(|e| FakeError(e.to_string()))?;
            } else {
                return fail(format!("unexpected CREATE TABLE line: {:?}", line));
            }
        }
        if let Some(pk) = pk {
            table
                .set_primary_key(pk)
                .map_err(|e| FakeError(e.to_string()))?;
        }
        self.tables.insert(name, table);
        Ok(())
    }

    fn insert(&mut self, rest: &str, stmt: &Statement) -> Result<(), FakeError> {
        let (table, rest) = take_ident(rest)?;
        self.table_mut(&table)?;

        let mut row = SeedRow::new();
        if rest.trim() != "DEFAULT VALUES;" {
            let list = rest
                .trim()
                .strip_prefix('(')
                .and_then(|r| r.split_once(") VALUES ("))
                .map(|(cols, _)| cols)
                .ok_or_else(|| FakeError(format!("malformed INSERT: {}", rest)))?;
            let mut remaining = list;
            for param in &stmt.params {
                let (column, after) = take_ident(remaining.trim_start())?;
                remaining = after.trim_start_matches(',');
                row.push((column, param.value.clone()));
            }
        }
        self.rows.entry(table).or_default().push(row);
        Ok(())
    }

    fn create_index(&mut self, sql: &str) -> Result<(), FakeError> {
        let (head, body) = sql
            .split_once("INDEX ")
            .ok_or_else(|| FakeError(format!("malformed CREATE INDEX: {}", sql)))?;
        let unique = head.contains("UNIQUE ");
        let clustered = head.contains(" CLUSTERED ");
        let (name, rest) = take_ident(body)?;
        let rest = rest
            .strip_prefix(" ON ")
            .ok_or_else(|| FakeError(format!("malformed CREATE INDEX: {}", sql)))?;
        let (table, rest) = take_ident(rest)?;

        let mut index = Index::new(name.as_str(), clustered, unique);
        for line in rest.lines().skip(1) {
            let trimmed = line.trim().trim_end_matches(',');
            if !trimmed.starts_with('[') {
                continue;
            }
            let (column, order) = take_ident(trimmed)?;
            let column = if order.trim() == "DESC" {
                IndexColumn::desc(column)
            } else {
                IndexColumn::new(column)
            };
            index
                .add_column(column)
                .map_err(|e| FakeError(e.to_string()))?;
        }

        let t = self.table_mut(&table)?;
        if t.index(&name).is_some() {
            return fail(format!(
                "The operation failed because an index or statistics with name '{}' already exists on table '{}'.",
                name, table
            ));
        }
        t.add_index(index).map_err(|e| FakeError(e.to_string()))?;
        Ok(())
    }

    fn add_foreign_key(&mut self, table: &str, rest: &str) -> Result<(), FakeError> {
        let (name, rest) = take_ident(rest)?;
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix("FOREIGN KEY (")
            .ok_or_else(|| FakeError(format!("malformed FOREIGN KEY: {}", rest)))?;
        let (column, rest) = take_ident(rest)?;
        let rest = rest.trim_start_matches(')').trim_start();
        let rest = rest
            .strip_prefix("REFERENCES ")
            .ok_or_else(|| FakeError(format!("malformed REFERENCES: {}", rest)))?;
        let (ref_table, rest) = take_ident(rest)?;
        let (ref_column, _) = take_ident(rest.trim_start().trim_start_matches('('))?;

        if !self.tables.contains_key(&ref_table) {
            return fail(format!(
                "Foreign key '{}' references invalid table '{}'.",
                name, ref_table
            ));
        }
        let t = self.table_mut(table)?;
        if t.column(&column).is_none() {
            return fail(format!(
                "Foreign key '{}' references invalid column '{}' in referencing table '{}'.",
                name, column, table
            ));
        }
        t.add_foreign_key(ForeignKey::new(name, column, ref_table, ref_column))
            .map_err(|e| FakeError(e.to_string()))
    }
}

impl dbsync::Executor for FakeServer {
    type Error = FakeError;

    fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>, FakeError> {
        self.queries.push(stmt.sql.clone());
        for failing in self
            .failing_queries
            .iter_mut()
            .filter(|f| stmt.sql.contains(f.pattern.as_str()))
        {
            if failing.allowed == 0 {
                return fail(format!(
                    "connection reset while running query matching {:?}",
                    failing.pattern
                ));
            }
            failing.allowed -= 1;
        }

        let sql = stmt.sql.as_str();
        let owner = Self::owner_param(stmt);
        if sql == "EXEC sp_tables" {
            Ok(self.catalog_tables())
        } else if sql.starts_with("EXEC sp_columns") {
            Ok(self.catalog_columns(&Self::table_param(stmt)?, owner.as_deref()))
        } else if sql.starts_with("EXEC sp_pkeys") {
            Ok(self.catalog_primary_key(&Self::table_param(stmt)?, owner.as_deref()))
        } else if sql.starts_with("EXEC sp_fkeys") {
            Ok(self.catalog_foreign_keys(&Self::table_param(stmt)?, owner.as_deref()))
        } else if sql.contains("FROM sys.indexes") {
            self.catalog_indexes(&Self::table_param(stmt)?)
        } else {
            fail(format!("unsupported query: {}", sql))
        }
    }

    fn execute(&mut self, stmt: &Statement) -> Result<u64, FakeError> {
        self.executed.push(stmt.clone());
        if let Some(p) = self.rejected.iter().find(|p| stmt.sql.contains(p.as_str())) {
            return fail(format!("statement rejected (matches {:?})", p));
        }
        self.apply(stmt)
    }

    fn server_version(&mut self) -> Result<String, FakeError> {
        if self.version_unavailable {
            return fail("login failed");
        }
        Ok(self.version.clone())
    }
}

fn table_row(name: &str, owner: &str, kind: &str) -> Row {
    Row::new()
        .with("TABLE_QUALIFIER", "app")
        .with("TABLE_OWNER", owner)
        .with("TABLE_NAME", name)
        .with("TABLE_TYPE", kind)
        .with("REMARKS", Value::Null)
}

pub fn primary_key_row(owner: &str, table: &str, name: &str, column: &str) -> Row {
    Row::new()
        .with("TABLE_OWNER", owner)
        .with("TABLE_NAME", table)
        .with("COLUMN_NAME", column)
        .with("PK_NAME", name)
}

pub fn foreign_key_row(
    owner: &str,
    table: &str,
    name: &str,
    column: &str,
    references_table: &str,
    references_column: &str,
) -> Row {
    Row::new()
        .with("FK_NAME", name)
        .with("FKTABLE_OWNER", owner)
        .with("FKTABLE_NAME", table)
        .with("FKCOLUMN_NAME", column)
        .with("PKTABLE_NAME", references_table)
        .with("PKCOLUMN_NAME", references_column)
}

/// An `sp_columns` row for a stored column.
pub fn column_row(owner: &str, table: &str, col: &Column) -> Row {
    let (type_name, size) = match col.data_type.split_once('(') {
        Some((base, size)) => {
            let size = size.trim_end_matches(')');
            let size: i64 = if size.eq_ignore_ascii_case("max") {
                0
            } else {
                size.split(',').next().and_then(|s| s.parse().ok()).unwrap_or(0)
            };
            (base.to_string(), size)
        }
        None => (col.data_type.clone(), 4),
    };
    let (length, precision) = match type_name.as_str() {
        "nvarchar" | "nchar" => (size * 2, size),
        _ => (size, size),
    };
    let nullable = if col.options.starts_with("NOT NULL") { 0 } else { 1 };
    let default = col
        .options
        .split_once(" DEFAULT ")
        .map(|(_, d)| Value::Text(d.to_string()))
        .unwrap_or(Value::Null);

    Row::new()
        .with("TABLE_OWNER", owner)
        .with("TABLE_NAME", table)
        .with("COLUMN_NAME", col.name.as_str())
        .with("TYPE_NAME", type_name)
        .with("PRECISION", precision)
        .with("LENGTH", length)
        .with("NULLABLE", nullable)
        .with("COLUMN_DEF", default)
}

/// `LIKE` matching with `%` and `_` wildcards, as `sp_columns` applies to
/// its table name.
fn like_match(pattern: &str, name: &str) -> bool {
    fn go(p: &[char], n: &[char]) -> bool {
        match p.split_first() {
            None => n.is_empty(),
            Some(('%', rest)) => (0..=n.len()).any(|i| go(rest, &n[i..])),
            Some(('_', rest)) => !n.is_empty() && go(rest, &n[1..]),
            Some((c, rest)) => n.first() == Some(c) && go(rest, &n[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    go(&p, &n)
}

/// Split a leading bracketed identifier off `s`.
fn take_ident(s: &str) -> Result<(String, &str), FakeError> {
    let Some(body) = s.strip_prefix('[') else {
        return fail(format!("expected an identifier at {:?}", s));
    };
    let mut name = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == ']' {
            if matches!(chars.peek(), Some((_, ']'))) {
                chars.next();
                name.push(']');
            } else {
                return Ok((name, &body[i + 1..]));
            }
        } else {
            name.push(c);
        }
    }
    fail(format!("unterminated identifier at {:?}", s))
}

/// Parse `[Name] type[(1,1)] [options]` back into a column.
fn parse_column_def(def: &str) -> Result<Column, FakeError> {
    let (name, rest) = take_ident(def.trim())?;
    let rest = rest.trim();
    let split = rest
        .find(" NOT NULL")
        .or_else(|| rest.find(" NULL"));
    let (data_type, options) = match split {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    };
    let data_type = data_type.replace("identity(1,1)", "identity");
    Ok(Column::new(name, data_type, options))
}
