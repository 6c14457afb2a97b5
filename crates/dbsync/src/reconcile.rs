//! Diffing a desired schema against the live one and applying the difference.
//!
//! Reconciliation only ever adds structure. Elements are matched by name, so
//! a same-named column, index or key that differs in shape is left alone.
//!
//! A pass runs four phases, one after the other:
//!
//! 1. create the tables missing live (columns, primary key, seed records)
//! 2. recapture the live schema if anything was created
//! 3. add missing columns and indexes to tables that exist
//! 4. add missing foreign keys
//!
//! Foreign keys come last so every table they can reference exists by then.

use crate::config::IntrospectOptions;
use crate::exec::{Executor, ExecutorExt};
use crate::introspect::{self, LiveSchema};
use crate::{ActivityLog, Error, Result};
use dbsync_schema::{Column, ForeignKey, Index, Schema, Table};
use dbsync_sql::Statement;
use std::collections::HashSet;
use std::fmt;

/// One corrective change.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create a table with its columns and primary key, then insert its seed
    /// records.
    CreateTable(Table),
    AddColumn { table: String, column: Column },
    AddIndex { table: String, index: Index },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
}

impl Action {
    /// Name of the table this action changes.
    pub fn table(&self) -> &str {
        match self {
            Action::CreateTable(t) => t.name(),
            Action::AddColumn { table, .. }
            | Action::AddIndex { table, .. }
            | Action::AddForeignKey { table, .. } => table,
        }
    }

    /// Short description used in error messages, e.g. `add index IX_Name`.
    pub fn describe(&self) -> String {
        match self {
            Action::CreateTable(_) => "create table".to_string(),
            Action::AddColumn { column, .. } => format!("add column {}", column.name),
            Action::AddIndex { index, .. } => format!("add index {}", index.name),
            Action::AddForeignKey { foreign_key, .. } => {
                format!("add foreign key {}", foreign_key.name)
            }
        }
    }

    /// The statements this action runs, in order. Creating a table yields
    /// the `CREATE TABLE` followed by one insert per seed record.
    pub fn statements(&self) -> Vec<Statement> {
        match self {
            Action::CreateTable(t) => std::iter::once(dbsync_sql::create_table(t))
                .chain(
                    t.seed_records()
                        .iter()
                        .map(|r| dbsync_sql::insert_seed_record(t.name(), r)),
                )
                .collect(),
            Action::AddColumn { table, column } => vec![dbsync_sql::add_column(table, column)],
            Action::AddIndex { table, index } => vec![dbsync_sql::create_index(table, index)],
            Action::AddForeignKey { table, foreign_key } => {
                vec![dbsync_sql::add_foreign_key(table, foreign_key)]
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::CreateTable(t) => write!(f, "+ table {}", t.name()),
            Action::AddColumn { table, column } => {
                write!(f, "+ column {}.{} {}", table, column.name, column.data_type)
            }
            Action::AddIndex { table, index } => write!(f, "+ index {}.{}", table, index.name),
            Action::AddForeignKey { table, foreign_key } => write!(
                f,
                "+ foreign key {}.{} -> {}.{}",
                table,
                foreign_key.name,
                foreign_key.references_table,
                foreign_key.references_column
            ),
        }
    }
}

/// What a pass did.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Actions whose structural change went through, in execution order.
    /// A created table is listed even if one of its seed inserts failed.
    pub applied: Vec<Action>,

    /// Every rejected statement, as a [`Error::StructuralChange`].
    pub failures: Vec<Error>,
}

impl Reconciliation {
    /// True if the pass found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.failures.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Phase 1: a `CreateTable` for each desired table absent from `live`.
pub fn missing_tables(desired: &Schema, live: &Schema) -> Vec<Action> {
    desired
        .tables()
        .filter(|t| !live.contains_table(t.name()))
        .map(|t| Action::CreateTable(t.clone()))
        .collect()
}

/// Phase 3: missing columns, then missing indexes, per existing table.
/// Index actions are only planned when `indexes_captured` is true.
pub fn missing_columns_and_indexes(
    desired: &Schema,
    live: &Schema,
    indexes_captured: bool,
) -> Vec<Action> {
    let mut actions = Vec::new();
    for want in desired.tables() {
        let Some(have) = live.table(want.name()) else {
            continue;
        };
        for column in want.columns() {
            if have.column(&column.name).is_none() {
                actions.push(Action::AddColumn {
                    table: want.name().to_string(),
                    column: column.clone(),
                });
            }
        }
        if !indexes_captured {
            continue;
        }
        for index in want.indexes() {
            if have.index(&index.name).is_none() {
                actions.push(Action::AddIndex {
                    table: want.name().to_string(),
                    index: index.clone(),
                });
            }
        }
    }
    actions
}

/// Phase 4: missing foreign keys per existing table.
pub fn missing_foreign_keys(desired: &Schema, live: &Schema) -> Vec<Action> {
    let mut actions = Vec::new();
    for want in desired.tables() {
        let Some(have) = live.table(want.name()) else {
            continue;
        };
        for fk in want.foreign_keys() {
            if have.foreign_key(&fk.name).is_none() {
                actions.push(Action::AddForeignKey {
                    table: want.name().to_string(),
                    foreign_key: fk.clone(),
                });
            }
        }
    }
    actions
}

/// Dry run: the actions a pass would take, without touching anything.
///
/// Tables it would create are assumed to come back with their columns and
/// primary key only, as a recapture after `CREATE TABLE` would see them.
pub fn plan(desired: &Schema, live: &Schema, indexes_captured: bool) -> Vec<Action> {
    let mut actions = missing_tables(desired, live);

    let mut after_create = live.clone();
    for action in &actions {
        if let Action::CreateTable(t) = action {
            // cannot collide: the table was missing from `live`
            let _ = after_create.insert_table(t.created_shape());
        }
    }

    actions.extend(missing_columns_and_indexes(
        desired,
        &after_create,
        indexes_captured,
    ));
    actions.extend(missing_foreign_keys(desired, &after_create));
    actions
}

/// Run a full pass, appending every step to `log`.
///
/// Only a failed capture ends the pass early. Rejected statements are
/// collected in [`Reconciliation::failures`].
pub(crate) fn run<E: Executor + ?Sized>(
    exec: &mut E,
    desired: &Schema,
    options: &IntrospectOptions,
    log: &mut ActivityLog,
) -> Result<Reconciliation> {
    let mut result = Reconciliation::default();
    let mut live = introspect::capture(exec, options, log)?;

    let creates = missing_tables(desired, &live.schema);
    log.info(format!("{} tables to create", creates.len()));
    let mut created = Vec::new();
    for action in creates {
        if let Action::CreateTable(table) = &action {
            if create_table(exec, table, &mut result, log) {
                created.push(table.name().to_string());
                result.applied.push(action);
            }
        }
    }

    if !created.is_empty() {
        log.info(format!("recapturing after creating {}", created.join(", ")));
        live = introspect::capture(exec, options, log)?;
    }
    warn_unreconciled(desired, &live, log);

    let changes = missing_columns_and_indexes(desired, &live.schema, live.indexes_captured);
    log.info(format!("{} columns and indexes to add", changes.len()));
    apply_phase(exec, changes, &mut result, log);

    let changes = missing_foreign_keys(desired, &live.schema);
    log.info(format!("{} foreign keys to add", changes.len()));
    apply_phase(exec, changes, &mut result, log);

    log.info(format!(
        "reconciliation finished: {} applied, {} failed",
        result.applied.len(),
        result.failures.len()
    ));
    Ok(result)
}

fn warn_unreconciled(desired: &Schema, live: &LiveSchema, log: &mut ActivityLog) {
    for want in desired.tables() {
        if !live.schema.contains_table(want.name()) {
            log.table_warn(want.name(), "table is not present live; skipping it");
        } else if !live.indexes_captured && !want.indexes().is_empty() {
            log.table_warn(
                want.name(),
                "index catalogs unavailable on this server; indexes are not reconciled",
            );
        }
    }
}

/// Create one table and insert its seed records. Returns whether the table
/// itself was created.
fn create_table<E: Executor + ?Sized>(
    exec: &mut E,
    table: &Table,
    result: &mut Reconciliation,
    log: &mut ActivityLog,
) -> bool {
    log.table_info(table.name(), "creating table");
    let stmt = dbsync_sql::create_table(table);
    if let Err(err) = execute(exec, table.name(), "create table", &stmt, log) {
        record_failure(result, err, log);
        return false;
    }

    for record in table.seed_records() {
        let stmt = dbsync_sql::insert_seed_record(table.name(), record);
        let action = format!("insert seed record ({})", record);
        if let Err(err) = execute(exec, table.name(), &action, &stmt, log) {
            record_failure(result, err, log);
            log.table_warn(table.name(), "remaining seed records skipped");
            break;
        }
    }
    true
}

/// Apply a phase. Once an action on a table fails, the rest of that table's
/// actions in this phase are skipped.
fn apply_phase<E: Executor + ?Sized>(
    exec: &mut E,
    actions: Vec<Action>,
    result: &mut Reconciliation,
    log: &mut ActivityLog,
) {
    let mut failed: HashSet<String> = HashSet::new();
    for action in actions {
        if failed.contains(action.table()) {
            log.table_warn(
                action.table(),
                format!("skipped {} after an earlier failure", action.describe()),
            );
            continue;
        }
        log.table_info(action.table(), action.describe());

        let outcome = action.statements().iter().try_for_each(|stmt| {
            execute(exec, action.table(), &action.describe(), stmt, log)
        });
        match outcome {
            Ok(()) => result.applied.push(action),
            Err(err) => {
                failed.insert(action.table().to_string());
                record_failure(result, err, log);
            }
        }
    }
}

fn execute<E: Executor + ?Sized>(
    exec: &mut E,
    table: &str,
    action: &str,
    stmt: &Statement,
    log: &mut ActivityLog,
) -> Result<()> {
    log.statement(table, &stmt.to_script());
    exec.traced()
        .execute(stmt)
        .map(|_| ())
        .map_err(|e| Error::StructuralChange {
            action: action.to_string(),
            table: table.to_string(),
            source: e.into(),
        })
}

fn record_failure(result: &mut Reconciliation, err: Error, log: &mut ActivityLog) {
    if let Error::StructuralChange { table, .. } = &err {
        log.table_error(table, err.to_string());
    }
    result.failures.push(err);
}
