//! Additive schema reconciliation for SQL Server.
//!
//! This crate provides:
//! - An XML descriptor format for the desired schema ([`descriptor`])
//! - Live schema capture from the server catalogs ([`introspect`])
//! - A reconciler that creates missing tables, columns, indexes and foreign
//!   keys, and never drops or alters anything ([`reconcile`])
//!
//! dbsync does not connect to databases. Every operation takes an
//! [`Executor`], which the caller implements on top of their driver.
//!
//! ```ignore
//! let descriptor = std::fs::File::open("schema.xml")?;
//! let report = dbsync::reconcile(&mut conn, descriptor, &IntrospectOptions::default());
//! print!("{}", report.log);
//! let done = report.into_result()?;
//! for action in &done.applied {
//!     println!("{}", action);
//! }
//! ```
//!
//! # Activity log
//!
//! Each operation returns a [`Report`]: the outcome plus an [`ActivityLog`]
//! of every step it took, including the text of every statement it sent.
//! Entries are also emitted as `tracing` events.

use std::io;

mod activity;
pub mod config;
pub mod descriptor;
mod error;
mod exec;
pub mod introspect;
pub mod reconcile;

pub use activity::{ActivityLog, LogEntry, LogLevel};
pub use config::{Config, IntrospectOptions};
pub use error::{BoxError, Error};
pub use exec::{Executor, ExecutorExt, Row, Traced};
pub use introspect::LiveSchema;
pub use reconcile::{Action, Reconciliation};

pub use dbsync_schema::{
    Column, DuplicateDefinition, ForeignKey, Index, IndexColumn, PrimaryKey, Schema, SeedRecord,
    SeedRecords, SortOrder, Table, Value,
};
pub use dbsync_sql::Statement;

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of an operation together with its activity log.
///
/// The log is filled in whether or not the operation succeeded.
#[derive(Debug)]
pub struct Report<T> {
    pub outcome: Result<T>,
    pub log: ActivityLog,
}

impl<T> Report<T> {
    /// Drop the log and keep the outcome.
    pub fn into_result(self) -> Result<T> {
        self.outcome
    }
}

fn report<T>(run: impl FnOnce(&mut ActivityLog) -> Result<T>) -> Report<T> {
    let mut log = ActivityLog::new();
    let outcome = run(&mut log);
    if let Err(err) = &outcome {
        log.push(LogEntry {
            level: LogLevel::Error,
            message: err.to_string(),
            table: None,
            sql: None,
        });
    }
    Report { outcome, log }
}

/// Snapshot the live schema into a descriptor written to `target`.
///
/// `seeds` supplies the seed records to embed, keyed by table name; records
/// for tables that do not exist live are ignored.
pub fn generate_descriptor<E, W>(
    exec: &mut E,
    target: W,
    seeds: &SeedRecords,
    options: &IntrospectOptions,
) -> Report<()>
where
    E: Executor + ?Sized,
    W: io::Write,
{
    report(|log| {
        log.info("capturing live schema");
        let live = introspect::capture(exec, options, log)?;
        log.info(format!("writing descriptor for {} tables", live.schema.len()));
        descriptor::write(&live.schema, target, seeds)?;
        log.info("descriptor written");
        Ok(())
    })
}

/// Load a descriptor from `source` and bring the live database up to it.
pub fn reconcile<E, R>(exec: &mut E, source: R, options: &IntrospectOptions) -> Report<Reconciliation>
where
    E: Executor + ?Sized,
    R: io::Read,
{
    report(|log| {
        log.info("reading descriptor");
        let desired = descriptor::read(source)?;
        log.info(format!("descriptor describes {} tables", desired.len()));
        reconcile::run(exec, &desired, options, log)
    })
}

/// Bring the live database up to an already loaded schema.
pub fn reconcile_schema<E>(
    exec: &mut E,
    desired: &Schema,
    options: &IntrospectOptions,
) -> Report<Reconciliation>
where
    E: Executor + ?Sized,
{
    report(|log| reconcile::run(exec, desired, options, log))
}
