//! Per-call activity log.
//!
//! Each public operation builds its own [`ActivityLog`] and hands it back in
//! its [`Report`](crate::Report). Nothing is shared between calls, so two
//! passes against different databases never see each other's entries.
//!
//! Appending an entry also emits a `tracing` event at the same level.

use std::fmt;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One step of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Table the step was about, if any
    pub table: Option<String>,
    /// Statement text, for entries that record a statement about to run
    pub sql: Option<String>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.level)?;
        if let Some(table) = &self.table {
            write!(f, "{}: ", table)?;
        }
        write!(f, "{}", self.message)
    }
}

/// Ordered, append-only list of log entries.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Vec<LogEntry>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        let table = entry.table.as_deref().unwrap_or("");
        match entry.level {
            LogLevel::Debug => tracing::debug!(table, "{}", entry.message),
            LogLevel::Info => tracing::info!(table, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(table, "{}", entry.message),
            LogLevel::Error => tracing::error!(table, "{}", entry.message),
        }
        self.entries.push(entry);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, None, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warn, None, message);
    }

    pub fn table_debug(&mut self, table: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, Some(table), message);
    }

    pub fn table_info(&mut self, table: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, Some(table), message);
    }

    pub fn table_warn(&mut self, table: &str, message: impl Into<String>) {
        self.log(LogLevel::Warn, Some(table), message);
    }

    pub fn table_error(&mut self, table: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, Some(table), message);
    }

    /// Record a statement before it is sent to the database.
    pub fn statement(&mut self, table: &str, sql: &str) {
        self.push(LogEntry {
            level: LogLevel::Debug,
            message: format!("executing: {}", sql),
            table: Some(table.to_string()),
            sql: Some(sql.to_string()),
        });
    }

    fn log(&mut self, level: LogLevel, table: Option<&str>, message: impl Into<String>) {
        self.push(LogEntry {
            level,
            message: message.into(),
            table: table.map(str::to_string),
            sql: None,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Statements recorded so far, in order.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| e.sql.as_deref())
    }

    /// Entries at `level` or above.
    pub fn at_least(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.level >= level)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ActivityLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}
