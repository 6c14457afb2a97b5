//! Configuration types.
//!
//! These are plain serde types; locating and reading the file is left to the
//! front end (see `dbsync-cli`). Every field has a default, so an empty file
//! and no file at all behave the same.

use camino::Utf8PathBuf;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Descriptor file to reconcile against, relative to the directory
    /// holding `.config/`
    pub descriptor: Option<Utf8PathBuf>,

    /// How the live database is introspected
    pub introspect: IntrospectOptions,
}

/// Options that shape how the live schema is captured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntrospectOptions {
    /// Only tables owned by this schema are captured
    pub owner: String,

    /// Tables that are never captured, even when owned by `owner`
    pub excluded_tables: Vec<String>,

    /// Lowest server major version whose `sys.indexes` catalog is queried.
    /// Older servers get no index capture and no index reconciliation.
    pub extended_index_min_major: u32,
}

impl Default for IntrospectOptions {
    fn default() -> Self {
        Self {
            owner: "dbo".to_string(),
            excluded_tables: vec!["dtproperties".to_string()],
            extended_index_min_major: 9,
        }
    }
}

impl IntrospectOptions {
    pub fn is_excluded(&self, table: &str) -> bool {
        self.excluded_tables.iter().any(|t| t == table)
    }
}
