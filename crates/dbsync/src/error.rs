use dbsync_schema::DuplicateDefinition;
use thiserror::Error;

/// Boxed error coming out of the execution layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed descriptor: {message}")]
    Parse { message: String },

    #[error("metadata query failed ({query}): {source}")]
    Connectivity {
        query: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Duplicate(#[from] DuplicateDefinition),

    #[error("{action} on table '{table}' was rejected: {source}")]
    StructuralChange {
        action: String,
        table: String,
        #[source]
        source: BoxError,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }

    pub(crate) fn connectivity(query: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Connectivity {
            query: query.into(),
            source: source.into(),
        }
    }
}
