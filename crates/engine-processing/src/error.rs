use connectors::sql::base::{
    encoder::EncodeError,
    error::{ConnectorError, DbError},
};
use planner::error::PlanError;
use thiserror::Error;

/// Everything that can end one worker's load.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Invalid plan or a mapping that does not fit the input rows.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A row could not be rendered into the wire format.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodeError),

    #[error("Failed to connect: {0}")]
    Connect(#[from] ConnectorError),

    /// The copy stream could not be opened, written, flushed or ended.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: DbError,
    },

    /// Auto-commit, truncate or commit failed.
    #[error("{context}: {source}")]
    Transaction {
        context: String,
        #[source]
        source: DbError,
    },

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// The load was cancelled, usually because a sibling worker failed.
    #[error("Load stopped: {0}")]
    Stopped(String),
}

impl LoadError {
    pub fn transport(context: impl Into<String>, source: DbError) -> Self {
        LoadError::Transport {
            context: context.into(),
            source,
        }
    }

    pub fn transaction(context: impl Into<String>, source: DbError) -> Self {
        LoadError::Transaction {
            context: context.into(),
            source,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, LoadError::Stopped(_))
    }
}

impl From<PlanError> for LoadError {
    fn from(err: PlanError) -> Self {
        LoadError::Configuration(err.to_string())
    }
}
