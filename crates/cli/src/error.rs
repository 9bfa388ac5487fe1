use connectors::{file::csv::error::FileError, sql::base::error::ConnectorError};
use engine_processing::error::LoadError;
use planner::error::PlanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read the configuration file: {0}")]
    ConfigFileRead(#[from] std::io::Error),

    #[error("Invalid load plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read the input file: {0}")]
    Source(#[from] FileError),

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Connection failed: {0}")]
    Connector(#[from] ConnectorError),

    /// PostgreSQL driver error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
