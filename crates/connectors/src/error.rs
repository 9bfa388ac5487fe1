use crate::sql::base::error::ConnectorError;
use thiserror::Error;

/// Failure to pick or open a destination adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// The connection string names a driver this loader does not speak.
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Missing required property: {0}")]
    MissingProperty(String),
}
