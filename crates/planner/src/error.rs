use model::transform::mapping::MappingError;
use thiserror::Error;

/// Configuration problems detected while building a load plan or its
/// statements. None of these are retried.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to parse load plan: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid column mapping: {0}")]
    Mapping(#[from] MappingError),

    #[error("No columns given for COPY into {0}")]
    EmptyColumnList(String),

    #[error("Unknown load action '{0}' (expected insert or truncate)")]
    UnknownLoadAction(String),

    #[error("Invalid load plan: {0}")]
    Invalid(String),
}
