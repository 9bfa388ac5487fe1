use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Column '{0}' is not present in the file header")]
    MissingColumn(String),

    #[error("Line {line}: cannot parse field '{field}' value {text:?} as {expected}")]
    Parse {
        line: u64,
        field: String,
        text: String,
        expected: String,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] ::csv::Error),
}
