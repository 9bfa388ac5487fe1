use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("No fields defined to load to database")]
    EmptyMapping,

    #[error("Unknown date format mode '{0}' (expected pass_through, date or datetime)")]
    UnknownFormatMode(String),

    #[error("Table column '{0}' is mapped more than once")]
    DuplicateColumn(String),
}

/// How a temporal field is rendered on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormatMode {
    /// Keep the upstream value's own text or raw bytes.
    #[default]
    PassThrough,
    /// `YYYY-MM-DD`
    Date,
    /// `YYYY-MM-DD HH:MM:SS.mmm`
    DateTime,
}

impl FormatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatMode::PassThrough => "pass_through",
            FormatMode::Date => "date",
            FormatMode::DateTime => "datetime",
        }
    }
}

impl FromStr for FormatMode {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "pass_through" | "pass through" | "passthrough" => Ok(FormatMode::PassThrough),
            "date" => Ok(FormatMode::Date),
            "datetime" => Ok(FormatMode::DateTime),
            _ => Err(MappingError::UnknownFormatMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for FormatMode {
    type Error = MappingError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FormatMode> for String {
    fn from(mode: FormatMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for FormatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps one upstream field onto one destination column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBinding {
    /// Field name in the upstream row schema.
    pub stream: String,
    /// Column name in the destination table.
    pub column: String,
    #[serde(default)]
    pub format: FormatMode,
}

impl ColumnBinding {
    pub fn new(stream: &str, column: &str) -> Self {
        Self {
            stream: stream.to_string(),
            column: column.to_string(),
            format: FormatMode::PassThrough,
        }
    }

    pub fn with_format(mut self, format: FormatMode) -> Self {
        self.format = format;
        self
    }
}

/// Ordered, non-empty list of bindings. The order defines both the column
/// list of the COPY command and the field order of every emitted record.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    bindings: Vec<ColumnBinding>,
}

impl ColumnMapping {
    pub fn new(bindings: Vec<ColumnBinding>) -> Result<Self, MappingError> {
        if bindings.is_empty() {
            return Err(MappingError::EmptyMapping);
        }

        for (i, binding) in bindings.iter().enumerate() {
            if bindings[..i].iter().any(|b| b.column == binding.column) {
                return Err(MappingError::DuplicateColumn(binding.column.clone()));
            }
        }

        Ok(Self { bindings })
    }

    pub fn bindings(&self) -> &[ColumnBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn table_columns(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.column.as_str()).collect()
    }
}
