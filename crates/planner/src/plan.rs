//! The resolved configuration of one bulk load.
//!
//! A `LoadPlan` is read from JSON as supplied by the caller and turned into a
//! [`ValidatedPlan`] before any connection is opened, so configuration
//! mistakes surface before the first byte reaches the database.

use crate::{
    error::PlanError,
    query::{
        ast::{common::TableRef, copy::CsvOptions},
        builder::{copy::CopyBuilder, truncate::TruncateBuilder},
        dialect::Postgres,
        renderer::render_sql,
    },
};
use model::{
    core::data_type::DataType,
    transform::mapping::{ColumnBinding, ColumnMapping},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LoadAction {
    #[default]
    Insert,
    Truncate,
}

impl TryFrom<String> for LoadAction {
    type Error = PlanError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "insert" => Ok(LoadAction::Insert),
            "truncate" => Ok(LoadAction::Truncate),
            _ => Err(PlanError::UnknownLoadAction(s)),
        }
    }
}

impl From<LoadAction> for String {
    fn from(action: LoadAction) -> Self {
        action.to_string()
    }
}

impl fmt::Display for LoadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadAction::Insert => f.write_str("insert"),
            LoadAction::Truncate => f.write_str("truncate"),
        }
    }
}

/// A destination partition served by its own worker and connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionTarget {
    pub id: String,
    /// Falls back to the plan-level connection when absent.
    #[serde(default)]
    pub connection: Option<String>,
}

/// Declared field of a delimited input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// chrono format string used to parse temporal text.
    #[serde(default)]
    pub mask: Option<String>,
}

/// Describes how the CLI reads rows from a delimited text file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub fields: Vec<SourceField>,
    #[serde(default = "default_source_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_true")]
    pub has_headers: bool,
    /// Keep non-string field bytes unconverted so they reach the wire
    /// verbatim.
    #[serde(default)]
    pub lazy_conversion: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPlan {
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    pub bindings: Vec<ColumnBinding>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_quote")]
    pub quote: String,
    #[serde(default)]
    pub load_action: LoadAction,
    #[serde(default = "default_copies")]
    pub copies: usize,
    #[serde(default)]
    pub unique_connections: bool,
    #[serde(default)]
    pub partitions: Vec<PartitionTarget>,
    #[serde(default)]
    pub partition_field: Option<String>,
    #[serde(default)]
    pub source: Option<SourceSpec>,
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_quote() -> String {
    "\"".to_string()
}

fn default_copies() -> usize {
    1
}

fn default_source_delimiter() -> char {
    ','
}

fn default_true() -> bool {
    true
}

impl LoadPlan {
    pub fn from_json(source: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn validate(self) -> Result<ValidatedPlan, PlanError> {
        if self.table.trim().is_empty() {
            return Err(PlanError::Invalid("table name is empty".into()));
        }

        let mapping = ColumnMapping::new(self.bindings)?;
        let delimiter = single_char("delimiter", &self.delimiter)?;
        let quote = single_char("quote", &self.quote)?;
        if delimiter == quote {
            return Err(PlanError::Invalid(format!(
                "delimiter and quote must differ (both are {delimiter:?})"
            )));
        }

        if self.copies == 0 {
            return Err(PlanError::Invalid("copies must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for partition in &self.partitions {
            if !seen.insert(partition.id.as_str()) {
                return Err(PlanError::Invalid(format!(
                    "partition '{}' is declared twice",
                    partition.id
                )));
            }
            if partition.connection.is_none() && self.connection.is_none() {
                return Err(PlanError::Invalid(format!(
                    "partition '{}' has no connection and the plan has no default",
                    partition.id
                )));
            }
        }
        if self.partitions.len() > 1 && self.partition_field.is_none() {
            return Err(PlanError::Invalid(
                "partition_field is required when more than one partition is declared".into(),
            ));
        }

        if let Some(source) = &self.source {
            let names: Vec<&str> = source.fields.iter().map(|f| f.name.as_str()).collect();
            for binding in mapping.bindings() {
                if !names.iter().any(|n| n.eq_ignore_ascii_case(&binding.stream)) {
                    return Err(PlanError::Invalid(format!(
                        "bound field '{}' is not declared in the source fields",
                        binding.stream
                    )));
                }
            }
        }

        Ok(ValidatedPlan {
            connection: self.connection,
            target: TableRef::new(self.schema.as_deref(), &self.table),
            mapping,
            csv: CsvOptions { delimiter, quote },
            load_action: self.load_action,
            copies: self.copies,
            unique_connections: self.unique_connections,
            partitions: self.partitions,
            partition_field: self.partition_field,
            source: self.source,
        })
    }
}

fn single_char(what: &str, value: &str) -> Result<char, PlanError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some('\n' | '\r'), None) => Err(PlanError::Invalid(format!(
            "{what} cannot be a line terminator"
        ))),
        (Some(c), None) => Ok(c),
        _ => Err(PlanError::Invalid(format!(
            "{what} must be exactly one character, got {value:?}"
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub connection: Option<String>,
    pub target: TableRef,
    pub mapping: ColumnMapping,
    pub csv: CsvOptions,
    pub load_action: LoadAction,
    pub copies: usize,
    pub unique_connections: bool,
    pub partitions: Vec<PartitionTarget>,
    pub partition_field: Option<String>,
    pub source: Option<SourceSpec>,
}

impl ValidatedPlan {
    /// Renders the `COPY ... FROM STDIN` command for this load.
    pub fn copy_statement(&self) -> Result<String, PlanError> {
        let copy = CopyBuilder::new(self.target.clone())
            .columns(&self.mapping.table_columns())
            .options(self.csv)
            .build()?;
        Ok(render_sql(&copy, &Postgres))
    }

    pub fn truncate_statement(&self) -> String {
        let truncate = TruncateBuilder::new(self.target.clone()).build();
        render_sql(&truncate, &Postgres)
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partitions.is_empty()
    }

    /// Number of workers the load runs with: one per partition, otherwise
    /// `copies`.
    pub fn worker_count(&self) -> usize {
        if self.is_partitioned() {
            self.partitions.len()
        } else {
            self.copies
        }
    }
}
