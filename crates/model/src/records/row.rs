use crate::core::{data_type::DataType, value::Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("Row has {actual} values but its schema declares {expected} fields")]
    ArityMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldMeta {
    pub name: String,
    pub data_type: DataType,
}

impl FieldMeta {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }
}

/// Ordered field descriptions shared by every row of one upstream stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RowSchema {
    fields: Vec<FieldMeta>,
}

impl RowSchema {
    pub fn new(fields: Vec<FieldMeta>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&FieldMeta> {
        self.fields.get(index)
    }

    /// Finds a field by name, preferring an exact match over a
    /// case-insensitive one.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .or_else(|| {
                self.fields
                    .iter()
                    .position(|f| f.name.eq_ignore_ascii_case(name))
            })
    }
}

/// One immutable upstream row. `None` marks a null field.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: Arc<RowSchema>,
    values: Vec<Option<Value>>,
}

impl Row {
    pub fn new(schema: Arc<RowSchema>, values: Vec<Option<Value>>) -> Result<Self, RowError> {
        if schema.len() != values.len() {
            return Err(RowError::ArityMismatch {
                expected: schema.len(),
                actual: values.len(),
            });
        }
        Ok(Row { schema, values })
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(|v| v.as_ref())
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).and_then(|i| self.get(i))
    }

    pub fn size_bytes(&self) -> usize {
        self.values
            .iter()
            .flatten()
            .map(|v| v.size_bytes())
            .sum()
    }
}
