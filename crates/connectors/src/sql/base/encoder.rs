use bytes::BytesMut;
use model::{
    core::{data_type::DataType, value::Value},
    records::row::{Row, RowSchema},
    transform::mapping::{ColumnMapping, FormatMode},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Field '{field}' required by column '{column}' is not present in the input row")]
    MissingField { field: String, column: String },

    #[error("Field '{field}' has type {data_type}, which cannot be bulk loaded")]
    UnsupportedType { field: String, data_type: DataType },

    #[error("Field '{field}' is declared as {data_type} but holds a {kind} value")]
    IncompatibleValue {
        field: String,
        data_type: DataType,
        kind: &'static str,
    },

    #[error("Failed to format field value: {0}")]
    Format(#[from] std::fmt::Error),
}

/// How one bound field is rendered into a CSV record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// Wrapped in quotes with embedded quotes doubled.
    QuotedText,
    Integer,
    /// Shortest round-trip decimal form.
    Number,
    BigNumber,
    Boolean,
    /// Temporal field copied as the upstream text or raw bytes.
    TemporalText,
    /// `YYYY-MM-DD`
    Date,
    /// `YYYY-MM-DD HH:MM:SS.mmm`
    DateTime,
}

impl FieldEncoding {
    /// Selects the rendering for a field type and format mode, or `None`
    /// when the type has no text form the bulk loader accepts.
    pub fn resolve(data_type: DataType, mode: FormatMode) -> Option<Self> {
        use FieldEncoding::*;

        match (data_type, mode) {
            (DataType::String, _) => Some(QuotedText),
            (DataType::Integer, _) => Some(Integer),
            (DataType::Number, _) => Some(Number),
            (DataType::BigNumber, _) => Some(BigNumber),
            (DataType::Boolean, _) => Some(Boolean),
            (DataType::Date | DataType::Timestamp, FormatMode::PassThrough) => Some(TemporalText),
            (DataType::Date | DataType::Timestamp, FormatMode::Date) => Some(Date),
            (DataType::Date | DataType::Timestamp, FormatMode::DateTime) => Some(DateTime),
            (
                DataType::Binary | DataType::Serializable | DataType::Inet | DataType::Untyped,
                _,
            ) => None,
        }
    }
}

/// A bound field resolved against the row schema of the input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    /// Position of the field in every input row.
    pub index: usize,
    pub field: String,
    pub column: String,
    pub data_type: DataType,
    pub encoding: FieldEncoding,
}

/// Resolves every binding of `mapping` against `schema`, in mapping order.
pub fn plan_columns(
    schema: &RowSchema,
    mapping: &ColumnMapping,
) -> Result<Vec<ColumnPlan>, EncodeError> {
    mapping
        .bindings()
        .iter()
        .map(|binding| {
            let index =
                schema
                    .index_of(&binding.stream)
                    .ok_or_else(|| EncodeError::MissingField {
                        field: binding.stream.clone(),
                        column: binding.column.clone(),
                    })?;

            // index_of only returns positions inside the schema
            let meta = &schema.fields()[index];
            let encoding = FieldEncoding::resolve(meta.data_type, binding.format).ok_or_else(
                || EncodeError::UnsupportedType {
                    field: meta.name.clone(),
                    data_type: meta.data_type,
                },
            )?;

            Ok(ColumnPlan {
                index,
                field: meta.name.clone(),
                column: binding.column.clone(),
                data_type: meta.data_type,
                encoding,
            })
        })
        .collect()
}

/// Renders rows into the record format a bulk-copy session expects.
pub trait CopyRowEncoder: Send + Sync {
    /// Appends the text of one non-null field.
    fn encode_field(
        &self,
        buf: &mut BytesMut,
        column: &ColumnPlan,
        value: &Value,
    ) -> Result<(), EncodeError>;

    fn field_separator(&self) -> &[u8];

    fn record_terminator(&self) -> &[u8];

    /// Appends one complete record. Null fields contribute no bytes; a column
    /// past the end of the row is a [`EncodeError::MissingField`]. On error
    /// `buf` may hold a partial record and must be discarded by the caller.
    fn encode_row(
        &self,
        buf: &mut BytesMut,
        columns: &[ColumnPlan],
        row: &Row,
    ) -> Result<(), EncodeError> {
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                buf.extend_from_slice(self.field_separator());
            }
            match row.values().get(column.index) {
                Some(Some(value)) => self.encode_field(buf, column, value)?,
                Some(None) => {}
                None => {
                    return Err(EncodeError::MissingField {
                        field: column.field.clone(),
                        column: column.column.clone(),
                    });
                }
            }
        }
        buf.extend_from_slice(self.record_terminator());
        Ok(())
    }
}
