use crate::sql::base::encoder::{ColumnPlan, CopyRowEncoder, EncodeError, FieldEncoding};
use bigdecimal::BigDecimal;
use bytes::BytesMut;
use model::core::{
    utils::push_quote_doubled,
    value::{DATE_FORMAT, Value},
};
use planner::query::ast::copy::CsvOptions;
use std::fmt::Write;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[cfg(windows)]
const RECORD_TERMINATOR: &[u8] = b"\r\n";
#[cfg(not(windows))]
const RECORD_TERMINATOR: &[u8] = b"\n";

/// Renders rows as PostgreSQL CSV records for `COPY ... FROM STDIN WITH CSV`.
///
/// Nulls are written as nothing at all between separators, which the server
/// reads back as NULL for unquoted empty fields.
pub struct PgCsvEncoder {
    separator: Vec<u8>,
    quote: Vec<u8>,
}

impl PgCsvEncoder {
    pub fn new(options: CsvOptions) -> Self {
        Self {
            separator: char_bytes(options.delimiter),
            quote: char_bytes(options.quote),
        }
    }

    fn push_quoted(&self, buf: &mut BytesMut, text: &[u8]) {
        buf.extend_from_slice(&self.quote);
        push_quote_doubled(buf, text, &self.quote);
        buf.extend_from_slice(&self.quote);
    }

    fn incompatible(column: &ColumnPlan, value: &Value) -> EncodeError {
        EncodeError::IncompatibleValue {
            field: column.field.clone(),
            data_type: column.data_type,
            kind: value.kind(),
        }
    }
}

fn char_bytes(c: char) -> Vec<u8> {
    let mut tmp = [0u8; 4];
    c.encode_utf8(&mut tmp).as_bytes().to_vec()
}

fn push_float(buf: &mut BytesMut, v: f64) {
    if v.is_nan() {
        buf.extend_from_slice(b"NaN");
    } else if v.is_infinite() {
        let text: &[u8] = if v > 0.0 { b"Infinity" } else { b"-Infinity" };
        buf.extend_from_slice(text);
    } else {
        let mut tmp = ryu::Buffer::new();
        buf.extend_from_slice(tmp.format_finite(v).as_bytes());
    }
}

impl CopyRowEncoder for PgCsvEncoder {
    fn encode_field(
        &self,
        buf: &mut BytesMut,
        column: &ColumnPlan,
        value: &Value,
    ) -> Result<(), EncodeError> {
        match (column.encoding, value) {
            (_, Value::Encoded(raw)) => match column.encoding {
                FieldEncoding::QuotedText => self.push_quoted(buf, raw),
                FieldEncoding::Date | FieldEncoding::DateTime => {
                    return Err(Self::incompatible(column, value));
                }
                _ => buf.extend_from_slice(raw),
            },

            (FieldEncoding::QuotedText, Value::String(s)) => self.push_quoted(buf, s.as_bytes()),
            (FieldEncoding::QuotedText, other) => {
                self.push_quoted(buf, other.to_string().as_bytes())
            }

            (FieldEncoding::Integer, Value::Integer(v)) => write!(buf, "{v}")?,

            (FieldEncoding::Number, Value::Number(v)) => push_float(buf, *v),
            (FieldEncoding::Number, Value::Integer(v)) => push_float(buf, *v as f64),

            (FieldEncoding::BigNumber, Value::BigNumber(v)) => write!(buf, "{v}")?,
            (FieldEncoding::BigNumber, Value::Integer(v)) => {
                write!(buf, "{}", BigDecimal::from(*v))?
            }

            (FieldEncoding::Boolean, Value::Boolean(v)) => {
                let text: &[u8] = if *v { b"true" } else { b"false" };
                buf.extend_from_slice(text)
            }

            (FieldEncoding::TemporalText, Value::String(s)) => buf.extend_from_slice(s.as_bytes()),
            (FieldEncoding::TemporalText, Value::Date(_) | Value::Timestamp(_)) => {
                write!(buf, "{value}")?
            }

            (FieldEncoding::Date, v) => match v.as_datetime() {
                Some(ts) => write!(buf, "{}", ts.date().format(DATE_FORMAT))?,
                None => return Err(Self::incompatible(column, value)),
            },
            (FieldEncoding::DateTime, v) => match v.as_datetime() {
                Some(ts) => write!(buf, "{}", ts.format(DATETIME_FORMAT))?,
                None => return Err(Self::incompatible(column, value)),
            },

            _ => return Err(Self::incompatible(column, value)),
        }
        Ok(())
    }

    fn field_separator(&self) -> &[u8] {
        &self.separator
    }

    fn record_terminator(&self) -> &[u8] {
        RECORD_TERMINATOR
    }
}
