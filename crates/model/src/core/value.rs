use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single non-null field value as produced by the upstream pipeline.
///
/// `Encoded` carries bytes that are already in their wire form (for example a
/// field read from a text file without conversion). Encoders pass them through
/// verbatim wherever the column's type allows it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Number(f64),
    BigNumber(BigDecimal),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Encoded(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Number(_) => "number",
            Value::BigNumber(_) => "big number",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::Encoded(_) => "encoded bytes",
        }
    }

    /// Returns the calendar value of temporal variants. Dates are widened to
    /// midnight.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            Value::String(s) => s.len(),
            Value::Integer(_) => std::mem::size_of::<i64>(),
            Value::Number(_) => std::mem::size_of::<f64>(),
            Value::BigNumber(v) => v.digits() as usize,
            Value::Boolean(_) => std::mem::size_of::<bool>(),
            Value::Date(_) => std::mem::size_of::<NaiveDate>(),
            Value::Timestamp(_) => std::mem::size_of::<NaiveDateTime>(),
            Value::Encoded(b) => b.len(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(v) => f.write_str(v),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Number(v) => write!(f, "{v}"),
            Value::BigNumber(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            Value::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
            Value::Encoded(v) => f.write_str(&String::from_utf8_lossy(v)),
        }
    }
}
