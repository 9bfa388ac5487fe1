use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// Semantic type tag carried by every field of a row schema.
///
/// The tag, not the runtime value, decides how a field is rendered on the
/// COPY wire. Tags the bulk loader cannot render (`Binary`, `Serializable`,
/// `Inet`, `Untyped`) are still representable so upstream schemas can describe
/// them and the encoder can reject them with a precise error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    String,
    Integer,
    Number,
    BigNumber,
    Boolean,
    Date,
    Timestamp,
    Binary,
    Serializable,
    Inet,
    Untyped,
}

lazy_static! {
    static ref TYPE_NAME_MAP: HashMap<&'static str, DataType> = build_type_name_map();
}

impl DataType {
    /// Resolves a type name as it appears in load configuration files.
    pub fn from_name(type_name: &str) -> Result<Self, String> {
        let normalized = Self::normalize_type_name(type_name);
        TYPE_NAME_MAP
            .get(normalized.as_str())
            .copied()
            .ok_or_else(|| format!("Unknown field type: {type_name}"))
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "String",
            DataType::Integer => "Integer",
            DataType::Number => "Number",
            DataType::BigNumber => "BigNumber",
            DataType::Boolean => "Boolean",
            DataType::Date => "Date",
            DataType::Timestamp => "Timestamp",
            DataType::Binary => "Binary",
            DataType::Serializable => "Serializable",
            DataType::Inet => "Internet Address",
            DataType::Untyped => "None",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }

    fn normalize_type_name(type_name: &str) -> String {
        type_name.trim().to_uppercase()
    }
}

impl TryFrom<String> for DataType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        DataType::from_name(&s)
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.name().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn build_type_name_map() -> HashMap<&'static str, DataType> {
    use DataType::*;

    let entries = [
        ("STRING", String),
        ("TEXT", String),
        ("VARCHAR", String),
        ("INTEGER", Integer),
        ("INT", Integer),
        ("BIGINT", Integer),
        ("NUMBER", Number),
        ("FLOAT", Number),
        ("DOUBLE", Number),
        ("BIGNUMBER", BigNumber),
        ("BIG NUMBER", BigNumber),
        ("DECIMAL", BigNumber),
        ("NUMERIC", BigNumber),
        ("BOOLEAN", Boolean),
        ("BOOL", Boolean),
        ("DATE", Date),
        ("TIMESTAMP", Timestamp),
        ("DATETIME", Timestamp),
        ("BINARY", Binary),
        ("BYTEA", Binary),
        ("SERIALIZABLE", Serializable),
        ("INET", Inet),
        ("INTERNET ADDRESS", Inet),
        ("NONE", Untyped),
    ];

    let mut map = HashMap::new();
    for (name, data_type) in entries {
        map.insert(name, data_type);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::DataType;

    #[test]
    fn test_from_name_is_case_insensitive() {
        assert_eq!(DataType::from_name("integer"), Ok(DataType::Integer));
        assert_eq!(DataType::from_name(" BigNumber "), Ok(DataType::BigNumber));
        assert_eq!(DataType::from_name("datetime"), Ok(DataType::Timestamp));
    }

    #[test]
    fn test_from_name_rejects_unknown() {
        let err = DataType::from_name("geometry").unwrap_err();
        assert_eq!(err, "Unknown field type: geometry");
    }

    #[test]
    fn test_serde_uses_type_names() {
        let json = serde_json::to_string(&DataType::Inet).unwrap();
        assert_eq!(json, r#""Internet Address""#);

        let parsed: DataType = serde_json::from_str(r#""number""#).unwrap();
        assert_eq!(parsed, DataType::Number);
    }
}
