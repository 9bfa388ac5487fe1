use crate::file::csv::error::FileError;
use ::csv::{ByteRecord, Reader, ReaderBuilder};
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use model::{
    core::{
        data_type::DataType,
        value::{DATE_FORMAT, TIMESTAMP_FORMAT, Value},
    },
    records::row::{FieldMeta, Row, RowSchema},
};
use planner::plan::{SourceField, SourceSpec};
use std::{fs::File, io::Read, path::Path, str::FromStr, sync::Arc};
use tracing::debug;

/// Reads typed rows from a delimited text file.
///
/// Empty fields become nulls. With lazy conversion, field bytes are kept
/// as-is (`Value::Encoded`) so they reach the wire without a parse/format
/// round trip. Temporal fields that declare a mask, or that are marked with
/// [`convert_fields`](Self::convert_fields), are still parsed.
pub struct CsvRowSource<R: Read = File> {
    reader: Reader<R>,
    schema: Arc<RowSchema>,
    fields: Vec<SourceField>,
    /// Column position in the file of each declared field.
    positions: Vec<usize>,
    /// Fields parsed even under lazy conversion.
    converted: Vec<bool>,
    lazy: bool,
    record: ByteRecord,
    rows_read: u64,
}

impl CsvRowSource<File> {
    pub fn open(path: &Path, spec: &SourceSpec) -> Result<Self, FileError> {
        if !path.exists() {
            return Err(FileError::NotFound(path.display().to_string()));
        }
        let file = File::open(path)?;
        Self::from_reader(file, spec)
    }
}

impl<R: Read> CsvRowSource<R> {
    pub fn from_reader(input: R, spec: &SourceSpec) -> Result<Self, FileError> {
        if !spec.delimiter.is_ascii() {
            return Err(FileError::InvalidFormat(format!(
                "delimiter {:?} is not a single-byte character",
                spec.delimiter
            )));
        }
        if spec.fields.is_empty() {
            return Err(FileError::InvalidFormat("no source fields declared".into()));
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(spec.delimiter as u8)
            .has_headers(spec.has_headers)
            .from_reader(input);

        let positions = if spec.has_headers {
            let headers = reader.byte_headers()?.clone();
            spec.fields
                .iter()
                .map(|field| {
                    headers
                        .iter()
                        .position(|h| {
                            String::from_utf8_lossy(h)
                                .trim()
                                .eq_ignore_ascii_case(&field.name)
                        })
                        .ok_or_else(|| FileError::MissingColumn(field.name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            (0..spec.fields.len()).collect()
        };

        let schema = RowSchema::new(
            spec.fields
                .iter()
                .map(|f| FieldMeta::new(&f.name, f.data_type))
                .collect(),
        );
        debug!(fields = schema.len(), lazy = spec.lazy_conversion, "Opened CSV source");

        let converted = spec
            .fields
            .iter()
            .map(|f| f.data_type.is_temporal() && f.mask.is_some())
            .collect();

        Ok(Self {
            reader,
            schema: Arc::new(schema),
            fields: spec.fields.clone(),
            positions,
            converted,
            lazy: spec.lazy_conversion,
            record: ByteRecord::new(),
            rows_read: 0,
        })
    }

    /// Parses the named temporal fields even under lazy conversion, with the
    /// default date or timestamp format when they declare no mask. Needed for
    /// fields whose destination column applies a date mask.
    pub fn convert_fields<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            for (field, converted) in self.fields.iter().zip(self.converted.iter_mut()) {
                if field.data_type.is_temporal() && field.name.eq_ignore_ascii_case(name) {
                    *converted = true;
                }
            }
        }
        self
    }

    pub fn schema(&self) -> Arc<RowSchema> {
        Arc::clone(&self.schema)
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Returns the next row, or `None` at end of input.
    pub fn next_row(&mut self) -> Result<Option<Row>, FileError> {
        if !self.reader.read_byte_record(&mut self.record)? {
            return Ok(None);
        }
        let line = self.record.position().map(|p| p.line()).unwrap_or(0);

        let mut values = Vec::with_capacity(self.fields.len());
        for ((field, &pos), &converted) in self.fields.iter().zip(&self.positions).zip(&self.converted) {
            let raw = self.record.get(pos).unwrap_or_default();
            let value = if raw.is_empty() {
                None
            } else {
                Some(parse_field(field, raw, self.lazy && !converted, line)?)
            };
            values.push(value);
        }
        self.rows_read += 1;

        let row = Row::new(Arc::clone(&self.schema), values)
            .map_err(|e| FileError::InvalidFormat(e.to_string()))?;
        Ok(Some(row))
    }
}

fn parse_field(field: &SourceField, raw: &[u8], lazy: bool, line: u64) -> Result<Value, FileError> {
    if lazy {
        return Ok(Value::Encoded(raw.to_vec()));
    }

    let parse_err = |expected: &str| FileError::Parse {
        line,
        field: field.name.clone(),
        text: String::from_utf8_lossy(raw).into_owned(),
        expected: expected.to_string(),
    };
    let text = std::str::from_utf8(raw).map_err(|_| parse_err("UTF-8 text"))?;

    let value = match field.data_type {
        DataType::String => Value::String(text.to_string()),
        DataType::Integer => Value::Integer(text.trim().parse().map_err(|_| parse_err("integer"))?),
        DataType::Number => Value::Number(text.trim().parse().map_err(|_| parse_err("number"))?),
        DataType::BigNumber => Value::BigNumber(
            BigDecimal::from_str(text.trim()).map_err(|_| parse_err("big number"))?,
        ),
        DataType::Boolean => Value::Boolean(parse_bool(text).ok_or_else(|| parse_err("boolean"))?),
        DataType::Date => {
            let mask = field.mask.as_deref().unwrap_or(DATE_FORMAT);
            Value::Date(NaiveDate::parse_from_str(text.trim(), mask).map_err(|_| parse_err(mask))?)
        }
        DataType::Timestamp => {
            let mask = field.mask.as_deref().unwrap_or(TIMESTAMP_FORMAT);
            Value::Timestamp(
                NaiveDateTime::parse_from_str(text.trim(), mask).map_err(|_| parse_err(mask))?,
            )
        }
        DataType::Binary | DataType::Serializable | DataType::Inet | DataType::Untyped => {
            Value::Encoded(raw.to_vec())
        }
    };
    Ok(value)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spec(json: &str) -> SourceSpec {
        serde_json::from_str(json).unwrap()
    }

    fn sales_spec(lazy: bool) -> SourceSpec {
        spec(&format!(
            r#"{{
                "fields": [
                    {{ "name": "amt", "type": "Number" }},
                    {{ "name": "d", "type": "Date", "mask": "%d/%m/%Y" }},
                    {{ "name": "note", "type": "String" }}
                ],
                "lazy_conversion": {lazy}
            }}"#
        ))
    }

    #[test]
    fn test_reads_typed_rows_by_header_name() {
        let data = "note,d,amt\n\"a, b\",01/03/2024,19.99\n,,\n";
        let mut source = CsvRowSource::from_reader(data.as_bytes(), &sales_spec(false)).unwrap();

        let row = source.next_row().unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Number(19.99)));
        assert_eq!(
            row.get(1),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
        );
        assert_eq!(row.get(2), Some(&Value::String("a, b".into())));

        let row = source.next_row().unwrap().unwrap();
        assert!(row.values().iter().all(Option::is_none));

        assert!(source.next_row().unwrap().is_none());
        assert_eq!(source.rows_read(), 2);
    }

    #[test]
    fn test_lazy_conversion_keeps_raw_bytes() {
        let data = "amt,d,note\n019.990,01/03/2024,x\n";
        let mut source = CsvRowSource::from_reader(data.as_bytes(), &sales_spec(true)).unwrap();

        let row = source.next_row().unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Encoded(b"019.990".to_vec())));
        // masked temporal fields are still parsed
        assert!(matches!(row.get(1), Some(Value::Date(_))));
        assert_eq!(row.get(2), Some(&Value::Encoded(b"x".to_vec())));
    }

    #[test]
    fn test_lazy_temporal_field_converted_with_default_format() {
        let spec = spec(
            r#"{
                "fields": [
                    { "name": "d", "type": "Date" },
                    { "name": "ts", "type": "Timestamp" }
                ],
                "lazy_conversion": true
            }"#,
        );
        let data = "d,ts\n2024-03-01,2024-03-01 10:00:00\n";

        let mut source = CsvRowSource::from_reader(data.as_bytes(), &spec)
            .unwrap()
            .convert_fields(["D"]);
        let row = source.next_row().unwrap().unwrap();

        assert_eq!(
            row.get(0),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
        );
        // not marked, so still raw
        assert_eq!(row.get(1), Some(&Value::Encoded(b"2024-03-01 10:00:00".to_vec())));
    }

    #[test]
    fn test_parse_error_names_line_and_field() {
        let data = "amt,d,note\n1.5,01/03/2024,x\nabc,01/03/2024,y\n";
        let mut source = CsvRowSource::from_reader(data.as_bytes(), &sales_spec(false)).unwrap();
        source.next_row().unwrap();

        let err = source.next_row().unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Line 3: cannot parse field 'amt' value "abc" as number"#
        );
    }

    #[test]
    fn test_missing_header_column() {
        let data = "amt,note\n1,x\n";
        let err = CsvRowSource::from_reader(data.as_bytes(), &sales_spec(false))
            .err()
            .unwrap();
        assert!(matches!(err, FileError::MissingColumn(name) if name == "d"));
    }

    #[test]
    fn test_open_without_headers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "7|true").unwrap();
        let spec = spec(
            r#"{
                "fields": [{ "name": "id", "type": "Integer" }, { "name": "ok", "type": "Boolean" }],
                "delimiter": "|",
                "has_headers": false
            }"#,
        );

        let mut source = CsvRowSource::open(file.path(), &spec).unwrap();
        let row = source.next_row().unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Integer(7)));
        assert_eq!(row.get(1), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_open_missing_file() {
        let err = CsvRowSource::open(Path::new("/nonexistent/input.csv"), &sales_spec(false))
            .err()
            .unwrap();
        assert!(matches!(err, FileError::NotFound(_)));
    }
}
