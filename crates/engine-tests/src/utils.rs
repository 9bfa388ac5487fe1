#![allow(dead_code)]

use chrono::NaiveDate;
use connectors::sql::capture::{CaptureAdapter, CapturedCall};
use engine_processing::{
    error::LoadError,
    loader::{
        context::LoadContext,
        coordinator::LoadCoordinator,
        fleet::{FleetReport, LoadFleet},
    },
};
use model::{
    core::{data_type::DataType, value::Value},
    records::row::{FieldMeta, Row, RowSchema},
};
use planner::plan::{LoadPlan, ValidatedPlan};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_postgres::Client;

#[cfg(windows)]
pub const TERMINATOR: &str = "\r\n";
#[cfg(not(windows))]
pub const TERMINATOR: &str = "\n";

/// `COPY` command expected for [`sales_plan`].
pub const SALES_COPY: &str = r#"COPY "public"."sales" ( "amount", "sale_date" ) FROM STDIN WITH CSV DELIMITER AS ',' QUOTE AS '"';"#;

/// DDL for the table the sales scenarios load into.
pub const SALES_TABLE_DDL: &str = r#"
    CREATE TABLE public.sales (
        amount numeric(12, 2),
        sale_date date
    );
"#;

/// Parse & validate a JSON load plan, panicking on any error
pub fn plan(json: &str) -> Arc<ValidatedPlan> {
    Arc::new(
        LoadPlan::from_json(json)
            .expect("parse plan")
            .validate()
            .expect("valid plan"),
    )
}

/// Plan for `public."sales"` with `amt -> amount` and `d -> sale_date` in
/// date mode.
pub fn sales_plan(load_action: &str, copies: usize) -> Arc<ValidatedPlan> {
    plan(&format!(
        r#"{{
            "schema": "public",
            "table": "\"sales\"",
            "bindings": [
                {{ "stream": "amt", "column": "amount" }},
                {{ "stream": "d", "column": "sale_date", "format": "date" }}
            ],
            "load_action": "{load_action}",
            "copies": {copies}
        }}"#
    ))
}

pub fn schema(fields: &[(&str, DataType)]) -> Arc<RowSchema> {
    Arc::new(RowSchema::new(
        fields
            .iter()
            .map(|(name, data_type)| FieldMeta::new(name, *data_type))
            .collect(),
    ))
}

pub fn row(schema: &Arc<RowSchema>, values: Vec<Option<Value>>) -> Row {
    Row::new(Arc::clone(schema), values).expect("row matches schema")
}

pub fn sales_schema() -> Arc<RowSchema> {
    schema(&[("amt", DataType::Number), ("d", DataType::Date)])
}

pub fn sales_row(amount: f64, y: i32, m: u32, d: u32) -> Row {
    let date = NaiveDate::from_ymd_opt(y, m, d).expect("valid date");
    row(
        &sales_schema(),
        vec![Some(Value::Number(amount)), Some(Value::Date(date))],
    )
}

/// Drives a single worker over `rows` against `adapter`.
pub async fn load_single(
    plan: Arc<ValidatedPlan>,
    adapter: &CaptureAdapter,
    rows: Vec<Row>,
) -> Result<u64, LoadError> {
    let mut coordinator =
        LoadCoordinator::new(plan, LoadContext::single(), Arc::new(adapter.clone()))?;
    let (tx, mut rx) = mpsc::channel(rows.len().max(1));
    for row in rows {
        tx.send(row).await.expect("channel open");
    }
    drop(tx);
    coordinator.run(&mut rx).await
}

/// Feeds `rows` to `fleet` from a separate task and waits for the report.
pub async fn run_fleet(fleet: LoadFleet, rows: Vec<Row>) -> FleetReport {
    let (tx, rx) = mpsc::channel(16);
    let producer = tokio::spawn(async move {
        for row in rows {
            if tx.send(row).await.is_err() {
                break;
            }
        }
    });
    let report = fleet.run_to_report(rx).await;
    producer.await.expect("producer task");
    report
}

/// Splits a captured stream into records, dropping the terminators.
pub fn records(stream: &str) -> Vec<&str> {
    stream
        .split_terminator(TERMINATOR)
        .collect()
}

pub fn count_calls(adapter: &CaptureAdapter, pred: impl Fn(&CapturedCall) -> bool) -> usize {
    adapter.calls().iter().filter(|&c| pred(c)).count()
}

/// Every character is an ASCII digit, or equals the byte at the same
/// position of `shape` when that byte is not `9`.
pub fn matches_shape(text: &str, shape: &str) -> bool {
    text.len() == shape.len()
        && text.bytes().zip(shape.bytes()).all(|(t, s)| match s {
            b'9' => t.is_ascii_digit(),
            _ => t == s,
        })
}

pub async fn execute(client: &Client, sql: &str) {
    client
        .batch_execute(sql)
        .await
        .unwrap_or_else(|e| panic!("execute {sql}: {e}"));
}

pub async fn get_row_count(client: &Client, table: &str) -> i64 {
    let query = format!("SELECT COUNT(*) FROM {table};");
    let row = client.query_one(&query, &[]).await.expect("count rows");
    row.get(0)
}
