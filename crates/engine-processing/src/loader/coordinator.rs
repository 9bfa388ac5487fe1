use crate::{
    error::LoadError,
    loader::{
        context::{LoadContext, TruncateGate},
        session::{CopySession, SessionState},
    },
    metrics::LoadMetrics,
};
use connectors::sql::{
    base::{
        adapter::SqlAdapter,
        encoder::{ColumnPlan, plan_columns},
    },
    postgres::encoder::PgCsvEncoder,
};
use model::records::row::{Row, RowSchema};
use planner::plan::{LoadAction, ValidatedPlan};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives one worker's load: transaction setup, the optional truncate, the
/// copy session and the final commit.
///
/// Callers either step through [`init`](Self::init), [`feed`](Self::feed)
/// and [`finish`](Self::finish) themselves, or hand a channel to
/// [`run`](Self::run).
pub struct LoadCoordinator {
    plan: Arc<ValidatedPlan>,
    context: LoadContext,
    adapter: Arc<dyn SqlAdapter>,
    gate: TruncateGate,
    session: CopySession,
    /// Column plan and the row schema it was resolved against.
    columns: Option<(Arc<RowSchema>, Vec<ColumnPlan>)>,
    output: Option<mpsc::Sender<Row>>,
    metrics: LoadMetrics,
    cancel: CancellationToken,
    initialized: bool,
    truncated: bool,
}

impl LoadCoordinator {
    pub fn new(
        plan: Arc<ValidatedPlan>,
        context: LoadContext,
        adapter: Arc<dyn SqlAdapter>,
    ) -> Result<Self, LoadError> {
        let statement = plan.copy_statement()?;
        let encoder = Box::new(PgCsvEncoder::new(plan.csv));

        Ok(Self {
            plan,
            context,
            adapter,
            gate: TruncateGate::new(),
            session: CopySession::new(statement, encoder),
            columns: None,
            output: None,
            metrics: LoadMetrics::new(),
            cancel: CancellationToken::new(),
            initialized: false,
            truncated: false,
        })
    }

    /// Shares the truncate election with sibling workers.
    pub fn with_gate(mut self, gate: TruncateGate) -> Self {
        self.gate = gate;
        self
    }

    /// Rows are forwarded unchanged to `output` after they are written.
    pub fn with_output(mut self, output: mpsc::Sender<Row>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: LoadMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn context(&self) -> &LoadContext {
        &self.context
    }

    pub fn metrics(&self) -> &LoadMetrics {
        &self.metrics
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Turns auto-commit off and runs the truncate if this worker is elected
    /// for it. Returns whether the table was truncated.
    pub async fn init(&mut self) -> Result<bool, LoadError> {
        if self.initialized {
            return Err(LoadError::InvalidState("load already initialized".into()));
        }
        self.initialized = true;

        self.adapter
            .set_auto_commit(false)
            .await
            .map_err(|e| LoadError::transaction("Failed to disable auto-commit", e))?;

        if self.plan.load_action == LoadAction::Truncate {
            self.truncated = self.truncate_if_elected().await?;
        }
        Ok(self.truncated)
    }

    async fn truncate_if_elected(&mut self) -> Result<bool, LoadError> {
        if !self.context.is_truncate_candidate() {
            debug!(worker = %self.context, "Not a truncate candidate, skipping truncate");
            return Ok(false);
        }
        if !self.gate.claim(&self.context.truncate_scope()) {
            debug!(worker = %self.context, "Truncate already claimed for this scope");
            return Ok(false);
        }

        let table = &self.plan.target;
        info!(worker = %self.context, table = %table, "Truncating table");
        self.adapter
            .truncate_table(table)
            .await
            .map_err(|e| LoadError::transaction(format!("Failed to truncate table {table}"), e))?;

        // Concurrent copies would otherwise queue behind the truncate's lock.
        if self.context.copies > 1 {
            self.adapter
                .commit()
                .await
                .map_err(|e| LoadError::transaction("Failed to commit truncate", e))?;
            debug!(worker = %self.context, "Truncate committed");
        }
        Ok(true)
    }

    /// Writes one row. The first row resolves the column plan and opens the
    /// copy session.
    pub async fn feed(&mut self, row: Row) -> Result<(), LoadError> {
        if self.cancel.is_cancelled() {
            return Err(LoadError::Stopped("load was cancelled".into()));
        }

        let stale = match &self.columns {
            None => true,
            Some((schema, _)) => !Arc::ptr_eq(schema, row.schema()) && schema != row.schema(),
        };
        if stale {
            let columns = plan_columns(row.schema(), &self.plan.mapping)
                .map_err(|e| LoadError::Configuration(e.to_string()))?;
            let first = self.columns.is_none();
            if first {
                debug!(worker = %self.context, columns = columns.len(), "Column plan resolved");
            } else {
                debug!(worker = %self.context, "Row schema changed, column plan re-resolved");
            }
            self.columns = Some((Arc::clone(row.schema()), columns));
            if first {
                self.session.open(self.adapter.as_ref()).await?;
            }
        }
        let Some((_, columns)) = &self.columns else {
            return Err(LoadError::InvalidState("column plan missing".into()));
        };

        let bytes = self.session.write_row(columns, &row).await?;
        self.metrics.increment_rows(1);
        self.metrics.increment_bytes(bytes as u64);

        if let Some(output) = &self.output {
            if output.send(row).await.is_err() {
                debug!(worker = %self.context, "Downstream receiver closed, no longer forwarding rows");
                self.output = None;
            } else {
                self.metrics.increment_forwarded(1);
            }
        }
        Ok(())
    }

    /// Ends the copy and commits. An input without rows still opens and
    /// closes a session.
    pub async fn finish(&mut self) -> Result<u64, LoadError> {
        if self.session.state() == SessionState::Uninitialized {
            self.session.open(self.adapter.as_ref()).await?;
        }
        let rows = self.session.close().await?;

        self.adapter
            .commit()
            .await
            .map_err(|e| LoadError::transaction("Failed to commit load", e))?;
        self.output = None;

        let snapshot = self.metrics.snapshot();
        info!(
            worker = %self.context,
            table = %self.plan.target,
            rows_reported = rows,
            rows_written = snapshot.rows_written,
            bytes = snapshot.bytes_streamed,
            "Load finished"
        );
        Ok(rows)
    }

    /// Records a failure: counts it, stops sibling workers, abandons the
    /// session, rolls back and closes the output channel.
    pub async fn fail(&mut self, err: &LoadError) {
        if err.is_stopped() {
            warn!(worker = %self.context, error = %err, "Load stopped");
        } else {
            error!(worker = %self.context, error = %err, "Load failed");
            self.metrics.increment_errors(1);
        }
        self.cancel.cancel();
        self.session.abandon();
        if let Err(e) = self.adapter.rollback().await {
            warn!(worker = %self.context, error = %e, "Rollback after failure failed");
        }
        self.output = None;
    }

    /// Consumes rows until the channel closes, then finishes the load. Runs
    /// `init` first unless it was already called. Any error is passed to
    /// [`fail`](Self::fail) before it is returned.
    pub async fn run(&mut self, input: &mut mpsc::Receiver<Row>) -> Result<u64, LoadError> {
        let result = self.drive(input).await;
        if let Err(err) = &result {
            self.fail(err).await;
        }
        result
    }

    async fn drive(&mut self, input: &mut mpsc::Receiver<Row>) -> Result<u64, LoadError> {
        if !self.initialized {
            self.init().await?;
        }

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(LoadError::Stopped("a sibling worker failed or the load was cancelled".into()));
                }
                row = input.recv() => match row {
                    Some(row) => self.feed(row).await?,
                    None => break,
                },
            }
        }
        self.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use connectors::sql::capture::{CaptureAdapter, CapturedCall, FailPoint};
    use model::{
        core::{data_type::DataType, value::Value},
        records::row::{FieldMeta, RowSchema},
    };
    use planner::plan::LoadPlan;
    use tracing_test::traced_test;

    fn plan(load_action: &str, copies: usize) -> Arc<ValidatedPlan> {
        let json = format!(
            r#"{{
                "schema": "public",
                "table": "sales",
                "bindings": [
                    {{ "stream": "amt", "column": "amount" }},
                    {{ "stream": "d", "column": "sale_date", "format": "date" }}
                ],
                "load_action": "{load_action}",
                "copies": {copies}
            }}"#
        );
        Arc::new(LoadPlan::from_json(&json).unwrap().validate().unwrap())
    }

    fn sales_row(amount: f64) -> Row {
        let schema = Arc::new(RowSchema::new(vec![
            FieldMeta::new("amt", DataType::Number),
            FieldMeta::new("d", DataType::Date),
        ]));
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        Row::new(schema, vec![Some(Value::Number(amount)), Some(Value::Date(date))]).unwrap()
    }

    fn coordinator(plan: Arc<ValidatedPlan>, context: LoadContext, adapter: &CaptureAdapter) -> LoadCoordinator {
        LoadCoordinator::new(plan, context, Arc::new(adapter.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_single_worker_truncates_without_intermediate_commit() {
        let adapter = CaptureAdapter::new();
        let mut load = coordinator(plan("truncate", 1), LoadContext::single(), &adapter);

        assert!(load.init().await.unwrap());
        load.feed(sales_row(19.99)).await.unwrap();
        assert_eq!(load.finish().await.unwrap(), 1);

        assert_eq!(
            adapter.calls(),
            vec![
                CapturedCall::SetAutoCommit(false),
                CapturedCall::Truncate("public.sales".into()),
                CapturedCall::CopyIn(
                    r#"COPY "public"."sales" ( "amount", "sale_date" ) FROM STDIN WITH CSV DELIMITER AS ',' QUOTE AS '"';"#
                        .into()
                ),
                CapturedCall::Flush,
                CapturedCall::EndCopy { rows: 1 },
                CapturedCall::Commit,
            ]
        );
        assert_eq!(adapter.stream_text(), "19.99,2024-03-01\n");
        assert_eq!(load.session_state(), SessionState::ClosedOk);
    }

    #[tokio::test]
    async fn test_truncate_commits_when_copies_run_concurrently() {
        let adapter = CaptureAdapter::new();
        let mut load = coordinator(plan("truncate", 3), LoadContext::new(0, 3, 0), &adapter);

        assert!(load.init().await.unwrap());
        assert_eq!(
            adapter.calls(),
            vec![
                CapturedCall::SetAutoCommit(false),
                CapturedCall::Truncate("public.sales".into()),
                CapturedCall::Commit,
            ]
        );
    }

    #[tokio::test]
    async fn test_non_candidate_skips_truncate() {
        let adapter = CaptureAdapter::new();
        let mut load = coordinator(plan("truncate", 3), LoadContext::new(1, 3, 1), &adapter);

        assert!(!load.init().await.unwrap());
        assert_eq!(adapter.truncate_count(), 0);
    }

    #[tokio::test]
    async fn test_gate_prevents_second_truncate() {
        let gate = TruncateGate::new();
        let first = CaptureAdapter::new();
        let second = CaptureAdapter::new();

        // both claim to be the first copy
        let mut a = coordinator(plan("truncate", 2), LoadContext::new(0, 2, 0), &first).with_gate(gate.clone());
        let mut b = coordinator(plan("truncate", 2), LoadContext::new(0, 2, 0), &second).with_gate(gate);

        assert!(a.init().await.unwrap());
        assert!(!b.init().await.unwrap());
        assert_eq!(first.truncate_count() + second.truncate_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_opens_and_closes_session() {
        let adapter = CaptureAdapter::new();
        let mut load = coordinator(plan("insert", 1), LoadContext::single(), &adapter);

        let (tx, mut rx) = mpsc::channel(1);
        drop(tx);
        assert_eq!(load.run(&mut rx).await.unwrap(), 0);

        let calls = adapter.calls();
        assert!(calls.iter().any(|c| matches!(c, CapturedCall::CopyIn(_))));
        assert_eq!(calls.last(), Some(&CapturedCall::Commit));
    }

    #[tokio::test]
    async fn test_rows_are_forwarded_downstream() {
        let adapter = CaptureAdapter::new();
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let mut load =
            coordinator(plan("insert", 1), LoadContext::single(), &adapter).with_output(out_tx);

        let (tx, mut rx) = mpsc::channel(4);
        tx.send(sales_row(1.5)).await.unwrap();
        tx.send(sales_row(2.5)).await.unwrap();
        drop(tx);

        assert_eq!(load.run(&mut rx).await.unwrap(), 2);
        assert_eq!(out_rx.recv().await, Some(sales_row(1.5)));
        assert_eq!(out_rx.recv().await, Some(sales_row(2.5)));
        // the output channel is closed once the load is done
        assert_eq!(out_rx.recv().await, None);
        assert_eq!(load.metrics().snapshot().rows_forwarded, 2);
    }

    // Scenario: a second row arrives with the bound fields in another order.
    // Expected Outcome: the column plan is re-resolved by name, so each value
    // still lands in its own column.
    #[tokio::test]
    async fn test_reordered_schema_is_resolved_again() {
        let adapter = CaptureAdapter::new();
        let mut load = coordinator(plan("insert", 1), LoadContext::single(), &adapter);

        let reordered = Arc::new(RowSchema::new(vec![
            FieldMeta::new("d", DataType::Date),
            FieldMeta::new("amt", DataType::Number),
        ]));
        let date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let row = Row::new(reordered, vec![Some(Value::Date(date)), Some(Value::Number(7.5))]).unwrap();

        load.init().await.unwrap();
        load.feed(sales_row(19.99)).await.unwrap();
        load.feed(row).await.unwrap();
        load.finish().await.unwrap();

        assert_eq!(adapter.stream_text(), "19.99,2024-03-01\n7.5,2024-03-02\n");
    }

    // Scenario: after a valid row, a row arrives whose schema lacks the bound
    // fields.
    // Expected Outcome: the row is rejected as a configuration error and
    // nothing of it reaches the stream.
    #[tokio::test]
    async fn test_row_without_bound_fields_is_rejected() {
        let adapter = CaptureAdapter::new();
        let mut load = coordinator(plan("insert", 1), LoadContext::single(), &adapter);

        let other = Arc::new(RowSchema::new(vec![FieldMeta::new("x", DataType::Integer)]));
        let row = Row::new(other, vec![Some(Value::Integer(99))]).unwrap();

        load.init().await.unwrap();
        load.feed(sales_row(1.0)).await.unwrap();
        let err = load.feed(row).await.unwrap_err();

        assert!(matches!(err, LoadError::Configuration(_)), "{err}");
        assert!(err.to_string().contains("'amt'"), "{err}");
        assert_eq!(adapter.stream_text(), "1.0,2024-03-01\n");
        assert_eq!(load.metrics().snapshot().rows_written, 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failure_stops_siblings_and_closes_output() {
        let adapter = CaptureAdapter::new().with_fail_point(FailPoint::Write(1));
        let cancel = CancellationToken::new();
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let mut load = coordinator(plan("insert", 1), LoadContext::single(), &adapter)
            .with_cancel(cancel.clone())
            .with_output(out_tx);

        let (tx, mut rx) = mpsc::channel(4);
        tx.send(sales_row(1.0)).await.unwrap();
        tx.send(sales_row(2.0)).await.unwrap();
        drop(tx);

        let err = load.run(&mut rx).await.unwrap_err();
        assert!(matches!(err, LoadError::Transport { .. }));
        assert!(cancel.is_cancelled());
        assert_eq!(load.metrics().snapshot().error_count, 1);
        assert_eq!(load.session_state(), SessionState::ClosedError);

        assert_eq!(out_rx.recv().await, Some(sales_row(1.0)));
        assert_eq!(out_rx.recv().await, None);

        let calls = adapter.calls();
        assert!(!calls.iter().any(|c| matches!(c, CapturedCall::EndCopy { .. })));
        assert_eq!(calls.last(), Some(&CapturedCall::Rollback));
        assert!(logs_contain("Load failed"));
    }

    #[tokio::test]
    async fn test_cancelled_worker_stops_without_error_count() {
        let adapter = CaptureAdapter::new();
        let cancel = CancellationToken::new();
        let mut load = coordinator(plan("insert", 1), LoadContext::single(), &adapter)
            .with_cancel(cancel.clone());

        let (_tx, mut rx) = mpsc::channel::<Row>(1);
        cancel.cancel();

        let err = load.run(&mut rx).await.unwrap_err();
        assert!(err.is_stopped());
        assert_eq!(load.metrics().snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_stream_field_is_configuration_error() {
        let adapter = CaptureAdapter::new();
        let mut load = coordinator(plan("insert", 1), LoadContext::single(), &adapter);
        load.init().await.unwrap();

        let schema = Arc::new(RowSchema::new(vec![FieldMeta::new("other", DataType::String)]));
        let row = Row::new(schema, vec![None]).unwrap();
        let err = load.feed(row).await.unwrap_err();
        assert!(matches!(err, LoadError::Configuration(_)));
        // nothing was opened for a row that never fit the mapping
        assert!(!adapter.calls().iter().any(|c| matches!(c, CapturedCall::CopyIn(_))));
    }
}
