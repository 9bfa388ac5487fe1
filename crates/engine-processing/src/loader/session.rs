use crate::error::LoadError;
use bytes::BytesMut;
use connectors::sql::base::{
    adapter::SqlAdapter,
    encoder::{ColumnPlan, CopyRowEncoder},
    sink::CopySink,
};
use model::records::row::Row;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Open,
    ClosedOk,
    ClosedError,
}

/// One bulk-copy stream and the encoder that feeds it.
///
/// Every row is encoded into a reused buffer and handed to the sink as a
/// single chunk, so a failed row never leaves part of a record on the wire.
/// After any failure the session is `ClosedError` and the sink is dropped
/// without an end-of-copy signal.
pub struct CopySession {
    statement: String,
    encoder: Box<dyn CopyRowEncoder>,
    state: SessionState,
    sink: Option<Box<dyn CopySink>>,
    buffer: BytesMut,
    rows_written: u64,
    bytes_written: u64,
}

impl CopySession {
    pub fn new(statement: String, encoder: Box<dyn CopyRowEncoder>) -> Self {
        Self {
            statement,
            encoder,
            state: SessionState::Uninitialized,
            sink: None,
            buffer: BytesMut::with_capacity(4096),
            rows_written: 0,
            bytes_written: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn expect_state(&self, expected: SessionState, action: &str) -> Result<(), LoadError> {
        if self.state != expected {
            return Err(LoadError::InvalidState(format!(
                "cannot {action} a copy session in state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    pub async fn open(&mut self, adapter: &dyn SqlAdapter) -> Result<(), LoadError> {
        self.expect_state(SessionState::Uninitialized, "open")?;

        match adapter.copy_in(&self.statement).await {
            Ok(sink) => {
                self.sink = Some(sink);
                self.state = SessionState::Open;
                debug!(statement = %self.statement, "Copy session opened");
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::ClosedError;
                Err(LoadError::transport("Failed to open copy stream", err))
            }
        }
    }

    /// Encodes and writes one row. Returns the number of bytes sent.
    pub async fn write_row(&mut self, columns: &[ColumnPlan], row: &Row) -> Result<usize, LoadError> {
        self.expect_state(SessionState::Open, "write to")?;

        self.buffer.clear();
        if let Err(err) = self.encoder.encode_row(&mut self.buffer, columns, row) {
            self.abandon();
            return Err(err.into());
        }
        let chunk = self.buffer.split().freeze();
        let len = chunk.len();

        let Some(sink) = self.sink.as_mut() else {
            self.state = SessionState::ClosedError;
            return Err(LoadError::InvalidState("open session has no sink".into()));
        };
        if let Err(err) = sink.write(chunk).await {
            self.abandon();
            return Err(LoadError::transport("Failed to write row to copy stream", err));
        }

        self.rows_written += 1;
        self.bytes_written += len as u64;
        Ok(len)
    }

    /// Flushes and ends the copy. Returns the row count the destination
    /// reports.
    pub async fn close(&mut self) -> Result<u64, LoadError> {
        self.expect_state(SessionState::Open, "close")?;

        let Some(mut sink) = self.sink.take() else {
            self.state = SessionState::ClosedError;
            return Err(LoadError::InvalidState("open session has no sink".into()));
        };
        if let Err(err) = sink.flush().await {
            self.state = SessionState::ClosedError;
            return Err(LoadError::transport("Failed to flush copy stream", err));
        }
        match sink.finish().await {
            Ok(rows) => {
                self.state = SessionState::ClosedOk;
                debug!(rows, bytes = self.bytes_written, "Copy session closed");
                Ok(rows)
            }
            Err(err) => {
                self.state = SessionState::ClosedError;
                Err(LoadError::transport("Failed to end copy", err))
            }
        }
    }

    /// Drops the sink without signalling end-of-copy.
    pub fn abandon(&mut self) {
        self.buffer.clear();
        if self.sink.take().is_some() {
            warn!(rows = self.rows_written, "Copy session abandoned");
        }
        if self.state != SessionState::ClosedOk {
            self.state = SessionState::ClosedError;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::sql::{
        base::encoder::FieldEncoding,
        capture::{CaptureAdapter, CapturedCall, FailPoint},
        postgres::encoder::PgCsvEncoder,
    };
    use model::{
        core::{data_type::DataType, value::Value},
        records::row::{FieldMeta, RowSchema},
    };
    use planner::query::ast::copy::CsvOptions;
    use std::sync::Arc;

    fn session() -> CopySession {
        CopySession::new(
            "COPY t ( \"a\", \"b\" ) FROM STDIN".into(),
            Box::new(PgCsvEncoder::new(CsvOptions::default())),
        )
    }

    fn columns() -> Vec<ColumnPlan> {
        vec![
            ColumnPlan {
                index: 0,
                field: "a".into(),
                column: "a".into(),
                data_type: DataType::String,
                encoding: FieldEncoding::QuotedText,
            },
            ColumnPlan {
                index: 1,
                field: "b".into(),
                column: "b".into(),
                data_type: DataType::Integer,
                encoding: FieldEncoding::Integer,
            },
        ]
    }

    fn row(a: Option<Value>, b: Option<Value>) -> Row {
        let schema = Arc::new(RowSchema::new(vec![
            FieldMeta::new("a", DataType::String),
            FieldMeta::new("b", DataType::Integer),
        ]));
        Row::new(schema, vec![a, b]).unwrap()
    }

    #[tokio::test]
    async fn test_happy_path() {
        let adapter = CaptureAdapter::new();
        let mut session = session();
        assert_eq!(session.state(), SessionState::Uninitialized);

        session.open(&adapter).await.unwrap();
        let columns = columns();
        session
            .write_row(&columns, &row(Some(Value::String("x".into())), Some(Value::Integer(1))))
            .await
            .unwrap();
        session.write_row(&columns, &row(None, Some(Value::Integer(123)))).await.unwrap();

        assert_eq!(session.close().await.unwrap(), 2);
        assert_eq!(session.state(), SessionState::ClosedOk);
        assert_eq!(session.rows_written(), 2);
        assert_eq!(adapter.stream_text(), "\"x\",1\n,123\n");
    }

    #[tokio::test]
    async fn test_encode_failure_abandons_without_end_of_copy() {
        let adapter = CaptureAdapter::new();
        let mut session = session();
        session.open(&adapter).await.unwrap();

        let columns = columns();
        let err = session
            .write_row(&columns, &row(None, Some(Value::Boolean(true))))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Encoding(_)));
        assert_eq!(session.state(), SessionState::ClosedError);
        assert!(adapter.stream().is_empty());
        assert!(
            !adapter
                .calls()
                .iter()
                .any(|c| matches!(c, CapturedCall::EndCopy { .. }))
        );

        // closed sessions reject further work
        let err = session.close().await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_open_failure_is_transport_error() {
        let adapter = CaptureAdapter::new().with_fail_point(FailPoint::CopyIn);
        let mut session = session();

        let err = session.open(&adapter).await.unwrap_err();
        assert!(matches!(err, LoadError::Transport { .. }));
        assert_eq!(session.state(), SessionState::ClosedError);
    }

    #[tokio::test]
    async fn test_write_failure_closes_session() {
        let adapter = CaptureAdapter::new().with_fail_point(FailPoint::Write(0));
        let mut session = session();
        session.open(&adapter).await.unwrap();

        let err = session
            .write_row(&columns(), &row(None, None))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to write row to copy stream: Write error: injected failure writing chunk 0"
        );
        assert_eq!(session.state(), SessionState::ClosedError);
    }

    #[tokio::test]
    async fn test_zero_rows_still_opens_and_closes() {
        let adapter = CaptureAdapter::new();
        let mut session = session();
        session.open(&adapter).await.unwrap();
        assert_eq!(session.close().await.unwrap(), 0);

        let calls = adapter.calls();
        assert!(matches!(calls.first(), Some(CapturedCall::CopyIn(_))));
        assert_eq!(calls.last(), Some(&CapturedCall::EndCopy { rows: 0 }));
    }

    #[tokio::test]
    async fn test_write_before_open_is_rejected() {
        let mut session = session();
        let err = session
            .write_row(&columns(), &row(None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidState(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }
}
