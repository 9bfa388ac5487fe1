//! An in-memory stand-in for a database session.
//!
//! `CaptureAdapter` records every call made through [`SqlAdapter`] together
//! with the exact bytes written to its copy sinks. It backs `--dry-run` and
//! lets tests assert on what a worker would have sent to the server. A
//! [`FailPoint`] makes one chosen operation fail on demand.

use crate::sql::base::{
    adapter::{DatabaseKind, SqlAdapter},
    error::{ConnectorError, DbError},
    sink::CopySink,
};
use async_trait::async_trait;
use bytes::Bytes;
use planner::query::ast::common::TableRef;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturedCall {
    Exec(String),
    SetAutoCommit(bool),
    Commit,
    Rollback,
    Truncate(String),
    CopyIn(String),
    Flush,
    EndCopy { rows: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    SetAutoCommit,
    Commit,
    Truncate,
    CopyIn,
    /// Fails the write of the chunk with this zero-based index.
    Write(usize),
    EndCopy,
}

#[derive(Debug, Default)]
struct CaptureState {
    calls: Vec<CapturedCall>,
    stream: Vec<u8>,
    chunks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureAdapter {
    state: Arc<Mutex<CaptureState>>,
    fail_point: Option<FailPoint>,
}

impl CaptureAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fail_point(mut self, fail_point: FailPoint) -> Self {
        self.fail_point = Some(fail_point);
        self
    }

    pub fn calls(&self) -> Vec<CapturedCall> {
        self.lock().calls.clone()
    }

    /// Every byte written to any copy sink of this adapter, in order.
    pub fn stream(&self) -> Vec<u8> {
        self.lock().stream.clone()
    }

    pub fn stream_text(&self) -> String {
        String::from_utf8_lossy(&self.stream()).into_owned()
    }

    pub fn truncate_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, CapturedCall::Truncate(_)))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        // poisoned state stays readable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: CapturedCall) {
        self.lock().calls.push(call);
    }

    fn check(&self, point: FailPoint) -> Result<(), DbError> {
        if self.fail_point == Some(point) {
            return Err(DbError::Unknown(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl SqlAdapter for CaptureAdapter {
    async fn connect(_url: &str) -> Result<Self, ConnectorError> {
        Ok(Self::new())
    }

    async fn exec(&self, query: &str) -> Result<(), DbError> {
        self.record(CapturedCall::Exec(query.to_string()));
        Ok(())
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<(), DbError> {
        self.check(FailPoint::SetAutoCommit)?;
        self.record(CapturedCall::SetAutoCommit(enabled));
        Ok(())
    }

    async fn commit(&self) -> Result<(), DbError> {
        self.check(FailPoint::Commit)?;
        self.record(CapturedCall::Commit);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        self.record(CapturedCall::Rollback);
        Ok(())
    }

    async fn truncate_table(&self, table: &TableRef) -> Result<(), DbError> {
        self.check(FailPoint::Truncate)?;
        self.record(CapturedCall::Truncate(table.to_string()));
        Ok(())
    }

    async fn copy_in(&self, statement: &str) -> Result<Box<dyn CopySink>, DbError> {
        self.check(FailPoint::CopyIn)?;
        self.record(CapturedCall::CopyIn(statement.to_string()));
        Ok(Box::new(CaptureSink {
            adapter: self.clone(),
            rows: 0,
        }))
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Capture
    }
}

/// Counts one row per chunk, matching how the loader writes records.
struct CaptureSink {
    adapter: CaptureAdapter,
    rows: u64,
}

#[async_trait]
impl CopySink for CaptureSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), DbError> {
        let mut state = self.adapter.lock();
        if self.adapter.fail_point == Some(FailPoint::Write(state.chunks)) {
            return Err(DbError::Write(format!(
                "injected failure writing chunk {}",
                state.chunks
            )));
        }
        state.chunks += 1;
        state.stream.extend_from_slice(&chunk);
        self.rows += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DbError> {
        self.adapter.record(CapturedCall::Flush);
        Ok(())
    }

    async fn finish(&mut self) -> Result<u64, DbError> {
        self.adapter.check(FailPoint::EndCopy)?;
        self.adapter.record(CapturedCall::EndCopy { rows: self.rows });
        Ok(self.rows)
    }
}
