use crate::sql::base::{
    error::{ConnectorError, DbError},
    sink::CopySink,
};
use async_trait::async_trait;
use planner::query::ast::common::TableRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    Capture,
}

/// One logical database session.
///
/// With auto-commit off, the first statement after a commit implicitly opens
/// a new transaction that stays open until [`SqlAdapter::commit`] or
/// [`SqlAdapter::rollback`].
#[async_trait]
pub trait SqlAdapter: Send + Sync {
    async fn connect(url: &str) -> Result<Self, ConnectorError>
    where
        Self: Sized;

    async fn exec(&self, query: &str) -> Result<(), DbError>;

    // Transactions
    async fn set_auto_commit(&self, enabled: bool) -> Result<(), DbError>;
    async fn commit(&self) -> Result<(), DbError>;
    async fn rollback(&self) -> Result<(), DbError>;

    async fn truncate_table(&self, table: &TableRef) -> Result<(), DbError>;

    /// Starts a bulk-copy session for a rendered `COPY ... FROM STDIN`
    /// statement.
    async fn copy_in(&self, statement: &str) -> Result<Box<dyn CopySink>, DbError>;

    fn kind(&self) -> DatabaseKind;
}
