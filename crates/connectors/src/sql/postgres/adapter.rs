use crate::sql::{
    base::{
        adapter::{DatabaseKind, SqlAdapter},
        error::{ConnectorError, DbError},
        sink::CopySink,
    },
    postgres::utils::connect_client,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::SinkExt;
use planner::query::{
    ast::common::TableRef, builder::truncate::TruncateBuilder, dialect, renderer::render_sql,
};
use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::RwLock;
use tokio_postgres::{Client, CopyInSink};
use tracing::debug;

#[derive(Clone)]
pub struct PgAdapter {
    client: Arc<RwLock<Client>>,
    dialect: dialect::Postgres,
    auto_commit: Arc<AtomicBool>,
    in_transaction: Arc<AtomicBool>,
}

impl PgAdapter {
    /// Opens the implicit transaction when auto-commit is off and none is
    /// running yet.
    async fn begin_if_needed(&self, client: &Client) -> Result<(), DbError> {
        if self.auto_commit.load(Ordering::SeqCst) || self.in_transaction.load(Ordering::SeqCst) {
            return Ok(());
        }
        client.batch_execute("BEGIN").await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        debug!("Transaction started");
        Ok(())
    }

    async fn end_transaction(&self, statement: &str) -> Result<(), DbError> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            debug!("No open transaction, skipping {}", statement);
            return Ok(());
        }
        let client = self.client.read().await;
        client.batch_execute(statement).await?;
        debug!("Transaction ended with {}", statement);
        Ok(())
    }
}

#[async_trait]
impl SqlAdapter for PgAdapter {
    async fn connect(url: &str) -> Result<Self, ConnectorError> {
        let client = Arc::new(RwLock::new(connect_client(url).await?));
        Ok(PgAdapter {
            client,
            dialect: dialect::Postgres,
            auto_commit: Arc::new(AtomicBool::new(true)),
            in_transaction: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn exec(&self, query: &str) -> Result<(), DbError> {
        let client = self.client.read().await;
        self.begin_if_needed(&client).await?;
        client.batch_execute(query).await?;
        Ok(())
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<(), DbError> {
        // Switching auto-commit back on commits whatever is pending.
        if enabled {
            self.end_transaction("COMMIT").await?;
        }
        self.auto_commit.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), DbError> {
        self.end_transaction("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), DbError> {
        self.end_transaction("ROLLBACK").await
    }

    async fn truncate_table(&self, table: &TableRef) -> Result<(), DbError> {
        let statement = render_sql(&TruncateBuilder::new(table.clone()).build(), &self.dialect);
        debug!("TRUNCATE statement: {}", statement);
        self.exec(&statement).await
    }

    async fn copy_in(&self, statement: &str) -> Result<Box<dyn CopySink>, DbError> {
        debug!("COPY statement: {}", statement);

        let client = self.client.read().await;
        self.begin_if_needed(&client).await?;
        let sink = client.copy_in(statement).await?;
        Ok(Box::new(PgCopySink {
            sink: Box::pin(sink),
        }))
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }
}

/// Live `COPY FROM STDIN` stream on a Postgres connection.
pub struct PgCopySink {
    sink: Pin<Box<CopyInSink<Bytes>>>,
}

#[async_trait]
impl CopySink for PgCopySink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), DbError> {
        // buffered until flush or finish
        self.sink.feed(chunk).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DbError> {
        self.sink.flush().await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<u64, DbError> {
        let rows = self.sink.as_mut().finish().await?;
        Ok(rows)
    }
}
