use crate::{
    error::AdapterError,
    sql::{base::adapter::SqlAdapter, postgres::adapter::PgAdapter},
};
use std::sync::Arc;

/// A destination session of any supported kind.
#[derive(Clone)]
pub enum Adapter {
    Postgres(PgAdapter),
}

impl Adapter {
    /// Connects to the database named by `conn_str`. Both URL
    /// (`postgres://...`) and key/value (`host=... dbname=...`) forms are
    /// accepted.
    pub async fn sql(conn_str: &str) -> Result<Self, AdapterError> {
        let trimmed = conn_str.trim();
        if trimmed.is_empty() {
            return Err(AdapterError::MissingProperty("connection".into()));
        }
        if let Some((scheme, _)) = trimmed.split_once("://") {
            if !matches!(scheme, "postgres" | "postgresql") {
                return Err(AdapterError::UnsupportedDriver(scheme.to_string()));
            }
        }

        let adapter = PgAdapter::connect(trimmed).await?;
        Ok(Adapter::Postgres(adapter))
    }

    pub fn get_sql(&self) -> Arc<dyn SqlAdapter> {
        match self {
            Adapter::Postgres(adapter) => Arc::new(adapter.clone()),
        }
    }
}
