use crate::error::CliError;
use async_trait::async_trait;
use connectors::sql::postgres::utils::connect_client;
use tracing::{error, info};

/// Trait for "pinging" a destination
#[async_trait]
pub trait ConnectionPinger {
    /// Attempts to ping; returns Err if unreachable
    async fn ping(&self) -> Result<(), CliError>;
}

/// Postgres pinger
pub struct PostgresConnectionPinger {
    pub conn_str: String,
}

#[async_trait]
impl ConnectionPinger for PostgresConnectionPinger {
    async fn ping(&self) -> Result<(), CliError> {
        let client = connect_client(&self.conn_str).await.map_err(|e| {
            error!(error = %e, "Postgres connection failed");
            CliError::Connector(e)
        })?;

        let row = client.query_one("SELECT 1", &[]).await.map_err(|e| {
            error!(error = %e, "Postgres ping query failed");
            CliError::Postgres(e)
        })?;

        let val: i32 = row.get(0);
        if val != 1 {
            let msg = format!("Postgres ping returned unexpected result: {val}");
            error!("{}", msg);
            return Err(CliError::Unexpected(msg));
        }

        info!("Postgres ping succeeded");
        Ok(())
    }
}
