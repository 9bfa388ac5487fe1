use crate::sql::base::error::ConnectorError;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{
    Client, Config, NoTls, Socket,
    config::{Host, SslMode},
    tls::MakeTlsConnect,
};
use tracing::{error, info, warn};

const APPLICATION_NAME: &str = "pg-bulk-loader";

/// Opens a client for a connection string in URL or key/value form, honouring
/// its `sslmode`. `prefer` falls back to plain TCP when the TLS handshake
/// fails.
pub async fn connect_client(url: &str) -> Result<Client, ConnectorError> {
    let mut config = url
        .parse::<Config>()
        .map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;
    if config.get_application_name().is_none() {
        config.application_name(APPLICATION_NAME);
    }

    info!(endpoint = %describe(&config), ssl_mode = ?config.get_ssl_mode(), "Connecting to Postgres");

    match config.get_ssl_mode() {
        SslMode::Disable => spawn_connection(&config, NoTls).await,
        SslMode::Prefer => match spawn_connection(&config, native_tls()?).await {
            Ok(client) => Ok(client),
            Err(error) => {
                warn!(%error, "Postgres TLS handshake failed, retrying without TLS");
                spawn_connection(&config, NoTls).await
            }
        },
        _ => spawn_connection(&config, native_tls()?).await,
    }
}

fn native_tls() -> Result<MakeTlsConnector, ConnectorError> {
    let connector = TlsConnector::builder().build()?;
    Ok(MakeTlsConnector::new(connector))
}

async fn spawn_connection<T>(config: &Config, tls: T) -> Result<Client, ConnectorError>
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let (client, connection) = config.connect(tls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Postgres connection error");
        }
    });
    Ok(client)
}

/// `host:port/dbname` of the first configured host, without credentials.
pub(crate) fn describe(config: &Config) -> String {
    let host = match config.get_hosts().first() {
        Some(Host::Tcp(host)) => host.clone(),
        #[cfg(unix)]
        Some(Host::Unix(path)) => path.display().to_string(),
        None => "localhost".to_string(),
    };
    let port = config.get_ports().first().copied().unwrap_or(5432);
    let dbname = config.get_dbname().unwrap_or("");
    format!("{host}:{port}/{dbname}")
}
