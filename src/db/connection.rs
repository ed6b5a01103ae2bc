use crate::error::{DatabaseRole, EtlError, Result};
use crate::utils::config::{redact_url, Config};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

/// Opens one connection per call to the source or target database.
///
/// There is no pooling: every migration opens its own pair of connections
/// and closes them before it returns.
#[derive(Debug, Clone)]
pub struct ConnectionProvider {
    source_url: String,
    target_url: String,
    connect_timeout: Duration,
}

impl ConnectionProvider {
    pub fn new(config: &Config) -> Self {
        Self {
            source_url: config.source_db_url.clone(),
            target_url: config.target_db_url.clone(),
            connect_timeout: config.connect_timeout,
        }
    }

    pub async fn source(&self) -> Result<Connection> {
        self.connect(DatabaseRole::Source).await
    }

    pub async fn target(&self) -> Result<Connection> {
        self.connect(DatabaseRole::Target).await
    }

    async fn connect(&self, role: DatabaseRole) -> Result<Connection> {
        let url = match role {
            DatabaseRole::Source => &self.source_url,
            DatabaseRole::Target => &self.target_url,
        };

        let mut pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e| EtlError::connection(role, format!("invalid connection string: {e}")))?;
        pg_config.connect_timeout(self.connect_timeout);

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            tracing::error!(database = %role, url = %redact_url(url), "Connection failed: {}", e);
            EtlError::connection(role, e)
        })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(database = %role, "Connection closed with error: {}", e);
            }
        });

        tracing::debug!(database = %role, "Connection opened");

        Ok(Connection {
            client,
            driver,
            role,
        })
    }
}

/// A live connection and the task driving its socket.
pub struct Connection {
    client: Client,
    driver: JoinHandle<()>,
    role: DatabaseRole,
}

impl Connection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    /// Drop the client and wait for the socket task to finish.
    pub async fn close(self) {
        let Connection {
            client,
            driver,
            role,
        } = self;
        drop(client);
        if let Err(e) = driver.await {
            tracing::warn!(database = %role, "Connection task did not shut down cleanly: {}", e);
        }
        tracing::debug!(database = %role, "Connection closed");
    }
}
