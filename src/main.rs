mod api;
mod db;
mod error;
mod etl;
mod scheduler;
mod utils;


use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pg-etl", version, about = "Copy PostgreSQL tables from a source to a target database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Overrides ETL_HOST
        #[arg(long)]
        host: Option<String>,
        /// Overrides ETL_PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Migrate one table in-process and print the result
    Migrate {
        table: String,
        /// Target table name, defaults to the source name
        #[arg(long)]
        target: Option<String>,
        /// Column rename as old=new, repeatable
        #[arg(long = "rename", value_parser = parse_rename)]
        renames: Vec<(String, String)>,
    },
    /// Ask a running service to migrate tables, as a scheduler would
    Trigger {
        #[arg(long, env = "ETL_SERVICE_URL", default_value = "http://etl-service:8000")]
        service_url: String,
        /// Request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
        /// Extra attempts after a failed one
        #[arg(long, default_value_t = 1)]
        retries: u32,
        /// Seconds to wait between attempts
        #[arg(long, default_value_t = 60)]
        retry_delay: u64,
        #[arg(required = true)]
        tables: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { host, port } => {
            let mut config = utils::Config::from_env()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
        Command::Migrate {
            table,
            target,
            renames,
        } => {
            let config = utils::Config::from_env()?;
            let (migrator, _) = build_migrator(&config)?;

            let mut request = etl::MigrationRequest::table(table)
                .with_rename(renames.into_iter().collect());
            if let Some(target) = target {
                request = request.with_target(target);
            }

            let outcome = migrator.migrate_detached(request).await;
            let result = match &outcome {
                Ok(report) => etl::MigrationResult::from(report.clone()),
                Err(e) => etl::MigrationResult::from(e),
            };
            println!("{}", serde_json::to_string(&result)?);
            outcome.map(|_| ()).map_err(Into::into)
        }
        Command::Trigger {
            service_url,
            timeout,
            retries,
            retry_delay,
            tables,
        } => {
            let client = scheduler::TriggerClient::new(scheduler::TriggerOptions {
                service_url,
                timeout: Duration::from_secs(timeout),
                retries,
                retry_delay: Duration::from_secs(retry_delay),
            })?;

            let failed: Vec<String> = client
                .trigger_all(&tables)
                .await
                .into_iter()
                .filter_map(|(table, result)| result.is_err().then_some(table))
                .collect();

            if failed.is_empty() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("ETL failed for tables: {}", failed.join(", ")))
            }
        }
    }
}

fn parse_rename(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() => {
            Ok((from.to_string(), to.to_string()))
        }
        _ => Err(format!("expected old=new, got {value:?}")),
    }
}

/// Wire connection provider, extractor, loader and metrics into a migrator
fn build_migrator(config: &utils::Config) -> anyhow::Result<(Arc<etl::Migrator>, Arc<utils::Metrics>)> {
    let provider = Arc::new(db::ConnectionProvider::new(config));
    let metrics = Arc::new(utils::Metrics::new()?);

    let migrator = Arc::new(etl::Migrator::new(
        Arc::new(etl::PgExtractor::new(provider.clone())),
        Arc::new(etl::PgLoader::new(provider)),
        config.allowed_tables.clone(),
        metrics.clone(),
    ));

    Ok((migrator, metrics))
}

async fn serve(config: utils::Config) -> anyhow::Result<()> {
    tracing::info!(
        source = %utils::config::redact_url(&config.source_db_url),
        target = %utils::config::redact_url(&config.target_db_url),
        "Starting PG to PG ETL Service on {}",
        config.bind_address()
    );

    let (migrator, metrics) = build_migrator(&config)?;
    let app = api::app(migrator, metrics);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!("Server listening on {}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
