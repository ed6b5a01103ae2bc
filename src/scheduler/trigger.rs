//! Client side of the scheduler contract: `POST <service>/migrate/<table>`.
//! A non-200 status or an error body counts as a failed attempt, and failed
//! attempts are retried after a fixed delay.

use anyhow::{anyhow, Result};
use futures::future::join_all;
use std::time::Duration;

use crate::db::TableName;
use crate::etl::MigrationResult;

#[derive(Debug, Clone)]
pub struct TriggerOptions {
    pub service_url: String,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

pub struct TriggerClient {
    client: reqwest::Client,
    options: TriggerOptions,
}

impl TriggerClient {
    pub fn new(options: TriggerOptions) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(options.timeout).build()?;
        Ok(Self { client, options })
    }

    /// Trigger one table, retrying failed attempts.
    ///
    /// A table name the service would reject is not sent at all.
    pub async fn trigger(&self, table: &str) -> Result<MigrationResult> {
        let url = self.migrate_url(table)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(url.clone()).await {
                Ok(result) => {
                    tracing::info!(table, attempt, ?result, "ETL migration completed");
                    return Ok(result);
                }
                Err(e) if attempt <= self.options.retries => {
                    tracing::warn!(
                        table,
                        attempt,
                        retry_in_secs = self.options.retry_delay.as_secs(),
                        "ETL migration attempt failed: {}",
                        e
                    );
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(table, attempt, "ETL migration failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Trigger all tables concurrently, results in input order.
    pub async fn trigger_all(&self, tables: &[String]) -> Vec<(String, Result<MigrationResult>)> {
        let results = join_all(tables.iter().map(|t| self.trigger(t))).await;
        tables.iter().cloned().zip(results).collect()
    }

    fn migrate_url(&self, table: &str) -> Result<reqwest::Url> {
        let table = TableName::parse(table)?;
        let mut url = reqwest::Url::parse(&self.options.service_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Service URL cannot be a base: {}", self.options.service_url))?
            .pop_if_empty()
            .push("migrate")
            .push(&table.to_string());
        Ok(url)
    }

    async fn attempt(&self, url: reqwest::Url) -> Result<MigrationResult> {
        let response = self.client.post(url).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("API error: {} - {}", status.as_u16(), body));
        }

        let result = response.json::<MigrationResult>().await?;
        if !result.is_success() {
            return Err(anyhow!("API error: 200 - {}", serde_json::to_string(&result)?));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Serves /migrate/:table, failing the first `failures` calls with 503
    async fn spawn_service(failures: u32) -> (String, Arc<AtomicU32>) {
        spawn_service_failing_with(failures, StatusCode::SERVICE_UNAVAILABLE).await
    }

    async fn spawn_service_failing_with(
        failures: u32,
        failure_status: StatusCode,
    ) -> (String, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/migrate/:table",
            post(move |Path(table): Path<String>| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        (
                            failure_status,
                            Json(MigrationResult::Error {
                                message: "Connection to target database failed".to_string(),
                            }),
                        )
                    } else {
                        (
                            StatusCode::OK,
                            Json(MigrationResult::Success { table, rows: 3 }),
                        )
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), calls)
    }

    fn options(url: String, retries: u32) -> TriggerOptions {
        TriggerOptions {
            service_url: url,
            timeout: Duration::from_secs(5),
            retries,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let (url, calls) = spawn_service(0).await;
        let client = TriggerClient::new(options(url, 1)).unwrap();

        let result = client.trigger("customers").await.unwrap();
        assert_eq!(
            result,
            MigrationResult::Success {
                table: "customers".to_string(),
                rows: 3
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_one_retry_recovers() {
        let (url, calls) = spawn_service(1).await;
        let client = TriggerClient::new(options(url, 1)).unwrap();

        assert!(client.trigger("orders").await.unwrap().is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let (url, calls) = spawn_service(10).await;
        let client = TriggerClient::new(options(url, 1)).unwrap();

        let err = client.trigger("orders").await.unwrap_err();
        assert!(err.to_string().starts_with("API error: 503"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_trigger_all_keeps_order() {
        let (url, _) = spawn_service(0).await;
        let client = TriggerClient::new(options(url, 0)).unwrap();

        let tables = vec!["customers".to_string(), "orders".to_string()];
        let results = client.trigger_all(&tables).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "customers");
        assert_eq!(results[1].0, "orders");
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    #[tokio::test]
    async fn test_error_body_with_ok_status_is_a_failure() {
        let (url, calls) = spawn_service_failing_with(10, StatusCode::OK).await;
        let client = TriggerClient::new(options(url, 1)).unwrap();

        let err = client.trigger("orders").await.unwrap_err();
        assert!(err.to_string().contains("Connection to target database failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_table_is_never_sent() {
        let (url, calls) = spawn_service(0).await;
        let client = TriggerClient::new(options(url, 3)).unwrap();

        assert!(client.trigger("orders?target=users").await.is_err());
        assert!(client.trigger("../health").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_service_url_with_trailing_slash() {
        let (url, calls) = spawn_service(0).await;
        let client = TriggerClient::new(options(format!("{url}/"), 0)).unwrap();

        assert!(client.trigger("public.orders").await.unwrap().is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
