pub mod migrate;
pub mod service;

pub use migrate::{migrate_router, MigrateState};
pub use service::service_router;

use axum::{middleware, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::etl::Migrator;
use crate::utils::Metrics;

/// Full application router with global middleware
pub fn app(migrator: Arc<Migrator>, metrics: Arc<Metrics>) -> Router {
    let migrate_state = Arc::new(MigrateState { migrator });

    Router::new()
        .merge(service_router(metrics.clone()))
        .merge(migrate_router(migrate_state))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(metrics, logging_middleware)),
        )
}

/// Logs and counts every request
async fn logging_middleware(
    axum::extract::State(metrics): axum::extract::State<Arc<Metrics>>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();

    metrics
        .http_requests
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use crate::etl::extract::MockExtractor;
    use crate::etl::load::MockLoader;
    use crate::etl::RowSet;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app_with(extractor: MockExtractor, loader: MockLoader) -> Router {
        let metrics = Arc::new(Metrics::new().unwrap());
        let migrator = Arc::new(Migrator::new(
            Arc::new(extractor),
            Arc::new(loader),
            None,
            metrics.clone(),
        ));
        app(migrator, metrics)
    }

    fn idle_app() -> Router {
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().never();
        let mut loader = MockLoader::new();
        loader.expect_load().never();
        app_with(extractor, loader)
    }

    async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn json_of(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let (status, body) = send(idle_app(), Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body), json!({"message": "PG to PG ETL Service"}));

        let (status, body) = send(idle_app(), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body), json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn test_migrate_success() {
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(|_| {
            Ok(RowSet::new(
                vec!["id".to_string(), "name".to_string()],
                vec![
                    vec![Some("1".to_string()), Some("Ana".to_string())],
                    vec![Some("2".to_string()), Some("Bo".to_string())],
                ],
            ))
        });
        let mut loader = MockLoader::new();
        loader
            .expect_load()
            .returning(|_, data| Ok(data.row_count() as u64));

        let (status, body) = send(
            app_with(extractor, loader),
            Method::POST,
            "/migrate/customers",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_of(&body),
            json!({"status": "success", "table": "customers", "rows": 2})
        );
    }

    #[tokio::test]
    async fn test_migrate_missing_table() {
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(|t| {
            Err(EtlError::TableNotFound {
                table: t.to_string(),
            })
        });
        let mut loader = MockLoader::new();
        loader.expect_load().never();

        let (status, body) =
            send(app_with(extractor, loader), Method::POST, "/migrate/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json_of(&body),
            json!({"status": "error", "message": "No data found"})
        );
    }

    #[tokio::test]
    async fn test_migrate_rejects_bad_identifier() {
        let (status, body) = send(idle_app(), Method::POST, "/migrate/users%22--").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_of(&body)["status"], "error");
    }

    #[tokio::test]
    async fn test_migrate_requires_post() {
        let (status, _) = send(idle_app(), Method::GET, "/migrate/customers").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_counts_requests() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().never();
        let mut loader = MockLoader::new();
        loader.expect_load().never();
        let migrator = Arc::new(Migrator::new(
            Arc::new(extractor),
            Arc::new(loader),
            None,
            metrics.clone(),
        ));
        let router = app(migrator, metrics);

        send(router.clone(), Method::GET, "/health").await;
        let (status, body) = send(router, Method::GET, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("etl_http_requests_total{method=\"GET\",status=\"200\"} 1"));
    }

    async fn send_json(app: Router, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_migrate_into_target_with_rename() {
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract()
            .withf(|t| t.name() == "customers")
            .returning(|_| {
                Ok(RowSet::new(
                    vec!["id".to_string(), "name".to_string()],
                    vec![vec![Some("1".to_string()), Some("Ana".to_string())]],
                ))
            });
        let mut loader = MockLoader::new();
        loader
            .expect_load()
            .withf(|t, data| {
                t.to_string() == "clients"
                    && data.columns == vec!["id".to_string(), "full_name".to_string()]
            })
            .times(1)
            .returning(|_, data| Ok(data.row_count() as u64));

        let (status, body) = send_json(
            app_with(extractor, loader),
            "/migrate/customers?target=clients",
            r#"{"rename": {"name": "full_name"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_of(&body),
            json!({"status": "success", "table": "clients", "rows": 1})
        );
    }

    #[tokio::test]
    async fn test_migrate_rejects_malformed_body() {
        let (status, body) =
            send_json(idle_app(), "/migrate/customers", r#"{"rename": ["name"]}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_of(&body)["status"], "error");
    }

    #[tokio::test]
    async fn test_migrate_rejects_bad_target() {
        let (status, _) = send(
            idle_app(),
            Method::POST,
            "/migrate/customers?target=a%3Bb",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
