use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::EtlError;
use crate::etl::{MigrationRequest, MigrationResult, Migrator};

pub struct MigrateState {
    pub migrator: Arc<Migrator>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MigrateQuery {
    pub target: Option<String>,
}

/// Optional request body: `{"rename": {"old": "new"}}`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrateBody {
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
}

/// POST /migrate/:table_name - Copy one table, synchronously
///
/// The copy runs on its own task, so a client that disconnects does not
/// abort it halfway.
pub async fn migrate_table(
    State(state): State<Arc<MigrateState>>,
    Path(table_name): Path<String>,
    Query(query): Query<MigrateQuery>,
    body: Bytes,
) -> (StatusCode, Json<MigrationResult>) {
    let request = match build_request(table_name, query, &body) {
        Ok(request) => request,
        Err(e) => return (e.status_code(), Json(MigrationResult::from(&e))),
    };

    match state.migrator.clone().migrate_detached(request).await {
        Ok(report) => (StatusCode::OK, Json(report.into())),
        Err(e) => (e.status_code(), Json(MigrationResult::from(&e))),
    }
}

fn build_request(
    table_name: String,
    query: MigrateQuery,
    body: &[u8],
) -> Result<MigrationRequest, EtlError> {
    let body: MigrateBody = if body.iter().all(u8::is_ascii_whitespace) {
        MigrateBody::default()
    } else {
        serde_json::from_slice(body).map_err(|e| EtlError::InvalidRename(e.to_string()))?
    };

    let mut request = MigrationRequest::table(table_name).with_rename(body.rename);
    if let Some(target) = query.target {
        request = request.with_target(target);
    }
    Ok(request)
}

/// Router for migration endpoints
pub fn migrate_router(state: Arc<MigrateState>) -> Router {
    Router::new()
        .route("/migrate/:table_name", post(migrate_table))
        .with_state(state)
}
