//! Error types for table migrations.

use axum::http::StatusCode;
use thiserror::Error;

/// Which side of a migration a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseRole {
    Source,
    Target,
}

impl std::fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseRole::Source => f.write_str("source"),
            DatabaseRole::Target => f.write_str("target"),
        }
    }
}

/// Main error type for migration operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EtlError {
    /// Table name rejected by identifier validation
    #[error("Invalid table identifier: {0}")]
    InvalidIdentifier(String),

    /// Column rename refers to a missing column or would collide
    #[error("Invalid column rename: {0}")]
    InvalidRename(String),

    /// Table name valid but not on the configured allow-list
    #[error("Table {0} is not in the allowed table list")]
    TableNotAllowed(String),

    /// Database unreachable or credentials rejected
    #[error("Connection to {database} database failed: {cause}")]
    Connection { database: DatabaseRole, cause: String },

    /// Source table does not exist
    #[error("No data found")]
    TableNotFound { table: String },

    /// Source read failed
    #[error("Extract failed for table {table}: {cause}")]
    Extract { table: String, cause: String },

    /// Source relation reported no columns, nothing can be recreated from it
    #[error("Table {table} has no columns")]
    EmptySchema { table: String },

    /// Target write failed and was rolled back
    #[error("Load failed for table {table}: {cause}")]
    Load { table: String, cause: String },

    /// Another migration of the same table is running
    #[error("Migration of table {table} is already in progress")]
    Conflict { table: String },

    /// The background migration task panicked or was cancelled
    #[error("Migration task failed: {0}")]
    Internal(String),
}

impl EtlError {
    pub fn connection(database: DatabaseRole, cause: impl ToString) -> Self {
        EtlError::Connection {
            database,
            cause: cause.to_string(),
        }
    }

    pub fn extract(table: impl Into<String>, cause: impl ToString) -> Self {
        EtlError::Extract {
            table: table.into(),
            cause: cause.to_string(),
        }
    }

    pub fn load(table: impl Into<String>, cause: impl ToString) -> Self {
        EtlError::Load {
            table: table.into(),
            cause: cause.to_string(),
        }
    }

    /// HTTP status the service answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EtlError::InvalidIdentifier(_) | EtlError::InvalidRename(_) => {
                StatusCode::BAD_REQUEST
            }
            EtlError::TableNotAllowed(_) => StatusCode::FORBIDDEN,
            EtlError::TableNotFound { .. } => StatusCode::NOT_FOUND,
            EtlError::Conflict { .. } => StatusCode::CONFLICT,
            EtlError::EmptySchema { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EtlError::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EtlError::Extract { .. } | EtlError::Load { .. } | EtlError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::InvalidIdentifier(_) => "invalid_identifier",
            EtlError::InvalidRename(_) => "invalid_rename",
            EtlError::TableNotAllowed(_) => "not_allowed",
            EtlError::Connection { .. } => "connection",
            EtlError::TableNotFound { .. } => "not_found",
            EtlError::Extract { .. } => "extract",
            EtlError::EmptySchema { .. } => "empty_schema",
            EtlError::Load { .. } => "load",
            EtlError::Conflict { .. } => "conflict",
            EtlError::Internal(_) => "internal",
        }
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, EtlError>;
