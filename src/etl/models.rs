use crate::error::EtlError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rows of one table with their column names, every value in text form.
///
/// `None` is SQL NULL. Every row has exactly `columns.len()` values, in
/// the same order as `columns`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn has_schema(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// One table copy: the source table, where it lands, and column renames.
///
/// Without a target the table keeps its name. Renames map source column
/// names to target column names; unlisted columns keep their names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub source: String,
    pub target: Option<String>,
    pub rename: BTreeMap<String, String>,
}

impl MigrationRequest {
    pub fn table(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: None,
            rename: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_rename(mut self, rename: BTreeMap<String, String>) -> Self {
        self.rename = rename;
        self
    }
}

/// Outcome of a successful migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub table: String,
    pub rows: u64,
}

/// Response body of `POST /migrate/{table}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MigrationResult {
    Success { table: String, rows: u64 },
    Error { message: String },
}

impl MigrationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, MigrationResult::Success { .. })
    }
}

impl From<MigrationReport> for MigrationResult {
    fn from(report: MigrationReport) -> Self {
        MigrationResult::Success {
            table: report.table,
            rows: report.rows,
        }
    }
}

impl From<&EtlError> for MigrationResult {
    fn from(err: &EtlError) -> Self {
        MigrationResult::Error {
            message: err.to_string(),
        }
    }
}
