use crate::db::{quote_column, ConnectionProvider, TableName};
use crate::error::{EtlError, Result};
use crate::etl::models::RowSet;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, IsolationLevel};

/// Reads a whole table
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, table: &TableName) -> Result<RowSet>;
}

/// Full-table reader against the source database
pub struct PgExtractor {
    provider: Arc<ConnectionProvider>,
}

impl PgExtractor {
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Extractor for PgExtractor {
    async fn extract(&self, table: &TableName) -> Result<RowSet> {
        let mut conn = self.provider.source().await?;
        let result = read_table(conn.client_mut(), table).await;
        conn.close().await;

        match &result {
            Ok(data) => tracing::info!(
                table = %table,
                rows = data.row_count(),
                columns = data.columns.len(),
                "Extracted table"
            ),
            Err(e) => tracing::error!(table = %table, "Extract failed: {}", e),
        }

        result
    }
}

/// Columns come from the statement description so an empty table still
/// reports its schema; values are cast to text server-side.
async fn read_table(client: &mut Client, table: &TableName) -> Result<RowSet> {
    let qualified = table.quoted();

    let tx = client
        .build_transaction()
        .isolation_level(IsolationLevel::RepeatableRead)
        .read_only(true)
        .start()
        .await
        .map_err(|e| classify(table, e))?;

    let probe = tx
        .prepare(&format!("SELECT * FROM {qualified}"))
        .await
        .map_err(|e| classify(table, e))?;
    let columns: Vec<String> = probe
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    if columns.is_empty() {
        return Ok(RowSet::new(columns, Vec::new()));
    }

    let select_list = columns
        .iter()
        .map(|c| quote_column(table, c).map(|q| format!("{q}::text")))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let rows = tx
        .query(&format!("SELECT {select_list} FROM {qualified}"), &[])
        .await
        .map_err(|e| classify(table, e))?;

    let rows = rows
        .iter()
        .map(|row| {
            (0..columns.len())
                .map(|idx| row.try_get::<_, Option<String>>(idx))
                .collect::<std::result::Result<Vec<_>, _>>()
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| EtlError::extract(table.to_string(), e))?;

    tx.commit().await.map_err(|e| classify(table, e))?;

    Ok(RowSet::new(columns, rows))
}

fn classify(table: &TableName, err: tokio_postgres::Error) -> EtlError {
    if err.code() == Some(&SqlState::UNDEFINED_TABLE) {
        EtlError::TableNotFound {
            table: table.to_string(),
        }
    } else {
        EtlError::extract(table.to_string(), err)
    }
}
