use crate::db::{quote_column, ConnectionProvider, TableName};
use crate::error::{EtlError, Result};
use crate::etl::models::RowSet;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Transaction};

/// Bind parameters allowed in one PostgreSQL statement.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Replaces a table's schema and contents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Loader: Send + Sync {
    /// Returns the number of rows written.
    async fn load(&self, table: &TableName, data: &RowSet) -> Result<u64>;
}

/// Drop + create + insert into the target database, in one transaction
pub struct PgLoader {
    provider: Arc<ConnectionProvider>,
}

impl PgLoader {
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Loader for PgLoader {
    async fn load(&self, table: &TableName, data: &RowSet) -> Result<u64> {
        let mut conn = self.provider.target().await?;
        let result = write_table(conn.client_mut(), table, data).await;
        conn.close().await;

        match &result {
            Ok(rows) => tracing::info!(table = %table, rows, "Loaded table"),
            Err(e) => tracing::error!(table = %table, "Load failed: {}", e),
        }

        result
    }
}

async fn write_table(client: &mut Client, table: &TableName, data: &RowSet) -> Result<u64> {
    let tx = client
        .transaction()
        .await
        .map_err(|e| EtlError::load(table.to_string(), e))?;

    match replace_contents(&tx, table, data).await {
        Ok(rows) => {
            tx.commit()
                .await
                .map_err(|e| EtlError::load(table.to_string(), e))?;
            Ok(rows)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(table = %table, "Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

async fn replace_contents(tx: &Transaction<'_>, table: &TableName, data: &RowSet) -> Result<u64> {
    let load_err = |e: tokio_postgres::Error| EtlError::load(table.to_string(), e);

    if !data.has_schema() {
        return Err(EtlError::load(table.to_string(), "no columns to create"));
    }
    if let Some(pos) = data.rows.iter().position(|r| r.len() != data.columns.len()) {
        return Err(EtlError::load(
            table.to_string(),
            format!(
                "row {} has {} values, expected {}",
                pos,
                data.rows[pos].len(),
                data.columns.len()
            ),
        ));
    }

    let qualified = table.quoted();
    let quoted_columns = data
        .columns
        .iter()
        .map(|c| quote_column(table, c))
        .collect::<Result<Vec<_>>>()?;

    // Serialises concurrent loads of the same table across service instances
    tx.execute(
        "SELECT pg_advisory_xact_lock(hashtext($1))",
        &[&table.lock_key()],
    )
    .await
    .map_err(load_err)?;

    tx.batch_execute(&format!("DROP TABLE IF EXISTS {qualified}"))
        .await
        .map_err(load_err)?;
    tx.batch_execute(&create_table_sql(&qualified, &quoted_columns))
        .await
        .map_err(load_err)?;

    let mut written = 0u64;
    for chunk in data.rows.chunks(rows_per_statement(quoted_columns.len())) {
        let sql = insert_sql(&qualified, &quoted_columns, chunk.len());
        let params: Vec<&(dyn ToSql + Sync)> = chunk
            .iter()
            .flat_map(|row| row.iter().map(|v| v as &(dyn ToSql + Sync)))
            .collect();
        written += tx.execute(&sql, &params).await.map_err(load_err)?;
    }

    Ok(written)
}

/// Every column is TEXT; source types are not carried over.
fn create_table_sql(qualified: &str, quoted_columns: &[String]) -> String {
    let defs = quoted_columns
        .iter()
        .map(|c| format!("{c} TEXT"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {qualified} ({defs})")
}

fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

fn insert_sql(qualified: &str, quoted_columns: &[String], row_count: usize) -> String {
    let width = quoted_columns.len();
    let values = (0..row_count)
        .map(|r| {
            let placeholders = (1..=width)
                .map(|c| format!("${}", r * width + c))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified,
        quoted_columns.join(", "),
        values
    )
}
