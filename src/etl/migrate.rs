use crate::db::{quote_column, TableName};
use crate::error::{EtlError, Result};
use crate::etl::extract::Extractor;
use crate::etl::load::Loader;
use crate::etl::lock::TableLocks;
use crate::etl::models::{MigrationReport, MigrationRequest, RowSet};
use crate::utils::Metrics;
use prometheus::IntGauge;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Runs extract then load for one table at a time
pub struct Migrator {
    extractor: Arc<dyn Extractor>,
    loader: Arc<dyn Loader>,
    allowed_tables: Option<HashSet<String>>,
    locks: TableLocks,
    metrics: Arc<Metrics>,
}

impl Migrator {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        loader: Arc<dyn Loader>,
        allowed_tables: Option<HashSet<String>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            extractor,
            loader,
            allowed_tables,
            locks: TableLocks::new(),
            metrics,
        }
    }

    /// Copy `table_name` to the same name in the target database.
    pub async fn migrate_table(&self, table_name: &str) -> Result<MigrationReport> {
        self.migrate(MigrationRequest::table(table_name)).await
    }

    /// Run the migration on its own task and wait for it.
    ///
    /// Dropping the returned future does not stop the migration: it runs
    /// to completion or failure on the runtime either way.
    pub async fn migrate_detached(self: Arc<Self>, request: MigrationRequest) -> Result<MigrationReport> {
        tokio::spawn(async move { self.migrate(request).await })
            .await
            .map_err(|e| EtlError::Internal(e.to_string()))?
    }

    /// Copy a source table into the target, replacing the target table.
    ///
    /// A table with known columns and no rows migrates successfully and
    /// leaves an empty target table. A second call for a target that is
    /// still migrating fails with [`EtlError::Conflict`].
    pub async fn migrate(&self, request: MigrationRequest) -> Result<MigrationReport> {
        let migration_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "migration",
            %migration_id,
            table = %request.source,
            target = request.target.as_deref().unwrap_or(&request.source),
        );

        let start = Instant::now();
        let result = self.run(&request).instrument(span.clone()).await;
        let elapsed = start.elapsed();

        span.in_scope(|| match &result {
            Ok(report) => {
                self.metrics.migrations_total.with_label_values(&["success"]).inc();
                self.metrics
                    .migration_duration
                    .with_label_values(&[report.table.as_str()])
                    .observe(elapsed.as_secs_f64());
                self.metrics
                    .rows_migrated
                    .with_label_values(&[report.table.as_str()])
                    .inc_by(report.rows as f64);
                tracing::info!(
                    rows = report.rows,
                    duration_ms = elapsed.as_millis() as u64,
                    "Migration completed"
                );
            }
            Err(e) => {
                self.metrics.migrations_total.with_label_values(&[e.kind()]).inc();
                tracing::error!(
                    error_kind = e.kind(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Migration failed: {}",
                    e
                );
            }
        });

        result
    }

    async fn run(&self, request: &MigrationRequest) -> Result<MigrationReport> {
        let source = TableName::parse(&request.source)?;
        let target = match &request.target {
            Some(target) => TableName::parse(target)?,
            None => source.clone(),
        };
        self.check_allowed(&source)?;
        self.check_allowed(&target)?;

        let _guard = self
            .locks
            .try_acquire(&target.lock_key())
            .ok_or_else(|| EtlError::Conflict {
                table: target.to_string(),
            })?;
        let _active = ActiveMigration::start(&self.metrics.active_migrations);

        tracing::info!("Starting migration");

        let mut data = self.extractor.extract(&source).await?;
        if !data.has_schema() {
            return Err(EtlError::EmptySchema {
                table: source.to_string(),
            });
        }
        rename_columns(&target, &mut data, &request.rename)?;

        let rows = self.loader.load(&target, &data).await?;

        Ok(MigrationReport {
            table: target.to_string(),
            rows,
        })
    }

    fn check_allowed(&self, table: &TableName) -> Result<()> {
        match &self.allowed_tables {
            Some(allowed) if !allowed.contains(&table.to_string()) => {
                Err(EtlError::TableNotAllowed(table.to_string()))
            }
            _ => Ok(()),
        }
    }

    #[cfg(test)]
    pub fn is_running(&self, table_name: &str) -> bool {
        TableName::parse(table_name)
            .map(|t| self.locks.is_locked(&t.lock_key()))
            .unwrap_or(false)
    }
}

/// Keeps `etl_active_migrations` raised while alive
struct ActiveMigration(IntGauge);

impl ActiveMigration {
    fn start(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for ActiveMigration {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Apply source -> target column renames in place.
///
/// Every key must name an extracted column and the renamed column list
/// must stay free of duplicates.
fn rename_columns(
    target: &TableName,
    data: &mut RowSet,
    renames: &BTreeMap<String, String>,
) -> Result<()> {
    if renames.is_empty() {
        return Ok(());
    }

    if let Some(missing) = renames.keys().find(|from| !data.columns.contains(from)) {
        return Err(EtlError::InvalidRename(format!(
            "column {missing:?} does not exist in the source table"
        )));
    }

    let renamed: Vec<String> = data
        .columns
        .iter()
        .map(|c| renames.get(c).cloned().unwrap_or_else(|| c.clone()))
        .collect();

    let mut seen = HashSet::new();
    for column in &renamed {
        quote_column(target, column)?;
        if !seen.insert(column.as_str()) {
            return Err(EtlError::InvalidRename(format!(
                "column {column:?} would appear twice in table {target}"
            )));
        }
    }

    data.columns = renamed;
    Ok(())
}
