use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Prometheus metrics for migrations and HTTP traffic
pub struct Metrics {
    registry: Registry,
    pub migrations_total: CounterVec,
    pub migration_duration: HistogramVec,
    pub rows_migrated: CounterVec,
    pub active_migrations: IntGauge,
    pub http_requests: CounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let migrations_total = CounterVec::new(
            Opts::new("etl_migrations_total", "Finished migrations by outcome"),
            &["status"],
        )?;

        let migration_duration = HistogramVec::new(
            HistogramOpts::new(
                "etl_migration_duration_seconds",
                "Wall time of one extract + load in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0]),
            &["table"],
        )?;

        let rows_migrated = CounterVec::new(
            Opts::new("etl_rows_migrated_total", "Rows written to target tables"),
            &["table"],
        )?;

        let active_migrations =
            IntGauge::new("etl_active_migrations", "Migrations currently running")?;

        let http_requests = CounterVec::new(
            Opts::new("etl_http_requests_total", "HTTP requests served"),
            &["method", "status"],
        )?;

        registry.register(Box::new(migrations_total.clone()))?;
        registry.register(Box::new(migration_duration.clone()))?;
        registry.register(Box::new(rows_migrated.clone()))?;
        registry.register(Box::new(active_migrations.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;

        Ok(Self {
            registry,
            migrations_total,
            migration_duration,
            rows_migrated,
            active_migrations,
            http_requests,
        })
    }

    /// Text exposition of everything registered
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
