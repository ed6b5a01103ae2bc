pub mod extract;
pub mod load;
pub mod lock;
pub mod migrate;
pub mod models;

pub use extract::PgExtractor;
pub use load::{Loader, PgLoader};
pub use migrate::Migrator;
pub use models::{MigrationRequest, MigrationResult, RowSet};
