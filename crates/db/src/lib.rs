pub mod analytics;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use analytics::SqliteAnalytics;
pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use fixtures::{DemoCatalog, SeedResult, VerificationResult};
pub use repositories::{CatalogRepository, RepositoryError, SqlCatalogRepository};
