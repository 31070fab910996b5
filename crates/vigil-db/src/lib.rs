pub mod alert_repository;
pub mod config;
pub mod database;
pub mod site_repository;
pub mod snapshot_repository;
pub mod vector_repository;

pub use alert_repository::AlertRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use site_repository::SiteRepository;
pub use snapshot_repository::SnapshotRepository;
pub use vector_repository::VectorRepository;
