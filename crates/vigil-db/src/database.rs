use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use vigil_core::error::AppError;
use vigil_core::models::{
    Alert, ClassifierWeights, ContentVector, NewAlert, NewSite, NewSnapshot, Site, Snapshot,
    Verdict,
};
use vigil_core::traits::MonitorStore;

use crate::alert_repository::AlertRepository;
use crate::config::DatabaseConfig;
use crate::site_repository::SiteRepository;
use crate::snapshot_repository::SnapshotRepository;
use crate::vector_repository::VectorRepository;

/// Central database facade — owns the connection pool, runs migrations,
/// vends repositories, and implements the core's storage port.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::StorageError(format!("failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn sites(&self) -> SiteRepository {
        SiteRepository::new(self.pool.clone())
    }

    pub fn snapshots(&self) -> SnapshotRepository {
        SnapshotRepository::new(self.pool.clone())
    }

    pub fn alerts(&self) -> AlertRepository {
        AlertRepository::new(self.pool.clone())
    }

    pub fn vectors(&self) -> VectorRepository {
        VectorRepository::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        Ok(())
    }
}

impl MonitorStore for Database {
    async fn create_site(&self, site: NewSite) -> Result<Site, AppError> {
        self.sites().create(site).await
    }

    async fn get_site(&self, id: Uuid) -> Result<Option<Site>, AppError> {
        self.sites().get(id).await
    }

    async fn list_sites(&self, active_only: bool) -> Result<Vec<Site>, AppError> {
        self.sites().list(active_only).await
    }

    async fn update_site(&self, site: &Site) -> Result<(), AppError> {
        self.sites().update(site).await
    }

    async fn delete_site(&self, id: Uuid) -> Result<(), AppError> {
        self.sites().delete(id).await
    }

    async fn save_snapshot(&self, snapshot: NewSnapshot) -> Result<Snapshot, AppError> {
        self.snapshots().save(snapshot).await
    }

    async fn latest_snapshot(&self, site_id: Uuid) -> Result<Option<Snapshot>, AppError> {
        self.snapshots().latest(site_id).await
    }

    async fn baseline_snapshot(&self, site_id: Uuid) -> Result<Option<Snapshot>, AppError> {
        self.snapshots().baseline(site_id).await
    }

    async fn recent_snapshots(
        &self,
        site_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Snapshot>, AppError> {
        self.snapshots().recent(site_id, limit).await
    }

    async fn update_snapshot_verdict(
        &self,
        snapshot_id: Uuid,
        verdict: Verdict,
        confidence: f64,
    ) -> Result<(), AppError> {
        self.snapshots()
            .update_verdict(snapshot_id, verdict, confidence)
            .await
    }

    async fn prune_snapshots(&self, site_id: Uuid, keep: u32) -> Result<u64, AppError> {
        self.snapshots().prune(site_id, keep).await
    }

    async fn save_alert(&self, alert: NewAlert) -> Result<Alert, AppError> {
        self.alerts().save(alert).await
    }

    async fn open_alerts(
        &self,
        site_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Alert>, AppError> {
        self.alerts().open(site_id, limit).await
    }

    async fn false_positive_rate(
        &self,
        site_id: Uuid,
        window: usize,
    ) -> Result<Option<f64>, AppError> {
        self.alerts().false_positive_rate(site_id, window).await
    }

    async fn save_vectors(&self, vectors: &[ContentVector]) -> Result<(), AppError> {
        self.vectors().save_all(vectors).await
    }

    async fn vectors_for_snapshot(
        &self,
        snapshot_id: Uuid,
    ) -> Result<Vec<ContentVector>, AppError> {
        self.vectors().for_snapshot(snapshot_id).await
    }

    async fn get_weights(&self, site_id: Uuid) -> Result<Option<ClassifierWeights>, AppError> {
        self.vectors().get_weights(site_id).await
    }

    async fn save_weights(
        &self,
        site_id: Uuid,
        weights: ClassifierWeights,
    ) -> Result<(), AppError> {
        self.vectors().save_weights(site_id, weights).await
    }
}
