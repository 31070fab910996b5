use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use vigil_core::error::AppError;
use vigil_core::models::{NewSite, Site, SiteThresholds};
use vigil_core::schedule::Schedule;

/// Repository for monitored-site records.
#[derive(Clone)]
pub struct SiteRepository {
    pool: Pool<Postgres>,
}

impl SiteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, site: NewSite) -> Result<Site, AppError> {
        let row = sqlx::query_as::<_, SiteRow>(
            r#"
            INSERT INTO sites (url, name, schedule, max_depth, priority,
                similarity_threshold, structural_threshold, critical_change_threshold, keep_scans)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&site.url)
        .bind(&site.name)
        .bind(site.schedule.as_str())
        .bind(site.max_depth as i32)
        .bind(site.priority)
        .bind(site.thresholds.similarity)
        .bind(site.thresholds.structural)
        .bind(site.thresholds.critical_change)
        .bind(site.keep_scans.map(|k| k as i32))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        row.try_into()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Site>, AppError> {
        let row = sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<Site>, AppError> {
        let rows = sqlx::query_as::<_, SiteRow>(
            r#"
            SELECT * FROM sites
            WHERE ($1 = FALSE OR active)
            ORDER BY created_at
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn update(&self, site: &Site) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE sites
            SET url = $2, name = $3, schedule = $4, active = $5, max_depth = $6,
                priority = $7, similarity_threshold = $8, structural_threshold = $9,
                critical_change_threshold = $10, keep_scans = $11, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(site.id)
        .bind(&site.url)
        .bind(&site.name)
        .bind(site.schedule.as_str())
        .bind(site.active)
        .bind(site.max_depth as i32)
        .bind(site.priority)
        .bind(site.thresholds.similarity)
        .bind(site.thresholds.structural)
        .bind(site.thresholds.critical_change)
        .bind(site.keep_scans.map(|k| k as i32))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Delete a site. Snapshots, vectors, alerts and weights cascade.
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sites WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: Uuid,
    url: String,
    name: String,
    schedule: String,
    active: bool,
    max_depth: i32,
    priority: i32,
    similarity_threshold: Option<f64>,
    structural_threshold: Option<f64>,
    critical_change_threshold: Option<f64>,
    keep_scans: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SiteRow> for Site {
    type Error = AppError;

    fn try_from(row: SiteRow) -> Result<Self, AppError> {
        let schedule = Schedule::parse(&row.schedule).map_err(|e| {
            AppError::StorageError(format!("site {} has invalid schedule: {e}", row.id))
        })?;

        Ok(Site {
            id: row.id,
            url: row.url,
            name: row.name,
            schedule,
            active: row.active,
            max_depth: row.max_depth as u32,
            priority: row.priority,
            thresholds: SiteThresholds {
                similarity: row.similarity_threshold,
                structural: row.structural_threshold,
                critical_change: row.critical_change_threshold,
            },
            keep_scans: row.keep_scans.map(|k| k as u32),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
