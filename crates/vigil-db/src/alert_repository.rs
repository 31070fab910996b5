use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use vigil_core::error::AppError;
use vigil_core::models::{Alert, AlertKind, AlertSeverity, AlertStatus, NewAlert, Verdict};

/// Repository for alerts raised by the monitoring core.
#[derive(Clone)]
pub struct AlertRepository {
    pool: Pool<Postgres>,
}

impl AlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, alert: NewAlert) -> Result<Alert, AppError> {
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            INSERT INTO alerts (site_id, snapshot_id, kind, severity, title, description,
                verdict_label, confidence, similarity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(alert.site_id)
        .bind(alert.snapshot_id)
        .bind(alert.kind.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.description)
        .bind(alert.verdict_label.map(|v| v.as_str()))
        .bind(alert.confidence)
        .bind(alert.similarity)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        row.try_into()
    }

    pub async fn open(&self, site_id: Option<Uuid>, limit: usize) -> Result<Vec<Alert>, AppError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM alerts
            WHERE status = 'open' AND ($1::uuid IS NULL OR site_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(site_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Operator-side status transitions; the core never calls this.
    pub async fn update_status(&self, alert_id: Uuid, status: AlertStatus) -> Result<(), AppError> {
        sqlx::query("UPDATE alerts SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(alert_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// False-positive share of the site's newest `window` adjudicated
    /// alerts; `None` when nothing has been adjudicated yet.
    pub async fn false_positive_rate(
        &self,
        site_id: Uuid,
        window: usize,
    ) -> Result<Option<f64>, AppError> {
        let (false_positives, total): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE status = 'false_positive'),
                   COUNT(*)
            FROM (
                SELECT status FROM alerts
                WHERE site_id = $1 AND status IN ('resolved', 'false_positive')
                ORDER BY updated_at DESC
                LIMIT $2
            ) recent
            "#,
        )
        .bind(site_id)
        .bind(window as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        if total == 0 {
            return Ok(None);
        }
        Ok(Some(false_positives as f64 / total as f64))
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    site_id: Uuid,
    snapshot_id: Option<Uuid>,
    kind: String,
    severity: String,
    title: String,
    description: String,
    verdict_label: Option<String>,
    confidence: Option<f64>,
    similarity: Option<f64>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = AppError;

    fn try_from(row: AlertRow) -> Result<Self, AppError> {
        let kind: AlertKind = row
            .kind
            .parse()
            .map_err(|e: String| AppError::StorageError(e))?;
        let severity: AlertSeverity = row
            .severity
            .parse()
            .map_err(|e: String| AppError::StorageError(e))?;
        let status: AlertStatus = row
            .status
            .parse()
            .map_err(|e: String| AppError::StorageError(e))?;

        Ok(Alert {
            id: row.id,
            site_id: row.site_id,
            snapshot_id: row.snapshot_id,
            kind,
            severity,
            title: row.title,
            description: row.description,
            verdict_label: row.verdict_label.and_then(|v| v.parse::<Verdict>().ok()),
            confidence: row.confidence,
            similarity: row.similarity,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
