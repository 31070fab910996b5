use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use vigil_core::error::AppError;
use vigil_core::hashing::FingerprintSet;
use vigil_core::models::{NewSnapshot, Snapshot, Verdict};

/// Repository for page snapshots, indexed `(site_id, captured_at DESC)`.
#[derive(Clone)]
pub struct SnapshotRepository {
    pool: Pool<Postgres>,
}

impl SnapshotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, snapshot: NewSnapshot) -> Result<Snapshot, AppError> {
        let outline = serde_json::to_value(&snapshot.outline)
            .map_err(|e| AppError::StorageError(format!("outline serialization: {e}")))?;

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            INSERT INTO snapshots (id, site_id, http_status, response_time_ms, raw_html,
                extracted_text, content_hash, structure_hash, text_block_hash, semantic_hash,
                outline, truncated, vector_ref, prev_similarity, verdict, confidence)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(snapshot.id)
        .bind(snapshot.site_id)
        .bind(snapshot.http_status as i32)
        .bind(snapshot.response_time_ms)
        .bind(&snapshot.raw_html)
        .bind(&snapshot.extracted_text)
        .bind(&snapshot.fingerprints.content_hash)
        .bind(&snapshot.fingerprints.structure_hash)
        .bind(&snapshot.fingerprints.text_block_hash)
        .bind(&snapshot.fingerprints.semantic_hash)
        .bind(outline)
        .bind(snapshot.truncated)
        .bind(snapshot.vector_ref)
        .bind(snapshot.prev_similarity)
        .bind(snapshot.verdict.map(|v| v.as_str()))
        .bind(snapshot.confidence)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        Ok(row.into())
    }

    pub async fn latest(&self, site_id: Uuid) -> Result<Option<Snapshot>, AppError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT * FROM snapshots
            WHERE site_id = $1
            ORDER BY captured_at DESC
            LIMIT 1
            "#,
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    /// Most recent snapshot whose verdict makes it a valid baseline.
    pub async fn baseline(&self, site_id: Uuid) -> Result<Option<Snapshot>, AppError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT * FROM snapshots
            WHERE site_id = $1 AND verdict IN ('benign', 'initial')
            ORDER BY captured_at DESC
            LIMIT 1
            "#,
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    pub async fn recent(&self, site_id: Uuid, limit: usize) -> Result<Vec<Snapshot>, AppError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT * FROM snapshots
            WHERE site_id = $1
            ORDER BY captured_at DESC
            LIMIT $2
            "#,
        )
        .bind(site_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Back-fill the classifier's verdict onto a persisted snapshot.
    pub async fn update_verdict(
        &self,
        snapshot_id: Uuid,
        verdict: Verdict,
        confidence: f64,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE snapshots SET verdict = $2, confidence = $3 WHERE id = $1")
            .bind(snapshot_id)
            .bind(verdict.as_str())
            .bind(confidence)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Keep only the newest `keep` snapshots for a site. Vectors follow
    /// their snapshot out via the FK cascade.
    pub async fn prune(&self, site_id: Uuid, keep: u32) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM snapshots
            WHERE site_id = $1 AND id NOT IN (
                SELECT id FROM snapshots
                WHERE site_id = $1
                ORDER BY captured_at DESC
                LIMIT $2
            )
            "#,
        )
        .bind(site_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: Uuid,
    site_id: Uuid,
    captured_at: DateTime<Utc>,
    http_status: i32,
    response_time_ms: f64,
    raw_html: Option<Vec<u8>>,
    extracted_text: String,
    content_hash: String,
    structure_hash: String,
    text_block_hash: String,
    semantic_hash: String,
    outline: serde_json::Value,
    truncated: bool,
    vector_ref: Option<Uuid>,
    prev_similarity: Option<f64>,
    verdict: Option<String>,
    confidence: Option<f64>,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Snapshot {
            id: row.id,
            site_id: row.site_id,
            captured_at: row.captured_at,
            http_status: row.http_status as u16,
            response_time_ms: row.response_time_ms,
            raw_html: row.raw_html,
            extracted_text: row.extracted_text,
            fingerprints: FingerprintSet {
                content_hash: row.content_hash,
                structure_hash: row.structure_hash,
                text_block_hash: row.text_block_hash,
                semantic_hash: row.semantic_hash,
            },
            outline: serde_json::from_value(row.outline).unwrap_or_default(),
            truncated: row.truncated,
            vector_ref: row.vector_ref,
            prev_similarity: row.prev_similarity,
            verdict: row.verdict.and_then(|v| v.parse().ok()),
            confidence: row.confidence,
        }
    }
}
