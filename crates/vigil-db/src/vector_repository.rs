use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use vigil_core::error::AppError;
use vigil_core::models::{ClassifierWeights, ContentVector, VectorKind};

/// Repository for content vectors and per-site classifier weights.
///
/// Vectors live exactly as long as their snapshot: the FK cascade removes
/// them when the snapshot is pruned or its site deleted.
#[derive(Clone)]
pub struct VectorRepository {
    pool: Pool<Postgres>,
}

impl VectorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn save_all(&self, vectors: &[ContentVector]) -> Result<(), AppError> {
        for vector in vectors {
            sqlx::query(
                r#"
                INSERT INTO vectors (id, site_id, snapshot_id, kind, dimension, payload)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(vector.id)
            .bind(vector.site_id)
            .bind(vector.snapshot_id)
            .bind(vector.kind.as_str())
            .bind(vector.dimension as i32)
            .bind(&vector.payload)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn for_snapshot(&self, snapshot_id: Uuid) -> Result<Vec<ContentVector>, AppError> {
        let rows = sqlx::query_as::<_, VectorRow>(
            "SELECT * FROM vectors WHERE snapshot_id = $1",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn get_weights(&self, site_id: Uuid) -> Result<Option<ClassifierWeights>, AppError> {
        let row: Option<(f64, f64, f64)> = sqlx::query_as(
            "SELECT llm, semantic, rules FROM classifier_weights WHERE site_id = $1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;

        Ok(row.map(|(llm, semantic, rules)| ClassifierWeights {
            llm,
            semantic,
            rules,
        }))
    }

    pub async fn save_weights(
        &self,
        site_id: Uuid,
        weights: ClassifierWeights,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO classifier_weights (site_id, llm, semantic, rules)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (site_id)
            DO UPDATE SET llm = $2, semantic = $3, rules = $4, updated_at = NOW()
            "#,
        )
        .bind(site_id)
        .bind(weights.llm)
        .bind(weights.semantic)
        .bind(weights.rules)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct VectorRow {
    id: Uuid,
    site_id: Uuid,
    snapshot_id: Uuid,
    kind: String,
    dimension: i32,
    payload: Vec<f32>,
}

impl TryFrom<VectorRow> for ContentVector {
    type Error = AppError;

    fn try_from(row: VectorRow) -> Result<Self, AppError> {
        let kind: VectorKind = row
            .kind
            .parse()
            .map_err(|e: String| AppError::StorageError(e))?;
        Ok(ContentVector {
            id: row.id,
            site_id: row.site_id,
            snapshot_id: row.snapshot_id,
            kind,
            dimension: row.dimension as usize,
            payload: row.payload,
        })
    }
}
