use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, Instrument};

use crate::config::DatabaseConfig;
use crate::errors::error_logging;
use crate::models::{AnalysisResult, HealthLevel, NutrientRecord, StoredAnalysis};
use crate::observability;
use crate::store::{page_offset, AnalysisStore};

const ANALYSIS_COLUMNS: &str = "id, user_id, image_reference, original_image_name, \
     extracted_data::text AS extracted_data, health_score, health_level, \
     recommendations::text AS recommendations, created_at";

/// Open a connection pool using the pool settings of `config`
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let database_url = config.url.as_deref().context("DATABASE_URL is not set")?;
    info!(max_connections = config.max_connections, "Connecting to PostgreSQL");

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
        .context("Failed to connect to database")
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS analyses (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            image_reference TEXT NOT NULL,
            original_image_name TEXT,
            extracted_data JSONB NOT NULL,
            health_score SMALLINT NOT NULL CHECK (health_score BETWEEN 0 AND 100),
            health_level VARCHAR(16) NOT NULL,
            recommendations JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create analyses table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS analyses_user_created_idx ON analyses(user_id, created_at DESC)",
    )
    .execute(pool)
    .await
    .context("Failed to create analyses user_id index")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Insert a finished analysis and return it with its id
pub async fn create_analysis(
    pool: &PgPool,
    user_id: i64,
    result: &AnalysisResult,
) -> Result<StoredAnalysis> {
    debug!(user_id = %user_id, "Creating new analysis");

    let extracted_data =
        serde_json::to_string(&result.extracted_data).context("Failed to encode nutrient record")?;
    let recommendations =
        serde_json::to_string(&result.recommendations).context("Failed to encode recommendations")?;

    let row = sqlx::query(
        "INSERT INTO analyses (user_id, image_reference, original_image_name, extracted_data,
                               health_score, health_level, recommendations, created_at)
         VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7::jsonb, $8)
         RETURNING id",
    )
    .bind(user_id)
    .bind(&result.image_reference)
    .bind(&result.original_image_name)
    .bind(extracted_data)
    .bind(i16::from(result.health_score))
    .bind(result.health_level.as_str())
    .bind(recommendations)
    .bind(result.created_at)
    .fetch_one(pool)
    .await
    .context("Failed to insert new analysis")?;

    let id: i64 = row.get(0);
    debug!(analysis_id = %id, "Analysis created successfully");

    Ok(StoredAnalysis {
        id,
        user_id,
        result: result.clone(),
    })
}

/// List one page of a user's analyses, newest first, with the user's total
pub async fn list_analyses_by_user(
    pool: &PgPool,
    user_id: i64,
    page: u32,
    page_size: u32,
) -> Result<(Vec<StoredAnalysis>, u64)> {
    debug!(user_id = %user_id, page, page_size, "Listing analyses");

    let offset = i64::try_from(page_offset(page, page_size)).context("Page offset out of range")?;

    let rows = sqlx::query(&format!(
        "SELECT {ANALYSIS_COLUMNS} FROM analyses
         WHERE user_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(i64::from(page_size))
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to list analyses")?;

    let total: i64 = sqlx::query("SELECT COUNT(*) FROM analyses WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .context("Failed to count analyses")?
        .get(0);

    let analyses = rows
        .iter()
        .map(analysis_from_row)
        .collect::<Result<Vec<_>>>()?;

    debug!(user_id = %user_id, count = analyses.len(), total, "Analyses listed");
    Ok((analyses, u64::try_from(total).unwrap_or(0)))
}

/// Read one analysis owned by `user_id`
pub async fn read_analysis(pool: &PgPool, id: i64, user_id: i64) -> Result<Option<StoredAnalysis>> {
    debug!(analysis_id = %id, user_id = %user_id, "Reading analysis");

    let row = sqlx::query(&format!(
        "SELECT {ANALYSIS_COLUMNS} FROM analyses WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("Failed to read analysis")?;

    match row {
        Some(row) => {
            debug!(analysis_id = %id, "Analysis found");
            Ok(Some(analysis_from_row(&row)?))
        }
        None => {
            debug!(analysis_id = %id, "No analysis found");
            Ok(None)
        }
    }
}

/// Delete one analysis owned by `user_id`
pub async fn delete_analysis(pool: &PgPool, id: i64, user_id: i64) -> Result<bool> {
    debug!(analysis_id = %id, user_id = %user_id, "Deleting analysis");

    let result = sqlx::query("DELETE FROM analyses WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to delete analysis")?;

    if result.rows_affected() > 0 {
        debug!(analysis_id = %id, "Analysis deleted successfully");
        Ok(true)
    } else {
        info!("No analysis found with ID: {id}");
        Ok(false)
    }
}

fn analysis_from_row(row: &PgRow) -> Result<StoredAnalysis> {
    let extracted_data: String = row.try_get("extracted_data")?;
    let recommendations: String = row.try_get("recommendations")?;
    let health_score: i16 = row.try_get("health_score")?;
    let health_level: String = row.try_get("health_level")?;

    Ok(StoredAnalysis {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        result: AnalysisResult {
            image_reference: row.try_get("image_reference")?,
            original_image_name: row.try_get("original_image_name")?,
            extracted_data: serde_json::from_str::<NutrientRecord>(&extracted_data)
                .context("Failed to decode stored nutrient record")?,
            health_score: u8::try_from(health_score)
                .with_context(|| format!("Stored health score out of range: {health_score}"))?,
            health_level: health_level
                .parse::<HealthLevel>()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Failed to decode stored health level")?,
            recommendations: serde_json::from_str(&recommendations)
                .context("Failed to decode stored recommendations")?,
            created_at: row.try_get("created_at")?,
        },
    })
}

/// [`AnalysisStore`] backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgAnalysisStore {
    pool: PgPool,
}

impl PgAnalysisStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Run a database call inside a span and record its metrics and failures
async fn instrumented<T, F>(operation: &'static str, user_id: i64, analysis_id: Option<i64>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = fut
        .instrument(observability::db_span(operation, "analyses"))
        .await;
    observability::record_db_metrics(operation, start.elapsed());

    if let Err(e) = &result {
        error_logging::log_database_error(e, operation, Some(user_id), analysis_id);
    }
    result
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn save(&self, user_id: i64, result: &AnalysisResult) -> Result<StoredAnalysis> {
        instrumented(
            "create_analysis",
            user_id,
            None,
            create_analysis(&self.pool, user_id, result),
        )
        .await
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<StoredAnalysis>, u64)> {
        instrumented(
            "list_analyses_by_user",
            user_id,
            None,
            list_analyses_by_user(&self.pool, user_id, page, page_size),
        )
        .await
    }

    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<Option<StoredAnalysis>> {
        instrumented(
            "read_analysis",
            user_id,
            Some(id),
            read_analysis(&self.pool, id, user_id),
        )
        .await
    }

    async fn delete_by_id(&self, id: i64, user_id: i64) -> Result<bool> {
        instrumented(
            "delete_analysis",
            user_id,
            Some(id),
            delete_analysis(&self.pool, id, user_id),
        )
        .await
    }
}
