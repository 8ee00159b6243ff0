//! PostgreSQL metadata store adapter
//!
//! Geometries are stored as GeoJSON (`JSONB`) next to their bounding box
//! columns, which serve region queries. Every persisted unit (a training set,
//! one tile's segmentation, one tile's classified polygons) is written in a
//! single transaction.

pub mod config;
pub mod migrations;

pub use config::{PoolConfig, PostgresConfig};
pub use migrations::{MigrationManager, MigrationStatus};

use async_trait::async_trait;
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{
    AttributeValue, BoundingBox, ClassifierArtifact, Crs, Geometry, ModelSummary, Polygon, Region,
    SegmentationResult, TileKey,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::BTreeMap;
use tokio::time::timeout;
use uuid::Uuid;

use crate::memory::region_bbox_in;
use crate::ports::MetadataStore;

/// Map a driver error, separating unreachable-database failures
fn db_error(context: &str, e: sqlx::Error) -> LandcubeError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            LandcubeError::StoreUnavailable { reason: format!("{}: {}", context, e) }
        }
        other => LandcubeError::Store(format!("{}: {}", context, other)),
    }
}

/// PostgreSQL implementation of `MetadataStore`
pub struct PostgresMetadataStore {
    pool: PgPool,
    config: PostgresConfig,
}

impl PostgresMetadataStore {
    /// Connect, verify the connection and apply migrations when configured
    pub async fn connect(config: PostgresConfig) -> Result<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .min_connections(config.pool.min_connections)
            .max_connections(config.pool.max_connections)
            .acquire_timeout(config.pool.acquire_timeout)
            .idle_timeout(config.pool.idle_timeout)
            .max_lifetime(config.pool.max_lifetime)
            .connect(&config.database_url)
            .await
            .map_err(|e| LandcubeError::StoreUnavailable {
                reason: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool, config };
        store.health_check().await?;

        if store.config.run_migrations {
            MigrationManager::new(store.pool.clone())
                .run_migrations()
                .await
                .map_err(|e| LandcubeError::Store(format!("Migration failed: {}", e)))?;
        }
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| db_error("Failed to begin transaction", e))
    }

    async fn commit(&self, tx: Transaction<'static, Postgres>) -> Result<()> {
        match timeout(self.config.transaction_timeout, tx.commit()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(db_error("Failed to commit transaction", e)),
            Err(_) => Err(LandcubeError::Store(format!(
                "Transaction commit timeout after {}s",
                self.config.transaction_timeout.as_secs()
            ))),
        }
    }

    async fn distinct_crs(&self, sql: &str, key: &str) -> Result<Vec<Crs>> {
        let rows: Vec<(String,)> = sqlx::query_as(sql)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list CRS", e))?;
        rows.into_iter().map(|(crs,)| Crs::parse(&crs).map_err(LandcubeError::from)).collect()
    }
}

fn bbox_of(polygon: &Polygon) -> Result<BoundingBox> {
    polygon.bbox().ok_or_else(|| LandcubeError::InvalidGeometry {
        entity: format!("polygon {}", polygon.id),
        reason: "geometry has no coordinates".to_string(),
    })
}

fn polygon_from_row(row: &PgRow) -> Result<Polygon> {
    let decode = |e: sqlx::Error| db_error("Failed to decode polygon row", e);

    let id: i64 = row.try_get("polygon_id").map_err(decode)?;
    let crs: String = row.try_get("crs").map_err(decode)?;
    let geometry: serde_json::Value = row.try_get("geometry").map_err(decode)?;
    let attributes: serde_json::Value = row.try_get("attributes").map_err(decode)?;
    let class_code: Option<i64> = row.try_get("class_code").unwrap_or(None);

    let geometry: Geometry = serde_json::from_value(geometry)?;
    let attributes: BTreeMap<String, AttributeValue> = serde_json::from_value(attributes)?;

    Ok(Polygon {
        id: id as u64,
        geometry,
        crs: Crs::parse(&crs)?,
        attributes,
        class_code,
    })
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn query_training_polygons(&self, region: &Region, training_set: &str) -> Result<Vec<Polygon>> {
        let crs_list = self
            .distinct_crs("SELECT DISTINCT crs FROM training_polygons WHERE training_set = $1", training_set)
            .await?;

        let mut hits: Vec<(i32, Polygon)> = Vec::new();
        for crs in crs_list {
            let bbox = region_bbox_in(region, &crs)?;
            let rows = sqlx::query(
                r#"
                SELECT polygon_id, class_code, crs, geometry, attributes, position
                FROM training_polygons
                WHERE training_set = $1 AND crs = $2
                  AND min_x < $5 AND max_x > $3 AND min_y < $6 AND max_y > $4
                "#,
            )
            .bind(training_set)
            .bind(crs.definition())
            .bind(bbox.min_x)
            .bind(bbox.min_y)
            .bind(bbox.max_x)
            .bind(bbox.max_y)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to query training polygons", e))?;

            for row in &rows {
                let position: i32 = row.try_get("position").map_err(|e| db_error("Failed to decode row", e))?;
                hits.push((position, polygon_from_row(row)?));
            }
        }

        hits.sort_by_key(|(position, _)| *position);
        Ok(hits.into_iter().map(|(_, p)| p).collect())
    }

    async fn save_training_polygons(&self, training_set: &str, polygons: &[Polygon]) -> Result<usize> {
        let mut tx = self.begin().await?;

        sqlx::query("DELETE FROM training_polygons WHERE training_set = $1")
            .bind(training_set)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to clear training set", e))?;

        for (position, polygon) in polygons.iter().enumerate() {
            let bbox = bbox_of(polygon)?;
            sqlx::query(
                r#"
                INSERT INTO training_polygons
                    (training_set, polygon_id, class_code, crs, geometry, attributes,
                     min_x, min_y, max_x, max_y, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(training_set)
            .bind(polygon.id as i64)
            .bind(polygon.class_code)
            .bind(polygon.crs.definition())
            .bind(serde_json::to_value(&polygon.geometry)?)
            .bind(serde_json::to_value(&polygon.attributes)?)
            .bind(bbox.min_x)
            .bind(bbox.min_y)
            .bind(bbox.max_x)
            .bind(bbox.max_y)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert training polygon", e))?;
        }

        self.commit(tx).await?;
        Ok(polygons.len())
    }

    async fn save_classifier_artifact(&self, name: &str, artifact: &ClassifierArtifact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO classifier_artifacts (name, algorithm, training_set, artifact, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
            SET algorithm = EXCLUDED.algorithm,
                training_set = EXCLUDED.training_set,
                artifact = EXCLUDED.artifact,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(name)
        .bind(&artifact.algorithm)
        .bind(&artifact.training_set)
        .bind(serde_json::to_value(artifact)?)
        .bind(artifact.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save classifier artifact", e))?;
        Ok(())
    }

    async fn load_classifier_artifact(&self, name: &str) -> Result<ClassifierArtifact> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT artifact FROM classifier_artifacts WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to load classifier artifact", e))?;

        let (value,) = row.ok_or_else(|| LandcubeError::ModelNotFound { name: name.to_string() })?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT artifact FROM classifier_artifacts ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("Failed to list models", e))?;

        rows.into_iter()
            .map(|(value,)| Ok(serde_json::from_value::<ClassifierArtifact>(value)?.summary()))
            .collect()
    }

    async fn save_segmentation_result(&self, result: &SegmentationResult) -> Result<()> {
        let info = &result.info;
        let tile_key = result.tile_key.to_string();
        let mut tx = self.begin().await?;

        sqlx::query("DELETE FROM segmentations WHERE name = $1 AND tile_key = $2")
            .bind(&info.name)
            .bind(&tile_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to replace segmentation", e))?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO segmentations (id, name, datasource, year, algorithm, parameters, tile_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&info.name)
        .bind(&info.datasource)
        .bind(info.year)
        .bind(&info.algorithm)
        .bind(&info.parameters)
        .bind(&tile_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert segmentation", e))?;

        for polygon in &result.polygons {
            let bbox = bbox_of(polygon)?;
            sqlx::query(
                r#"
                INSERT INTO segment_polygons
                    (segmentation_id, polygon_id, crs, geometry, attributes, min_x, min_y, max_x, max_y)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(id)
            .bind(polygon.id as i64)
            .bind(polygon.crs.definition())
            .bind(serde_json::to_value(&polygon.geometry)?)
            .bind(serde_json::to_value(&polygon.attributes)?)
            .bind(bbox.min_x)
            .bind(bbox.min_y)
            .bind(bbox.max_x)
            .bind(bbox.max_y)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert segment polygon", e))?;
        }

        self.commit(tx).await
    }

    async fn query_segmentation_polygons(&self, name: &str, region: &Region) -> Result<Vec<Polygon>> {
        let crs_list = self
            .distinct_crs(
                r#"
                SELECT DISTINCT p.crs FROM segment_polygons p
                JOIN segmentations s ON s.id = p.segmentation_id
                WHERE s.name = $1
                "#,
                name,
            )
            .await?;

        let mut polygons = Vec::new();
        for crs in crs_list {
            let bbox = region_bbox_in(region, &crs)?;
            let rows = sqlx::query(
                r#"
                SELECT p.polygon_id, NULL::BIGINT AS class_code, p.crs, p.geometry, p.attributes
                FROM segment_polygons p
                JOIN segmentations s ON s.id = p.segmentation_id
                WHERE s.name = $1 AND p.crs = $2
                  AND p.min_x < $5 AND p.max_x > $3 AND p.min_y < $6 AND p.max_y > $4
                ORDER BY s.tile_key, p.polygon_id
                "#,
            )
            .bind(name)
            .bind(crs.definition())
            .bind(bbox.min_x)
            .bind(bbox.min_y)
            .bind(bbox.max_x)
            .bind(bbox.max_y)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to query segment polygons", e))?;

            for row in &rows {
                polygons.push(polygon_from_row(row)?);
            }
        }
        Ok(polygons)
    }

    async fn save_classified_polygons(
        &self,
        model_name: &str,
        tile_key: &TileKey,
        polygons: &[Polygon],
    ) -> Result<()> {
        let tile_key = tile_key.to_string();
        let mut tx = self.begin().await?;

        sqlx::query("DELETE FROM classified_polygons WHERE model_name = $1 AND tile_key = $2")
            .bind(model_name)
            .bind(&tile_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to replace classified polygons", e))?;

        for polygon in polygons {
            sqlx::query(
                r#"
                INSERT INTO classified_polygons
                    (model_name, tile_key, polygon_id, class_code, crs, geometry, attributes)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(model_name)
            .bind(&tile_key)
            .bind(polygon.id as i64)
            .bind(polygon.class_code)
            .bind(polygon.crs.definition())
            .bind(serde_json::to_value(&polygon.geometry)?)
            .bind(serde_json::to_value(&polygon.attributes)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert classified polygon", e))?;
        }

        self.commit(tx).await
    }

    async fn load_classified_polygons(&self, model_name: &str, tile_key: &TileKey) -> Result<Vec<Polygon>> {
        let rows = sqlx::query(
            r#"
            SELECT polygon_id, class_code, crs, geometry, attributes
            FROM classified_polygons
            WHERE model_name = $1 AND tile_key = $2
            ORDER BY polygon_id
            "#,
        )
        .bind(model_name)
        .bind(tile_key.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load classified polygons", e))?;

        rows.iter().map(polygon_from_row).collect()
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LandcubeError::StoreUnavailable { reason: format!("Health check failed: {}", e) })?;
        Ok(())
    }
}
