use crate::{
    db::models::{local_day_bounds, Camera, Detection, DetectionFilter},
    db::repositories::db_error,
    detection::DetectedObject,
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Detections repository, append-only
#[derive(Clone)]
pub struct DetectionsRepository {
    pool: Arc<PgPool>,
}

impl DetectionsRepository {
    /// Create a new detections repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Insert one row per object, all sharing `detected_at`, in a single transaction
    pub async fn create_batch(
        &self,
        camera: &Camera,
        detected_at: DateTime<Utc>,
        objects: &[DetectedObject],
    ) -> Result<Vec<Detection>> {
        info!(
            "Saving {} detections for camera {}",
            objects.len(),
            camera.camera_id
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let mut saved = Vec::with_capacity(objects.len());
        for object in objects {
            let bbox = &object.bbox;
            let confidence = object.confidence.clamp(0.0, 1.0);
            let (id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
                r#"
                INSERT INTO detections (
                    id, camera_ref, detected_at, class_id, class_name, confidence,
                    bbox_x, bbox_y, bbox_width, bbox_height
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING id, created_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(camera.id)
            .bind(detected_at)
            .bind(object.class_id)
            .bind(&object.class_name)
            .bind(confidence)
            .bind(bbox.x1)
            .bind(bbox.y1)
            .bind(bbox.width())
            .bind(bbox.height())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to save detection: {}", e)))?;

            saved.push(Detection {
                id,
                camera_ref: camera.id,
                camera_id: camera.camera_id.clone(),
                detected_at,
                class_id: object.class_id,
                class_name: object.class_name.clone(),
                confidence,
                bbox_x: bbox.x1,
                bbox_y: bbox.y1,
                bbox_width: bbox.width(),
                bbox_height: bbox.height(),
                created_at,
            });
        }

        tx.commit()
            .await
            .map_err(|e| db_error("commit detections", e))?;

        Ok(saved)
    }

    /// List detections newest first
    pub async fn list(&self, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT d.id, d.camera_ref, c.camera_id, d.detected_at, d.class_id, d.class_name,
                   d.confidence, d.bbox_x, d.bbox_y, d.bbox_width, d.bbox_height, d.created_at
            FROM detections d
            JOIN cameras c ON c.id = d.camera_ref
            WHERE TRUE
            "#,
        );

        if let Some(camera_id) = &filter.camera_id {
            builder.push(" AND c.camera_id = ").push_bind(camera_id.clone());
        }
        if let Some(date) = filter.date {
            let (start, end) = local_day_bounds(date)?;
            builder.push(" AND d.detected_at >= ").push_bind(start);
            builder.push(" AND d.detected_at < ").push_bind(end);
        }
        builder
            .push(" ORDER BY d.detected_at DESC, d.created_at DESC LIMIT ")
            .push_bind(filter.effective_limit());

        debug!("Listing detections with {:?}", filter);

        let result = builder
            .build_query_as::<Detection>()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to list detections: {}", e)))?;

        Ok(result)
    }

    /// Timestamp of the most recent detection of a camera
    pub async fn latest_for_camera(&self, camera_ref: &Uuid) -> Result<Option<DateTime<Utc>>> {
        let result = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(detected_at)
            FROM detections
            WHERE camera_ref = $1
            "#,
        )
        .bind(camera_ref)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get latest detection: {}", e)))?;

        Ok(result)
    }
}
