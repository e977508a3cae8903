use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::db::models::{Camera, Detection};
use crate::db::repositories::{cameras::CamerasRepository, detections::DetectionsRepository};
use crate::detection::DetectedObject;

/// Storage used by the live stream
#[async_trait]
pub trait MonitoringStore: Send + Sync {
    async fn camera_by_id(&self, camera_id: &str) -> Result<Option<Camera>>;

    async fn update_camera_status(&self, camera: &Camera, status: &str) -> Result<()>;

    /// Persist a batch atomically; every row shares `detected_at`
    async fn insert_detections(
        &self,
        camera: &Camera,
        detected_at: DateTime<Utc>,
        objects: &[DetectedObject],
    ) -> Result<Vec<Detection>>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgMonitoringStore {
    cameras: CamerasRepository,
    detections: DetectionsRepository,
}

impl PgMonitoringStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            cameras: CamerasRepository::new(pool.clone()),
            detections: DetectionsRepository::new(pool),
        }
    }
}

#[async_trait]
impl MonitoringStore for PgMonitoringStore {
    async fn camera_by_id(&self, camera_id: &str) -> Result<Option<Camera>> {
        self.cameras.get_by_camera_id(camera_id).await
    }

    async fn update_camera_status(&self, camera: &Camera, status: &str) -> Result<()> {
        self.cameras.update_status(&camera.id, status).await?;
        Ok(())
    }

    async fn insert_detections(
        &self,
        camera: &Camera,
        detected_at: DateTime<Utc>,
        objects: &[DetectedObject],
    ) -> Result<Vec<Detection>> {
        self.detections
            .create_batch(camera, detected_at, objects)
            .await
    }
}
