use crate::{
    db::models::{Camera, CameraPayload},
    db::repositories::db_error,
    error::Error,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const CAMERA_COLUMNS: &str =
    "id, camera_id, camera_link, camera_status, camera_loc, created_at, updated_at";

/// Cameras repository for handling camera operations
#[derive(Clone)]
pub struct CamerasRepository {
    pool: Arc<PgPool>,
}

impl CamerasRepository {
    /// Create a new cameras repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new camera
    pub async fn create(&self, camera: &CameraPayload) -> Result<Camera> {
        info!("Creating new camera: {}", camera.camera_id);

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("acquire connection", e))?;
        Ok(insert_camera(&mut conn, camera).await?)
    }

    /// Get camera by its public identifier
    pub async fn get_by_camera_id(&self, camera_id: &str) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            "SELECT {} FROM cameras WHERE camera_id = $1",
            CAMERA_COLUMNS
        ))
        .bind(camera_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera by ID: {}", e)))?;

        Ok(result)
    }

    /// Get all cameras
    pub async fn get_all(&self) -> Result<Vec<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            "SELECT {} FROM cameras ORDER BY camera_id",
            CAMERA_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get all cameras: {}", e)))?;

        Ok(result)
    }

    /// Replace every field of a camera, the identifier included
    pub async fn update(&self, camera_id: &str, camera: &CameraPayload) -> Result<Option<Camera>> {
        info!("Updating camera: {}", camera_id);

        let result = sqlx::query_as::<_, Camera>(&format!(
            r#"
            UPDATE cameras
            SET camera_id = $1, camera_link = $2, camera_status = $3,
                camera_loc = $4, updated_at = $5
            WHERE camera_id = $6
            RETURNING {}
            "#,
            CAMERA_COLUMNS
        ))
        .bind(camera.camera_id.trim())
        .bind(camera.camera_link.trim())
        .bind(&camera.camera_status)
        .bind(&camera.camera_loc)
        .bind(Utc::now())
        .bind(camera_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| db_error("update camera", e))?;

        Ok(result)
    }

    /// Overwrite only the status column
    pub async fn update_status(&self, id: &Uuid, status: &str) -> Result<bool> {
        info!("Setting camera {} status to '{}'", id, status);

        let result = sqlx::query(
            r#"
            UPDATE cameras
            SET camera_status = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update camera status: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete camera together with its detections and dashboard links
    pub async fn delete(&self, camera_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM cameras
            WHERE camera_id = $1
            "#,
        )
        .bind(camera_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to delete camera: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}

/// Insert a camera on an existing connection, so it can join a transaction
pub(crate) async fn insert_camera(
    conn: &mut PgConnection,
    camera: &CameraPayload,
) -> Result<Camera, Error> {
    let now = Utc::now();
    sqlx::query_as::<_, Camera>(&format!(
        r#"
        INSERT INTO cameras (
            id, camera_id, camera_link, camera_status, camera_loc, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        CAMERA_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(camera.camera_id.trim())
    .bind(camera.camera_link.trim())
    .bind(&camera.camera_status)
    .bind(&camera.camera_loc)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("create camera", e))
}

/// Look up a camera on an existing connection
pub(crate) async fn find_camera(conn: &mut PgConnection, camera_id: &str) -> Result<Camera, Error> {
    sqlx::query_as::<_, Camera>(&format!(
        "SELECT {} FROM cameras WHERE camera_id = $1",
        CAMERA_COLUMNS
    ))
    .bind(camera_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| db_error("get camera", e))?
    .ok_or_else(|| Error::NotFound(format!("Camera {} not found", camera_id)))
}
