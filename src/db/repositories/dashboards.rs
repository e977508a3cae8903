use crate::{
    db::models::{
        ensure_capacity, Camera, CameraPayload, Dashboard, DashboardDb, DashboardWithCameras,
        NewDashboard, RiskChange, RiskChangeDb, RiskLevel, RiskTransition, RiskUpdate,
    },
    db::repositories::{
        cameras::{find_camera, insert_camera},
        db_error,
    },
    error::Error,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const DASHBOARD_COLUMNS: &str = "id, dashboard_id, name, risk_level, created_at, updated_at";

/// Dashboards repository: dashboards, their camera links and risk history
#[derive(Clone)]
pub struct DashboardsRepository {
    pool: Arc<PgPool>,
}

impl DashboardsRepository {
    /// Create a new dashboards repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a dashboard and attach its initial cameras
    pub async fn create(
        &self,
        dashboard: &NewDashboard,
        risk: RiskLevel,
    ) -> Result<DashboardWithCameras> {
        info!("Creating new dashboard: {}", dashboard.dashboard_id);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let now = Utc::now();
        let row = sqlx::query_as::<_, DashboardDb>(&format!(
            r#"
            INSERT INTO dashboards (id, dashboard_id, name, risk_level, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            DASHBOARD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(dashboard.dashboard_id.trim())
        .bind(dashboard.name.trim())
        .bind(risk.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("create dashboard", e))?;
        let created = Dashboard::try_from(row)?;

        let mut cameras = Vec::with_capacity(dashboard.camera_ids.len());
        for camera_id in &dashboard.camera_ids {
            let camera = find_camera(&mut tx, camera_id).await?;
            ensure_capacity(cameras.len())?;
            link_camera(&mut tx, &created.id, &camera.id).await?;
            cameras.push(camera);
        }

        tx.commit()
            .await
            .map_err(|e| db_error("commit dashboard", e))?;

        Ok(DashboardWithCameras::new(created, cameras))
    }

    /// Get dashboard by its public identifier
    pub async fn get(&self, dashboard_id: &str) -> Result<Option<DashboardWithCameras>> {
        let row = sqlx::query_as::<_, DashboardDb>(&format!(
            "SELECT {} FROM dashboards WHERE dashboard_id = $1",
            DASHBOARD_COLUMNS
        ))
        .bind(dashboard_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get dashboard: {}", e)))?;

        match row {
            Some(row) => Ok(Some(self.with_cameras(Dashboard::try_from(row)?).await?)),
            None => Ok(None),
        }
    }

    /// Get all dashboards, oldest first
    pub async fn get_all(&self) -> Result<Vec<DashboardWithCameras>> {
        let rows = sqlx::query_as::<_, DashboardDb>(&format!(
            "SELECT {} FROM dashboards ORDER BY created_at, dashboard_id",
            DASHBOARD_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get all dashboards: {}", e)))?;

        let mut dashboards = Vec::with_capacity(rows.len());
        for row in rows {
            dashboards.push(self.with_cameras(Dashboard::try_from(row)?).await?);
        }
        Ok(dashboards)
    }

    /// Rename a dashboard
    pub async fn update_name(
        &self,
        dashboard_id: &str,
        name: &str,
    ) -> Result<Option<DashboardWithCameras>> {
        let row = sqlx::query_as::<_, DashboardDb>(&format!(
            r#"
            UPDATE dashboards
            SET name = $1, updated_at = $2
            WHERE dashboard_id = $3
            RETURNING {}
            "#,
            DASHBOARD_COLUMNS
        ))
        .bind(name.trim())
        .bind(Utc::now())
        .bind(dashboard_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update dashboard: {}", e)))?;

        match row {
            Some(row) => Ok(Some(self.with_cameras(Dashboard::try_from(row)?).await?)),
            None => Ok(None),
        }
    }

    /// Delete a dashboard; its cameras are kept
    pub async fn delete(&self, dashboard_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM dashboards
            WHERE dashboard_id = $1
            "#,
        )
        .bind(dashboard_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to delete dashboard: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Create a camera and attach it, failing without side effects when the
    /// dashboard is full
    pub async fn add_new_camera(&self, dashboard_id: &str, camera: &CameraPayload) -> Result<Camera> {
        info!(
            "Adding new camera {} to dashboard {}",
            camera.camera_id, dashboard_id
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let dashboard = lock_dashboard(&mut tx, dashboard_id).await?;
        ensure_capacity(count_cameras(&mut tx, &dashboard.id).await?)?;

        let created = insert_camera(&mut tx, camera).await?;
        link_camera(&mut tx, &dashboard.id, &created.id).await?;
        touch(&mut tx, &dashboard.id).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit camera", e))?;

        Ok(created)
    }

    /// Attach an existing camera; attaching an already attached camera is a no-op
    pub async fn attach_camera(
        &self,
        dashboard_id: &str,
        camera_id: &str,
    ) -> Result<DashboardWithCameras> {
        info!("Attaching camera {} to dashboard {}", camera_id, dashboard_id);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let dashboard = lock_dashboard(&mut tx, dashboard_id).await?;
        let camera = find_camera(&mut tx, camera_id).await?;

        let linked: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM dashboard_cameras
                WHERE dashboard_ref = $1 AND camera_ref = $2
            )
            "#,
        )
        .bind(dashboard.id)
        .bind(camera.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("check camera link", e))?;

        if !linked {
            ensure_capacity(count_cameras(&mut tx, &dashboard.id).await?)?;
            link_camera(&mut tx, &dashboard.id, &camera.id).await?;
            touch(&mut tx, &dashboard.id).await?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("commit camera link", e))?;

        self.get(dashboard_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Dashboard {} not found", dashboard_id)).into())
    }

    /// Detach a camera without deleting it. Returns false when it was not attached.
    pub async fn detach_camera(&self, dashboard_id: &str, camera_id: &str) -> Result<bool> {
        info!("Detaching camera {} from dashboard {}", camera_id, dashboard_id);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let dashboard = lock_dashboard(&mut tx, dashboard_id).await?;
        let result = sqlx::query(
            r#"
            DELETE FROM dashboard_cameras dc
            USING cameras c
            WHERE dc.camera_ref = c.id AND dc.dashboard_ref = $1 AND c.camera_id = $2
            "#,
        )
        .bind(dashboard.id)
        .bind(camera_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to detach camera: {}", e)))?;

        let detached = result.rows_affected() > 0;
        if detached {
            touch(&mut tx, &dashboard.id).await?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("commit camera link", e))?;

        Ok(detached)
    }

    /// Move the risk level and append the change to the history
    pub async fn change_risk(
        &self,
        dashboard_id: &str,
        transition: RiskTransition,
        reason: Option<&str>,
    ) -> Result<RiskUpdate> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let dashboard = lock_dashboard(&mut tx, dashboard_id).await?;
        let current = dashboard.risk_level;
        let target = transition.target(current)?;

        if target == current {
            tx.commit()
                .await
                .map_err(|e| db_error("commit risk change", e))?;
            return Ok(RiskUpdate::new(
                dashboard.dashboard_id,
                current,
                target,
                dashboard.updated_at,
            ));
        }

        info!(
            "Changing risk of dashboard {} from {} to {}",
            dashboard_id, current, target
        );

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE dashboards
            SET risk_level = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(target.as_str())
        .bind(now)
        .bind(dashboard.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to update risk level: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO risk_changes (id, dashboard_ref, previous_level, new_level, reason, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(dashboard.id)
        .bind(current.as_str())
        .bind(target.as_str())
        .bind(reason.map(str::trim).filter(|r| !r.is_empty()))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to record risk change: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit risk change", e))?;

        Ok(RiskUpdate::new(dashboard.dashboard_id, current, target, now))
    }

    /// Risk changes of a dashboard, newest first. `None` if the dashboard does not exist.
    pub async fn risk_history(&self, dashboard_id: &str) -> Result<Option<Vec<RiskChange>>> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM dashboards WHERE dashboard_id = $1)")
                .bind(dashboard_id)
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| Error::Database(format!("Failed to get dashboard: {}", e)))?;
        if !exists {
            return Ok(None);
        }

        let rows = sqlx::query_as::<_, RiskChangeDb>(
            r#"
            SELECT r.id, d.dashboard_id, r.previous_level, r.new_level, r.reason, r.changed_at
            FROM risk_changes r
            JOIN dashboards d ON d.id = r.dashboard_ref
            WHERE d.dashboard_id = $1
            ORDER BY r.changed_at DESC
            "#,
        )
        .bind(dashboard_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get risk history: {}", e)))?;

        let history = rows
            .into_iter()
            .map(RiskChange::try_from)
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Some(history))
    }

    async fn with_cameras(&self, dashboard: Dashboard) -> Result<DashboardWithCameras> {
        let cameras = sqlx::query_as::<_, Camera>(
            r#"
            SELECT c.id, c.camera_id, c.camera_link, c.camera_status, c.camera_loc,
                   c.created_at, c.updated_at
            FROM cameras c
            JOIN dashboard_cameras dc ON dc.camera_ref = c.id
            WHERE dc.dashboard_ref = $1
            ORDER BY dc.added_at, c.camera_id
            "#,
        )
        .bind(dashboard.id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get dashboard cameras: {}", e)))?;

        Ok(DashboardWithCameras::new(dashboard, cameras))
    }
}

/// Fetch a dashboard row and hold its lock until the transaction ends
async fn lock_dashboard(conn: &mut PgConnection, dashboard_id: &str) -> Result<Dashboard, Error> {
    let row = sqlx::query_as::<_, DashboardDb>(&format!(
        "SELECT {} FROM dashboards WHERE dashboard_id = $1 FOR UPDATE",
        DASHBOARD_COLUMNS
    ))
    .bind(dashboard_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| db_error("lock dashboard", e))?
    .ok_or_else(|| Error::NotFound(format!("Dashboard {} not found", dashboard_id)))?;

    Dashboard::try_from(row)
}

async fn count_cameras(conn: &mut PgConnection, dashboard_ref: &Uuid) -> Result<usize, Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM dashboard_cameras WHERE dashboard_ref = $1")
            .bind(dashboard_ref)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| db_error("count dashboard cameras", e))?;

    Ok(usize::try_from(count).unwrap_or(usize::MAX))
}

async fn link_camera(
    conn: &mut PgConnection,
    dashboard_ref: &Uuid,
    camera_ref: &Uuid,
) -> Result<(), Error> {
    sqlx::query(
        r#"
        INSERT INTO dashboard_cameras (dashboard_ref, camera_ref, added_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(dashboard_ref)
    .bind(camera_ref)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error("attach camera", e))?;

    Ok(())
}

async fn touch(conn: &mut PgConnection, dashboard_ref: &Uuid) -> Result<(), Error> {
    sqlx::query("UPDATE dashboards SET updated_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(dashboard_ref)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("touch dashboard", e))?;

    Ok(())
}
