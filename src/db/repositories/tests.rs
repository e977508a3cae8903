use super::{
    cameras::CamerasRepository, dashboards::DashboardsRepository,
    detections::DetectionsRepository,
};
use crate::db::migrations::run_migrations;
use crate::db::models::{
    CameraPayload, DetectionFilter, NewDashboard, RiskLevel, RiskTransition,
};
use crate::detection::{BoundingBox, DetectedObject};
use crate::error::Error;
use anyhow::Result;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

// Database-backed tests only run when a scratch database is available
async fn test_pool() -> Result<Option<Arc<PgPool>>> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            println!("Skipping database test. Set TEST_DATABASE_URL to run.");
            return Ok(None);
        }
    };
    let pool = PgPoolOptions::new().max_connections(4).connect(&url).await?;
    run_migrations(&pool).await?;
    Ok(Some(Arc::new(pool)))
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

fn camera(camera_id: &str) -> CameraPayload {
    CameraPayload {
        camera_id: camera_id.to_string(),
        camera_link: "test:18".to_string(),
        camera_status: "active".to_string(),
        camera_loc: "Warehouse".to_string(),
    }
}

fn person(confidence: f32) -> DetectedObject {
    DetectedObject {
        class_id: 0,
        class_name: "person".to_string(),
        confidence,
        bbox: BoundingBox {
            x1: 10.0,
            y1: 20.0,
            x2: 110.0,
            y2: 220.0,
        },
    }
}

#[tokio::test]
async fn camera_crud_round_trip() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let repo = CamerasRepository::new(pool);
    let id = unique("cam");

    let created = repo.create(&camera(&id)).await?;
    assert_eq!(created.camera_status, "active");

    let duplicate = repo.create(&camera(&id)).await.unwrap_err();
    assert!(matches!(
        duplicate.downcast_ref::<Error>(),
        Some(Error::AlreadyExists(_))
    ));

    assert!(repo.update_status(&created.id, "error: cannot connect").await?);
    let fetched = repo.get_by_camera_id(&id).await?.unwrap();
    assert_eq!(fetched.camera_status, "error: cannot connect");

    assert!(repo.delete(&id).await?);
    assert!(repo.get_by_camera_id(&id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn detection_batch_shares_timestamp_and_lists_newest_first() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let cameras = CamerasRepository::new(pool.clone());
    let detections = DetectionsRepository::new(pool);
    let cam = cameras.create(&camera(&unique("det"))).await?;

    let first = Utc::now() - chrono::Duration::seconds(30);
    detections.create_batch(&cam, first, &[person(0.7)]).await?;
    let second = Utc::now();
    let saved = detections
        .create_batch(&cam, second, &[person(0.9), person(0.8)])
        .await?;
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().all(|d| d.detected_at == second));
    assert!((saved[0].bbox_width - 100.0).abs() < f32::EPSILON);
    assert!((saved[0].bbox_height - 200.0).abs() < f32::EPSILON);

    let listed = detections
        .list(&DetectionFilter {
            camera_id: Some(cam.camera_id.clone()),
            ..DetectionFilter::default()
        })
        .await?;
    assert_eq!(listed.len(), 3);
    assert!(listed.windows(2).all(|w| w[0].detected_at >= w[1].detected_at));

    let latest = detections.latest_for_camera(&cam.id).await?;
    assert_eq!(
        latest.map(|t| t.timestamp_micros()),
        Some(second.timestamp_micros())
    );

    cameras.delete(&cam.camera_id).await?;
    Ok(())
}

#[tokio::test]
async fn dashboard_capacity_is_enforced_without_side_effects() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let cameras = CamerasRepository::new(pool.clone());
    let dashboards = DashboardsRepository::new(pool);

    let dashboard_id = unique("dash");
    dashboards
        .create(
            &NewDashboard {
                dashboard_id: dashboard_id.clone(),
                name: "Yard".to_string(),
                risk: None,
                camera_ids: Vec::new(),
            },
            RiskLevel::Low,
        )
        .await?;

    let mut created = Vec::new();
    for _ in 0..3 {
        let cam = camera(&unique("yard"));
        dashboards.add_new_camera(&dashboard_id, &cam).await?;
        created.push(cam.camera_id);
    }

    let rejected = camera(&unique("yard"));
    let err = dashboards
        .add_new_camera(&dashboard_id, &rejected)
        .await
        .unwrap_err();
    match err.downcast_ref::<Error>() {
        Some(Error::Validation(msg)) => {
            assert_eq!(msg, "Dashboard already has 3 cameras (maximum allowed)")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(cameras.get_by_camera_id(&rejected.camera_id).await?.is_none());

    let dashboard = dashboards.get(&dashboard_id).await?.unwrap();
    let attached: Vec<_> = dashboard.cameras.iter().map(|c| c.camera_id.clone()).collect();
    assert_eq!(attached, created);

    assert!(dashboards.detach_camera(&dashboard_id, &created[0]).await?);
    assert!(!dashboards.detach_camera(&dashboard_id, &created[0]).await?);
    let again = dashboards.attach_camera(&dashboard_id, &created[0]).await?;
    assert_eq!(again.cameras.len(), 3);

    dashboards.delete(&dashboard_id).await?;
    for camera_id in created {
        cameras.delete(&camera_id).await?;
    }
    Ok(())
}

#[tokio::test]
async fn attaching_existing_camera_to_full_dashboard_is_rejected() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let cameras = CamerasRepository::new(pool.clone());
    let dashboards = DashboardsRepository::new(pool);

    let mut created = Vec::new();
    for _ in 0..3 {
        let cam = cameras.create(&camera(&unique("dock"))).await?;
        created.push(cam.camera_id);
    }
    let extra = cameras.create(&camera(&unique("dock"))).await?;

    let dashboard_id = unique("dash");
    dashboards
        .create(
            &NewDashboard {
                dashboard_id: dashboard_id.clone(),
                name: "Dock".to_string(),
                risk: None,
                camera_ids: created.clone(),
            },
            RiskLevel::Low,
        )
        .await?;

    let err = dashboards
        .attach_camera(&dashboard_id, &extra.camera_id)
        .await
        .unwrap_err();
    match err.downcast_ref::<Error>() {
        Some(Error::Validation(msg)) => {
            assert_eq!(msg, "Dashboard already has 3 cameras (maximum allowed)")
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let dashboard = dashboards.get(&dashboard_id).await?.unwrap();
    let mut attached: Vec<_> = dashboard.cameras.iter().map(|c| c.camera_id.clone()).collect();
    attached.sort();
    let mut expected = created.clone();
    expected.sort();
    assert_eq!(attached, expected);
    assert!(cameras.get_by_camera_id(&extra.camera_id).await?.is_some());

    dashboards.delete(&dashboard_id).await?;
    for camera_id in created.iter().chain([&extra.camera_id]) {
        cameras.delete(camera_id).await?;
    }
    Ok(())
}

#[tokio::test]
async fn risk_changes_are_recorded() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let dashboards = DashboardsRepository::new(pool);
    let dashboard_id = unique("risk");
    dashboards
        .create(
            &NewDashboard {
                dashboard_id: dashboard_id.clone(),
                name: "Gate".to_string(),
                risk: None,
                camera_ids: Vec::new(),
            },
            RiskLevel::Low,
        )
        .await?;

    let update = dashboards
        .change_risk(&dashboard_id, RiskTransition::To(RiskLevel::High), Some("intrusion"))
        .await?;
    assert_eq!(update.old_risk, RiskLevel::Low);
    assert_eq!(update.new_risk_color, "#ef4444");

    dashboards
        .change_risk(&dashboard_id, RiskTransition::Escalate, None)
        .await?;
    let err = dashboards
        .change_risk(&dashboard_id, RiskTransition::Escalate, None)
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Validation(_))));

    let history = dashboards.risk_history(&dashboard_id).await?.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].new_level, RiskLevel::Critical);
    assert_eq!(history[1].reason.as_deref(), Some("intrusion"));

    dashboards.delete(&dashboard_id).await?;
    assert!(dashboards.risk_history(&dashboard_id).await?.is_none());
    Ok(())
}
