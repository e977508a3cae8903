use crate::api::rest::{detection_controller, stream_controller, ApiError, ApiResult, AppState};
use crate::db::models::{Camera, CameraPatch, CameraPayload};
use crate::db::repositories::cameras::CamerasRepository;
use crate::db::repositories::detections::DetectionsRepository;
use crate::error::Error;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::sync::Arc;

/// Current status of a camera and when it last produced detections
#[derive(Debug, Serialize)]
pub struct CameraStatusResponse {
    pub camera_id: String,
    pub camera_status: String,
    pub last_updated: DateTime<Utc>,
    pub last_detection: Option<DateTime<Utc>>,
}

/// Camera routes, nested under `/api/cameras`
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_cameras).post(create_camera))
        .route(
            "/:camera_id",
            get(get_camera)
                .put(replace_camera)
                .patch(patch_camera)
                .delete(delete_camera),
        )
        .route("/:camera_id/status", get(camera_status))
        .route(
            "/:camera_id/detections",
            get(detection_controller::camera_detections),
        )
        .route("/:camera_id/stream", get(stream_controller::stream_camera))
}

fn repository(state: &AppState) -> CamerasRepository {
    CamerasRepository::new(Arc::clone(&state.db_pool))
}

fn not_found(camera_id: &str) -> ApiError {
    Error::NotFound(format!("Camera {} not found", camera_id)).into()
}

pub async fn list_cameras(State(state): State<AppState>) -> ApiResult<Json<Vec<Camera>>> {
    let cameras = repository(&state).get_all().await?;
    Ok(Json(cameras))
}

pub async fn create_camera(
    State(state): State<AppState>,
    payload: Result<Json<CameraPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Camera>)> {
    let Json(payload) = payload?;
    payload.validate()?;

    let camera = repository(&state).create(&payload).await?;
    info!("Created camera {}", camera.camera_id);
    Ok((StatusCode::CREATED, Json(camera)))
}

pub async fn get_camera(
    Path(camera_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Camera>> {
    repository(&state)
        .get_by_camera_id(&camera_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&camera_id))
}

pub async fn replace_camera(
    Path(camera_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<CameraPayload>, JsonRejection>,
) -> ApiResult<Json<Camera>> {
    let Json(payload) = payload?;
    payload.validate()?;

    repository(&state)
        .update(&camera_id, &payload)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&camera_id))
}

pub async fn patch_camera(
    Path(camera_id): Path<String>,
    State(state): State<AppState>,
    patch: Result<Json<CameraPatch>, JsonRejection>,
) -> ApiResult<Json<Camera>> {
    let Json(patch) = patch?;
    let repo = repository(&state);

    let current = repo
        .get_by_camera_id(&camera_id)
        .await?
        .ok_or_else(|| not_found(&camera_id))?;
    let payload = patch.apply(&current);
    payload.validate()?;

    repo.update(&camera_id, &payload)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&camera_id))
}

pub async fn delete_camera(
    Path(camera_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    if repository(&state).delete(&camera_id).await? {
        info!("Deleted camera {}", camera_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&camera_id))
    }
}

pub async fn camera_status(
    Path(camera_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<CameraStatusResponse>> {
    let camera = repository(&state)
        .get_by_camera_id(&camera_id)
        .await?
        .ok_or_else(|| not_found(&camera_id))?;

    let last_detection = DetectionsRepository::new(Arc::clone(&state.db_pool))
        .latest_for_camera(&camera.id)
        .await?;

    Ok(Json(CameraStatusResponse {
        camera_id: camera.camera_id,
        camera_status: camera.camera_status,
        last_updated: camera.updated_at,
        last_detection,
    }))
}
