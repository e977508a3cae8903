use crate::api::rest::{ApiResult, AppState};
use crate::db::models::{Detection, DetectionFilter, DetectionQuery};
use crate::db::repositories::cameras::CamerasRepository;
use crate::db::repositories::detections::DetectionsRepository;
use crate::error::Error;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

/// Detection routes, nested under `/api/detections`
pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(list_detections))
}

/// Detections of every camera, newest first
pub async fn list_detections(
    State(state): State<AppState>,
    query: Result<Query<DetectionQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Detection>>> {
    let Query(query) = query?;
    let filter = DetectionFilter::from_query(None, &query)?;

    let detections = DetectionsRepository::new(Arc::clone(&state.db_pool))
        .list(&filter)
        .await?;
    Ok(Json(detections))
}

/// Detections of one camera, newest first
pub async fn camera_detections(
    Path(camera_id): Path<String>,
    State(state): State<AppState>,
    query: Result<Query<DetectionQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Detection>>> {
    let Query(query) = query?;
    let filter = DetectionFilter::from_query(Some(camera_id.clone()), &query)?;

    let camera = CamerasRepository::new(Arc::clone(&state.db_pool))
        .get_by_camera_id(&camera_id)
        .await?;
    if camera.is_none() {
        return Err(Error::NotFound(format!("Camera {} not found", camera_id)).into());
    }

    let detections = DetectionsRepository::new(Arc::clone(&state.db_pool))
        .list(&filter)
        .await?;
    Ok(Json(detections))
}
