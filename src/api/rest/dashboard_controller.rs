use crate::api::rest::{ApiError, ApiResult, AppState};
use crate::db::models::{
    Camera, DashboardUpdate, DashboardWithCameras, NewDashboard, NewDashboardCamera, RiskChange,
    RiskLevel, RiskLevelInfo, RiskStepRequest, RiskTransition, RiskUpdate, RiskUpdateRequest,
};
use crate::db::repositories::dashboards::DashboardsRepository;
use crate::error::Error;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use log::info;
use serde::Serialize;
use std::sync::Arc;

/// Every risk level with its display name and color
#[derive(Debug, Serialize)]
pub struct RiskLevelsResponse {
    pub risk_levels: Vec<RiskLevelInfo>,
}

/// Dashboard routes, nested under `/api/dashboards`
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_dashboards).post(create_dashboard))
        .route("/risk-levels", get(risk_levels))
        .route(
            "/:dashboard_id",
            get(get_dashboard).put(rename_dashboard).delete(delete_dashboard),
        )
        .route("/:dashboard_id/add-camera", post(add_camera))
        .route(
            "/:dashboard_id/cameras/:camera_id",
            post(attach_camera).delete(detach_camera),
        )
        .route("/:dashboard_id/update-risk", patch(update_risk))
        .route("/:dashboard_id/escalate-risk", post(escalate_risk))
        .route("/:dashboard_id/deescalate-risk", post(deescalate_risk))
        .route("/:dashboard_id/risk-history", get(risk_history))
}

fn repository(state: &AppState) -> DashboardsRepository {
    DashboardsRepository::new(Arc::clone(&state.db_pool))
}

fn not_found(dashboard_id: &str) -> ApiError {
    Error::NotFound(format!("Dashboard {} not found", dashboard_id)).into()
}

pub async fn risk_levels() -> Json<RiskLevelsResponse> {
    Json(RiskLevelsResponse {
        risk_levels: RiskLevel::ALL.iter().map(RiskLevel::info).collect(),
    })
}

pub async fn list_dashboards(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<DashboardWithCameras>>> {
    let dashboards = repository(&state).get_all().await?;
    Ok(Json(dashboards))
}

pub async fn create_dashboard(
    State(state): State<AppState>,
    payload: Result<Json<NewDashboard>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DashboardWithCameras>)> {
    let Json(payload) = payload?;
    let risk = payload.validate()?;

    let dashboard = repository(&state).create(&payload, risk).await?;
    Ok((StatusCode::CREATED, Json(dashboard)))
}

pub async fn get_dashboard(
    Path(dashboard_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<DashboardWithCameras>> {
    repository(&state)
        .get(&dashboard_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&dashboard_id))
}

pub async fn rename_dashboard(
    Path(dashboard_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<DashboardUpdate>, JsonRejection>,
) -> ApiResult<Json<DashboardWithCameras>> {
    let Json(payload) = payload?;
    payload.validate()?;

    repository(&state)
        .update_name(&dashboard_id, payload.name.trim())
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&dashboard_id))
}

pub async fn delete_dashboard(
    Path(dashboard_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    if repository(&state).delete(&dashboard_id).await? {
        info!("Deleted dashboard {}", dashboard_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&dashboard_id))
    }
}

/// Create a camera from the body and attach it
pub async fn add_camera(
    Path(dashboard_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<NewDashboardCamera>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Camera>)> {
    let Json(payload) = payload?;
    payload.validate()?;

    let camera = repository(&state)
        .add_new_camera(&dashboard_id, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(camera)))
}

pub async fn attach_camera(
    Path((dashboard_id, camera_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<DashboardWithCameras>> {
    let dashboard = repository(&state)
        .attach_camera(&dashboard_id, &camera_id)
        .await?;
    Ok(Json(dashboard))
}

pub async fn detach_camera(
    Path((dashboard_id, camera_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    if repository(&state)
        .detach_camera(&dashboard_id, &camera_id)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound(format!(
            "Camera {} is not attached to dashboard {}",
            camera_id, dashboard_id
        ))
        .into())
    }
}

pub async fn update_risk(
    Path(dashboard_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<RiskUpdateRequest>, JsonRejection>,
) -> ApiResult<Json<RiskUpdate>> {
    let Json(payload) = payload?;
    let level: RiskLevel = payload.risk.parse()?;

    let update = repository(&state)
        .change_risk(
            &dashboard_id,
            RiskTransition::To(level),
            payload.reason.as_deref(),
        )
        .await?;
    Ok(Json(update))
}

pub async fn escalate_risk(
    Path(dashboard_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<RiskStepRequest>, JsonRejection>,
) -> ApiResult<Json<RiskUpdate>> {
    step_risk(&state, &dashboard_id, RiskTransition::Escalate, payload).await
}

pub async fn deescalate_risk(
    Path(dashboard_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<RiskStepRequest>, JsonRejection>,
) -> ApiResult<Json<RiskUpdate>> {
    step_risk(&state, &dashboard_id, RiskTransition::Deescalate, payload).await
}

// A request without a JSON body carries no reason; a malformed body is rejected
async fn step_risk(
    state: &AppState,
    dashboard_id: &str,
    transition: RiskTransition,
    payload: Result<Json<RiskStepRequest>, JsonRejection>,
) -> ApiResult<Json<RiskUpdate>> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => RiskStepRequest::default(),
        Err(rejection) => return Err(rejection.into()),
    };

    let update = repository(state)
        .change_risk(dashboard_id, transition, request.reason.as_deref())
        .await?;
    Ok(Json(update))
}

pub async fn risk_history(
    Path(dashboard_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<RiskChange>>> {
    repository(&state)
        .risk_history(&dashboard_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&dashboard_id))
}
