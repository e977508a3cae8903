use crate::config::ApiConfig;
use crate::db;
use crate::error::Error;
use crate::services::FrameStreamer;
use anyhow::Result;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::info;
use serde::Serialize;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod camera_controller;
pub mod dashboard_controller;
pub mod detection_controller;
pub mod stream_controller;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: Arc<PgPool>,
    pub streamer: Arc<FrameStreamer>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(rename = "error")]
    pub message: String,
    pub status: u16,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(message) => ApiError::new(StatusCode::NOT_FOUND, message),
            Error::Validation(message) => ApiError::new(StatusCode::BAD_REQUEST, message),
            Error::AlreadyExists(message) => ApiError::new(StatusCode::CONFLICT, message),
            Error::Connection(message) => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, message),
            Error::Config(_) => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()),
            _ => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = if db::health_check(&state.db_pool).await {
        "connected"
    } else {
        "unavailable"
    };
    Json(HealthResponse {
        status: "ok",
        database,
    })
}

/// All API routes, without the static fallback or outer middleware
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .nest("/api/cameras", camera_controller::create_router())
        .nest("/api/detections", detection_controller::create_router())
        .nest("/api/dashboards", dashboard_controller::create_router())
        .with_state(state)
}

pub struct RestApi {
    config: ApiConfig,
    db_pool: Arc<PgPool>,
    streamer: Arc<FrameStreamer>,
}

impl RestApi {
    pub fn new(config: &ApiConfig, db_pool: Arc<PgPool>, streamer: Arc<FrameStreamer>) -> Self {
        Self {
            config: config.clone(),
            db_pool,
            streamer,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let state = AppState {
            db_pool: Arc::clone(&self.db_pool),
            streamer: Arc::clone(&self.streamer),
        };

        // Create a CORS layer that allows all origins and preflight requests
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false)
            .max_age(Duration::from_secs(3600));

        let mut app = build_router(state);
        if let Some(static_dir) = &self.config.static_dir {
            info!("Serving static files from {}", static_dir.display());
            app = app.fallback_service(ServeDir::new(static_dir));
        }
        let app = app.layer(TraceLayer::new_for_http()).layer(cors);

        // Trailing slashes are stripped before routing
        let app = NormalizePathLayer::trim_trailing_slash().layer(app);

        let addr = format!("{}:{}", self.config.address, self.config.port);
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(axum::ServiceExt::<axum::http::Request<axum::body::Body>>::into_make_service(app))
            .await?;

        Ok(())
    }
}
