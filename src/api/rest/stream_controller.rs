use crate::api::rest::{ApiResult, AppState};
use crate::services::mjpeg;
use axum::body::StreamBody;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use log::info;

/// Live MJPEG stream of one camera with detection overlay.
///
/// The camera is resolved and its source opened before the response starts,
/// so an unknown camera answers 404 and an unreachable source 503.
pub async fn stream_camera(
    Path(camera_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let stream = state.streamer.open(&camera_id).await?;
    info!("Streaming camera {}", camera_id);

    let body = StreamBody::new(stream.into_stream());
    Ok((
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
