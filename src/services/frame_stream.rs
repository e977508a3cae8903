//! Live camera stream: capture, detect, persist (throttled), overlay, encode.
//!
//! A [`FrameStream`] is pull-driven. Each call to [`FrameStream::next_chunk`]
//! reads and processes exactly one frame on the blocking pool, so a slow
//! client slows capture down instead of queueing frames. Dropping the stream
//! drops the video source, which releases the camera.

use anyhow::Result;
use axum::body::Bytes;
use chrono::{DateTime, Local, Utc};
use futures::stream::{self, Stream};
use image::RgbImage;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::mjpeg;
use super::store::MonitoringStore;
use crate::capture::{FrameSource, SourceOpener};
use crate::config::StreamingConfig;
use crate::db::models::{Camera, STATUS_CONNECTION_ERROR};
use crate::detection::{annotate, DetectedObject, ObjectDetector};
use crate::error::Error;

const OVERLAY_ORIGIN: (i32, i32) = (10, 10);
const OVERLAY_TEXT_PX: f32 = 20.0;

/// Stream settings derived from the `[streaming]` config section
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub frames_dir: PathBuf,
    pub detection_interval: Duration,
    pub jpeg_quality: u8,
    pub show_object_labels: bool,
}

impl From<&StreamingConfig> for StreamSettings {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            frames_dir: config.frames_dir.clone(),
            detection_interval: config.detection_interval(),
            jpeg_quality: config.jpeg_quality,
            show_object_labels: config.show_object_labels,
        }
    }
}

/// Decides whether a detection batch may be persisted
#[derive(Debug, Clone)]
pub struct DetectionThrottle {
    interval: Duration,
    last_persisted: Option<DateTime<Utc>>,
}

impl DetectionThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_persisted: None,
        }
    }

    /// Due when nothing was persisted yet or strictly more than the interval has passed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_persisted {
            None => true,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed > self.interval,
                Err(_) => false,
            },
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.last_persisted = Some(at);
    }

    pub fn last_persisted(&self) -> Option<DateTime<Utc>> {
        self.last_persisted
    }
}

/// Opens camera streams. One instance is shared by all requests.
pub struct FrameStreamer {
    store: Arc<dyn MonitoringStore>,
    opener: Arc<dyn SourceOpener>,
    detector: Arc<dyn ObjectDetector>,
    settings: StreamSettings,
}

impl FrameStreamer {
    pub fn new(
        store: Arc<dyn MonitoringStore>,
        opener: Arc<dyn SourceOpener>,
        detector: Arc<dyn ObjectDetector>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            store,
            opener,
            detector,
            settings,
        }
    }

    /// Open the camera's video source.
    ///
    /// An unknown camera fails with `NotFound` and touches nothing. A source
    /// that cannot be opened marks the camera as `error: cannot connect` and
    /// fails with `Connection`.
    pub async fn open(&self, camera_id: &str) -> Result<FrameStream> {
        let camera = self
            .store
            .camera_by_id(camera_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera {} not found", camera_id)))?;

        if let Err(e) = tokio::fs::create_dir_all(&self.settings.frames_dir).await {
            warn!(
                "Cannot create frames directory {}: {}",
                self.settings.frames_dir.display(),
                e
            );
        }

        let opener = self.opener.clone();
        let link = camera.camera_link.clone();
        let opened = tokio::task::spawn_blocking(move || opener.open(&link))
            .await
            .map_err(|e| Error::Internal(format!("Source open task failed: {}", e)))?;

        let source = match opened {
            Ok(source) => source,
            Err(e) => {
                warn!("Cannot connect to camera {}: {}", camera.camera_id, e);
                if let Err(status_err) = self
                    .store
                    .update_camera_status(&camera, STATUS_CONNECTION_ERROR)
                    .await
                {
                    error!(
                        "Failed to record connection error for camera {}: {}",
                        camera.camera_id, status_err
                    );
                }
                return Err(Error::Connection(format!(
                    "Cannot connect to camera {}: {}",
                    camera.camera_link, e
                ))
                .into());
            }
        };

        info!(
            "Streaming camera {} with detector {}",
            camera.camera_id,
            self.detector.name()
        );

        Ok(FrameStream {
            worker: Some(CaptureWorker {
                source,
                detector: self.detector.clone(),
            }),
            store: self.store.clone(),
            throttle: DetectionThrottle::new(self.settings.detection_interval),
            settings: self.settings.clone(),
            camera,
        })
    }
}

/// Owns the video source and runs the blocking half of each step
struct CaptureWorker {
    source: Box<dyn FrameSource>,
    detector: Arc<dyn ObjectDetector>,
}

enum Step {
    Frame(ProcessedFrame),
    Exhausted,
    Failed(anyhow::Error),
}

struct ProcessedFrame {
    captured_at: DateTime<Utc>,
    image: RgbImage,
    objects: Vec<DetectedObject>,
}

impl CaptureWorker {
    fn step(&mut self) -> Step {
        let frame = match self.source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Step::Exhausted,
            Err(e) => return Step::Failed(e),
        };

        match self.detector.detect(&frame.image) {
            Ok(output) => Step::Frame(ProcessedFrame {
                captured_at: frame.captured_at,
                image: output.annotated,
                objects: output.objects,
            }),
            Err(e) => {
                warn!("Detector {} failed on frame: {}", self.detector.name(), e);
                Step::Frame(ProcessedFrame {
                    captured_at: frame.captured_at,
                    image: frame.image,
                    objects: Vec::new(),
                })
            }
        }
    }
}

/// An open camera stream producing multipart MJPEG chunks
pub struct FrameStream {
    camera: Camera,
    worker: Option<CaptureWorker>,
    store: Arc<dyn MonitoringStore>,
    throttle: DetectionThrottle,
    settings: StreamSettings,
}

impl FrameStream {
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Next multipart chunk, or `None` once the source is exhausted or failed.
    /// The source is released before `None` is returned.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            let mut worker = self.worker.take()?;
            let (worker, step) = match tokio::task::spawn_blocking(move || {
                let step = worker.step();
                (worker, step)
            })
            .await
            {
                Ok(result) => result,
                Err(e) => {
                    error!("Capture task for camera {} failed: {}", self.camera.camera_id, e);
                    return None;
                }
            };

            let frame = match step {
                Step::Frame(frame) => frame,
                Step::Exhausted => {
                    info!("Video source for camera {} ended", self.camera.camera_id);
                    drop(worker);
                    return None;
                }
                Step::Failed(e) => {
                    warn!("Reading camera {} failed: {}", self.camera.camera_id, e);
                    drop(worker);
                    return None;
                }
            };
            self.worker = Some(worker);

            let persisted = !frame.objects.is_empty()
                && self.throttle.is_due(frame.captured_at)
                && self.persist(&frame).await;

            let captured_at = frame.captured_at;
            let lines = self.overlay_lines(&frame.objects);
            let quality = self.settings.jpeg_quality;
            let rendered = tokio::task::spawn_blocking(move || {
                render(frame.image, &lines, quality, persisted)
            })
            .await;

            let (jpeg, diagnostic) = match rendered {
                Ok(Ok(rendered)) => rendered,
                Ok(Err(e)) => {
                    warn!("Skipping frame from camera {}: {}", self.camera.camera_id, e);
                    continue;
                }
                Err(e) => {
                    error!("Render task for camera {} failed: {}", self.camera.camera_id, e);
                    continue;
                }
            };

            if let Some(diagnostic) = diagnostic {
                save_diagnostic_frame(&self.settings.frames_dir, captured_at, &diagnostic).await;
            }

            return Some(mjpeg::multipart_chunk(&jpeg));
        }
    }

    /// Consume into a byte stream for a streaming response body
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Error>> + Send {
        stream::unfold(self, |mut frames| async move {
            frames.next_chunk().await.map(|chunk| (Ok(chunk), frames))
        })
    }

    async fn persist(&mut self, frame: &ProcessedFrame) -> bool {
        match self
            .store
            .insert_detections(&self.camera, frame.captured_at, &frame.objects)
            .await
        {
            Ok(saved) => {
                self.throttle.record(frame.captured_at);
                let labels: Vec<String> = frame.objects.iter().map(DetectedObject::label).collect();
                info!(
                    "Saved {} detections for camera {}: {}",
                    saved.len(),
                    self.camera.camera_id,
                    labels.join(", ")
                );
                true
            }
            Err(e) => {
                error!(
                    "Failed to save detections for camera {}: {}",
                    self.camera.camera_id, e
                );
                false
            }
        }
    }

    fn overlay_lines(&self, objects: &[DetectedObject]) -> Vec<String> {
        let Some(last) = self.throttle.last_persisted() else {
            return Vec::new();
        };

        let mut lines = vec![
            format!(
                "Last detection: {}",
                last.with_timezone(&Local).format("%d/%m/%y %H:%M")
            ),
            format!("Location: {}", self.camera.camera_loc),
        ];
        if self.settings.show_object_labels {
            lines.extend(objects.iter().map(DetectedObject::label));
        }
        lines
    }
}

async fn save_diagnostic_frame(frames_dir: &Path, captured_at: DateTime<Utc>, jpeg: &[u8]) {
    let path = frames_dir.join(diagnostic_file_name(captured_at));
    match tokio::fs::write(&path, jpeg).await {
        Ok(()) => debug!("Saved detection frame {}", path.display()),
        Err(e) => warn!("Failed to save detection frame {}: {}", path.display(), e),
    }
}

/// `detection_YYYYMMDD_HHMMSS.jpg` in local time
pub fn diagnostic_file_name(captured_at: DateTime<Utc>) -> String {
    captured_at
        .with_timezone(&Local)
        .format("detection_%Y%m%d_%H%M%S.jpg")
        .to_string()
}

/// Encode the streamed frame, and the annotated frame without overlay text
/// when it is saved for diagnostics
fn render(
    mut image: RgbImage,
    lines: &[String],
    quality: u8,
    with_diagnostic: bool,
) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
    let diagnostic = if with_diagnostic {
        Some(mjpeg::encode_jpeg(&image, quality)?)
    } else {
        None
    };

    annotate::draw_text_block(
        &mut image,
        OVERLAY_ORIGIN.0,
        OVERLAY_ORIGIN.1,
        lines,
        OVERLAY_TEXT_PX,
        annotate::WHITE,
    );

    Ok((mjpeg::encode_jpeg(&image, quality)?, diagnostic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
    }

    #[test]
    fn first_batch_is_always_due() {
        let throttle = DetectionThrottle::new(Duration::from_secs(15));
        assert!(throttle.is_due(at(0)));
    }

    #[test]
    fn interval_must_be_strictly_exceeded() {
        let mut throttle = DetectionThrottle::new(Duration::from_secs(15));
        throttle.record(at(0));
        assert!(!throttle.is_due(at(5)));
        assert!(!throttle.is_due(at(15)));
        assert!(throttle.is_due(at(16)));
    }

    #[test]
    fn clock_going_backwards_is_not_due() {
        let mut throttle = DetectionThrottle::new(Duration::from_secs(15));
        throttle.record(at(100));
        assert!(!throttle.is_due(at(0)));
    }

    #[test]
    fn diagnostic_name_uses_local_timestamp() {
        let name = diagnostic_file_name(at(0));
        let expected = at(0)
            .with_timezone(&Local)
            .format("detection_%Y%m%d_%H%M%S.jpg")
            .to_string();
        assert_eq!(name, expected);
        assert!(name.starts_with("detection_2024"));
    }

    #[test]
    fn render_adds_diagnostic_only_when_asked() {
        let image = RgbImage::new(32, 24);
        let (jpeg, diagnostic) = render(image.clone(), &[], 80, false).unwrap();
        assert!(!jpeg.is_empty());
        assert!(diagnostic.is_none());

        let (_, diagnostic) = render(image, &["Location: Dock".to_string()], 80, true).unwrap();
        assert!(diagnostic.is_some());
    }
}
