//! Video sources: opening a camera link and pulling decoded RGB frames.

use anyhow::Result;
use chrono::{DateTime, Utc};
use image::RgbImage;

pub mod gstreamer_source;

pub use gstreamer_source::GstSourceOpener;

/// A decoded frame and the wall-clock time it was pulled
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

/// An open video source. Dropping it releases the underlying device or connection.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

/// Opens camera links; fails when the source cannot be reached
pub trait SourceOpener: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>>;
}

// Source types supported by the capture pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Rtsp(String),
    Device(String),
    TestPattern(String),
    File(String),
    Uri(String),
}

impl SourceKind {
    pub fn classify(link: &str) -> Self {
        let link = link.trim();
        if link == "test" {
            return SourceKind::TestPattern("smpte".to_string());
        }
        if let Some(pattern) = link.strip_prefix("test:") {
            return SourceKind::TestPattern(pattern.to_string());
        }
        let lower = link.to_ascii_lowercase();
        if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            return SourceKind::Rtsp(link.to_string());
        }
        if link.starts_with("/dev/video") {
            return SourceKind::Device(link.to_string());
        }
        if link.starts_with('/') {
            return SourceKind::File(link.to_string());
        }
        SourceKind::Uri(link.to_string())
    }

    /// Live sources drop frames the consumer is too slow for
    pub fn is_live(&self) -> bool {
        !matches!(self, SourceKind::File(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_links() {
        assert_eq!(
            SourceKind::classify("rtsp://10.0.0.5:554/live"),
            SourceKind::Rtsp("rtsp://10.0.0.5:554/live".to_string())
        );
        assert_eq!(
            SourceKind::classify("/dev/video2"),
            SourceKind::Device("/dev/video2".to_string())
        );
        assert_eq!(
            SourceKind::classify("test"),
            SourceKind::TestPattern("smpte".to_string())
        );
        assert_eq!(
            SourceKind::classify("test:18"),
            SourceKind::TestPattern("18".to_string())
        );
        assert_eq!(
            SourceKind::classify("/srv/clips/gate.mp4"),
            SourceKind::File("/srv/clips/gate.mp4".to_string())
        );
        assert_eq!(
            SourceKind::classify("http://cam.local/mjpg"),
            SourceKind::Uri("http://cam.local/mjpg".to_string())
        );
    }

    #[test]
    fn only_files_are_paced_by_the_consumer() {
        assert!(!SourceKind::classify("/srv/clips/gate.mp4").is_live());
        assert!(SourceKind::classify("test").is_live());
    }
}
