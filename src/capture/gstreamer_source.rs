use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use image::RgbImage;
use log::{debug, info, warn};
use std::time::Duration;

use super::{Frame, FrameSource, SourceKind, SourceOpener};
use crate::error::Error;

const SINK_NAME: &str = "sink";

/// Opens camera links as GStreamer pipelines ending in an RGB appsink
#[derive(Debug, Clone)]
pub struct GstSourceOpener {
    open_timeout: Duration,
    read_timeout: Duration,
}

impl GstSourceOpener {
    pub fn new(open_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            open_timeout,
            read_timeout,
        }
    }
}

impl SourceOpener for GstSourceOpener {
    fn open(&self, uri: &str) -> Result<Box<dyn FrameSource>> {
        let source = GstFrameSource::open(uri, self.open_timeout, self.read_timeout)?;
        Ok(Box::new(source))
    }
}

/// Build the launch line for a source
pub(crate) fn pipeline_description(kind: &SourceKind) -> Result<String, Error> {
    let head = match kind {
        SourceKind::Rtsp(uri) => format!("rtspsrc location=\"{}\" latency=200 ! decodebin", quote(uri)),
        SourceKind::Device(path) => format!("v4l2src device=\"{}\"", quote(path)),
        SourceKind::TestPattern(pattern) => {
            if pattern.is_empty()
                || !pattern
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
            {
                return Err(Error::Validation(format!(
                    "Invalid test pattern: {}",
                    pattern
                )));
            }
            format!("videotestsrc pattern={} is-live=true", pattern)
        }
        SourceKind::File(path) => format!("filesrc location=\"{}\" ! decodebin", quote(path)),
        SourceKind::Uri(uri) => format!("uridecodebin uri=\"{}\"", quote(uri)),
    };

    let sink = if kind.is_live() {
        format!("appsink name={} sync=false max-buffers=1 drop=true", SINK_NAME)
    } else {
        format!("appsink name={} sync=false max-buffers=2", SINK_NAME)
    };

    Ok(format!(
        "{} ! videoconvert ! video/x-raw,format=RGB ! {}",
        head, sink
    ))
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A playing pipeline. The first frame is pulled while opening so that an
/// unreachable source fails `open` instead of the first read.
pub struct GstFrameSource {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    read_timeout: Duration,
    pending: Option<Frame>,
}

impl GstFrameSource {
    pub fn open(uri: &str, open_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let kind = SourceKind::classify(uri);
        let description = pipeline_description(&kind)?;
        debug!("Creating pipeline: {}", description);

        gst::init().map_err(|e| Error::Capture(format!("GStreamer init failed: {}", e)))?;

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| Error::Connection(format!("Failed to build pipeline: {}", e)))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow!("launch line did not produce a pipeline"))?;

        let appsink = pipeline
            .by_name(SINK_NAME)
            .context("appsink element missing from pipeline")?
            .downcast::<AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let mut source = Self {
            pipeline,
            appsink,
            read_timeout,
            pending: None,
        };

        source
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::Connection(format!("Failed to start {}: {}", uri, e)))?;

        let (state, _, _) = source
            .pipeline
            .state(gst::ClockTime::from_mseconds(open_timeout.as_millis() as u64));
        if state.is_err() {
            let reason = source
                .bus_error()
                .unwrap_or_else(|| "pipeline failed to start".to_string());
            return Err(Error::Connection(format!("Cannot open {}: {}", uri, reason)).into());
        }

        match source.pull(open_timeout)? {
            Some(frame) => source.pending = Some(frame),
            None => {
                let reason = source
                    .bus_error()
                    .unwrap_or_else(|| "no frame received".to_string());
                return Err(Error::Connection(format!("Cannot open {}: {}", uri, reason)).into());
            }
        }

        info!("Opened video source {}", uri);
        Ok(source)
    }

    fn pull(&self, timeout: Duration) -> Result<Option<Frame>> {
        let sample = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(timeout.as_millis() as u64));
        match sample {
            Some(sample) => Ok(Some(Frame {
                image: sample_to_image(&sample)?,
                captured_at: Utc::now(),
            })),
            None => Ok(None),
        }
    }

    /// First error message waiting on the bus, if any
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.pop() {
            if let gst::MessageView::Error(err) = message.view() {
                return Some(format!(
                    "{} ({:?})",
                    err.error(),
                    err.src().map(|s| s.path_string())
                ));
            }
        }
        None
    }
}

impl FrameSource for GstFrameSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }

        if let Some(reason) = self.bus_error() {
            return Err(Error::Capture(reason).into());
        }

        match self.pull(self.read_timeout)? {
            Some(frame) => Ok(Some(frame)),
            None if self.appsink.is_eos() => Ok(None),
            None => Err(Error::Capture(format!(
                "no frame within {} ms",
                self.read_timeout.as_millis()
            ))
            .into()),
        }
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {}", e);
        } else {
            debug!("Video source released");
        }
    }
}

fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map buffer")?;
    let data = map.as_slice();

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("buffer is smaller than the frame")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("buffer row is out of bounds")?,
            );
        }
        pixels
    };

    RgbImage::from_raw(width, height, pixels).ok_or_else(|| anyhow!("frame size mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_rtsp_pipeline() {
        let description =
            pipeline_description(&SourceKind::classify("rtsp://10.0.0.5/live")).unwrap();
        assert!(description.starts_with("rtspsrc location=\"rtsp://10.0.0.5/live\""));
        assert!(description.ends_with("drop=true"));
        assert!(description.contains("video/x-raw,format=RGB"));
    }

    #[test]
    fn files_are_not_dropped() {
        let description =
            pipeline_description(&SourceKind::classify("/srv/clips/a b.mp4")).unwrap();
        assert!(description.starts_with("filesrc location=\"/srv/clips/a b.mp4\" ! decodebin"));
        assert!(!description.contains("drop=true"));
    }

    #[test]
    fn rejects_test_patterns_that_could_extend_the_pipeline() {
        assert!(pipeline_description(&SourceKind::classify("test:1 ! fakesink")).is_err());
        assert!(pipeline_description(&SourceKind::classify("test:ball")).is_ok());
    }

    #[test]
    fn quotes_embedded_quotes() {
        let description =
            pipeline_description(&SourceKind::classify("http://cam/\"x\"")).unwrap();
        assert!(description.contains("uri=\"http://cam/\\\"x\\\"\""));
    }

    #[test]
    fn pulls_frames_from_test_source() -> Result<()> {
        if std::env::var("TEST_GSTREAMER").is_err() {
            println!("Skipping GStreamer test. Set TEST_GSTREAMER=1 to run.");
            return Ok(());
        }

        let opener = GstSourceOpener::new(Duration::from_secs(5), Duration::from_secs(2));
        let mut source = opener.open("test:ball")?;
        let frame = source.read_frame()?.expect("first frame");
        assert!(frame.image.width() > 0);
        assert!(source.read_frame()?.is_some());
        Ok(())
    }
}
