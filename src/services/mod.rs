pub mod frame_stream;
pub mod mjpeg;
pub mod store;


pub use frame_stream::{DetectionThrottle, FrameStream, FrameStreamer, StreamSettings};
pub use store::{MonitoringStore, PgMonitoringStore};
