use anyhow::Result;
use camera_monitor::api::rest::RestApi;
use camera_monitor::capture::GstSourceOpener;
use camera_monitor::config;
use camera_monitor::db::DatabaseService;
use camera_monitor::detection::{ObjectDetector, PassthroughDetector, YoloDetector};
use camera_monitor::services::{FrameStreamer, PgMonitoringStore, StreamSettings};
use gstreamer as gst;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

const CONFIG_ENV: &str = "CAMERA_MONITOR_CONFIG";

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from)
}

async fn run_app() -> Result<()> {
    let config = config::load_config(config_path().as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.as_str()),
    )
    .init();
    info!("Starting camera monitor");

    gst::init()?;
    info!("GStreamer initialized successfully");

    let database = DatabaseService::new(&config.database).await?;

    let detector: Arc<dyn ObjectDetector> = if config.detection.enabled {
        let detector = YoloDetector::load(&config.detection)?;
        info!(
            "Loaded detection model {}",
            config.detection.model_path.display()
        );
        Arc::new(detector)
    } else {
        warn!("Object detection disabled, frames are streamed as captured");
        Arc::new(PassthroughDetector)
    };

    let opener = GstSourceOpener::new(
        config.streaming.open_timeout(),
        config.streaming.read_timeout(),
    );
    let store = PgMonitoringStore::new(database.pool.clone());
    let streamer = FrameStreamer::new(
        Arc::new(store),
        Arc::new(opener),
        detector,
        StreamSettings::from(&config.streaming),
    );

    let http_server = RestApi::new(&config.api, database.pool.clone(), Arc::new(streamer));

    tokio::select! {
        result = http_server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app()) {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
