pub mod camera_models;
pub mod dashboard_models;
pub mod detection_models;

pub use camera_models::*;
pub use dashboard_models::*;
pub use detection_models::*;
