//! Object detection over decoded RGB frames.
//!
//! A detector is loaded once and shared by every stream, so implementations
//! take `&self` and must be thread-safe.

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub mod annotate;
pub mod yolo;

pub use yolo::YoloDetector;

/// Axis-aligned box in image pixels, serialized as `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f32; 4]", from = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x1.max(other.x1);
        let top = self.y1.max(other.y1);
        let right = self.x2.min(other.x2);
        let bottom = self.y2.min(other.y2);
        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self {
            x1: v[0],
            y1: v[1],
            x2: v[2],
            y2: v[3],
        }
    }
}

/// One object found in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_id: i32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl DetectedObject {
    /// Overlay label, e.g. `person (87.50%)`
    pub fn label(&self) -> String {
        format!("{} ({:.2}%)", self.class_name, self.confidence * 100.0)
    }
}

/// Detector result: the frame with boxes drawn, and the objects themselves
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    pub annotated: RgbImage,
    pub objects: Vec<DetectedObject>,
}

pub trait ObjectDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, image: &RgbImage) -> Result<DetectionOutput>;
}

/// Detector used when detection is disabled: frames pass through untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDetector;

impl ObjectDetector for PassthroughDetector {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn detect(&self, image: &RgbImage) -> Result<DetectionOutput> {
        Ok(DetectionOutput {
            annotated: image.clone(),
            objects: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::from([0.0, 0.0, 10.0, 10.0]);
        let b = BoundingBox::from([20.0, 20.0, 30.0, 30.0]);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);

        let half = BoundingBox::from([5.0, 0.0, 15.0, 10.0]);
        assert!((a.iou(&half) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn bbox_serializes_as_corner_array() {
        let object = DetectedObject {
            class_id: 2,
            class_name: "car".to_string(),
            confidence: 0.875,
            bbox: BoundingBox::from([1.0, 2.0, 3.0, 4.0]),
        };
        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(object.label(), "car (87.50%)");
    }

    #[test]
    fn passthrough_reports_nothing() {
        let image = RgbImage::new(4, 4);
        let output = PassthroughDetector.detect(&image).unwrap();
        assert!(output.objects.is_empty());
        assert_eq!(output.annotated.dimensions(), (4, 4));
    }
}
