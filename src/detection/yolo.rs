use std::cmp::Ordering;

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use log::info;
use tract_onnx::prelude::*;

use super::{annotate, BoundingBox, DetectedObject, DetectionOutput, ObjectDetector};
use crate::config::DetectionConfig;
use crate::error::Error;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Box coordinates (cx, cy, w, h) precede the class scores in every prediction
const BOX_ATTRS: usize = 4;
const LETTERBOX_FILL: f32 = 144.0 / 255.0;

/// YOLOv8 detector running an ONNX export on tract
pub struct YoloDetector {
    plan: Plan,
    input_size: u32,
    confidence: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn load(config: &DetectionConfig) -> Result<Self> {
        let size = config.input_size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(&config.model_path)
            .with_context(|| {
                format!("failed to load ONNX model from {}", config.model_path.display())
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        info!(
            "Loaded detection model {} ({}x{}, confidence {:.2})",
            config.model_path.display(),
            size,
            size,
            config.confidence
        );

        Ok(Self {
            plan,
            input_size: config.input_size,
            confidence: config.confidence,
            iou_threshold: config.iou_threshold,
        })
    }

    /// Resize keeping the aspect ratio into the top-left of a gray square.
    /// Returns the NCHW tensor and the scale applied to the frame.
    fn letterbox(&self, image: &RgbImage) -> Result<(Tensor, f32)> {
        let (w0, h0) = image.dimensions();
        if w0 == 0 || h0 == 0 {
            return Err(anyhow!("empty frame"));
        }
        let size = self.input_size;
        let ratio = (size as f32 / w0 as f32).min(size as f32 / h0 as f32);
        let w = ((w0 as f32 * ratio).round() as u32).clamp(1, size);
        let h = ((h0 as f32 * ratio).round() as u32).clamp(1, size);
        let resized = imageops::resize(image, w, h, FilterType::Triangle);

        let mut input = tract_ndarray::Array4::<f32>::from_elem(
            (1, 3, size as usize, size as usize),
            LETTERBOX_FILL,
        );
        for (x, y, pixel) in resized.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            input[[0, 0, y as usize, x as usize]] = r as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = g as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = b as f32 / 255.0;
        }

        Ok((input.into_tensor(), ratio))
    }
}

impl ObjectDetector for YoloDetector {
    fn name(&self) -> &'static str {
        "yolov8"
    }

    fn detect(&self, image: &RgbImage) -> Result<DetectionOutput> {
        let (input, ratio) = self.letterbox(image)?;
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| Error::Detection(format!("inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| Error::Detection("model produced no outputs".to_string()))?
            .to_array_view::<f32>()
            .map_err(|e| Error::Detection(format!("unexpected output type: {}", e)))?;

        let mut objects = decode_predictions(
            output,
            ratio,
            image.dimensions(),
            self.confidence,
        )?;
        non_max_suppression(&mut objects, self.iou_threshold);

        let mut annotated = image.clone();
        annotate::draw_detections(&mut annotated, &objects);

        Ok(DetectionOutput { annotated, objects })
    }
}

/// Decode a `[1, 4 + classes, anchors]` (or transposed) prediction tensor into
/// objects in original frame coordinates, dropping those below `confidence`.
pub(crate) fn decode_predictions(
    output: tract_ndarray::ArrayViewD<f32>,
    ratio: f32,
    (width, height): (u32, u32),
    confidence: f32,
) -> Result<Vec<DetectedObject>> {
    let output = output
        .into_dimensionality::<tract_ndarray::Ix3>()
        .map_err(|e| Error::Detection(format!("expected a rank-3 output: {}", e)))?;
    let (_, d1, d2) = output.dim();

    // Anchors always outnumber attributes in YOLOv8 heads
    let attributes_first = d1 <= d2;
    let (attributes, anchors) = if attributes_first { (d1, d2) } else { (d2, d1) };
    if attributes <= BOX_ATTRS {
        return Err(Error::Detection(format!(
            "output has {} attributes, expected box plus class scores",
            attributes
        ))
        .into());
    }
    let value = |attr: usize, anchor: usize| {
        if attributes_first {
            output[[0, attr, anchor]]
        } else {
            output[[0, anchor, attr]]
        }
    };

    let (w0, h0) = (width as f32, height as f32);
    let mut objects = Vec::new();
    for anchor in 0..anchors {
        let (class_index, score) = (BOX_ATTRS..attributes)
            .map(|attr| (attr - BOX_ATTRS, value(attr, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, candidate| {
                if candidate.1 > best.1 {
                    candidate
                } else {
                    best
                }
            });
        if score.is_nan() || score < confidence {
            continue;
        }

        let cx = value(0, anchor) / ratio;
        let cy = value(1, anchor) / ratio;
        let w = value(2, anchor) / ratio;
        let h = value(3, anchor) / ratio;
        let bbox = BoundingBox {
            x1: (cx - w / 2.0).clamp(0.0, w0),
            y1: (cy - h / 2.0).clamp(0.0, h0),
            x2: (cx + w / 2.0).clamp(0.0, w0),
            y2: (cy + h / 2.0).clamp(0.0, h0),
        };
        if bbox.area() <= 0.0 {
            continue;
        }

        objects.push(DetectedObject {
            class_id: class_index as i32,
            class_name: class_name(class_index),
            confidence: score.min(1.0),
            bbox,
        });
    }

    Ok(objects)
}

/// Class-aware NMS: a box is dropped when a higher-scoring box of the same
/// class overlaps it by more than `iou_threshold`.
pub fn non_max_suppression(objects: &mut Vec<DetectedObject>, iou_threshold: f32) {
    objects.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<DetectedObject> = Vec::with_capacity(objects.len());
    for object in objects.drain(..) {
        let suppressed = kept.iter().any(|k| {
            k.class_id == object.class_id && k.bbox.iou(&object.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(object);
        }
    }
    *objects = kept;
}

fn class_name(index: usize) -> String {
    COCO_CLASSES
        .get(index)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("class_{}", index))
}

const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

#[cfg(test)]
mod tests {
    use super::*;
    use tract_ndarray::Array3;

    fn object(class_id: i32, confidence: f32, bbox: [f32; 4]) -> DetectedObject {
        DetectedObject {
            class_id,
            class_name: class_name(class_id as usize),
            confidence,
            bbox: bbox.into(),
        }
    }

    #[test]
    fn nms_keeps_best_of_same_class_overlap() {
        let mut objects = vec![
            object(0, 0.70, [0.0, 0.0, 100.0, 100.0]),
            object(0, 0.90, [5.0, 5.0, 105.0, 105.0]),
            object(0, 0.80, [300.0, 300.0, 400.0, 400.0]),
        ];
        non_max_suppression(&mut objects, 0.45);
        let confidences: Vec<f32> = objects.iter().map(|o| o.confidence).collect();
        assert_eq!(confidences, vec![0.90, 0.80]);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let mut objects = vec![
            object(0, 0.90, [0.0, 0.0, 100.0, 100.0]),
            object(2, 0.85, [0.0, 0.0, 100.0, 100.0]),
        ];
        non_max_suppression(&mut objects, 0.45);
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn decodes_attribute_major_output_back_to_frame_coordinates() {
        // Two classes, eight anchors; the frame was scaled by 0.5
        let mut raw = Array3::<f32>::zeros((1, 6, 8));
        // anchor 0: class 1 at 0.9, centered at (50, 40) 20x10 in model space
        raw[[0, 0, 0]] = 50.0;
        raw[[0, 1, 0]] = 40.0;
        raw[[0, 2, 0]] = 20.0;
        raw[[0, 3, 0]] = 10.0;
        raw[[0, 5, 0]] = 0.9;
        // anchor 1: below threshold
        raw[[0, 2, 1]] = 10.0;
        raw[[0, 3, 1]] = 10.0;
        raw[[0, 4, 1]] = 0.3;

        let objects = decode_predictions(raw.view().into_dyn(), 0.5, (640, 480), 0.65).unwrap();
        assert_eq!(objects.len(), 1);
        let found = &objects[0];
        assert_eq!(found.class_id, 1);
        assert_eq!(found.class_name, "bicycle");
        assert_eq!(<[f32; 4]>::from(found.bbox), [80.0, 70.0, 120.0, 90.0]);
    }

    #[test]
    fn decodes_anchor_major_output() {
        let mut raw = Array3::<f32>::zeros((1, 7, 6));
        raw[[0, 2, 0]] = 30.0;
        raw[[0, 2, 1]] = 30.0;
        raw[[0, 2, 2]] = 10.0;
        raw[[0, 2, 3]] = 10.0;
        raw[[0, 2, 4]] = 0.99;

        let objects = decode_predictions(raw.view().into_dyn(), 1.0, (100, 100), 0.5).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].class_name, "person");
        assert_eq!(<[f32; 4]>::from(objects[0].bbox), [25.0, 25.0, 35.0, 35.0]);
    }

    #[test]
    fn rejects_outputs_without_class_scores() {
        let raw = Array3::<f32>::zeros((1, 4, 10));
        assert!(decode_predictions(raw.view().into_dyn(), 1.0, (10, 10), 0.5).is_err());
    }
}
