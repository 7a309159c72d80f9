//! SPDX-License-Identifier: GPL-3.0-or-later

mod cascade;
mod interfaces;

pub use cascade::{CascadeResult, DetectionCascade, Reason};
pub use interfaces::{DescribeOptions, DetectOptions, ObjectDetector, VisionLanguage};

use serde::{Deserialize, Serialize};

/// Normalized center + size box. Invariant: callers clamp `x±w/2`, `y±h/2`
/// into `[0,1]` before treating the box as fully on-frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Intersection-over-union of two boxes, clamped to the unit square at
    /// their corners before intersecting.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let (ax0, ay0, ax1, ay1) = self.corners();
        let (bx0, by0, bx1, by1) = other.corners();

        let ix0 = ax0.max(bx0);
        let iy0 = ay0.max(by0);
        let ix1 = ax1.min(bx1);
        let iy1 = ay1.min(by1);

        let iw = (ix1 - ix0).max(0.0);
        let ih = (iy1 - iy0).max(0.0);
        let intersection = iw * ih;
        if intersection <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    fn corners(&self) -> (f32, f32, f32, f32) {
        (
            (self.x - self.w / 2.0).clamp(0.0, 1.0),
            (self.y - self.h / 2.0).clamp(0.0, 1.0),
            (self.x + self.w / 2.0).clamp(0.0, 1.0),
            (self.y + self.h / 2.0).clamp(0.0, 1.0),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class: String,
    pub confidence: f32,
    pub class_id: Option<u32>,
}

/// Greedy non-maximum suppression within a class, keeping the
/// highest-confidence box and discarding others above `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    let mut kept: Vec<Detection> = Vec::new();
    'outer: for det in detections {
        for k in &kept {
            if k.class == det.class && k.bbox.iou(&det.bbox) > iou_threshold {
                continue 'outer;
            }
        }
        kept.push(det);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_boxes_have_iou_one() {
        let b = BoundingBox { x: 0.5, y: 0.5, w: 0.2, h: 0.2 };
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_boxes_have_iou_zero() {
        let a = BoundingBox { x: 0.1, y: 0.1, w: 0.1, h: 0.1 };
        let b = BoundingBox { x: 0.9, y: 0.9, w: 0.1, h: 0.1 };
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_keeps_highest_confidence_overlap() {
        let dets = vec![
            Detection { bbox: BoundingBox { x: 0.5, y: 0.5, w: 0.3, h: 0.3 }, class: "car".into(), confidence: 0.9, class_id: None },
            Detection { bbox: BoundingBox { x: 0.52, y: 0.52, w: 0.3, h: 0.3 }, class: "car".into(), confidence: 0.6, class_id: None },
        ];
        let kept = non_max_suppression(dets, 0.45);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }
}
