//! Detected text regions as handed over by a detector.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Intersect with an image of the given size, in integer pixels.
    pub fn clamp_to(&self, image_w: u32, image_h: u32) -> Option<(u32, u32, u32, u32)> {
        let left = self.x.max(0.0).floor() as u32;
        let top = self.y.max(0.0).floor() as u32;
        let right = (self.right().ceil() as i64).clamp(0, i64::from(image_w)) as u32;
        let bottom = (self.bottom().ceil() as i64).clamp(0, i64::from(image_h)) as u32;
        if right <= left || bottom <= top {
            return None;
        }
        Some((left, top, right - left, bottom - top))
    }
}

/// A text region from the detection stage.
///
/// The polygon is authoritative when present; the box is a fast path for
/// detectors that only produce rectangles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    #[serde(default)]
    pub polygon: Vec<Point>,
    #[serde(default)]
    pub bbox: BoundingBox,
    #[serde(default)]
    pub confidence: f32,
}

impl DetectedRegion {
    pub fn from_bbox(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            polygon: Vec::new(),
            bbox,
            confidence,
        }
    }

    pub fn from_polygon(polygon: Vec<Point>, confidence: f32) -> Self {
        Self {
            polygon,
            bbox: BoundingBox::default(),
            confidence,
        }
    }

    /// Resolve the axis-aligned bounding box, polygon first.
    pub fn aabb(&self) -> Option<BoundingBox> {
        if self.polygon.len() >= 3 {
            let mut min_x = f32::INFINITY;
            let mut min_y = f32::INFINITY;
            let mut max_x = f32::NEG_INFINITY;
            let mut max_y = f32::NEG_INFINITY;
            for p in &self.polygon {
                min_x = min_x.min(p.x);
                min_y = min_y.min(p.y);
                max_x = max_x.max(p.x);
                max_y = max_y.max(p.y);
            }
            let bbox = BoundingBox::new(min_x, min_y, max_x - min_x, max_y - min_y);
            if !bbox.is_empty() {
                return Some(bbox);
            }
        }
        if !self.bbox.is_empty() {
            return Some(self.bbox);
        }
        None
    }
}
