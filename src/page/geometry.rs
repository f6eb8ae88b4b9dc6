/*!
 * Axis-aligned boxes in page pixel coordinates.
 */

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box, `x1 < x2` and `y1 < y2` when valid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn diagonal(&self) -> f32 {
        self.width().hypot(self.height())
    }

    /// Zero or negative extent, or non-finite coordinates
    pub fn is_degenerate(&self) -> bool {
        let finite = [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite());
        !finite || self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }

    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    /// Intersection over union
    pub fn iou(&self, other: &BBox) -> f32 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Share of the smaller box covered by the intersection
    pub fn containment(&self, other: &BBox) -> f32 {
        let inter = self.intersection_area(other);
        let smaller = self.area().min(other.area());
        if inter <= 0.0 || smaller <= 0.0 {
            0.0
        } else {
            inter / smaller
        }
    }

    pub fn center_distance(&self, other: &BBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }

    /// Horizontal overlap divided by the narrower width
    pub fn horizontal_overlap_ratio(&self, other: &BBox) -> f32 {
        let overlap = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let narrower = self.width().min(other.width());
        if narrower <= 0.0 { 0.0 } else { overlap / narrower }
    }

    /// Vertical gap between the boxes, zero when they overlap vertically
    pub fn vertical_gap(&self, other: &BBox) -> f32 {
        (self.y1.max(other.y1) - self.y2.min(other.y2)).max(0.0)
    }

    /// Horizontal gap between the boxes, zero when they overlap horizontally
    pub fn horizontal_gap(&self, other: &BBox) -> f32 {
        (self.x1.max(other.x1) - self.x2.min(other.x2)).max(0.0)
    }

    pub fn translate(&self, dx: f32, dy: f32) -> BBox {
        BBox::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// Clip to another box; may produce a degenerate box
    pub fn clip(&self, bounds: &BBox) -> BBox {
        BBox::new(
            self.x1.max(bounds.x1),
            self.y1.max(bounds.y1),
            self.x2.min(bounds.x2),
            self.y2.min(bounds.y2),
        )
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}
