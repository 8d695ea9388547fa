use serde::{Deserialize, Serialize};

/// Axis-aligned box in PDF user space (origin bottom-left, y up).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    /// Normalizes the corners so that `x0 <= x1` and `y0 <= y1`.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Bounding box of a set of points.
    pub fn from_points(points: &[(f32, f32)]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut rect = Rect::new(first.0, first.1, first.0, first.1);
        for &(x, y) in rest {
            rect.x0 = rect.x0.min(x);
            rect.y0 = rect.y0.min(y);
            rect.x1 = rect.x1.max(x);
            rect.y1 = rect.y1.max(y);
        }
        Some(rect)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && self.x1 > other.x0 && self.y0 < other.y1 && self.y1 > other.y0
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Rounded key used to register each box once.
    pub fn pos_key(&self) -> String {
        format!(
            "{:.1}:{:.1}:{:.1}:{:.1}",
            self.x0, self.y0, self.x1, self.y1
        )
    }
}

/// RGB components in `[0, 1]`.
pub type Color = [f32; 3];

pub const WHITE: Color = [1.0, 1.0, 1.0];
pub const BLACK: Color = [0.0, 0.0, 0.0];

/// A pending `/Redact` annotation read back from a page.
#[derive(Debug, Clone, PartialEq)]
pub struct RedactAnnot {
    pub rect: Rect,
    pub overlay_text: String,
    pub fill: Color,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_normalizes() {
        let r = Rect::new(10.0, 20.0, 0.0, 5.0);
        assert_eq!((r.x0, r.y0, r.x1, r.y1), (0.0, 5.0, 10.0, 20.0));
        assert_eq!(r.width(), 10.0);
        assert_eq!(r.center(), (5.0, 12.5));
    }

    #[test]
    fn test_rects_intersect() {
        let a = Rect::new(100.0, 100.0, 200.0, 200.0);
        assert!(a.intersects(&Rect::new(150.0, 150.0, 250.0, 250.0)));
        assert!(!a.intersects(&Rect::new(300.0, 300.0, 350.0, 350.0)));
        assert!(!a.intersects(&Rect::new(200.0, 100.0, 210.0, 200.0)));
    }

    #[test]
    fn test_from_points() {
        let r = Rect::from_points(&[(3.0, 1.0), (-1.0, 4.0), (2.0, -2.0)]).unwrap();
        assert_eq!(r, Rect::new(-1.0, -2.0, 3.0, 4.0));
        assert!(Rect::from_points(&[]).is_none());
    }
}
