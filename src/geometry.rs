//! Page-space geometry.

use crate::object::Object;

/// A rectangle in default user space (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// X coordinate of the lower-left corner
    pub x: f32,
    /// Y coordinate of the lower-left corner
    pub y: f32,
    /// Width of rectangle
    pub width: f32,
    /// Height of rectangle
    pub height: f32,
}

impl Rect {
    /// Create a new rectangle from position and dimensions.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// US Letter, the fallback when a page declares no usable MediaBox.
    pub fn letter() -> Self {
        Self::new(0.0, 0.0, 612.0, 792.0)
    }

    /// Build from a PDF rectangle array `[llx lly urx ury]`.
    ///
    /// Corners may be given in any order; they are normalised.
    pub fn from_pdf_array(items: &[Object]) -> Option<Self> {
        if items.len() != 4 {
            return None;
        }
        let nums: Vec<f32> = items
            .iter()
            .map(|o| o.as_number().map(|n| n as f32))
            .collect::<Option<_>>()?;
        let (x0, x1) = (nums[0].min(nums[2]), nums[0].max(nums[2]));
        let (y0, y1) = (nums[1].min(nums[3]), nums[1].max(nums[3]));
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Convert back to a PDF rectangle array.
    pub fn to_pdf_array(&self) -> Object {
        Object::Array(vec![
            Object::Real(self.x as f64),
            Object::Real(self.y as f64),
            Object::Real((self.x + self.width) as f64),
            Object::Real((self.y + self.height) as f64),
        ])
    }

    /// Whether the point lies within the rectangle (edges inclusive).
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pdf_array_normalises() {
        let arr = [
            Object::Integer(612),
            Object::Integer(792),
            Object::Integer(0),
            Object::Real(0.0),
        ];
        let rect = Rect::from_pdf_array(&arr).unwrap();
        assert_eq!(rect, Rect::letter());
    }

    #[test]
    fn test_from_pdf_array_rejects_bad_input() {
        assert!(Rect::from_pdf_array(&[Object::Integer(1)]).is_none());
        let arr = [Object::Integer(0), Object::Null, Object::Integer(1), Object::Integer(1)];
        assert!(Rect::from_pdf_array(&arr).is_none());
    }

    #[test]
    fn test_contains_point() {
        let rect = Rect::new(10.0, 10.0, 100.0, 50.0);
        assert!(rect.contains_point(60.0, 110.0 - 50.0));
        assert!(!rect.contains_point(5.0, 20.0));
    }
}
