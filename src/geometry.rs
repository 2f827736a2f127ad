//! Points and quads in output-surface pixel space
//!
//! A quad is always stored as `[TL, TR, BR, BL]`. Nothing here enforces
//! convexity; degenerate quads simply produce degenerate results.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// A 2D point in output-surface pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn distance(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn lerp(self, other: Point, t: f64) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Corner indices
pub const TL: usize = 0;
pub const TR: usize = 1;
pub const BR: usize = 2;
pub const BL: usize = 3;

/// Four corners in `[TL, TR, BR, BL]` order
pub type Quad = [Point; 4];

/// Short labels used for handle markers and logs
pub const CORNER_LABELS: [&str; 4] = ["TL", "TR", "BR", "BL"];

/// Axis-aligned quad covering `[x, x + w] × [y, y + h]`
pub fn rect_quad(x: f64, y: f64, w: f64, h: f64) -> Quad {
    [
        Point::new(x, y),
        Point::new(x + w, y),
        Point::new(x + w, y + h),
        Point::new(x, y + h),
    ]
}

/// Bilinear interpolation of the quad corners at normalized `(u, v)`
pub fn bilinear(quad: &Quad, u: f64, v: f64) -> Point {
    let top = quad[TL].lerp(quad[TR], u);
    let bottom = quad[BL].lerp(quad[BR], u);
    top.lerp(bottom, v)
}

/// Mean of the four corners
pub fn quad_center(quad: &Quad) -> Point {
    Point::new(
        (quad[0].x + quad[1].x + quad[2].x + quad[3].x) / 4.0,
        (quad[0].y + quad[1].y + quad[2].y + quad[3].y) / 4.0,
    )
}

pub fn translate_quad(quad: &mut Quad, delta: Point) {
    for p in quad.iter_mut() {
        *p = *p + delta;
    }
}

/// Rotate about the centroid by `angle` radians
pub fn rotate_quad(quad: &mut Quad, angle: f64) {
    let c = quad_center(quad);
    let (sin, cos) = angle.sin_cos();
    for p in quad.iter_mut() {
        let dx = p.x - c.x;
        let dy = p.y - c.y;
        p.x = c.x + dx * cos - dy * sin;
        p.y = c.y + dx * sin + dy * cos;
    }
}

/// Scale about the centroid
pub fn scale_quad(quad: &mut Quad, factor: f64) {
    let c = quad_center(quad);
    for p in quad.iter_mut() {
        p.x = c.x + (p.x - c.x) * factor;
        p.y = c.y + (p.y - c.y) * factor;
    }
}

/// Barycentric point-in-triangle test (edges inclusive)
///
/// A zero-area triangle yields NaN coordinates and therefore `false`.
pub fn point_in_tri(p: Point, a: Point, b: Point, c: Point) -> bool {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.x * v0.x + v0.y * v0.y;
    let dot01 = v0.x * v1.x + v0.y * v1.y;
    let dot02 = v0.x * v2.x + v0.y * v2.y;
    let dot11 = v1.x * v1.x + v1.y * v1.y;
    let dot12 = v1.x * v2.x + v1.y * v2.y;

    let inv_den = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_den;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_den;
    u >= 0.0 && v >= 0.0 && u + v <= 1.0
}

/// Point-in-quad via the `(TL, TR, BR)` and `(TL, BR, BL)` triangles
pub fn point_in_quad(p: Point, quad: &Quad) -> bool {
    point_in_tri(p, quad[TL], quad[TR], quad[BR]) || point_in_tri(p, quad[TL], quad[BR], quad[BL])
}

/// Length of the top edge and left edge, the quad's nominal width and height
pub fn quad_extent(quad: &Quad) -> (f64, f64) {
    (quad[TL].distance(quad[TR]), quad[TL].distance(quad[BL]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9
    }

    #[test]
    fn test_bilinear_corners() {
        let q = [
            Point::new(10.0, 20.0),
            Point::new(200.0, 5.0),
            Point::new(220.0, 300.0),
            Point::new(0.0, 280.0),
        ];
        assert!(close(bilinear(&q, 0.0, 0.0), q[TL]));
        assert!(close(bilinear(&q, 1.0, 0.0), q[TR]));
        assert!(close(bilinear(&q, 1.0, 1.0), q[BR]));
        assert!(close(bilinear(&q, 0.0, 1.0), q[BL]));
        assert!(close(bilinear(&q, 0.5, 0.5), quad_center(&q)));
    }

    #[test]
    fn test_point_in_quad_centroid_and_far() {
        let q = [
            Point::new(100.0, 80.0),
            Point::new(420.0, 120.0),
            Point::new(390.0, 500.0),
            Point::new(60.0, 460.0),
        ];
        assert!(point_in_quad(quad_center(&q), &q));
        assert!(!point_in_quad(Point::new(5000.0, -3000.0), &q));
        assert!(!point_in_quad(Point::new(0.0, 0.0), &q));
    }

    #[test]
    fn test_degenerate_quad_contains_nothing() {
        let p = Point::new(50.0, 50.0);
        let q = [p, p, p, p];
        assert!(!point_in_quad(p, &q));
    }

    #[test]
    fn test_scale_then_inverse_restores() {
        let original = [
            Point::new(13.5, 7.25),
            Point::new(611.0, 40.0),
            Point::new(590.0, 777.0),
            Point::new(-20.0, 700.0),
        ];
        let mut q = original;
        scale_quad(&mut q, 1.03);
        scale_quad(&mut q, 1.0 / 1.03);
        for (a, b) in q.iter().zip(original.iter()) {
            assert!((a.x - b.x).abs() < 1e-9);
            assert!((a.y - b.y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rotate_preserves_center() {
        let mut q = rect_quad(0.0, 0.0, 100.0, 50.0);
        let before = quad_center(&q);
        rotate_quad(&mut q, std::f64::consts::FRAC_PI_2);
        assert!(close(quad_center(&q), before));
        // TL (0,0) about (50,25) by +90° lands at (75,-25)
        assert!(close(q[TL], Point::new(75.0, -25.0)));
    }

    #[test]
    fn test_translate() {
        let mut q = rect_quad(0.0, 0.0, 10.0, 10.0);
        translate_quad(&mut q, Point::new(3.0, -2.0));
        assert_eq!(q[BR], Point::new(13.0, 8.0));
    }
}
