//! Reference silhouette projected through the same mappings as the image
//!
//! The operator lines this outline up with the physical shield; if it lands
//! on the real edge, the warped design will too.

use image::{Rgba, RgbaImage};
use std::f64::consts::{FRAC_PI_2, PI};

use crate::cylinder::forward_cylindrical_x;
use crate::geometry::{bilinear, Point, Quad};
use crate::render::stroke_polyline;
use crate::scale::ScaleModel;

pub const DEFAULT_ARC_SEGMENTS: u32 = 12;

const WIDE_STROKE: Rgba<u8> = Rgba([214, 168, 75, 110]);
const WIDE_WIDTH: f64 = 6.0;
const THIN_STROKE: Rgba<u8> = Rgba([20, 14, 10, 230]);
const THIN_WIDTH: f64 = 1.5;

/// Shield boundary in source pixels, as a closed polyline
///
/// Straight edges joined by quarter-ellipse corners; the first point is not
/// repeated at the end.
pub fn shield_outline(width: u32, height: u32, arc_segments: u32) -> Vec<Point> {
    let (w, h) = (width as f64, height as f64);
    let left = w * 0.18;
    let right = w * 0.82;
    let top = h * 0.03;
    let bottom = h * 0.97;
    let rx = w * 0.13;
    let ry = h * 0.09;

    let segments = arc_segments.max(1);
    // (centre, start angle): TR, BR, BL, TL walking clockwise in screen space
    let corners = [
        (Point::new(right - rx, top + ry), -FRAC_PI_2),
        (Point::new(right - rx, bottom - ry), 0.0),
        (Point::new(left + rx, bottom - ry), FRAC_PI_2),
        (Point::new(left + rx, top + ry), PI),
    ];

    let mut points = Vec::with_capacity(corners.len() * (segments as usize + 1));
    for (center, start) in corners {
        for k in 0..=segments {
            let theta = start + FRAC_PI_2 * k as f64 / segments as f64;
            points.push(Point::new(
                center.x + rx * theta.cos(),
                center.y + ry * theta.sin(),
            ));
        }
    }
    points
}

/// Map source-pixel points onto the output surface
///
/// With `scale` set, x first goes through the forward cylindrical mapping;
/// then `(x/w, y/h)` is mapped with the quad's bilinear interpolation.
pub fn project_outline(
    points: &[Point],
    source: (u32, u32),
    quad: &Quad,
    scale: Option<&ScaleModel>,
) -> Vec<Point> {
    let (w, h) = (source.0.max(1), source.1.max(1));
    points
        .iter()
        .map(|p| {
            let x = match scale {
                Some(s) => forward_cylindrical_x(p.x, w, s.width_in, s.curve_in),
                None => p.x,
            };
            bilinear(quad, x / w as f64, p.y / h as f64)
        })
        .collect()
}

/// Stroke the projected silhouette: wide translucent, then thin dark
pub fn draw_outline(surface: &mut RgbaImage, projected: &[Point]) {
    stroke_polyline(surface, projected, true, WIDE_WIDTH, WIDE_STROKE);
    stroke_polyline(surface, projected, true, THIN_WIDTH, THIN_STROKE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rect_quad;

    #[test]
    fn test_outline_bounds() {
        let pts = shield_outline(620, 800, 12);
        assert_eq!(pts.len(), 4 * 13);

        let min_x = pts.iter().map(|p| p.x).fold(f64::MAX, f64::min);
        let max_x = pts.iter().map(|p| p.x).fold(f64::MIN, f64::max);
        let min_y = pts.iter().map(|p| p.y).fold(f64::MAX, f64::min);
        let max_y = pts.iter().map(|p| p.y).fold(f64::MIN, f64::max);
        assert!((min_x - 620.0 * 0.18).abs() < 1e-9);
        assert!((max_x - 620.0 * 0.82).abs() < 1e-9);
        assert!((min_y - 800.0 * 0.03).abs() < 1e-9);
        assert!((max_y - 800.0 * 0.97).abs() < 1e-9);
    }

    #[test]
    fn test_outline_starts_on_top_edge() {
        let pts = shield_outline(100, 100, 4);
        assert!((pts[0].x - 69.0).abs() < 1e-9);
        assert!((pts[0].y - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_identity_projection() {
        let pts = shield_outline(620, 800, 6);
        let quad = rect_quad(0.0, 0.0, 620.0, 800.0);
        let projected = project_outline(&pts, (620, 800), &quad, None);
        for (a, b) in pts.iter().zip(projected.iter()) {
            assert!((a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_cylindrical_projection_spreads_outward() {
        let pts = shield_outline(620, 800, 6);
        let quad = rect_quad(0.0, 0.0, 620.0, 800.0);
        let scale = ScaleModel::default();
        let projected = project_outline(&pts, (620, 800), &quad, Some(&scale));
        // asin(u/R)·R ≥ u: everything moves away from the centre column
        for (a, b) in pts.iter().zip(projected.iter()) {
            assert!((b.x - 310.0).abs() >= (a.x - 310.0).abs() - 1e-9);
            assert!(b.is_finite());
        }
    }

    #[test]
    fn test_draw_outline_marks_surface() {
        let mut surface = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 0, 255]));
        let pts = shield_outline(200, 200, 8);
        let quad = rect_quad(0.0, 0.0, 200.0, 200.0);
        draw_outline(&mut surface, &project_outline(&pts, (200, 200), &quad, None));

        // Top edge at y = 6, mid-width
        assert_ne!(surface.get_pixel(100, 6), &Rgba([0, 0, 0, 255]));
        // Centre untouched
        assert_eq!(surface.get_pixel(100, 100), &Rgba([0, 0, 0, 255]));
    }
}
