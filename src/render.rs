//! Frame composition
//!
//! One render pass: background, optional inch grid, the (optionally
//! de-warped) design mapped into the keystone quad, then the calibration
//! overlays. Everything is recomputed from a [`RenderSnapshot`]; nothing is
//! cached between frames.

use image::{GrayImage, ImageOutputFormat, Luma, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

use crate::calibration::CalibrationState;
use crate::cylinder::warp_cylindrical;
use crate::geometry::{Point, Quad};
use crate::outline::{draw_outline, project_outline, shield_outline};
use crate::scale::ScaleModel;
use crate::transform::{composite_over, draw_image_to_quad, MeshStats};

/// Shown (and reported) when there is no design to map
pub const PLACEHOLDER_MESSAGE: &str = "No export found. Export the design first.";

const BACKGROUND: Rgba<u8> = Rgba([15, 11, 8, 255]);
const GRID: Rgba<u8> = Rgba([242, 231, 214, 64]);
const QUAD_WIDE: Rgba<u8> = Rgba([214, 168, 75, 140]);
const QUAD_THIN: Rgba<u8> = Rgba([0, 0, 0, 64]);
const HANDLE_FILL: Rgba<u8> = Rgba([36, 26, 20, 230]);
const HANDLE_RING: Rgba<u8> = Rgba([214, 168, 75, 217]);
const PLACEHOLDER: Rgba<u8> = Rgba([242, 231, 214, 217]);

/// Coordinates beyond this are not worth rasterizing
const MAX_COORD: f64 = 1.0e5;

/// Operator controls that affect rendering
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RenderControls {
    pub warp_enabled: bool,
    pub show_grid: bool,
    pub show_outline: bool,
    pub subdivisions: u32,
}

impl Default for RenderControls {
    fn default() -> Self {
        Self {
            warp_enabled: true,
            show_grid: false,
            show_outline: true,
            subdivisions: 18,
        }
    }
}

/// Static rendering parameters from configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub surface: (u32, u32),
    pub mesh_min_rows: u32,
    pub outline_arc_segments: u32,
    pub handle_radius: f64,
}

/// Everything a render pass reads, captured at the start of the pass
#[derive(Debug, Clone)]
pub struct RenderSnapshot {
    pub source: Option<Arc<RgbaImage>>,
    pub calibration: Option<CalibrationState>,
    pub controls: RenderControls,
    pub scale: ScaleModel,
    pub params: RenderParams,
}

/// Preview draws the calibration aids; export draws only the mapped design
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Preview,
    Export,
}

/// What a render pass produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(MeshStats),
    Placeholder,
}

/// Render one frame
pub fn render(snapshot: &RenderSnapshot, mode: RenderMode) -> (RgbaImage, RenderOutcome) {
    let (sw, sh) = snapshot.params.surface;
    let mut surface = RgbaImage::from_pixel(sw, sh, BACKGROUND);
    let overlays = mode == RenderMode::Preview;

    if overlays && snapshot.controls.show_grid {
        let spacing = snapshot
            .calibration
            .as_ref()
            .map(|c| c.pixels_per_inch)
            .unwrap_or(crate::calibration::DEFAULT_PPI);
        draw_grid(&mut surface, spacing);
    }

    let (source, calibration) = match (&snapshot.source, &snapshot.calibration) {
        (Some(source), Some(calibration)) => (source, calibration),
        _ => {
            debug!("{}", PLACEHOLDER_MESSAGE);
            draw_placeholder(&mut surface);
            return (surface, RenderOutcome::Placeholder);
        }
    };

    let scale = snapshot.scale;
    let warped = if snapshot.controls.warp_enabled {
        warp_cylindrical(source, scale.width_in, scale.curve_in)
    } else {
        Cow::Borrowed(&**source)
    };

    let stats = draw_image_to_quad(
        &mut surface,
        &warped,
        &calibration.quad,
        snapshot.controls.subdivisions,
        snapshot.params.mesh_min_rows,
    );

    if overlays {
        if snapshot.controls.show_outline {
            draw_quad_border(&mut surface, &calibration.quad);
            let outline = shield_outline(
                source.width(),
                source.height(),
                snapshot.params.outline_arc_segments,
            );
            let warp = snapshot.controls.warp_enabled.then_some(&scale);
            let projected = project_outline(&outline, source.dimensions(), &calibration.quad, warp);
            draw_outline(&mut surface, &projected);
        }
        draw_handles(&mut surface, &calibration.quad, snapshot.params.handle_radius);
    }

    (surface, RenderOutcome::Rendered(stats))
}

/// Encode a raster as PNG
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut data = Vec::new();
    img.write_to(&mut Cursor::new(&mut data), ImageOutputFormat::Png)?;
    Ok(data)
}

/// Composite `color` through a coverage mask
fn paint_mask(surface: &mut RgbaImage, mask: &GrayImage, color: Rgba<u8>) {
    for (dst, cov) in surface.pixels_mut().zip(mask.pixels()) {
        if cov[0] == 0 {
            continue;
        }
        let alpha = (color[3] as u32 * cov[0] as u32 + 127) / 255;
        composite_over(dst, Rgba([color[0], color[1], color[2], alpha as u8]));
    }
}

fn usable(p: Point) -> bool {
    p.is_finite() && p.x.abs() < MAX_COORD && p.y.abs() < MAX_COORD
}

/// Rasterize a `width`-pixel line into the mask as parallel 1px lines
fn mask_thick_line(mask: &mut GrayImage, a: Point, b: Point, width: f64) {
    let len = a.distance(b);
    if len <= f64::EPSILON {
        return;
    }
    let normal = Point::new(-(b.y - a.y) / len, (b.x - a.x) / len);
    let half = width / 2.0;
    let passes = (width * 2.0).ceil().max(1.0) as u32;

    for k in 0..=passes {
        let off = -half + width * k as f64 / passes as f64;
        let start = (
            (a.x + normal.x * off) as f32,
            (a.y + normal.y * off) as f32,
        );
        let end = (
            (b.x + normal.x * off) as f32,
            (b.y + normal.y * off) as f32,
        );
        draw_line_segment_mut(mask, start, end, Luma([255u8]));
    }
}

/// Stroke a polyline with uniform translucency (overlaps are not doubled)
pub fn stroke_polyline(surface: &mut RgbaImage, points: &[Point], closed: bool, width: f64, color: Rgba<u8>) {
    if points.len() < 2 {
        return;
    }
    let mut mask = GrayImage::new(surface.width(), surface.height());
    let n = points.len();
    let segments = if closed { n } else { n - 1 };
    let join_radius = (width / 2.0).round() as i32;

    for i in 0..segments {
        let a = points[i];
        let b = points[(i + 1) % n];
        if !usable(a) || !usable(b) {
            continue;
        }
        mask_thick_line(&mut mask, a, b, width);
        if join_radius >= 1 {
            draw_filled_circle_mut(&mut mask, (a.x.round() as i32, a.y.round() as i32), join_radius, Luma([255u8]));
        }
    }
    paint_mask(surface, &mask, color);
}

/// One grid line per `spacing` pixels in both directions
pub fn draw_grid(surface: &mut RgbaImage, spacing: f64) {
    if !(spacing.is_finite() && spacing >= 2.0) {
        return;
    }
    let (w, h) = (surface.width() as f64, surface.height() as f64);
    let mut mask = GrayImage::new(surface.width(), surface.height());

    let mut x = 0.0;
    while x <= w {
        draw_line_segment_mut(&mut mask, (x as f32, 0.0), (x as f32, h as f32), Luma([255u8]));
        x += spacing;
    }
    let mut y = 0.0;
    while y <= h {
        draw_line_segment_mut(&mut mask, (0.0, y as f32), (w as f32, y as f32), Luma([255u8]));
        y += spacing;
    }
    paint_mask(surface, &mask, GRID);
}

/// Quad edges, wide gold then thin dark
pub fn draw_quad_border(surface: &mut RgbaImage, quad: &Quad) {
    stroke_polyline(surface, quad, true, 3.0, QUAD_WIDE);
    stroke_polyline(surface, quad, true, 1.0, QUAD_THIN);
}

/// Filled discs with a ring at each corner
pub fn draw_handles(surface: &mut RgbaImage, quad: &Quad, radius: f64) {
    let r = radius.round().max(1.0) as i32;
    let mut fill = GrayImage::new(surface.width(), surface.height());
    let mut ring = GrayImage::new(surface.width(), surface.height());

    for p in quad.iter().filter(|p| usable(**p)) {
        let center = (p.x.round() as i32, p.y.round() as i32);
        draw_filled_circle_mut(&mut fill, center, r, Luma([255u8]));
        draw_filled_circle_mut(&mut ring, center, r + 1, Luma([255u8]));
        // Hollow out the ring to a 2px band
        draw_filled_circle_mut(&mut ring, center, r - 1, Luma([0u8]));
    }
    paint_mask(surface, &fill, HANDLE_FILL);
    paint_mask(surface, &ring, HANDLE_RING);
}

/// Framed, crossed-out box marking the missing design
fn draw_placeholder(surface: &mut RgbaImage) {
    let (w, h) = (surface.width() as f64, surface.height() as f64);
    let (bw, bh) = (w * 0.3, h * 0.3);
    let (x0, y0) = ((w - bw) / 2.0, (h - bh) / 2.0);
    let frame = crate::geometry::rect_quad(x0, y0, bw, bh);
    stroke_polyline(surface, &frame, true, 2.0, PLACEHOLDER);
    stroke_polyline(surface, &[frame[0], frame[2]], false, 2.0, PLACEHOLDER);
    stroke_polyline(surface, &[frame[1], frame[3]], false, 2.0, PLACEHOLDER);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rect_quad;

    fn params(surface: (u32, u32)) -> RenderParams {
        RenderParams {
            surface,
            mesh_min_rows: 8,
            outline_arc_segments: 12,
            handle_radius: 14.0,
        }
    }

    fn design(w: u32, h: u32) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x % 200) as u8 + 30, (y % 200) as u8 + 30, 90, 255])
        }))
    }

    #[test]
    fn test_placeholder_without_source() {
        let snapshot = RenderSnapshot {
            source: None,
            calibration: None,
            controls: RenderControls::default(),
            scale: ScaleModel::default(),
            params: params((320, 200)),
        };
        let (img, outcome) = render(&snapshot, RenderMode::Preview);
        assert_eq!(outcome, RenderOutcome::Placeholder);
        assert_eq!(img.dimensions(), (320, 200));
        assert_eq!(img.get_pixel(2, 2), &BACKGROUND);
        // Frame edge drawn at 35% width, 35% height
        assert_ne!(img.get_pixel(160, 70), &BACKGROUND);
    }

    #[test]
    fn test_export_end_to_end_dimensions() {
        let source = design(620, 800);
        let snapshot = RenderSnapshot {
            source: Some(source.clone()),
            calibration: Some(CalibrationState {
                quad: rect_quad(0.0, 0.0, 620.0, 800.0),
                pixels_per_inch: 20.0,
            }),
            controls: RenderControls::default(),
            scale: ScaleModel::default(),
            params: params((620, 800)),
        };
        let (img, outcome) = render(&snapshot, RenderMode::Export);
        assert!(matches!(outcome, RenderOutcome::Rendered(s) if s.triangles_skipped == 0));
        assert_eq!(img.dimensions(), (620, 800));

        let png = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (620, 800));
    }

    #[test]
    fn test_export_without_warp_matches_source() {
        let source = design(64, 48);
        let snapshot = RenderSnapshot {
            source: Some(source.clone()),
            calibration: Some(CalibrationState {
                quad: rect_quad(0.0, 0.0, 64.0, 48.0),
                pixels_per_inch: 60.0,
            }),
            controls: RenderControls {
                warp_enabled: false,
                ..RenderControls::default()
            },
            scale: ScaleModel::default(),
            params: params((64, 48)),
        };
        let (img, _) = render(&snapshot, RenderMode::Export);
        assert_eq!(img.as_raw(), source.as_raw());
    }

    #[test]
    fn test_preview_draws_handles() {
        let source = design(100, 100);
        let quad = rect_quad(50.0, 50.0, 100.0, 100.0);
        let snapshot = RenderSnapshot {
            source: Some(source),
            calibration: Some(CalibrationState { quad, pixels_per_inch: 60.0 }),
            controls: RenderControls::default(),
            scale: ScaleModel::default(),
            params: params((200, 200)),
        };
        let (preview, _) = render(&snapshot, RenderMode::Preview);
        let (export, _) = render(&snapshot, RenderMode::Export);
        // Handle disc sits over the TL corner only in preview
        assert_ne!(preview.get_pixel(45, 45), export.get_pixel(45, 45));
        assert_eq!(export.get_pixel(45, 45), &BACKGROUND);
    }

    #[test]
    fn test_stroke_ignores_wild_points() {
        let mut img = RgbaImage::from_pixel(50, 50, BACKGROUND);
        let pts = [Point::new(f64::NAN, 0.0), Point::new(1e9, 1e9), Point::new(10.0, 10.0)];
        stroke_polyline(&mut img, &pts, true, 3.0, QUAD_WIDE);
        assert!(img.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn test_grid_spacing() {
        let mut img = RgbaImage::from_pixel(100, 100, BACKGROUND);
        draw_grid(&mut img, 25.0);
        assert_ne!(img.get_pixel(25, 10), &BACKGROUND);
        assert_eq!(img.get_pixel(12, 12), &BACKGROUND);
    }
}
