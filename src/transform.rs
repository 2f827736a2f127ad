//! Keystone mapping via mesh subdivision
//!
//! A full projective transform is approximated by splitting the source into
//! an `nx × ny` grid. Each cell's destination corners come from bilinear
//! interpolation of the quad, and each cell is drawn as two affine-mapped
//! triangles. Finer grids track a true homography more closely at the cost of
//! more 3×3 solves.

use image::{Rgba, RgbaImage};
use nalgebra::{Matrix3, Vector3};
use tracing::trace;

use crate::geometry::{bilinear, Point, Quad};

/// Smallest and largest accepted subdivision counts
pub const MIN_STEPS: u32 = 8;
pub const MAX_STEPS: u32 = 40;

/// Default floor for the vertical cell count
pub const DEFAULT_MIN_ROWS: u32 = 8;

/// Determinant magnitude below which a triangle is treated as singular
pub const SINGULAR_EPSILON: f64 = 1e-10;

/// 2D affine transform in canvas `setTransform` order
///
/// Maps `(x, y)` to `(a·x + c·y + e, b·x + d·y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    #[inline]
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    /// Inverse transform, or `None` when the linear part is singular
    pub fn invert(&self) -> Option<Affine> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < SINGULAR_EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.d * inv;
        let b = -self.b * inv;
        let c = -self.c * inv;
        let d = self.a * inv;
        Some(Affine {
            a,
            b,
            c,
            d,
            e: -(a * self.e + c * self.f),
            f: -(b * self.e + d * self.f),
        })
    }
}

/// Invert a 3×3 matrix, refusing near-singular input
pub fn inv3(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    if m.determinant().abs() < SINGULAR_EPSILON {
        return None;
    }
    m.try_inverse()
}

/// Solve the affine map taking `src` triangle vertices onto `dst`
///
/// Solves `[x y 1]·M = [X Y]` for the three correspondences. Returns `None`
/// for zero-area (or numerically collinear) source triangles.
pub fn affine_from_tri(src: &[Point; 3], dst: &[Point; 3]) -> Option<Affine> {
    #[rustfmt::skip]
    let s = Matrix3::new(
        src[0].x, src[0].y, 1.0,
        src[1].x, src[1].y, 1.0,
        src[2].x, src[2].y, 1.0,
    );
    let inv = inv3(&s)?;

    let xs = inv * Vector3::new(dst[0].x, dst[1].x, dst[2].x);
    let ys = inv * Vector3::new(dst[0].y, dst[1].y, dst[2].y);

    Some(Affine {
        a: xs[0],
        c: xs[1],
        e: xs[2],
        b: ys[0],
        d: ys[1],
        f: ys[2],
    })
}

/// Clamp a requested subdivision count into the supported range
pub fn clamp_steps(steps: u32) -> u32 {
    steps.clamp(MIN_STEPS, MAX_STEPS)
}

/// Grid size for a `width × height` source
///
/// `nx = steps`, `ny = max(min_rows, floor(steps · h / w))` so cells stay
/// roughly square.
pub fn mesh_dims(width: u32, height: u32, steps: u32, min_rows: u32) -> (u32, u32) {
    let nx = clamp_steps(steps);
    if width == 0 {
        return (nx, min_rows.max(1));
    }
    let rows = (nx as f64 * (height as f64 / width as f64)).floor() as u32;
    (nx, rows.max(min_rows).max(1))
}

/// Counters from one mesh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshStats {
    pub cells: u32,
    pub triangles_drawn: u32,
    pub triangles_skipped: u32,
}

/// Paint `src` into `quad` on `dst` using an `nx × ny` affine mesh
///
/// Singular triangles are skipped without error; the returned stats report
/// how many were dropped.
pub fn draw_image_to_quad(
    dst: &mut RgbaImage,
    src: &RgbaImage,
    quad: &Quad,
    steps: u32,
    min_rows: u32,
) -> MeshStats {
    let (w, h) = src.dimensions();
    let mut stats = MeshStats::default();
    if w == 0 || h == 0 {
        return stats;
    }

    let (nx, ny) = mesh_dims(w, h, steps, min_rows);
    let (wf, hf) = (w as f64, h as f64);

    for j in 0..ny {
        let v0 = j as f64 / ny as f64;
        let v1 = (j + 1) as f64 / ny as f64;

        for i in 0..nx {
            let u0 = i as f64 / nx as f64;
            let u1 = (i + 1) as f64 / nx as f64;

            let src_tl = Point::new(u0 * wf, v0 * hf);
            let src_tr = Point::new(u1 * wf, v0 * hf);
            let src_br = Point::new(u1 * wf, v1 * hf);
            let src_bl = Point::new(u0 * wf, v1 * hf);

            let dst_tl = bilinear(quad, u0, v0);
            let dst_tr = bilinear(quad, u1, v0);
            let dst_br = bilinear(quad, u1, v1);
            let dst_bl = bilinear(quad, u0, v1);

            stats.cells += 1;
            for (s, d) in [
                ([src_tl, src_tr, src_br], [dst_tl, dst_tr, dst_br]),
                ([src_tl, src_br, src_bl], [dst_tl, dst_br, dst_bl]),
            ] {
                if paint_triangle(dst, src, &s, &d) {
                    stats.triangles_drawn += 1;
                } else {
                    stats.triangles_skipped += 1;
                }
            }
        }
    }

    if stats.triangles_skipped > 0 {
        trace!(
            "Mesh {}x{}: skipped {} singular triangles",
            nx,
            ny,
            stats.triangles_skipped
        );
    }
    stats
}

/// Paint one source triangle into its destination triangle
///
/// A pixel is painted when its centre lies strictly inside the triangle, or
/// exactly on an edge the triangle owns (see [`owns_edge`]). Triangles that
/// share an edge never both claim a pixel on it, so translucent sources are
/// composited once per pixel across the whole mesh.
///
/// Returns `false` when either side is degenerate and nothing was drawn.
fn paint_triangle(dst: &mut RgbaImage, src: &RgbaImage, src_tri: &[Point; 3], dst_tri: &[Point; 3]) -> bool {
    let Some(forward) = affine_from_tri(src_tri, dst_tri) else {
        return false;
    };
    let Some(inverse) = forward.invert() else {
        return false;
    };

    let [a, mut b, mut c] = *dst_tri;
    let area = cross(b - a, c - a);
    if area.abs() < SINGULAR_EPSILON || !area.is_finite() {
        return false;
    }
    // Interior on the positive side of every edge
    if area < 0.0 {
        std::mem::swap(&mut b, &mut c);
    }
    let edges = [(a, b), (b, c), (c, a)];
    let owned = edges.map(|(from, to)| owns_edge(to - from));

    // Clip the triangle's bounding box to the surface
    let (dw, dh) = dst.dimensions();
    let min_x = a.x.min(b.x).min(c.x).floor().max(0.0);
    let min_y = a.y.min(b.y).min(c.y).floor().max(0.0);
    let max_x = a.x.max(b.x).max(c.x).ceil().min(dw as f64);
    let max_y = a.y.max(b.y).max(c.y).ceil().min(dh as f64);
    if min_x >= max_x || min_y >= max_y {
        return true;
    }

    for py in min_y as u32..max_y as u32 {
        for px in min_x as u32..max_x as u32 {
            let p = Point::new(px as f64 + 0.5, py as f64 + 0.5);
            let inside = edges.iter().zip(owned).all(|(&(from, to), owns)| {
                let w = edge_side(from, to, p);
                w > 0.0 || (w == 0.0 && owns)
            });
            if !inside {
                continue;
            }

            let s = inverse.apply(p);
            let color = sample_bilinear(src, s.x - 0.5, s.y - 0.5);
            composite_over(dst.get_pixel_mut(px, py), color);
        }
    }
    true
}

#[inline]
fn cross(u: Point, v: Point) -> f64 {
    u.x * v.y - u.y * v.x
}

/// Which side of the directed edge `from → to` the point `p` lies on
///
/// Always evaluated from the lexicographically smaller endpoint, so walking
/// the same edge the other way gives exactly the negated value.
#[inline]
fn edge_side(from: Point, to: Point, p: Point) -> f64 {
    if (from.x, from.y) <= (to.x, to.y) {
        cross(to - from, p - from)
    } else {
        -cross(from - to, p - to)
    }
}

/// Top-left fill rule: pixel centres exactly on an edge go to the triangle
/// that walks it upward, or rightward when it is horizontal
///
/// `d` and `-d` never both qualify, so of two triangles sharing an edge only
/// one owns it.
#[inline]
fn owns_edge(d: Point) -> bool {
    d.y < 0.0 || (d.y == 0.0 && d.x > 0.0)
}

/// Bilinear sample at pixel coordinates, clamped to the image
///
/// Interpolates with premultiplied alpha so transparent texels do not pull
/// colour towards black.
#[inline]
pub fn sample_bilinear(src: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (width, height) = src.dimensions();
    let x = x.max(0.0).min((width - 1) as f64);
    let y = y.max(0.0).min((height - 1) as f64);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    blend_premultiplied([
        (src.get_pixel(x0, y0).0.as_slice(), (1.0 - fx) * (1.0 - fy)),
        (src.get_pixel(x1, y0).0.as_slice(), fx * (1.0 - fy)),
        (src.get_pixel(x0, y1).0.as_slice(), (1.0 - fx) * fy),
        (src.get_pixel(x1, y1).0.as_slice(), fx * fy),
    ])
}

/// Weighted sum of RGBA texels in premultiplied space, returned straight
pub fn blend_premultiplied<const N: usize>(taps: [(&[u8], f64); N]) -> Rgba<u8> {
    let mut alpha = 0.0;
    let mut rgb = [0.0f64; 3];
    for (px, weight) in taps {
        let a = px[3] as f64 * weight;
        alpha += a;
        for c in 0..3 {
            rgb[c] += px[c] as f64 * a;
        }
    }
    if alpha <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut result = [0u8; 4];
    for c in 0..3 {
        result[c] = (rgb[c] / alpha).round().clamp(0.0, 255.0) as u8;
    }
    result[3] = alpha.round().clamp(0.0, 255.0) as u8;
    Rgba(result)
}

/// Source-over compositing with straight (non-premultiplied) alpha
#[inline]
pub fn composite_over(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = src[3] as f64 / 255.0;
    if sa <= 0.0 {
        return;
    }
    if sa >= 1.0 {
        *dst = src;
        return;
    }
    let da = dst[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let v = (src[c] as f64 * sa + dst[c] as f64 * da * (1.0 - sa)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
