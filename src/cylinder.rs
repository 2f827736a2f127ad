//! Cylindrical de-warp (horizontal axis only)
//!
//! The output column is treated as an arc-length position on a cylinder of
//! radius `R`, and the source is sampled at the matching chord position. Rows
//! are never distorted, so the column map is computed once and applied to
//! every row.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use std::borrow::Cow;

use crate::scale::curvature_radius;
use crate::transform::blend_premultiplied;

/// Source sample for one output column: left neighbour and blend weight
type ColumnSample = Option<(usize, f64)>;

/// Source x (pixels) sampled for output column `x_out`
///
/// Arc-length `s = (x_out − cx)/ppi`, chord `u = R·sin(s/R)`.
pub fn inverse_cylindrical_x(x_out: f64, width_px: u32, width_in: f64, radius_in: f64) -> f64 {
    if !radius_in.is_finite() {
        return x_out;
    }
    let cx = width_px as f64 / 2.0;
    let ppi = width_px as f64 / width_in;
    let s = (x_out - cx) / ppi;
    let u = radius_in * (s / radius_in).sin();
    cx + u * ppi
}

/// Where source column `x_src` lands after the de-warp
///
/// The arcsine argument is clamped to `[-1, 1]`: beyond the chord the result
/// is pinned to the quarter-arc instead of faulting.
pub fn forward_cylindrical_x(x_src: f64, width_px: u32, width_in: f64, curve_in: f64) -> f64 {
    let r = curvature_radius(width_in, curve_in);
    if !r.is_finite() {
        return x_src;
    }
    let cx = width_px as f64 / 2.0;
    let ppi = width_px as f64 / width_in;
    let u = (x_src - cx) / ppi;
    let s = r * (u / r).clamp(-1.0, 1.0).asin();
    cx + s * ppi
}

fn column_map(width_px: u32, width_in: f64, radius_in: f64) -> Vec<ColumnSample> {
    let w = width_px as i64;
    (0..width_px)
        .map(|x_out| {
            let x_src = inverse_cylindrical_x(x_out as f64, width_px, width_in, radius_in);
            let xs = x_src.floor();
            let xt = xs as i64 + 1;
            if !xs.is_finite() || xs < 0.0 || xt >= w {
                None
            } else {
                Some((xs as usize, x_src - xs))
            }
        })
        .collect()
}

/// Pre-warp `src` for a cylinder `curve_in` deep across `width_in`
///
/// A flat surface (`curve_in <= 0` or non-finite) borrows the source as-is.
/// Otherwise the result has exactly the source dimensions; columns whose
/// sample falls outside the source are fully transparent.
pub fn warp_cylindrical(src: &RgbaImage, width_in: f64, curve_in: f64) -> Cow<'_, RgbaImage> {
    let radius = curvature_radius(width_in, curve_in);
    let (w, h) = src.dimensions();
    if !radius.is_finite() || w == 0 || h == 0 {
        return Cow::Borrowed(src);
    }

    let columns = column_map(w, width_in, radius);
    let row_len = w as usize * 4;
    let src_raw = src.as_raw();

    let mut out = RgbaImage::new(w, h);
    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let src_row = &src_raw[y * row_len..(y + 1) * row_len];
            for (x_out, sample) in columns.iter().enumerate() {
                let px = match *sample {
                    Some((xs, t)) => lerp_pixel(src_row, xs, t),
                    None => Rgba([0, 0, 0, 0]),
                };
                row[x_out * 4..x_out * 4 + 4].copy_from_slice(&px.0);
            }
        });

    Cow::Owned(out)
}

#[inline]
fn lerp_pixel(row: &[u8], xs: usize, t: f64) -> Rgba<u8> {
    blend_premultiplied([
        (&row[xs * 4..xs * 4 + 4], 1.0 - t),
        (&row[(xs + 1) * 4..(xs + 1) * 4 + 4], t),
    ])
}
