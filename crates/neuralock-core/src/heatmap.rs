//! Dense intensity heatmap over the face region.
//!
//! Dot intensities (scaled to `[0, 1]`) are interpolated over a Delaunay
//! triangulation of the dot centroids, evaluated on the region's integer
//! pixel grid in frame coordinates. Cells outside the dot hull get the
//! median of the defined cells.

use crate::colormap::Colormap;
use crate::filter::{blur_rgb, saturate};
use crate::frame::{unit_luma, Frame};
use crate::mask::vignette_rgb;
use crate::triangulation::Triangulation;
use crate::types::{DotSet, FaceRegion};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Barycentric tolerance for cells on a triangle edge.
const EDGE_TOLERANCE: f64 = 1e-9;

const RENDER_VIGNETTE_X: f32 = 0.85;
const RENDER_VIGNETTE_Y: f32 = 0.95;
const RENDER_BLUR_KERNEL: u32 = 45;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Piecewise-linear over each triangle.
    #[default]
    Linear,
    /// Cubic Bézier patch per triangle from estimated vertex gradients.
    Cubic,
}

/// Dense per-pixel map, `rows × cols` = region `height × width`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatMap {
    values: Array2<f32>,
    /// Cells that lay outside the dot hull and were filled.
    filled: usize,
}

impl HeatMap {
    /// Wrap values as-is, without gap filling.
    pub fn from_raw(values: Array2<f32>) -> Self {
        Self { values, filled: 0 }
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn into_values(self) -> Array2<f32> {
        self.values
    }

    /// `(rows, cols)`.
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn filled_cells(&self) -> usize {
        self.filled
    }

    pub fn has_nan(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    /// Non-empty with every cell finite.
    pub fn is_finite(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite())
    }

    /// Luma of [`render`](Self::render) scaled to `[0, 1]`.
    ///
    /// Lives in the same space as a pseudo-depth reference.
    pub fn rendered_luma(&self) -> Array2<f32> {
        unit_luma(&Frame::Color(self.render()).to_gray())
    }

    /// Visualization: stretched to 0–255, jet-colored, vignetted, blurred.
    pub fn render(&self) -> RgbImage {
        let (rows, cols) = self.dim();
        let finite = self.values.iter().copied().filter(|v| v.is_finite());
        let (lo, hi) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let scale = if hi > lo { 255.0 / (hi - lo) } else { 0.0 };
        let gray: GrayImage = ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            let v = self.values[[y as usize, x as usize]];
            Luma([if v.is_finite() { saturate((v - lo) * scale) } else { 0 }])
        });
        let colored = Colormap::Jet.apply(&gray);
        let vignetted = vignette_rgb(&colored, RENDER_VIGNETTE_X, RENDER_VIGNETTE_Y, 0.0);
        blur_rgb(&vignetted, RENDER_BLUR_KERNEL, 0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeatmapBuilder {
    interpolation: Interpolation,
}

impl HeatmapBuilder {
    pub fn new(interpolation: Interpolation) -> Self {
        Self { interpolation }
    }

    /// Interpolate `dots` over `region`, which must already be clamped to the frame.
    pub fn build(&self, dots: &DotSet, region: &FaceRegion) -> HeatMap {
        let rows = region.height.max(0) as usize;
        let cols = region.width.max(0) as usize;
        let mut values = Array2::from_elem((rows, cols), f32::NAN);

        let mut seen = HashSet::new();
        let mut points = Vec::with_capacity(dots.len());
        let mut samples = Vec::with_capacity(dots.len());
        for p in dots.iter() {
            if seen.insert((p.x.to_bits(), p.y.to_bits())) {
                points.push((p.x as f64, p.y as f64));
                samples.push(p.intensity as f64 / 255.0);
            }
        }

        let tri = Triangulation::new(points);
        let origin = (region.x as f64, region.y as f64);
        match self.interpolation {
            Interpolation::Linear => fill_linear(&tri, &samples, origin, &mut values),
            Interpolation::Cubic => fill_cubic(&tri, &samples, origin, &mut values),
        }

        let filled = fill_nan_with_median(&mut values);
        tracing::debug!(
            rows,
            cols,
            dots = samples.len(),
            triangles = tri.triangles().len(),
            filled,
            interpolation = ?self.interpolation,
            "heatmap built"
        );
        HeatMap { values, filled }
    }
}

/// Visit every grid cell covered by a triangle with its barycentric weights.
fn for_each_cell(
    tri: &Triangulation,
    t: &[usize; 3],
    origin: (f64, f64),
    dim: (usize, usize),
    mut visit: impl FnMut(usize, usize, (f64, f64, f64)),
) {
    let (rows, cols) = dim;
    if rows == 0 || cols == 0 {
        return;
    }
    let pts = tri.points();
    let xs = [pts[t[0]].0, pts[t[1]].0, pts[t[2]].0];
    let ys = [pts[t[0]].1, pts[t[1]].1, pts[t[2]].1];
    let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min) - origin.0;
    let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max) - origin.0;
    let min_y = ys.iter().copied().fold(f64::INFINITY, f64::min) - origin.1;
    let max_y = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max) - origin.1;
    if max_x < 0.0 || max_y < 0.0 || min_x > (cols - 1) as f64 || min_y > (rows - 1) as f64 {
        return;
    }
    let c0 = min_x.ceil().max(0.0) as usize;
    let c1 = (max_x.floor() as usize).min(cols - 1);
    let r0 = min_y.ceil().max(0.0) as usize;
    let r1 = (max_y.floor() as usize).min(rows - 1);
    for r in r0..=r1 {
        for c in c0..=c1 {
            let p = (origin.0 + c as f64, origin.1 + r as f64);
            if let Some((u, v, w)) = tri.barycentric(t, p) {
                if u >= -EDGE_TOLERANCE && v >= -EDGE_TOLERANCE && w >= -EDGE_TOLERANCE {
                    visit(r, c, (u, v, w));
                }
            }
        }
    }
}

fn fill_linear(tri: &Triangulation, samples: &[f64], origin: (f64, f64), values: &mut Array2<f32>) {
    let dim = values.dim();
    for t in tri.triangles() {
        let (f0, f1, f2) = (samples[t[0]], samples[t[1]], samples[t[2]]);
        for_each_cell(tri, t, origin, dim, |r, c, (u, v, w)| {
            values[[r, c]] = (u * f0 + v * f1 + w * f2) as f32;
        });
    }
}

/// Least-squares gradient at each vertex from its Delaunay neighbors,
/// weighted by inverse squared distance.
fn vertex_gradients(tri: &Triangulation, samples: &[f64]) -> Vec<(f64, f64)> {
    let pts = tri.points();
    tri.neighbors()
        .iter()
        .enumerate()
        .map(|(i, nbrs)| {
            let (mut sxx, mut sxy, mut syy, mut sxf, mut syf) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for &j in nbrs {
                let dx = pts[j].0 - pts[i].0;
                let dy = pts[j].1 - pts[i].1;
                let d2 = dx * dx + dy * dy;
                if d2 == 0.0 {
                    continue;
                }
                let w = 1.0 / d2;
                let df = samples[j] - samples[i];
                sxx += w * dx * dx;
                sxy += w * dx * dy;
                syy += w * dy * dy;
                sxf += w * dx * df;
                syf += w * dy * df;
            }
            let det = sxx * syy - sxy * sxy;
            if det.abs() < 1e-12 {
                return (0.0, 0.0);
            }
            ((syy * sxf - sxy * syf) / det, (sxx * syf - sxy * sxf) / det)
        })
        .collect()
}

fn fill_cubic(tri: &Triangulation, samples: &[f64], origin: (f64, f64), values: &mut Array2<f32>) {
    let dim = values.dim();
    let grads = vertex_gradients(tri, samples);
    let pts = tri.points();
    for t in tri.triangles() {
        let [i, j, k] = *t;
        let (p1, p2, p3) = (pts[i], pts[j], pts[k]);
        let (f1, f2, f3) = (samples[i], samples[j], samples[k]);
        // edge control value: f at `a` plus a third of the directional derivative toward `b`
        let ctl = |f: f64, g: (f64, f64), a: (f64, f64), b: (f64, f64)| {
            f + (g.0 * (b.0 - a.0) + g.1 * (b.1 - a.1)) / 3.0
        };
        let b210 = ctl(f1, grads[i], p1, p2);
        let b201 = ctl(f1, grads[i], p1, p3);
        let b120 = ctl(f2, grads[j], p2, p1);
        let b021 = ctl(f2, grads[j], p2, p3);
        let b102 = ctl(f3, grads[k], p3, p1);
        let b012 = ctl(f3, grads[k], p3, p2);
        let e = (b210 + b201 + b120 + b021 + b102 + b012) / 6.0;
        let v = (f1 + f2 + f3) / 3.0;
        let b111 = e + (e - v) / 2.0;

        for_each_cell(tri, t, origin, dim, |r, c, (u, v, w)| {
            let f = f1 * u * u * u
                + f2 * v * v * v
                + f3 * w * w * w
                + 3.0 * (b210 * u * u * v + b120 * u * v * v + b201 * u * u * w)
                + 3.0 * (b102 * u * w * w + b021 * v * v * w + b012 * v * w * w)
                + 6.0 * b111 * u * v * w;
            values[[r, c]] = f.clamp(0.0, 1.0) as f32;
        });
    }
}

/// Median of the non-NaN values (mean of the middle two for even counts).
pub fn nan_median(values: &Array2<f32>) -> Option<f32> {
    let mut defined: Vec<f32> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if defined.is_empty() {
        return None;
    }
    defined.sort_by(f32::total_cmp);
    let n = defined.len();
    Some(if n % 2 == 1 {
        defined[n / 2]
    } else {
        (defined[n / 2 - 1] + defined[n / 2]) / 2.0
    })
}

/// Replace NaN cells with the median of the rest (or 0). Returns how many changed.
fn fill_nan_with_median(values: &mut Array2<f32>) -> usize {
    let fill = nan_median(values).unwrap_or(0.0);
    let mut count = 0;
    for v in values.iter_mut() {
        if v.is_nan() {
            *v = fill;
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DotPoint;
    use ndarray::array;

    fn grid_dots(region: &FaceRegion, pitch: i32, intensity: impl Fn(f32, f32) -> u8) -> DotSet {
        let mut points = Vec::new();
        let mut y = region.y + pitch / 2;
        while y < region.y + region.height {
            let mut x = region.x + pitch / 2;
            while x < region.x + region.width {
                let (fx, fy) = (x as f32, y as f32);
                points.push(DotPoint { x: fx, y: fy, intensity: intensity(fx, fy) });
                x += pitch;
            }
            y += pitch;
        }
        DotSet::new(points)
    }

    #[test]
    fn test_shape_matches_region() {
        let region = FaceRegion::new(10, 20, 40, 30);
        let dots = grid_dots(&region, 10, |_, _| 100);
        let map = HeatmapBuilder::new(Interpolation::Linear).build(&dots, &region);
        assert_eq!(map.dim(), (30, 40));
        assert!(!map.has_nan());
    }

    #[test]
    fn test_uniform_dots_give_uniform_map() {
        let region = FaceRegion::new(0, 0, 100, 100);
        let dots = grid_dots(&region, 14, |_, _| 200);
        for interpolation in [Interpolation::Linear, Interpolation::Cubic] {
            let map = HeatmapBuilder::new(interpolation).build(&dots, &region);
            let expected = 200.0 / 255.0;
            assert!(map.values().iter().all(|v| (v - expected).abs() < 1e-5));
            assert!(map.filled_cells() > 0);
        }
    }

    #[test]
    fn test_linear_reproduces_plane() {
        let region = FaceRegion::new(0, 0, 60, 60);
        let dots = grid_dots(&region, 10, |x, _| (2.0 * x) as u8);
        let map = HeatmapBuilder::new(Interpolation::Linear).build(&dots, &region);
        // inside the hull (5..=55) the map is exactly 2x/255
        for x in [5usize, 17, 33, 55] {
            let v = map.values()[[30, x]];
            assert!((v - 2.0 * x as f32 / 255.0).abs() < 1e-4, "x={x} v={v}");
        }
    }

    #[test]
    fn test_cubic_reproduces_plane_and_stays_in_range() {
        let region = FaceRegion::new(0, 0, 60, 60);
        let dots = grid_dots(&region, 10, |x, y| (x + y) as u8 + 50);
        let map = HeatmapBuilder::new(Interpolation::Cubic).build(&dots, &region);
        let v = map.values()[[25, 25]];
        assert!((v - 100.0 / 255.0).abs() < 1e-3, "v={v}");
        assert!(map.values().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_grid_uses_frame_coordinates() {
        // dots only in the left half of the region: right side is filled
        let region = FaceRegion::new(100, 100, 20, 10);
        let dots = DotSet::new(vec![
            DotPoint { x: 100.0, y: 100.0, intensity: 0 },
            DotPoint { x: 110.0, y: 100.0, intensity: 255 },
            DotPoint { x: 100.0, y: 109.0, intensity: 0 },
        ]);
        let map = HeatmapBuilder::new(Interpolation::Linear).build(&dots, &region);
        assert!((map.values()[[0, 10]] - 1.0).abs() < 1e-6);
        assert!(map.values()[[0, 0]].abs() < 1e-6);
        assert!((map.values()[[0, 5]] - 0.5).abs() < 1e-6);
        assert!(!map.has_nan());
    }

    #[test]
    fn test_single_dot_is_filled_with_zero() {
        let region = FaceRegion::new(0, 0, 8, 8);
        let dots = DotSet::new(vec![DotPoint { x: 4.0, y: 4.0, intensity: 180 }]);
        let map = HeatmapBuilder::default().build(&dots, &region);
        assert!(!map.has_nan());
        assert!(map.values().iter().all(|&v| v == 0.0));
        assert_eq!(map.filled_cells(), 64);
    }

    #[test]
    fn test_duplicate_coordinates_are_ignored() {
        let region = FaceRegion::new(0, 0, 20, 20);
        let mut points = grid_dots(&region, 8, |_, _| 120).points().to_vec();
        points.push(points[0]);
        let map = HeatmapBuilder::default().build(&DotSet::new(points), &region);
        assert!(!map.has_nan());
    }

    #[test]
    fn test_nan_median() {
        let a = array![[1.0, f32::NAN], [3.0, 10.0]];
        assert_eq!(nan_median(&a), Some(3.0));
        let b = array![[1.0, 2.0], [3.0, 10.0]];
        assert_eq!(nan_median(&b), Some(2.5));
        let c = Array2::from_elem((2, 2), f32::NAN);
        assert_eq!(nan_median(&c), None);
    }

    #[test]
    fn test_rendered_luma_matches_render() {
        let region = FaceRegion::new(0, 0, 50, 40);
        let map = HeatmapBuilder::default().build(&grid_dots(&region, 10, |x, _| x as u8 * 4), &region);
        assert!(map.is_finite());
        let luma = map.rendered_luma();
        assert_eq!(luma.dim(), (40, 50));
        assert!(luma.iter().all(|v| (0.0..=1.0).contains(v)));
        let gray = Frame::Color(map.render()).to_gray();
        assert_eq!(luma[[20, 25]], gray.get_pixel(25, 20)[0] as f32 / 255.0);
        assert_ne!(&luma, map.values());
    }

    #[test]
    fn test_is_finite() {
        assert!(HeatMap::from_raw(Array2::from_elem((2, 2), 0.5)).is_finite());
        assert!(!HeatMap::from_raw(Array2::from_elem((2, 2), f32::NAN)).is_finite());
        assert!(!HeatMap::from_raw(Array2::zeros((0, 0))).is_finite());
    }

    #[test]
    fn test_render_dimensions() {
        let region = FaceRegion::new(0, 0, 50, 40);
        let dots = grid_dots(&region, 10, |x, _| x as u8 * 4);
        let img = HeatmapBuilder::default().build(&dots, &region).render();
        assert_eq!(img.dimensions(), (50, 40));
        // vignette darkens the corners relative to the center
        let sum = |p: &image::Rgb<u8>| p.0.iter().map(|&c| c as u32).sum::<u32>();
        assert!(sum(img.get_pixel(0, 0)) < sum(img.get_pixel(25, 20)));
    }
}
