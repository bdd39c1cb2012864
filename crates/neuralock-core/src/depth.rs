//! Depth references and the capabilities the pipeline consumes.
//!
//! Face detection and monocular depth estimation are external models; the
//! pipeline only needs the [`FaceDetector`] and [`DepthModel`] contracts.
//! Implementations must be shareable across threads and synchronize any
//! internal state themselves.

use crate::colormap::Colormap;
use crate::filter::saturate;
use crate::frame::Frame;
use crate::types::{FaceRegion, ReferenceSource};
use image::{ImageBuffer, Luma, RgbImage};
use ndarray::{s, Array2};
use thiserror::Error;

const RENDER_LOW_PERCENTILE: f32 = 5.0;
const RENDER_HIGH_PERCENTILE: f32 = 95.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face detector failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum DepthModelError {
    #[error("depth inference failed: {0}")]
    Inference(String),
    #[error("depth model returned an empty map")]
    EmptyOutput,
    #[error("depth map contains non-finite values")]
    NonFinite,
    #[error("face region {0} does not overlap the depth map")]
    DegenerateRegion(FaceRegion),
}

/// Locates faces in a frame. Zero detections is an empty list, not an error.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Monocular relative-depth estimator.
pub trait DepthModel: Send + Sync {
    /// Dense map, ideally `frame.height() × frame.width()`. Larger values are
    /// nearer or farther depending on the model; only relative structure matters.
    fn estimate(&self, frame: &Frame) -> Result<Array2<f32>, DepthModelError>;

    fn name(&self) -> &str {
        "depth-model"
    }
}

/// A depth-like map compared against the dot heatmap.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthEstimate {
    pub map: Array2<f32>,
    pub source: ReferenceSource,
}

impl DepthEstimate {
    pub fn new(map: Array2<f32>, source: ReferenceSource) -> Self {
        Self { map, source }
    }

    /// `(rows, cols)`.
    pub fn dim(&self) -> (usize, usize) {
        self.map.dim()
    }

    /// Visualization: clipped to the 5th–95th percentile, inferno-colored.
    pub fn render(&self) -> RgbImage {
        let (rows, cols) = self.dim();
        let mut finite: Vec<f32> = self.map.iter().copied().filter(|v| v.is_finite()).collect();
        finite.sort_by(f32::total_cmp);
        let lo = percentile(&finite, RENDER_LOW_PERCENTILE).unwrap_or(0.0);
        let hi = percentile(&finite, RENDER_HIGH_PERCENTILE).unwrap_or(0.0);
        let scale = if hi > lo { 255.0 / (hi - lo) } else { 0.0 };
        let gray = ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            let v = self.map[[y as usize, x as usize]];
            Luma([if v.is_finite() { saturate((v.clamp(lo, hi) - lo) * scale) } else { 0 }])
        });
        Colormap::Inferno.apply(&gray)
    }
}

/// Linear-interpolated percentile of sorted data.
fn percentile(sorted: &[f32], pct: f32) -> Option<f32> {
    if sorted.is_empty() {
        return None;
    }
    let pos = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let i = pos.floor() as usize;
    let j = (i + 1).min(sorted.len() - 1);
    let t = pos - i as f32;
    Some(sorted[i] + (sorted[j] - sorted[i]) * t)
}

/// Run `model` over the whole frame and return the face crop scaled to `[0, 1]`.
///
/// Output of a different resolution than the frame is resized back to it
/// first. A constant crop normalizes to zeros.
pub fn estimate_face_depth(
    model: &dyn DepthModel,
    frame: &Frame,
    region: &FaceRegion,
) -> Result<DepthEstimate, DepthModelError> {
    let (rows, cols) = (frame.height() as usize, frame.width() as usize);
    let mut map = model.estimate(frame)?;
    if map.is_empty() {
        return Err(DepthModelError::EmptyOutput);
    }
    if map.dim() != (rows, cols) {
        tracing::debug!(
            model = model.name(),
            from = ?map.dim(),
            to = ?(rows, cols),
            "resizing depth map to frame"
        );
        map = resize_bilinear(&map, rows, cols);
    }

    let clamped = region
        .clamp_to(cols as u32, rows as u32)
        .ok_or(DepthModelError::DegenerateRegion(*region))?;
    let (x, y) = (clamped.x as usize, clamped.y as usize);
    let (w, h) = (clamped.width as usize, clamped.height as usize);
    let crop = map.slice(s![y..y + h, x..x + w]).to_owned();

    if crop.iter().any(|v| !v.is_finite()) {
        return Err(DepthModelError::NonFinite);
    }
    Ok(DepthEstimate::new(
        normalize_unit(&crop),
        ReferenceSource::MonocularModel,
    ))
}

/// Min-max scale to `[0, 1]`; a constant map becomes zeros.
pub fn normalize_unit(map: &Array2<f32>) -> Array2<f32> {
    let (lo, hi) = map
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    if range.is_nan() || range <= 0.0 {
        return Array2::zeros(map.dim());
    }
    map.mapv(|v| (v - lo) / range)
}

/// Bilinear resize of a float map to `rows × cols`, half-pixel centers.
pub fn resize_bilinear(src: &Array2<f32>, rows: usize, cols: usize) -> Array2<f32> {
    let (src_rows, src_cols) = src.dim();
    if src_rows == 0 || src_cols == 0 || rows == 0 || cols == 0 {
        return Array2::zeros((rows, cols));
    }
    let scale_y = src_rows as f32 / rows as f32;
    let scale_x = src_cols as f32 / cols as f32;
    let mut out = Array2::zeros((rows, cols));
    for y in 0..rows {
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let y0 = (src_y.floor() as usize).min(src_rows - 1);
        let y1 = (y0 + 1).min(src_rows - 1);
        let fy = (src_y - y0 as f32).clamp(0.0, 1.0);

        for x in 0..cols {
            let src_x = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
            let x0 = (src_x.floor() as usize).min(src_cols - 1);
            let x1 = (x0 + 1).min(src_cols - 1);
            let fx = (src_x - x0 as f32).clamp(0.0, 1.0);

            let tl = src[[y0, x0]];
            let tr = src[[y0, x1]];
            let bl = src[[y1, x0]];
            let br = src[[y1, x1]];

            out[[y, x]] = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;
        }
    }
    out
}
