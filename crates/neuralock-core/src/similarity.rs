//! Similarity scoring between the dot heatmap and a depth reference.
//!
//! The heatmap's resolution is authoritative: a reference of another size is
//! resized to it, never the other way round.

use crate::config::ScoringParams;
use crate::depth::resize_bilinear;
use crate::types::SimilarityMetric;
use ndarray::Array2;
use thiserror::Error;

const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;
/// Both maps live in `[0, 1]`.
const DATA_RANGE: f64 = 1.0;
const MIN_SSIM_WINDOW: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("{which} map is empty")]
    EmptyMap { which: &'static str },
    #[error("{which} map contains non-finite values")]
    NonFinite { which: &'static str },
    #[error("maps are {rows}x{cols}, smaller than the minimum 3x3 SSIM window")]
    TooSmall { rows: usize, cols: usize },
    #[error("shape mismatch after alignment: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("similarity score is not finite")]
    NonFiniteScore,
}

/// A computed score and the decision it implies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityOutcome {
    pub score: f32,
    pub is_live: bool,
    pub metric: SimilarityMetric,
    /// `(rows, cols)` the maps were compared at.
    pub compared_dims: (usize, usize),
}

#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    metric: SimilarityMetric,
    ssim_threshold: f32,
    mse_threshold: f32,
    max_window: usize,
}

impl SimilarityScorer {
    pub fn new(params: &ScoringParams) -> Self {
        Self {
            metric: params.metric,
            ssim_threshold: params.ssim_threshold,
            mse_threshold: params.mse_threshold,
            max_window: params.max_window,
        }
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Compare `heatmap` against `reference` and apply the metric's threshold.
    pub fn score(
        &self,
        heatmap: &Array2<f32>,
        reference: &Array2<f32>,
    ) -> Result<SimilarityOutcome, ScoringError> {
        check_map(heatmap, "heatmap")?;
        check_map(reference, "reference")?;

        let (rows, cols) = heatmap.dim();
        let aligned;
        let reference = if reference.dim() != (rows, cols) {
            tracing::debug!(from = ?reference.dim(), to = ?(rows, cols), "aligning reference to heatmap");
            aligned = resize_bilinear(reference, rows, cols);
            &aligned
        } else {
            reference
        };

        let score = match self.metric {
            SimilarityMetric::StructuralSimilarity => ssim(heatmap, reference, self.max_window)?,
            SimilarityMetric::MeanSquaredError => mse(heatmap, reference)?,
        };
        if !score.is_finite() {
            return Err(ScoringError::NonFiniteScore);
        }

        Ok(SimilarityOutcome {
            score,
            is_live: self.decide(score),
            metric: self.metric,
            compared_dims: (rows, cols),
        })
    }

    /// SSIM is live above its threshold; MSE is live below its threshold.
    pub fn decide(&self, score: f32) -> bool {
        match self.metric {
            SimilarityMetric::StructuralSimilarity => score > self.ssim_threshold,
            SimilarityMetric::MeanSquaredError => score < self.mse_threshold,
        }
    }
}

fn check_map(map: &Array2<f32>, which: &'static str) -> Result<(), ScoringError> {
    if map.is_empty() {
        return Err(ScoringError::EmptyMap { which });
    }
    if map.iter().any(|v| !v.is_finite()) {
        return Err(ScoringError::NonFinite { which });
    }
    Ok(())
}

fn check_same_shape(a: &Array2<f32>, b: &Array2<f32>) -> Result<(), ScoringError> {
    if a.dim() != b.dim() {
        return Err(ScoringError::ShapeMismatch {
            left: a.dim(),
            right: b.dim(),
        });
    }
    Ok(())
}

/// Mean squared difference.
pub fn mse(a: &Array2<f32>, b: &Array2<f32>) -> Result<f32, ScoringError> {
    check_same_shape(a, b)?;
    if a.is_empty() {
        return Err(ScoringError::EmptyMap { which: "heatmap" });
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum();
    Ok((sum / a.len() as f64) as f32)
}

/// Largest odd window no bigger than `max_window` or either dimension.
pub fn ssim_window(rows: usize, cols: usize, max_window: usize) -> Option<usize> {
    let mut win = max_window.min(rows).min(cols);
    if win % 2 == 0 {
        win = win.saturating_sub(1);
    }
    (win >= MIN_SSIM_WINDOW).then_some(win)
}

/// Summed-area table with a zero first row and column.
fn integral(rows: usize, cols: usize, value: impl Fn(usize, usize) -> f64) -> Array2<f64> {
    let mut table = Array2::<f64>::zeros((rows + 1, cols + 1));
    for r in 0..rows {
        let mut row_sum = 0.0;
        for c in 0..cols {
            row_sum += value(r, c);
            table[[r + 1, c + 1]] = table[[r, c + 1]] + row_sum;
        }
    }
    table
}

fn window_sum(table: &Array2<f64>, r: usize, c: usize, win: usize) -> f64 {
    table[[r + win, c + win]] - table[[r, c + win]] - table[[r + win, c]] + table[[r, c]]
}

/// Mean structural similarity over every fully-contained uniform window,
/// with sample covariance and a data range of 1.
pub fn ssim(a: &Array2<f32>, b: &Array2<f32>, max_window: usize) -> Result<f32, ScoringError> {
    check_same_shape(a, b)?;
    let (rows, cols) = a.dim();
    let win = ssim_window(rows, cols, max_window).ok_or(ScoringError::TooSmall { rows, cols })?;

    let x = |r: usize, c: usize| a[[r, c]] as f64;
    let y = |r: usize, c: usize| b[[r, c]] as f64;
    let sx = integral(rows, cols, x);
    let sy = integral(rows, cols, y);
    let sxx = integral(rows, cols, |r, c| x(r, c) * x(r, c));
    let syy = integral(rows, cols, |r, c| y(r, c) * y(r, c));
    let sxy = integral(rows, cols, |r, c| x(r, c) * y(r, c));

    let np = (win * win) as f64;
    let cov_norm = np / (np - 1.0);
    let c1 = (SSIM_K1 * DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * DATA_RANGE).powi(2);

    let mut total = 0.0;
    let mut count = 0usize;
    for r in 0..=rows - win {
        for c in 0..=cols - win {
            let ux = window_sum(&sx, r, c, win) / np;
            let uy = window_sum(&sy, r, c, win) / np;
            let uxx = window_sum(&sxx, r, c, win) / np;
            let uyy = window_sum(&syy, r, c, win) / np;
            let uxy = window_sum(&sxy, r, c, win) / np;
            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let num = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let den = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += num / den;
            count += 1;
        }
    }
    Ok((total / count as f64) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer(metric: SimilarityMetric) -> SimilarityScorer {
        SimilarityScorer::new(&ScoringParams {
            metric,
            ..ScoringParams::default()
        })
    }

    fn pattern(rows: usize, cols: usize) -> Array2<f32> {
        Array2::from_shape_fn((rows, cols), |(r, c)| ((r * 7 + c * 13) % 17) as f32 / 16.0)
    }

    #[test]
    fn test_window_selection() {
        assert_eq!(ssim_window(100, 100, 7), Some(7));
        assert_eq!(ssim_window(6, 100, 7), Some(5));
        assert_eq!(ssim_window(100, 3, 7), Some(3));
        assert_eq!(ssim_window(2, 100, 7), None);
        assert_eq!(ssim_window(4, 4, 7), Some(3));
    }

    #[test]
    fn test_identical_maps_score_one() {
        let a = pattern(20, 30);
        let s = ssim(&a, &a, 7).unwrap();
        assert!((s - 1.0).abs() < 1e-6);
        assert_eq!(mse(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_uniform_near_equal_maps() {
        let a = Array2::from_elem((100, 100), 200.0f32 / 255.0);
        let b = Array2::from_elem((100, 100), 0.78f32);
        assert!(ssim(&a, &b, 7).unwrap() > 0.9);
    }

    #[test]
    fn test_inverted_pattern_scores_low() {
        let a = pattern(40, 40);
        let b = a.mapv(|v| 1.0 - v);
        assert!(ssim(&a, &b, 7).unwrap() < 0.0);
        assert!(mse(&a, &b).unwrap() > 0.1);
    }

    #[test]
    fn test_reference_is_resized_to_heatmap() {
        let heat = Array2::from_elem((100, 100), 0.5f32);
        let reference = Array2::from_elem((80, 80), 0.5f32);
        let out = scorer(SimilarityMetric::StructuralSimilarity).score(&heat, &reference).unwrap();
        assert_eq!(out.compared_dims, (100, 100));
        assert!(out.is_live);

        // the heatmap is never resized: a smaller heatmap sets the size
        let out = scorer(SimilarityMetric::MeanSquaredError).score(&reference, &heat).unwrap();
        assert_eq!(out.compared_dims, (80, 80));
    }

    #[test]
    fn test_opposite_monotonicity() {
        let ssim_scorer = scorer(SimilarityMetric::StructuralSimilarity);
        assert!(ssim_scorer.decide(0.31));
        assert!(!ssim_scorer.decide(0.3));
        let mse_scorer = scorer(SimilarityMetric::MeanSquaredError);
        assert!(mse_scorer.decide(0.049));
        assert!(!mse_scorer.decide(0.05));
        assert!(!mse_scorer.decide(0.31));
    }

    #[test]
    fn test_nan_map_is_error() {
        let heat = Array2::from_elem((10, 10), f32::NAN);
        let reference = Array2::from_elem((10, 10), 0.5f32);
        let err = scorer(SimilarityMetric::StructuralSimilarity)
            .score(&heat, &reference)
            .unwrap_err();
        assert_eq!(err, ScoringError::NonFinite { which: "heatmap" });
    }

    #[test]
    fn test_tiny_maps_are_error() {
        let a = Array2::from_elem((2, 50), 0.5f32);
        let err = scorer(SimilarityMetric::StructuralSimilarity).score(&a, &a).unwrap_err();
        assert_eq!(err, ScoringError::TooSmall { rows: 2, cols: 50 });
        // MSE has no window and still works
        assert!(scorer(SimilarityMetric::MeanSquaredError).score(&a, &a).is_ok());
    }

    #[test]
    fn test_empty_map_is_error() {
        let a = Array2::<f32>::zeros((0, 0));
        let b = Array2::from_elem((5, 5), 0.5f32);
        assert!(matches!(
            scorer(SimilarityMetric::MeanSquaredError).score(&a, &b),
            Err(ScoringError::EmptyMap { which: "heatmap" })
        ));
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let a = Array2::from_elem((5, 5), 0.5f32);
        let b = Array2::from_elem((5, 6), 0.5f32);
        assert!(matches!(mse(&a, &b), Err(ScoringError::ShapeMismatch { .. })));
        assert!(matches!(ssim(&a, &b, 7), Err(ScoringError::ShapeMismatch { .. })));
    }
}
