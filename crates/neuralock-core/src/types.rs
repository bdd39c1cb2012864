use serde::{Deserialize, Serialize};
use std::fmt;

/// Score reported when similarity could not be computed.
pub const SCORE_SENTINEL: f32 = -1.0;

/// Axis-aligned face bounding box in frame pixel coordinates.
///
/// Detector output may be stale or partially off-frame, so the origin is
/// signed; [`clamp_to`](Self::clamp_to) produces the in-bounds region the
/// pipeline actually works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl FaceRegion {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Build a region from a floating-point detector box, rounding to pixels.
    pub fn from_bounding_box(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x: x.round() as i32,
            y: y.round() as i32,
            width: width.round() as i32,
            height: height.round() as i32,
        }
    }

    pub fn area(&self) -> i64 {
        if self.width <= 0 || self.height <= 0 {
            return 0;
        }
        self.width as i64 * self.height as i64
    }

    /// Intersect with a `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of positive extent remains.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<FaceRegion> {
        if self.width <= 0 || self.height <= 0 {
            return None;
        }
        let x0 = (self.x as i64).max(0);
        let y0 = (self.y as i64).max(0);
        let x1 = (self.x as i64 + self.width as i64).min(frame_width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(frame_height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(FaceRegion {
            x: x0 as i32,
            y: y0 as i32,
            width: (x1 - x0) as i32,
            height: (y1 - y0) as i32,
        })
    }

    /// True when `(x, y)` lies strictly inside the box (edges excluded).
    pub fn contains_strictly(&self, x: f32, y: f32) -> bool {
        let (x, y) = (x as f64, y as f64);
        x > self.x as f64
            && x < (self.x as i64 + self.width as i64) as f64
            && y > self.y as f64
            && y < (self.y as i64 + self.height as i64) as f64
    }
}

impl fmt::Display for FaceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// A structured-light reflection dot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DotPoint {
    /// Blob centroid, frame coordinates.
    pub x: f32,
    pub y: f32,
    /// Grayscale intensity sampled at the centroid.
    pub intensity: u8,
}

/// Dots detected for one capture, in detection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DotSet {
    points: Vec<DotPoint>,
}

impl DotSet {
    pub fn new(points: Vec<DotPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[DotPoint] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &DotPoint> {
        self.points.iter()
    }
}

/// Comparison metric. The two have opposite monotonicity: higher SSIM is
/// more similar, lower MSE is more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityMetric {
    #[serde(rename = "ssim", alias = "structural_similarity")]
    StructuralSimilarity,
    #[serde(rename = "mse", alias = "mean_squared_error")]
    MeanSquaredError,
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityMetric::StructuralSimilarity => f.write_str("ssim"),
            SimilarityMetric::MeanSquaredError => f.write_str("mse"),
        }
    }
}

/// How much the dot signal behind a verdict can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Normal,
    /// Too few dots (or a dark capture); the score is still reported.
    Low,
}

/// Spacing regularity of the dot pattern.
///
/// A flat surface reflects the projected pattern with near-constant
/// neighbor spacing; facial relief spreads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSignal {
    /// Too few dots with neighbors to judge.
    Insufficient,
    /// Spacing spread at or below the threshold.
    Regular,
    /// Spacing spread above the threshold.
    Distorted,
}

impl PatternSignal {
    pub fn suggests_live(&self) -> bool {
        *self == PatternSignal::Distorted
    }
}

/// Producer of the depth-like map the dot heatmap is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    /// Blur/mask synthesis from the face crop.
    PseudoDepth,
    /// External monocular depth model restricted to the face.
    MonocularModel,
}

/// Outcome of one liveness evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessVerdict {
    pub is_live: bool,
    /// Similarity score, or [`SCORE_SENTINEL`] when scoring failed.
    pub score: f32,
    pub metric: SimilarityMetric,
    pub confidence: Confidence,
    /// Dots retained inside the face region.
    pub dot_count: usize,
    /// Reference actually used (may differ from the configured one on fallback).
    pub reference: ReferenceSource,
    /// `(rows, cols)` at which the two maps were compared.
    pub compared_dims: Option<(usize, usize)>,
    /// Advisory dot-spacing signal; does not affect `is_live`.
    pub pattern: PatternSignal,
    /// Why scoring failed, when it did.
    pub failure: Option<String>,
}

impl LivenessVerdict {
    /// Fail-closed verdict carrying the sentinel score.
    pub fn rejected(
        metric: SimilarityMetric,
        reference: ReferenceSource,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            is_live: false,
            score: SCORE_SENTINEL,
            metric,
            confidence: Confidence::Low,
            dot_count: 0,
            reference,
            compared_dims: None,
            pattern: PatternSignal::Insufficient,
            failure: Some(reason.into()),
        }
    }

    pub fn is_low_confidence(&self) -> bool {
        self.confidence == Confidence::Low
    }

    /// Live and backed by a normal-confidence dot signal.
    pub fn is_trusted(&self) -> bool {
        self.is_live && self.confidence == Confidence::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside_is_identity() {
        let r = FaceRegion::new(10, 20, 30, 40);
        assert_eq!(r.clamp_to(100, 100), Some(r));
    }

    #[test]
    fn test_clamp_partially_outside() {
        let r = FaceRegion::new(-10, 90, 50, 50);
        assert_eq!(r.clamp_to(100, 120), Some(FaceRegion::new(0, 90, 40, 30)));
    }

    #[test]
    fn test_clamp_wholly_outside() {
        let r = FaceRegion::new(200, 200, 50, 50);
        assert_eq!(r.clamp_to(100, 100), None);
    }

    #[test]
    fn test_clamp_zero_width() {
        let r = FaceRegion::new(10, 10, 0, 50);
        assert_eq!(r.clamp_to(100, 100), None);
        assert_eq!(r.area(), 0);
    }

    #[test]
    fn test_contains_strictly_excludes_edges() {
        let r = FaceRegion::new(10, 10, 20, 20);
        assert!(r.contains_strictly(15.0, 15.0));
        assert!(!r.contains_strictly(10.0, 15.0));
        assert!(!r.contains_strictly(15.0, 30.0));
        assert!(r.contains_strictly(29.9, 10.1));
    }

    #[test]
    fn test_contains_strictly_near_i32_limits() {
        let r = FaceRegion::new(i32::MAX - 10, i32::MAX - 10, 100, 100);
        assert!(r.contains_strictly((i32::MAX - 5) as f32, (i32::MAX - 5) as f32));
        assert!(!r.contains_strictly(0.0, 0.0));

        let r = FaceRegion::new(i32::MIN, 0, i32::MAX, 10);
        assert!(r.contains_strictly(-100.0, 5.0));
        assert!(!r.contains_strictly(-1.0, 5.0));
    }

    #[test]
    fn test_from_bounding_box_rounds() {
        let r = FaceRegion::from_bounding_box(10.4, 9.6, 99.5, 100.2);
        assert_eq!(r, FaceRegion::new(10, 10, 100, 100));
    }

    #[test]
    fn test_rejected_verdict_is_fail_closed() {
        let v = LivenessVerdict::rejected(
            SimilarityMetric::StructuralSimilarity,
            ReferenceSource::PseudoDepth,
            "nan in heatmap",
        );
        assert!(!v.is_live);
        assert_eq!(v.score, SCORE_SENTINEL);
        assert!(!v.is_trusted());
        assert!(v.failure.is_some());
        assert_eq!(v.pattern, PatternSignal::Insufficient);
    }

    #[test]
    fn test_metric_serde_names() {
        let m: SimilarityMetric = toml::from_str::<std::collections::HashMap<String, SimilarityMetric>>(
            "metric = \"mse\"",
        )
        .unwrap()["metric"];
        assert_eq!(m, SimilarityMetric::MeanSquaredError);
        assert_eq!(SimilarityMetric::StructuralSimilarity.to_string(), "ssim");
    }
}
