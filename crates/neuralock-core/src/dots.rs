//! Structured-light dot extraction.
//!
//! The capture is inverted, contrast-equalized with CLAHE, binarized with a
//! Gaussian adaptive threshold, cleaned with a morphological opening and
//! passed through the blob detector. Dots whose centroid lies strictly
//! inside the face region are kept, with intensity sampled from the
//! unenhanced grayscale.

use crate::blob::{Blob, BlobDetector};
use crate::config::{ClaheParams, LivenessConfig, MorphologyParams, SignalParams, ThresholdParams};
use crate::filter::{adaptive_threshold_inv, morphological_open};
use crate::frame::{clahe, invert, Frame};
use crate::types::{Confidence, DotPoint, DotSet, FaceRegion, PatternSignal};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Minimum neighbors within the radius for a dot to count as dense.
const DENSE_MIN_NEIGHBORS: usize = 2;

/// Which grayscale rendering dot intensities are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensitySource {
    /// The capture as delivered.
    #[default]
    Raw,
    /// `255 - raw`.
    Inverted,
}

/// Intermediate images of one extraction, for inspection.
#[derive(Debug, Clone)]
pub struct DotStages {
    pub gray: GrayImage,
    pub inverted: GrayImage,
    pub enhanced: GrayImage,
    pub binary: GrayImage,
    pub opened: GrayImage,
    /// Every blob found in the frame, before the face-region filter.
    pub blobs: Vec<Blob>,
    pub dots: DotSet,
}

#[derive(Debug, Clone)]
pub struct DotExtractor {
    clahe: ClaheParams,
    threshold: ThresholdParams,
    morphology: MorphologyParams,
    intensity_source: IntensitySource,
    detector: BlobDetector,
}

impl DotExtractor {
    pub fn new(config: &LivenessConfig) -> Self {
        Self {
            clahe: config.clahe.clone(),
            threshold: config.threshold.clone(),
            morphology: config.morphology.clone(),
            intensity_source: config.signal.intensity_source,
            detector: BlobDetector::new(config.blob.clone()),
        }
    }

    /// Dots strictly inside `region`, in detection order.
    pub fn extract(&self, frame: &Frame, region: &FaceRegion) -> DotSet {
        self.extract_with_stages(frame, region).dots
    }

    /// Like [`extract`](Self::extract), keeping every intermediate image.
    pub fn extract_with_stages(&self, frame: &Frame, region: &FaceRegion) -> DotStages {
        let gray = frame.to_gray();
        let inverted = invert(&gray);
        let enhanced = clahe(&inverted, &self.clahe);
        let binary =
            adaptive_threshold_inv(&enhanced, self.threshold.block_size, self.threshold.c);
        let opened = morphological_open(
            &binary,
            self.morphology.kernel_size,
            self.morphology.iterations,
        );
        let blobs = self.detector.detect(&opened);

        let source = match self.intensity_source {
            IntensitySource::Raw => &gray,
            IntensitySource::Inverted => &inverted,
        };
        let points: Vec<DotPoint> = blobs
            .iter()
            .filter(|b| region.contains_strictly(b.x, b.y))
            .map(|b| DotPoint {
                x: b.x,
                y: b.y,
                intensity: sample(source, b.x, b.y),
            })
            .collect();

        tracing::debug!(
            blobs = blobs.len(),
            in_face = points.len(),
            region = %region,
            "dot extraction"
        );

        DotStages {
            gray,
            inverted,
            enhanced,
            binary,
            opened,
            blobs,
            dots: DotSet::new(points),
        }
    }
}

/// Pixel at the truncated, clamped coordinate.
fn sample(image: &GrayImage, x: f32, y: f32) -> u8 {
    let max_x = image.width().saturating_sub(1) as f32;
    let max_y = image.height().saturating_sub(1) as f32;
    let px = x.clamp(0.0, max_x) as u32;
    let py = y.clamp(0.0, max_y) as u32;
    image.get_pixel(px, py)[0]
}

/// Local density of a dot set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NeighborStatistics {
    /// Dots with at least two neighbors inside the radius.
    pub dense_dots: usize,
    /// Mean distance from dense dots to their neighbors.
    pub mean_distance: f32,
    /// Population standard deviation of those distances.
    pub std_distance: f32,
}

impl DotSet {
    /// Neighbor analysis within `radius` pixels.
    pub fn neighbor_statistics(&self, radius: f32) -> NeighborStatistics {
        let points = self.points();
        let mut dense_dots = 0;
        let mut distances: Vec<f32> = Vec::new();
        for (i, p) in points.iter().enumerate() {
            let near: Vec<f32> = points
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, q)| (q.x - p.x).hypot(q.y - p.y))
                .filter(|&d| d < radius)
                .collect();
            if near.len() >= DENSE_MIN_NEIGHBORS {
                dense_dots += 1;
                distances.extend(near);
            }
        }
        if distances.is_empty() {
            return NeighborStatistics::default();
        }
        let n = distances.len() as f32;
        let mean = distances.iter().sum::<f32>() / n;
        let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / n;
        NeighborStatistics {
            dense_dots,
            mean_distance: mean,
            std_distance: variance.sqrt(),
        }
    }
}

/// Whether a dot set carries enough signal to trust a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalAssessment {
    pub dot_count: usize,
    pub neighbors: NeighborStatistics,
    pub dark_frame: bool,
    pub confidence: Confidence,
    pub pattern: PatternSignal,
}

impl SignalAssessment {
    pub fn assess(dots: &DotSet, params: &SignalParams, dark_frame: bool) -> Self {
        let neighbors = dots.neighbor_statistics(params.neighbor_radius);
        let enough = dots.len() >= params.min_dots || neighbors.dense_dots >= params.min_dense_dots;
        let confidence = if enough && !dark_frame {
            Confidence::Normal
        } else {
            Confidence::Low
        };
        let pattern = pattern_signal(&neighbors, params);
        Self {
            dot_count: dots.len(),
            neighbors,
            dark_frame,
            confidence,
            pattern,
        }
    }
}

/// Needs at least half of `min_dots` dense dots to judge spacing.
fn pattern_signal(neighbors: &NeighborStatistics, params: &SignalParams) -> PatternSignal {
    if neighbors.dense_dots == 0 || neighbors.dense_dots < params.min_dots / 2 {
        PatternSignal::Insufficient
    } else if neighbors.std_distance > params.std_dev_threshold {
        PatternSignal::Distorted
    } else {
        PatternSignal::Regular
    }
}
