//! neuralock-core: structured-light liveness verification.
//!
//! Extracts IR reflection dots from a face capture, interpolates their
//! intensities into a dense heatmap and compares it with a depth reference
//! (a pseudo-depth synthesis of the face crop or a monocular depth model)
//! to decide whether the face is a live subject or a flat spoof.

pub mod blob;
pub mod colormap;
pub mod config;
pub mod depth;
pub mod dots;
pub mod error;
pub mod filter;
pub mod frame;
pub mod heatmap;
pub mod liveness;
pub mod mask;
pub mod profiles;
pub mod pseudo_depth;
pub mod similarity;
pub mod triangulation;
pub mod types;

pub use config::{ConfigError, LivenessConfig};
pub use depth::{DepthEstimate, DepthModel, DepthModelError, DetectorError, FaceDetector};
pub use dots::{DotExtractor, IntensitySource, NeighborStatistics, SignalAssessment};
pub use error::LivenessError;
pub use frame::Frame;
pub use heatmap::{HeatMap, HeatmapBuilder, Interpolation};
pub use liveness::LivenessChecker;
pub use pseudo_depth::{PseudoDepthMap, PseudoDepthSynthesizer, StageError};
pub use similarity::{ScoringError, SimilarityScorer};
pub use types::{
    Confidence, DotPoint, DotSet, FaceRegion, LivenessVerdict, PatternSignal, ReferenceSource,
    SimilarityMetric,
    SCORE_SENTINEL,
};
