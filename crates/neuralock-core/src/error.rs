use crate::depth::DetectorError;
use crate::types::FaceRegion;
use thiserror::Error;

/// Hard failures of a liveness check. Everything else degrades into a verdict.
#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("empty frame ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("face region {region} is degenerate after clamping to {frame_width}x{frame_height}")]
    DegenerateRegion {
        region: FaceRegion,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face detection failed: {0}")]
    Detector(#[from] DetectorError),
}

impl LivenessError {
    /// True for malformed input (as opposed to a failing collaborator).
    pub fn is_input_error(&self) -> bool {
        !matches!(self, LivenessError::Detector(_))
    }
}
