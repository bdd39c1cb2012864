//! neuralock-models: ONNX Runtime backends for external model capabilities.
//!
//! Currently provides the monocular depth reference (Depth Anything V2).

pub mod depth_anything;

pub use depth_anything::{DepthAnything, ModelError};

use std::path::PathBuf;

/// File name of the depth model inside the model directory.
pub const DEPTH_MODEL_FILE: &str = "depth_anything_v2_vits.onnx";

/// System-wide model location used when `NEURALOCK_MODEL_DIR` is unset.
const SYSTEM_MODEL_DIR: &str = "/usr/share/neuralock/models";

/// Directory holding ONNX model files: `$NEURALOCK_MODEL_DIR`, else the system location.
pub fn default_model_dir() -> PathBuf {
    std::env::var("NEURALOCK_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(SYSTEM_MODEL_DIR))
}

/// Full path of the depth model in `model_dir`.
pub fn depth_model_path(model_dir: &std::path::Path) -> PathBuf {
    model_dir.join(DEPTH_MODEL_FILE)
}
