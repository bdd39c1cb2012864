use anyhow::{Context, Result};
use neuralock_core::profiles::{profile_config, DEFAULT_PROFILE};
use neuralock_core::LivenessConfig;
use std::path::{Path, PathBuf};

/// CLI settings, loaded from environment variables.
pub struct Settings {
    /// Profile used when `--profile` is not given (default: "default").
    pub profile: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Depth model used for the monocular reference.
    pub depth_model: PathBuf,
    /// Per-image timeout for `check`.
    pub timeout_secs: u64,
}

impl Settings {
    /// Load settings from `NEURALOCK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = neuralock_models::default_model_dir();
        let depth_model = std::env::var("NEURALOCK_DEPTH_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| neuralock_models::depth_model_path(&model_dir));

        Self {
            profile: std::env::var("NEURALOCK_PROFILE").unwrap_or_else(|_| DEFAULT_PROFILE.to_string()),
            model_dir,
            depth_model,
            timeout_secs: env_u64("NEURALOCK_TIMEOUT_SECS", 10),
        }
    }

    /// Resolve the pipeline configuration.
    ///
    /// Precedence, lowest first: profile, `--config` file, environment
    /// threshold overrides.
    pub fn liveness_config(&self, profile: Option<&str>, overrides: Option<&Path>) -> Result<LivenessConfig> {
        let name = profile.unwrap_or(&self.profile);
        let mut config = profile_config(name).with_context(|| format!("loading profile {name:?}"))?;

        if let Some(path) = overrides {
            let src = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            config = config
                .with_overrides(&src)
                .with_context(|| format!("applying config {}", path.display()))?;
        }

        config.scoring.ssim_threshold = env_f32("NEURALOCK_SSIM_THRESHOLD", config.scoring.ssim_threshold);
        config.signal.min_dots = env_usize("NEURALOCK_MIN_DOTS", config.signal.min_dots);
        config.validate()?;

        tracing::debug!(
            profile = name,
            metric = %config.scoring.metric,
            threshold = config.decision_threshold(),
            reference = ?config.scoring.reference,
            "resolved liveness config"
        );
        Ok(config)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            profile: DEFAULT_PROFILE.to_string(),
            model_dir: PathBuf::from("/tmp/models"),
            depth_model: PathBuf::from("/tmp/models/depth.onnx"),
            timeout_secs: 10,
        }
    }

    #[test]
    fn test_unset_env_uses_default() {
        assert_eq!(env_u64("NEURALOCK_TEST_UNSET_U64", 7), 7);
        assert_eq!(env_f32("NEURALOCK_TEST_UNSET_F32", 0.5), 0.5);
    }

    #[test]
    fn test_named_profile_resolves() {
        let config = settings().liveness_config(Some("loose"), None).unwrap();
        assert_eq!(config.blob.min_area, 2.0);
    }

    #[test]
    fn test_unknown_profile_fails() {
        assert!(settings().liveness_config(Some("nope"), None).is_err());
    }

    #[test]
    fn test_missing_override_file_fails() {
        let err = settings()
            .liveness_config(None, Some(Path::new("/nonexistent/neuralock.toml")))
            .unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
