//! Pipeline configuration.
//!
//! A [`LivenessConfig`] is an immutable value handed to the checker at
//! construction. Every section falls back to its defaults when absent from a
//! TOML document, so profiles and override files only list what they change.

use crate::colormap::Colormap;
use crate::dots::IntensitySource;
use crate::heatmap::Interpolation;
use crate::types::{ReferenceSource, SimilarityMetric};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to merge config: {0}")]
    Merge(String),
    #[error("unknown profile: {0}")]
    UnknownProfile(String),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// CLAHE contrast enhancement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheParams {
    pub clip_limit: f32,
    /// Tiles across and down.
    pub tile_grid: (u32, u32),
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            clip_limit: 3.0,
            tile_grid: (16, 16),
        }
    }
}

/// Gaussian adaptive threshold, inverse polarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdParams {
    /// Neighborhood size; must be odd.
    pub block_size: u32,
    /// Constant subtracted from the weighted local mean.
    pub c: f32,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            block_size: 31,
            c: 7.0,
        }
    }
}

/// Morphological opening with a square element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphologyParams {
    pub kernel_size: u32,
    pub iterations: u32,
}

impl Default for MorphologyParams {
    fn default() -> Self {
        Self {
            kernel_size: 3,
            iterations: 1,
        }
    }
}

/// Blob filters applied to connected components of the cleaned binary image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobParams {
    /// Polarity of accepted blobs (255 = bright).
    pub blob_color: u8,
    pub min_area: f32,
    pub max_area: f32,
    pub min_circularity: f32,
    pub min_convexity: f32,
    pub min_inertia_ratio: f32,
}

impl Default for BlobParams {
    fn default() -> Self {
        Self {
            blob_color: 255,
            min_area: 20.0,
            max_area: 200.0,
            min_circularity: 0.7,
            min_convexity: 0.80,
            min_inertia_ratio: 0.5,
        }
    }
}

/// Dot-signal sufficiency and intensity sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalParams {
    pub min_dots: usize,
    /// Dense dots (≥2 neighbors within `neighbor_radius`) that rescue a low count.
    pub min_dense_dots: usize,
    pub neighbor_radius: f32,
    /// Neighbor-distance spread above which the pattern reads as distorted.
    pub std_dev_threshold: f32,
    pub intensity_source: IntensitySource,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            min_dots: 20,
            min_dense_dots: 10,
            neighbor_radius: 25.0,
            std_dev_threshold: 1.5,
            intensity_source: IntensitySource::Raw,
        }
    }
}

/// Pseudo-depth synthesis stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PseudoDepthParams {
    pub blur_kernel: u32,
    pub blur_sigma: f32,
    /// Ellipse semi-axes as fractions of half-width and half-height.
    pub ellipse_x_scale: f32,
    pub ellipse_y_scale: f32,
    /// Display resolution (width, height).
    pub output_size: (u32, u32),
    pub colorize: bool,
    pub invert: bool,
    pub colormap: Colormap,
    pub alpha: f32,
    pub beta: f32,
    pub final_blur_kernel: u32,
    /// `0` derives sigma from the kernel size.
    pub final_blur_sigma: f32,
}

impl Default for PseudoDepthParams {
    fn default() -> Self {
        Self {
            blur_kernel: 41,
            blur_sigma: 25.0,
            ellipse_x_scale: 0.85,
            ellipse_y_scale: 0.95,
            output_size: (600, 600),
            colorize: true,
            invert: true,
            colormap: Colormap::Jet,
            alpha: 1.0,
            beta: 15.0,
            final_blur_kernel: 45,
            final_blur_sigma: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapParams {
    pub interpolation: Interpolation,
}

/// Similarity metric, decision thresholds and reference producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    pub metric: SimilarityMetric,
    /// SSIM above this is live.
    pub ssim_threshold: f32,
    /// MSE below this is live.
    pub mse_threshold: f32,
    /// Largest SSIM window; shrunk for small maps.
    pub max_window: usize,
    pub reference: ReferenceSource,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::StructuralSimilarity,
            ssim_threshold: 0.3,
            mse_threshold: 0.05,
            max_window: 7,
            reference: ReferenceSource::PseudoDepth,
        }
    }
}

/// Complete configuration of the liveness pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub clahe: ClaheParams,
    pub threshold: ThresholdParams,
    pub morphology: MorphologyParams,
    pub blob: BlobParams,
    pub signal: SignalParams,
    pub pseudo_depth: PseudoDepthParams,
    pub heatmap: HeatmapParams,
    pub scoring: ScoringParams,
}

impl LivenessConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: LivenessConfig = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Layer a TOML document over this config; only keys present in `src` change.
    pub fn with_overrides(&self, src: &str) -> Result<Self, ConfigError> {
        let mut base = toml::Value::try_from(self).map_err(|e| ConfigError::Merge(e.to_string()))?;
        let overlay: toml::Value = toml::from_str(src)?;
        merge_values(&mut base, overlay);
        let merged: LivenessConfig = base.try_into()?;
        merged.validate()?;
        Ok(merged)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.clahe;
        if !c.clip_limit.is_finite() || c.clip_limit < 0.0 {
            return Err(invalid("clahe.clip_limit", format!("{} is not a non-negative number", c.clip_limit)));
        }
        if c.tile_grid.0 == 0 || c.tile_grid.1 == 0 {
            return Err(invalid("clahe.tile_grid", "tile counts must be positive"));
        }

        let t = &self.threshold;
        if t.block_size < 3 || t.block_size % 2 == 0 {
            return Err(invalid("threshold.block_size", format!("{} must be odd and at least 3", t.block_size)));
        }
        if !t.c.is_finite() {
            return Err(invalid("threshold.c", "must be finite"));
        }

        if self.morphology.kernel_size == 0 {
            return Err(invalid("morphology.kernel_size", "must be positive"));
        }

        let b = &self.blob;
        if !(b.min_area >= 0.0 && b.min_area < b.max_area) {
            return Err(invalid(
                "blob.min_area",
                format!("area range [{}, {}) is empty", b.min_area, b.max_area),
            ));
        }
        for (field, v) in [
            ("blob.min_circularity", b.min_circularity),
            ("blob.min_convexity", b.min_convexity),
            ("blob.min_inertia_ratio", b.min_inertia_ratio),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid(field, format!("{v} is outside [0, 1]")));
            }
        }

        if !(self.signal.neighbor_radius.is_finite() && self.signal.neighbor_radius > 0.0) {
            return Err(invalid("signal.neighbor_radius", "must be a positive number"));
        }
        if !(self.signal.std_dev_threshold.is_finite() && self.signal.std_dev_threshold >= 0.0) {
            return Err(invalid("signal.std_dev_threshold", "must be a non-negative number"));
        }

        let p = &self.pseudo_depth;
        for (field, v) in [
            ("pseudo_depth.ellipse_x_scale", p.ellipse_x_scale),
            ("pseudo_depth.ellipse_y_scale", p.ellipse_y_scale),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(invalid(field, format!("{v} is outside (0, 1]")));
            }
        }
        if p.output_size.0 == 0 || p.output_size.1 == 0 {
            return Err(invalid("pseudo_depth.output_size", "dimensions must be positive"));
        }
        for (field, v) in [
            ("pseudo_depth.blur_sigma", p.blur_sigma),
            ("pseudo_depth.final_blur_sigma", p.final_blur_sigma),
            ("pseudo_depth.alpha", p.alpha),
            ("pseudo_depth.beta", p.beta),
        ] {
            if !v.is_finite() {
                return Err(invalid(field, "must be finite"));
            }
        }

        let s = &self.scoring;
        if !s.ssim_threshold.is_finite() {
            return Err(invalid("scoring.ssim_threshold", "must be finite"));
        }
        if !s.mse_threshold.is_finite() {
            return Err(invalid("scoring.mse_threshold", "must be finite"));
        }
        if s.max_window < 3 || s.max_window % 2 == 0 {
            return Err(invalid("scoring.max_window", format!("{} must be odd and at least 3", s.max_window)));
        }
        Ok(())
    }

    /// Active decision threshold for the configured metric.
    pub fn decision_threshold(&self) -> f32 {
        match self.scoring.metric {
            SimilarityMetric::StructuralSimilarity => self.scoring.ssim_threshold,
            SimilarityMetric::MeanSquaredError => self.scoring.mse_threshold,
        }
    }
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LivenessConfig::default();
        config.validate().unwrap();
        assert_eq!(config.clahe.tile_grid, (16, 16));
        assert_eq!(config.threshold.block_size, 31);
        assert_eq!(config.pseudo_depth.output_size, (600, 600));
        assert_eq!(config.decision_threshold(), 0.3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LivenessConfig::from_toml_str(
            r#"
            [scoring]
            metric = "mse"
            mse_threshold = 0.02

            [clahe]
            tile_grid = [8, 8]
            "#,
        )
        .unwrap();
        assert_eq!(config.scoring.metric, SimilarityMetric::MeanSquaredError);
        assert_eq!(config.decision_threshold(), 0.02);
        assert_eq!(config.clahe.tile_grid, (8, 8));
        assert_eq!(config.clahe.clip_limit, 3.0);
        assert_eq!(config.blob, BlobParams::default());
    }

    #[test]
    fn test_even_block_size_rejected() {
        let err = LivenessConfig::from_toml_str("[threshold]\nblock_size = 30\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "threshold.block_size", .. }));
    }

    #[test]
    fn test_even_ssim_window_rejected() {
        let mut config = LivenessConfig::default();
        config.scoring.max_window = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_tile_grid_rejected() {
        let mut config = LivenessConfig::default();
        config.clahe.tile_grid = (0, 16);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_area_range_rejected() {
        let mut config = LivenessConfig::default();
        config.blob.min_area = 300.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_std_dev_threshold_rejected() {
        let mut c = LivenessConfig::default();
        c.signal.std_dev_threshold = -0.5;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { .. })));
        c.signal.std_dev_threshold = f32::NAN;
        assert!(c.validate().is_err());
        c.signal.std_dev_threshold = 0.0;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_overrides_only_touch_listed_keys() {
        let mut base = LivenessConfig::default();
        base.scoring.ssim_threshold = 0.6;
        base.pseudo_depth.beta = 25.0;

        let merged = base.with_overrides("[scoring]\nmax_window = 5\n").unwrap();
        assert_eq!(merged.scoring.max_window, 5);
        assert_eq!(merged.scoring.ssim_threshold, 0.6);
        assert_eq!(merged.pseudo_depth.beta, 25.0);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        assert!(matches!(
            LivenessConfig::from_toml_str("[scoring\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
