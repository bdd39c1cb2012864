//! Pseudo-depth synthesis.
//!
//! Turns a grayscale face crop into the smooth, masked, colorized rendering
//! a depth sensor would produce for a flat surface. Each stage consumes the
//! previous stage's output; a stage that fails is skipped and recorded, and
//! the pipeline continues from the last good intermediate.

use crate::config::PseudoDepthParams;
use crate::depth::DepthEstimate;
use crate::filter::{blur_gray, blur_rgb, saturate};
use crate::frame::{unit_luma, Frame};
use crate::mask::{apply_mask_gray, apply_mask_rgb, ellipse_mask};
use crate::types::ReferenceSource;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoDepthStage {
    Blur,
    Normalize,
    Mask,
    Resize,
    Colorize,
    Brightness,
    FinalBlur,
}

impl fmt::Display for PseudoDepthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PseudoDepthStage::Blur => "blur",
            PseudoDepthStage::Normalize => "normalize",
            PseudoDepthStage::Mask => "mask",
            PseudoDepthStage::Resize => "resize",
            PseudoDepthStage::Colorize => "colorize",
            PseudoDepthStage::Brightness => "brightness",
            PseudoDepthStage::FinalBlur => "final blur",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("{stage} stage received an empty image")]
    EmptyImage { stage: PseudoDepthStage },
    #[error("{stage} stage cannot produce a {width}x{height} image")]
    ZeroSize {
        stage: PseudoDepthStage,
        width: u32,
        height: u32,
    },
    #[error("{stage} stage got a non-finite {name} ({value})")]
    NonFinite {
        stage: PseudoDepthStage,
        name: &'static str,
        value: f32,
    },
    #[error("{stage} stage mask is {mask_width}x{mask_height}, image is {width}x{height}")]
    MaskMismatch {
        stage: PseudoDepthStage,
        mask_width: u32,
        mask_height: u32,
        width: u32,
        height: u32,
    },
}

impl StageError {
    pub fn stage(&self) -> PseudoDepthStage {
        match self {
            StageError::EmptyImage { stage }
            | StageError::ZeroSize { stage, .. }
            | StageError::NonFinite { stage, .. }
            | StageError::MaskMismatch { stage, .. } => *stage,
        }
    }
}

/// Result of a synthesis run.
#[derive(Debug, Clone)]
pub struct PseudoDepthMap {
    /// Final rendering: color when colorization ran, gray otherwise.
    pub image: Frame,
    /// Binary mask matching `image`'s dimensions.
    pub mask: GrayImage,
    /// Stages that failed and were bypassed, in pipeline order.
    pub skipped: Vec<StageError>,
}

impl PseudoDepthMap {
    pub fn is_degraded(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn skipped_stages(&self) -> impl Iterator<Item = PseudoDepthStage> + '_ {
        self.skipped.iter().map(StageError::stage)
    }

    /// Luma of the rendering scaled to `[0, 1]`, as a comparison reference.
    pub fn to_depth_estimate(&self) -> DepthEstimate {
        DepthEstimate::new(unit_luma(&self.image.to_gray()), ReferenceSource::PseudoDepth)
    }
}

#[derive(Debug, Clone)]
pub struct PseudoDepthSynthesizer {
    params: PseudoDepthParams,
}

impl PseudoDepthSynthesizer {
    pub fn new(params: PseudoDepthParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PseudoDepthParams {
        &self.params
    }

    /// Run every stage over a grayscale face crop.
    pub fn synthesize(&self, crop: &GrayImage) -> PseudoDepthMap {
        let p = &self.params;
        let mut skipped = Vec::new();

        let blurred = absorb(blur(crop, p.blur_kernel, p.blur_sigma), crop, &mut skipped);
        let normalized = absorb(normalize(&blurred), &blurred, &mut skipped);

        let mask = ellipse_mask(crop.width(), crop.height(), p.ellipse_x_scale, p.ellipse_y_scale);
        let masked = absorb(
            mask_gray(&normalized, &mask, PseudoDepthStage::Mask),
            &normalized,
            &mut skipped,
        );

        let (data, mask) = match resize(&masked, &mask, p.output_size) {
            Ok(pair) => pair,
            Err(e) => {
                record(e, &mut skipped);
                (masked, mask)
            }
        };

        let mut image = Frame::Gray(data.clone());
        if p.colorize {
            match colorize(&data, &mask, p) {
                Ok(rgb) => image = Frame::Color(rgb),
                Err(e) => record(e, &mut skipped),
            }
        }

        image = absorb(brightness(&image, &mask, p.alpha, p.beta), &image, &mut skipped);
        image = absorb(
            final_blur(&image, &mask, p.final_blur_kernel, p.final_blur_sigma),
            &image,
            &mut skipped,
        );

        tracing::debug!(
            width = image.width(),
            height = image.height(),
            color = image.is_color(),
            skipped = skipped.len(),
            "pseudo-depth synthesized"
        );

        PseudoDepthMap { image, mask, skipped }
    }
}

fn record(error: StageError, skipped: &mut Vec<StageError>) {
    tracing::warn!(stage = %error.stage(), error = %error, "pseudo-depth stage skipped");
    skipped.push(error);
}

fn absorb<T: Clone>(result: Result<T, StageError>, previous: &T, skipped: &mut Vec<StageError>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            record(e, skipped);
            previous.clone()
        }
    }
}

fn non_empty(width: u32, height: u32, stage: PseudoDepthStage) -> Result<(), StageError> {
    if width == 0 || height == 0 {
        return Err(StageError::EmptyImage { stage });
    }
    Ok(())
}

fn check_mask(width: u32, height: u32, mask: &GrayImage, stage: PseudoDepthStage) -> Result<(), StageError> {
    if mask.dimensions() != (width, height) {
        return Err(StageError::MaskMismatch {
            stage,
            mask_width: mask.width(),
            mask_height: mask.height(),
            width,
            height,
        });
    }
    Ok(())
}

fn blur(gray: &GrayImage, kernel: u32, sigma: f32) -> Result<GrayImage, StageError> {
    non_empty(gray.width(), gray.height(), PseudoDepthStage::Blur)?;
    if !sigma.is_finite() {
        return Err(StageError::NonFinite {
            stage: PseudoDepthStage::Blur,
            name: "sigma",
            value: sigma,
        });
    }
    Ok(blur_gray(gray, kernel, sigma))
}

/// Stretch to 0–255. A constant image maps to zeros.
fn normalize(gray: &GrayImage) -> Result<GrayImage, StageError> {
    non_empty(gray.width(), gray.height(), PseudoDepthStage::Normalize)?;
    let (lo, hi) = gray
        .as_raw()
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let scale = if hi > lo { 255.0 / (hi - lo) as f32 } else { 0.0 };
    let shift = -(lo as f32) * scale;
    Ok(ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([saturate(gray.get_pixel(x, y)[0] as f32 * scale + shift)])
    }))
}

fn mask_gray(gray: &GrayImage, mask: &GrayImage, stage: PseudoDepthStage) -> Result<GrayImage, StageError> {
    non_empty(gray.width(), gray.height(), stage)?;
    check_mask(gray.width(), gray.height(), mask, stage)?;
    Ok(apply_mask_gray(gray, mask))
}

/// Resize data (linear) and mask (nearest) together, so they stay aligned.
fn resize(
    gray: &GrayImage,
    mask: &GrayImage,
    (width, height): (u32, u32),
) -> Result<(GrayImage, GrayImage), StageError> {
    let stage = PseudoDepthStage::Resize;
    non_empty(gray.width(), gray.height(), stage)?;
    if width == 0 || height == 0 {
        return Err(StageError::ZeroSize { stage, width, height });
    }
    check_mask(gray.width(), gray.height(), mask, stage)?;
    let data = imageops::resize(gray, width, height, FilterType::Triangle);
    let mask = imageops::resize(mask, width, height, FilterType::Nearest);
    Ok((data, mask))
}

fn colorize(gray: &GrayImage, mask: &GrayImage, p: &PseudoDepthParams) -> Result<RgbImage, StageError> {
    let stage = PseudoDepthStage::Colorize;
    non_empty(gray.width(), gray.height(), stage)?;
    check_mask(gray.width(), gray.height(), mask, stage)?;
    let source = if p.invert {
        crate::frame::invert(gray)
    } else {
        gray.clone()
    };
    Ok(apply_mask_rgb(&p.colormap.apply(&source), mask))
}

/// `saturate(|alpha * v + beta|)` per channel, then re-mask.
fn brightness(image: &Frame, mask: &GrayImage, alpha: f32, beta: f32) -> Result<Frame, StageError> {
    let stage = PseudoDepthStage::Brightness;
    non_empty(image.width(), image.height(), stage)?;
    for (name, value) in [("alpha", alpha), ("beta", beta)] {
        if !value.is_finite() {
            return Err(StageError::NonFinite { stage, name, value });
        }
    }
    check_mask(image.width(), image.height(), mask, stage)?;
    let adjust = |v: u8| saturate((alpha * v as f32 + beta).abs());
    Ok(match image {
        Frame::Gray(g) => {
            let out = ImageBuffer::from_fn(g.width(), g.height(), |x, y| Luma([adjust(g.get_pixel(x, y)[0])]));
            Frame::Gray(apply_mask_gray(&out, mask))
        }
        Frame::Color(c) => {
            let out = ImageBuffer::from_fn(c.width(), c.height(), |x, y| {
                let p = c.get_pixel(x, y);
                Rgb([adjust(p[0]), adjust(p[1]), adjust(p[2])])
            });
            Frame::Color(apply_mask_rgb(&out, mask))
        }
    })
}

fn final_blur(image: &Frame, mask: &GrayImage, kernel: u32, sigma: f32) -> Result<Frame, StageError> {
    let stage = PseudoDepthStage::FinalBlur;
    non_empty(image.width(), image.height(), stage)?;
    if !sigma.is_finite() {
        return Err(StageError::NonFinite {
            stage,
            name: "sigma",
            value: sigma,
        });
    }
    check_mask(image.width(), image.height(), mask, stage)?;
    Ok(match image {
        Frame::Gray(g) => Frame::Gray(apply_mask_gray(&blur_gray(g, kernel, sigma), mask)),
        Frame::Color(c) => Frame::Color(apply_mask_rgb(&blur_rgb(c, kernel, sigma), mask)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_crop(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([(60 + (x + y) % 120) as u8]))
    }

    fn small_params() -> PseudoDepthParams {
        PseudoDepthParams {
            output_size: (120, 120),
            ..PseudoDepthParams::default()
        }
    }

    #[test]
    fn test_default_pipeline_produces_masked_color() {
        let map = PseudoDepthSynthesizer::new(small_params()).synthesize(&gradient_crop(80, 100));
        assert!(!map.is_degraded());
        assert!(map.image.is_color());
        assert_eq!((map.image.width(), map.image.height()), (120, 120));
        assert_eq!(map.mask.dimensions(), (120, 120));
        // corners lie outside the ellipse and are re-masked after every stage
        let rgb = map.image.to_rgb();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_ne!(*rgb.get_pixel(60, 60), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_mask_stays_binary_after_resize() {
        let map = PseudoDepthSynthesizer::new(small_params()).synthesize(&gradient_crop(37, 53));
        assert!(map.mask.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_gray_rendering_when_colorize_disabled() {
        let params = PseudoDepthParams {
            colorize: false,
            ..small_params()
        };
        let map = PseudoDepthSynthesizer::new(params).synthesize(&gradient_crop(64, 64));
        assert!(!map.image.is_color());
        let gray = map.image.to_gray();
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_normalize_stretches_and_handles_constant() {
        let img = GrayImage::from_raw(3, 1, vec![10, 27, 61]).unwrap();
        assert_eq!(normalize(&img).unwrap().as_raw(), &vec![0, 85, 255]);
        let flat = GrayImage::from_pixel(4, 4, Luma([90]));
        assert!(normalize(&flat).unwrap().pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_brightness_is_saturating_abs() {
        let img = Frame::Gray(GrayImage::from_raw(3, 1, vec![0, 100, 250]).unwrap());
        let mask = GrayImage::from_pixel(3, 1, Luma([255]));
        let out = brightness(&img, &mask, 1.0, 15.0).unwrap().to_gray();
        assert_eq!(out.as_raw(), &vec![15, 115, 255]);
        let neg = brightness(&img, &mask, -1.0, 0.0).unwrap().to_gray();
        assert_eq!(neg.as_raw(), &vec![0, 100, 250]);
    }

    #[test]
    fn test_failed_resize_continues_at_native_resolution() {
        let params = PseudoDepthParams {
            output_size: (0, 600),
            ..PseudoDepthParams::default()
        };
        let map = PseudoDepthSynthesizer::new(params).synthesize(&gradient_crop(50, 40));
        assert_eq!(map.skipped_stages().collect::<Vec<_>>(), vec![PseudoDepthStage::Resize]);
        assert_eq!((map.image.width(), map.image.height()), (50, 40));
        assert_eq!(map.mask.dimensions(), (50, 40));
        assert!(map.image.is_color());
    }

    #[test]
    fn test_non_finite_brightness_is_skipped() {
        let params = PseudoDepthParams {
            beta: f32::NAN,
            ..small_params()
        };
        let map = PseudoDepthSynthesizer::new(params).synthesize(&gradient_crop(40, 40));
        assert_eq!(map.skipped_stages().collect::<Vec<_>>(), vec![PseudoDepthStage::Brightness]);
        // final blur still ran on the colorized image
        assert!(map.image.is_color());
    }

    #[test]
    fn test_empty_crop_skips_every_stage() {
        let map = PseudoDepthSynthesizer::new(small_params()).synthesize(&GrayImage::new(0, 0));
        assert!(map.image.is_empty());
        assert!(map.skipped.len() >= 5);
    }

    #[test]
    fn test_depth_estimate_is_unit_range() {
        let map = PseudoDepthSynthesizer::new(small_params()).synthesize(&gradient_crop(64, 80));
        let estimate = map.to_depth_estimate();
        assert_eq!(estimate.map.dim(), (120, 120));
        assert_eq!(estimate.source, ReferenceSource::PseudoDepth);
        assert!(estimate.map.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
