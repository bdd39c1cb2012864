//! Elliptical face masks and the feathered vignette.

use crate::filter::{blur_f32, odd_kernel, GrayF32};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};

/// Ellipse centered on a `width` × `height` image.
///
/// Semi-axes are `scale × half-extent`, truncated, at least one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    pub cx: f32,
    pub cy: f32,
    pub ax: f32,
    pub ay: f32,
}

impl Ellipse {
    pub fn centered(width: u32, height: u32, x_scale: f32, y_scale: f32) -> Self {
        Self {
            cx: (width / 2) as f32,
            cy: (height / 2) as f32,
            ax: ((width as f32 / 2.0 * x_scale) as u32).max(1) as f32,
            ay: ((height as f32 / 2.0 * y_scale) as u32).max(1) as f32,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        let dx = (x as f32 - self.cx) / self.ax;
        let dy = (y as f32 - self.cy) / self.ay;
        dx * dx + dy * dy <= 1.0
    }
}

/// Binary (0/255) elliptical mask.
pub fn ellipse_mask(width: u32, height: u32, x_scale: f32, y_scale: f32) -> GrayImage {
    let ellipse = Ellipse::centered(width, height, x_scale, y_scale);
    GrayImage::from_fn(width, height, |x, y| {
        Luma([if ellipse.contains(x, y) { 255 } else { 0 }])
    })
}

/// Bitwise AND with a binary mask. Dimensions must match.
pub fn apply_mask_gray(image: &GrayImage, mask: &GrayImage) -> GrayImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[0] & mask_at(mask, x, y)])
    })
}

pub fn apply_mask_rgb(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let m = mask_at(mask, x, y);
        let p = image.get_pixel(x, y);
        Rgb([p[0] & m, p[1] & m, p[2] & m])
    })
}

fn mask_at(mask: &GrayImage, x: u32, y: u32) -> u8 {
    mask.get_pixel_checked(x, y).map_or(0, |p| p[0])
}

/// Float vignette weights in `[0, 1]`.
///
/// `feather_sigma <= 0` gives a hard edge; otherwise the ellipse is blurred
/// with a `6σ + 1` kernel.
pub fn vignette_weights(
    width: u32,
    height: u32,
    x_scale: f32,
    y_scale: f32,
    feather_sigma: f32,
) -> GrayF32 {
    let ellipse = Ellipse::centered(width, height, x_scale, y_scale);
    let mask: GrayF32 = ImageBuffer::from_fn(width, height, |x, y| {
        Luma([if ellipse.contains(x, y) { 1.0 } else { 0.0 }])
    });
    if feather_sigma > 0.0 {
        let ksize = odd_kernel((6.0 * feather_sigma) as u32 + 1);
        blur_f32(&mask, ksize, feather_sigma)
    } else {
        mask
    }
}

pub fn vignette_gray(image: &GrayImage, x_scale: f32, y_scale: f32, feather_sigma: f32) -> GrayImage {
    let w = vignette_weights(image.width(), image.height(), x_scale, y_scale, feather_sigma);
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([scale_u8(image.get_pixel(x, y)[0], w.get_pixel(x, y)[0])])
    })
}

pub fn vignette_rgb(image: &RgbImage, x_scale: f32, y_scale: f32, feather_sigma: f32) -> RgbImage {
    let w = vignette_weights(image.width(), image.height(), x_scale, y_scale, feather_sigma);
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let k = w.get_pixel(x, y)[0];
        let p = image.get_pixel(x, y);
        Rgb([scale_u8(p[0], k), scale_u8(p[1], k), scale_u8(p[2], k)])
    })
}

// truncating, like a float-to-u8 cast
fn scale_u8(v: u8, k: f32) -> u8 {
    (v as f32 * k).clamp(0.0, 255.0) as u8
}
