//! Frame type and whole-frame image operations (luma conversion, inversion,
//! dark-frame detection and CLAHE).

use crate::config::ClaheParams;
use crate::types::FaceRegion;
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use ndarray::Array2;

/// Fraction of near-black pixels above which a capture counts as dark.
pub const DARK_FRAME_FRACTION: f32 = 0.95;

/// A captured frame: single-channel or three-channel.
///
/// Pipeline stages never mutate a frame; every operation returns a new one.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Gray(GrayImage),
    Color(RgbImage),
}

impl Frame {
    /// Wrap a decoded image, keeping single-channel captures single-channel.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Frame::Gray(gray),
            DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) => {
                Frame::Gray(image.into_luma8())
            }
            other => Frame::Color(other.into_rgb8()),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Frame::Gray(g) => g.width(),
            Frame::Color(c) => c.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Frame::Gray(g) => g.height(),
            Frame::Color(c) => c.height(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Frame::Color(_))
    }

    /// Luma view of the frame.
    pub fn to_gray(&self) -> GrayImage {
        match self {
            Frame::Gray(g) => g.clone(),
            Frame::Color(c) => image::imageops::grayscale(c),
        }
    }

    /// Three-channel view of the frame (gray is replicated).
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Frame::Gray(g) => DynamicImage::ImageLuma8(g.clone()).into_rgb8(),
            Frame::Color(c) => c.clone(),
        }
    }

    /// Average luma brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let gray = self.to_gray();
        if gray.is_empty() {
            return 0.0;
        }
        gray.as_raw().iter().map(|&b| b as f32).sum::<f32>() / gray.as_raw().len() as f32
    }

    /// True when the capture looks like the IR emitter was off.
    pub fn is_dark(&self) -> bool {
        is_dark_frame(self.to_gray().as_raw(), DARK_FRAME_FRACTION)
    }

    /// Copy out the pixels under `region`, which must already be clamped.
    pub fn crop(&self, region: &FaceRegion) -> Frame {
        let (x, y, w, h) = (
            region.x as u32,
            region.y as u32,
            region.width as u32,
            region.height as u32,
        );
        match self {
            Frame::Gray(g) => Frame::Gray(image::imageops::crop_imm(g, x, y, w, h).to_image()),
            Frame::Color(c) => Frame::Color(image::imageops::crop_imm(c, x, y, w, h).to_image()),
        }
    }
}

/// Photometric negative of a grayscale image.
pub fn invert(gray: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    image::imageops::invert(&mut out);
    out
}

/// Luma scaled to `[0, 1]` as a `rows × cols` array.
pub fn unit_luma(gray: &GrayImage) -> Array2<f32> {
    Array2::from_shape_fn((gray.height() as usize, gray.width() as usize), |(r, c)| {
        gray.get_pixel(c as u32, r as u32)[0] as f32 / 255.0
    })
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels fall in the darkest
/// bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

/// Reflect-101 border index (`gfedcb|abcdefgh|gfedcba`).
fn reflect_101(mut i: i64, n: i64) -> usize {
    if n == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * (n - 1) - i;
        } else {
            return i as usize;
        }
    }
}

/// Contrast-Limited Adaptive Histogram Equalization.
///
/// Splits the image into `tile_grid.0 × tile_grid.1` tiles (the image is
/// virtually padded with a reflect-101 border up to a multiple of the grid),
/// clips each tile histogram at `clip_limit × tile_area / 256` counts,
/// redistributes the excess evenly, and bilinearly interpolates between the
/// four nearest tile lookup tables for every pixel.
pub fn clahe(gray: &GrayImage, params: &ClaheParams) -> GrayImage {
    let (width, height) = gray.dimensions();
    let (tiles_x, tiles_y) = (params.tile_grid.0.max(1) as usize, params.tile_grid.1.max(1) as usize);
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 {
        return gray.clone();
    }

    let padded_w = w.div_ceil(tiles_x) * tiles_x;
    let padded_h = h.div_ceil(tiles_y) * tiles_y;
    let tile_w = padded_w / tiles_x;
    let tile_h = padded_h / tiles_y;
    let tile_area = tile_w * tile_h;
    let src = gray.as_raw();

    let clip = if params.clip_limit > 0.0 {
        ((params.clip_limit * tile_area as f32 / 256.0) as u32).max(1)
    } else {
        u32::MAX
    };
    let lut_scale = 255.0 / tile_area as f32;

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity(tiles_x * tiles_y);
    for row in 0..tiles_y {
        for col in 0..tiles_x {
            let mut hist = [0u32; 256];
            for ty in 0..tile_h {
                let sy = reflect_101((row * tile_h + ty) as i64, h as i64);
                for tx in 0..tile_w {
                    let sx = reflect_101((col * tile_w + tx) as i64, w as i64);
                    hist[src[sy * w + sx] as usize] += 1;
                }
            }

            let mut clipped = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    clipped += *bin - clip;
                    *bin = clip;
                }
            }
            let batch = clipped / 256;
            let residual = (clipped - batch * 256) as usize;
            for bin in hist.iter_mut() {
                *bin += batch;
            }
            if residual > 0 {
                let step = (256 / residual).max(1);
                for i in (0..256).step_by(step).take(residual) {
                    hist[i] += 1;
                }
            }

            let mut lut = [0u8; 256];
            let mut sum = 0u32;
            for (i, slot) in lut.iter_mut().enumerate() {
                sum += hist[i];
                *slot = (sum as f32 * lut_scale).round().clamp(0.0, 255.0) as u8;
            }
            luts.push(lut);
        }
    }

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;
    let mut out = GrayImage::new(width, height);
    for y in 0..h {
        let tyf = y as f32 * inv_th - 0.5;
        let ty1 = tyf.floor() as i64;
        let ya = tyf - ty1 as f32;
        let r0 = ty1.max(0) as usize;
        let r1 = ((ty1 + 1) as usize).min(tiles_y - 1);

        for x in 0..w {
            let txf = x as f32 * inv_tw - 0.5;
            let tx1 = txf.floor() as i64;
            let xa = txf - tx1 as f32;
            let c0 = tx1.max(0) as usize;
            let c1 = ((tx1 + 1) as usize).min(tiles_x - 1);

            let pixel = src[y * w + x] as usize;
            let tl = luts[r0 * tiles_x + c0][pixel] as f32;
            let tr = luts[r0 * tiles_x + c1][pixel] as f32;
            let bl = luts[r1 * tiles_x + c0][pixel] as f32;
            let br = luts[r1 * tiles_x + c1][pixel] as f32;

            let top = tl * (1.0 - xa) + tr * xa;
            let bot = bl * (1.0 - xa) + br * xa;
            let val = top * (1.0 - ya) + bot * ya;

            out.put_pixel(x as u32, y as u32, Luma([val.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}
