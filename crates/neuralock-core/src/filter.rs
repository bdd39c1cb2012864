//! Gaussian filtering, adaptive thresholding and morphology.
//!
//! Convolutions go through `imageproc`'s separable filter on `f32` buffers,
//! which replicates edge pixels at the border.

use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;

pub type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;
pub type RgbF32 = ImageBuffer<Rgb<f32>, Vec<f32>>;

/// Force a kernel dimension odd; even sizes grow by one.
pub fn odd_kernel(size: u32) -> u32 {
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

/// Sigma implied by a kernel size when none is given.
pub fn sigma_for_kernel(ksize: u32) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Normalized 1-D Gaussian. `sigma <= 0` derives sigma from the size.
pub fn gaussian_kernel(ksize: u32, sigma: f32) -> Vec<f32> {
    let ksize = odd_kernel(ksize);
    let sigma = if sigma > 0.0 { sigma } else { sigma_for_kernel(ksize) };
    let half = (ksize / 2) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Gaussian blur of a float map.
pub fn blur_f32(image: &GrayF32, ksize: u32, sigma: f32) -> GrayF32 {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let kernel = gaussian_kernel(ksize, sigma);
    imageproc::filter::separable_filter(image, &kernel, &kernel)
}

/// Gaussian blur of an 8-bit grayscale image, rounded back to `u8`.
pub fn blur_gray(image: &GrayImage, ksize: u32, sigma: f32) -> GrayImage {
    let blurred = blur_f32(&gray_to_f32(image), ksize, sigma);
    f32_to_gray(&blurred)
}

/// Gaussian blur of an 8-bit color image, channels independently.
pub fn blur_rgb(image: &RgbImage, ksize: u32, sigma: f32) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let src: RgbF32 = ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        Rgb([p[0] as f32, p[1] as f32, p[2] as f32])
    });
    let kernel = gaussian_kernel(ksize, sigma);
    let blurred = imageproc::filter::separable_filter(&src, &kernel, &kernel);
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let p = blurred.get_pixel(x, y);
        Rgb([saturate(p[0]), saturate(p[1]), saturate(p[2])])
    })
}

pub fn gray_to_f32(image: &GrayImage) -> GrayF32 {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[0] as f32])
    })
}

pub fn f32_to_gray(image: &GrayF32) -> GrayImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([saturate(image.get_pixel(x, y)[0])])
    })
}

/// Round and clamp to the `u8` range; NaN maps to zero.
pub fn saturate(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    v.round().clamp(0.0, 255.0) as u8
}

/// Adaptive threshold with a Gaussian-weighted local mean, inverse polarity.
///
/// A pixel becomes 255 when it is at least `c` below its local mean,
/// otherwise 0.
pub fn adaptive_threshold_inv(image: &GrayImage, block_size: u32, c: f32) -> GrayImage {
    let mean = blur_gray(image, block_size, 0.0);
    let delta = c.floor() as i32;
    let mut out = GrayImage::new(image.width(), image.height());
    for (x, y, p) in out.enumerate_pixels_mut() {
        let diff = image.get_pixel(x, y)[0] as i32 - mean.get_pixel(x, y)[0] as i32;
        *p = Luma([if diff <= -delta { 255 } else { 0 }]);
    }
    out
}

/// Morphological opening with a `kernel_size` square element.
///
/// Erodes `iterations` times, then dilates `iterations` times.
pub fn morphological_open(image: &GrayImage, kernel_size: u32, iterations: u32) -> GrayImage {
    let radius = (kernel_size / 2).min(u8::MAX as u32) as u8;
    if radius == 0 {
        return image.clone();
    }
    let mut out = image.clone();
    for _ in 0..iterations {
        out = imageproc::morphology::erode(&out, Norm::LInf, radius);
    }
    for _ in 0..iterations {
        out = imageproc::morphology::dilate(&out, Norm::LInf, radius);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_kernel_increments_even() {
        assert_eq!(odd_kernel(40), 41);
        assert_eq!(odd_kernel(41), 41);
        assert_eq!(odd_kernel(44), 45);
        assert_eq!(odd_kernel(0), 1);
    }

    #[test]
    fn test_even_kernel_is_used_as_next_odd() {
        assert_eq!(gaussian_kernel(40, 5.0).len(), 41);
        assert_eq!(gaussian_kernel(40, 5.0), gaussian_kernel(41, 5.0));
    }

    #[test]
    fn test_derived_sigma() {
        // 31-tap neighborhood of the adaptive threshold
        assert!((sigma_for_kernel(31) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_gaussian_kernel_normalized_and_symmetric() {
        let k = gaussian_kernel(45, 0.0);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..k.len() / 2 {
            assert!((k[i] - k[k.len() - 1 - i]).abs() < 1e-7);
        }
        assert!(k[22] > k[21]);
    }

    #[test]
    fn test_blur_preserves_constant() {
        let img = GrayImage::from_pixel(20, 20, Luma([77]));
        let out = blur_gray(&img, 41, 25.0);
        assert!(out.pixels().all(|p| p[0] == 77));
    }

    #[test]
    fn test_blur_rgb_spreads_energy() {
        let mut img = RgbImage::new(21, 21);
        img.put_pixel(10, 10, Rgb([255, 0, 0]));
        let out = blur_rgb(&img, 5, 1.0);
        assert!(out.get_pixel(10, 10)[0] < 255);
        assert!(out.get_pixel(11, 10)[0] > 0);
        assert_eq!(out.get_pixel(11, 10)[1], 0);
    }

    #[test]
    fn test_adaptive_threshold_marks_dark_spots() {
        let mut img = GrayImage::from_pixel(64, 64, Luma([200]));
        for y in 30..34 {
            for x in 30..34 {
                img.put_pixel(x, y, Luma([40]));
            }
        }
        let bin = adaptive_threshold_inv(&img, 31, 7.0);
        assert_eq!(bin.get_pixel(31, 31)[0], 255);
        assert_eq!(bin.get_pixel(5, 5)[0], 0);
        assert!(bin.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_open_removes_speckle_keeps_blob() {
        let mut img = GrayImage::new(32, 32);
        img.put_pixel(3, 3, Luma([255]));
        for y in 10..18 {
            for x in 10..18 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let out = morphological_open(&img, 3, 1);
        assert_eq!(out.get_pixel(3, 3)[0], 0);
        assert_eq!(out.get_pixel(13, 13)[0], 255);
        assert_eq!(out.get_pixel(10, 10)[0], 255);
    }
}
