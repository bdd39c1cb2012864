use image::{GrayImage, ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Inferno anchor colors at evenly spaced positions in `[0, 1]`.
const INFERNO_ANCHORS: [[f32; 3]; 9] = [
    [0.0, 0.0, 4.0],
    [31.0, 12.0, 72.0],
    [85.0, 15.0, 109.0],
    [136.0, 34.0, 106.0],
    [186.0, 54.0, 85.0],
    [227.0, 89.0, 51.0],
    [249.0, 140.0, 10.0],
    [249.0, 201.0, 50.0],
    [252.0, 255.0, 164.0],
];

/// Perceptual colormaps for depth-like renderings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Colormap {
    /// Blue (low) through cyan, yellow to red (high).
    #[default]
    Jet,
    /// Black through purple and orange to pale yellow.
    Inferno,
}

impl Colormap {
    pub fn color(self, value: u8) -> Rgb<u8> {
        let v = value as f32 / 255.0;
        match self {
            Colormap::Jet => {
                let channel = |offset: f32| ((1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
                Rgb([channel(3.0), channel(2.0), channel(1.0)])
            }
            Colormap::Inferno => {
                let pos = v * (INFERNO_ANCHORS.len() - 1) as f32;
                let i = (pos.floor() as usize).min(INFERNO_ANCHORS.len() - 2);
                let t = pos - i as f32;
                let (a, b) = (INFERNO_ANCHORS[i], INFERNO_ANCHORS[i + 1]);
                let lerp = |c: usize| (a[c] + (b[c] - a[c]) * t).round().clamp(0.0, 255.0) as u8;
                Rgb([lerp(0), lerp(1), lerp(2)])
            }
        }
    }

    pub fn apply(self, gray: &GrayImage) -> RgbImage {
        let lut: Vec<Rgb<u8>> = (0..=255u8).map(|v| self.color(v)).collect();
        ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
            lut[gray.get_pixel(x, y)[0] as usize]
        })
    }
}
