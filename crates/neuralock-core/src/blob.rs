//! Connected-blob detection over a binary image.
//!
//! Outer contours are traced with `imageproc`; shape descriptors come from
//! polygon moments of the traced contour, so areas are measured on the
//! boundary-pixel polygon rather than by counting pixels.

use crate::config::BlobParams;
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;

const INERTIA_EPSILON: f64 = 1e-2;

/// A blob that passed every filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    pub x: f32,
    pub y: f32,
    pub area: f32,
    /// Median centroid-to-contour distance.
    pub radius: f32,
    pub circularity: f32,
    pub convexity: f32,
    pub inertia_ratio: f32,
}

/// Spatial and central moments of a closed polygon.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Moments {
    m00: f64,
    m10: f64,
    m01: f64,
    mu20: f64,
    mu11: f64,
    mu02: f64,
}

impl Moments {
    /// Green's-theorem moments. Orientation is normalized so `m00 >= 0`.
    fn of_polygon(points: &[(f64, f64)]) -> Moments {
        let n = points.len();
        if n == 0 {
            return Moments::default();
        }
        let (mut a00, mut a10, mut a01, mut a20, mut a11, mut a02) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let (mut xi_1, mut yi_1) = points[n - 1];
        for &(xi, yi) in points {
            let dxy = xi_1 * yi - xi * yi_1;
            let xii_1 = xi_1 + xi;
            let yii_1 = yi_1 + yi;
            a00 += dxy;
            a10 += dxy * xii_1;
            a01 += dxy * yii_1;
            a20 += dxy * (xi_1 * xii_1 + xi * xi);
            a11 += dxy * (xi_1 * (yii_1 + yi_1) + xi * (yii_1 + yi));
            a02 += dxy * (yi_1 * yii_1 + yi * yi);
            xi_1 = xi;
            yi_1 = yi;
        }
        if a00.abs() <= f64::from(f32::EPSILON) {
            return Moments::default();
        }
        let sign = a00.signum();
        let m00 = sign * a00 / 2.0;
        let m10 = sign * a10 / 6.0;
        let m01 = sign * a01 / 6.0;
        let m20 = sign * a20 / 12.0;
        let m11 = sign * a11 / 24.0;
        let m02 = sign * a02 / 12.0;

        let cx = m10 / m00;
        let cy = m01 / m00;
        Moments {
            m00,
            m10,
            m01,
            mu20: m20 - m10 * cx,
            mu11: m11 - m10 * cy,
            mu02: m02 - m01 * cy,
        }
    }

    /// Ratio of the minor to the major principal moment of inertia (1 = isotropic).
    fn inertia_ratio(&self) -> f64 {
        let norm = self.m00 * self.m00;
        let (nu20, nu11, nu02) = (self.mu20 / norm, self.mu11 / norm, self.mu02 / norm);
        let denominator = ((2.0 * nu11).powi(2) + (nu20 - nu02).powi(2)).sqrt();
        if denominator <= INERTIA_EPSILON {
            return 1.0;
        }
        let cosmin = (nu20 - nu02) / denominator;
        let sinmin = 2.0 * nu11 / denominator;
        let imin = 0.5 * (nu20 + nu02) - 0.5 * (nu20 - nu02) * cosmin - nu11 * sinmin;
        let imax = 0.5 * (nu20 + nu02) + 0.5 * (nu20 - nu02) * cosmin + nu11 * sinmin;
        if imax <= 0.0 {
            return 1.0;
        }
        imin / imax
    }
}

fn polygon_area(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let (x0, y0) = points[(i + n - 1) % n];
        let (x1, y1) = points[i];
        acc += x0 * y1 - x1 * y0;
    }
    (acc / 2.0).abs()
}

fn closed_arc_length(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let (x0, y0) = points[(i + n - 1) % n];
            let (x1, y1) = points[i];
            (x1 - x0).hypot(y1 - y0)
        })
        .sum()
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Convex hull (Andrew's monotone chain), counter-clockwise, no collinear points.
pub(crate) fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }
    let mut lower: Vec<(f64, f64)> = Vec::with_capacity(pts.len());
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(f64, f64)> = Vec::with_capacity(pts.len());
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Filters connected components by polarity, area and shape.
#[derive(Debug, Clone)]
pub struct BlobDetector {
    params: BlobParams,
}

impl BlobDetector {
    pub fn new(params: BlobParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BlobParams {
        &self.params
    }

    /// Detect blobs in a binary (0/255) image, in contour-trace order.
    pub fn detect(&self, binary: &GrayImage) -> Vec<Blob> {
        let contours = find_contours::<i32>(binary);
        let total = contours.len();
        let blobs: Vec<Blob> = contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer)
            .filter_map(|c| self.measure(binary, &c.points))
            .collect();
        tracing::debug!(contours = total, blobs = blobs.len(), "blob detection");
        blobs
    }

    fn measure(&self, binary: &GrayImage, contour: &[Point<i32>]) -> Option<Blob> {
        let p = &self.params;
        let points: Vec<(f64, f64)> = contour.iter().map(|pt| (pt.x as f64, pt.y as f64)).collect();

        let moments = Moments::of_polygon(&points);
        if moments.m00 == 0.0 {
            return None;
        }
        let area = moments.m00;
        if area < p.min_area as f64 || area >= p.max_area as f64 {
            return None;
        }

        let perimeter = closed_arc_length(&points);
        let circularity = 4.0 * std::f64::consts::PI * area / (perimeter * perimeter);
        if circularity < p.min_circularity as f64 {
            return None;
        }

        let inertia_ratio = moments.inertia_ratio();
        if inertia_ratio < p.min_inertia_ratio as f64 {
            return None;
        }

        let hull_area = polygon_area(&convex_hull(&points));
        if hull_area < f64::EPSILON {
            return None;
        }
        let convexity = polygon_area(&points) / hull_area;
        if convexity < p.min_convexity as f64 {
            return None;
        }

        let cx = moments.m10 / moments.m00;
        let cy = moments.m01 / moments.m00;

        let (px, py) = (cx.round(), cy.round());
        if px < 0.0 || py < 0.0 || px >= binary.width() as f64 || py >= binary.height() as f64 {
            return None;
        }
        if binary.get_pixel(px as u32, py as u32)[0] != p.blob_color {
            return None;
        }

        let mut dists: Vec<f64> = points.iter().map(|&(x, y)| (x - cx).hypot(y - cy)).collect();
        dists.sort_by(f64::total_cmp);
        let n = dists.len();
        let radius = (dists[(n - 1) / 2] + dists[n / 2]) / 2.0;

        Some(Blob {
            x: cx as f32,
            y: cy as f32,
            area: area as f32,
            radius: radius as f32,
            circularity: circularity as f32,
            convexity: convexity as f32,
            inertia_ratio: inertia_ratio as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn draw_disk(img: &mut GrayImage, cx: i32, cy: i32, r: i32) {
        for y in cy - r..=cy + r {
            for x in cx - r..=cx + r {
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                    img.put_pixel(x as u32, y as u32, Luma([255]));
                }
            }
        }
    }

    #[test]
    fn test_square_moments() {
        let square = [(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)];
        let m = Moments::of_polygon(&square);
        assert!((m.m00 - 16.0).abs() < 1e-9);
        assert!((m.m10 / m.m00 - 2.0).abs() < 1e-9);
        assert!((m.m01 / m.m00 - 2.0).abs() < 1e-9);
        assert!((m.inertia_ratio() - 1.0).abs() < 1e-9);

        // reversed orientation gives the same moments
        let mut rev = square;
        rev.reverse();
        assert_eq!(Moments::of_polygon(&rev), m);
    }

    #[test]
    fn test_elongated_inertia() {
        let rect = [(0.0, 0.0), (20.0, 0.0), (20.0, 2.0), (0.0, 2.0)];
        let ratio = Moments::of_polygon(&rect).inertia_ratio();
        assert!((ratio - 0.01).abs() < 1e-6, "ratio {ratio}");
    }

    #[test]
    fn test_convex_hull_drops_concavity() {
        let pts = [(0.0, 0.0), (4.0, 0.0), (2.0, 1.0), (4.0, 4.0), (0.0, 4.0)];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert!((polygon_area(&hull) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_detects_round_dots() {
        let mut img = GrayImage::new(60, 40);
        draw_disk(&mut img, 15, 20, 4);
        draw_disk(&mut img, 40, 20, 5);
        let blobs = BlobDetector::new(BlobParams::default()).detect(&img);
        assert_eq!(blobs.len(), 2);
        let mut xs: Vec<f32> = blobs.iter().map(|b| b.x).collect();
        xs.sort_by(f32::total_cmp);
        assert!((xs[0] - 15.0).abs() < 1e-3);
        assert!((xs[1] - 40.0).abs() < 1e-3);
        for b in &blobs {
            assert!((b.y - 20.0).abs() < 1e-3);
            assert!(b.circularity >= 0.7);
            assert!(b.convexity >= 0.8);
            assert!(b.radius > 3.0 && b.radius < 6.0);
        }
    }

    #[test]
    fn test_rejects_small_large_and_elongated() {
        let mut img = GrayImage::new(120, 60);
        // 2x2 speck: polygon area 1
        for (x, y) in [(5, 5), (6, 5), (5, 6), (6, 6)] {
            img.put_pixel(x, y, Luma([255]));
        }
        // 30x30 block: area 841, above max
        for y in 15..45 {
            for x in 20..50 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        // thin bar: low inertia ratio and circularity
        for y in 30..33 {
            for x in 60..100 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let blobs = BlobDetector::new(BlobParams::default()).detect(&img);
        assert!(blobs.is_empty(), "{blobs:?}");
    }

    #[test]
    fn test_ring_rejected_by_color() {
        // a thick ring: centroid lands in the hole
        let mut img = GrayImage::new(40, 40);
        draw_disk(&mut img, 20, 20, 7);
        for y in 16..=24 {
            for x in 16..=24 {
                if (x - 20i32).pow(2) + (y - 20i32).pow(2) <= 9 {
                    img.put_pixel(x as u32, y as u32, Luma([0]));
                }
            }
        }
        let params = BlobParams {
            max_area: 1000.0,
            ..BlobParams::default()
        };
        let blobs = BlobDetector::new(params).detect(&img);
        assert!(blobs.is_empty());
    }
}
