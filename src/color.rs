//! Color appearance features: CIE L*a*b* histograms and the distances used to
//! compare appearance between detections.

use crate::mask::Mask;
use image::RgbImage;
use ndarray::{Array1, Array3, ArrayView1, Zip};

pub const HISTOGRAM_BINS: [usize; 3] = [4, 14, 14];
pub const HISTOGRAM_RANGES: [(f32, f32); 3] = [(0.0, 100.0), (-127.0, 128.0), (-127.0, 128.0)];

// D65 reference white
const WHITE: [f32; 3] = [0.95047, 1.0, 1.08883];

fn srgb_to_linear(v: u8) -> f32 {
    let v = v as f32 / 255.0;
    if v > 0.04045 {
        ((v + 0.055) / 1.055).powf(2.4)
    } else {
        v / 12.92
    }
}

fn lab_f(t: f32) -> f32 {
    if t > 0.008856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

/// Converts an 8-bit sRGB pixel to `[L, a, b]`.
pub fn rgb_to_lab(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(srgb_to_linear);

    let x = 0.412453 * r + 0.357580 * g + 0.180423 * b;
    let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
    let z = 0.019334 * r + 0.119193 * g + 0.950227 * b;

    let fx = lab_f(x / WHITE[0]);
    let fy = lab_f(y / WHITE[1]);
    let fz = lab_f(z / WHITE[2]);

    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

fn bin_index(v: f32, (lo, hi): (f32, f32), bins: usize) -> Option<usize> {
    if !(lo..=hi).contains(&v) {
        return None;
    }

    // right edge belongs to the last bin
    let idx = ((v - lo) / (hi - lo) * bins as f32) as usize;
    Some(idx.min(bins - 1))
}

/// L1-normalized joint L*a*b* histogram over the foreground pixels of a mask.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorHistogram {
    pub bins: Array3<f32>,
    pub edges: [Array1<f32>; 3],
}

impl ColorHistogram {
    pub fn from_masked(image: &RgbImage, mask: &Mask) -> Self {
        let mut bins = Array3::<f32>::zeros(HISTOGRAM_BINS);
        let (width, height) = image.dimensions();

        for (r, c) in mask.foreground() {
            if r as u32 >= height || c as u32 >= width {
                continue;
            }

            let lab = rgb_to_lab(image.get_pixel(c as u32, r as u32).0);
            let idx = (
                bin_index(lab[0], HISTOGRAM_RANGES[0], HISTOGRAM_BINS[0]),
                bin_index(lab[1], HISTOGRAM_RANGES[1], HISTOGRAM_BINS[1]),
                bin_index(lab[2], HISTOGRAM_RANGES[2], HISTOGRAM_BINS[2]),
            );

            if let (Some(l), Some(a), Some(b)) = idx {
                bins[[l, a, b]] += 1.0;
            }
        }

        let sum = bins.sum();
        let normalizer = if sum == 0.0 { 1.0 } else { sum };
        bins /= normalizer;

        let edges = [0, 1, 2].map(|i| {
            let (lo, hi) = HISTOGRAM_RANGES[i];
            Array1::linspace(lo, hi, HISTOGRAM_BINS[i] + 1)
        });

        Self { bins, edges }
    }

    /// `0.5 * sum((a - b)^2 / (a + b))` over bins where `a + b > 0`.
    pub fn chi_square_distance(&self, other: &ColorHistogram) -> f32 {
        if self.bins.dim() != other.bins.dim() {
            return f32::INFINITY;
        }

        0.5 * Zip::from(&self.bins)
            .and(&other.bins)
            .fold(0.0, |acc, &x, &y| {
                let sum = x + y;
                if sum == 0.0 {
                    acc
                } else {
                    acc + (x - y) * (x - y) / sum
                }
            })
    }
}

/// `1 - cos(a, b)`, clamped to be non-negative. `None` when the vectors have
/// different lengths or either one has zero norm.
pub fn cosine_distance(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let norm = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if norm == 0.0 {
        return None;
    }

    Some((1.0 - a.dot(&b) / norm).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    #[test]
    fn lab_reference_colors() {
        let white = rgb_to_lab([255, 255, 255]);
        assert_relative_eq!(white[0], 100.0, epsilon = 0.01);
        assert_relative_eq!(white[1], 0.0, epsilon = 0.01);
        assert_relative_eq!(white[2], 0.0, epsilon = 0.01);

        let black = rgb_to_lab([0, 0, 0]);
        assert_relative_eq!(black[0], 0.0, epsilon = 0.01);

        let red = rgb_to_lab([255, 0, 0]);
        assert_relative_eq!(red[0], 53.24, epsilon = 0.05);
        assert_relative_eq!(red[1], 80.09, epsilon = 0.1);
        assert_relative_eq!(red[2], 67.20, epsilon = 0.1);
    }

    #[test]
    fn histogram_is_normalized() {
        let image = RgbImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        let mask = Mask::from_bbox(8, 8, &BBox::ltrb(0.0, 0.0, 8.0, 8.0));
        let hist = ColorHistogram::from_masked(&image, &mask);

        assert_eq!(hist.bins.dim(), (4, 14, 14));
        assert_relative_eq!(hist.bins.sum(), 1.0, epsilon = 1e-6);
        assert_eq!(hist.bins.iter().filter(|&&v| v > 0.0).count(), 2);
        assert_eq!(hist.edges[0].len(), 5);
        assert_relative_eq!(hist.edges[1][0], -127.0);
        assert_relative_eq!(hist.edges[2][14], 128.0, epsilon = 1e-3);
    }

    #[test]
    fn empty_mask_gives_zero_histogram() {
        let image = RgbImage::new(4, 4);
        let hist = ColorHistogram::from_masked(&image, &Mask::zeros(4, 4));

        assert_eq!(hist.bins.sum(), 0.0);
    }

    #[test]
    fn chi_square_properties() {
        let image = RgbImage::from_fn(6, 6, |x, y| image::Rgb([(x * 40) as u8, (y * 40) as u8, 90]));
        let mask = Mask::from_bbox(6, 6, &BBox::ltrb(0.0, 0.0, 6.0, 3.0));
        let other = Mask::from_bbox(6, 6, &BBox::ltrb(0.0, 3.0, 6.0, 6.0));

        let a = ColorHistogram::from_masked(&image, &mask);
        let b = ColorHistogram::from_masked(&image, &other);

        assert_eq!(a.chi_square_distance(&a), 0.0);
        assert!(a.chi_square_distance(&b) >= 0.0);
        assert_relative_eq!(a.chi_square_distance(&b), b.chi_square_distance(&a));
    }

    #[test]
    fn cosine_properties() {
        let a = arr1(&[1.0, 2.0, 3.0]);
        let b = arr1(&[-1.0, -2.0, -3.0]);
        let c = arr1(&[3.0, 0.0, -1.0]);

        assert_relative_eq!(cosine_distance(a.view(), a.view()).unwrap(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_distance(a.view(), b.view()).unwrap(), 2.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_distance(a.view(), c.view()).unwrap(), 1.0, epsilon = 1e-6);
        assert_eq!(cosine_distance(a.view(), arr1(&[0.0, 0.0, 0.0]).view()), None);
        assert_eq!(cosine_distance(a.view(), arr1(&[1.0]).view()), None);
    }
}
