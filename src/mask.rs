//! Binary segmentation masks and their COCO run-length encoding.

use crate::bbox::{BBox, Ltrb};
use crate::error::Error;
use image::{imageops, GrayImage, Luma};
use nalgebra as na;
use ndarray::{Array2, ArrayView2, ShapeBuilder, Zip};
use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum Counts {
    Compressed(String),
    Runs(Vec<u32>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct RleRecord {
    size: [u32; 2],
    counts: Counts,
}

/// Column-major run-length encoding in the COCO layout: runs alternate
/// between background and foreground, starting with background.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RleRecord", into = "RleRecord")]
pub struct Rle {
    height: u32,
    width: u32,
    counts: Vec<u32>,
}

impl TryFrom<RleRecord> for Rle {
    type Error = Error;

    fn try_from(record: RleRecord) -> Result<Self, Error> {
        let [height, width] = record.size;
        let counts = match record.counts {
            Counts::Runs(runs) => runs,
            Counts::Compressed(s) => decompress_counts(&s)?,
        };

        Rle::new(height, width, counts)
    }
}

impl From<Rle> for RleRecord {
    fn from(rle: Rle) -> Self {
        RleRecord {
            size: [rle.height, rle.width],
            counts: Counts::Compressed(rle.to_compressed()),
        }
    }
}

impl Rle {
    pub fn new(height: u32, width: u32, counts: Vec<u32>) -> Result<Self, Error> {
        let total: u64 = counts.iter().map(|&c| c as u64).sum();
        let expected = height as u64 * width as u64;

        if total != expected {
            return Err(Error::InvalidRle(format!(
                "runs cover {} pixels, expected {}x{} = {}",
                total, height, width, expected
            )));
        }

        Ok(Self {
            height,
            width,
            counts,
        })
    }

    /// Parses the compact LEB128-like string form produced by pycocotools.
    pub fn from_compressed(height: u32, width: u32, s: &str) -> Result<Self, Error> {
        Rle::new(height, width, decompress_counts(s)?)
    }

    pub fn encode(mask: &Mask) -> Self {
        let (height, width) = mask.dims();
        let mut counts = Vec::new();
        let mut current = 0u8;
        let mut run = 0u32;

        // transposed view iterates columns first
        for &v in mask.0.t().iter() {
            let v = (v != 0) as u8;
            if v != current {
                counts.push(run);
                run = 0;
                current = v;
            }
            run += 1;
        }
        counts.push(run);

        Self {
            height,
            width,
            counts,
        }
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    #[inline]
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Foreground pixel count, computed from the runs without decoding.
    pub fn area(&self) -> u64 {
        self.counts.iter().skip(1).step_by(2).map(|&c| c as u64).sum()
    }

    pub fn decode(&self) -> Mask {
        let (h, w) = (self.height as usize, self.width as usize);
        let mut flat = Vec::with_capacity(h * w);
        let mut value = 0u8;

        for &run in &self.counts {
            flat.extend(std::iter::repeat(value).take(run as usize));
            value ^= 1;
        }

        match Array2::from_shape_vec((h, w).f(), flat) {
            Ok(data) => Mask(data),
            // runs are validated on construction
            Err(_) => Mask::zeros(self.height, self.width),
        }
    }

    pub fn to_compressed(&self) -> String {
        let mut out = String::new();

        for (i, &count) in self.counts.iter().enumerate() {
            let mut x = count as i64;
            if i > 2 {
                x -= self.counts[i - 2] as i64;
            }

            loop {
                let mut c = x & 0x1f;
                x >>= 5;
                let more = if c & 0x10 != 0 { x != -1 } else { x != 0 };
                if more {
                    c |= 0x20;
                }
                out.push((c as u8 + 48) as char);
                if !more {
                    break;
                }
            }
        }

        out
    }
}

fn decompress_counts(s: &str) -> Result<Vec<u32>, Error> {
    let bytes = s.as_bytes();
    let mut counts: Vec<i64> = Vec::new();
    let mut p = 0;

    while p < bytes.len() {
        let mut x: i64 = 0;
        let mut k = 0;
        let mut more = true;

        while more {
            let byte = *bytes
                .get(p)
                .ok_or_else(|| Error::InvalidRle("truncated counts string".into()))?;
            if !(48..48 + 64).contains(&byte) {
                return Err(Error::InvalidRle(format!(
                    "unexpected character {:?} in counts string",
                    byte as char
                )));
            }
            if k >= 12 {
                return Err(Error::InvalidRle("count is too large".into()));
            }

            let c = (byte - 48) as i64;
            x |= (c & 0x1f) << (5 * k);
            more = c & 0x20 != 0;
            p += 1;
            k += 1;

            if !more && c & 0x10 != 0 {
                x |= -1i64 << (5 * k);
            }
        }

        let m = counts.len();
        if m > 2 {
            x += counts[m - 2];
        }
        counts.push(x);
    }

    counts
        .into_iter()
        .map(|c| u32::try_from(c).map_err(|_| Error::InvalidRle(format!("invalid run {}", c))))
        .collect()
}

/// Raw spatial image moments of a binary mask.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    /// Center of mass; `None` for an empty mask.
    pub fn centroid(&self) -> Option<na::Point2<f32>> {
        if self.m00 == 0.0 {
            return None;
        }

        Some(na::Point2::new(
            (self.m10 / self.m00) as f32,
            (self.m01 / self.m00) as f32,
        ))
    }
}

/// Binary mask indexed as `[row, col]`; every non-zero pixel is foreground.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask(Array2<u8>);

impl Mask {
    pub fn new(data: Array2<u8>) -> Self {
        Self(data.mapv(|v| (v != 0) as u8))
    }

    pub fn zeros(height: u32, width: u32) -> Self {
        Self(Array2::zeros((height as usize, width as usize)))
    }

    /// Mask whose foreground is every pixel covered by `bbox`.
    pub fn from_bbox(height: u32, width: u32, bbox: &BBox<Ltrb>) -> Self {
        let inside = |v: usize, lo: f32, hi: f32| (v as f32) >= lo && (v as f32) < hi;

        Self(Array2::from_shape_fn(
            (height as usize, width as usize),
            |(r, c)| {
                (inside(r, bbox.top(), bbox.bottom()) && inside(c, bbox.left(), bbox.right()))
                    as u8
            },
        ))
    }

    /// `(height, width)`
    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        let (h, w) = self.0.dim();
        (h as u32, w as u32)
    }

    #[inline]
    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.0.view()
    }

    /// Number of pixels in the grid, foreground or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn moments(&self) -> Moments {
        self.0
            .indexed_iter()
            .filter(|(_, &v)| v != 0)
            .fold(Moments::default(), |mut m, ((r, c), _)| {
                m.m00 += 1.0;
                m.m10 += c as f64;
                m.m01 += r as f64;
                m
            })
    }

    /// Foreground pixel positions as `(row, col)`.
    pub fn foreground(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0
            .indexed_iter()
            .filter(|(_, &v)| v != 0)
            .map(|(idx, _)| idx)
    }

    /// Intersection-over-union of two masks on the same grid; masks on
    /// different grids or with an empty union score 0.
    pub fn iou(&self, other: &Mask) -> f32 {
        if self.0.dim() != other.0.dim() {
            return 0.0;
        }

        let (intersection, union) = Zip::from(&self.0).and(&other.0).fold(
            (0u64, 0u64),
            |(i, u), &a, &b| (i + (a & b) as u64, u + (a | b) as u64),
        );

        if union == 0 {
            0.0
        } else {
            intersection as f32 / union as f32
        }
    }

    /// Sub-mask covered by `bbox`.
    pub fn crop(&self, bbox: &BBox<Ltrb>) -> Mask {
        let (h, w) = self.0.dim();
        let ((r0, r1), (c0, c1)) = bbox.pixel_span(h, w);

        Mask(self.0.slice(ndarray::s![r0..r1, c0..c1]).to_owned())
    }

    pub fn resize_nearest(&self, height: u32, width: u32) -> Mask {
        let (h, w) = self.dims();
        if (h, w) == (height, width) {
            return self.clone();
        }

        let img = GrayImage::from_fn(w, h, |x, y| Luma([self.0[[y as usize, x as usize]]]));
        let resized = imageops::resize(&img, width, height, imageops::FilterType::Nearest);

        Mask(Array2::from_shape_fn(
            (height as usize, width as usize),
            |(r, c)| resized.get_pixel(c as u32, r as u32)[0],
        ))
    }

    /// IoU after bringing both masks onto the grid of the larger one.
    /// Zero if either mask has no pixels at all.
    pub fn resampled_iou(&self, other: &Mask) -> f32 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }

        if self.0.dim() == other.0.dim() {
            return self.iou(other);
        }

        if self.len() > other.len() {
            let (h, w) = self.dims();
            self.iou(&other.resize_nearest(h, w))
        } else {
            let (h, w) = other.dims();
            self.resize_nearest(h, w).iou(other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(h: u32, w: u32, l: f32, t: f32, r: f32, b: f32) -> Mask {
        Mask::from_bbox(h, w, &BBox::ltrb(l, t, r, b))
    }

    #[test]
    fn rle_encode_decode() {
        let mask = rect(6, 5, 1.0, 2.0, 4.0, 5.0);
        let rle = Rle::encode(&mask);

        assert_eq!(rle.dims(), (6, 5));
        assert_eq!(rle.area(), 9);
        assert_eq!(rle.decode(), mask);
    }

    #[test]
    fn compressed_string_matches_pycocotools() {
        // pycocotools.mask.encode of a 4x4 mask with a 2x2 block at rows 1..3, cols 1..3
        let rle = Rle::from_compressed(4, 4, "52203").unwrap();
        assert_eq!(rle.counts(), &[5, 2, 2, 2, 5]);

        let mask = rle.decode();
        assert_eq!(mask, rect(4, 4, 1.0, 1.0, 3.0, 3.0));
        assert_eq!(rle.to_compressed(), "52203");
    }

    #[test]
    fn rle_from_json() {
        let rle: Rle = serde_json::from_str(r#"{"size": [4, 4], "counts": [5, 2, 2, 2, 5]}"#).unwrap();
        let compressed: Rle = serde_json::from_str(r#"{"size": [4, 4], "counts": "52203"}"#).unwrap();
        assert_eq!(rle, compressed);

        let json = serde_json::to_string(&rle).unwrap();
        assert_eq!(json, r#"{"size":[4,4],"counts":"52203"}"#);
    }

    #[test]
    fn rle_rejects_wrong_pixel_count() {
        assert!(Rle::new(4, 4, vec![5, 2]).is_err());
        assert!(serde_json::from_str::<Rle>(r#"{"size": [2, 2], "counts": [1, 1]}"#).is_err());
        assert!(Rle::from_compressed(4, 4, "5 2").is_err());
    }

    #[test]
    fn large_runs_roundtrip_through_string() {
        let counts = vec![1000, 37, 963, 4000, 0, 2000];
        let rle = Rle::new(100, 80, counts.clone()).unwrap();
        let parsed = Rle::from_compressed(100, 80, &rle.to_compressed()).unwrap();

        assert_eq!(parsed.counts(), counts.as_slice());
    }

    #[test]
    fn moments_and_centroid() {
        let mask = rect(10, 10, 2.0, 4.0, 5.0, 6.0);
        let m = mask.moments();

        assert_eq!(m.m00, 6.0);
        assert_eq!(m.centroid(), Some(na::Point2::new(3.0, 4.5)));
        assert_eq!(Mask::zeros(3, 3).moments().centroid(), None);
    }

    #[test]
    fn iou_bounds() {
        let a = rect(10, 10, 0.0, 0.0, 4.0, 4.0);
        let b = rect(10, 10, 2.0, 0.0, 6.0, 4.0);
        let c = rect(10, 10, 6.0, 6.0, 8.0, 8.0);

        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&c), 0.0);
        assert!((a.iou(&b) - 8.0 / 24.0).abs() < 1e-6);
        assert_eq!(Mask::zeros(10, 10).iou(&Mask::zeros(10, 10)), 0.0);
        assert_eq!(a.iou(&Mask::zeros(5, 5)), 0.0);
    }

    #[test]
    fn crop_and_resample() {
        let small = rect(20, 20, 2.0, 2.0, 6.0, 6.0);
        let large = rect(20, 20, 10.0, 10.0, 18.0, 18.0);

        let small_crop = small.crop(&BBox::ltrb(2.0, 2.0, 5.0, 5.0));
        let large_crop = large.crop(&BBox::ltrb(10.0, 10.0, 17.0, 17.0));
        assert_eq!(small_crop.dims(), (5, 5));
        assert_eq!(large_crop.dims(), (9, 9));

        let resized = small_crop.resize_nearest(9, 9);
        assert_eq!(resized.dims(), (9, 9));

        let iou = small_crop.resampled_iou(&large_crop);
        assert!((0.0..=1.0).contains(&iou));
        assert!(iou > 0.5);
        assert_eq!(small_crop.resampled_iou(&Mask::zeros(0, 0)), 0.0);
    }
}
