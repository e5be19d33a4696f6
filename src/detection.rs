use std::fmt;
use std::rc::Rc;

use image::RgbImage;
use nalgebra as na;
use ndarray::Array1;
use once_cell::unsync::OnceCell;

use crate::bbox::{BBox, Ltrb};
use crate::color::{self, ColorHistogram};
use crate::config::AppearanceFeature;
use crate::mask::{Mask, Moments, Rle};

/// One object observation in one frame.
///
/// Derived features (decoded mask, moments, color histogram) are computed on
/// first use and kept until [`Detection::clear_cache`].
#[derive(Clone)]
pub struct Detection {
    pub bbox: BBox<Ltrb>,
    pub score: f32,
    pub label: u32,
    pub timestamp: u32,
    pub mask: Rle,
    pub feature: Option<Array1<f32>>,

    /// Id of the track this detection was assigned to.
    pub track: Option<u32>,

    image: Option<Rc<RgbImage>>,
    // (height, width)
    image_dims: (u32, u32),

    decoded_mask: OnceCell<Mask>,
    moments: OnceCell<Moments>,
    histogram: OnceCell<ColorHistogram>,
}

impl fmt::Debug for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detection")
            .field("bbox", &self.bbox)
            .field("score", &self.score)
            .field("label", &self.label)
            .field("timestamp", &self.timestamp)
            .field("track", &self.track)
            .field("image_dims", &self.image_dims)
            .finish()
    }
}

impl Detection {
    pub fn new(
        bbox: BBox<Ltrb>,
        score: f32,
        label: u32,
        timestamp: u32,
        image: Rc<RgbImage>,
        mask: Rle,
        feature: Option<Array1<f32>>,
    ) -> Self {
        let (width, height) = image.dimensions();

        Self {
            bbox,
            score,
            label,
            timestamp,
            mask,
            feature,
            track: None,
            image: Some(image),
            image_dims: (height, width),
            decoded_mask: OnceCell::new(),
            moments: OnceCell::new(),
            histogram: OnceCell::new(),
        }
    }

    #[inline]
    pub fn image(&self) -> Option<&RgbImage> {
        self.image.as_deref()
    }

    /// Length of the source image diagonal in pixels.
    #[inline]
    pub fn diagonal(&self) -> f32 {
        let (h, w) = self.image_dims;
        ((h as f32).powi(2) + (w as f32).powi(2)).sqrt()
    }

    pub fn decoded_mask(&self) -> &Mask {
        self.decoded_mask.get_or_init(|| self.mask.decode())
    }

    pub fn moments(&self) -> Moments {
        *self.moments.get_or_init(|| self.decoded_mask().moments())
    }

    /// Mask center of mass; `None` if the mask is empty.
    pub fn centroid(&self) -> Option<na::Point2<f32>> {
        self.moments().centroid()
    }

    #[inline]
    pub fn box_centroid(&self) -> na::Point2<f32> {
        self.bbox.center()
    }

    /// Mask pixel count.
    pub fn area(&self) -> f64 {
        self.moments().m00
    }

    #[inline]
    pub fn box_area(&self) -> f32 {
        self.bbox.area()
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        self.decoded_mask().iou(other.decoded_mask())
    }

    /// IoU of the masks cropped to their own boxes, resampled onto the
    /// larger crop's grid when the crops differ in shape.
    pub fn cropped_iou(&self, other: &Detection) -> f32 {
        let mask = self.decoded_mask().crop(&self.bbox);
        let other_mask = other.decoded_mask().crop(&other.bbox);

        mask.resampled_iou(&other_mask)
    }

    /// `None` once the source image has been released.
    pub fn color_histogram(&self) -> Option<&ColorHistogram> {
        if let Some(hist) = self.histogram.get() {
            return Some(hist);
        }

        let image = self.image.as_deref()?;
        Some(
            self.histogram
                .get_or_init(|| ColorHistogram::from_masked(image, self.decoded_mask())),
        )
    }

    /// Appearance distance of the requested kind, `None` if either side lacks
    /// the data to compute it.
    pub fn appearance_distance(&self, other: &Detection, kind: AppearanceFeature) -> Option<f32> {
        match kind {
            AppearanceFeature::Mask => {
                let (a, b) = (self.feature.as_ref()?, other.feature.as_ref()?);
                color::cosine_distance(a.view(), b.view())
            }
            AppearanceFeature::Histogram => {
                let (a, b) = (self.color_histogram()?, other.color_histogram()?);
                Some(a.chi_square_distance(b))
            }
        }
    }

    pub fn clear_cache(&mut self) {
        self.decoded_mask.take();
        self.moments.take();
        self.histogram.take();
    }

    /// Drops the reference to the source frame. Geometry keeps working, the
    /// color histogram becomes unavailable unless it was already computed.
    pub fn release_image(&mut self) {
        self.image = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn detection(image: &Rc<RgbImage>, l: f32, t: f32, r: f32, b: f32) -> Detection {
        let (w, h) = image.dimensions();
        let bbox = BBox::ltrb(l, t, r, b);
        let mask = Rle::encode(&Mask::from_bbox(h, w, &bbox));

        Detection::new(bbox, 0.9, 1, 0, image.clone(), mask, None)
    }

    #[test]
    fn geometry() {
        let image = Rc::new(RgbImage::new(40, 30));
        let det = detection(&image, 10.0, 10.0, 20.0, 16.0);

        assert_eq!(det.box_centroid(), na::Point2::new(15.0, 13.0));
        assert_eq!(det.box_area(), 60.0);
        assert_eq!(det.area(), 60.0);
        assert_eq!(det.centroid(), Some(na::Point2::new(14.5, 12.5)));
        assert_relative_eq!(det.diagonal(), 50.0);
    }

    #[test]
    fn empty_mask_has_no_centroid() {
        let image = Rc::new(RgbImage::new(10, 10));
        let det = Detection::new(
            BBox::ltrb(0.0, 0.0, 5.0, 5.0),
            0.9,
            1,
            0,
            image,
            Rle::encode(&Mask::zeros(10, 10)),
            None,
        );

        assert_eq!(det.area(), 0.0);
        assert_eq!(det.centroid(), None);
    }

    #[test]
    fn iou_and_cropped_iou() {
        let image = Rc::new(RgbImage::new(64, 64));
        let a = detection(&image, 4.0, 4.0, 12.0, 12.0);
        let b = detection(&image, 40.0, 40.0, 48.0, 48.0);
        let c = detection(&image, 30.0, 30.0, 46.0, 46.0);

        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), 0.0);

        // same shape at different places lines up once cropped
        assert!(a.cropped_iou(&b) > 0.9);
        let scaled = a.cropped_iou(&c);
        assert!((0.0..=1.0).contains(&scaled));
    }

    #[test]
    fn histogram_requires_image() {
        let image = Rc::new(RgbImage::from_pixel(8, 8, image::Rgb([10, 200, 30])));
        let mut a = detection(&image, 0.0, 0.0, 4.0, 4.0);
        let b = detection(&image, 4.0, 4.0, 8.0, 8.0);

        assert_eq!(a.appearance_distance(&b, AppearanceFeature::Histogram), Some(0.0));
        assert_eq!(a.appearance_distance(&b, AppearanceFeature::Mask), None);

        a.clear_cache();
        a.release_image();
        assert!(a.color_histogram().is_none());
        assert_eq!(a.area(), 16.0);
    }

    #[test]
    fn feature_distance() {
        let image = Rc::new(RgbImage::new(8, 8));
        let mut a = detection(&image, 0.0, 0.0, 4.0, 4.0);
        let mut b = detection(&image, 4.0, 4.0, 8.0, 8.0);
        a.feature = Some(Array1::from(vec![1.0, 0.0]));
        b.feature = Some(Array1::from(vec![0.0, 1.0]));

        let d = a.appearance_distance(&b, AppearanceFeature::Mask).unwrap();
        assert_relative_eq!(d, 1.0);
    }
}
