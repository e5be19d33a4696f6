use std::rc::Rc;

use image::RgbImage;
use ndarray::Array1;
use serde::{Deserialize, Deserializer};
use serde_derive::{Deserialize, Serialize};

use crate::bbox::BBox;
use crate::config::{AppearanceFeature, TrackerConfig};
use crate::error::Error;
use crate::mask::Rle;
use crate::Detection;

/// Raw detector output for one frame. Lists are parallel: entry `i` of each
/// describes the same object. A frame without predictions is an empty record.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Predictions {
    /// `[x1, y1, x2, y2, score]`
    #[serde(deserialize_with = "null_as_empty")]
    pub boxes: Vec<[f32; 5]>,
    #[serde(deserialize_with = "null_as_empty")]
    pub segmentations: Vec<Rle>,
    #[serde(deserialize_with = "null_as_empty")]
    pub labels: Vec<u32>,
    pub features: Option<Vec<Vec<f32>>>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Predictions {
    #[inline]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

pub struct Frame {
    pub timestamp: u32,
    pub image: Rc<RgbImage>,
    pub predictions: Predictions,
}

impl Frame {
    pub fn new(timestamp: u32, image: Rc<RgbImage>, predictions: Predictions) -> Self {
        Self {
            timestamp,
            image,
            predictions,
        }
    }

    /// `(height, width)`
    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        let (w, h) = self.image.dimensions();
        (h, w)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    fn validate(&self, config: &TrackerConfig) -> Result<(), Error> {
        let p = &self.predictions;
        let features = p.features.as_ref().map(Vec::len);

        if p.segmentations.len() != p.len()
            || p.labels.len() != p.len()
            || features.map_or(false, |n| n != p.len())
        {
            return Err(Error::MismatchedLengths {
                timestamp: self.timestamp,
                boxes: p.len(),
                masks: p.segmentations.len(),
                labels: p.labels.len(),
                features,
            });
        }

        if let Some(vectors) = &p.features {
            let expected = vectors.first().map_or(0, Vec::len);
            if let Some((index, v)) = vectors
                .iter()
                .enumerate()
                .find(|(_, v)| v.len() != expected || v.is_empty())
            {
                return Err(Error::FeatureLength {
                    timestamp: self.timestamp,
                    index,
                    expected,
                    actual: v.len(),
                });
            }
        }

        let expected = self.dims();
        if let Some(rle) = p.segmentations.iter().find(|rle| rle.dims() != expected) {
            return Err(Error::MaskSize {
                timestamp: self.timestamp,
                expected,
                actual: rle.dims(),
            });
        }

        if config.appearance_feature == AppearanceFeature::Mask && features.is_none() && !p.is_empty()
        {
            return Err(Error::MissingFeatures {
                timestamp: self.timestamp,
            });
        }

        Ok(())
    }

    /// Builds the detections that take part in matching: scores below
    /// `score_continue_min` and labels other than `filter_label` are dropped.
    pub fn detections(&self, config: &TrackerConfig) -> Result<Vec<Detection>, Error> {
        self.validate(config)?;

        if self.predictions.is_empty() {
            log::warn!("No predictions for frame {}", self.timestamp);
            return Ok(Vec::new());
        }

        let p = &self.predictions;
        let use_features = config.appearance_feature == AppearanceFeature::Mask;

        let detections = (0..p.len())
            .filter(|&i| p.boxes[i][4] >= config.score_continue_min)
            .filter(|&i| config.filter_label.map_or(true, |l| l == p.labels[i]))
            .map(|i| {
                let [x1, y1, x2, y2, score] = p.boxes[i];
                let feature = p
                    .features
                    .as_ref()
                    .filter(|_| use_features)
                    .map(|f| Array1::from(f[i].clone()));

                Detection::new(
                    BBox::ltrb(x1, y1, x2, y2),
                    score,
                    p.labels[i],
                    self.timestamp,
                    self.image.clone(),
                    p.segmentations[i].clone(),
                    feature,
                )
            })
            .collect();

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::Mask;

    fn predictions(scores: &[f32]) -> Predictions {
        let rle = Rle::encode(&Mask::from_bbox(20, 30, &BBox::ltrb(2.0, 2.0, 8.0, 8.0)));

        Predictions {
            boxes: scores.iter().map(|&s| [2.0, 2.0, 8.0, 8.0, s]).collect(),
            segmentations: vec![rle; scores.len()],
            labels: (0..scores.len() as u32).collect(),
            features: None,
        }
    }

    fn frame(predictions: Predictions) -> Frame {
        Frame::new(3, Rc::new(RgbImage::new(30, 20)), predictions)
    }

    #[test]
    fn filters_low_scores_and_labels() {
        let frame = frame(predictions(&[0.95, 0.5, 0.7, 0.8]));
        let config = TrackerConfig::default();

        let dets = frame.detections(&config).unwrap();
        let scores: Vec<f32> = dets.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.95, 0.7, 0.8]);
        assert!(dets.iter().all(|d| d.timestamp == 3 && d.track.is_none()));

        let config = TrackerConfig {
            filter_label: Some(3),
            ..Default::default()
        };
        let dets = frame.detections(&config).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, 3);
    }

    #[test]
    fn missing_predictions_are_empty() {
        let p: Predictions = serde_json::from_str("{}").unwrap();
        let frame = frame(p);

        assert!(frame.detections(&TrackerConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn null_lists_are_empty() {
        let p: Predictions =
            serde_json::from_str(r#"{"boxes": null, "segmentations": null, "labels": null, "features": null}"#)
                .unwrap();
        assert!(p.is_empty());
        assert_eq!(p, Predictions::default());

        assert!(frame(p).detections(&TrackerConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn feature_vectors_must_share_length() {
        let config = TrackerConfig {
            appearance_feature: AppearanceFeature::Mask,
            ..Default::default()
        };
        let mut p = predictions(&[0.9, 0.9, 0.9]);
        p.features = Some(vec![vec![1.0, 0.0], vec![0.0, 1.0, 0.0], vec![1.0, 1.0]]);

        match frame(p).detections(&config) {
            Err(Error::FeatureLength {
                timestamp,
                index,
                expected,
                actual,
            }) => {
                assert_eq!((timestamp, index, expected, actual), (3, 1, 2, 3));
            }
            other => panic!("unexpected result: {:?}", other.map(|d| d.len())),
        }

        let mut p = predictions(&[0.9]);
        p.features = Some(vec![Vec::new()]);
        assert!(matches!(
            frame(p).detections(&config),
            Err(Error::FeatureLength { actual: 0, .. })
        ));
    }

    #[test]
    fn mismatched_lengths_fail() {
        let mut p = predictions(&[0.9, 0.9]);
        p.labels.pop();

        match frame(p).detections(&TrackerConfig::default()) {
            Err(Error::MismatchedLengths {
                timestamp, labels, ..
            }) => {
                assert_eq!(timestamp, 3);
                assert_eq!(labels, 1);
            }
            other => panic!("unexpected result: {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn mask_size_must_match_image() {
        let mut p = predictions(&[0.9]);
        p.segmentations[0] = Rle::encode(&Mask::zeros(10, 10));

        assert!(matches!(
            frame(p).detections(&TrackerConfig::default()),
            Err(Error::MaskSize { .. })
        ));
    }

    #[test]
    fn mask_features_are_required() {
        let config = TrackerConfig {
            appearance_feature: AppearanceFeature::Mask,
            ..Default::default()
        };
        assert!(matches!(
            frame(predictions(&[0.9])).detections(&config),
            Err(Error::MissingFeatures { timestamp: 3 })
        ));

        let mut p = predictions(&[0.9]);
        p.features = Some(vec![vec![0.5, 0.5]]);
        let dets = frame(p).detections(&config).unwrap();
        assert_eq!(dets[0].feature.as_ref().map(|f| f.len()), Some(2));
    }
}
