use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// Appearance signal used by the last matching stage.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppearanceFeature {
    /// Cosine distance between per-detection embedding vectors
    Mask,
    /// Chi-square distance between L*a*b* color histograms of the mask pixels
    #[default]
    Histogram,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum score to start a new track
    pub score_init_min: f32,
    /// Minimum score for a detection to be considered at all
    pub score_continue_min: f32,
    /// Consecutive frames a track may go unmatched before it is retired
    pub frames_skip_max: u32,
    /// Maximum box-centroid distance between matches, as a fraction of the image diagonal
    pub spatial_dist_max: f32,
    /// Mask-area ratio between matches must lie in `(area_ratio, 1 / area_ratio)`; 0 disables
    pub area_ratio: f32,
    /// Minimum IoU for a candidate to reach the appearance stage
    pub iou_min: f32,
    /// Best IoU must beat the second best by more than this to be committed directly
    pub iou_gap_min: f32,
    /// Allow matches between different class labels
    pub ignore_labels: bool,
    pub appearance_feature: AppearanceFeature,
    /// Best appearance distance must beat the second best by more than this
    pub appearance_gap: f32,
    /// Only track detections of this label
    pub filter_label: Option<u32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            score_init_min: 0.9,
            score_continue_min: 0.7,
            frames_skip_max: 10,
            spatial_dist_max: 0.2,
            area_ratio: 0.5,
            iou_min: 0.1,
            iou_gap_min: 0.0,
            ignore_labels: false,
            appearance_feature: AppearanceFeature::Histogram,
            appearance_gap: 0.0,
            filter_label: None,
        }
    }
}

impl TrackerConfig {
    pub fn from_json(s: &str) -> Result<Self, Error> {
        let config: TrackerConfig = serde_json::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let unit = [
            ("score_init_min", self.score_init_min),
            ("score_continue_min", self.score_continue_min),
            ("area_ratio", self.area_ratio),
            ("iou_min", self.iou_min),
        ];

        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        let non_negative = [
            ("spatial_dist_max", self.spatial_dist_max),
            ("iou_gap_min", self.iou_gap_min),
            ("appearance_gap", self.appearance_gap),
        ];

        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}
