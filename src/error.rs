use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid tracker config: {0}")]
    InvalidConfig(String),

    #[error(
        "Frame {timestamp}: mismatched prediction lengths \
         (boxes: {boxes}, masks: {masks}, labels: {labels}, features: {features:?})"
    )]
    MismatchedLengths {
        timestamp: u32,
        boxes: usize,
        masks: usize,
        labels: usize,
        features: Option<usize>,
    },

    #[error("Invalid RLE: {0}")]
    InvalidRle(String),

    #[error("Frame {timestamp}: mask size {actual:?} does not match image size {expected:?}")]
    MaskSize {
        timestamp: u32,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Frame {timestamp}: appearance feature `mask` requires per-detection feature vectors")]
    MissingFeatures { timestamp: u32 },

    #[error("Frame {timestamp}: feature vector {index} has length {actual}, expected {expected}")]
    FeatureLength {
        timestamp: u32,
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Frame {timestamp}: detection carries timestamp {detection}")]
    DetectionTimestamp { timestamp: u32, detection: u32 },

    #[error("Frame timestamps must increase: got {current} after {previous}")]
    NonMonotonicTimestamp { previous: u32, current: u32 },

    #[error("No tracks passed the MOT export filter")]
    NoTracks,

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
}
