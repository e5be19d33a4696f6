use crate::Detection;
use nalgebra as na;

// number of most recent detections used for the velocity estimate
const VELOCITY_HISTORY: usize = 5;

#[derive(Debug, Clone)]
pub struct Track {
    pub id: u32,
    pub detections: Vec<Detection>,

    // box-centroid displacement in px per frame, informational only
    pub velocity: Option<na::Vector2<f32>>,
}

impl Track {
    pub fn new(id: u32, detection: Detection) -> Self {
        let mut track = Self {
            id,
            detections: Vec::with_capacity(16),
            velocity: None,
        };
        track.add_detection(detection);
        track
    }

    /// Appends a detection from a later frame and claims it for this track.
    ///
    /// The previous last detection is never matched against again, so its
    /// derived features and image reference are released.
    pub fn add_detection(&mut self, mut detection: Detection) {
        debug_assert!(self
            .last_timestamp()
            .map_or(true, |ts| ts < detection.timestamp));

        if let Some(prev) = self.detections.last_mut() {
            prev.clear_cache();
            prev.release_image();
        }

        detection.track = Some(self.id);
        self.detections.push(detection);
        self.update_velocity();
    }

    #[inline]
    pub fn last_detection(&self) -> Option<&Detection> {
        self.detections.last()
    }

    #[inline]
    pub fn last_timestamp(&self) -> Option<u32> {
        self.detections.last().map(|d| d.timestamp)
    }

    #[inline]
    pub fn first_timestamp(&self) -> Option<u32> {
        self.detections.first().map(|d| d.timestamp)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Releases everything cached by the remaining detection once the track
    /// leaves the matching pool.
    pub fn retire(&mut self) {
        if let Some(last) = self.detections.last_mut() {
            last.clear_cache();
            last.release_image();
        }
    }

    fn update_velocity(&mut self) {
        if self.detections.len() <= 2 {
            return;
        }

        let history = (self.detections.len() - 1).min(VELOCITY_HISTORY);
        let recent = &self.detections[self.detections.len() - history..];

        let velocities: Vec<na::Vector2<f32>> = recent
            .windows(2)
            .map(|w| {
                let dt = w[1].timestamp.saturating_sub(w[0].timestamp).max(1) as f32;
                (w[1].box_centroid() - w[0].box_centroid()) / dt
            })
            .collect();

        let n = velocities.len() as f32;
        let mean = velocities.iter().fold(na::Vector2::zeros(), |acc, v| acc + v) / n;
        let spread = velocities
            .iter()
            .fold(na::Vector2::<f32>::zeros(), |acc, v| {
                acc + (v - mean).component_mul(&(v - mean))
            })
            .map(|x| (x / n).sqrt());

        let limit = 0.1 * recent[recent.len() - 1].box_area();
        self.velocity = if spread.x < limit && spread.y < limit {
            Some(mean)
        } else {
            None
        };
    }
}
