use std::collections::HashSet;

use crate::config::TrackerConfig;
use crate::error::Error;
use crate::matching::{self, IndexedSlice};
use crate::{Detection, Frame, Track};

/// Lifecycle of one track identity as seen from the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Matched in the current frame
    Active,
    /// Unmatched for this many consecutive frames, still eligible for matching
    Skipped(u32),
    /// Out of the matching pool for good
    Retired,
}

/// Frame-by-frame driver owning every track of one video sequence.
pub struct Scene {
    config: TrackerConfig,
    // every track ever born, in birth order
    tracks: Vec<Track>,
    // positions in `tracks` of active and skipped tracks
    active: Vec<usize>,
    next_id: u32,
    timestamp: Option<u32>,
}

impl Scene {
    pub fn new(config: TrackerConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            config,
            tracks: Vec::with_capacity(64),
            active: Vec::with_capacity(32),
            next_id: 0,
            timestamp: None,
        })
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Timestamp of the last processed frame.
    #[inline]
    pub fn timestamp(&self) -> Option<u32> {
        self.timestamp
    }

    pub fn update(&mut self, frame: &Frame) -> Result<(), Error> {
        let detections = frame.detections(&self.config)?;
        self.update_detections(frame.timestamp, detections)
    }

    /// Advances the scene by one frame. Every detection must carry the frame
    /// timestamp; those below `score_continue_min` or of a label other than
    /// `filter_label` are dropped before matching.
    pub fn update_detections(
        &mut self,
        timestamp: u32,
        mut detections: Vec<Detection>,
    ) -> Result<(), Error> {
        if let Some(previous) = self.timestamp {
            if timestamp <= previous {
                return Err(Error::NonMonotonicTimestamp {
                    previous,
                    current: timestamp,
                });
            }
        }

        if let Some(det) = detections.iter().find(|d| d.timestamp != timestamp) {
            return Err(Error::DetectionTimestamp {
                timestamp,
                detection: det.timestamp,
            });
        }
        self.timestamp = Some(timestamp);

        let config = &self.config;
        detections.retain(|d| {
            let keep = d.score >= config.score_continue_min
                && config.filter_label.map_or(true, |l| l == d.label);
            if !keep {
                log::trace!(
                    "frame {}: ignored detection with score {:.3}, label {}",
                    timestamp,
                    d.score,
                    d.label
                );
            }
            keep
        });

        let assignment = {
            let pool = IndexedSlice::new_with_indexes(&self.tracks, self.active.clone());
            matching::match_detections(&pool, &detections, &self.config)
        };

        let total = detections.len();
        let mut continued = Vec::with_capacity(total);
        let mut matched = 0;

        for (detection, track) in detections.into_iter().zip(assignment) {
            match track {
                Some(idx) => {
                    self.tracks[idx].add_detection(detection);
                    continued.push(idx);
                    matched += 1;
                }
                None if detection.score >= self.config.score_init_min => {
                    log::debug!("frame {}: track {} born", timestamp, self.next_id);

                    continued.push(self.tracks.len());
                    self.tracks.push(Track::new(self.next_id, detection));
                    self.next_id += 1;
                }
                None => {
                    log::trace!(
                        "frame {}: dropped unmatched detection with score {:.3}",
                        timestamp,
                        detection.score
                    );
                }
            }
        }

        let continued_set: HashSet<usize> = continued.iter().copied().collect();
        let mut active = continued;

        for &idx in &self.active {
            if continued_set.contains(&idx) {
                continue;
            }

            let track = &mut self.tracks[idx];
            let missed = track
                .last_timestamp()
                .map_or(u32::MAX, |ts| timestamp.saturating_sub(ts));

            if missed <= self.config.frames_skip_max {
                active.push(idx);
            } else {
                log::debug!("frame {}: track {} retired", timestamp, track.id);
                track.retire();
            }
        }

        log::debug!(
            "frame {}: {} detections, {} matched, {} tracks in pool",
            timestamp,
            total,
            matched,
            active.len()
        );

        self.active = active;

        Ok(())
    }

    /// Tracks still eligible for matching.
    pub fn active_tracks(&self) -> impl Iterator<Item = &Track> + '_ {
        self.active.iter().map(move |&i| &self.tracks[i])
    }

    /// Every track born so far, retired ones included, in birth order.
    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_state(&self, id: u32) -> Option<TrackState> {
        let idx = self.tracks.iter().position(|t| t.id == id)?;

        if !self.active.contains(&idx) {
            return Some(TrackState::Retired);
        }

        let last = self.tracks[idx].last_timestamp()?;
        match self.timestamp.map(|ts| ts - last) {
            Some(0) | None => Some(TrackState::Active),
            Some(missed) => Some(TrackState::Skipped(missed)),
        }
    }

    /// Retires every remaining track and hands over the full track list.
    pub fn finish(mut self) -> Vec<Track> {
        for idx in self.active.drain(..) {
            self.tracks[idx].retire();
        }

        self.tracks
    }
}
