//! Greedy frame-to-frame association of detections to tracks.
//!
//! Tracks are grouped by the timestamp of their last detection and the groups
//! are matched newest first, so a track continued in the previous frame claims
//! ambiguous detections before a track that has been skipped for a while.
//! Inside a group every track runs through three stages:
//!
//! 1. area-ratio gate against the track's last mask area,
//! 2. distance/label filter, then commit on a clear IoU winner,
//! 3. commit on a clear appearance winner among the remaining IoU candidates.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use nalgebra as na;

use crate::config::TrackerConfig;
use crate::{Detection, Track};

#[derive(Debug, Clone)]
enum IndexedSliceKind {
    All,
    Indexes(Vec<usize>),
}

/// Borrowed view of a subset of a slice that remembers where each element
/// came from.
pub struct IndexedSlice<'a, T> {
    pub slice: &'a [T],
    kind: IndexedSliceKind,
}

impl<'a, T> IndexedSlice<'a, T> {
    pub fn new(slice: &'a [T]) -> Self {
        Self {
            slice,
            kind: IndexedSliceKind::All,
        }
    }

    pub fn new_with_indexes(slice: &'a [T], idx: Vec<usize>) -> Self {
        Self {
            slice,
            kind: IndexedSliceKind::Indexes(idx),
        }
    }

    /// Position in the underlying slice of the `idx`-th element of the view.
    #[inline]
    pub fn get_index(&self, idx: usize) -> usize {
        match &self.kind {
            IndexedSliceKind::All => idx,
            IndexedSliceKind::Indexes(idxs) => idxs[idx],
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<&'a T> {
        match &self.kind {
            IndexedSliceKind::All => self.slice.get(idx),
            IndexedSliceKind::Indexes(idxs) => self.slice.get(*idxs.get(idx)?),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match &self.kind {
            IndexedSliceKind::All => self.slice.len(),
            IndexedSliceKind::Indexes(idxs) => idxs.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a T> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

impl<'a, T> std::ops::Index<usize> for IndexedSlice<'a, T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.slice[self.get_index(index)]
    }
}

/// Whether two mask areas are within `(ratio, 1 / ratio)` of each other.
/// Symmetric in its two area arguments.
#[inline]
pub fn area_ratio_ok(track_area: f64, area: f64, ratio: f32) -> bool {
    let ratio = ratio as f64;

    track_area > 0.0 && area > 0.0 && area / track_area > ratio && track_area / area > ratio
}

/// Box-centroid distance as a fraction of the candidate's image diagonal.
pub fn track_distance(last: &Detection, detection: &Detection) -> f32 {
    na::distance(&last.box_centroid(), &detection.box_centroid()) / detection.diagonal()
}

/// Assigns each detection to at most one track and each track to at most
/// one detection.
///
/// Returns, for every detection, the position in `tracks.slice` of the track
/// it was matched to.
pub fn match_detections(
    tracks: &IndexedSlice<'_, Track>,
    detections: &[Detection],
    config: &TrackerConfig,
) -> Vec<Option<usize>> {
    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for i in 0..tracks.len() {
        if let Some(ts) = tracks[i].last_timestamp() {
            groups.entry(ts).or_default().push(tracks.get_index(i));
        }
    }

    let mut matched = vec![None; detections.len()];
    let mut unmatched: Vec<usize> = (0..detections.len()).collect();

    for (ts, mut group) in groups.into_iter().rev() {
        if unmatched.is_empty() {
            break;
        }

        group.sort_by_key(|&i| tracks.slice[i].id);
        let group = IndexedSlice::new_with_indexes(tracks.slice, group);
        let pool = IndexedSlice::new_with_indexes(detections, unmatched);

        let assignment = match_single_timestamp(&group, &pool, config);

        let mut remaining = Vec::with_capacity(pool.len());
        for (k, track) in assignment.into_iter().enumerate() {
            let det = pool.get_index(k);
            match track {
                Some(t) => matched[det] = Some(t),
                None => remaining.push(det),
            }
        }

        log::trace!(
            "group ts={}: {} tracks, {} of {} detections matched",
            ts,
            group.len(),
            pool.len() - remaining.len(),
            pool.len()
        );

        unmatched = remaining;
    }

    matched
}

/// Matches one recency group. The result is indexed like `dets` and holds
/// positions in `tracks.slice`.
fn match_single_timestamp(
    tracks: &IndexedSlice<'_, Track>,
    dets: &IndexedSlice<'_, Detection>,
    config: &TrackerConfig,
) -> Vec<Option<usize>> {
    let mut matched: Vec<Option<usize>> = vec![None; dets.len()];

    // candidates are visited highest score first
    let mut by_score: Vec<usize> = (0..dets.len()).collect();
    by_score.sort_by(|&a, &b| {
        dets[b]
            .score
            .partial_cmp(&dets[a].score)
            .unwrap_or(Ordering::Equal)
    });

    let last: Vec<Option<&Detection>> = tracks.iter().map(Track::last_detection).collect();

    // Stage 1: similar mask areas only
    let mut candidates: Vec<Vec<usize>> = last
        .iter()
        .map(|last| match last {
            Some(last) if last.area() > 0.0 => {
                let track_area = last.area();
                by_score
                    .iter()
                    .copied()
                    .filter(|&d| area_ratio_ok(track_area, dets[d].area(), config.area_ratio))
                    .collect()
            }
            _ => Vec::new(),
        })
        .collect();

    // Stage 2: nearby same-label candidates ranked by mask IoU
    for t in 0..tracks.len() {
        let Some(last) = last[t] else { continue };

        let mut ious: Vec<(usize, f32)> = candidates[t]
            .iter()
            .copied()
            .filter(|&d| {
                matched[d].is_none()
                    && (config.ignore_labels || last.label == dets[d].label)
                    && track_distance(last, &dets[d]) <= config.spatial_dist_max
            })
            .map(|d| (d, last.iou(&dets[d])))
            .collect();

        if ious.is_empty() {
            candidates[t].clear();
            continue;
        }

        ious.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let (best, best_iou) = ious[0];
        let second_iou = ious.get(1).map_or(0.0, |x| x.1);

        if best_iou - second_iou > config.iou_gap_min {
            matched[best] = Some(tracks.get_index(t));
            candidates[t].clear();
        } else {
            candidates[t] = ious
                .into_iter()
                .filter(|&(_, iou)| iou >= config.iou_min)
                .map(|(d, _)| d)
                .collect();
        }
    }

    // Stage 3: disambiguate the remaining candidates by appearance
    for t in 0..tracks.len() {
        candidates[t].retain(|&d| matched[d].is_none());
        let Some(last) = last[t] else { continue };
        if candidates[t].is_empty() {
            continue;
        }

        let mut distances: Vec<(usize, f32)> = candidates[t]
            .iter()
            .filter_map(|&d| {
                last.appearance_distance(&dets[d], config.appearance_feature)
                    .map(|dist| (d, dist))
            })
            .collect();

        if distances.is_empty() {
            continue;
        }

        distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        let (best, best_distance) = distances[0];
        let second_distance = distances.get(1).map_or(f32::INFINITY, |x| x.1);

        if second_distance - best_distance > config.appearance_gap {
            matched[best] = Some(tracks.get_index(t));
            candidates[t].clear();
        }
    }

    matched
}
