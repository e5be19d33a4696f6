//! MOT challenge text output:
//! `frame,track_id,left,top,width,height,confidence,x,y,z`, with the 3D
//! fields always `-1`.

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::Error;
use crate::{Detection, Track};

const PERSON: &str = "person";
// a track needs more detections than this to be reported
const MIN_TRACK_LEN: usize = 4;
const MIN_PEAK_SCORE: f32 = 0.5;

/// Person tracks that are long enough and confident at least once.
pub fn is_reportable(track: &Track, label_names: &[&str]) -> bool {
    let is_person = track
        .last_detection()
        .and_then(|d| label_names.get(d.label as usize))
        .map_or(false, |&name| name == PERSON);

    is_person
        && track.len() > MIN_TRACK_LEN
        && track.detections.iter().any(|d| d.score >= MIN_PEAK_SCORE)
}

/// Writes one line per (frame, track) of every reportable track, ordered by
/// frame. `frame_number` maps a timestamp to the frame number written out.
///
/// Returns the number of lines written.
pub fn write_tracks<W, F>(
    mut writer: W,
    tracks: &[Track],
    label_names: &[&str],
    frame_number: F,
) -> Result<usize, Error>
where
    W: Write,
    F: Fn(u32) -> u64,
{
    let mut by_frame: BTreeMap<u32, Vec<(u32, &Detection)>> = BTreeMap::new();
    for track in tracks.iter().filter(|t| is_reportable(t, label_names)) {
        for detection in &track.detections {
            by_frame
                .entry(detection.timestamp)
                .or_default()
                .push((track.id, detection));
        }
    }

    if by_frame.is_empty() {
        log::warn!("None of {} tracks qualify for MOT output", tracks.len());
        return Err(Error::NoTracks);
    }

    let mut lines = 0;
    for (timestamp, detections) in by_frame {
        for (track_id, detection) in detections {
            let ltwh = detection.bbox.as_ltwh();
            writeln!(
                writer,
                "{},{},{},{},{},{},{},-1,-1,-1",
                frame_number(timestamp),
                track_id,
                ltwh.left(),
                ltwh.top(),
                ltwh.width(),
                ltwh.height(),
                detection.score,
            )?;
            lines += 1;
        }
    }
    writer.flush()?;

    Ok(lines)
}
