pub mod bbox;
pub mod color;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod labels;
pub mod mask;
pub mod matching;
pub mod mot;
pub mod scene;

mod track;

pub use config::{AppearanceFeature, TrackerConfig};
pub use detection::Detection;
pub use frame::{Frame, Predictions};
pub use scene::{Scene, TrackState};
pub use track::Track;

use error::Error;
use std::collections::hash_map::{Entry, HashMap};

pub trait Tracking {
    fn update(&mut self, frames: &[Frame], src: &str) -> Result<(), Error>;
    fn tracks(&self, src: &str) -> &[Track];
}

/// Tracks several video sequences at once, one [`Scene`] per source name.
pub struct MaskTracker {
    config: TrackerConfig,
    scenes: HashMap<String, Scene>,
}

impl MaskTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            config,
            scenes: HashMap::new(),
        })
    }

    /// Ends the sequence `src` and returns all of its tracks.
    pub fn finish(&mut self, src: &str) -> Vec<Track> {
        self.scenes
            .remove(src)
            .map(Scene::finish)
            .unwrap_or_default()
    }
}

impl crate::Tracking for MaskTracker {
    fn update(&mut self, frames: &[Frame], src: &str) -> Result<(), Error> {
        let scene = match self.scenes.entry(src.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Scene::new(self.config.clone())?),
        };

        for frame in frames {
            scene.update(frame)?;
        }

        Ok(())
    }

    #[inline]
    fn tracks(&self, src: &str) -> &[Track] {
        self.scenes.get(src).map_or(&[][..], Scene::tracks)
    }
}

/// Tracks one sequence from start to end.
pub fn track<I>(frames: I, config: &TrackerConfig) -> Result<Vec<Track>, Error>
where
    I: IntoIterator<Item = Frame>,
{
    let mut scene = Scene::new(config.clone())?;
    let mut count = 0;
    log::info!("Tracking sequence with {:?}", config);

    for frame in frames {
        scene.update(&frame)?;
        count += 1;
    }

    let tracks = scene.finish();
    log::info!("Tracked {} frames, {} tracks", count, tracks.len());

    Ok(tracks)
}
