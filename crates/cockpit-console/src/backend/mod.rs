//! Per-source playback backends and the tagged dispatch over them.

pub mod local;
pub mod lrc;
pub mod media;
pub mod radio;
pub mod spotify;

pub use local::{LocalBackend, LocalTrack};
pub use media::{MediaState, StartCompletion};
pub use radio::{RadioBackend, RadioStation};
pub use spotify::{SpotifyBackend, SpotifyCompletion, SpotifyConfig, SpotifyDevice};

use crate::error::BackendError;
use crate::runtime::AudioRuntime;
use crate::store::Source;

pub const AUTOPLAY_BLOCKED_TOAST: &str = "Autoplay blocked. Click and try again.";

/// Completion of work a backend handed to a worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Radio(StartCompletion),
    Local(StartCompletion),
    Spotify(SpotifyCompletion),
}

/// One backend per [`Source`], owned by the console thread.
pub struct Backends {
    pub radio: RadioBackend,
    pub local: LocalBackend,
    pub spotify: SpotifyBackend,
}

impl Backends {
    /// Idempotent stop of one source's backend.
    pub fn stop(&mut self, source: Source, rt: &AudioRuntime) -> Result<(), BackendError> {
        match source {
            Source::Radio => self.radio.stop(rt)?,
            Source::Local => self.local.stop(rt)?,
            Source::Spotify => self.spotify.stop(rt)?,
        }
        Ok(())
    }

    /// Start or resume the given source's current item.
    pub fn play(&mut self, source: Source, rt: &AudioRuntime) {
        match source {
            Source::Radio => self.radio.start(rt, None),
            Source::Local => self.local.play_current(rt),
            Source::Spotify => self.spotify.play_pause(rt, true),
        }
    }

    pub fn pause(&mut self, source: Source, rt: &AudioRuntime) {
        match source {
            Source::Radio => self.radio.pause(rt),
            Source::Local => self.local.pause(rt),
            Source::Spotify => self.spotify.play_pause(rt, false),
        }
    }

    /// Skip forward. Radio has nothing to skip to.
    pub fn next(&mut self, source: Source, rt: &AudioRuntime) {
        match source {
            Source::Radio => log::debug!("next ignored for radio"),
            Source::Local => self.local.next_track(rt),
            Source::Spotify => self.spotify.next(rt),
        }
    }

    pub fn prev(&mut self, source: Source, rt: &AudioRuntime) {
        match source {
            Source::Local => self.local.prev_track(rt),
            Source::Radio | Source::Spotify => log::debug!("prev ignored for {source}"),
        }
    }

    pub fn handle(&mut self, rt: &AudioRuntime, event: BackendEvent) {
        match event {
            BackendEvent::Radio(done) => self.radio.handle_start(rt, done),
            BackendEvent::Local(done) => self.local.handle_start(rt, done),
            BackendEvent::Spotify(done) => self.spotify.handle(rt, done),
        }
    }

    /// Pick up element playback that ended on its own.
    pub fn poll_ended(&mut self, rt: &AudioRuntime) {
        self.radio.slot_mut().poll_ended(rt);
        self.local.slot_mut().poll_ended(rt);
    }

    pub fn set_volume(&self, volume: f32) {
        self.radio.slot().set_volume(volume);
        self.local.slot().set_volume(volume);
    }

    pub fn is_audible(&self, source: Source) -> bool {
        match source {
            Source::Radio => self.radio.is_audible(),
            Source::Local => self.local.is_audible(),
            Source::Spotify => self.spotify.is_audible(),
        }
    }

    /// Sources whose handle is currently producing sound.
    pub fn audible(&self) -> Vec<Source> {
        Source::ALL
            .into_iter()
            .filter(|&s| self.is_audible(s))
            .collect()
    }
}
