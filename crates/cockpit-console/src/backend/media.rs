use std::sync::Arc;

use super::BackendEvent;
use crate::audio::{AnalyserHandle, MediaElement, MediaSrc};
use crate::error::PlaybackError;
use crate::runtime::AudioRuntime;
use crate::store::Source;

/// Lifecycle of an element-backed backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    /// No element created yet.
    Idle,
    Starting,
    Playing,
    Paused,
    Stopped,
}

/// Result of a `play()` worker, tagged with what was current when it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCompletion {
    pub generation: u64,
    pub ticket: u64,
    pub result: Result<(), PlaybackError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    Failed(PlaybackError),
    /// Paused or stopped while opening. Not reported to the user.
    Interrupted,
    /// Issued under an older generation, source or start. Already undone.
    Stale,
}

/// Element, analyser and start bookkeeping shared by the radio and local
/// backends. Both handles are created on the first start and kept.
pub struct MediaSlot {
    name: &'static str,
    source: Source,
    element: Option<Arc<dyn MediaElement>>,
    analyser: Option<Arc<AnalyserHandle>>,
    loaded: Option<MediaSrc>,
    state: MediaState,
    ticket: u64,
}

impl MediaSlot {
    pub fn new(name: &'static str, source: Source) -> Self {
        Self {
            name,
            source,
            element: None,
            analyser: None,
            loaded: None,
            state: MediaState::Idle,
            ticket: 0,
        }
    }

    pub fn state(&self) -> MediaState {
        self.state
    }

    pub fn analyser(&self) -> Option<&Arc<AnalyserHandle>> {
        self.analyser.as_ref()
    }

    /// Whether the element is currently producing sound.
    pub fn is_audible(&self) -> bool {
        self.element.as_ref().is_some_and(|e| e.is_playing())
    }

    pub fn position_secs(&self) -> f64 {
        self.element.as_ref().map_or(0.0, |e| e.position_secs())
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(ref element) = self.element {
            element.set_volume(volume);
        }
    }

    fn ensure_element(&mut self, rt: &AudioRuntime) -> Arc<dyn MediaElement> {
        if self.analyser.is_none() {
            self.analyser = Some(Arc::new(AnalyserHandle::new(rt.analyser)));
        }
        match self.element {
            Some(ref element) => element.clone(),
            None => {
                log::info!("Creating {} media element", self.name);
                let element = rt.create_element(self.name);
                self.element = Some(element.clone());
                element
            }
        }
    }

    /// Load `src` (unless resuming it from pause) and issue `play()` on a
    /// worker. The outcome arrives later as `wrap(StartCompletion)`.
    pub fn start(
        &mut self,
        rt: &AudioRuntime,
        src: MediaSrc,
        wrap: fn(StartCompletion) -> BackendEvent,
    ) -> Result<(), PlaybackError> {
        let element = self.ensure_element(rt);
        // Reconnect on every start; connect_tap replaces the old route
        if let Some(ref analyser) = self.analyser {
            element.connect_tap(analyser.tap());
        }
        element.set_volume(rt.store.player().volume);

        let resume = self.state == MediaState::Paused && self.loaded.as_ref() == Some(&src);
        if !resume {
            element.load(src.clone());
            self.loaded = Some(src);
        }

        if rt.autoplay_blocked() {
            log::warn!("{} start blocked: no user gesture yet", self.name);
            self.state = MediaState::Stopped;
            return Err(PlaybackError::AutoplayBlocked);
        }

        self.ticket += 1;
        let ticket = self.ticket;
        let generation = rt.store.generation();
        self.state = MediaState::Starting;

        let task_element = element.clone();
        let spawned = rt.spawn_task(&format!("cockpit-{}-play", self.name), move || {
            wrap(StartCompletion {
                generation,
                ticket,
                result: task_element.play(),
            })
        });
        if !spawned {
            self.state = MediaState::Stopped;
            return Err(PlaybackError::Device("could not spawn play worker".into()));
        }
        Ok(())
    }

    /// Apply a finished `play()`. Only a completion matching the latest start,
    /// the current generation and the selected source may touch the store.
    pub fn complete(&mut self, rt: &AudioRuntime, done: StartCompletion) -> StartOutcome {
        if done.ticket != self.ticket {
            log::debug!("{} completion superseded by a newer start", self.name);
            return StartOutcome::Stale;
        }
        let current = done.generation == rt.store.generation()
            && rt.store.source() == self.source
            && self.state == MediaState::Starting;

        match done.result {
            Ok(()) if current => {
                self.state = MediaState::Playing;
                if let (Some(analyser), Some(element)) = (&self.analyser, &self.element) {
                    analyser.set_sample_rate(element.sample_rate());
                }
                rt.registry.set_active(self.analyser.clone());
                rt.store.set_play_state_if(self.source, true);
                StartOutcome::Started
            }
            Ok(()) => {
                log::debug!("{} started after it was deselected, pausing", self.name);
                if let Some(ref element) = self.element {
                    element.pause();
                }
                if self.state == MediaState::Starting {
                    self.state = MediaState::Stopped;
                }
                StartOutcome::Stale
            }
            Err(PlaybackError::Interrupted) => {
                if self.state == MediaState::Starting {
                    self.state = MediaState::Stopped;
                }
                StartOutcome::Interrupted
            }
            Err(e) => {
                if self.state == MediaState::Starting {
                    self.state = MediaState::Stopped;
                }
                if current {
                    rt.store.set_play_state_if(self.source, false);
                    StartOutcome::Failed(e)
                } else {
                    log::debug!("{} stale start failed: {e}", self.name);
                    StartOutcome::Stale
                }
            }
        }
    }

    pub fn pause(&mut self, rt: &AudioRuntime) {
        let Some(ref element) = self.element else {
            return;
        };
        if matches!(self.state, MediaState::Playing | MediaState::Starting) {
            element.pause();
            self.state = MediaState::Paused;
            rt.store.set_play_state_if(self.source, false);
        }
    }

    /// Pause, rewind and drop our analyser from the registry. A no-op before
    /// the element exists.
    pub fn stop(&mut self, rt: &AudioRuntime) {
        let Some(ref element) = self.element else {
            return;
        };
        element.pause();
        element.rewind();
        self.state = MediaState::Stopped;
        if let Some(ref analyser) = self.analyser {
            rt.registry.clear_if(analyser);
        }
        rt.store.set_play_state_if(self.source, false);
    }

    /// Notice a source that ended by itself. Returns `true` once per ending.
    pub fn poll_ended(&mut self, rt: &AudioRuntime) -> bool {
        if self.state != MediaState::Playing || self.is_audible() {
            return false;
        }
        log::info!("{} playback ended", self.name);
        self.state = MediaState::Stopped;
        if let Some(ref analyser) = self.analyser {
            rt.registry.clear_if(analyser);
        }
        rt.store.set_play_state_if(self.source, false);
        true
    }
}
