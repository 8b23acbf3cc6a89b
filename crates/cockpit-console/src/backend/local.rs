use std::path::PathBuf;

use super::lrc::{self, LrcLine};
use super::media::{MediaSlot, MediaState, StartCompletion, StartOutcome};
use super::{AUTOPLAY_BLOCKED_TOAST, BackendEvent};
use crate::audio::MediaSrc;
use crate::error::PlaybackError;
use crate::runtime::AudioRuntime;
use crate::store::{Source, ToastLevel, TrackInfo};

const NO_FILES_TOAST: &str = "No local files selected. Use the Local panel to add files.";

#[derive(Debug, Clone, PartialEq)]
pub struct LocalTrack {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub lyrics: Vec<LrcLine>,
}

/// User-supplied audio files played through one persistent element.
pub struct LocalBackend {
    tracks: Vec<LocalTrack>,
    current: Option<usize>,
    /// Track handed to the element by the latest start.
    started: Option<usize>,
    next_id: u64,
    slot: MediaSlot,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            current: None,
            started: None,
            next_id: 1,
            slot: MediaSlot::new("local", Source::Local),
        }
    }

    /// Append files to the list. The first file added to an empty selection
    /// becomes current. Returns the number of tracks added.
    pub fn add_files<I>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let before = self.tracks.len();
        for path in paths {
            let name = path
                .file_stem()
                .or_else(|| path.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let lyrics = lrc::load_sidecar(&path);
            let id = format!("local-{}", self.next_id);
            self.next_id += 1;
            log::info!("Added local track {id}: {}", path.display());
            self.tracks.push(LocalTrack {
                id,
                name,
                path,
                lyrics,
            });
        }
        if self.current.is_none() && self.tracks.len() > before {
            self.current = Some(before);
        }
        self.tracks.len() - before
    }

    /// Make `id` current. Returns `false` for an unknown id.
    pub fn select(&mut self, id: &str) -> bool {
        match self.tracks.iter().position(|t| t.id == id) {
            Some(i) => {
                self.current = Some(i);
                true
            }
            None => false,
        }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn current(&self) -> Option<&LocalTrack> {
        self.current.and_then(|i| self.tracks.get(i))
    }

    pub fn state(&self) -> MediaState {
        self.slot.state()
    }

    pub fn is_audible(&self) -> bool {
        self.slot.is_audible()
    }

    pub(crate) fn slot(&self) -> &MediaSlot {
        &self.slot
    }

    pub(crate) fn slot_mut(&mut self) -> &mut MediaSlot {
        &mut self.slot
    }

    pub fn play_current(&mut self, rt: &AudioRuntime) {
        let Some(index) = self.current else {
            rt.store.toast(NO_FILES_TOAST, ToastLevel::Warn);
            return;
        };
        let track = &self.tracks[index];
        log::info!("Playing local track {} ({})", track.id, track.path.display());
        let src = MediaSrc::File(track.path.clone());
        self.started = Some(index);
        if let Err(e) = self.slot.start(rt, src, BackendEvent::Local) {
            self.report_start_error(rt, &e);
        }
    }

    pub fn pause(&mut self, rt: &AudioRuntime) {
        self.slot.pause(rt);
    }

    pub fn stop(&mut self, rt: &AudioRuntime) -> Result<(), PlaybackError> {
        self.slot.stop(rt);
        Ok(())
    }

    pub fn next_track(&mut self, rt: &AudioRuntime) {
        self.step(rt, 1);
    }

    pub fn prev_track(&mut self, rt: &AudioRuntime) {
        self.step(rt, -1);
    }

    /// Move the current pointer with wraparound, carrying playback along if
    /// the element was playing or starting.
    fn step(&mut self, rt: &AudioRuntime, delta: isize) {
        let len = self.tracks.len();
        let Some(index) = self.current.filter(|_| len > 0) else {
            rt.store.toast(NO_FILES_TOAST, ToastLevel::Warn);
            return;
        };
        let next = (index as isize + delta).rem_euclid(len as isize) as usize;
        self.current = Some(next);
        if matches!(self.slot.state(), MediaState::Playing | MediaState::Starting) {
            self.play_current(rt);
        }
    }

    /// Lyric line at the element's playback position.
    pub fn current_lyric(&self) -> Option<&str> {
        let track = self.started.and_then(|i| self.tracks.get(i))?;
        lrc::current_line(&track.lyrics, self.slot.position_secs()).map(|l| l.text.as_str())
    }

    pub fn handle_start(&mut self, rt: &AudioRuntime, done: StartCompletion) {
        match self.slot.complete(rt, done) {
            StartOutcome::Started => {
                if let Some(track) = self.started.and_then(|i| self.tracks.get(i)) {
                    rt.store.set_track(Some(TrackInfo {
                        id: track.id.clone(),
                        title: track.name.clone(),
                        artist: "Local File".to_string(),
                        album_art: None,
                    }));
                }
            }
            StartOutcome::Failed(e) => self.report_start_error(rt, &e),
            StartOutcome::Interrupted | StartOutcome::Stale => {}
        }
    }

    fn report_start_error(&self, rt: &AudioRuntime, e: &PlaybackError) {
        rt.store.set_play_state_if(Source::Local, false);
        match e {
            PlaybackError::AutoplayBlocked => {
                rt.store.toast(AUTOPLAY_BLOCKED_TOAST, ToastLevel::Warn)
            }
            other => {
                let name = self
                    .started
                    .and_then(|i| self.tracks.get(i))
                    .map_or("track", |t| t.name.as_str());
                rt.store
                    .toast(format!("Could not play {name}: {other}"), ToastLevel::Warn);
            }
        }
    }
}
