use serde::{Deserialize, Serialize};

use super::media::{MediaSlot, MediaState, StartCompletion, StartOutcome};
use super::{AUTOPLAY_BLOCKED_TOAST, BackendEvent};
use crate::audio::MediaSrc;
use crate::error::PlaybackError;
use crate::runtime::AudioRuntime;
use crate::store::{Source, ToastLevel, TrackInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioStation {
    pub id: String,
    pub name: String,
    pub url: String,
}

impl RadioStation {
    pub fn new(id: &str, name: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

pub fn default_stations() -> Vec<RadioStation> {
    vec![
        RadioStation::new(
            "soma-groove",
            "SomaFM Groove Salad",
            "https://ice2.somafm.com/groovesalad-128-mp3",
        ),
        RadioStation::new(
            "soma-defcon",
            "SomaFM DEF CON Radio",
            "https://ice6.somafm.com/defcon-128-mp3",
        ),
    ]
}

/// Internet radio over one persistent media element.
pub struct RadioBackend {
    stations: Vec<RadioStation>,
    /// Station of the latest start, kept for resume and track info.
    current: Option<usize>,
    slot: MediaSlot,
}

impl RadioBackend {
    pub fn new(stations: Vec<RadioStation>) -> Self {
        Self {
            stations,
            current: None,
            slot: MediaSlot::new("radio", Source::Radio),
        }
    }

    pub fn stations(&self) -> &[RadioStation] {
        &self.stations
    }

    pub fn current_station(&self) -> Option<&RadioStation> {
        self.current.and_then(|i| self.stations.get(i))
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

    /// Start `station_id`, or the last/first station when `None`.
    pub fn start(&mut self, rt: &AudioRuntime, station_id: Option<&str>) {
        if self.stations.is_empty() {
            rt.store.toast("No radio streams configured", ToastLevel::Warn);
            return;
        }
        let index = match station_id {
            Some(id) => match self.stations.iter().position(|s| s.id == id) {
                Some(i) => i,
                None => {
                    rt.store
                        .toast(format!("Unknown radio station: {id}"), ToastLevel::Warn);
                    return;
                }
            },
            None => self.current.unwrap_or(0),
        };
        self.current = Some(index);
        let station = &self.stations[index];
        log::info!("Starting radio station {} ({})", station.id, station.url);

        let src = MediaSrc::Url(station.url.clone());
        if let Err(e) = self.slot.start(rt, src, BackendEvent::Radio) {
            report_start_error(rt, &e);
        }
    }

    pub fn pause(&mut self, rt: &AudioRuntime) {
        self.slot.pause(rt);
    }

    pub fn stop(&mut self, rt: &AudioRuntime) -> Result<(), PlaybackError> {
        self.slot.stop(rt);
        Ok(())
    }

    pub fn handle_start(&mut self, rt: &AudioRuntime, done: StartCompletion) {
        match self.slot.complete(rt, done) {
            StartOutcome::Started => {
                if let Some(station) = self.current_station() {
                    rt.store.set_track(Some(TrackInfo {
                        id: station.id.clone(),
                        title: station.name.clone(),
                        artist: "Radio".to_string(),
                        album_art: None,
                    }));
                    rt.store
                        .toast(format!("Radio started: {}", station.name), ToastLevel::Info);
                }
            }
            StartOutcome::Failed(e) => report_start_error(rt, &e),
            StartOutcome::Interrupted | StartOutcome::Stale => {}
        }
    }
}

fn report_start_error(rt: &AudioRuntime, e: &PlaybackError) {
    rt.store.set_play_state_if(Source::Radio, false);
    match e {
        PlaybackError::AutoplayBlocked => rt.store.toast(AUTOPLAY_BLOCKED_TOAST, ToastLevel::Warn),
        other => rt.store.toast(format!("Radio failed: {other}"), ToastLevel::Warn),
    }
}
