use serde::Serialize;

use crate::audio::ScopeFrame;
use crate::store::{ConsoleState, PlayerState, Toast};

/// Spectrum buckets sent per audio message.
pub const AUDIO_SPECTRUM_BINS: usize = 32;

/// Store snapshot broadcast at 10Hz and sent on connect.
#[derive(Serialize)]
pub struct StateMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub player: &'a PlayerState,
    pub toasts: &'a [Toast],
    pub generation: u64,
}

impl<'a> StateMessage<'a> {
    pub fn new(state: &'a ConsoleState) -> Self {
        Self {
            msg_type: "state",
            player: &state.player,
            toasts: &state.toasts,
            generation: state.generation,
        }
    }
}

/// Scope readout broadcast at 10Hz.
#[derive(Serialize)]
pub struct AudioMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub avg: f32,
    pub beat: bool,
    /// `false` while the synthetic waveform stands in for a missing analyser.
    pub live: bool,
    pub spectrum: Vec<u8>,
}

impl AudioMessage {
    pub fn new(frame: &ScopeFrame, spectrum: Vec<u8>) -> Self {
        Self {
            msg_type: "audio",
            bass: frame.bands.bass,
            mid: frame.bands.mid,
            high: frame.bands.high,
            avg: frame.bands.avg,
            beat: frame.bands.beat,
            live: frame.live,
            spectrum,
        }
    }
}

pub fn state_json(state: &ConsoleState) -> String {
    serde_json::to_string(&StateMessage::new(state)).unwrap_or_default()
}

pub fn audio_json(frame: &ScopeFrame, spectrum: Vec<u8>) -> String {
    serde_json::to_string(&AudioMessage::new(frame, spectrum)).unwrap_or_default()
}
