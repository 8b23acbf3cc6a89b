//! Spotify remote-device control.
//!
//! Audio plays on another device, so there is no element or analyser here.
//! Web API calls run one after another on a single worker and come back as
//! [`SpotifyCompletion`]s applied on the console thread.

pub mod auth;
pub mod client;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use client::{
    ApiRequest, ApiResponse, Method, RequestBody, SpotifyClient, SpotifyDevice, Transport,
    UreqTransport,
};

use super::BackendEvent;
use crate::error::SpotifyError;
use crate::runtime::{AudioRuntime, SerialQueue};
use crate::store::{Source, ToastLevel, TrackInfo};

pub const ACCESS_TOKEN_ENV: &str = "COCKPIT_SPOTIFY_ACCESS_TOKEN";
pub const REFRESH_TOKEN_ENV: &str = "COCKPIT_SPOTIFY_REFRESH_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub api_base: String,
    pub accounts_base: String,
    pub client_id: Option<String>,
    /// Never written to disk; filled from the environment.
    #[serde(skip)]
    pub access_token: Option<String>,
    #[serde(skip)]
    pub refresh_token: Option<String>,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.spotify.com/v1".to_string(),
            accounts_base: "https://accounts.spotify.com".to_string(),
            client_id: None,
            access_token: None,
            refresh_token: None,
        }
    }
}

impl SpotifyConfig {
    /// Pick up tokens from `COCKPIT_SPOTIFY_*` variables when set.
    pub fn with_env_tokens(mut self) -> Self {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.is_empty() {
                self.access_token = Some(token);
            }
        }
        if let Ok(token) = std::env::var(REFRESH_TOKEN_ENV) {
            if !token.is_empty() {
                self.refresh_token = Some(token);
            }
        }
        self
    }
}

/// Who asked for a call. Controller calls fail silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    Controller,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotifyCall {
    PlayPause(bool),
    Next,
    Transfer(String),
    Devices,
    /// Metadata lookup after a confirmed play or skip.
    NowPlaying,
}

impl SpotifyCall {
    fn failure_toast(&self) -> &'static str {
        match self {
            SpotifyCall::PlayPause(_) => "Play/Pause failed",
            SpotifyCall::Next => "Next failed",
            SpotifyCall::Transfer(_) => "Transfer playback failed",
            SpotifyCall::Devices => "Could not list Spotify devices",
            SpotifyCall::NowPlaying => "Could not read Spotify track",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotifyReply {
    Done,
    Devices(Vec<SpotifyDevice>),
    NowPlaying(Option<TrackInfo>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyCompletion {
    pub generation: u64,
    pub origin: Origin,
    pub call: SpotifyCall,
    pub result: Result<SpotifyReply, SpotifyError>,
}

/// Created on the first control call and kept for the console's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSession {
    /// Set by a successful transfer.
    pub device_id: Option<String>,
    /// Last confirmed remote play state.
    pub remote_playing: bool,
}

pub struct SpotifyBackend {
    client: Arc<SpotifyClient>,
    session: Option<RemoteSession>,
    devices: Vec<SpotifyDevice>,
    // One worker so a pause and a later play reach Spotify in that order
    calls: Option<SerialQueue>,
}

impl SpotifyBackend {
    pub fn new(config: &SpotifyConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            client: Arc::new(SpotifyClient::new(config, transport)),
            session: None,
            devices: Vec::new(),
            calls: None,
        }
    }

    pub fn client(&self) -> &SpotifyClient {
        &self.client
    }

    pub fn session(&self) -> Option<&RemoteSession> {
        self.session.as_ref()
    }

    pub fn devices(&self) -> &[SpotifyDevice] {
        &self.devices
    }

    pub fn is_audible(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.remote_playing)
    }

    pub fn play_pause(&mut self, rt: &AudioRuntime, play: bool) {
        self.dispatch(rt, SpotifyCall::PlayPause(play), Origin::User);
    }

    pub fn next(&mut self, rt: &AudioRuntime) {
        self.dispatch(rt, SpotifyCall::Next, Origin::User);
    }

    pub fn transfer_playback(&mut self, rt: &AudioRuntime, device_id: &str) {
        self.dispatch(rt, SpotifyCall::Transfer(device_id.to_string()), Origin::User);
    }

    pub fn refresh_devices(&mut self, rt: &AudioRuntime) {
        self.dispatch(rt, SpotifyCall::Devices, Origin::User);
    }

    /// Remote pause, fire-and-forget. Nothing to do before a session exists.
    pub fn stop(&mut self, rt: &AudioRuntime) -> Result<(), SpotifyError> {
        if self.session.is_none() {
            return Ok(());
        }
        if self.dispatch(rt, SpotifyCall::PlayPause(false), Origin::Controller) {
            Ok(())
        } else {
            Err(SpotifyError::Transport("could not queue pause".into()))
        }
    }

    fn dispatch(&mut self, rt: &AudioRuntime, call: SpotifyCall, origin: Origin) -> bool {
        let session = self.session.get_or_insert_with(|| {
            log::info!("Opening Spotify remote session");
            RemoteSession::default()
        });
        let device_id = session.device_id.clone();
        let client = self.client.clone();
        let generation = rt.store.generation();
        let queue = self
            .calls
            .get_or_insert_with(|| rt.serial_queue("cockpit-spotify"));

        let label = format!("{call:?}");
        let queued = queue.submit(move || {
            let result = match &call {
                SpotifyCall::PlayPause(true) => client.play(device_id.as_deref()).map(|()| SpotifyReply::Done),
                SpotifyCall::PlayPause(false) => client.pause().map(|()| SpotifyReply::Done),
                SpotifyCall::Next => client.next().map(|()| SpotifyReply::Done),
                SpotifyCall::Transfer(id) => client.transfer(id).map(|()| SpotifyReply::Done),
                SpotifyCall::Devices => client.devices().map(SpotifyReply::Devices),
                SpotifyCall::NowPlaying => client.currently_playing().map(SpotifyReply::NowPlaying),
            };
            BackendEvent::Spotify(SpotifyCompletion {
                generation,
                origin,
                call,
                result,
            })
        });
        if !queued {
            log::warn!("Spotify {label} was not queued");
        }
        queued
    }

    /// Spotify is selected and no switch happened since `generation`.
    fn is_current(rt: &AudioRuntime, generation: u64) -> bool {
        generation == rt.store.generation() && rt.store.source() == Source::Spotify
    }

    pub fn handle(&mut self, rt: &AudioRuntime, done: SpotifyCompletion) {
        let SpotifyCompletion {
            generation,
            origin,
            call,
            result,
        } = done;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                match origin {
                    Origin::User => rt.store.toast(call.failure_toast(), ToastLevel::Warn),
                    Origin::Controller => log::warn!("Background Spotify {call:?} failed: {e}"),
                }
                log::debug!("Spotify {call:?} failed: {e}");
                return;
            }
        };

        let session = self.session.get_or_insert_with(RemoteSession::default);
        match (call, reply) {
            (SpotifyCall::PlayPause(true), _) => {
                session.remote_playing = true;
                if origin == Origin::User && Self::is_current(rt, generation) {
                    rt.store.set_play_state_if(Source::Spotify, true);
                    self.dispatch(rt, SpotifyCall::NowPlaying, Origin::Controller);
                } else {
                    log::debug!("Spotify started after it was deselected, pausing");
                    self.dispatch(rt, SpotifyCall::PlayPause(false), Origin::Controller);
                }
            }
            (SpotifyCall::PlayPause(false), _) => {
                session.remote_playing = false;
                if origin == Origin::User {
                    rt.store.set_play_state_if(Source::Spotify, false);
                }
            }
            (SpotifyCall::Transfer(id), _) => {
                log::info!("Spotify playback transferred to {id}");
                session.device_id = Some(id);
            }
            (SpotifyCall::Devices, SpotifyReply::Devices(list)) => {
                log::info!("Spotify reports {} device(s)", list.len());
                self.devices = list;
            }
            (SpotifyCall::Next, _) => {
                if Self::is_current(rt, generation) {
                    self.dispatch(rt, SpotifyCall::NowPlaying, Origin::Controller);
                }
            }
            (SpotifyCall::NowPlaying, SpotifyReply::NowPlaying(track)) => match track {
                Some(track) if Self::is_current(rt, generation) => {
                    log::info!("Spotify now playing: {} - {}", track.artist, track.title);
                    rt.store.set_track(Some(track));
                }
                Some(_) => log::debug!("Spotify track arrived after a switch, dropped"),
                None => log::debug!("Spotify reports nothing playing"),
            },
            (SpotifyCall::Devices | SpotifyCall::NowPlaying, _) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFactory, FakeTransport, PlayBehavior, test_console_with};
    use crate::runtime::Console;

    fn console(transport: &Arc<FakeTransport>) -> Console {
        let factory = FakeFactory::new(PlayBehavior::Succeed);
        let mut console = test_console_with(&factory, transport.clone(), false);
        console.select_source(Source::Spotify);
        console
    }

    #[test]
    fn play_after_refresh_is_confirmed() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_response(401, "");
        transport.push_response(200, r#"{"access_token":"t2"}"#);
        transport.push_response(204, "");
        let mut console = console(&transport);

        console.play();
        assert!(!console.store().is_playing());
        assert!(console.settle_default());

        assert!(console.store().is_playing());
        let api = transport.api_requests();
        assert_eq!(api.len(), 3);
        assert_eq!(api[0].bearer.as_deref(), Some("t1"));
        assert_eq!(api[1].bearer.as_deref(), Some("t2"));
        // Track lookup follows the confirmed play with the fresh token
        assert!(api[2].url.ends_with("/me/player/currently-playing"));
        assert_eq!(api[2].bearer.as_deref(), Some("t2"));
        assert!(console.backends().spotify.is_audible());
    }

    #[test]
    fn refresh_failure_is_final() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_response(401, "");
        transport.push_response(400, r#"{"error":"invalid_grant"}"#);
        let mut console = console(&transport);

        console.play();
        assert!(console.settle_default());

        let state = console.store().snapshot();
        assert!(!state.player.playing);
        assert_eq!(state.toasts.last().unwrap().text, "Play/Pause failed");
        assert_eq!(transport.api_requests().len(), 1);
        let auth = console.backends().spotify.client().auth();
        assert_eq!(auth.access_token().as_deref(), Some("t1"));
    }

    #[test]
    fn failures_toast_and_leave_playing() {
        let transport = Arc::new(FakeTransport::new());
        let mut console = console(&transport);
        console.play();
        assert!(console.settle_default());
        assert!(console.store().is_playing());

        transport.push_error(SpotifyError::Transport("offline".into()));
        console.next();
        transport.push_response(404, "");
        let rt = console.runtime().clone();
        console.backends_mut().spotify.transfer_playback(&rt, "dev9");
        assert!(console.settle_default());

        let texts: Vec<_> = console
            .store()
            .snapshot()
            .toasts
            .iter()
            .map(|t| t.text.clone())
            .collect();
        assert!(texts.contains(&"Next failed".to_string()));
        assert!(texts.contains(&"Transfer playback failed".to_string()));
        assert!(console.store().is_playing());
        assert_eq!(console.backends().spotify.session().unwrap().device_id, None);
    }

    #[test]
    fn transfer_records_device_for_later_play() {
        let transport = Arc::new(FakeTransport::new());
        let mut console = console(&transport);
        let rt = console.runtime().clone();
        console.backends_mut().spotify.transfer_playback(&rt, "car-1");
        assert!(console.settle_default());
        assert_eq!(
            console.backends().spotify.session().unwrap().device_id.as_deref(),
            Some("car-1")
        );

        console.play();
        assert!(console.settle_default());
        let urls: Vec<_> = transport.api_requests().into_iter().map(|r| r.url).collect();
        assert!(urls.contains(&"https://api.test/v1/me/player/play?device_id=car-1".to_string()));
    }

    #[test]
    fn stop_without_session_is_noop() {
        let transport = Arc::new(FakeTransport::new());
        let mut console = console(&transport);
        console.store().set_play_state(true);
        let rt = console.runtime().clone();
        console.backends_mut().spotify.stop(&rt).unwrap();
        assert!(console.settle_default());
        assert!(transport.requests().is_empty());
        assert!(console.store().is_playing());
    }

    #[test]
    fn user_pause_clears_playing() {
        let transport = Arc::new(FakeTransport::new());
        let mut console = console(&transport);
        console.play();
        assert!(console.settle_default());
        console.pause();
        assert!(console.settle_default());
        assert!(!console.store().is_playing());
        assert!(!console.backends().spotify.is_audible());
    }

    #[test]
    fn late_play_after_switch_is_paused_remotely() {
        let transport = Arc::new(FakeTransport::new());
        let mut console = console(&transport);
        console.play();
        // Deselect before the play completion is applied
        console.store().set_source(Source::Local);
        assert!(console.settle_default());

        assert!(!console.store().is_playing());
        assert!(!console.backends().spotify.is_audible());
        let last = transport.api_requests().pop().unwrap();
        assert!(last.url.ends_with("/me/player/pause"));
    }

    #[test]
    fn devices_are_kept() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_response(200, r#"{"devices":[{"id":"d1","name":"Dash","is_active":false}]}"#);
        let mut console = console(&transport);
        let rt = console.runtime().clone();
        console.backends_mut().spotify.refresh_devices(&rt);
        assert!(console.settle_default());
        assert_eq!(console.backends().spotify.devices().len(), 1);
        assert_eq!(console.backends().spotify.devices()[0].name, "Dash");
    }

    #[test]
    fn tokens_are_not_serialized() {
        let config = SpotifyConfig::default();
        assert!(config.access_token.is_none());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("access_token"));
    }

    #[test]
    fn confirmed_play_fetches_track_with_art() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_response(204, "");
        transport.push_response(
            200,
            r#"{"item":{"id":"sp1","name":"Midnight City","artists":[{"name":"M83"}],"album":{"images":[{"url":"https://img.test/cover.jpg"}]}}}"#,
        );
        let mut console = console(&transport);
        console.play();
        assert!(console.settle_default());

        let track = console.store().player().track.unwrap();
        assert_eq!(track.id, "sp1");
        assert_eq!(track.title, "Midnight City");
        assert_eq!(track.artist, "M83");
        assert_eq!(track.album_art.as_deref(), Some("https://img.test/cover.jpg"));
    }

    #[test]
    fn next_refreshes_track() {
        let transport = Arc::new(FakeTransport::new());
        let mut console = console(&transport);
        console.play();
        assert!(console.settle_default());
        assert!(console.store().player().track.is_none());

        transport.push_response(204, "");
        transport.push_response(200, r#"{"item":{"id":"sp2","name":"Wait","artists":[{"name":"M83"}]}}"#);
        console.next();
        assert!(console.settle_default());
        assert_eq!(console.store().player().track.unwrap().title, "Wait");
    }

    #[test]
    fn track_lookup_failure_is_quiet() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_response(204, "");
        transport.push_response(500, "");
        let mut console = console(&transport);
        console.play();
        assert!(console.settle_default());
        assert!(console.store().is_playing());
        assert!(console.store().snapshot().toasts.is_empty());
        assert!(console.store().player().track.is_none());
    }

    #[test]
    fn queued_calls_reach_spotify_in_order() {
        let transport = Arc::new(FakeTransport::new());
        let mut console = console(&transport);
        console.play();
        assert!(console.settle_default());

        // Controller pause then user play, both queued before either runs
        let rt = console.runtime().clone();
        console.backends_mut().spotify.stop(&rt).unwrap();
        console.play();
        assert!(console.settle_default());

        let urls: Vec<_> = transport
            .api_requests()
            .into_iter()
            .map(|r| r.url)
            .filter(|u| !u.ends_with("/currently-playing"))
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://api.test/v1/me/player/play",
                "https://api.test/v1/me/player/pause",
                "https://api.test/v1/me/player/play",
            ]
        );
        assert!(console.backends().spotify.is_audible());
        assert!(console.store().is_playing());
    }
}
