//! Fakes for media elements and the Spotify transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::audio::{AutoplayPolicy, ElementFactory, MediaElement, MediaSrc};
use crate::audio::ring::RingBuffer;
use crate::backend::spotify::{ApiRequest, ApiResponse, Transport};
use crate::error::{PlaybackError, SpotifyError};
use crate::runtime::Console;
use crate::settings::ConsoleConfig;

/// Rate every loaded fake element reports.
pub const FAKE_SAMPLE_RATE: u32 = 48000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayBehavior {
    Succeed,
    Fail(PlaybackError),
    /// Block in `play()` until `release()` or an interrupting load/pause.
    Hold,
}

pub struct FakeElement {
    behavior: PlayBehavior,
    loaded: Mutex<Option<MediaSrc>>,
    load_count: AtomicUsize,
    pause_count: AtomicUsize,
    rewind_count: AtomicUsize,
    play_count: AtomicUsize,
    playing: AtomicBool,
    epoch: AtomicU64,
    position_bits: AtomicU64,
    released: Mutex<bool>,
    wake: Condvar,
}

impl FakeElement {
    fn new(behavior: PlayBehavior) -> Self {
        Self {
            behavior,
            loaded: Mutex::new(None),
            load_count: AtomicUsize::new(0),
            pause_count: AtomicUsize::new(0),
            rewind_count: AtomicUsize::new(0),
            play_count: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            position_bits: AtomicU64::new(0f64.to_bits()),
            released: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    pub fn loaded(&self) -> Option<MediaSrc> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    pub fn pause_count(&self) -> usize {
        self.pause_count.load(Ordering::SeqCst)
    }

    pub fn rewind_count(&self) -> usize {
        self.rewind_count.load(Ordering::SeqCst)
    }

    pub fn play_count(&self) -> usize {
        self.play_count.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, secs: f64) {
        self.position_bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    /// Let a held `play()` succeed.
    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.wake.notify_all();
    }

    /// Simulate the source running out.
    pub fn finish(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn interrupt(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        let _guard = self.released.lock().unwrap();
        self.wake.notify_all();
    }
}

impl MediaElement for FakeElement {
    fn load(&self, src: MediaSrc) {
        self.interrupt();
        self.load_count.fetch_add(1, Ordering::SeqCst);
        *self.loaded.lock().unwrap() = Some(src);
    }

    fn play(&self) -> Result<(), PlaybackError> {
        self.play_count.fetch_add(1, Ordering::SeqCst);
        let epoch = self.epoch.load(Ordering::SeqCst);
        if self.loaded.lock().unwrap().is_none() {
            return Err(PlaybackError::NoSource);
        }
        match self.behavior {
            PlayBehavior::Succeed => {}
            PlayBehavior::Fail(ref e) => return Err(e.clone()),
            PlayBehavior::Hold => {
                let mut released = self.released.lock().unwrap();
                while !*released && self.epoch.load(Ordering::SeqCst) == epoch {
                    released = self.wake.wait(released).unwrap();
                }
            }
        }
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(PlaybackError::Interrupted);
        }
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.pause_count.fetch_add(1, Ordering::SeqCst);
        self.interrupt();
    }

    fn rewind(&self) {
        self.rewind_count.fetch_add(1, Ordering::SeqCst);
        self.set_position(0.0);
    }

    fn set_volume(&self, _volume: f32) {}

    fn connect_tap(&self, _tap: Arc<RingBuffer>) {}

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn position_secs(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::SeqCst))
    }

    fn sample_rate(&self) -> u32 {
        if self.loaded.lock().unwrap().is_some() {
            FAKE_SAMPLE_RATE
        } else {
            0
        }
    }
}

/// Hands out [`FakeElement`]s and remembers them by name.
#[derive(Clone)]
pub struct FakeFactory {
    behavior: PlayBehavior,
    elements: Arc<Mutex<Vec<(String, Arc<FakeElement>)>>>,
}

impl FakeFactory {
    pub fn new(behavior: PlayBehavior) -> Self {
        Self {
            behavior,
            elements: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn element(&self, name: &str) -> Option<Arc<FakeElement>> {
        self.elements
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.clone())
    }
}

impl ElementFactory for FakeFactory {
    fn create(&self, name: &str) -> Arc<dyn MediaElement> {
        let element = Arc::new(FakeElement::new(self.behavior.clone()));
        self.elements
            .lock()
            .unwrap()
            .push((name.to_string(), element.clone()));
        element
    }
}

/// Scripted HTTP responses, recorded requests. Unscripted calls get 204.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<ApiResponse, SpotifyError>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: &str) {
        self.responses.lock().unwrap().push_back(Ok(ApiResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_error(&self, error: SpotifyError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests that went to the Web API rather than the token endpoint.
    pub fn api_requests(&self) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| !r.url.ends_with("/api/token"))
            .collect()
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SpotifyError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ApiResponse {
                status: 204,
                body: String::new(),
            }))
    }
}

pub fn test_config() -> ConsoleConfig {
    let mut config = ConsoleConfig::default();
    config.spotify.api_base = "https://api.test/v1".into();
    config.spotify.accounts_base = "https://accounts.test".into();
    config.spotify.client_id = Some("cid".into());
    config.spotify.access_token = Some("t1".into());
    config.spotify.refresh_token = Some("r1".into());
    config.analyser.fft_size = 256;
    config
}

/// Console over fake elements and a fresh fake transport. With `gestured`
/// the gesture latch is already set.
pub fn test_console(factory: &FakeFactory, gestured: bool) -> Console {
    test_console_with(factory, Arc::new(FakeTransport::new()), gestured)
}

pub fn test_console_with(
    factory: &FakeFactory,
    transport: Arc<FakeTransport>,
    gestured: bool,
) -> Console {
    let config = test_config();
    assert_eq!(config.autoplay, AutoplayPolicy::RequireGesture);
    let console = Console::with_parts(&config, Arc::new(factory.clone()), transport);
    if gestured {
        console.gesture();
    }
    console
}

impl Console {
    pub fn settle_default(&mut self) -> bool {
        self.settle(Duration::from_secs(5))
    }
}
