//! HUD feed: a WebSocket server that streams console state and scope data to
//! the visual layer and accepts commands back.

pub mod client;
pub mod server;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::audio::{ScopeFeed, ScopeFrame};
use crate::command::ConsoleCommand;
use crate::settings::WebConfig;
use crate::store::ConsoleState;

const BROADCAST_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the accept thread, client channels and broadcast pacing.
pub struct WebSystem {
    inbound_rx: Option<Receiver<ConsoleCommand>>,
    clients: Arc<Mutex<Vec<Sender<String>>>>,
    shutdown: Option<Arc<AtomicBool>>,
    accept_handle: Option<JoinHandle<()>>,
    latest_state: Arc<Mutex<String>>,
    pub config: WebConfig,
    pub client_count: usize,
    pub last_activity: Option<Instant>,
    last_audio_broadcast: Instant,
    last_state_broadcast: Instant,
}

impl WebSystem {
    pub fn new(config: WebConfig) -> Self {
        let mut sys = Self {
            inbound_rx: None,
            clients: Arc::new(Mutex::new(Vec::new())),
            shutdown: None,
            accept_handle: None,
            latest_state: Arc::new(Mutex::new(String::new())),
            config,
            client_count: 0,
            last_activity: None,
            last_audio_broadcast: Instant::now(),
            last_state_broadcast: Instant::now(),
        };
        if sys.config.enabled {
            sys.start_server();
        }
        sys
    }

    pub fn start_server(&mut self) {
        self.stop_server();
        let shutdown = Arc::new(AtomicBool::new(false));
        let clients = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = crossbeam_channel::bounded(64);

        let shared = server::FeedShared {
            inbound_tx: tx,
            clients: clients.clone(),
            latest_state: self.latest_state.clone(),
            shutdown: shutdown.clone(),
        };
        match server::spawn_accept_loop(self.config.port, shared) {
            Ok(handle) => {
                self.inbound_rx = Some(rx);
                self.clients = clients;
                self.shutdown = Some(shutdown);
                self.accept_handle = Some(handle);
            }
            Err(e) => {
                log::error!("Failed to start HUD feed on port {}: {e}", self.config.port);
            }
        }
    }

    pub fn stop_server(&mut self) {
        if let Some(ref shutdown) = self.shutdown {
            shutdown.store(true, Ordering::Relaxed);
        }
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        self.shutdown = None;
        self.inbound_rx = None;
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.client_count = 0;
    }

    pub fn is_running(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| !s.load(Ordering::Relaxed))
    }

    /// Drain commands sent by HUD clients since the last frame.
    pub fn update(&mut self) -> Vec<ConsoleCommand> {
        self.refresh_client_count();
        let Some(ref rx) = self.inbound_rx else {
            return Vec::new();
        };
        let commands: Vec<ConsoleCommand> = rx.try_iter().collect();
        if !commands.is_empty() {
            self.last_activity = Some(Instant::now());
        }
        commands
    }

    /// Send to every client, pruning disconnected ones.
    pub fn broadcast_json(&self, json: &str) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| match tx.try_send(json.to_string()) {
                Ok(_) => true,
                // Backpressure: keep the client, drop this message
                Err(crossbeam_channel::TrySendError::Full(_)) => true,
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
            });
    }

    /// Broadcast scope data at 10Hz.
    pub fn broadcast_audio(&mut self, frame: &ScopeFrame, feed: &ScopeFeed) {
        if self.client_count == 0 || self.last_audio_broadcast.elapsed() < BROADCAST_INTERVAL {
            return;
        }
        self.last_audio_broadcast = Instant::now();
        let json = types::audio_json(frame, feed.downsampled(types::AUDIO_SPECTRUM_BINS));
        self.broadcast_json(&json);
    }

    /// Keep the latest state for new connections and `/state`, and
    /// broadcast it at 10Hz.
    pub fn update_latest_state(&mut self, state: &ConsoleState) {
        let json = types::state_json(state);
        *self
            .latest_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = json.clone();
        if self.client_count > 0 && self.last_state_broadcast.elapsed() >= BROADCAST_INTERVAL {
            self.last_state_broadcast = Instant::now();
            self.broadcast_json(&json);
        }
    }

    fn refresh_client_count(&mut self) {
        self.client_count = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
    }
}

impl Drop for WebSystem {
    fn drop(&mut self) {
        self.stop_server();
    }
}
