use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::audio::{
    AnalyserOptions, AnalyserRegistry, AutoplayPolicy, ElementFactory, GestureLatch, MediaElement,
    OutputElementFactory,
};
use crate::backend::spotify::{Transport, UreqTransport};
use crate::backend::{BackendEvent, Backends, LocalBackend, RadioBackend, SpotifyBackend};
use crate::command::ConsoleCommand;
use crate::controller::SourceController;
use crate::intent::{self, IntentKind};
use crate::settings::ConsoleConfig;
use crate::store::{PlayerState, Source, Store, ToastLevel};

/// Shared context handed to backends and the visual layer instead of globals.
///
/// Clones share the same store, registry and gesture latch.
#[derive(Clone)]
pub struct AudioRuntime {
    pub store: Store,
    pub registry: AnalyserRegistry,
    pub gesture: GestureLatch,
    pub autoplay: AutoplayPolicy,
    pub analyser: AnalyserOptions,
    elements: Arc<dyn ElementFactory>,
    events_tx: Sender<BackendEvent>,
    in_flight: Arc<AtomicUsize>,
}

impl AudioRuntime {
    pub fn new(
        store: Store,
        autoplay: AutoplayPolicy,
        analyser: AnalyserOptions,
        elements: Arc<dyn ElementFactory>,
    ) -> (Self, Receiver<BackendEvent>) {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let rt = Self {
            store,
            registry: AnalyserRegistry::new(),
            gesture: GestureLatch::new(),
            autoplay,
            analyser: analyser.sanitized(),
            elements,
            events_tx,
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        (rt, events_rx)
    }

    pub fn create_element(&self, name: &str) -> Arc<dyn MediaElement> {
        self.elements.create(name)
    }

    /// `true` while the policy wants a gesture and none has happened.
    pub fn autoplay_blocked(&self) -> bool {
        self.autoplay == AutoplayPolicy::RequireGesture && !self.gesture.has_user_gestured()
    }

    /// Run `task` on a named worker and deliver its event to the console.
    /// Returns `false` if the thread could not be spawned.
    pub fn spawn_task<F>(&self, name: &str, task: F) -> bool
    where
        F: FnOnce() -> BackendEvent + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let tx = self.events_tx.clone();
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let event = task();
            let _ = tx.send(event);
        });
        match spawned {
            Ok(_) => true,
            Err(e) => {
                log::error!("Failed to spawn {name}: {e}");
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                false
            }
        }
    }

    /// A queue whose tasks run one at a time, in submission order, on a
    /// single long-lived worker named `name`.
    pub fn serial_queue(&self, name: &str) -> SerialQueue {
        SerialQueue {
            name: name.to_string(),
            jobs: None,
            events_tx: self.events_tx.clone(),
            in_flight: self.in_flight.clone(),
        }
    }

    /// Worker operations whose completion has not been applied yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn task_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

type Job = Box<dyn FnOnce() -> BackendEvent + Send>;

/// Ordered task runner. The worker thread starts on the first submit and
/// exits once the queue is dropped and its backlog is done.
pub struct SerialQueue {
    name: String,
    jobs: Option<Sender<Job>>,
    events_tx: Sender<BackendEvent>,
    in_flight: Arc<AtomicUsize>,
}

impl SerialQueue {
    /// Queue `task` behind everything submitted before it. Returns `false`
    /// if the worker could not be started.
    pub fn submit<F>(&mut self, task: F) -> bool
    where
        F: FnOnce() -> BackendEvent + Send + 'static,
    {
        if self.jobs.is_none() {
            match self.start() {
                Ok(jobs) => self.jobs = Some(jobs),
                Err(e) => {
                    log::error!("Failed to spawn {}: {e}", self.name);
                    return false;
                }
            }
        }
        let Some(jobs) = self.jobs.clone() else {
            return false;
        };

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if jobs.send(Box::new(task)).is_err() {
            // Worker died; the next submit starts a fresh one
            log::warn!("{} worker is gone, task dropped", self.name);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.jobs = None;
            return false;
        }
        true
    }

    fn start(&self) -> std::io::Result<Sender<Job>> {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let events = self.events_tx.clone();
        thread::Builder::new().name(self.name.clone()).spawn(move || {
            for job in rx {
                if events.send(job()).is_err() {
                    break;
                }
            }
        })?;
        Ok(tx)
    }
}

/// Owner of the backends and the only thread that mutates them.
///
/// Commands go in through [`Console::apply`]; worker completions and queued
/// source switches are applied by [`Console::update`], called once per frame.
pub struct Console {
    rt: AudioRuntime,
    events: Receiver<BackendEvent>,
    controller: SourceController,
    backends: Backends,
}

/// What the caller should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue,
    /// Text for the operator (status, device lists, intent replies).
    Reply(String),
    Quit,
}

impl Console {
    /// Console with real cpal elements and the ureq Spotify transport.
    pub fn new(config: &ConsoleConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(OutputElementFactory),
            Arc::new(UreqTransport::new()),
        )
    }

    pub fn with_parts(
        config: &ConsoleConfig,
        elements: Arc<dyn ElementFactory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let store = Store::new(PlayerState {
            volume: config.volume.clamp(0.0, 1.0),
            ..Default::default()
        });
        let (rt, events) = AudioRuntime::new(store, config.autoplay, config.analyser, elements);
        let controller = SourceController::install(&rt.store, &rt.registry);
        let backends = Backends {
            radio: RadioBackend::new(config.radio.clone()),
            local: LocalBackend::new(),
            spotify: SpotifyBackend::new(&config.spotify, transport),
        };
        log::info!(
            "Console ready: {} radio station(s), autoplay {:?}",
            config.radio.len(),
            config.autoplay
        );
        Self {
            rt,
            events,
            controller,
            backends,
        }
    }

    pub fn runtime(&self) -> &AudioRuntime {
        &self.rt
    }

    pub fn store(&self) -> &Store {
        &self.rt.store
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn backends_mut(&mut self) -> &mut Backends {
        &mut self.backends
    }

    /// Record a user interaction. Returns `true` on the latching call.
    pub fn gesture(&self) -> bool {
        self.rt.gesture.mark_interacted()
    }

    /// Select a source and run the stop phase right away.
    pub fn select_source(&mut self, source: Source) {
        self.rt.store.set_source(source);
        self.controller.process(&mut self.backends, &self.rt);
    }

    pub fn play(&mut self) {
        let source = self.rt.store.source();
        self.backends.play(source, &self.rt);
    }

    pub fn pause(&mut self) {
        let source = self.rt.store.source();
        self.backends.pause(source, &self.rt);
    }

    pub fn stop(&mut self) {
        let source = self.rt.store.source();
        if let Err(e) = self.backends.stop(source, &self.rt) {
            log::warn!("Stopping {source} failed: {e}");
        }
        self.rt.store.set_play_state(false);
    }

    pub fn next(&mut self) {
        let source = self.rt.store.source();
        self.backends.next(source, &self.rt);
    }

    pub fn prev(&mut self) {
        let source = self.rt.store.source();
        self.backends.prev(source, &self.rt);
    }

    /// Select radio and start `station_id` (or the current station).
    pub fn radio(&mut self, station_id: Option<&str>) {
        self.select_source(Source::Radio);
        self.backends.radio.start(&self.rt, station_id);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.rt.store.set_volume(volume);
        self.backends.set_volume(self.rt.store.player().volume);
    }

    pub fn apply(&mut self, command: ConsoleCommand) -> CommandOutcome {
        log::debug!("Command: {command:?}");
        match command {
            ConsoleCommand::SelectSource(source) => self.select_source(source),
            ConsoleCommand::Play => self.play(),
            ConsoleCommand::Pause => self.pause(),
            ConsoleCommand::Stop => self.stop(),
            ConsoleCommand::Next => self.next(),
            ConsoleCommand::Prev => self.prev(),
            ConsoleCommand::Radio(station) => self.radio(station.as_deref()),
            ConsoleCommand::AddFiles(paths) => {
                let added = self.backends.local.add_files(paths);
                self.rt
                    .store
                    .toast(format!("Added {added} local file(s)"), ToastLevel::Info);
            }
            ConsoleCommand::SelectTrack(id) => {
                if !self.backends.local.select(&id) {
                    self.rt
                        .store
                        .toast(format!("Unknown track: {id}"), ToastLevel::Warn);
                } else if self.rt.store.source() == Source::Local {
                    self.backends.local.play_current(&self.rt);
                }
            }
            ConsoleCommand::Devices => {
                self.backends.spotify.refresh_devices(&self.rt);
                return CommandOutcome::Reply(self.describe_devices());
            }
            ConsoleCommand::Transfer(id) => self.backends.spotify.transfer_playback(&self.rt, &id),
            ConsoleCommand::Volume(v) => self.set_volume(v),
            ConsoleCommand::Gesture => {
                self.gesture();
            }
            ConsoleCommand::Say(text) => {
                let intent = intent::parse_intent(&text);
                log::info!("Intent {:?} from \"{text}\"", intent.kind);
                if let Some(command) = intent.command {
                    self.apply(command);
                }
                let reply = match intent.kind {
                    IntentKind::StatusReport => {
                        format!("Status: {}. All systems nominal.", self.status_line())
                    }
                    _ => intent.say,
                };
                return CommandOutcome::Reply(reply);
            }
            ConsoleCommand::Status => return CommandOutcome::Reply(self.status_line()),
            ConsoleCommand::Quit => return CommandOutcome::Quit,
        }
        CommandOutcome::Continue
    }

    /// Apply queued switches, worker completions and natural track ends.
    /// Returns the number of completions applied.
    pub fn update(&mut self) -> usize {
        self.controller.process(&mut self.backends, &self.rt);
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.rt.task_done();
            self.backends.handle(&self.rt, event);
            applied += 1;
        }
        self.backends.poll_ended(&self.rt);
        applied
    }

    /// Keep updating until nothing is in flight or `timeout` passes.
    /// Returns `true` when settled.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.update();
            if self.rt.in_flight() == 0 && !self.controller.has_pending() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!("Console did not settle, {} operation(s) in flight", self.rt.in_flight());
                return false;
            }
            match self.events.recv_timeout((deadline - now).min(Duration::from_millis(50))) {
                Ok(event) => {
                    self.rt.task_done();
                    self.backends.handle(&self.rt, event);
                }
                Err(_) => continue,
            }
        }
    }

    pub fn status_line(&self) -> String {
        let player = self.rt.store.player();
        let mut line = format!(
            "source={} playing={} volume={:.2}",
            player.source, player.playing, player.volume
        );
        if let Some(track) = player.track {
            line.push_str(&format!(" track=\"{}\" by {}", track.title, track.artist));
        }
        if player.source == Source::Local {
            if let Some(lyric) = self.backends.local.current_lyric() {
                line.push_str(&format!(" lyric=\"{lyric}\""));
            }
        }
        line
    }

    fn describe_devices(&self) -> String {
        let devices = self.backends.spotify.devices();
        if devices.is_empty() {
            return "No Spotify devices known yet; listing requested".to_string();
        }
        devices
            .iter()
            .map(|d| {
                let marker = if d.is_active { "*" } else { " " };
                format!("{marker} {} ({})", d.name, d.id)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
