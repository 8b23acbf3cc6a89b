use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Mutually exclusive playback origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Radio,
    Local,
    Spotify,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Radio, Source::Local, Source::Spotify];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Radio => "radio",
            Source::Local => "local",
            Source::Spotify => "spotify",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Radio => "Radio",
            Source::Local => "Local",
            Source::Spotify => "Spotify",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "radio" => Ok(Source::Radio),
            "local" => Ok(Source::Local),
            "spotify" => Ok(Source::Spotify),
            _ => Err(CommandError::InvalidValue {
                what: "source",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_art: Option<String>,
}

/// Player slice of the store. `playing` reflects the selected source only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerState {
    pub source: Source,
    pub playing: bool,
    pub volume: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackInfo>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            source: Source::Radio,
            playing: false,
            volume: 0.7,
            track: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub id: u64,
    pub text: String,
    pub level: ToastLevel,
}

/// Everything observers can see. Replaced whole on every action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleState {
    pub player: PlayerState,
    pub toasts: Vec<Toast>,
    /// Bumped on every source switch; completions issued under an older
    /// generation must not touch shared state.
    pub generation: u64,
}

type Watcher = Arc<dyn Fn(&ConsoleState, &ConsoleState) + Send + Sync>;

struct StoreInner {
    state: Mutex<Arc<ConsoleState>>,
    watchers: Mutex<Vec<Watcher>>,
    next_toast_id: AtomicU64,
}

/// Reactive store. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Oldest toasts are dropped past this count.
const MAX_TOASTS: usize = 32;

impl Store {
    pub fn new(player: PlayerState) -> Self {
        let state = ConsoleState {
            player,
            toasts: Vec::new(),
            generation: 0,
        };
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(Arc::new(state)),
                watchers: Mutex::new(Vec::new()),
                next_toast_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<ConsoleState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn player(&self) -> PlayerState {
        self.snapshot().player.clone()
    }

    pub fn source(&self) -> Source {
        self.snapshot().player.source
    }

    pub fn is_playing(&self) -> bool {
        self.snapshot().player.playing
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Register a watcher called with `(previous, next)` after every change.
    /// Watchers run outside the state lock and may dispatch further actions.
    pub fn subscribe<F>(&self, watcher: F)
    where
        F: Fn(&ConsoleState, &ConsoleState) + Send + Sync + 'static,
    {
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(watcher));
    }

    /// Build the next state from the current one. Returning `None` leaves the
    /// state untouched and notifies nobody.
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&ConsoleState) -> Option<ConsoleState>,
    {
        let (prev, next) = {
            let mut guard = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(next) = f(&guard) else {
                return;
            };
            let next = Arc::new(next);
            let prev = std::mem::replace(&mut *guard, next.clone());
            (prev, next)
        };

        let watchers: Vec<Watcher> = self
            .inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for watcher in watchers {
            watcher(&prev, &next);
        }
    }

    pub fn set_source(&self, source: Source) {
        self.update(|st| {
            if st.player.source == source {
                return None;
            }
            let mut next = st.clone();
            next.player.source = source;
            next.generation += 1;
            Some(next)
        });
    }

    pub fn set_play_state(&self, playing: bool) {
        self.update(|st| {
            if st.player.playing == playing {
                return None;
            }
            let mut next = st.clone();
            next.player.playing = playing;
            Some(next)
        });
    }

    /// Set `playing` only while `source` is still the selected source.
    pub fn set_play_state_if(&self, source: Source, playing: bool) {
        self.update(|st| {
            if st.player.source != source || st.player.playing == playing {
                return None;
            }
            let mut next = st.clone();
            next.player.playing = playing;
            Some(next)
        });
    }

    pub fn set_track(&self, track: Option<TrackInfo>) {
        self.update(|st| {
            if st.player.track == track {
                return None;
            }
            let mut next = st.clone();
            next.player.track = track;
            Some(next)
        });
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.update(|st| {
            if st.player.volume == volume {
                return None;
            }
            let mut next = st.clone();
            next.player.volume = volume;
            Some(next)
        });
    }

    pub fn toast(&self, text: impl Into<String>, level: ToastLevel) {
        let text = text.into();
        match level {
            ToastLevel::Info => log::info!("toast: {text}"),
            ToastLevel::Warn => log::warn!("toast: {text}"),
            ToastLevel::Error => log::error!("toast: {text}"),
        }
        let id = self.inner.next_toast_id.fetch_add(1, Ordering::Relaxed);
        self.update(|st| {
            let mut next = st.clone();
            next.toasts.push(Toast { id, text, level });
            if next.toasts.len() > MAX_TOASTS {
                let excess = next.toasts.len() - MAX_TOASTS;
                next.toasts.drain(..excess);
            }
            Some(next)
        });
    }

    pub fn clear_toast(&self, id: u64) {
        self.update(|st| {
            if !st.toasts.iter().any(|t| t.id == id) {
                return None;
            }
            let mut next = st.clone();
            next.toasts.retain(|t| t.id != id);
            Some(next)
        });
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(PlayerState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn default_player_state() {
        let store = Store::default();
        let p = store.player();
        assert_eq!(p.source, Source::Radio);
        assert!(!p.playing);
        assert!((p.volume - 0.7).abs() < 1e-6);
        assert!(p.track.is_none());
    }

    #[test]
    fn set_source_bumps_generation() {
        let store = Store::default();
        assert_eq!(store.generation(), 0);
        store.set_source(Source::Local);
        assert_eq!(store.generation(), 1);
        // Same source again is not a switch
        store.set_source(Source::Local);
        assert_eq!(store.generation(), 1);
        store.set_source(Source::Spotify);
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn updates_replace_whole_state() {
        let store = Store::default();
        let before = store.snapshot();
        store.set_play_state(true);
        let after = store.snapshot();
        assert!(!before.player.playing);
        assert!(after.player.playing);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn watchers_see_prev_and_next() {
        let store = Store::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_c = seen.clone();
        store.subscribe(move |prev, next| {
            seen_c
                .lock()
                .unwrap()
                .push((prev.player.source, next.player.source));
        });
        store.set_source(Source::Spotify);
        assert_eq!(*seen.lock().unwrap(), vec![(Source::Radio, Source::Spotify)]);
    }

    #[test]
    fn no_op_actions_do_not_notify() {
        let store = Store::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_c = calls.clone();
        store.subscribe(move |_, _| {
            calls_c.fetch_add(1, Ordering::SeqCst);
        });
        store.set_play_state(false);
        store.set_source(Source::Radio);
        store.set_track(None);
        store.clear_toast(99);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn watcher_can_dispatch_nested_actions() {
        let store = Store::default();
        let inner = store.clone();
        store.subscribe(move |prev, next| {
            if prev.player.source != next.player.source {
                inner.set_play_state(false);
            }
        });
        store.set_play_state(true);
        store.set_source(Source::Local);
        assert!(!store.is_playing());
    }

    #[test]
    fn toasts_get_unique_ids_and_clear() {
        let store = Store::default();
        store.toast("one", ToastLevel::Info);
        store.toast("two", ToastLevel::Warn);
        let toasts = store.snapshot().toasts.clone();
        assert_eq!(toasts.len(), 2);
        assert_ne!(toasts[0].id, toasts[1].id);
        store.clear_toast(toasts[0].id);
        let left = store.snapshot().toasts.clone();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].text, "two");
    }

    #[test]
    fn toast_history_is_bounded() {
        let store = Store::default();
        for i in 0..(MAX_TOASTS + 5) {
            store.toast(format!("t{i}"), ToastLevel::Info);
        }
        let toasts = store.snapshot().toasts.clone();
        assert_eq!(toasts.len(), MAX_TOASTS);
        assert_eq!(toasts[0].text, "t5");
    }

    #[test]
    fn conditional_play_state_checks_source() {
        let store = Store::default();
        store.set_play_state_if(Source::Local, true);
        assert!(!store.is_playing());
        store.set_play_state_if(Source::Radio, true);
        assert!(store.is_playing());
    }

    #[test]
    fn volume_is_clamped() {
        let store = Store::default();
        store.set_volume(1.7);
        assert!((store.player().volume - 1.0).abs() < 1e-6);
        store.set_volume(-0.2);
        assert!(store.player().volume.abs() < 1e-6);
    }

    #[test]
    fn source_parses_case_insensitive() {
        assert_eq!("Radio".parse::<Source>().unwrap(), Source::Radio);
        assert_eq!(" spotify ".parse::<Source>().unwrap(), Source::Spotify);
        assert!("tape".parse::<Source>().is_err());
    }

    #[test]
    fn state_serializes_lowercase_source() {
        let store = Store::default();
        let json = serde_json::to_value(store.snapshot().as_ref()).unwrap();
        assert_eq!(json["player"]["source"], "radio");
        assert!(json["player"].get("track").is_none());
    }
}
