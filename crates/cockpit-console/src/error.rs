use thiserror::Error;

/// Failure of a media element or a local/radio start sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// The autoplay policy requires a user gesture that has not happened yet.
    #[error("playback blocked until the first user gesture")]
    AutoplayBlocked,
    /// A pause/stop/load arrived while `play()` was still opening the source.
    #[error("play request interrupted")]
    Interrupted,
    #[error("no source loaded")]
    NoSource,
    #[error("failed to open {0}")]
    Open(String),
    #[error("unsupported or unreadable media: {0}")]
    Probe(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("audio output unavailable: {0}")]
    Device(String),
    /// The element's worker thread is gone.
    #[error("media element is no longer running")]
    ElementGone,
}

/// Failure of a Spotify Web API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpotifyError {
    #[error("no Spotify access token")]
    NotConnected,
    #[error("Spotify API returned HTTP {0}")]
    Status(u16),
    #[error("Spotify request failed: {0}")]
    Transport(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("unexpected Spotify response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'{command}' expects {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },
    #[error("invalid value '{value}' for {what}")]
    InvalidValue { what: &'static str, value: String },
}

/// A backend's `stop()` failed. Logged by the source controller, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error(transparent)]
    Spotify(#[from] SpotifyError),
}
