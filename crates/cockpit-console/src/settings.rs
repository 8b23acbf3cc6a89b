use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::{AnalyserOptions, AutoplayPolicy};
use crate::backend::radio::{RadioStation, default_stations};
use crate::backend::spotify::SpotifyConfig;

pub const DEFAULT_WEB_PORT: u16 = 9002;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_WEB_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub version: u32,
    pub radio: Vec<RadioStation>,
    pub autoplay: AutoplayPolicy,
    pub volume: f32,
    pub analyser: AnalyserOptions,
    pub spotify: SpotifyConfig,
    pub web: WebConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            version: 1,
            radio: default_stations(),
            autoplay: AutoplayPolicy::default(),
            volume: 0.7,
            analyser: AnalyserOptions::default(),
            spotify: SpotifyConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl ConsoleConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cockpit").join("console.json"))
    }

    /// Load from the platform config dir, falling back to defaults.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                log::warn!("No config directory on this platform, using defaults");
                Self::default()
            }
        }
    }

    /// Load `path`. A missing file or bad JSON yields defaults plus a log line.
    /// Spotify tokens always come from the environment.
    pub fn load_from(path: &Path) -> Self {
        let config = match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Invalid config {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        };
        Self {
            spotify: config.spotify.clone().with_env_tokens(),
            ..config
        }
    }

    pub fn save(&self) {
        if let Some(path) = Self::default_path() {
            self.save_to(&path);
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                log::warn!("Failed to create {}: {e}", dir.display());
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::warn!("Failed to save config to {}: {e}", path.display());
                }
            }
            Err(e) => log::warn!("Failed to serialize config: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConsoleConfig::default();
        assert_eq!(config.radio.len(), 2);
        assert_eq!(config.autoplay, AutoplayPolicy::RequireGesture);
        assert_eq!(config.web.port, DEFAULT_WEB_PORT);
        assert_eq!(config.spotify.api_base, "https://api.spotify.com/v1");
        assert_eq!(config.analyser.fft_size, 2048);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ConsoleConfig =
            serde_json::from_str(r#"{"autoplay":"allowed","web":{"port":9100}}"#).unwrap();
        assert_eq!(config.autoplay, AutoplayPolicy::Allowed);
        assert_eq!(config.web.port, 9100);
        assert!(config.web.enabled);
        assert_eq!(config.radio, default_stations());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("console.json");
        let mut config = ConsoleConfig::default();
        config.volume = 0.25;
        config.radio.truncate(1);
        config.spotify.client_id = Some("abc".into());
        config.save_to(&path);

        let loaded = ConsoleConfig::load_from(&path);
        assert_eq!(loaded.volume, 0.25);
        assert_eq!(loaded.radio.len(), 1);
        assert_eq!(loaded.spotify.client_id.as_deref(), Some("abc"));
    }

    #[test]
    fn tokens_are_not_written() {
        let mut config = ConsoleConfig::default();
        config.spotify.access_token = Some("secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn bad_or_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.json");
        assert_eq!(ConsoleConfig::load_from(&path).radio, default_stations());
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(ConsoleConfig::load_from(&path).version, 1);
    }
}
