use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::auth::SpotifyAuth;
use super::SpotifyConfig;
use crate::error::SpotifyError;
use crate::store::TrackInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    Json(String),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One blocking HTTP exchange. Non-2xx statuses are responses, not errors.
pub trait Transport: Send + Sync {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SpotifyError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(10)))
            .build()
            .into();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SpotifyError> {
        let url = request.url.as_str();
        let result = match request.method {
            Method::Get => {
                let mut builder = self.agent.get(url);
                if let Some(ref token) = request.bearer {
                    builder = builder.header("Authorization", format!("Bearer {token}"));
                }
                builder.call()
            }
            Method::Put => send_with_body(self.agent.put(url), request),
            Method::Post => send_with_body(self.agent.post(url), request),
        };
        let mut response = result.map_err(|e| SpotifyError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| SpotifyError::Transport(e.to_string()))?;
        Ok(ApiResponse { status, body })
    }
}

fn send_with_body(
    builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
    request: &ApiRequest,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    let builder = match request.bearer {
        Some(ref token) => builder.header("Authorization", format!("Bearer {token}")),
        None => builder,
    };
    match request.body {
        RequestBody::Empty => builder.send_empty(),
        RequestBody::Json(ref json) => builder
            .header("Content-Type", "application/json")
            .send(json.as_str()),
        RequestBody::Form(ref pairs) => {
            builder.send_form(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        }
    }
}

/// Connect device as reported by `GET /me/player/devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyDevice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<RawDevice>,
}

/// Restricted devices come back without an id.
#[derive(Deserialize)]
struct RawDevice {
    id: Option<String>,
    name: String,
    #[serde(default)]
    is_active: bool,
}

#[derive(Deserialize)]
struct CurrentlyPlaying {
    item: Option<PlayingItem>,
}

/// A track, or an episode (no artists or album).
#[derive(Deserialize)]
struct PlayingItem {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<Named>,
    album: Option<Album>,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct Album {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct Image {
    url: String,
}

impl From<PlayingItem> for TrackInfo {
    fn from(item: PlayingItem) -> Self {
        let artist = item
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        // Spotify lists images widest first
        let album_art = item
            .album
            .and_then(|album| album.images.into_iter().next())
            .map(|image| image.url);
        Self {
            id: item.id.unwrap_or_default(),
            title: item.name,
            artist,
            album_art,
        }
    }
}

/// Playback-control slice of the Spotify Web API.
pub struct SpotifyClient {
    transport: Arc<dyn Transport>,
    auth: SpotifyAuth,
    api_base: String,
}

impl SpotifyClient {
    pub fn new(config: &SpotifyConfig, transport: Arc<dyn Transport>) -> Self {
        let auth = SpotifyAuth::new(&config.accounts_base, config.client_id.clone());
        auth.set_tokens(config.access_token.clone(), config.refresh_token.clone());
        Self {
            transport,
            auth,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn auth(&self) -> &SpotifyAuth {
        &self.auth
    }

    pub fn has_token(&self) -> bool {
        self.auth.access_token().is_some()
    }

    /// Send with the current bearer token. A 401 triggers one refresh and one
    /// retry; whatever the retry returns is final.
    fn authorized(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<ApiResponse, SpotifyError> {
        let token = self.auth.access_token().ok_or(SpotifyError::NotConnected)?;
        let mut request = ApiRequest {
            method,
            url: format!("{}{path}", self.api_base),
            bearer: Some(token),
            body,
        };
        let response = self.transport.send(&request)?;
        if response.status != 401 {
            return Ok(response);
        }

        log::info!("Spotify returned 401 for {path}, refreshing token");
        self.auth
            .refresh(self.transport.as_ref(), request.bearer.as_deref())?;
        request.bearer = self.auth.access_token();
        self.transport.send(&request)
    }

    fn expect_success(&self, method: Method, path: &str, body: RequestBody) -> Result<ApiResponse, SpotifyError> {
        let response = self.authorized(method, path, body)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(SpotifyError::Status(response.status))
        }
    }

    pub fn play(&self, device_id: Option<&str>) -> Result<(), SpotifyError> {
        let path = match device_id {
            Some(id) => format!("/me/player/play?device_id={id}"),
            None => "/me/player/play".to_string(),
        };
        self.expect_success(Method::Put, &path, RequestBody::Empty)
            .map(drop)
    }

    pub fn pause(&self) -> Result<(), SpotifyError> {
        self.expect_success(Method::Put, "/me/player/pause", RequestBody::Empty)
            .map(drop)
    }

    pub fn next(&self) -> Result<(), SpotifyError> {
        self.expect_success(Method::Post, "/me/player/next", RequestBody::Empty)
            .map(drop)
    }

    /// Move playback to `device_id` without starting it.
    pub fn transfer(&self, device_id: &str) -> Result<(), SpotifyError> {
        let body = serde_json::json!({ "device_ids": [device_id], "play": false });
        self.expect_success(Method::Put, "/me/player", RequestBody::Json(body.to_string()))
            .map(drop)
    }

    /// What the account is playing now. `None` when nothing is (204 or a
    /// null item).
    pub fn currently_playing(&self) -> Result<Option<TrackInfo>, SpotifyError> {
        let response = self.expect_success(
            Method::Get,
            "/me/player/currently-playing",
            RequestBody::Empty,
        )?;
        if response.status == 204 || response.body.trim().is_empty() {
            return Ok(None);
        }
        let playing: CurrentlyPlaying = serde_json::from_str(&response.body)
            .map_err(|e| SpotifyError::Decode(e.to_string()))?;
        Ok(playing.item.map(TrackInfo::from))
    }

    pub fn devices(&self) -> Result<Vec<SpotifyDevice>, SpotifyError> {
        let response = self.expect_success(Method::Get, "/me/player/devices", RequestBody::Empty)?;
        let list: DeviceList = serde_json::from_str(&response.body)
            .map_err(|e| SpotifyError::Decode(e.to_string()))?;
        Ok(list
            .devices
            .into_iter()
            .filter_map(|d| {
                Some(SpotifyDevice {
                    id: d.id?,
                    name: d.name,
                    is_active: d.is_active,
                })
            })
            .collect())
    }
}
