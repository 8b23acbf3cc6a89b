use std::sync::{Mutex, PoisonError};

use serde::Deserialize;

use super::client::{ApiRequest, Method, RequestBody, Transport};
use crate::error::SpotifyError;

#[derive(Debug, Clone, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

/// Bearer token state shared by all Spotify workers.
///
/// Tokens come from outside (config or environment); the only thing done here
/// is the refresh-token grant.
pub struct SpotifyAuth {
    tokens: Mutex<Tokens>,
    // Held for the whole grant so concurrent 401s share one refresh
    refresh_lock: Mutex<()>,
    client_id: Option<String>,
    token_url: String,
}

impl SpotifyAuth {
    pub fn new(accounts_base: &str, client_id: Option<String>) -> Self {
        Self {
            tokens: Mutex::new(Tokens::default()),
            refresh_lock: Mutex::new(()),
            client_id,
            token_url: format!("{}/api/token", accounts_base.trim_end_matches('/')),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .access
            .clone()
    }

    pub fn set_tokens(&self, access: Option<String>, refresh: Option<String>) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.access = access;
        tokens.refresh = refresh;
    }

    /// Exchange the refresh token for a new access token. On any failure the
    /// stored tokens are left as they were.
    ///
    /// `rejected` is the access token that got the 401. If another caller
    /// already replaced it, that refresh is reused and no grant is sent.
    pub fn refresh(&self, transport: &dyn Transport, rejected: Option<&str>) -> Result<(), SpotifyError> {
        let _flight = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rejected) = rejected {
            if self.access_token().is_some_and(|current| current != rejected) {
                log::debug!("Spotify token already refreshed, skipping grant");
                return Ok(());
            }
        }

        let refresh_token = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh
            .clone()
            .ok_or_else(|| SpotifyError::Refresh("no refresh token".into()))?;
        let client_id = self
            .client_id
            .clone()
            .ok_or_else(|| SpotifyError::Refresh("no client id configured".into()))?;

        let request = ApiRequest {
            method: Method::Post,
            url: self.token_url.clone(),
            bearer: None,
            body: RequestBody::Form(vec![
                ("grant_type".into(), "refresh_token".into()),
                ("refresh_token".into(), refresh_token.clone()),
                ("client_id".into(), client_id),
            ]),
        };
        let response = transport
            .send(&request)
            .map_err(|e| SpotifyError::Refresh(e.to_string()))?;
        if !response.is_success() {
            return Err(SpotifyError::Refresh(format!("HTTP {}", response.status)));
        }
        let parsed: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| SpotifyError::Refresh(format!("bad token response: {e}")))?;

        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.access = Some(parsed.access_token);
        // Spotify may omit the refresh token; keep the old one then
        tokens.refresh = Some(parsed.refresh_token.unwrap_or(refresh_token));
        log::info!("Spotify access token refreshed");
        Ok(())
    }
}
