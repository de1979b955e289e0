//! Spotify OAuth2 plumbing.
//!
//! Builds authorization URLs that carry the Discord account id as `state`,
//! exchanges callback codes for tokens and refreshes expiring tokens.

use std::borrow::Cow;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use reqwest::redirect::Policy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const SPOTIFY_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Scopes needed by the scraper and the slash commands.
pub const SPOTIFY_SCOPES: &[&str] = &[
    "user-read-private",
    "user-read-playback-state",
    "user-read-currently-playing",
    "user-read-recently-played",
    "user-top-read",
    "playlist-modify-public",
];

/// Bearer token pair for one linked Spotify account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// True when the token is already expired or will be within `margin`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - margin <= now,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: Option<String>,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Spotify endpoints and scopes with the given app credentials.
    pub fn spotify(client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            auth_url: SPOTIFY_AUTH_URL.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
            redirect_uri: Some(redirect_uri.to_string()),
            scopes: SPOTIFY_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// The OAuth operations the bot depends on.
#[async_trait]
pub trait OAuthFlow: Send + Sync {
    /// Authorization URL whose `state` round-trips `state` verbatim.
    fn authorize_url(&self, state: &str) -> Result<String>;

    async fn exchange_code(&self, code: &str) -> Result<AuthToken>;

    async fn refresh(&self, refresh_token: &str) -> Result<AuthToken>;
}

#[derive(Debug, Clone)]
pub struct AuthBridge {
    config: OAuthConfig,
    http_client: Client,
}

impl AuthBridge {
    pub fn new(config: OAuthConfig) -> Self {
        // The token endpoint must not be followed through redirects.
        let http_client = Client::builder()
            .redirect(Policy::none())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            config,
            http_client,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }
}

#[async_trait]
impl OAuthFlow for AuthBridge {
    fn authorize_url(&self, state: &str) -> Result<String> {
        let client = build_client(&self.config)?;
        let state = state.to_string();
        let mut req = client.authorize_url(move || CsrfToken::new(state));
        for scope in &self.config.scopes {
            req = req.add_scope(Scope::new(scope.clone()));
        }
        let (url, _csrf) = req.url();
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<AuthToken> {
        let client = build_client(&self.config)?;
        let mut req = client.exchange_code(AuthorizationCode::new(code.to_string()));
        if let Some(redirect_uri) = &self.config.redirect_uri {
            req = req.set_redirect_uri(Cow::Owned(RedirectUrl::new(redirect_uri.to_string())?));
        }
        let token = req.request_async(&self.http_client).await?;

        info!("exchanged OAuth code for spotify token");
        Ok(into_auth_token(&token))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthToken> {
        let client = build_client(&self.config)?;
        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http_client)
            .await?;

        Ok(into_auth_token(&token))
    }
}

fn into_auth_token(token: &impl TokenResponse) -> AuthToken {
    let expires_at = token
        .expires_in()
        .and_then(|d| Duration::from_std(d).ok())
        .map(|d| Utc::now() + d);
    AuthToken {
        access_token: token.access_token().secret().to_string(),
        refresh_token: token.refresh_token().map(|t| t.secret().to_string()),
        expires_at,
    }
}

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

fn build_client(config: &OAuthConfig) -> Result<ConfiguredClient> {
    let auth_url =
        AuthUrl::new(config.auth_url.clone()).map_err(|_| anyhow!("invalid auth_url"))?;
    let token_url =
        TokenUrl::new(config.token_url.clone()).map_err(|_| anyhow!("invalid token_url"))?;
    let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
        .set_client_secret(ClientSecret::new(config.client_secret.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url);
    if let Some(redirect_uri) = &config.redirect_uri {
        client = client.set_redirect_uri(RedirectUrl::new(redirect_uri.clone())?);
    }
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> AuthBridge {
        AuthBridge::new(OAuthConfig::spotify(
            "client-id",
            "client-secret",
            "https://bot.example/v1/spotify/auth/callback",
        ))
    }

    #[test]
    fn test_authorize_url_carries_state() {
        let url = bridge().authorize_url("123456789").unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let state = parsed
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned());

        assert_eq!(parsed.host_str(), Some("accounts.spotify.com"));
        assert_eq!(state.as_deref(), Some("123456789"));
        assert!(url.contains("user-read-recently-played"));
        assert!(url.contains("client_id=client-id"));
    }

    #[test]
    fn test_expires_within() {
        let now = Utc::now();
        let token = AuthToken {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            expires_at: Some(now + Duration::seconds(30)),
        };
        assert!(token.expires_within(Duration::seconds(60), now));
        assert!(!token.expires_within(Duration::seconds(10), now));

        let no_expiry = AuthToken {
            expires_at: None,
            ..token
        };
        assert!(!no_expiry.expires_within(Duration::seconds(60), now));
    }
}
