//! HTTP surface: the interactions webhook and the Spotify OAuth callback.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::HeaderValue, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chorus_core::config::SPOTIFY_CALLBACK_PATH;
use chorus_core::{LinkStore, LinkedAccount, OAuthFlow};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::router::CommandRouter;

pub const INTERACTIONS_PATH: &str = "/v1/discord/interactions";

pub const CALLBACK_SUCCESS: &str = "You can return to Discord now :)";

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<CommandRouter>,
    pub oauth: Arc<dyn OAuthFlow>,
    pub links: Arc<dyn LinkStore>,
    /// Cancelled when the server starts shutting down.
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(INTERACTIONS_PATH, post(interactions))
        .route(SPOTIFY_CALLBACK_PATH, get(spotify_callback))
        .route("/", get(index))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn interactions(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    // In-flight commands wind down once shutdown begins.
    let cancel = state.shutdown.child_token();
    let routed = state.router.handle_request(&body, &headers, cancel).await;
    match routed.outcome {
        Ok(Some(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (e.status(), Json(e.body())).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

async fn spotify_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, &'static str) {
    if let Some(reason) = params.error {
        warn!(reason = %reason, "spotify authorization denied");
        return (StatusCode::BAD_REQUEST, "Spotify authorization was not granted.");
    }

    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(code), Some(account_id)) = (non_empty(params.code), non_empty(params.state)) else {
        warn!("callback without code or state");
        return (StatusCode::BAD_REQUEST, "Missing code or state.");
    };

    let token = match state.oauth.exchange_code(&code).await {
        Ok(token) => token,
        Err(e) => {
            error!(account_id = %account_id, error = %e, "code exchange failed");
            return (
                StatusCode::BAD_GATEWAY,
                "Could not complete the Spotify login. Try /register again.",
            );
        }
    };

    let link = LinkedAccount {
        account_id: account_id.clone(),
        token,
    };
    if let Err(e) = state.links.upsert_link(&link).await {
        error!(account_id = %account_id, error = %e, "failed to store linked account");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Could not save your Spotify link. Try again later.",
        );
    }

    info!(account_id = %account_id, "linked spotify account");
    (StatusCode::OK, CALLBACK_SUCCESS)
}

async fn index() -> Response {
    let mut headers = HeaderMap::new();
    headers.append("X-Clacks-Overhead", HeaderValue::from_static("GNU Corey Kendall"));
    headers.append("X-Clacks-Overhead", HeaderValue::from_static("GNU Terry Pratchett"));
    (
        StatusCode::IM_A_TEAPOT,
        headers,
        Html("<p>Not much to see here. Chorus answers slash commands in Discord.</p>"),
    )
        .into_response()
}
