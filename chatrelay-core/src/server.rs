//! HTTP surface of the relay.
//!
//! One streaming route. Every failure that happens before the first response
//! byte, from a body that fails to parse to an upstream that refuses the
//! request, answers `500` with a `{"error": ...}` JSON body. Once streaming
//! has begun there is no in-band error signal; the connection is simply
//! aborted.

use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::model::{ChatTurnRequest, ErrorBody};
use crate::providers::build_provider;
use crate::relay::Relay;

#[derive(Clone)]
struct AppState {
    relay: Relay,
}

pub fn router(relay: Relay) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .with_state(AppState { relay })
}

// GET /health
async fn health() -> &'static str {
    "ok"
}

// POST /api/chat
async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatTurnRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return failure(RelayError::InvalidRequest(rejection.body_text()).to_string());
        }
    };
    match state.relay.open(&req.messages).await {
        Ok(stream) => {
            let mut resp = Response::new(Body::from_stream(stream));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            resp
        }
        Err(e) => failure(e.to_string()),
    }
}

/// Every pre-stream failure takes the same shape: 500 with a JSON error body.
fn failure(message: String) -> Response {
    error!(error = %message, "chat request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: message }),
    )
        .into_response()
}

/// Build the provider from config and run the relay until the process stops.
pub async fn serve(cfg: &Config) -> RelayResult<()> {
    let provider = build_provider(cfg)?;
    let relay = Relay::new(provider);
    info!(provider = %relay.provider_name(), "relay ready");

    let app = router(relay);
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
