// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! HTTP and websocket surface over the engine, relay and lease registry.

use crate::auth::{StaticTokens, TokenVerifier, require_lease};
use crate::config::Config;
use crate::error::EngineError;
use crate::lease::LeaseRegistry;
use crate::manager::{EngineDescriptor, EngineManager};
use crate::relay::{ClientSession, Frame, RelayConfig, TransportRelay};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EngineManager>,
    pub relay: Arc<TransportRelay>,
    pub lease: Arc<LeaseRegistry>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let engine = Arc::new(
            EngineManager::new(&config.engines_dir).with_stop_timeout(config.stop_timeout()),
        );
        let relay = TransportRelay::new(
            Arc::clone(&engine),
            RelayConfig {
                teardown_grace: config.teardown_grace(),
                stop_engine_on_abandon: config.stop_engine_on_abandon,
            },
        );
        Self {
            engine,
            relay,
            lease: Arc::new(LeaseRegistry::new(config.inactivity_timeout())),
            verifier: Arc::new(StaticTokens::new(config.tokens.iter().cloned())),
        }
    }
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

#[derive(Deserialize)]
pub struct SendRequest {
    pub msg: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Serialize)]
pub struct StartResponse {
    pub started: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct StopResponse {
    pub stopped: bool,
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct SendResponse {
    pub accepted: bool,
    pub message: &'static str,
}

/// Build the router. Everything except `/receiver/hello` sits behind the
/// lease gate.
pub fn build_router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/engine/start", post(start_engine))
        .route("/engine/stop", get(stop_engine))
        .route("/engine/send", post(send_command))
        .route("/engine/running", get(engine_running))
        .route("/user/logout", get(logout))
        .route("/ws_engine", get(ws_engine))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_lease));

    Router::new()
        .route("/receiver/hello", get(hello))
        .merge(gated)
        .with_state(state)
}

// ===== Handlers =====

async fn hello() -> &'static str {
    debug!("[http] check connection request");
    "Hello"
}

async fn start_engine(
    State(state): State<AppState>,
    Json(descriptor): Json<EngineDescriptor>,
) -> Result<Json<StartResponse>, ErrorResponse> {
    info!("[http] start engine request ({})", descriptor.name);
    let started = match state.engine.start_engine(&descriptor).await {
        Ok(started) => started,
        Err(e @ EngineError::InvalidDescriptor(_)) => {
            warn!("[http] {e}");
            return Err(ErrorResponse {
                error: e.to_string(),
            });
        }
        Err(e) => {
            warn!("[http] start of {} failed: {e}", descriptor.name);
            false
        }
    };

    let message = if started {
        format!("Engine {} started", descriptor.name)
    } else {
        format!("Can't start engine {}", descriptor.name)
    };
    info!("[http] {message}");
    Ok(Json(StartResponse { started, message }))
}

async fn stop_engine(State(state): State<AppState>) -> Json<StopResponse> {
    info!("[http] stop engine request");
    state.engine.stop_engine().await;
    Json(StopResponse {
        stopped: true,
        message: "Engine stopped",
    })
}

async fn send_command(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Json<SendResponse> {
    let source = request.source.as_deref().unwrap_or("http");
    debug!("[http] command from {source}");
    match state.engine.send_command(&request.msg) {
        Ok(()) => Json(SendResponse {
            accepted: true,
            message: "Command sent",
        }),
        Err(e) => {
            warn!("[http] engine is not running, command ignored ({e})");
            Json(SendResponse {
                accepted: false,
                message: "Engine is not running",
            })
        }
    }
}

async fn engine_running(State(state): State<AppState>) -> Json<bool> {
    Json(state.engine.is_engine_running())
}

async fn logout(State(state): State<AppState>) -> &'static str {
    state.lease.release_all()
}

async fn ws_engine(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_session(socket, state.relay))
}

/// Pump one websocket connection through the relay until either side closes.
async fn serve_session(socket: WebSocket, relay: Arc<TransportRelay>) {
    let (session, mut frames) = ClientSession::open();
    let id = session.id();
    relay.on_session_opened(session);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let reason = loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if ws_tx.send(Message::Text(text.clone().into())).await.is_err() {
                        relay.requeue_undelivered(id, vec![text]);
                        break "send failed";
                    }
                }
                Some(Frame::Close) => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break "replaced";
                }
                None => break "relay gone",
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = relay.on_client_text(id, text.as_str()) {
                        debug!("[relay] dropped text from session {id}: {e}");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break "client closed",
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("[relay] session {id} read error: {e}");
                    break "read error";
                }
            },
        }
    };

    frames.close();
    let mut unsent = Vec::new();
    while let Ok(frame) = frames.try_recv() {
        if let Frame::Text(text) = frame {
            unsent.push(text);
        }
    }
    relay.requeue_undelivered(id, unsent);
    relay.on_session_closed(id, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;

    fn config() -> Config {
        Config {
            engines_dir: "/bin".into(),
            stop_timeout_secs: 1,
            ..Config::default()
        }
    }

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_hello_is_ungated() {
        let app = build_router(AppState::new(&config()));
        let response = app.oneshot(get_request("/receiver/hello", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Hello");
    }

    #[tokio::test]
    async fn test_missing_bearer_is_unauthorized() {
        let app = build_router(AppState::new(&config()));
        let response = app.oneshot(get_request("/engine/running", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_text(response).await,
            "Missing or invalid Authorization header"
        );
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected() {
        let state = AppState::new(&Config {
            tokens: vec!["alpha".into()],
            ..config()
        });
        let app = build_router(state.clone());

        let response = app.oneshot(get_request("/engine/running", Some("beta"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "Invalid token");
        assert_eq!(state.lease.current_holder(), None);
    }

    #[tokio::test]
    async fn test_second_user_is_busy_until_logout() {
        let state = AppState::new(&config());
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(get_request("/engine/running", Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!(false));

        let response = app
            .clone()
            .oneshot(get_request("/engine/running", Some("bob")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "Server is busy");

        let response = app
            .clone()
            .oneshot(get_request("/user/logout", Some("alice")))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "Logged out");

        let response = app.oneshot(get_request("/engine/running", Some("bob"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.lease.current_holder().as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_engine_lifecycle_over_http() {
        let state = AppState::new(&config());
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/engine/start",
                "alice",
                serde_json::json!({"name": "cat", "path": "cat"}),
            ))
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"started": true, "message": "Engine cat started"})
        );
        assert!(state.engine.is_engine_running());

        let response = app
            .clone()
            .oneshot(post_json(
                "/engine/send",
                "alice",
                serde_json::json!({"msg": "uci", "source": "test"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["accepted"], true);

        let response = app
            .clone()
            .oneshot(get_request("/engine/stop", Some("alice")))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["stopped"], true);
        assert!(!state.engine.is_engine_running());

        let response = app
            .oneshot(post_json(
                "/engine/send",
                "alice",
                serde_json::json!({"msg": "uci"}),
            ))
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"accepted": false, "message": "Engine is not running"})
        );
    }

    #[tokio::test]
    async fn test_start_missing_engine() {
        let app = build_router(AppState::new(&config()));
        let response = app
            .clone()
            .oneshot(post_json(
                "/engine/start",
                "alice",
                serde_json::json!({"name": "Ghost", "path": "no-such-engine"}),
            ))
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"started": false, "message": "Can't start engine Ghost"})
        );

        let response = app
            .oneshot(post_json(
                "/engine/start",
                "alice",
                serde_json::json!({"name": "sh", "path": "../bin/sh"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
