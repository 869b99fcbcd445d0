//! HTTP facade: door status, door remote and light over plain GETs.
//!
//! | Route                | Action                                     |
//! |----------------------|--------------------------------------------|
//! | `GET /status`        | logical state of the door switch input     |
//! | `GET /door?state=N`  | set the door remote relay (`N` is 0 or 1)  |
//! | `GET /light?state=N` | set the light relay                        |
//!
//! Every body carries a `status` field equal to the HTTP status code.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use gpiod_config::HardwareConfig;

use crate::hardware::{Hardware, HardwareError};

/// Shared state for the route handlers.
pub struct HttpState {
    pub hardware: Arc<dyn Hardware>,
    /// Which pins the door switch, door remote and light are wired to.
    pub pins: HardwareConfig,
}

#[derive(Debug, Serialize)]
struct DoorStatus {
    status: u16,
    state: u8,
}

#[derive(Debug, Serialize)]
struct StateChanged {
    status: u16,
    #[serde(rename = "newState")]
    new_state: u8,
}

#[derive(Debug, Serialize)]
struct Failure {
    status: u16,
    error: &'static str,
}

fn failure(status: StatusCode, error: &'static str) -> Response {
    let body = Failure {
        status: status.as_u16(),
        error,
    };
    (status, Json(body)).into_response()
}

fn bad_request() -> Response {
    failure(StatusCode::BAD_REQUEST, "bad request")
}

fn hardware_fault(err: &HardwareError) -> Response {
    warn!(error = %err, "Hardware operation failed");
    failure(StatusCode::INTERNAL_SERVER_ERROR, "hardware fault")
}

pub fn router(state: Arc<HttpState>) -> axum::Router {
    axum::Router::new()
        .route("/status", get(handle_status))
        .route("/door", get(handle_door))
        .route("/light", get(handle_light))
        .fallback(handle_not_found)
        .with_state(state)
}

/// Serve `router(state)` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<HttpState>,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP facade listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP facade stopped");
    Ok(())
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_status(State(state): State<Arc<HttpState>>) -> Response {
    let index = state.pins.door_switch_input;
    match state.hardware.read_input(index) {
        Ok(raw) => {
            let closed = !raw;
            info!(index, raw, state = closed, "Door status queried");
            let body = DoorStatus {
                status: StatusCode::OK.as_u16(),
                state: u8::from(closed),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => hardware_fault(&e),
    }
}

async fn handle_door(
    State(state): State<Arc<HttpState>>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Response {
    set_relay(&state, state.pins.door_remote_relay, query)
}

async fn handle_light(
    State(state): State<Arc<HttpState>>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Response {
    set_relay(&state, state.pins.light_relay, query)
}

async fn handle_not_found() -> Response {
    failure(StatusCode::NOT_FOUND, "not found")
}

fn set_relay(
    state: &HttpState,
    relay: u8,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Response {
    let Some(on) = query.ok().and_then(|Query(params)| parse_state(&params)) else {
        return bad_request();
    };

    info!(index = relay, state = on, "Setting relay");
    match state.hardware.write_relay(relay, on) {
        Ok(()) => {
            let body = StateChanged {
                status: StatusCode::OK.as_u16(),
                new_state: u8::from(on),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => hardware_fault(&e),
    }
}

/// `state=0` or `state=1`; anything else is rejected.
fn parse_state(params: &HashMap<String, String>) -> Option<bool> {
    match params.get("state").map(String::as_str) {
        Some("0") => Some(false),
        Some("1") => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MemoryHardware;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_state() -> (Arc<MemoryHardware>, Arc<HttpState>) {
        let hw = Arc::new(MemoryHardware::new(8));
        let state = Arc::new(HttpState {
            hardware: hw.clone(),
            pins: HardwareConfig {
                door_switch_input: 2,
                door_remote_relay: 0,
                light_relay: 1,
                ..HardwareConfig::default()
            },
        });
        (hw, state)
    }

    async fn get_json(state: Arc<HttpState>, uri: &str) -> (StatusCode, Value) {
        let req = Request::get(uri).body(Body::empty()).unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_reports_inverted_switch() {
        let (hw, state) = test_state();

        let (code, body) = get_json(state.clone(), "/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({"status": 200, "state": 1}));

        hw.set_input(2, true).unwrap();
        let (_, body) = get_json(state, "/status").await;
        assert_eq!(body, json!({"status": 200, "state": 0}));
    }

    #[tokio::test]
    async fn test_door_sets_remote_relay() {
        let (hw, state) = test_state();

        let (code, body) = get_json(state.clone(), "/door?state=1").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({"status": 200, "newState": 1}));
        assert!(hw.relay(0).unwrap());
        assert!(!hw.relay(1).unwrap());

        let (_, body) = get_json(state, "/door?state=0").await;
        assert_eq!(body, json!({"status": 200, "newState": 0}));
        assert!(!hw.relay(0).unwrap());
    }

    #[tokio::test]
    async fn test_light_sets_light_relay() {
        let (hw, state) = test_state();

        let (code, body) = get_json(state, "/light?state=1").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({"status": 200, "newState": 1}));
        assert!(hw.relay(1).unwrap());
        assert!(!hw.relay(0).unwrap());
    }

    #[tokio::test]
    async fn test_bad_state_is_rejected() {
        for uri in ["/door", "/door?state=2", "/door?mode=1", "/door?state=", "/light?state=on"] {
            let (hw, state) = test_state();
            let (code, body) = get_json(state, uri).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body, json!({"status": 400, "error": "bad request"}));
            assert!(!hw.relay(0).unwrap());
            assert!(!hw.relay(1).unwrap());
        }
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (_, state) = test_state();
        let (code, body) = get_json(state, "/garage").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"status": 404, "error": "not found"}));
    }

    #[tokio::test]
    async fn test_hardware_failure_is_500() {
        let hw = Arc::new(MemoryHardware::new(1));
        let state = Arc::new(HttpState {
            hardware: hw,
            pins: HardwareConfig {
                light_relay: 5,
                ..HardwareConfig::default()
            },
        });

        let (code, body) = get_json(state, "/light?state=1").await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"status": 500, "error": "hardware fault"}));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (_, state) = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(serve(listener, state, async {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
