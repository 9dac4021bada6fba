use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::queue::{MessageQueue, QueuedMessage};
use crate::registry::InviteRegistry;

/// Shared state behind the HTTP API. Cheap to clone; the registry and queue
/// sit behind one mutex each, which is plenty at rendezvous traffic levels.
#[derive(Clone)]
pub struct RelayState {
    pub relay_peer_id: String,
    pub relay_addrs: Arc<Mutex<Vec<String>>>,
    pub external_addr: String,
    pub registry: Arc<Mutex<InviteRegistry>>,
    pub queue: Arc<Mutex<MessageQueue>>,
    pub started_at: Instant,
}

impl RelayState {
    pub fn new(relay_peer_id: String, external_addr: String) -> Self {
        Self {
            relay_peer_id,
            relay_addrs: Arc::new(Mutex::new(Vec::new())),
            external_addr,
            registry: Arc::new(Mutex::new(InviteRegistry::new())),
            queue: Arc::new(Mutex::new(MessageQueue::new())),
            started_at: Instant::now(),
        }
    }

    fn circuit_addr(&self, peer_id: &str) -> String {
        format!("{}/p2p-circuit/p2p/{}", self.external_addr, peer_id)
    }
}

pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/register", get(register))
        .route("/lookup", get(lookup))
        .route("/send", post(send))
        .route("/poll", get(poll))
        .route("/health", get(health))
        .layer(middleware::from_fn(allow_any_origin))
        .with_state(state)
}

/// Every response carries `Access-Control-Allow-Origin: *` so browser-hosted
/// controllers can talk to the relay directly.
async fn allow_any_origin(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    relay_peer_id: String,
    relay_addrs: Vec<String>,
    external_relay_addr: String,
}

async fn info(State(state): State<RelayState>) -> impl IntoResponse {
    let relay_addrs = state.relay_addrs.lock().expect("addr lock poisoned").clone();
    Json(InfoResponse {
        relay_peer_id: state.relay_peer_id.clone(),
        relay_addrs,
        external_relay_addr: state.external_addr.clone(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterParams {
    peer_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    code: String,
    relay_peer_id: String,
    relay_addr: String,
    circuit_addr: String,
}

async fn register(
    State(state): State<RelayState>,
    Query(params): Query<RegisterParams>,
) -> Response {
    let Some(peer_id) = params.peer_id.filter(|id| !id.is_empty()) else {
        return bad_request("peerId is required");
    };

    let code = state
        .registry
        .lock()
        .expect("registry lock poisoned")
        .register(&peer_id, now_ms());
    log::info!("Registered {} as {}", peer_id, code);

    Json(RegisterResponse {
        code,
        relay_peer_id: state.relay_peer_id.clone(),
        relay_addr: state.external_addr.clone(),
        circuit_addr: state.circuit_addr(&peer_id),
    })
    .into_response()
}

#[derive(Deserialize)]
struct LookupParams {
    code: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    peer_id: String,
    relay_addr: String,
    circuit_addr: String,
}

async fn lookup(State(state): State<RelayState>, Query(params): Query<LookupParams>) -> Response {
    let Some(code) = params.code.filter(|code| !code.is_empty()) else {
        return bad_request("code is required");
    };

    let entry = state
        .registry
        .lock()
        .expect("registry lock poisoned")
        .lookup(&code, now_ms());

    match entry {
        Some(entry) => Json(LookupResponse {
            circuit_addr: state.circuit_addr(&entry.peer_id),
            relay_addr: state.external_addr.clone(),
            peer_id: entry.peer_id,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Unknown or expired code" })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    to: Option<String>,
    from: Option<String>,
    channel_id: Option<String>,
    data: Option<String>,
}

async fn send(
    State(state): State<RelayState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return bad_request("invalid JSON body");
    };

    let (Some(to), Some(from), Some(channel_id), Some(data)) =
        (request.to, request.from, request.channel_id, request.data)
    else {
        return bad_request("to, from, channelId and data are required");
    };

    state
        .queue
        .lock()
        .expect("queue lock poisoned")
        .enqueue(&to, &from, &channel_id, &data, now_ms());
    log::debug!("Queued message from {} to {} on {}", from, to, channel_id);

    Json(json!({ "ok": true })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollParams {
    peer_id: Option<String>,
    since: Option<i64>,
}

#[derive(Serialize)]
struct PollResponse {
    messages: Vec<QueuedMessage>,
}

async fn poll(State(state): State<RelayState>, Query(params): Query<PollParams>) -> Response {
    let Some(peer_id) = params.peer_id.filter(|id| !id.is_empty()) else {
        return bad_request("peerId is required");
    };

    let messages = state
        .queue
        .lock()
        .expect("queue lock poisoned")
        .drain(&peer_id, params.since.unwrap_or(0), now_ms());

    Json(PollResponse { messages }).into_response()
}

async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    let peers = state.queue.lock().expect("queue lock poisoned").recipients();
    let codes = state.registry.lock().expect("registry lock poisoned").len();

    Json(json!({
        "status": "ok",
        "relayPeerId": state.relay_peer_id,
        "peers": peers,
        "codes": codes,
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}
