use axum::Router;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use concord_relay::{app, RelayState};

const RELAY_PEER_ID: &str = "12D3KooWRelayRelayRelayRelayRelayRelayRelay";
const EXTERNAL_ADDR: &str = "/dns4/relay.test/tcp/9090/ws/p2p/12D3KooWRelayRelayRelayRelayRelayRelayRelay";

async fn start_relay() -> (String, oneshot::Sender<()>) {
    let state = RelayState::new(RELAY_PEER_ID.to_string(), EXTERNAL_ADDR.to_string());
    state
        .relay_addrs
        .lock()
        .unwrap()
        .push(format!("/ip4/127.0.0.1/tcp/9090/ws/p2p/{RELAY_PEER_ID}"));

    let app: Router = app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{}", addr), shutdown_tx)
}

#[tokio::test]
async fn info_reports_identity_and_addresses() {
    let (base_url, _shutdown) = start_relay().await;

    let info: Value = reqwest::get(format!("{base_url}/info"))
        .await
        .expect("get info")
        .json()
        .await
        .expect("info json");

    assert_eq!(info["relayPeerId"], RELAY_PEER_ID);
    assert_eq!(info["externalRelayAddr"], EXTERNAL_ADDR);
    assert!(info["relayAddrs"].as_array().is_some_and(|a| !a.is_empty()));
}

#[tokio::test]
async fn register_then_lookup_round_trips() {
    let (base_url, _shutdown) = start_relay().await;
    let client = reqwest::Client::new();

    let registered: Value = client
        .get(format!("{base_url}/register"))
        .query(&[("peerId", "12D3KooWPeerA")])
        .send()
        .await
        .expect("register")
        .json()
        .await
        .expect("register json");

    let code = registered["code"].as_str().expect("code string");
    assert_eq!(code.len(), 9);
    assert_eq!(
        registered["circuitAddr"],
        format!("{EXTERNAL_ADDR}/p2p-circuit/p2p/12D3KooWPeerA")
    );

    let looked_up: Value = client
        .get(format!("{base_url}/lookup"))
        .query(&[("code", code.to_lowercase())])
        .send()
        .await
        .expect("lookup")
        .json()
        .await
        .expect("lookup json");

    assert_eq!(looked_up["peerId"], "12D3KooWPeerA");
    assert_eq!(looked_up["relayAddr"], EXTERNAL_ADDR);
}

#[tokio::test]
async fn reregistration_is_stable() {
    let (base_url, _shutdown) = start_relay().await;
    let client = reqwest::Client::new();

    let mut codes = Vec::new();
    for _ in 0..2 {
        let registered: Value = client
            .get(format!("{base_url}/register"))
            .query(&[("peerId", "12D3KooWPeerA")])
            .send()
            .await
            .expect("register")
            .json()
            .await
            .expect("register json");
        codes.push(registered["code"].as_str().unwrap().to_string());
    }
    assert_eq!(codes[0], codes[1]);
}

#[tokio::test]
async fn lookup_of_unknown_code_is_404() {
    let (base_url, _shutdown) = start_relay().await;

    let response = reqwest::get(format!("{base_url}/lookup?code=ZZZZ-ZZZZ"))
        .await
        .expect("lookup");
    assert_eq!(response.status(), 404);

    let body: Value = response.json().await.expect("error json");
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn send_rejects_incomplete_bodies() {
    let (base_url, _shutdown) = start_relay().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/send"))
        .json(&json!({ "to": "12D3KooWPeerB", "from": "12D3KooWPeerA" }))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), 400);

    let response = client
        .post(format!("{base_url}/send"))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn poll_drains_exactly_once() {
    let (base_url, _shutdown) = start_relay().await;
    let client = reqwest::Client::new();

    for body in ["hello", "again"] {
        let response = client
            .post(format!("{base_url}/send"))
            .json(&json!({
                "to": "12D3KooWPeerB",
                "from": "12D3KooWPeerA",
                "channelId": "general",
                "data": body,
            }))
            .send()
            .await
            .expect("send");
        assert_eq!(response.status(), 200);
    }

    let polled: Value = client
        .get(format!("{base_url}/poll"))
        .query(&[("peerId", "12D3KooWPeerB")])
        .send()
        .await
        .expect("poll")
        .json()
        .await
        .expect("poll json");

    let messages = polled["messages"].as_array().expect("messages array");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["data"], "hello");
    assert_eq!(messages[0]["from"], "12D3KooWPeerA");
    assert_eq!(messages[0]["channelId"], "general");
    assert_eq!(messages[1]["data"], "again");

    let again: Value = client
        .get(format!("{base_url}/poll"))
        .query(&[("peerId", "12D3KooWPeerB")])
        .send()
        .await
        .expect("second poll")
        .json()
        .await
        .expect("second poll json");
    assert_eq!(again["messages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn health_counts_codes_and_queued_peers() {
    let (base_url, _shutdown) = start_relay().await;
    let client = reqwest::Client::new();

    client
        .get(format!("{base_url}/register"))
        .query(&[("peerId", "12D3KooWPeerA")])
        .send()
        .await
        .expect("register");
    client
        .post(format!("{base_url}/send"))
        .json(&json!({
            "to": "12D3KooWPeerB",
            "from": "12D3KooWPeerA",
            "channelId": "general",
            "data": "ping",
        }))
        .send()
        .await
        .expect("send");

    let health: Value = client
        .get(format!("{base_url}/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("health json");

    assert_eq!(health["status"], "ok");
    assert_eq!(health["relayPeerId"], RELAY_PEER_ID);
    assert_eq!(health["codes"], 1);
    assert_eq!(health["peers"], 1);
    assert!(health["uptime"].as_u64().is_some());
}

#[tokio::test]
async fn responses_allow_any_origin() {
    let (base_url, _shutdown) = start_relay().await;

    let response = reqwest::get(format!("{base_url}/health"))
        .await
        .expect("health");
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json")));
}
