//! HTTP and WebSocket behavior of the gateway router.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
    },
    courier_gateway::{GatewayState, build_gateway_app, resolve_auth},
    courier_whatsapp::{
        MemoryCredentialStore, ProtocolEvent, ReconnectPolicy, Session, SessionConfig,
        SimulatedClient,
    },
    futures::StreamExt,
    serde_json::Value,
    tokio::sync::mpsc,
    tower::ServiceExt,
};

const ORIGIN: &str = "http://localhost:3000";

struct Harness {
    app: Router,
    client: Arc<SimulatedClient>,
    session: Session,
    state: Arc<GatewayState>,
}

async fn harness(
    client: Arc<SimulatedClient>,
    rx: mpsc::UnboundedReceiver<ProtocolEvent>,
    store: MemoryCredentialStore,
    token: Option<&str>,
) -> Harness {
    let config = SessionConfig {
        pairing_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy::disabled(),
        ..SessionConfig::default()
    };
    let session = Session::start(client.clone(), rx, Arc::new(store), config)
        .await
        .unwrap();
    let state = GatewayState::new(session.clone(), resolve_auth(token.map(str::to_string)));
    let app = build_gateway_app(Arc::clone(&state), &[ORIGIN.to_string()]);
    Harness {
        app,
        client,
        session,
        state,
    }
}

async fn unpaired(token: Option<&str>) -> Harness {
    let (client, rx) = SimulatedClient::with_auto_events(None);
    harness(client, rx, MemoryCredentialStore::new(), token).await
}

async fn connected(token: Option<&str>) -> Harness {
    let (client, rx) = SimulatedClient::new();
    let h = harness(client, rx, MemoryCredentialStore::paired("56911112222"), token).await;
    h.session.connect().await.unwrap();
    h
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 64 * 1024)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn call_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = call(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ── Health & status ─────────────────────────────────────────

#[tokio::test]
async fn health_and_ping_report_ok() {
    let h = unpaired(None).await;
    for uri in ["/health", "/ping"] {
        let (status, body) = call_json(&h.app, get(uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["whatsapp"], "disconnected");
    }
}

#[tokio::test]
async fn status_reflects_the_session() {
    let h = unpaired(None).await;
    let (_, body) = call_json(&h.app, get("/auth/status")).await;
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["link"], "disconnected");
    assert!(body.get("account").is_none());

    let h = connected(None).await;
    let (_, body) = call_json(&h.app, get("/auth/status")).await;
    assert_eq!(body["status"], "connected");
    assert_eq!(body["account"], "56911112222");
}

// ── Pairing ─────────────────────────────────────────────────

#[tokio::test]
async fn qr_returns_plain_text_code() {
    let h = unpaired(None).await;
    let resp = h.app.clone().oneshot(get("/auth/qr")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    assert!(String::from_utf8(body.to_vec()).unwrap().starts_with("2@"));
    assert_eq!(h.client.connect_calls(), 1);
}

#[tokio::test]
async fn qr_for_paired_device_conflicts() {
    let h = connected(None).await;
    let (status, body) = call_json(&h.app, get("/auth/qr")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_logged_in");
}

#[tokio::test]
async fn qr_times_out_with_gateway_timeout() {
    let (client, rx) = SimulatedClient::new();
    let h = harness(client, rx, MemoryCredentialStore::new(), None).await;
    let (status, body) = call_json(&h.app, get("/auth/qr?timeout_secs=1")).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "timeout");
}

#[tokio::test]
async fn qr_rejects_out_of_range_timeout() {
    let h = unpaired(None).await;
    for query in ["timeout_secs=0", "timeout_secs=601", "timeout_secs=18446744073709551615"] {
        let (status, body) = call_json(&h.app, get(&format!("/auth/qr?{query}"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{query}");
        assert_eq!(body["error"], "bad_request");
    }
    assert_eq!(h.client.connect_calls(), 0);
}

#[tokio::test]
async fn qr_connect_failure_is_bad_gateway() {
    let h = unpaired(None).await;
    h.client.fail_next_connects(1);
    let (status, body) = call_json(&h.app, get("/auth/qr")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "connect_failed");
}

// ── Session control ─────────────────────────────────────────

#[tokio::test]
async fn logout_confirms_and_clears_pairing() {
    let h = connected(None).await;
    let (status, body) = call_json(&h.app, post_json("/auth/logout", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out successfully");
    assert!(!h.session.is_paired());
}

#[tokio::test]
async fn disconnect_and_connect_routes() {
    let h = connected(None).await;
    let (status, body) = call_json(&h.app, post_json("/session/disconnect", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["link"], "disconnected");

    let (status, body) = call_json(&h.app, post_json("/session/connect", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    assert_eq!(h.client.connect_calls(), 2);
}

// ── Messages ────────────────────────────────────────────────

#[tokio::test]
async fn send_message_returns_id() {
    let h = connected(None).await;
    h.client.set_send_response(Ok("MSG-42".into()));
    let (status, body) = call_json(
        &h.app,
        post_json(
            "/messages",
            serde_json::json!({ "to": "+56 9 3333 4444", "message": "hola" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "MSG-42");
}

#[tokio::test]
async fn send_message_while_disconnected_is_unavailable() {
    let (client, rx) = SimulatedClient::new();
    let h = harness(client, rx, MemoryCredentialStore::paired("56911112222"), None).await;
    let (status, body) = call_json(
        &h.app,
        post_json(
            "/messages",
            serde_json::json!({ "to": "56933334444", "message": "hola" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "not_connected");
    assert_eq!(h.client.send_calls(), 0);
}

#[tokio::test]
async fn send_message_validates_input() {
    let h = connected(None).await;
    let (status, body) = call_json(
        &h.app,
        post_json(
            "/messages",
            serde_json::json!({ "to": "somebody", "message": "hola" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_recipient");

    let (status, body) = call_json(
        &h.app,
        post_json(
            "/messages",
            serde_json::json!({ "to": "56933334444", "message": "  " }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
    assert_eq!(h.client.send_calls(), 0);
}

#[tokio::test]
async fn send_failure_is_bad_gateway() {
    let h = connected(None).await;
    h.client.set_send_response(Err("socket closed".into()));
    let (status, body) = call_json(
        &h.app,
        post_json(
            "/messages",
            serde_json::json!({ "to": "56933334444", "message": "hola" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "send_failed");
}

// ── Auth ────────────────────────────────────────────────────

#[tokio::test]
async fn token_guards_mutating_routes() {
    let h = connected(Some("s3cret")).await;
    let body = serde_json::json!({ "to": "56933334444", "message": "hola" });

    let (status, json) = call_json(&h.app, post_json("/messages", body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "token_missing");

    let mut req = post_json("/messages", body);
    req.headers_mut()
        .insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
    let (status, _) = call_json(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);

    // Read-only routes stay open.
    let (status, _) = call_json(&h.app, get("/auth/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.client.send_calls(), 1);
}

#[tokio::test]
async fn cors_allows_configured_origin() {
    let h = unpaired(None).await;
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/messages")
        .header(header::ORIGIN, ORIGIN)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let resp = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(
        resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        ORIGIN
    );
    assert_eq!(
        resp.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
}

// ── WebSocket ───────────────────────────────────────────────

#[tokio::test]
async fn websocket_streams_session_events() {
    let h = unpaired(None).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = h.app.clone();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    });

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while h.state.client_count() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "ws client never registered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    h.client.emit(ProtocolEvent::Connected);
    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let event: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(event["event"], "protocol");
    assert_eq!(event["data"]["type"], "connected");
}
