use std::{future::Future, io::ErrorKind, net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::{Context, anyhow},
    axum::{
        Router,
        extract::{ConnectInfo, Query, Request, State, WebSocketUpgrade},
        http::{
            HeaderValue, Method,
            header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN},
        },
        middleware::{self, Next},
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    courier_config::ServerConfig,
    serde::Deserialize,
    serde_json::json,
    tokio::net::TcpListener,
    tower_http::{
        cors::{AllowOrigin, Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

use crate::{
    auth::authorize_request, error::ApiError, state::GatewayState, ws::handle_connection,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>, cors_origins: &[String]) -> Router {
    let app_state = AppState { gateway: state };

    // Mutating routes require the bearer token when one is configured.
    let protected = Router::new()
        .route("/auth/logout", post(logout_handler))
        .route("/session/connect", post(connect_handler))
        .route("/session/disconnect", post(disconnect_handler))
        .route("/messages", post(send_message_handler))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_token,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ping", get(health_handler))
        .route("/auth/qr", get(pairing_code_handler))
        .route("/auth/status", get(status_handler))
        .route("/ws", get(ws_upgrade_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(app_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ORIGIN, CONTENT_TYPE, ACCEPT, AUTHORIZATION]);

    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            },
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
}

/// Bind `bind:port`, trying up to `span` following ports when it is taken.
pub async fn bind_with_fallback(bind: &str, port: u16, span: u16) -> anyhow::Result<TcpListener> {
    for offset in 0..=span {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        let addr = format!("{bind}:{candidate}");
        match TcpListener::bind(addr.as_str()).await {
            Ok(listener) => {
                if offset > 0 {
                    warn!(
                        requested = port,
                        port = candidate,
                        "port already in use, listening on fallback port"
                    );
                }
                return Ok(listener);
            },
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                debug!(port = candidate, "port already in use");
            },
            Err(e) => return Err(e).with_context(|| format!("failed to bind {addr}")),
        }
    }
    Err(anyhow!(
        "no free port between {port} and {}",
        port.saturating_add(span)
    ))
}

/// Start the gateway HTTP + WebSocket server and serve until `shutdown` resolves.
pub async fn start_gateway(
    state: Arc<GatewayState>,
    server: &ServerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_gateway_app(Arc::clone(&state), &server.cors_allowed_origins);
    let listener = bind_with_fallback(&server.bind, server.port, server.port_search_span).await?;
    let addr = listener.local_addr()?;

    // Startup banner.
    let status = state.session.status();
    let lines = [
        format!("courier gateway v{}", state.version),
        format!("listening on {addr}"),
        format!(
            "whatsapp: {} ({})",
            status.link,
            status.account.as_deref().unwrap_or("not paired")
        ),
        format!(
            "auth: {}",
            if state.auth.is_required() {
                "bearer token"
            } else {
                "open"
            }
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    info!("gateway stopped");
    Ok(())
}

// ── Middleware ───────────────────────────────────────────────────────────────

async fn require_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let result = authorize_request(&state.gateway.auth, header);
    if !result.ok {
        let reason = result.reason.unwrap_or("unauthorized");
        warn!(path = %req.uri().path(), reason, "rejected unauthenticated request");
        return Err(ApiError::Unauthorized(reason));
    }
    Ok(next.run(req).await)
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gateway = &state.gateway;
    Json(json!({
        "status": "ok",
        "version": gateway.version,
        "whatsapp": gateway.session.status().status,
        "connections": gateway.client_count(),
        "uptime_secs": gateway.started_at.elapsed().as_secs(),
    }))
}

/// Longest pairing wait a caller may ask for.
const MAX_PAIRING_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Default, Deserialize)]
struct PairingParams {
    timeout_secs: Option<u64>,
}

async fn pairing_code_handler(
    State(state): State<AppState>,
    Query(params): Query<PairingParams>,
) -> Result<Response, ApiError> {
    let session = &state.gateway.session;
    let code = match params.timeout_secs {
        Some(0) => return Err(ApiError::BadRequest("timeout_secs must be positive".into())),
        Some(secs) if secs > MAX_PAIRING_TIMEOUT_SECS => {
            return Err(ApiError::BadRequest(format!(
                "timeout_secs must be at most {MAX_PAIRING_TIMEOUT_SECS}"
            )));
        },
        Some(secs) => {
            session
                .request_pairing_code_within(Duration::from_secs(secs))
                .await?
        },
        None => session.request_pairing_code().await?,
    };
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], code).into_response())
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.session.status())
}

async fn logout_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.gateway.session.logout().await?;
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

async fn connect_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let session = &state.gateway.session;
    session.connect().await?;
    Ok(Json(session.status()))
}

async fn disconnect_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let session = &state.gateway.session;
    session.disconnect().await?;
    Ok(Json(session.status()))
}

#[derive(Debug, Deserialize)]
struct SendMessageBody {
    to: String,
    message: String,
}

async fn send_message_handler(
    State(state): State<AppState>,
    Json(body): Json<SendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    let id = state
        .gateway
        .session
        .send_text(&body.to, &body.message)
        .await?;
    Ok(Json(json!({ "id": id })))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway, addr))
}
