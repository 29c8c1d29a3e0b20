//! Gateway: HTTP + WebSocket surface over the WhatsApp session.
//!
//! Lifecycle:
//! 1. Wrap the started `Session` in a `GatewayState`
//! 2. Resolve auth, bind address (with port fallback)
//! 3. Serve pairing, status, session control and outbound message routes
//! 4. Stream session events to WebSocket clients
//!
//! The session itself lives in `courier-whatsapp`; handlers here only
//! translate between HTTP and its operations.

pub mod auth;
pub mod error;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    auth::{ResolvedAuth, resolve_auth},
    error::ApiError,
    server::{bind_with_fallback, build_gateway_app, start_gateway},
    state::GatewayState,
};
