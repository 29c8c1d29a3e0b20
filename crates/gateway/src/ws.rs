//! WebSocket stream of session events.
//!
//! Each client gets its own subscription to the gateway's event broadcast and
//! receives every session event as a JSON text frame. Frames sent by the
//! client are ignored apart from close and ping.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
    tracing::{debug, info, warn},
};

use crate::state::GatewayState;

pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, remote: SocketAddr) {
    let clients = state.client_connected();
    info!(remote = %remote, clients, "ws: client connected");

    let (mut sink, mut stream) = socket.split();
    let mut events = BroadcastStream::new(state.subscribe());

    loop {
        tokio::select! {
            event = events.next() => {
                let frame = match event {
                    Some(Ok(event)) => match serde_json::to_string(&*event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "ws: failed to serialize session event");
                            continue;
                        },
                    },
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        warn!(remote = %remote, skipped, "ws: client lagging, events skipped");
                        continue;
                    },
                    None => break,
                };
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    debug!(remote = %remote, error = %e, "ws: read error");
                    break;
                },
            },
        }
    }

    let clients = state.client_disconnected();
    info!(remote = %remote, clients, "ws: client disconnected");
}
