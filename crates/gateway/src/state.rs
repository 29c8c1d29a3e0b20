use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use {
    courier_whatsapp::{EventHandler, HandlerId, Session, SessionEvent},
    tokio::sync::broadcast,
    tracing::debug,
};

use crate::auth::ResolvedAuth;

/// Buffered session events per WebSocket subscriber before it starts lagging.
pub const EVENT_BUFFER: usize = 256;

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// The process-wide WhatsApp session.
    pub session: Session,
    /// Auth configuration.
    pub auth: ResolvedAuth,
    /// Server version string.
    pub version: String,
    pub started_at: Instant,
    /// Session events re-published to WebSocket subscribers.
    events: broadcast::Sender<Arc<SessionEvent>>,
    /// Dispatcher handle of the forwarding handler.
    forwarder: HandlerId,
    ws_clients: AtomicUsize,
}

impl GatewayState {
    /// Wrap `session` and register the handler that feeds WebSocket subscribers.
    pub fn new(session: Session, auth: ResolvedAuth) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let tx = events.clone();
        let handler: Arc<dyn EventHandler> = Arc::new(move |event: Arc<SessionEvent>| {
            // No subscribers is the common case; nothing to do then.
            let _ = tx.send(event);
            async {}
        });
        let forwarder = session.add_event_handler("gateway-ws", handler);
        debug!(handler = forwarder.0, "gateway event forwarder registered");

        Arc::new(Self {
            session,
            auth,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            events,
            forwarder,
            ws_clients: AtomicUsize::new(0),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.events.subscribe()
    }

    pub fn forwarder(&self) -> HandlerId {
        self.forwarder
    }

    /// Number of connected WebSocket clients.
    pub fn client_count(&self) -> usize {
        self.ws_clients.load(Ordering::Relaxed)
    }

    pub(crate) fn client_connected(&self) -> usize {
        self.ws_clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn client_disconnected(&self) -> usize {
        self.ws_clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }
}
