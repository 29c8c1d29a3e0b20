//! Event classification and bounded fan-out to registered handlers.
//!
//! Every handler owns a bounded queue drained by its own worker task. The
//! dispatcher only ever `try_send`s, so a slow or stuck handler cannot stall
//! the session or the other handlers: when its queue is full the newest event
//! is dropped for that handler and counted. Each invocation runs under a
//! timeout and is cancelled when it expires.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::FutureExt,
    serde::Serialize,
    tokio::sync::mpsc::{self, error::TrySendError},
    tracing::{debug, info, warn},
};

use courier_config::DispatchConfig;

use crate::{
    event::{ProtocolEvent, ReceivedMessage, SessionEvent},
    mailbox::PairingMailbox,
    state::{ConnectionState, LinkState},
};

/// A consumer of session events.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: Arc<SessionEvent>);
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<SessionEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, event: Arc<SessionEvent>) {
        (self)(event).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HandlerId(pub u64);

/// Per-handler delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStats {
    /// Invocations that returned normally.
    pub delivered: u64,
    /// Events not enqueued because the handler's queue was full.
    pub dropped: u64,
    /// Invocations cancelled at the handler timeout.
    pub timed_out: u64,
    /// Invocations that panicked.
    pub panicked: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    timed_out: AtomicU64,
    panicked: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> HandlerStats {
        HandlerStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

struct HandlerSlot {
    id: HandlerId,
    name: String,
    tx: mpsc::Sender<Arc<SessionEvent>>,
    counters: Arc<Counters>,
}

/// Queue and timeout applied to every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub queue_capacity: usize,
    pub handler_timeout: Duration,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchLimits {
    fn from(cfg: &DispatchConfig) -> Self {
        Self {
            queue_capacity: cfg.queue_capacity.max(1),
            handler_timeout: Duration::from_secs(cfg.handler_timeout_secs.max(1)),
        }
    }
}

/// What a single `dispatch` call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub previous: LinkState,
    pub current: LinkState,
    /// A `MessageReceived` event was derived and fanned out.
    pub derived_message: bool,
}

impl DispatchOutcome {
    /// The link went down because of this event while it was up.
    pub fn lost_link(&self) -> bool {
        self.previous != LinkState::Disconnected && self.current == LinkState::Disconnected
    }
}

pub struct EventDispatcher {
    state: Arc<ConnectionState>,
    mailbox: Arc<PairingMailbox>,
    limits: DispatchLimits,
    handlers: RwLock<Vec<HandlerSlot>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new(
        state: Arc<ConnectionState>,
        mailbox: Arc<PairingMailbox>,
        limits: DispatchLimits,
    ) -> Self {
        Self {
            state,
            mailbox,
            limits,
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn limits(&self) -> DispatchLimits {
        self.limits
    }

    /// Register a handler and spawn its worker. Must run inside a tokio runtime.
    pub fn add_handler(&self, name: impl Into<String>, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        let (tx, rx) = mpsc::channel(self.limits.queue_capacity);
        let counters = Arc::new(Counters::default());

        tokio::spawn(run_handler(
            name.clone(),
            handler,
            rx,
            self.limits.handler_timeout,
            Arc::clone(&counters),
        ));

        debug!(handler = %name, id = id.0, "registered event handler");
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(HandlerSlot {
                id,
                name,
                tx,
                counters,
            });
        id
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn stats(&self, id: HandlerId) -> Option<HandlerStats> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| slot.counters.snapshot())
    }

    /// Classify one protocol event, apply its side effects and fan it out.
    pub fn dispatch(&self, event: ProtocolEvent) -> DispatchOutcome {
        let next = link_effect(&event);
        self.dispatch_with(event, next)
    }

    /// Like [`dispatch`](Self::dispatch), with the link transition decided by
    /// the caller. `None` leaves the link untouched.
    pub fn dispatch_with(&self, event: ProtocolEvent, next: Option<LinkState>) -> DispatchOutcome {
        let previous = match next {
            Some(link) => self.state.set(link),
            None => self.state.get(),
        };

        let mut derived = None;
        match &event {
            ProtocolEvent::PairingCode { codes } => {
                let code = codes.first().cloned().unwrap_or_default();
                info!(len = code.len(), "pairing code received");
                self.mailbox.publish(code);
            },
            ProtocolEvent::Message(msg) => {
                derived = ReceivedMessage::from_inbound(msg);
                if derived.is_none() {
                    debug!(id = %msg.id, sender = %msg.sender, "inbound message without text");
                }
            },
            ProtocolEvent::LoggedOut { reason } => {
                warn!(reason = reason.as_deref().unwrap_or("unknown"), "logged out by remote");
            },
            ProtocolEvent::Connected
            | ProtocolEvent::Disconnected
            | ProtocolEvent::PairSuccess { .. }
            | ProtocolEvent::Unknown { .. } => {},
        }

        let derived_message = derived.is_some();
        self.fan_out(Arc::new(SessionEvent::Protocol(event)));
        if let Some(msg) = derived {
            self.fan_out(Arc::new(SessionEvent::MessageReceived(msg)));
        }

        DispatchOutcome {
            previous,
            current: self.state.get(),
            derived_message,
        }
    }

    fn fan_out(&self, event: Arc<SessionEvent>) {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        for slot in handlers.iter() {
            match slot.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {},
                Err(TrySendError::Full(_)) => {
                    slot.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        handler = %slot.name,
                        capacity = self.limits.queue_capacity,
                        "event handler queue full, dropping event"
                    );
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(handler = %slot.name, "event handler worker has stopped");
                },
            }
        }
    }

    /// Stop accepting events. Workers drain what is already queued, then exit.
    pub fn close(&self) {
        let drained = std::mem::take(&mut *self.handlers.write().unwrap_or_else(|e| e.into_inner()));
        if !drained.is_empty() {
            debug!(count = drained.len(), "closed event handlers");
        }
    }
}

/// Link transition an event implies on its own.
pub fn link_effect(event: &ProtocolEvent) -> Option<LinkState> {
    match event {
        ProtocolEvent::Connected => Some(LinkState::Connected),
        ProtocolEvent::Disconnected | ProtocolEvent::LoggedOut { .. } => {
            Some(LinkState::Disconnected)
        },
        ProtocolEvent::PairingCode { .. }
        | ProtocolEvent::PairSuccess { .. }
        | ProtocolEvent::Message(_)
        | ProtocolEvent::Unknown { .. } => None,
    }
}

async fn run_handler(
    name: String,
    handler: Arc<dyn EventHandler>,
    mut rx: mpsc::Receiver<Arc<SessionEvent>>,
    timeout: Duration,
    counters: Arc<Counters>,
) {
    while let Some(event) = rx.recv().await {
        let call = AssertUnwindSafe(handler.handle(event)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            },
            Ok(Err(_)) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                warn!(handler = %name, "event handler panicked");
            },
            Err(_) => {
                counters.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    handler = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "event handler timed out"
                );
            },
        }
    }
    debug!(handler = %name, "event handler worker stopped");
}
