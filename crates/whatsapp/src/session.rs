//! The session gateway: lifecycle, pairing, status and outbound sends over one
//! protocol client.

use std::{
    sync::{
        Arc, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Serialize,
    tokio::sync::{Mutex, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use courier_config::WhatsAppConfig;

use crate::{
    client::{OutboundContent, ProtocolClient},
    dispatch::{DispatchLimits, EventDispatcher, EventHandler, HandlerId, HandlerStats, link_effect},
    error::{Error, Result},
    event::ProtocolEvent,
    jid::Jid,
    mailbox::PairingMailbox,
    state::{ConnectionState, LinkState},
    store::CredentialStore,
    supervisor::{Reconnect, ReconnectPolicy, ReconnectSupervisor},
};

/// Runtime settings of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Default wait for a pairing code.
    pub pairing_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub dispatch: DispatchLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&WhatsAppConfig::default())
    }
}

impl From<&WhatsAppConfig> for SessionConfig {
    fn from(cfg: &WhatsAppConfig) -> Self {
        Self {
            pairing_timeout: cfg.pairing_timeout(),
            reconnect: ReconnectPolicy::from(&cfg.reconnect),
            dispatch: DispatchLimits::from(&cfg.dispatch),
        }
    }
}

/// Snapshot reported by [`Session::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// `"connected"` while a paired credential exists, else `"disconnected"`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub link: LinkState,
}

impl SessionStatus {
    /// The transport is up and authenticated.
    pub fn is_connected(&self) -> bool {
        self.link == LinkState::Connected
    }
}

/// One outbound message.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub to: Jid,
    pub content: OutboundContent,
    pub cancel: Option<CancellationToken>,
}

impl SendRequest {
    pub fn text(to: Jid, body: impl Into<String>) -> Self {
        Self {
            to,
            content: OutboundContent::text(body),
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Handle to the process-wide WhatsApp session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    client: Arc<dyn ProtocolClient>,
    store: Arc<dyn CredentialStore>,
    state: Arc<ConnectionState>,
    mailbox: Arc<PairingMailbox>,
    dispatcher: EventDispatcher,
    supervisor: ReconnectSupervisor,
    config: SessionConfig,
    /// Paired account, mirrored from the credential store.
    account: RwLock<Option<String>>,
    /// Last pairing code handed to a caller.
    issued_code: RwLock<Option<String>>,
    /// Serializes connect, disconnect and logout.
    lifecycle: Mutex<()>,
    /// Set by `connect`, cleared by `disconnect` and `logout`. Events for a
    /// link nobody asked for are stale: they never raise the link or
    /// schedule a reconnect.
    link_wanted: AtomicBool,
    shutdown: CancellationToken,
}

impl Session {
    /// Load (or create) the device identity and start pumping `events` from
    /// `client` into the dispatcher. The session starts disconnected.
    pub async fn start(
        client: Arc<dyn ProtocolClient>,
        events: mpsc::UnboundedReceiver<ProtocolEvent>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> Result<Self> {
        let identity = store.get_or_create().await.map_err(|e| {
            error!(error = %e, "failed to load device identity");
            Error::Store(e)
        })?;
        info!(
            device_id = %identity.device_id,
            paired = identity.is_paired(),
            "whatsapp session starting"
        );

        let state = Arc::new(ConnectionState::new());
        let mailbox = Arc::new(PairingMailbox::new());
        let inner = Arc::new(SessionInner {
            client,
            store,
            dispatcher: EventDispatcher::new(
                Arc::clone(&state),
                Arc::clone(&mailbox),
                config.dispatch,
            ),
            state,
            mailbox,
            supervisor: ReconnectSupervisor::new(config.reconnect),
            config,
            account: RwLock::new(identity.account),
            issued_code: RwLock::new(None),
            lifecycle: Mutex::new(()),
            link_wanted: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(pump_events(
            Arc::downgrade(&inner),
            events,
            inner.shutdown.clone(),
        ));

        Ok(Self { inner })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Open the transport. A no-op unless the link is down.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Close the transport and cancel any pending automatic reconnect.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await;
        Ok(())
    }

    /// Wait for a fresh pairing code using the configured timeout.
    pub async fn request_pairing_code(&self) -> Result<String> {
        self.request_pairing_code_within(self.inner.config.pairing_timeout)
            .await
    }

    /// Connect if needed and wait up to `timeout` for a pairing code.
    pub async fn request_pairing_code_within(&self, timeout: Duration) -> Result<String> {
        let inner = &self.inner;
        if inner.is_paired() {
            warn!("pairing code requested for an already paired device");
            return Err(Error::AlreadyLoggedIn);
        }

        inner.set_issued_code(None);
        info!("generating new pairing code");

        if inner.state.get() == LinkState::Disconnected {
            inner.connect().await?;
        }

        match inner.mailbox.wait(timeout).await {
            Ok(code) if code.is_empty() => {
                error!("received empty pairing code from whatsapp");
                Err(Error::EmptyCode)
            },
            Ok(code) => {
                info!(len = code.len(), "pairing code generated");
                inner.set_issued_code(Some(code.clone()));
                Ok(code)
            },
            Err(_) => {
                error!(
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out waiting for pairing code"
                );
                Err(Error::Timeout(timeout))
            },
        }
    }

    /// The code most recently returned by a pairing request, until the
    /// device pairs or the next request starts.
    pub fn last_pairing_code(&self) -> Option<String> {
        self.inner
            .issued_code
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Revoke the device remotely (when connected) and delete the local
    /// credential. A no-op if the device is not paired.
    pub async fn logout(&self) -> Result<()> {
        self.inner.logout().await
    }

    /// `status` follows the paired credential, `link` the transport.
    pub fn status(&self) -> SessionStatus {
        let account = self.inner.account();
        SessionStatus {
            status: if account.is_some() {
                "connected"
            } else {
                "disconnected"
            },
            account,
            link: self.inner.state.get(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    pub fn is_paired(&self) -> bool {
        self.inner.is_paired()
    }

    pub fn link_state(&self) -> LinkState {
        self.inner.state.get()
    }

    /// Send a message. Fails fast with [`Error::NotConnected`] without touching
    /// the protocol client when the link is not up.
    pub async fn send(&self, request: SendRequest) -> Result<String> {
        let inner = &self.inner;
        if !inner.state.is_connected() {
            warn!(to = %request.to, "send attempted while not connected");
            return Err(Error::NotConnected);
        }

        let cancel = request.cancel.unwrap_or_default();
        match inner
            .client
            .send(&request.to, &request.content, &cancel)
            .await
        {
            Ok(message_id) => {
                info!(to = %request.to, message_id = %message_id, "message sent");
                Ok(message_id)
            },
            Err(e) => {
                error!(to = %request.to, error = %e, "failed to send message");
                Err(Error::SendFailed(e))
            },
        }
    }

    /// Send a text message to a phone number or full address.
    pub async fn send_text(&self, recipient: &str, body: &str) -> Result<String> {
        let to: Jid = recipient.parse()?;
        self.send(SendRequest::text(to, body)).await
    }

    pub fn add_event_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> HandlerId {
        self.inner.dispatcher.add_handler(name, handler)
    }

    pub fn handler_stats(&self, id: HandlerId) -> Option<HandlerStats> {
        self.inner.dispatcher.stats(id)
    }

    pub fn handler_count(&self) -> usize {
        self.inner.dispatcher.handler_count()
    }

    /// Orderly shutdown: disconnect, stop the event pump and the handler
    /// workers, close the credential store.
    pub async fn close(&self) -> Result<()> {
        info!("closing whatsapp session");
        let inner = &self.inner;
        inner.disconnect().await;
        inner.shutdown.cancel();
        inner.supervisor.cancel();
        inner.dispatcher.close();
        inner.store.close().await.map_err(|e| {
            error!(error = %e, "failed to close credential store");
            Error::Store(e)
        })
    }
}

impl SessionInner {
    fn account(&self) -> Option<String> {
        self.account.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_account(&self, account: Option<String>) {
        *self.account.write().unwrap_or_else(|e| e.into_inner()) = account;
    }

    fn is_paired(&self) -> bool {
        self.account.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn wants_link(&self) -> bool {
        self.link_wanted.load(Ordering::SeqCst)
    }

    fn set_issued_code(&self, code: Option<String>) {
        *self.issued_code.write().unwrap_or_else(|e| e.into_inner()) = code;
    }

    async fn connect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.state.get() != LinkState::Disconnected {
            debug!(link = %self.state.get(), "connect skipped, link already open");
            return Ok(());
        }

        self.link_wanted.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.connect().await {
            self.link_wanted.store(false, Ordering::SeqCst);
            error!(error = %e, "failed to connect to whatsapp");
            return Err(Error::ConnectFailed(e));
        }

        // The connected event may already have been dispatched; never downgrade it.
        let next = if self.is_paired() {
            LinkState::Connected
        } else {
            LinkState::Pairing
        };
        self.state.set_if(LinkState::Disconnected, next);
        info!(link = %self.state.get(), "connected to whatsapp");
        Ok(())
    }

    async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        // Cleared before the transport closes so its events are not taken for a drop.
        self.link_wanted.store(false, Ordering::SeqCst);
        self.supervisor.cancel();
        if self.state.get() == LinkState::Disconnected {
            return;
        }
        self.state.set(LinkState::Disconnected);
        self.client.disconnect().await;
        info!("disconnected from whatsapp");
    }

    async fn logout(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_paired() {
            debug!("logout skipped, device is not paired");
            return Ok(());
        }

        if self.state.is_connected() {
            self.link_wanted.store(false, Ordering::SeqCst);
            if let Err(e) = self.client.logout().await {
                self.link_wanted.store(true, Ordering::SeqCst);
                error!(error = %e, "failed to logout from whatsapp");
                return Err(Error::LogoutFailed(e));
            }
            self.supervisor.cancel();
            self.state.set(LinkState::Disconnected);
        }

        self.store.delete().await.map_err(|e| {
            error!(error = %e, "failed to delete device credential");
            Error::Store(e)
        })?;
        self.set_account(None);
        self.set_issued_code(None);
        self.mailbox.clear();
        info!("logged out from whatsapp");
        Ok(())
    }

    async fn record_pairing(&self, account: &str) {
        self.set_account(Some(account.to_string()));
        self.set_issued_code(None);
        self.mailbox.clear();

        let saved = match self.store.get_or_create().await {
            Ok(mut identity) => {
                identity.account = Some(account.to_string());
                self.store.save(&identity).await
            },
            Err(e) => Err(e),
        };
        match saved {
            Ok(()) => info!(account, "device paired"),
            Err(e) => error!(account, error = %e, "failed to persist pairing"),
        }
    }

    async fn forget_pairing(&self) {
        self.set_account(None);
        self.set_issued_code(None);
        self.mailbox.clear();
        if let Err(e) = self.store.delete().await {
            error!(error = %e, "failed to delete revoked device credential");
        }
    }

    async fn handle_event(self: Arc<Self>, event: ProtocolEvent) {
        debug!(kind = event.kind(), "whatsapp event");
        let dropped = matches!(event, ProtocolEvent::Disconnected);
        match &event {
            ProtocolEvent::PairSuccess { account } => self.record_pairing(account).await,
            ProtocolEvent::LoggedOut { .. } => self.forget_pairing().await,
            _ => {},
        }

        let next = match &event {
            ProtocolEvent::Connected if !self.wants_link() => {
                debug!("connected event for a closed link ignored");
                None
            },
            // An open transport without a credential is still pairing.
            ProtocolEvent::Connected if !self.is_paired() => Some(LinkState::Pairing),
            other => link_effect(other),
        };

        let outcome = self.dispatcher.dispatch_with(event, next);
        if dropped && outcome.lost_link() && self.wants_link() && !self.shutdown.is_cancelled() {
            warn!(
                delay_ms = self.config.reconnect.delay.as_millis() as u64,
                "whatsapp connection lost, scheduling reconnect"
            );
            let target: Weak<SessionInner> = Arc::downgrade(&self);
            self.supervisor.on_disconnect(target);
        }
    }
}

#[async_trait]
impl Reconnect for SessionInner {
    async fn reconnect(&self) -> Result<()> {
        if self.shutdown.is_cancelled() || !self.wants_link() {
            return Ok(());
        }
        self.connect().await
    }
}

async fn pump_events(
    session: Weak<SessionInner>,
    mut events: mpsc::UnboundedReceiver<ProtocolEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(session) = session.upgrade() else {
            break;
        };
        session.handle_event(event).await;
    }
    debug!("whatsapp event pump stopped");
}
