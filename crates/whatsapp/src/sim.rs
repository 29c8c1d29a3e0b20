//! In-process protocol client.
//!
//! Records every call, can be scripted to fail and lets the caller inject
//! protocol events. In auto mode it also behaves like a minimal remote: a
//! connect on an unpaired device yields a pairing code, a connect on a
//! paired device yields `Connected`.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use {
    anyhow::{Result, anyhow, bail},
    async_trait::async_trait,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::{
    client::{OutboundContent, ProtocolClient},
    event::ProtocolEvent,
    jid::Jid,
};

/// A recorded call on the simulated client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Disconnect,
    Logout,
    Send { to: String, content: OutboundContent },
}

pub struct SimulatedClient {
    events: mpsc::UnboundedSender<ProtocolEvent>,
    calls: Mutex<Vec<Call>>,
    auto_events: bool,
    account: Mutex<Option<String>>,
    connect_failures: AtomicU32,
    fail_logout: AtomicBool,
    send_response: Mutex<Option<Result<String, String>>>,
    next_message: AtomicU64,
}

impl SimulatedClient {
    /// A passive client: it only emits the events it is told to.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ProtocolEvent>) {
        Self::build(false, None)
    }

    /// A client that answers connects with pairing codes or `Connected`.
    pub fn with_auto_events(
        account: Option<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ProtocolEvent>) {
        Self::build(true, account)
    }

    fn build(
        auto_events: bool,
        account: Option<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ProtocolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            events: tx,
            calls: Mutex::new(Vec::new()),
            auto_events,
            account: Mutex::new(account),
            connect_failures: AtomicU32::new(0),
            fail_logout: AtomicBool::new(false),
            send_response: Mutex::new(None),
            next_message: AtomicU64::new(1),
        });
        (client, rx)
    }

    /// Push an event into the session's feed.
    pub fn emit(&self, event: ProtocolEvent) {
        if self.events.send(event).is_err() {
            debug!("simulated event dropped, session is gone");
        }
    }

    /// Simulate the remote side dropping the transport.
    pub fn drop_connection(&self) {
        self.emit(ProtocolEvent::Disconnected);
    }

    /// Simulate the user scanning the pairing code.
    pub fn complete_pairing(&self, account: &str) {
        *self.account.lock().unwrap_or_else(|e| e.into_inner()) = Some(account.to_string());
        self.emit(ProtocolEvent::PairSuccess {
            account: account.to_string(),
        });
        self.emit(ProtocolEvent::Connected);
    }

    /// Make the next `n` connects fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_logout(&self, fail: bool) {
        self.fail_logout.store(fail, Ordering::SeqCst);
    }

    /// Script the result of every following send. `Err` carries the failure message.
    pub fn set_send_response(&self, response: Result<String, String>) {
        *self.send_response.lock().unwrap_or_else(|e| e.into_inner()) = Some(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Connect))
    }

    pub fn send_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Send { .. }))
    }

    pub fn logout_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Logout))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| pred(c))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    fn paired_account(&self) -> Option<String> {
        self.account.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ProtocolClient for SimulatedClient {
    async fn connect(&self) -> Result<()> {
        self.record(Call::Connect);
        let failing = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("simulated connect failure");
        }
        if self.auto_events {
            match self.paired_account() {
                Some(_) => self.emit(ProtocolEvent::Connected),
                None => {
                    let code = format!("2@{}", uuid::Uuid::new_v4().simple());
                    self.emit(ProtocolEvent::PairingCode { codes: vec![code] });
                },
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.record(Call::Disconnect);
        if self.auto_events {
            self.emit(ProtocolEvent::Disconnected);
        }
    }

    async fn logout(&self) -> Result<()> {
        self.record(Call::Logout);
        if self.fail_logout.load(Ordering::SeqCst) {
            bail!("simulated logout failure");
        }
        self.account.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    async fn send(
        &self,
        to: &Jid,
        content: &OutboundContent,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.record(Call::Send {
            to: to.to_string(),
            content: content.clone(),
        });
        if cancel.is_cancelled() {
            bail!("send cancelled");
        }
        let scripted = self
            .send_response
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match scripted {
            Some(Ok(id)) => Ok(id),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(format!(
                "SIM-{}",
                self.next_message.fetch_add(1, Ordering::Relaxed)
            )),
        }
    }
}
