//! The opaque protocol client the session wraps.

use {anyhow::Result, async_trait::async_trait, serde::Serialize, tokio_util::sync::CancellationToken};

use crate::jid::Jid;

/// Outbound message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundContent {
    Text { body: String },
}

impl OutboundContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }
}

/// Connection, logout and send primitives of the messaging protocol.
///
/// Events flow the other way, over the channel handed to
/// [`Session::start`](crate::session::Session::start).
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the transport. For an unpaired device this starts the pairing flow.
    async fn connect(&self) -> Result<()>;

    /// Close the transport.
    async fn disconnect(&self);

    /// Revoke this device on the remote side.
    async fn logout(&self) -> Result<()>;

    /// Send a message and return the id the protocol assigned to it.
    ///
    /// `cancel` is advisory; implementations may ignore it once the request
    /// is on the wire.
    async fn send(&self, to: &Jid, content: &OutboundContent, cancel: &CancellationToken) -> Result<String>;
}
