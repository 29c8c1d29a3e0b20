//! Protocol events emitted by the client and the session events fanned out to handlers.

use serde::Serialize;

/// Events produced by the protocol client's notification feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Transport is up and the device is authenticated.
    Connected,
    /// Transport dropped.
    Disconnected,
    /// The remote side issued pairing codes; only the first one is used.
    PairingCode { codes: Vec<String> },
    /// A pairing attempt completed for `account`.
    PairSuccess { account: String },
    /// The remote side revoked this device.
    LoggedOut { reason: Option<String> },
    /// An inbound chat message.
    Message(InboundMessage),
    /// Anything the session does not act on.
    Unknown { kind: String },
}

impl ProtocolEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::PairingCode { .. } => "pairing_code",
            Self::PairSuccess { .. } => "pair_success",
            Self::LoggedOut { .. } => "logged_out",
            Self::Message(_) => "message",
            Self::Unknown { kind } => kind.as_str(),
        }
    }
}

/// Raw inbound message as delivered by the protocol layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InboundMessage {
    pub id: String,
    /// Sender address (`user@server`).
    pub sender: String,
    /// Chat the message belongs to; equals `sender` for direct chats.
    pub chat: String,
    /// Plain conversation text.
    pub text: Option<String>,
    /// Text carried by an "extended" message (replies, link previews).
    pub extended_text: Option<String>,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl InboundMessage {
    /// Primary text if non-empty, otherwise the extended text if non-empty.
    pub fn content(&self) -> Option<&str> {
        [self.text.as_deref(), self.extended_text.as_deref()]
            .into_iter()
            .flatten()
            .find(|t| !t.is_empty())
    }
}

/// Message content extracted from an [`InboundMessage`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedMessage {
    pub id: String,
    pub sender: String,
    pub chat: String,
    pub text: String,
    pub timestamp: i64,
}

impl ReceivedMessage {
    /// Returns `None` when the message carries no text.
    pub fn from_inbound(msg: &InboundMessage) -> Option<Self> {
        let text = msg.content()?;
        Some(Self {
            id: msg.id.clone(),
            sender: msg.sender.clone(),
            chat: msg.chat.clone(),
            text: text.to_string(),
            timestamp: msg.timestamp,
        })
    }
}

/// What registered handlers receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The protocol event, unchanged.
    Protocol(ProtocolEvent),
    /// Derived from an inbound message that had text.
    MessageReceived(ReceivedMessage),
}
