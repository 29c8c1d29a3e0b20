//! WhatsApp session gateway.
//!
//! Wraps an opaque [`ProtocolClient`] in a [`Session`] that owns the link
//! state, hands pairing codes to callers through a single-slot mailbox, fans
//! protocol events out to registered handlers over bounded queues and
//! reconnects after an unsolicited drop.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod jid;
pub mod mailbox;
pub mod session;
pub mod sim;
pub mod state;
pub mod store;
pub mod supervisor;

pub use {
    client::{OutboundContent, ProtocolClient},
    dispatch::{
        DispatchLimits, DispatchOutcome, EventDispatcher, EventHandler, HandlerId, HandlerStats,
        link_effect,
    },
    error::{Error, Result},
    event::{InboundMessage, ProtocolEvent, ReceivedMessage, SessionEvent},
    jid::Jid,
    mailbox::PairingMailbox,
    session::{SendRequest, Session, SessionConfig, SessionStatus},
    sim::SimulatedClient,
    state::{ConnectionState, LinkState},
    store::{CredentialStore, DeviceIdentity, FileCredentialStore, MemoryCredentialStore},
    supervisor::{Reconnect, ReconnectPolicy, ReconnectSupervisor},
};
