use std::{fmt, sync::RwLock};

use {serde::Serialize, tracing::info};

/// Transport status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    /// Transport open, waiting for the device to be paired.
    Pairing,
    /// Transport open and authenticated.
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Pairing => "pairing",
            Self::Connected => "connected",
        })
    }
}

/// Shared link status. Reads and writes never block across an await.
#[derive(Debug)]
pub struct ConnectionState {
    link: RwLock<LinkState>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            link: RwLock::new(LinkState::Disconnected),
        }
    }

    pub fn get(&self) -> LinkState {
        *self.link.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.get() == LinkState::Connected
    }

    /// Set the link state, returning the previous one.
    pub fn set(&self, next: LinkState) -> LinkState {
        let prev = {
            let mut link = self.link.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *link, next)
        };
        if prev != next {
            info!(from = %prev, to = %next, "whatsapp link state changed");
        }
        prev
    }

    /// Set the link state only if it is still `expected`.
    pub fn set_if(&self, expected: LinkState, next: LinkState) -> bool {
        {
            let mut link = self.link.write().unwrap_or_else(|e| e.into_inner());
            if *link != expected {
                return false;
            }
            *link = next;
        }
        if expected != next {
            info!(from = %expected, to = %next, "whatsapp link state changed");
        }
        true
    }

    pub fn set_connected(&self, connected: bool) -> LinkState {
        self.set(if connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        })
    }
}
