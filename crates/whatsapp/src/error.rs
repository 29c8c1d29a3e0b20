use std::time::Duration;

/// Errors surfaced by the session gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("whatsapp client is not connected")]
    NotConnected,

    #[error("already logged in")]
    AlreadyLoggedIn,

    #[error("failed to connect to whatsapp: {0}")]
    ConnectFailed(#[source] anyhow::Error),

    #[error("timed out after {0:?} waiting for pairing code")]
    Timeout(Duration),

    #[error("received empty pairing code from whatsapp")]
    EmptyCode,

    #[error("failed to logout: {0}")]
    LogoutFailed(#[source] anyhow::Error),

    #[error("failed to send message: {0}")]
    SendFailed(#[source] anyhow::Error),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("credential store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl Error {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::AlreadyLoggedIn => "already_logged_in",
            Self::ConnectFailed(_) => "connect_failed",
            Self::Timeout(_) => "timeout",
            Self::EmptyCode => "empty_code",
            Self::LogoutFailed(_) => "logout_failed",
            Self::SendFailed(_) => "send_failed",
            Self::InvalidRecipient(_) => "invalid_recipient",
            Self::Store(_) => "store_error",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
