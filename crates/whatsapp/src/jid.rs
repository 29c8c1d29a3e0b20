use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Server for regular user accounts.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// A WhatsApp address, `user@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Build a user address from a phone number, keeping only its digits.
    pub fn from_phone(phone: &str) -> Result<Self, Error> {
        let trimmed = phone.trim();
        let valid = trimmed
            .chars()
            .enumerate()
            .all(|(i, c)| c.is_ascii_digit() || c == ' ' || c == '-' || (i == 0 && c == '+'));
        let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
        if !valid || digits.is_empty() {
            return Err(Error::InvalidRecipient(phone.to_string()));
        }
        Ok(Self::new(digits, DEFAULT_USER_SERVER))
    }
}

impl FromStr for Jid {
    type Err = Error;

    /// Accepts `user@server` as-is, or a bare phone number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('@') {
            Some((user, server)) => {
                if user.is_empty() || server.is_empty() || server.contains('@') {
                    return Err(Error::InvalidRecipient(s.to_string()));
                }
                Ok(Self::new(user, server))
            },
            None => Self::from_phone(s),
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}
