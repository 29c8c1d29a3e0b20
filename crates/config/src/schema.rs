//! Config schema types (server, whatsapp session, logging).

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub server: ServerConfig,
    pub whatsapp: WhatsAppConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Origins allowed by the CORS layer. `*` allows any origin.
    pub cors_allowed_origins: Vec<String>,
    /// Bearer token required on outbound message routes. Open when unset.
    pub token: Option<String>,
    /// How many ports after `port` to try when it is already taken.
    pub port_search_span: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            cors_allowed_origins: vec!["http://localhost:3000".into()],
            token: None,
            port_search_span: 100,
        }
    }
}

/// WhatsApp session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Device credential file. Defaults to `<data_dir>/whatsapp/device.json`.
    pub store_path: Option<PathBuf>,
    /// How long a pairing request waits for a code.
    pub pairing_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
    pub dispatch: DispatchConfig,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            pairing_timeout_secs: 300,
            reconnect: ReconnectConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl WhatsAppConfig {
    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }
}

/// Automatic reconnect after an unsolicited disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub delay_secs: u64,
    /// Number of attempts per disconnect. `0` disables reconnecting.
    pub max_attempts: u32,
    /// Delay multiplier applied after each failed attempt.
    pub multiplier: f64,
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_secs: 5,
            max_attempts: 1,
            multiplier: 2.0,
            max_delay_secs: 300,
        }
    }
}

/// Event fan-out limits, applied per registered handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub handler_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            handler_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `production` switches the binary to JSON logs.
    pub app_env: String,
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_env: "development".into(),
            level: "info".into(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn wants_json(&self) -> bool {
        self.json || self.app_env.eq_ignore_ascii_case("production")
    }
}
