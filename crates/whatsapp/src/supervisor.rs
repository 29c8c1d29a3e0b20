//! Automatic reconnect after an unsolicited disconnect.

use std::{
    sync::{Mutex, Weak},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::task::AbortHandle,
    tracing::{debug, error, info, warn},
};

use courier_config::ReconnectConfig;

/// How many reconnect attempts follow one disconnect, and how far apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub delay: Duration,
    pub max_attempts: u32,
    /// Applied to the delay after each failed attempt.
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// One attempt after `delay`, then give up.
    pub fn single(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: 1,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Up to `max_attempts` attempts with exponential backoff capped at `max_delay`.
    pub fn backoff(delay: Duration, max_attempts: u32, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            delay,
            max_attempts,
            multiplier,
            max_delay,
        }
    }

    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::single(Duration::ZERO)
        }
    }

    /// Delay before attempt number `attempt` (0-based), `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let cap = self.max_delay.max(self.delay);
        let factor = self
            .multiplier
            .max(1.0)
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let scaled = Duration::try_from_secs_f64(self.delay.as_secs_f64() * factor).unwrap_or(cap);
        Some(scaled.min(cap))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self::backoff(
            Duration::from_secs(cfg.delay_secs),
            cfg.max_attempts,
            cfg.multiplier,
            Duration::from_secs(cfg.max_delay_secs),
        )
    }
}

/// Something the supervisor can reconnect.
#[async_trait]
pub trait Reconnect: Send + Sync + 'static {
    async fn reconnect(&self) -> crate::Result<()>;
}

/// Runs the reconnect policy on its own task, one run per disconnect.
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    pending: Mutex<Option<AbortHandle>>,
}

impl ReconnectSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            pending: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Start a reconnect run for one disconnect, replacing any run still pending.
    ///
    /// Only a weak reference to the target is held, so a pending run never
    /// keeps the session alive.
    pub fn on_disconnect(&self, target: Weak<dyn Reconnect>) {
        if self.policy.max_attempts == 0 {
            debug!("automatic reconnect disabled");
            return;
        }
        let policy = self.policy;
        let handle = tokio::spawn(run_policy(policy, target)).abort_handle();
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Abort any pending reconnect run.
    pub fn cancel(&self) {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = pending {
            handle.abort();
            debug!("cancelled pending reconnect");
        }
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_policy(policy: ReconnectPolicy, target: Weak<dyn Reconnect>) {
    let mut attempt = 0;
    while let Some(delay) = policy.delay_for(attempt) {
        attempt += 1;
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting to whatsapp after delay"
        );
        tokio::time::sleep(delay).await;

        let Some(target) = target.upgrade() else {
            debug!("session gone, abandoning reconnect");
            return;
        };
        match target.reconnect().await {
            Ok(()) => {
                info!(attempt, "reconnected to whatsapp");
                return;
            },
            Err(e) => error!(attempt, error = %e, "failed to reconnect"),
        }
    }
    warn!(
        attempts = attempt,
        "automatic reconnect exhausted, waiting for an explicit connect"
    );
}
