//! Single-slot, latest-value-wins handoff for pairing codes.

use std::{sync::Mutex, time::Duration};

use {
    tokio::{sync::Notify, time::Instant},
    tracing::debug,
};

/// Holds at most one pending pairing code.
///
/// Publishing never blocks and replaces any unconsumed code. A code is handed
/// to at most one waiter.
#[derive(Debug, Default)]
pub struct PairingMailbox {
    slot: Mutex<Option<String>>,
    notify: Notify,
}

/// The wait elapsed without a code being published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimedOut;

impl PairingMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `code`, evicting any code nobody consumed yet.
    pub fn publish(&self, code: String) {
        let evicted = self
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(code);
        if evicted.is_some() {
            debug!("pairing code superseded before it was consumed");
        }
        self.notify.notify_waiters();
    }

    /// Take the pending code, if any.
    pub fn take(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Drop any pending code.
    pub fn clear(&self) {
        if self.take().is_some() {
            debug!("discarded cached pairing code");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Wait until a code is available or `timeout` elapses.
    ///
    /// On timeout nothing is consumed; a code published later stays in the
    /// slot for the next caller.
    pub async fn wait(&self, timeout: Duration) -> Result<String, WaitTimedOut> {
        // A timeout past the clock's range waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            // Register interest before looking at the slot so a publish
            // landing between the check and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(code) = self.take() {
                return Ok(code);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(WaitTimedOut);
                    }
                },
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{
            collections::HashSet,
            sync::{
                Arc,
                atomic::{AtomicUsize, Ordering},
            },
        },
    };

    #[tokio::test]
    async fn returns_pending_code_immediately() {
        let mailbox = PairingMailbox::new();
        mailbox.publish("1@AAAA,BBBB==".into());
        let started = Instant::now();
        let code = mailbox.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, "1@AAAA,BBBB==");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!mailbox.has_pending());
    }

    #[tokio::test]
    async fn unbounded_timeout_still_receives_a_code() {
        let mailbox = Arc::new(PairingMailbox::new());
        let publisher = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                mailbox.publish("2@late".into());
            })
        };

        let code = tokio::time::timeout(
            Duration::from_secs(2),
            mailbox.wait(Duration::from_secs(u64::MAX)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(code, "2@late");
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn latest_code_wins() {
        let mailbox = PairingMailbox::new();
        mailbox.publish("Q1".into());
        mailbox.publish("Q2".into());
        assert_eq!(mailbox.wait(Duration::from_millis(50)).await.unwrap(), "Q2");
        assert_eq!(
            mailbox.wait(Duration::from_millis(20)).await,
            Err(WaitTimedOut)
        );
    }

    #[tokio::test]
    async fn times_out_without_consuming_late_codes() {
        let mailbox = PairingMailbox::new();
        let started = Instant::now();
        assert_eq!(
            mailbox.wait(Duration::from_millis(100)).await,
            Err(WaitTimedOut)
        );
        assert!(started.elapsed() >= Duration::from_millis(100));

        mailbox.publish("late".into());
        assert_eq!(mailbox.wait(Duration::from_millis(10)).await.unwrap(), "late");
    }

    #[tokio::test]
    async fn wakes_a_waiter_on_publish() {
        let mailbox = Arc::new(PairingMailbox::new());
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move { mailbox.wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.publish("fresh".into());
        assert_eq!(waiter.await.unwrap().unwrap(), "fresh");
    }

    #[tokio::test]
    async fn clear_discards_pending_code() {
        let mailbox = PairingMailbox::new();
        mailbox.publish("stale".into());
        mailbox.clear();
        assert_eq!(
            mailbox.wait(Duration::from_millis(20)).await,
            Err(WaitTimedOut)
        );
    }

    /// Concurrent publishers and waiters: every code is either consumed by
    /// exactly one waiter or superseded, and the last one published is never
    /// lost.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publish_and_drain_never_loses_the_last_code() {
        const CODES: usize = 500;
        let mailbox = Arc::new(PairingMailbox::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicUsize::new(0));

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let mailbox = Arc::clone(&mailbox);
            let received = Arc::clone(&received);
            let stop = Arc::clone(&stop);
            waiters.push(tokio::spawn(async move {
                while stop.load(Ordering::SeqCst) == 0 {
                    if let Ok(code) = mailbox.wait(Duration::from_millis(5)).await {
                        received.lock().unwrap().push(code);
                    }
                }
            }));
        }

        for i in 0..CODES {
            mailbox.publish(format!("code-{i}"));
            if i % 16 == 0 {
                tokio::task::yield_now().await;
            }
        }
        let last = format!("code-{}", CODES - 1);

        // Give waiters time to drain whatever is resident, then stop them.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.store(1, Ordering::SeqCst);
        for w in waiters {
            w.await.unwrap();
        }

        let received = received.lock().unwrap().clone();
        let unique: HashSet<_> = received.iter().collect();
        assert_eq!(unique.len(), received.len(), "a code was delivered twice");

        let resident = mailbox.take();
        let last_seen = received.contains(&last) || resident.as_deref() == Some(last.as_str());
        assert!(last_seen, "last published code was lost");
    }
}
