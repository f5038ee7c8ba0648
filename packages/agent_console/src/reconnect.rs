use crate::config::ReconnectFileConfig;
use crate::subscribers::Subscription;
use crate::transport::{TransportEvent, TransportManager};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 0 = unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_file(&ReconnectFileConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_file(fc: &ReconnectFileConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(fc.initial_delay_ms),
            max_delay: Duration::from_secs(fc.max_delay_secs),
            max_attempts: fc.max_attempts,
        }
    }

    /// Delay before retry number `attempt` (0-based): doubles each time,
    /// at most 64x the initial delay, never above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.saturating_mul(1 << attempt.min(6));
        delay.min(self.max_delay)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

/// Opt-in retry loop around a [`TransportManager`], which never retries on
/// its own.
///
/// After every `Close` that the caller did not ask for, schedules
/// `connect()` after the policy's backoff. An `Open` resets the count.
/// Dropping the reconnector cancels any pending retry.
pub struct Reconnector {
    attempts: Arc<AtomicU32>,
    cancel: CancellationToken,
    _subscription: Subscription,
}

impl Reconnector {
    pub fn install(transport: &Arc<TransportManager>, policy: ReconnectPolicy) -> Self {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let weak = Arc::downgrade(transport);
        let counter = attempts.clone();
        let retry_cancel = cancel.clone();
        let subscription = transport.subscribe(move |event| match event {
            TransportEvent::Open => counter.store(0, Ordering::Relaxed),
            TransportEvent::Close => {
                let Some(transport) = weak.upgrade() else {
                    return;
                };
                if transport.closed_by_caller() {
                    debug!("closed by caller, not reconnecting");
                    return;
                }
                let attempt = counter.fetch_add(1, Ordering::Relaxed);
                if !policy.allows(attempt) {
                    warn!(attempts = attempt, "giving up on reconnection");
                    return;
                }
                let delay = policy.delay_for(attempt);
                info!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnection"
                );

                let weak = Arc::downgrade(&transport);
                let cancel = retry_cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if let Some(transport) = weak.upgrade() {
                        if !transport.closed_by_caller() {
                            transport.connect();
                        }
                    }
                });
            }
            TransportEvent::Frame(_) | TransportEvent::Error(_) => {}
        });

        Self {
            attempts,
            cancel,
            _subscription: subscription,
        }
    }

    /// Retries scheduled since the last successful `Open`.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
