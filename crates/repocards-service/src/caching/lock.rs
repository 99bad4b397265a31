use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::WaitConfig;
use crate::store::StoreRef;
use crate::utils::defer::{DeferGuard, defer};

use super::{FreshnessPolicy, LockToken, Notification, Subscription};

/// A best-effort mutual exclusion marker kept in the shared store.
///
/// This is not an atomic compare-and-swap. Acquisition writes a [`LockToken`] and reads it back,
/// which catches most but not all races: two contexts acquiring at the same moment can both
/// succeed. A holder that disappears without releasing leaves a token that expires after the TTL.
#[derive(Debug, Clone)]
pub struct CrossContextLock {
    store: StoreRef,
    key: String,
    policy: FreshnessPolicy,
}

impl CrossContextLock {
    pub fn new(store: StoreRef, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            policy: FreshnessPolicy::new(ttl),
        }
    }

    /// Returns the current token, treating unreadable tokens as absent.
    pub fn current(&self) -> Option<LockToken> {
        let raw = match self.store.get(&self.key) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "Lock read failed");
                return None;
            }
        };
        serde_json::from_str(&raw).ok()
    }

    /// Returns `true` if a token exists that is younger than the lock TTL at `now`.
    ///
    /// Tokens stamped more than one TTL in the future count as abandoned.
    pub fn is_held(&self, now: u64) -> bool {
        self.current().is_some_and(|token| {
            let ahead = token.timestamp.saturating_sub(now);
            !self.policy.is_expired(token.timestamp, now)
                && u128::from(ahead) <= self.policy.ttl.as_millis()
        })
    }

    /// Tries to take the lock at `now`.
    ///
    /// Fails if a fresh token exists, if the store refuses the write, or if reading the token back
    /// yields something other than what was written.
    pub fn try_acquire(&self, now: u64) -> Option<LockGuard> {
        let acquired = self.try_acquire_inner(now);
        metric!(counter("caches.lock") += 1, "acquired" => if acquired { "true" } else { "false" });
        acquired.then(|| LockGuard::new(self.clone()))
    }

    fn try_acquire_inner(&self, now: u64) -> bool {
        if self.is_held(now) {
            tracing::debug!(key = %self.key, "Lock is held by another context");
            return false;
        }

        let token = LockToken { timestamp: now };
        let json = match serde_json::to_string(&token) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "Lock serialization failed");
                return false;
            }
        };
        if let Err(err) = self.store.set(&self.key, &json) {
            tracing::warn!(key = %self.key, error = %err, "Lock write failed");
            return false;
        }

        let verified = self.current() == Some(token);
        if !verified {
            tracing::debug!(key = %self.key, "Lost the race for the lock");
        }
        verified
    }

    /// Removes the token, whoever wrote it.
    pub fn release(&self) {
        if let Err(err) = self.store.remove(&self.key) {
            tracing::warn!(key = %self.key, error = %err, "Lock release failed");
        }
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// Proof of holding a [`CrossContextLock`].
///
/// The lock is released when the guard is dropped, which covers early returns, panics and
/// cancelled futures. Use [`LockGuard::release`] to release it at a specific point.
pub struct LockGuard {
    release: DeferGuard<ReleaseFn>,
}

impl LockGuard {
    fn new(lock: CrossContextLock) -> Self {
        let release: ReleaseFn = Box::new(move || lock.release());
        Self {
            release: defer(release),
        }
    }

    pub fn release(self) {
        self.release.run();
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("release", &self.release)
            .finish()
    }
}

/// Why [`wait_for_release_or_cache`] stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A usable entry appeared, or a sibling announced one.
    CacheReady,
    /// Nothing happened within the maximum wait time.
    TimedOut,
}

impl WaitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheReady => "cache-ready",
            Self::TimedOut => "timed-out",
        }
    }
}

/// Waits until `cache_ready` reports a usable entry, a notification arrives, or
/// [`WaitConfig::max_wait`] has elapsed.
///
/// `cache_ready` is polled right away and then at exponentially growing intervals, capped at
/// [`WaitConfig::max_poll_interval`]. Without a subscription this is plain polling, which is
/// enough on its own. `TimedOut` is never returned before `max_wait` has passed.
pub async fn wait_for_release_or_cache<F>(
    config: &WaitConfig,
    mut cache_ready: F,
    mut subscription: Option<&mut Subscription>,
) -> WaitOutcome
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let deadline = start + config.max_wait;
    let backoff_factor = config.backoff_factor.max(1.0);
    let mut interval = config.poll_interval.max(Duration::from_millis(1));

    let outcome = loop {
        if cache_ready() {
            break WaitOutcome::CacheReady;
        }

        let now = Instant::now();
        if now >= deadline {
            break WaitOutcome::TimedOut;
        }
        let sleep_for = interval.min(deadline - now);

        let notified = async {
            match subscription.as_deref_mut() {
                Some(subscription) => subscription.next().await,
                None => std::future::pending().await,
            }
        };
        let channel_closed = tokio::select! {
            _ = tokio::time::sleep(sleep_for) => false,
            notification = notified => match notification {
                Some(Notification::CacheReady) => break WaitOutcome::CacheReady,
                None => true,
            },
        };
        if channel_closed {
            tracing::debug!("Notification channel closed, falling back to polling");
            subscription = None;
        }

        interval = next_interval(interval, backoff_factor, config.max_poll_interval);
    };

    tracing::debug!(
        outcome = outcome.as_str(),
        waited = ?start.elapsed(),
        "Finished waiting for sibling context"
    );
    metric!(counter("caches.wait") += 1, "outcome" => outcome.as_str());
    outcome
}

/// Grows `interval` by `factor`, saturating at `cap`.
fn next_interval(interval: Duration, factor: f64, cap: Duration) -> Duration {
    let cap = cap.max(Duration::from_millis(1));
    Duration::try_from_secs_f64(interval.as_secs_f64() * factor)
        .unwrap_or(cap)
        .min(cap)
}
