//! # Cross-context caching infrastructure
//!
//! Fetching the showcased resources is slow and, for hosted APIs, rate limited. Every context that
//! wants to render them therefore goes through a small cache living in the shared
//! [`KeyValueStore`](crate::store::KeyValueStore).
//!
//! ## Layers
//!
//! - The [`LocalCache`] persists the last successful fetch as a single [`CacheEntry`]: a
//!   timestamp, the per-key results (with `null` for keys that failed) and [`CacheMeta`]
//!   describing which keys were fetched from which endpoint.
//! - The [`FreshnessPolicy`] decides whether an entry may be used. It is a pure function of the
//!   entry, the caller's parameters and the current time.
//! - The [`CrossContextLock`] is a best-effort lock token stored next to the entry. It keeps
//!   sibling contexts from issuing the same fetch concurrently. Acquisition is optimistic
//!   (write, then read back), so two contexts can both believe they hold it. The cost of that
//!   is one duplicate fetch, which is accepted.
//! - The [`NotificationChannel`] lets the context that fetched tell its siblings that fresh data
//!   is ready. It is optional; waiting contexts always poll the cache as well, the channel only
//!   shortens the wait.
//!
//! ## Failure handling
//!
//! Nothing in here fails loudly. An unreadable or structurally invalid entry is a cache miss, a
//! store that refuses a write means the run continues uncached, and a lock token that cannot be
//! parsed counts as no lock at all. A context that dies while holding the lock leaves a token
//! that expires after the lock TTL.
//!
//! ## Metrics
//!
//! - `caches.access`: All cache lookups.
//! - `caches.hit`: Lookups served from a usable entry.
//! - `caches.write`: Entry writes, tagged with `success`.
//! - `caches.lock`: Lock attempts, tagged with `acquired`.
//! - `caches.wait`: Completed waits, tagged with `outcome`.

mod entry;
mod local;
mod lock;
mod notify;

pub use entry::{CacheEntry, CacheMeta, FreshnessPolicy, LockToken};
pub use local::LocalCache;
pub use lock::{CrossContextLock, LockGuard, WaitOutcome, wait_for_release_or_cache};
pub use notify::{Notification, NotificationChannel, Subscription};
