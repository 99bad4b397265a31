//! The persistent key/value store shared by all contexts.
//!
//! This is the only shared mutable resource: every context reads and writes it, there are no
//! transactions, and writes are whole-value overwrites where the last writer wins. The store must
//! be treated as unreliable; a value written a moment ago may be gone on the next read.
//!
//! Logic code only ever sees a [`StoreRef`], so the backing implementation can be swapped:
//!
//! - [`MemoryStore`] keeps everything in process memory, which is what tests use and what is
//!   sufficient for contexts living on the same runtime.
//! - [`FilesystemStore`] keeps one file per key in a directory, which lets separate processes
//!   coordinate the same way browser tabs do through local storage.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

mod fs;
mod memory;

pub use fs::FilesystemStore;
pub use memory::MemoryStore;

/// An error accessing the [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Writing the value would exceed the space available to the store.
    #[error("storage quota exceeded ({needed} bytes needed, {available} available)")]
    QuotaExceeded { needed: usize, available: usize },
    /// The key cannot be represented by this store.
    #[error("invalid store key `{0}`")]
    InvalidKey(String),
    /// The underlying storage failed.
    #[error("store i/o failed")]
    Io(#[from] io::Error),
}

/// Synchronous get/set/remove of string values keyed by string.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Returns the value stored under `key`, or `None` if there is none.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes the value stored under `key`.
    ///
    /// Removing a key that does not exist is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub type StoreRef = Arc<dyn KeyValueStore>;
