//! Shared fetch cache for the repository showcase.
//!
//! Several independent contexts (browser tabs in the original deployment, concurrent tasks or
//! processes here) want to render the same list of remote resources. This crate makes sure they
//! do not all hit the remote endpoint at once: results are cached in a shared persistent store,
//! and a best-effort lock kept in that same store lets one context fetch while the others wait
//! for the cache to fill up.
//!
//! The entry point is [`orchestrator::FetchOrchestrator`].

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod clock;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod orchestrator;
pub mod render;
pub mod store;
pub mod utils;
