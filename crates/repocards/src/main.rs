//! Repocards.
//!
//! Renders a showcase of GitHub repositories. Results are cached in a store shared by every
//! context rendering the showcase, and a best-effort lock in the same store keeps concurrent
//! contexts from fetching the same repositories at once.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
