//! Watch loops over coordination-store keys.
//!
//! `state` holds the pure index bookkeeping; `runner` drives the store
//! queries, backoff and notification around it.

mod runner;
mod state;

pub use runner::{WatchLoop, WatchSettings};
