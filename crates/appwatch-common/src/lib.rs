//! # AppWatch Common
//!
//! Shared types, errors, and constants used across AppWatch components.
//!
//! ## Modules
//! - `types` - Core data structures (Topic, WatchTarget, Credentials, etc.)
//! - `error` - Common error type
//! - `constants` - Key layout, header names, and default timings

pub mod constants;
pub mod error;
pub mod types;

pub use error::AppWatchError;
pub use types::*;
