//! Outgoing HTTP plumbing for the application manager API.

mod broker;
mod dispatcher;

pub use broker::TokenBroker;
pub use dispatcher::{HttpDispatcher, HttpRequest, TlsPolicy};
pub(crate) use dispatcher::classify;
