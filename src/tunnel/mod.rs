//! Tunnel management.
//!
//! This module exposes the local server through a public tunnel:
//! - [`provider`] - Static registry of supported providers and their output matchers
//! - [`TunnelSession`] - One tunnel attempt, from spawn/connect to termination
//! - Line stream over a provider subprocess's stdout and stderr
//! - localtunnel API client and connection pool

mod lines;
mod localtunnel;
pub mod provider;
mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use session::{exit_status_for, SessionEvent, TunnelRequest, TunnelSession};
