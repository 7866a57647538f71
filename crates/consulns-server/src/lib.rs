//! # consulns Server
//!
//! Protocol engine for the PowerDNS remote backend convention over a Unix
//! domain socket.
//!
//! ## Architecture
//!
//! - **Listener**: accepts connections and runs one task per connection,
//!   reading newline-delimited JSON frames
//! - **Dispatcher**: parses `{"method", "parameters"}` and routes the
//!   request to a registered handler under a per-request deadline
//! - **Methods**: the remote backend method handlers, backed by the zone
//!   store
//!
//! ## Features
//!
//! - Strict request/response alternation within a connection
//! - Graceful shutdown with connection draining
//! - Every failure answered as `{"result": false}`

use std::time::Duration;
use thiserror::Error;

pub mod dispatcher;
pub mod listener;
pub mod methods;
pub mod stats;

pub use dispatcher::{DispatchError, Dispatcher, MethodHandler, Request, Response};
pub use listener::{ListenerState, UnixServer};
pub use methods::{register_all, HandlerError, KeyAction};
pub use stats::ServerStats;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    Shutdown,
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Deadline for a single request, measured from frame receipt.
    pub request_timeout: Duration,

    /// Longest accepted request line in bytes, excluding the newline.
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            max_frame_len: 64 * 1024,
        }
    }
}
