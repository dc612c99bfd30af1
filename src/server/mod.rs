//! Accepting connections on the init socket and serving them.

pub mod listener;
pub mod session;

pub use listener::{Listener, ListenerError};
pub use session::{ConnectionFault, Session, SessionState};

use std::time::Duration;

use crate::protocol::frame::DEFAULT_MAX_LINE_LEN;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// How long one request may take to arrive, measured from the moment
    /// the session starts waiting for it.
    pub request_timeout: Duration,
    pub max_line_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// Faults that end the pod. The init is PID 1; without its listener
/// nothing in the pod can make progress.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to accept connection")]
    Accept(#[source] std::io::Error),
    #[error("failed to set up signal handling")]
    Signals(#[source] nix::Error),
}
