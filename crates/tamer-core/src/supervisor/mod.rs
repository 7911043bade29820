//! Supervisor RPC.
//!
//! The supervisor is a remote process manager reachable at a
//! `tcp://<host>:<port>` endpoint. [`Supervisor`] is the seam the rest of
//! the crate programs against; [`TcpSupervisorClient`] is the real
//! implementation and tests substitute in-memory fakes.

use std::time::Duration;

pub mod client;
pub mod launcher;
pub mod protocol;

pub use client::{TcpSupervisorClient, parse_endpoint};
pub use launcher::{CommandLauncher, LaunchError, LaunchedSupervisor, SupervisorLauncher};
pub use protocol::{ResponseStatus, SupervisorRequest, SupervisorResponse};

/// A request/response channel to a supervisor.
pub trait Supervisor {
    /// Sends `request` to the supervisor at `endpoint` and waits for its
    /// reply.
    ///
    /// # Errors
    ///
    /// Returns a [`SupervisorError`] if the supervisor cannot be reached,
    /// does not answer in time, or answers with something undecodable.
    fn call(
        &self,
        endpoint: &str,
        request: &SupervisorRequest,
    ) -> Result<SupervisorResponse, SupervisorError>;
}

impl<T: Supervisor + ?Sized> Supervisor for &T {
    fn call(
        &self,
        endpoint: &str,
        request: &SupervisorRequest,
    ) -> Result<SupervisorResponse, SupervisorError> {
        (**self).call(endpoint, request)
    }
}

/// Supervisor RPC errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Nothing is listening at the endpoint.
    #[error("no supervisor listening at {endpoint}")]
    ConnectionRefused {
        /// Endpoint string.
        endpoint: String,
    },

    /// The peer dropped the connection before replying, as a supervisor
    /// that is shutting down does.
    #[error("supervisor at {endpoint} closed the connection without a response")]
    ConnectionClosed {
        /// Endpoint string.
        endpoint: String,
    },

    /// The supervisor did not complete the exchange in time.
    #[error("supervisor at {endpoint} did not answer within {timeout:?}")]
    Timeout {
        /// Endpoint string.
        endpoint: String,
        /// Bound that elapsed.
        timeout: Duration,
    },

    /// The reply could not be decoded or had the wrong shape.
    #[error("supervisor protocol error: {0}")]
    Protocol(String),

    /// The endpoint string is not `tcp://<host>:<port>`.
    #[error("invalid supervisor endpoint: {0:?}")]
    InvalidEndpoint(String),

    /// The supervisor answered with `status: error`.
    #[error("supervisor rejected the command: {reason}")]
    Rejected {
        /// Reason given by the supervisor.
        reason: String,
    },

    /// `add` named a watcher the supervisor already has.
    #[error("watcher {name:?} is already registered")]
    DuplicateWatcher {
        /// Watcher name.
        name: String,
    },

    /// Any other transport failure.
    #[error("I/O error talking to supervisor at {endpoint}: {source}")]
    Io {
        /// Endpoint string.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    /// Whether the error means no supervisor is answering at the endpoint.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. } | Self::ConnectionClosed { .. } | Self::Timeout { .. }
        )
    }
}
