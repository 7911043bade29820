//! TCP supervisor client.
//!
//! Each [`Supervisor::call`] opens a fresh connection, writes one frame,
//! reads one frame and closes. The blocking entry point drives the async
//! exchange on a throwaway current-thread runtime, so it must not be called
//! from inside another tokio runtime; use
//! [`TcpSupervisorClient::call_async`] there.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use super::protocol::{SupervisorRequest, SupervisorResponse, frame_codec};
use super::{Supervisor, SupervisorError};

/// Default bound on each connect, send and receive step.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Endpoint scheme accepted by [`parse_endpoint`].
pub const ENDPOINT_SCHEME: &str = "tcp://";

/// Stateless request/response client over TCP.
#[derive(Debug, Clone)]
pub struct TcpSupervisorClient {
    timeout: Duration,
}

impl Default for TcpSupervisorClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSupervisorClient {
    /// Creates a client with [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-step timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The per-step timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Performs one exchange with the supervisor at `endpoint`.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::call`].
    pub async fn call_async(
        &self,
        endpoint: &str,
        request: &SupervisorRequest,
    ) -> Result<SupervisorResponse, SupervisorError> {
        let (host, port) = parse_endpoint(endpoint)?;
        let payload = serde_json::to_vec(request)
            .map_err(|e| SupervisorError::Protocol(format!("failed to encode request: {e}")))?;

        debug!(endpoint, command = request.command(), "sending supervisor request");

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| self.timed_out(endpoint))?
            .map_err(|e| map_io_error(endpoint, e))?;

        let mut framed = Framed::new(stream, frame_codec());

        tokio::time::timeout(self.timeout, framed.send(Bytes::from(payload)))
            .await
            .map_err(|_| self.timed_out(endpoint))?
            .map_err(|e| map_io_error(endpoint, e))?;

        let frame = tokio::time::timeout(self.timeout, framed.next())
            .await
            .map_err(|_| self.timed_out(endpoint))?
            .ok_or_else(|| SupervisorError::ConnectionClosed {
                endpoint: endpoint.to_string(),
            })?
            .map_err(|e| map_io_error(endpoint, e))?;

        let response: SupervisorResponse = serde_json::from_slice(&frame)
            .map_err(|e| SupervisorError::Protocol(format!("malformed response: {e}")))?;

        debug!(endpoint, command = request.command(), status = ?response.status, "supervisor replied");
        Ok(response)
    }

    fn timed_out(&self, endpoint: &str) -> SupervisorError {
        SupervisorError::Timeout {
            endpoint: endpoint.to_string(),
            timeout: self.timeout,
        }
    }
}

impl Supervisor for TcpSupervisorClient {
    fn call(
        &self,
        endpoint: &str,
        request: &SupervisorRequest,
    ) -> Result<SupervisorResponse, SupervisorError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SupervisorError::Io {
                endpoint: endpoint.to_string(),
                source: e,
            })?;

        rt.block_on(self.call_async(endpoint, request))
    }
}

/// Splits `tcp://<host>:<port>` into host and port.
///
/// # Errors
///
/// Returns [`SupervisorError::InvalidEndpoint`] for any other shape.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16), SupervisorError> {
    let invalid = || SupervisorError::InvalidEndpoint(endpoint.to_string());

    let address = endpoint.strip_prefix(ENDPOINT_SCHEME).ok_or_else(invalid)?;
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

fn map_io_error(endpoint: &str, err: io::Error) -> SupervisorError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => SupervisorError::ConnectionRefused {
            endpoint: endpoint.to_string(),
        },
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => SupervisorError::ConnectionClosed {
            endpoint: endpoint.to_string(),
        },
        io::ErrorKind::InvalidData => {
            SupervisorError::Protocol(format!("invalid frame from {endpoint}: {err}"))
        },
        _ => SupervisorError::Io {
            endpoint: endpoint.to_string(),
            source: err,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("tcp://127.0.0.1:6000").unwrap(),
            ("127.0.0.1".to_string(), 6000)
        );
        assert_eq!(
            parse_endpoint("tcp://localhost:5555").unwrap(),
            ("localhost".to_string(), 5555)
        );
        assert_eq!(parse_endpoint("tcp://[::1]:6002").unwrap(), ("::1".to_string(), 6002));
    }

    #[test]
    fn test_parse_endpoint_rejects_bad_shapes() {
        for bad in [
            "127.0.0.1:6000",
            "udp://127.0.0.1:6000",
            "tcp://127.0.0.1",
            "tcp://:6000",
            "tcp://127.0.0.1:notaport",
            "tcp://127.0.0.1:70000",
        ] {
            assert!(
                matches!(parse_endpoint(bad), Err(SupervisorError::InvalidEndpoint(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_client_timeout() {
        assert_eq!(TcpSupervisorClient::new().timeout(), DEFAULT_TIMEOUT);
        let client = TcpSupervisorClient::new().with_timeout(Duration::from_millis(250));
        assert_eq!(client.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_io_error_mapping() {
        let err = map_io_error(
            "tcp://127.0.0.1:6000",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(err.is_unreachable());

        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ] {
            let err = map_io_error("tcp://127.0.0.1:6000", io::Error::new(kind, "gone"));
            assert!(
                matches!(err, SupervisorError::ConnectionClosed { .. }),
                "{kind:?} mapped to {err:?}"
            );
            assert!(err.is_unreachable());
        }

        let err = map_io_error(
            "tcp://127.0.0.1:6000",
            io::Error::new(io::ErrorKind::InvalidData, "frame size too big"),
        );
        assert!(matches!(err, SupervisorError::Protocol(_)));

        let err = map_io_error("tcp://127.0.0.1:6000", io::Error::other("reset"));
        assert!(matches!(err, SupervisorError::Io { .. }));
    }

    #[test]
    fn test_invalid_endpoint_fails_before_connecting() {
        let client = TcpSupervisorClient::new();
        let err = client.call("not-an-endpoint", &SupervisorRequest::list()).unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidEndpoint(_)));
    }
}
