//! Connection lifecycle for the collector link.
//!
//! [`ConnectionManager`] owns exactly one socket and the
//! `Disconnected -> Connecting -> Connected -> Backoff` lifecycle around it.
//! It never sleeps or retries on its own; the worker asks `connect_due` and
//! schedules itself off `retry_at`, so there is at most one outstanding
//! connect attempt per sender and a long reconnect interval never blocks
//! shutdown.

use std::{
    fmt,
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    path::PathBuf,
    time::{Duration, Instant},
};

use native_tls::{TlsConnector, TlsStream};
use thiserror::Error;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Transport targeted by the sender.
#[derive(Clone, Debug)]
pub(crate) enum SocketTransport {
    /// TCP transport with optional TLS.
    Tcp(TcpTransport),
    /// Unix domain socket transport.
    Unix(UnixTransport),
}

impl fmt::Display for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketTransport::Tcp(config) => write!(f, "{}:{}", config.host, config.port),
            SocketTransport::Unix(config) => write!(f, "{}", config.path.display()),
        }
    }
}

/// TCP transport configuration.
#[derive(Clone, Debug)]
pub(crate) struct TcpTransport {
    /// Hostname or IP address to connect to.
    pub host: String,
    /// TCP port number.
    pub port: u16,
    /// Optional TLS configuration.
    pub tls: Option<TlsOptions>,
}

impl TcpTransport {
    fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|iter| iter.collect())
    }
}

/// Unix domain socket configuration.
#[derive(Clone, Debug)]
pub(crate) struct UnixTransport {
    /// Path to the socket file.
    pub path: PathBuf,
}

/// TLS connection options.
#[derive(Clone, Debug)]
pub(crate) struct TlsOptions {
    /// Domain name presented during the TLS handshake.
    pub domain: String,
    /// Skip certificate validation when true (intended for tests).
    pub insecure_skip_verify: bool,
}

impl TlsOptions {
    fn connector(&self) -> io::Result<TlsConnector> {
        let mut builder = TlsConnector::builder();
        if self.insecure_skip_verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        builder.build().map_err(io::Error::other)
    }
}

/// Established socket connection.
pub(crate) enum ActiveConnection {
    PlainTcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ActiveConnection {
    /// Update the write timeout for the underlying socket.
    fn set_write_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.set_write_timeout(Some(timeout)),
            ActiveConnection::Tls(stream) => stream.get_ref().set_write_timeout(Some(timeout)),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.set_write_timeout(Some(timeout)),
        }
    }

    /// Write a full buffer to the socket.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.write_all(buf),
            ActiveConnection::Tls(stream) => stream.write_all(buf),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.write_all(buf),
        }
    }

    /// Flush the underlying writer.
    fn flush(&mut self) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.flush(),
            ActiveConnection::Tls(stream) => stream.flush(),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.flush(),
        }
    }

    /// Release the socket, signalling the peer where the transport can.
    fn shutdown(&mut self) {
        match self {
            ActiveConnection::PlainTcp(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            ActiveConnection::Tls(stream) => {
                let _ = stream.shutdown();
            }
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

/// Errors raised while dialling or writing to the collector.
#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("connection to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },
    #[error("connection to {endpoint} failed: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("send failed: {source}")]
    SendFailed {
        #[source]
        source: io::Error,
    },
    #[error("no active connection")]
    NotConnected,
}

/// Observable view of the connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

enum ConnState {
    Disconnected,
    Connecting,
    Connected(ActiveConnection),
    Backoff { retry_at: Instant },
}

/// Owns the single collector socket and its reconnect schedule.
pub(crate) struct ConnectionManager {
    transport: SocketTransport,
    timeout: Duration,
    reconnect_interval: Duration,
    state: ConnState,
}

impl ConnectionManager {
    pub(crate) fn new(
        transport: SocketTransport,
        timeout: Duration,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            transport,
            timeout,
            reconnect_interval,
            state: ConnState::Disconnected,
        }
    }

    pub(crate) fn phase(&self) -> ConnectionPhase {
        match self.state {
            ConnState::Disconnected => ConnectionPhase::Disconnected,
            ConnState::Connecting => ConnectionPhase::Connecting,
            ConnState::Connected(_) => ConnectionPhase::Connected,
            ConnState::Backoff { .. } => ConnectionPhase::Backoff,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.phase() == ConnectionPhase::Connected
    }

    /// When the next connect attempt becomes due, if one is scheduled.
    pub(crate) fn retry_at(&self) -> Option<Instant> {
        match self.state {
            ConnState::Backoff { retry_at } => Some(retry_at),
            _ => None,
        }
    }

    /// Whether a connect attempt may be made at `now`.
    pub(crate) fn connect_due(&self, now: Instant) -> bool {
        match self.state {
            ConnState::Disconnected => true,
            ConnState::Backoff { retry_at } => now >= retry_at,
            ConnState::Connecting | ConnState::Connected(_) => false,
        }
    }

    /// Attempt to establish the collector link.
    ///
    /// On failure the manager moves to `Backoff` and the next attempt is
    /// scheduled one reconnect interval after `now`.
    pub(crate) fn connect(&mut self, now: Instant) -> Result<(), TransportError> {
        self.state = ConnState::Connecting;
        match dial(&self.transport, self.timeout) {
            Ok(connection) => {
                let _ = connection.set_write_timeout(self.timeout);
                self.state = ConnState::Connected(connection);
                Ok(())
            }
            Err(err) => {
                self.state = ConnState::Backoff {
                    retry_at: now + self.reconnect_interval,
                };
                Err(err)
            }
        }
    }

    /// Write one frame to the collector.
    ///
    /// Valid only while connected. Any write error (including EOF from a
    /// peer that went away) drops the socket and schedules a reconnect.
    pub(crate) fn send(&mut self, frame: &[u8], now: Instant) -> Result<(), TransportError> {
        let ConnState::Connected(connection) = &mut self.state else {
            return Err(TransportError::NotConnected);
        };
        let outcome = connection.write_all(frame).and_then(|()| connection.flush());
        match outcome {
            Ok(()) => Ok(()),
            Err(source) => {
                let retry_at = now + self.reconnect_interval;
                let previous = std::mem::replace(&mut self.state, ConnState::Backoff { retry_at });
                if let ConnState::Connected(mut connection) = previous {
                    connection.shutdown();
                }
                Err(TransportError::SendFailed { source })
            }
        }
    }

    /// Drop the link and stop the reconnect schedule.
    pub(crate) fn close(&mut self) {
        if let ConnState::Connected(mut connection) =
            std::mem::replace(&mut self.state, ConnState::Disconnected)
        {
            connection.shutdown();
        }
    }
}

fn dial_tcp(
    config: &TcpTransport,
    endpoint: &str,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let connect_failed = |source| TransportError::ConnectFailed {
        endpoint: endpoint.to_owned(),
        source,
    };
    let addrs = config.socket_addrs().map_err(connect_failed)?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nonblocking(false).map_err(connect_failed)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    match last_err {
        Some(err) if err.kind() == io::ErrorKind::TimedOut => {
            Err(TransportError::ConnectTimeout {
                endpoint: endpoint.to_owned(),
                timeout,
            })
        }
        Some(source) => Err(connect_failed(source)),
        None => Err(connect_failed(io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses resolved",
        ))),
    }
}

fn dial(
    transport: &SocketTransport,
    connect_timeout: Duration,
) -> Result<ActiveConnection, TransportError> {
    let endpoint = transport.to_string();
    match transport {
        SocketTransport::Tcp(config) => {
            let stream = dial_tcp(config, &endpoint, connect_timeout)?;
            if let Some(tls) = &config.tls {
                handshake_tls(stream, tls, connect_timeout)
                    .map_err(|source| TransportError::ConnectFailed { endpoint, source })
            } else {
                Ok(ActiveConnection::PlainTcp(stream))
            }
        }
        SocketTransport::Unix(config) => {
            #[cfg(unix)]
            {
                let stream = UnixStream::connect(&config.path).map_err(|source| {
                    TransportError::ConnectFailed {
                        endpoint: endpoint.clone(),
                        source,
                    }
                })?;
                Ok(ActiveConnection::Unix(stream))
            }
            #[cfg(not(unix))]
            {
                let _ = (connect_timeout, &config.path);
                Err(TransportError::ConnectFailed {
                    endpoint,
                    source: io::Error::new(
                        io::ErrorKind::Unsupported,
                        "unix domain sockets are not supported on this platform",
                    ),
                })
            }
        }
    }
}

/// Run the TLS handshake with socket timeouts applied, then clear them so
/// steady-state writes use the manager's own write timeout.
fn handshake_tls(
    stream: TcpStream,
    tls: &TlsOptions,
    timeout: Duration,
) -> io::Result<ActiveConnection> {
    let connector = tls.connector()?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    let stream = connector
        .connect(&tls.domain, stream)
        .map_err(io::Error::other)?;
    let tcp_ref = stream.get_ref();
    tcp_ref.set_read_timeout(None)?;
    tcp_ref.set_write_timeout(None)?;
    Ok(ActiveConnection::Tls(Box::new(stream)))
}
