//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default drain deadline: how long in-flight requests get to finish after a
/// termination signal before their connections are closed.
pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Default limit on how long a client may take to send request headers.
pub const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default limit on how long a client may take to send a request body.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default limit on producing and writing a response once the request has
/// been read.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything [`Server`](crate::Server) needs to know before it binds.
///
/// ```rust
/// use std::time::Duration;
/// use gatehouse::ServerConfig;
///
/// let config = ServerConfig::new("127.0.0.1:8443".parse().unwrap())
///     .with_drain_deadline(Duration::from_secs(10))
///     .with_tls("localhost.crt", "localhost.key");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub drain_deadline: Duration,
    pub header_read_timeout: Duration,
    /// Bounds collecting the request body. Expiry answers `408`.
    pub read_timeout: Duration,
    /// Bounds the handler, and any single stalled write to the client.
    pub write_timeout: Duration,
    pub tls: Option<TlsConfig>,
}

/// Paths to the PEM-encoded certificate chain and private key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl ServerConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            drain_deadline: DEFAULT_DRAIN_DEADLINE,
            header_read_timeout: DEFAULT_HEADER_READ_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            tls: None,
        }
    }

    pub fn with_drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }

    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Terminates TLS on the listener with the given certificate and key.
    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsConfig { cert_path: cert_path.into(), key_path: key_path.into() });
        self
    }
}

/// Listens on `0.0.0.0:8000` in plain HTTP.
impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 8000)))
    }
}
