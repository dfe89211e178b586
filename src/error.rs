//! Unified error type.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// The error type returned by gatehouse's fallible operations.
///
/// Application-level errors (404, 405, malformed bodies) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: the listener, signal handlers, TLS material and
/// the shutdown path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The listener failed while accepting connections. Always fatal.
    #[error("listener failed: {0}")]
    Accept(#[source] std::io::Error),

    /// An OS signal handler could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// A certificate or key file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    TlsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The key file held no usable private key.
    #[error("no private key found in {}", .0.display())]
    MissingPrivateKey(PathBuf),

    /// rustls rejected the certificate chain or key.
    #[error("invalid tls configuration: {0}")]
    TlsConfig(#[from] tokio_rustls::rustls::Error),

    /// A handler did not produce its response within the write timeout.
    /// The connection is closed without a response.
    #[error("response not produced within {0:?}")]
    WriteTimeout(Duration),

    /// Connections were still alive after the forced close grace period.
    #[error("forced close left {remaining} connection(s) running")]
    ForcedClose { remaining: usize },
}
