//! OS termination signals as a channel of events.
//!
//! [`listen`] installs the handlers once and forwards every signal the
//! process receives into an `mpsc` channel. The
//! [`ShutdownCoordinator`](crate::ShutdownCoordinator) reads the first one
//! and counts the rest as ignored.
//!
//! On Unix both **SIGTERM** (container orchestrators, `kill`) and **SIGINT**
//! (Ctrl-C) are significant. On other platforms only Ctrl-C is available.

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Error;

/// A termination request from the operating system.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        })
    }
}

/// Installs the signal handlers and returns the receiving end of the event
/// channel.
///
/// Must be called from within a tokio runtime. The forwarding task stops
/// once the receiver is dropped.
pub fn listen() -> Result<mpsc::Receiver<Signal>, Error> {
    let (tx, rx) = mpsc::channel(4);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt = signal(SignalKind::interrupt()).map_err(Error::Signal)?;
        let mut terminate = signal(SignalKind::terminate()).map_err(Error::Signal)?;

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = interrupt.recv() => Signal::Interrupt,
                    Some(()) = terminate.recv() => Signal::Terminate,
                    else => break,
                };
                debug!(signal = %received, "signal received");
                if tx.send(received).await.is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!(signal = %Signal::Interrupt, "signal received");
            if tx.send(Signal::Interrupt).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
