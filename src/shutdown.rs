//! The shutdown state machine.
//!
//! ```text
//!                    listener error
//!          ┌──────────────────────────────────────────────▶ Failed
//!          │
//!       Running ──signal──▶ Draining ──all done──────────▶ Stopped
//!                               │
//!                               └──deadline──▶ forced close ──ok──▶ ForcedClosed
//!                                                           └─err─▶ Failed
//! ```
//!
//! The coordinator waits on two event sources at once: OS signals and the
//! accept loop's fatal-error channel. The first event decides the path;
//! anything that arrives after that is logged and counted, never acted on.

use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::config::DEFAULT_DRAIN_DEADLINE;
use crate::error::Error;
use crate::server::{DrainOutcome, RunningServer};
use crate::signal::Signal;

/// Where the coordinator is in the shutdown sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownState {
    Running,
    Draining,
    /// Drained cleanly.
    Stopped,
    /// Drain deadline elapsed; remaining connections were closed.
    ForcedClosed,
    /// Listener failure, or the forced close itself failed.
    Failed,
}

/// The event that started the shutdown.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Trigger {
    Signal(Signal),
    ListenerFailure,
    /// Every event source closed without delivering an event.
    SourcesClosed,
}

/// How the shutdown ended.
#[derive(Debug)]
pub enum ShutdownOutcome {
    Clean,
    /// The drain deadline elapsed and `aborted` connections were closed.
    Degraded { aborted: usize },
    /// The listener broke; no drain was attempted.
    ListenerFailed(Error),
    /// The drain deadline elapsed and closing the leftovers failed too.
    ForcedCloseFailed(Error),
}

/// Everything the process needs to decide how to exit.
#[derive(Debug)]
pub struct ShutdownReport {
    pub trigger: Trigger,
    pub outcome: ShutdownOutcome,
    /// Signals or errors that arrived after the shutdown had started.
    pub ignored_events: usize,
}

impl ShutdownReport {
    /// Clean and degraded-but-recovered shutdowns succeed; a broken listener
    /// or a failed forced close does not.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ShutdownOutcome::Clean | ShutdownOutcome::Degraded { .. })
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
    }
}

/// Something that can be drained once. Implemented by [`RunningServer`].
pub(crate) trait Drain: Send {
    fn drain(self, deadline: Duration) -> impl Future<Output = Result<DrainOutcome, Error>> + Send;
}

impl Drain for RunningServer {
    fn drain(self, deadline: Duration) -> impl Future<Output = Result<DrainOutcome, Error>> + Send {
        RunningServer::drain(self, deadline)
    }
}

enum Event {
    Signal(Signal),
    ListenerFailed(Error),
    SourcesClosed,
}

/// Decides how and when the process stops.
///
/// ```rust,no_run
/// use gatehouse::{Router, Server, ShutdownCoordinator, signal};
///
/// # async fn run() -> Result<(), gatehouse::Error> {
/// let running = Server::bind("0.0.0.0:8000".parse().unwrap())
///     .start(Router::new())
///     .await?;
/// let report = ShutdownCoordinator::default()
///     .run(running, signal::listen()?)
///     .await;
/// std::process::exit(if report.is_success() { 0 } else { 1 });
/// # }
/// ```
pub struct ShutdownCoordinator {
    deadline: Duration,
    state: watch::Sender<ShutdownState>,
}

impl ShutdownCoordinator {
    pub fn new(deadline: Duration) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self { deadline, state }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Runs until the server has shut down, one way or another.
    pub async fn run(self, mut server: RunningServer, signals: mpsc::Receiver<Signal>) -> ShutdownReport {
        // `take_failures` is only `None` if someone else took the channel; an
        // empty receiver then keeps the race to signals alone.
        let failures = server.take_failures().unwrap_or_else(|| mpsc::channel(1).1);
        self.run_with(server, failures, signals).await
    }

    pub(crate) async fn run_with<D: Drain>(
        self,
        server: D,
        mut failures: mpsc::Receiver<Error>,
        mut signals: mpsc::Receiver<Signal>,
    ) -> ShutdownReport {
        let first = tokio::select! {
            Some(e) = failures.recv() => Event::ListenerFailed(e),
            Some(sig) = signals.recv() => Event::Signal(sig),
            else => Event::SourcesClosed,
        };

        let trigger = match first {
            Event::ListenerFailed(e) => {
                error!(error = %e, "listener failed, exiting without drain");
                self.state.send_replace(ShutdownState::Failed);
                let ignored_events = count_pending(&mut failures, &mut signals);
                return ShutdownReport {
                    trigger: Trigger::ListenerFailure,
                    outcome: ShutdownOutcome::ListenerFailed(e),
                    ignored_events,
                };
            }
            Event::Signal(sig) => {
                info!(signal = %sig, "starting graceful shutdown");
                Trigger::Signal(sig)
            }
            Event::SourcesClosed => {
                warn!("every shutdown event source closed, starting graceful shutdown");
                Trigger::SourcesClosed
            }
        };

        self.state.send_replace(ShutdownState::Draining);

        let drain = server.drain(self.deadline);
        tokio::pin!(drain);

        let mut ignored_events = 0;
        let drained = loop {
            tokio::select! {
                res = &mut drain => break res,
                Some(sig) = signals.recv() => {
                    ignored_events += 1;
                    info!(signal = %sig, "shutdown already in progress, ignoring signal");
                }
                Some(e) = failures.recv() => {
                    ignored_events += 1;
                    warn!(error = %e, "listener error during shutdown, ignoring");
                }
            }
        };
        ignored_events += count_pending(&mut failures, &mut signals);

        let (state, outcome) = match drained {
            Ok(DrainOutcome::Clean) => {
                info!("shutdown complete");
                (ShutdownState::Stopped, ShutdownOutcome::Clean)
            }
            Ok(DrainOutcome::Forced { aborted }) => {
                let deadline_ms = u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX);
                warn!(aborted, deadline_ms, "graceful shutdown did not complete in time, connections were closed");
                (ShutdownState::ForcedClosed, ShutdownOutcome::Degraded { aborted })
            }
            Err(e) => {
                error!(error = %e, "could not stop server");
                (ShutdownState::Failed, ShutdownOutcome::ForcedCloseFailed(e))
            }
        };
        self.state.send_replace(state);

        ShutdownReport { trigger, outcome, ignored_events }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_DEADLINE)
    }
}

/// Counts (and logs) events already queued once the outcome is decided.
fn count_pending(failures: &mut mpsc::Receiver<Error>, signals: &mut mpsc::Receiver<Signal>) -> usize {
    let mut pending = 0;
    while let Ok(sig) = signals.try_recv() {
        info!(signal = %sig, "shutdown already in progress, ignoring signal");
        pending += 1;
    }
    while let Ok(e) = failures.try_recv() {
        warn!(error = %e, "listener error during shutdown, ignoring");
        pending += 1;
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stands in for a server; counts drains and replays a fixed result.
    struct FakeServer {
        drains: Arc<AtomicUsize>,
        delay: Duration,
        result: fn() -> Result<DrainOutcome, Error>,
    }

    impl FakeServer {
        fn new(result: fn() -> Result<DrainOutcome, Error>) -> (Self, Arc<AtomicUsize>) {
            let drains = Arc::new(AtomicUsize::new(0));
            let server = Self { drains: Arc::clone(&drains), delay: Duration::ZERO, result };
            (server, drains)
        }
    }

    impl Drain for FakeServer {
        async fn drain(self, _deadline: Duration) -> Result<DrainOutcome, Error> {
            self.drains.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            (self.result)()
        }
    }

    fn channels() -> (
        mpsc::Sender<Error>,
        mpsc::Receiver<Error>,
        mpsc::Sender<Signal>,
        mpsc::Receiver<Signal>,
    ) {
        let (ftx, frx) = mpsc::channel(4);
        let (stx, srx) = mpsc::channel(4);
        (ftx, frx, stx, srx)
    }

    #[tokio::test]
    async fn signal_with_clean_drain_exits_successfully() {
        let (server, drains) = FakeServer::new(|| Ok(DrainOutcome::Clean));
        let (_ftx, frx, stx, srx) = channels();
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        let state = coordinator.subscribe();

        stx.send(Signal::Terminate).await.unwrap();
        let report = coordinator.run_with(server, frx, srx).await;

        assert_eq!(report.trigger, Trigger::Signal(Signal::Terminate));
        assert!(matches!(report.outcome, ShutdownOutcome::Clean));
        assert!(report.is_success());
        assert_eq!(drains.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn forced_drain_is_degraded_but_successful() {
        let (server, _) = FakeServer::new(|| Ok(DrainOutcome::Forced { aborted: 3 }));
        let (_ftx, frx, stx, srx) = channels();
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        let state = coordinator.subscribe();

        stx.send(Signal::Interrupt).await.unwrap();
        let report = coordinator.run_with(server, frx, srx).await;

        assert!(matches!(report.outcome, ShutdownOutcome::Degraded { aborted: 3 }));
        assert!(report.is_success());
        assert_eq!(*state.borrow(), ShutdownState::ForcedClosed);
    }

    #[tokio::test]
    async fn failed_forced_close_is_fatal() {
        let (server, _) = FakeServer::new(|| Err(Error::ForcedClose { remaining: 1 }));
        let (_ftx, frx, stx, srx) = channels();
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        let state = coordinator.subscribe();

        stx.send(Signal::Terminate).await.unwrap();
        let report = coordinator.run_with(server, frx, srx).await;

        assert!(matches!(
            report.outcome,
            ShutdownOutcome::ForcedCloseFailed(Error::ForcedClose { remaining: 1 })
        ));
        assert!(!report.is_success());
        assert_eq!(*state.borrow(), ShutdownState::Failed);
    }

    #[tokio::test]
    async fn listener_failure_skips_the_drain() {
        let (server, drains) = FakeServer::new(|| Ok(DrainOutcome::Clean));
        let (ftx, frx, _stx, srx) = channels();
        let coordinator = ShutdownCoordinator::default();
        let state = coordinator.subscribe();

        ftx.send(Error::Accept(io::Error::other("socket closed"))).await.unwrap();
        let report = coordinator.run_with(server, frx, srx).await;

        assert_eq!(report.trigger, Trigger::ListenerFailure);
        assert!(matches!(report.outcome, ShutdownOutcome::ListenerFailed(Error::Accept(_))));
        assert!(!report.is_success());
        assert_eq!(drains.load(Ordering::SeqCst), 0);
        assert_eq!(*state.borrow(), ShutdownState::Failed);
    }

    #[tokio::test]
    async fn concurrent_signals_drain_once() {
        let (mut server, drains) = FakeServer::new(|| Ok(DrainOutcome::Clean));
        server.delay = Duration::from_millis(20);
        let (_ftx, frx, stx, srx) = channels();

        let a = tokio::spawn({
            let stx = stx.clone();
            async move { stx.send(Signal::Interrupt).await.unwrap() }
        });
        let b = tokio::spawn({
            let stx = stx.clone();
            async move { stx.send(Signal::Terminate).await.unwrap() }
        });
        a.await.unwrap();
        b.await.unwrap();

        let report = ShutdownCoordinator::new(Duration::from_millis(100))
            .run_with(server, frx, srx)
            .await;

        assert_eq!(drains.load(Ordering::SeqCst), 1);
        assert_eq!(report.ignored_events, 1);
        assert!(matches!(report.trigger, Trigger::Signal(_)));
    }

    #[tokio::test]
    async fn signal_during_drain_is_ignored() {
        let (mut server, drains) = FakeServer::new(|| Ok(DrainOutcome::Clean));
        server.delay = Duration::from_millis(50);
        let (_ftx, frx, stx, srx) = channels();

        stx.send(Signal::Interrupt).await.unwrap();
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stx.send(Signal::Interrupt).await.unwrap();
        });

        let report = ShutdownCoordinator::new(Duration::from_millis(100))
            .run_with(server, frx, srx)
            .await;
        late.await.unwrap();

        assert_eq!(drains.load(Ordering::SeqCst), 1);
        assert_eq!(report.ignored_events, 1);
    }

    #[tokio::test]
    async fn closed_sources_still_drain() {
        let (server, drains) = FakeServer::new(|| Ok(DrainOutcome::Clean));
        let (ftx, frx, stx, srx) = channels();
        drop(ftx);
        drop(stx);

        let report = ShutdownCoordinator::default().run_with(server, frx, srx).await;

        assert_eq!(report.trigger, Trigger::SourcesClosed);
        assert_eq!(drains.load(Ordering::SeqCst), 1);
        assert!(report.is_success());
    }
}
