//! HTTP server lifecycle: start, serve, drain.
//!
//! ```text
//! Starting ──start()──▶ Listening ──drain(deadline)──▶ Draining ──▶ Stopped
//!     │                                                    │
//!     └──bind failure──▶ Stopped            deadline elapsed: abort the rest
//! ```
//!
//! # Draining
//!
//! [`RunningServer::drain`] flips a single `watch` flag. The accept loop sees
//! it, drops the listener and hands back the set of connection tasks. Every
//! connection task sees the same flag and asks hyper to shut down gracefully:
//! the response currently being produced is finished and written, keep-alive
//! is refused, and the connection closes.
//!
//! A connection still in its TLS handshake is dropped on the spot.
//!
//! The drain then waits for those tasks, and for the HTTP/2 stream tasks
//! hyper spawned on their behalf, under a timer that starts when `drain` is
//! called. Whatever is still running when the deadline fires is aborted; its
//! client sees the connection close without a response.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::io::WriteTimeout;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::{signal, tls};

/// How long aborted connection tasks get to wind down before the forced
/// close is declared failed.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Pause after the process runs out of file descriptors, before the next
/// accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Where a server is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerState {
    /// Configured, not yet bound.
    Starting,
    /// Accepting connections.
    Listening,
    /// No longer accepting; waiting for in-flight connections.
    Draining,
    /// Listener closed and every connection gone.
    Stopped,
}

/// How a drain ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DrainOutcome {
    /// Every in-flight connection finished before the deadline.
    Clean,
    /// The deadline elapsed and `aborted` connections were closed abruptly.
    Forced { aborted: usize },
}

// ── Server ────────────────────────────────────────────────────────────────────

/// The HTTP server, before it binds.
pub struct Server {
    config: ServerConfig,
    state: watch::Sender<ServerState>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (state, _) = watch::channel(ServerState::Starting);
        Self { config, state }
    }

    /// Plain-HTTP server on `addr` with default timeouts.
    pub fn bind(addr: SocketAddr) -> Self {
        Self::new(ServerConfig::new(addr))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Observes every lifecycle transition from `Starting` onwards.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Binds the listener and starts accepting connections in the
    /// background.
    ///
    /// A bind failure (or unreadable TLS material) moves the server straight
    /// to `Stopped` and is returned as the error.
    pub async fn start(self, router: Router) -> Result<RunningServer, Error> {
        let Self { config, state } = self;

        let bound = bind(&config).await;
        let (listener, tls) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                state.send_replace(ServerState::Stopped);
                return Err(e);
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr: config.addr, source })?;

        let (drain_tx, drain_rx) = watch::channel(false);
        let (failure_tx, failure_rx) = mpsc::channel(1);
        let streams = StreamExecutor::default();

        let shared = Shared {
            router: Arc::new(router),
            timeouts: Timeouts::from(&config),
            streams: streams.clone(),
            drain: drain_rx,
        };
        let accept = tokio::spawn(accept_loop(listener, tls, shared, failure_tx));

        state.send_replace(ServerState::Listening);
        info!(addr = %local_addr, tls = config.tls.is_some(), "gatehouse listening");

        Ok(RunningServer {
            local_addr,
            drain_deadline: config.drain_deadline,
            state,
            drain: drain_tx,
            accept,
            streams,
            failures: Some(failure_rx),
        })
    }

    /// Starts the server and blocks until it has shut down.
    ///
    /// Installs the SIGINT/SIGTERM handlers, then hands the running server
    /// to a [`ShutdownCoordinator`] using the configured drain deadline. The
    /// returned report says how the shutdown went and which exit status the
    /// process should use.
    pub async fn serve(self, router: Router) -> Result<ShutdownReport, Error> {
        let deadline = self.config.drain_deadline;
        let signals = signal::listen()?;
        let running = self.start(router).await?;
        Ok(ShutdownCoordinator::new(deadline).run(running, signals).await)
    }
}

async fn bind(config: &ServerConfig) -> Result<(TcpListener, Option<TlsAcceptor>), Error> {
    let tls = config.tls.as_ref().map(tls::acceptor).transpose()?;
    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|source| Error::Bind { addr: config.addr, source })?;
    Ok((listener, tls))
}

// ── RunningServer ─────────────────────────────────────────────────────────────

/// A bound server accepting connections.
pub struct RunningServer {
    local_addr: SocketAddr,
    drain_deadline: Duration,
    state: watch::Sender<ServerState>,
    drain: watch::Sender<bool>,
    accept: JoinHandle<JoinSet<()>>,
    streams: StreamExecutor,
    failures: Option<mpsc::Receiver<Error>>,
}

impl RunningServer {
    /// The address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The drain deadline from the server's configuration.
    pub fn drain_deadline(&self) -> Duration {
        self.drain_deadline
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Takes the channel on which the accept loop reports a fatal listener
    /// error. Returns `None` after the first call.
    pub fn take_failures(&mut self) -> Option<mpsc::Receiver<Error>> {
        self.failures.take()
    }

    /// Stops accepting, lets in-flight requests finish, and closes whatever
    /// is left once `deadline` elapses.
    ///
    /// Consumes the server: a drain runs at most once and the listener is
    /// closed exactly once.
    ///
    /// # Errors
    ///
    /// [`Error::ForcedClose`] if aborted connections are still alive after a
    /// short grace period.
    pub async fn drain(self, deadline: Duration) -> Result<DrainOutcome, Error> {
        let expires = Instant::now() + deadline;
        self.state.send_replace(ServerState::Draining);
        self.drain.send_replace(true);

        let mut connections = match self.accept.await {
            Ok(connections) => connections,
            Err(e) => {
                // The JoinSet died with the task, aborting its connections.
                error!("accept loop panicked: {e}");
                JoinSet::new()
            }
        };

        let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        info!(
            in_flight = connections.len(),
            streams = self.streams.len(),
            deadline_ms,
            "draining connections"
        );

        let drained = tokio::time::timeout_at(expires, join_all(&mut connections, &self.streams)).await;
        let outcome = if drained.is_ok() {
            info!("all connections drained");
            Ok(DrainOutcome::Clean)
        } else {
            while let Some(res) = connections.try_join_next() {
                log_panic(res);
            }
            self.streams.reap();
            let aborted = connections.len() + self.streams.len();
            warn!(aborted, deadline_ms, "drain deadline elapsed, closing remaining connections");
            connections.abort_all();
            self.streams.abort_all();

            match tokio::time::timeout(FORCE_CLOSE_GRACE, join_all(&mut connections, &self.streams)).await {
                Ok(()) => Ok(DrainOutcome::Forced { aborted }),
                Err(_) => Err(Error::ForcedClose { remaining: connections.len() + self.streams.len() }),
            }
        };

        self.state.send_replace(ServerState::Stopped);
        info!("gatehouse stopped");
        outcome
    }
}

/// Waits for every connection task, then for the stream tasks they left
/// behind. No new streams start once the connections are gone.
async fn join_all(connections: &mut JoinSet<()>, streams: &StreamExecutor) {
    while let Some(res) = connections.join_next().await {
        log_panic(res);
    }
    streams.join_all().await;
}

fn log_panic(res: Result<(), JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!("connection task panicked: {e}");
        }
    }
}

// ── Stream executor ───────────────────────────────────────────────────────────

/// Executor handed to hyper. HTTP/2 runs every stream as its own task; they
/// land in one shared set so the drain can wait for them and abort them like
/// the connection tasks.
#[derive(Clone, Default)]
struct StreamExecutor {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl StreamExecutor {
    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drops finished tasks so the set only holds running ones.
    fn reap(&self) {
        let mut tasks = self.lock();
        while let Some(res) = tasks.try_join_next() {
            log_panic(res);
        }
    }

    fn abort_all(&self) {
        self.lock().abort_all();
    }

    async fn join_all(&self) {
        while let Some(res) = std::future::poll_fn(|cx| self.lock().poll_join_next(cx)).await {
            log_panic(res);
        }
    }
}

impl<F> hyper::rt::Executor<F> for StreamExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        let mut tasks = self.lock();
        while let Some(res) = tasks.try_join_next() {
            log_panic(res);
        }
        tasks.spawn(async move {
            fut.await;
        });
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Accepts until the drain flag flips or the listener fails, then returns
/// the still-running connection tasks. The listener is dropped on return.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    mut shared: Shared,
    failures: mpsc::Sender<Error>,
) -> JoinSet<()> {
    // JoinSet tracks every spawned connection task so the drain can wait
    // for them, or abort them.
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            // Check the drain flag first so a drain stops accepting
            // immediately, even with connections queued.
            biased;

            // Also resolves if the RunningServer was dropped.
            _ = shared.drain.changed() => {
                info!(in_flight = connections.len(), "no longer accepting connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) if is_connection_error(&e) => {
                        debug!("accept error: {e}");
                        continue;
                    }
                    Err(e) if is_descriptor_exhaustion(&e) => {
                        warn!("accept error: {e}, backing off");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                    Err(e) => {
                        error!("listener failed: {e}");
                        // Nobody may be listening any more; the error is
                        // already logged.
                        let _ = failures.send(Error::Accept(e)).await;
                        break;
                    }
                };

                let conn = Connection { shared: shared.clone(), remote_addr };
                match &tls {
                    Some(acceptor) => {
                        connections.spawn(conn.serve_tls(acceptor.clone(), stream));
                    }
                    None => {
                        connections.spawn(conn.serve(stream));
                    }
                }
            }

            // Reap finished connection tasks so the JoinSet does not grow
            // without bound on long-running servers.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections
}

/// Errors that concern one connection and leave the listener usable.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// EMFILE / ENFILE: the listener is fine, the process is out of descriptors.
fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    cfg!(unix) && matches!(e.raw_os_error(), Some(23 | 24))
}

// ── Connection ────────────────────────────────────────────────────────────────

/// Per-connection time limits, taken from [`ServerConfig`].
#[derive(Clone, Copy, Debug)]
struct Timeouts {
    header_read: Duration,
    read: Duration,
    write: Duration,
}

impl From<&ServerConfig> for Timeouts {
    fn from(config: &ServerConfig) -> Self {
        Self {
            header_read: config.header_read_timeout,
            read: config.read_timeout,
            write: config.write_timeout,
        }
    }
}

/// What every connection task gets a handle to.
#[derive(Clone)]
struct Shared {
    router: Arc<Router>,
    timeouts: Timeouts,
    streams: StreamExecutor,
    drain: watch::Receiver<bool>,
}

struct Connection {
    shared: Shared,
    remote_addr: SocketAddr,
}

impl Connection {
    /// Runs the TLS handshake, then serves the connection.
    ///
    /// The handshake shares the header read timeout, and a drain that starts
    /// mid-handshake drops the connection: there is no request to finish.
    async fn serve_tls(mut self, acceptor: TlsAcceptor, stream: TcpStream) {
        let remote_addr = self.remote_addr;
        let handshake = tokio::time::timeout(self.shared.timeouts.header_read, acceptor.accept(stream));

        let stream = tokio::select! {
            res = handshake => match res {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!(peer = %remote_addr, "tls handshake failed: {e}");
                    return;
                }
                Err(_) => {
                    debug!(peer = %remote_addr, "tls handshake timed out");
                    return;
                }
            },
            _ = self.shared.drain.changed() => {
                debug!(peer = %remote_addr, "draining, dropping connection mid-handshake");
                return;
            }
        };

        self.serve(stream).await;
    }

    async fn serve<I>(self, io: I)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Shared { router, timeouts, streams, mut drain } = self.shared;
        let remote_addr = self.remote_addr;

        // `service_fn` is called once per request on the connection, not
        // once per connection.
        let svc = service_fn(move |req| {
            let router = Arc::clone(&router);
            async move { dispatch(router, req, remote_addr, timeouts).await }
        });

        // `auto::Builder` serves HTTP/1.1 and HTTP/2, whichever the client
        // speaks.
        let mut builder = ConnBuilder::new(streams);
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(timeouts.header_read);

        let io = TokioIo::new(WriteTimeout::new(io, timeouts.write));
        let conn = builder.serve_connection(io, svc);
        tokio::pin!(conn);

        let mut draining = false;
        let result = loop {
            tokio::select! {
                res = conn.as_mut() => break res,
                _ = drain.changed(), if !draining => {
                    draining = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        };

        if let Err(e) = result {
            debug!(peer = %remote_addr, "connection error: {e}");
        }
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Routes one request and produces one response.
///
/// A body that cannot be read becomes a 400, one that does not arrive within
/// the read timeout a 408, and an unknown path a 404. A handler that outruns
/// the write timeout is the only error: hyper closes the connection without
/// a response.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    timeouts: Timeouts,
) -> Result<http::Response<Full<Bytes>>, Error> {
    let (parts, body) = req.into_parts();
    let body = match tokio::time::timeout(timeouts.read, body.collect()).await {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) => {
            debug!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_inner());
        }
        Err(_) => {
            debug!(peer = %remote_addr, "request body not received in time");
            return Ok(Response::status(StatusCode::REQUEST_TIMEOUT).into_inner());
        }
    };

    let req = Request::new(parts, body, remote_addr);
    let Some(handler) = router.lookup(req.path()) else {
        return Ok(Response::status(StatusCode::NOT_FOUND).into_inner());
    };

    let uri = req.uri().clone();
    match tokio::time::timeout(timeouts.write, handler.call(req)).await {
        Ok(response) => Ok(response.into_inner()),
        Err(_) => {
            warn!(peer = %remote_addr, %uri, "handler exceeded the write timeout, closing connection");
            Err(Error::WriteTimeout(timeouts.write))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_level_accept_errors_are_not_fatal() {
        assert!(is_connection_error(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_connection_error(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_connection_error(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_is_recognised() {
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(24)));
        assert!(!is_descriptor_exhaustion(&io::Error::from_raw_os_error(22)));
    }

    #[tokio::test]
    async fn stream_executor_tracks_and_aborts_spawned_streams() {
        use hyper::rt::Executor;

        let streams = StreamExecutor::default();
        streams.execute(tokio::time::sleep(Duration::from_secs(30)));
        streams.execute(async {});
        tokio::task::yield_now().await;
        streams.reap();
        assert_eq!(streams.len(), 1);

        streams.abort_all();
        tokio::time::timeout(Duration::from_secs(1), streams.join_all())
            .await
            .expect("aborted streams finish");
        assert_eq!(streams.len(), 0);
    }

    #[tokio::test]
    async fn bind_failure_stops_the_server() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let server = Server::bind(addr);
        let state = server.subscribe_state();
        assert_eq!(*state.borrow(), ServerState::Starting);

        match server.start(Router::new()).await {
            Err(Error::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bound an address that is in use"),
        }
        assert_eq!(*state.borrow(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn idle_server_drains_cleanly_through_every_state() {
        let server = Server::bind("127.0.0.1:0".parse().unwrap());
        let running = server.start(Router::new()).await.unwrap();
        let mut state = running.subscribe_state();
        assert_eq!(running.state(), ServerState::Listening);

        let outcome = running.drain(Duration::from_millis(100)).await.unwrap();

        assert_eq!(outcome, DrainOutcome::Clean);
        assert_eq!(*state.borrow_and_update(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn listener_is_closed_after_drain() {
        let running = Server::bind("127.0.0.1:0".parse().unwrap())
            .start(Router::new())
            .await
            .unwrap();
        let addr = running.local_addr();

        running.drain(Duration::from_millis(100)).await.unwrap();

        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
