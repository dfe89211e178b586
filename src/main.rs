//! `gatehouse`: demo service on top of the gatehouse pipeline.
//!
//! Run with:
//!   RUST_LOG=info cargo run -- --addr 127.0.0.1:8000
//!
//! Try:
//!   curl -i -X POST http://localhost:8000/echo -d '{"ID":7,"Balance":12.5}'
//!   curl -i http://localhost:8000/echo          # 405
//!   curl -i http://localhost:8000/user
//!   curl -i http://localhost:8000/health
//!
//! Ctrl-C or SIGTERM drains in-flight requests for up to `--drain-timeout-ms`.

mod handlers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gatehouse::middleware::{Chain, MethodFilter, RequestIdAssigner, RequestLogger};
use gatehouse::{Method, RequestIdAllocator, Router, Server, ServerConfig, health};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "gatehouse", version, about = "HTTP request pipeline with graceful shutdown")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "GATEHOUSE_ADDR", default_value = "0.0.0.0:8000")]
    addr: SocketAddr,

    /// How long in-flight requests get to finish after SIGINT/SIGTERM.
    #[arg(long, env = "GATEHOUSE_DRAIN_TIMEOUT_MS", default_value_t = 5_000)]
    drain_timeout_ms: u64,

    /// How long a client may take to send its request headers.
    #[arg(long, env = "GATEHOUSE_HEADER_READ_TIMEOUT_MS", default_value_t = 5_000)]
    header_read_timeout_ms: u64,

    /// How long a client may take to send a request body.
    #[arg(long, env = "GATEHOUSE_READ_TIMEOUT_MS", default_value_t = 5_000)]
    read_timeout_ms: u64,

    /// How long a handler and the response write may take.
    #[arg(long, env = "GATEHOUSE_WRITE_TIMEOUT_MS", default_value_t = 5_000)]
    write_timeout_ms: u64,

    /// PEM certificate chain; enables TLS together with `--tls-key`.
    #[arg(long, env = "GATEHOUSE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, env = "GATEHOUSE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let config = ServerConfig::new(self.addr)
            .with_drain_deadline(Duration::from_millis(self.drain_timeout_ms))
            .with_header_read_timeout(Duration::from_millis(self.header_read_timeout_ms))
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_write_timeout(Duration::from_millis(self.write_timeout_ms));

        match (self.tls_cert, self.tls_key) {
            (Some(cert), Some(key)) => config.with_tls(cert, key),
            _ => config,
        }
    }
}

fn routes(ids: Arc<RequestIdAllocator>) -> Router {
    let traced = Chain::new()
        .layer(RequestIdAssigner::new(ids))
        .layer(RequestLogger);
    let post_only = Chain::new()
        .layer(MethodFilter::only(Method::POST))
        .append(traced.clone());

    Router::new()
        .route_layered("/echo", &post_only, handlers::echo_user)
        .route_layered("/user", &traced, handlers::fixed_user)
        .route("/health", health::check)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().into_config();
    tracing::info!(
        addr = %config.addr,
        drain_deadline_ms = u64::try_from(config.drain_deadline.as_millis()).unwrap_or(u64::MAX),
        tls = config.tls.is_some(),
        "configuration loaded"
    );

    let ids = Arc::new(RequestIdAllocator::new());

    match Server::new(config).serve(routes(ids)).await {
        Ok(report) => {
            tracing::info!(trigger = ?report.trigger, ignored_events = report.ignored_events, "exiting");
            report.exit_code()
        }
        Err(e) => {
            tracing::error!(error = %e, "server failed to start");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_map_onto_config() {
        let args = Args::parse_from([
            "gatehouse",
            "--addr",
            "127.0.0.1:9000",
            "--drain-timeout-ms",
            "250",
            "--write-timeout-ms",
            "750",
            "--tls-cert",
            "c.pem",
            "--tls-key",
            "k.pem",
        ]);
        let config = args.into_config();

        assert_eq!(config.addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.drain_deadline, Duration::from_millis(250));
        assert_eq!(config.header_read_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.write_timeout, Duration::from_millis(750));
        assert_eq!(config.tls.unwrap().key_path, PathBuf::from("k.pem"));
    }

    #[test]
    fn tls_flags_must_come_in_pairs() {
        assert!(Args::try_parse_from(["gatehouse", "--tls-cert", "c.pem"]).is_err());
    }
}
