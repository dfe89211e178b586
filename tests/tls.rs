//! TLS termination: a full request over TLS, and what a drain does with
//! clients that never finish their handshake.
//!
//! `tests/fixtures` holds a test CA and a `localhost` certificate it signed.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gatehouse::middleware::{Chain, RequestIdAssigner};
use gatehouse::{DrainOutcome, Request, RequestIdAllocator, Router, ServerConfig};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

mod common;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn tls_config() -> ServerConfig {
    common::local_config().with_tls(fixture("localhost.pem"), fixture("localhost.key"))
}

fn connector() -> TlsConnector {
    let pem = std::fs::read(fixture("ca.pem")).unwrap();
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots.add(cert.unwrap()).unwrap();
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    TlsConnector::from(Arc::new(config))
}

async fn connect_tls(addr: SocketAddr) -> TlsStream<TcpStream> {
    let tcp = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    connector().connect(name, tcp).await.unwrap()
}

fn app() -> Router {
    let traced = Chain::new().layer(RequestIdAssigner::new(Arc::new(RequestIdAllocator::new())));
    Router::new().route_layered("/whoami", &traced, |req: Request| async move {
        req.request_id().to_string()
    })
}

#[tokio::test]
async fn serves_over_tls_and_drains_cleanly() {
    let server = common::start_with(tls_config(), app()).await;

    let stream = connect_tls(server.local_addr()).await;
    let res = common::exchange(stream, "GET", "/whoami", "").await.unwrap();

    assert_eq!(res.status, 200);
    let id = res.header("x-request-id").expect("request id header");
    assert_eq!(res.body, id);

    let outcome = server.drain(Duration::from_millis(300)).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Clean);
}

#[tokio::test]
async fn client_silent_before_handshake_does_not_hold_the_drain() {
    let config = tls_config().with_header_read_timeout(Duration::from_secs(10));
    let server = common::start_with(config, app()).await;
    let _silent = TcpStream::connect(server.local_addr()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let deadline = Duration::from_millis(300);
    let began = Instant::now();
    let outcome = server.drain(deadline).await.unwrap();

    assert_eq!(outcome, DrainOutcome::Clean);
    assert!(began.elapsed() < deadline, "drain waited on the handshake");
}

#[tokio::test]
async fn stalled_handshake_is_closed_after_the_header_read_timeout() {
    let config = tls_config().with_header_read_timeout(Duration::from_millis(100));
    let server = common::start_with(config, app()).await;
    let mut silent = TcpStream::connect(server.local_addr()).await.unwrap();

    let mut buf = [0; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), silent.read(&mut buf))
        .await
        .expect("server should close the stalled connection");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected bytes: {read:?}");

    let outcome = server.drain(Duration::from_millis(300)).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Clean);
}
