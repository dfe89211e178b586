//! Shared helpers for the integration tests: start a server on an ephemeral
//! port and talk raw HTTP/1.1 to it.

#![allow(dead_code)]

use std::net::SocketAddr;

use gatehouse::{Router, RunningServer, Server, ServerConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// A config listening on `127.0.0.1:0`.
pub fn local_config() -> ServerConfig {
    ServerConfig::new("127.0.0.1:0".parse().unwrap())
}

/// Starts `router` on `127.0.0.1:0`.
pub async fn start(router: Router) -> RunningServer {
    start_with(local_config(), router).await
}

pub async fn start_with(config: ServerConfig, router: Router) -> RunningServer {
    Server::new(config)
        .start(router)
        .await
        .expect("server should bind an ephemeral port")
}

/// A parsed HTTP/1.1 response.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends one request with `Connection: close` and reads until the server
/// closes. Returns `None` if the connection closed without a response.
pub async fn send(addr: SocketAddr, method: &str, path: &str, body: &str) -> Option<RawResponse> {
    let stream = TcpStream::connect(addr).await.ok()?;
    exchange(stream, method, path, body).await
}

/// [`send`] over an already connected stream, plain or TLS.
pub async fn exchange<S>(mut stream: S, method: &str, path: &str, body: &str) -> Option<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(request.as_bytes()).await.ok()?;

    let mut raw = Vec::new();
    // A reset connection counts as "no response", same as a clean EOF.
    let _ = stream.read_to_end(&mut raw).await;
    parse(&String::from_utf8_lossy(&raw))
}

pub fn parse(raw: &str) -> Option<RawResponse> {
    let (head, body) = raw.split_once("\r\n\r\n")?;
    let mut lines = head.lines();
    let status = lines.next()?.split_whitespace().nth(1)?.parse().ok()?;
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect();
    Some(RawResponse { status, headers, body: body.to_owned() })
}
