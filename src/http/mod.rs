//! HTTP proxy front-end
//!
//! Accepts `CONNECT host:port` tunnels and absolute-form requests
//! (`GET http://host/path`) and feeds both into the shared TCP relay.
//! Absolute-form requests are rewritten to origin form, stripped of
//! proxy-only headers and sent upstream as the first bytes of the tunnel.

use crate::error::RelayError;
use crate::relay::{relay_tcp, Acknowledge, Relay};
use crate::socks::{TargetAddr, MAX_DOMAIN_LEN};
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, info};
use url::{Host, Position, Url};

/// Largest request head accepted, request line included
pub const MAX_HEAD_LEN: usize = 8 * 1024;

/// Reply to a CONNECT once the upstream tunnel is open
pub const HTTP_CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Reply when every upstream server failed
pub const HTTP_BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Reply to a request this proxy cannot serve
pub const HTTP_BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Headers that only concern this hop
const HOP_HEADERS: &[&str] = &[
    "proxy-connection",
    "proxy-authorization",
    "connection",
    "keep-alive",
];

/// A parsed request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method
    pub method: String,
    /// Request target as written
    pub target: String,
    /// Protocol version
    pub version: String,
    /// Header lines without line endings
    pub headers: Vec<String>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

/// What the client asked the proxy to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRequest {
    /// Open a raw tunnel
    Connect(TargetAddr),
    /// Send `head` to `target`, then relay
    Forward {
        /// Origin server
        target: TargetAddr,
        /// Rewritten request head
        head: Bytes,
    },
}

/// Handle one HTTP proxy client connection
pub async fn handle_http<S>(stream: S, peer: SocketAddr, relay: &Relay) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // The buffered reader keeps any bytes read past the head
    let mut reader = BufReader::new(stream);

    let head = match tokio::time::timeout(relay.handshake_timeout(), read_head(&mut reader)).await {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            if matches!(e, RelayError::Http(_)) {
                let _ = reader.write_all(HTTP_BAD_REQUEST).await;
            }
            return Err(e);
        }
        Err(_) => {
            debug!("HTTP request head from {} timed out", peer);
            return Err(RelayError::Timeout("HTTP request head".to_string()));
        }
    };

    let request = match parse_request(&head) {
        Ok(request) => request,
        Err(e) => {
            let _ = reader.write_all(HTTP_BAD_REQUEST).await;
            return Err(e);
        }
    };

    match request {
        ProxyRequest::Connect(target) => {
            info!("HTTP CONNECT from {} to {}", peer, target);
            relay_tcp(
                relay.pool(),
                reader,
                &target,
                &target.to_bytes(),
                Acknowledge::HttpTunnel,
            )
            .await
        }
        ProxyRequest::Forward { target, head } => {
            info!("HTTP {} from {} to {}", head_method(&head), peer, target);
            relay_tcp(
                relay.pool(),
                reader,
                &target,
                &target.to_bytes(),
                Acknowledge::HttpForward(head),
            )
            .await
        }
    }
}

fn head_method(head: &[u8]) -> &str {
    head.split(|b| *b == b' ')
        .next()
        .and_then(|m| std::str::from_utf8(m).ok())
        .unwrap_or("?")
}

/// Read the request line and headers, up to the blank line
pub async fn read_head<R>(reader: &mut R) -> Result<RequestHead, RelayError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEAD_LEN;

    let request_line = read_line(reader, &mut budget).await?;
    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) => (method, target, version),
        _ => {
            return Err(RelayError::Http(format!(
                "malformed request line: {:?}",
                request_line
            )))
        }
    };

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader, &mut budget).await?;
        if line.is_empty() {
            break;
        }
        headers.push(line);
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
    })
}

async fn read_line<R>(reader: &mut R, budget: &mut usize) -> Result<String, RelayError>
where
    R: AsyncBufRead + Unpin,
{
    if *budget == 0 {
        return Err(RelayError::Http(format!(
            "request head exceeds {} bytes",
            MAX_HEAD_LEN
        )));
    }

    let mut line = String::new();
    let n = (&mut *reader)
        .take(*budget as u64)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Err(RelayError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    *budget -= n;

    if !line.ends_with('\n') {
        if *budget == 0 {
            return Err(RelayError::Http(format!(
                "request head exceeds {} bytes",
                MAX_HEAD_LEN
            )));
        }
        return Err(RelayError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }

    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

/// Turn a request head into a tunnel or a forward
pub fn parse_request(head: &RequestHead) -> Result<ProxyRequest, RelayError> {
    if head.method.eq_ignore_ascii_case("CONNECT") {
        let target = TargetAddr::parse_host_port(&head.target)
            .map_err(|e| RelayError::Http(format!("bad CONNECT target {}: {}", head.target, e)))?;
        return Ok(ProxyRequest::Connect(target));
    }

    let url = Url::parse(&head.target)
        .map_err(|e| RelayError::Http(format!("not an absolute URL {}: {}", head.target, e)))?;
    if url.scheme() != "http" {
        return Err(RelayError::Http(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let target = match url.host() {
        Some(Host::Domain(domain)) if domain.len() <= MAX_DOMAIN_LEN => {
            TargetAddr::domain(domain, port)
        }
        Some(Host::Ipv4(ip)) => TargetAddr::ipv4(ip, port),
        Some(Host::Ipv6(ip)) => TargetAddr::ipv6(ip, port),
        _ => return Err(RelayError::Http(format!("bad host in {}", head.target))),
    };

    let path = &url[Position::BeforePath..Position::AfterQuery];
    let mut rewritten = format!("{} {} {}\r\n", head.method, path, head.version);
    if head.header("host").is_none() {
        rewritten.push_str(&format!("Host: {}\r\n", &url[Position::BeforeHost..Position::AfterPort]));
    }
    for line in &head.headers {
        let name = line.split(':').next().unwrap_or("").trim();
        if HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        rewritten.push_str(line);
        rewritten.push_str("\r\n");
    }
    // One request per tunnel: the next one may name another host
    rewritten.push_str("Connection: close\r\n\r\n");

    Ok(ProxyRequest::Forward {
        target,
        head: Bytes::from(rewritten),
    })
}
