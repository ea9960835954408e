//! Test utilities and fake tunnel servers for Sockscone
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use sockscone::config::{parse_config, Config};
use sockscone::local::LocalServer;
use sockscone::socks::codec::{address_len, decode_socks_address};
use sockscone::socks::TargetAddr;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// An address nothing listens on
pub async fn dead_addr() -> SocketAddr {
    let (_listener, addr) = create_test_listener().await;
    addr
}

/// Read the tunnel address header from the start of a stream
pub async fn read_tunnel_header<S>(stream: &mut S) -> TargetAddr
where
    S: AsyncRead + Unpin,
{
    let mut header = vec![0u8; 2];
    stream.read_exact(&mut header).await.unwrap();
    let total = address_len(&header).unwrap();
    header.resize(total, 0);
    stream.read_exact(&mut header[2..]).await.unwrap();
    decode_socks_address(&header).unwrap().target
}

/// Echo everything after the header back to the peer
pub async fn echo<S>(stream: &mut S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() || stream.flush().await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Plain tunnel server that reports each requested target and echoes data
pub async fn spawn_plain_echo_server() -> (SocketAddr, mpsc::UnboundedReceiver<TargetAddr>) {
    let (listener, addr) = create_test_listener().await;
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let target = read_tunnel_header(&mut conn).await;
                let _ = tx.send(target);
                echo(&mut conn).await;
            });
        }
    });
    (addr, rx)
}

/// Plain tunnel UDP server that bounces every frame back unchanged
pub async fn spawn_plain_udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}

/// Test configuration builder
pub struct TestConfigBuilder {
    servers: Vec<(String, String, String)>,
    http: bool,
    udp: bool,
    allow_non_global: bool,
    block_domains: Vec<String>,
    handshake_timeout: u64,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            servers: Vec::new(),
            http: false,
            udp: true,
            allow_non_global: true,
            block_domains: Vec::new(),
            handshake_timeout: 5,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain-text upstream server
    pub fn plain_server(mut self, addr: SocketAddr) -> Self {
        self.servers
            .push((addr.to_string(), String::new(), "plain".to_string()));
        self
    }

    /// Add an AEAD upstream server
    pub fn aead_server(mut self, addr: SocketAddr, method: &str, password: &str) -> Self {
        self.servers
            .push((addr.to_string(), password.to_string(), method.to_string()));
        self
    }

    /// Also listen for HTTP proxy clients
    pub fn http(mut self, enabled: bool) -> Self {
        self.http = enabled;
        self
    }

    /// Accept UDP ASSOCIATE
    pub fn udp(mut self, enabled: bool) -> Self {
        self.udp = enabled;
        self
    }

    /// Relay UDP to loopback and other non-global targets
    pub fn allow_non_global(mut self, allow: bool) -> Self {
        self.allow_non_global = allow;
        self
    }

    /// Block UDP to a domain suffix
    pub fn block_domain(mut self, domain: &str) -> Self {
        self.block_domains.push(domain.to_string());
        self
    }

    /// Set the handshake timeout in seconds
    pub fn handshake_timeout(mut self, secs: u64) -> Self {
        self.handshake_timeout = secs;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let mut toml = String::from("[local]\nlisten = \"127.0.0.1:0\"\n");
        if self.http {
            toml.push_str("http_listen = \"127.0.0.1:0\"\n");
        }
        toml.push_str(&format!(
            "udp = {}\nallow_non_global_udp_targets = {}\nhandshake_timeout = {}\nconnect_timeout = 2\nudp_bind_ip = \"127.0.0.1\"\n",
            self.udp, self.allow_non_global, self.handshake_timeout
        ));
        let domains: Vec<String> = self
            .block_domains
            .iter()
            .map(|d| format!("\"{}\"", d))
            .collect();
        toml.push_str(&format!("block_domains = [{}]\n", domains.join(", ")));

        for (address, password, method) in &self.servers {
            toml.push_str(&format!(
                "\n[[servers]]\naddress = \"{}\"\npassword = \"{}\"\nmethod = \"{}\"\n",
                address, password, method
            ));
        }

        parse_config(&toml).unwrap()
    }
}

/// A running local proxy
pub struct RunningProxy {
    /// SOCKS5 listener address
    pub socks: SocketAddr,
    /// HTTP listener address, if configured
    pub http: Option<SocketAddr>,
    shutdown_tx: broadcast::Sender<bool>,
}

impl RunningProxy {
    /// Stop accepting connections
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Bind and run a local proxy in the background
pub async fn start_proxy(config: Config) -> RunningProxy {
    let server = LocalServer::bind(&config).await.unwrap();
    let socks = server.socks_addr().unwrap();
    let http = server.http_addr();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(server.run(shutdown_rx));
    RunningProxy {
        socks,
        http,
        shutdown_tx,
    }
}

/// Connect to the proxy and complete the SOCKS5 greeting
pub async fn socks5_greet(proxy: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);
    stream
}

/// Send a SOCKS5 request and read the 10-byte reply
pub async fn socks5_request(stream: &mut TcpStream, command: u8, target: &TargetAddr) -> [u8; 10] {
    let mut request = vec![0x05, command, 0x00];
    target.write_to(&mut request);
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}
