//! Upstream server configuration
//!
//! Servers come from `[[servers]]` entries, from the `[server_group]`
//! shorthand (one password and method for many hosts), or both. Entries
//! keep their order: `[[servers]]` first, then group hosts.

use crate::transport::CipherKind;
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_method() -> String {
    "aes-256-gcm".to_string()
}

/// One upstream server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `host:port` of the server
    pub address: String,

    /// Shared secret
    #[serde(default)]
    pub password: String,

    /// Cipher method name
    #[serde(default = "default_method")]
    pub method: String,
}

/// Many servers sharing one port, password and method
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerGroupConfig {
    /// Host names or `host:port` strings
    pub hosts: Vec<String>,

    /// Port for hosts that do not carry one
    #[serde(default)]
    pub port: Option<u16>,

    /// Shared secret
    #[serde(default)]
    pub password: String,

    /// Cipher method name
    #[serde(default = "default_method")]
    pub method: String,
}

impl ServerConfig {
    /// Validate the entry
    pub fn validate(&self) -> Result<(), String> {
        if !has_port(&self.address) {
            return Err(format!("server address {} has no port", self.address));
        }
        validate_method(&self.method, &self.password)
    }
}

impl ServerGroupConfig {
    /// Expand into one `ServerConfig` per host
    pub fn expand(&self) -> Result<Vec<ServerConfig>, String> {
        self.hosts
            .iter()
            .map(|host| {
                let address = if has_port(host) {
                    info!("Server {} carries its own port", host);
                    host.clone()
                } else {
                    let port = self
                        .port
                        .ok_or_else(|| format!("server {} has no port and no group port", host))?;
                    join_host_port(host, port)
                };
                Ok(ServerConfig {
                    address,
                    password: self.password.clone(),
                    method: self.method.clone(),
                })
            })
            .collect()
    }
}

fn validate_method(method: &str, password: &str) -> Result<(), String> {
    let kind: CipherKind = method.parse().map_err(|e| format!("{}", e))?;
    if !kind.is_available() {
        return Err(format!("cipher method {} is not compiled in", kind));
    }
    if kind != CipherKind::Plain && password.is_empty() {
        return Err(format!("cipher method {} needs a password", kind));
    }
    Ok(())
}

/// Whether `addr` ends in a numeric port
fn has_port(addr: &str) -> bool {
    if addr.parse::<std::net::SocketAddr>().is_ok() {
        return true;
    }
    if addr.starts_with('[') {
        // Bracketed IPv6 without port: "[::1]"
        return false;
    }
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_port() {
        assert!(has_port("example.com:8388"));
        assert!(has_port("10.0.0.1:443"));
        assert!(has_port("[::1]:8388"));
        assert!(!has_port("example.com"));
        assert!(!has_port("::1"));
        assert!(!has_port("[::1]"));
        assert!(!has_port("example.com:port"));
    }

    #[test]
    fn test_server_validate() {
        let server = ServerConfig {
            address: "example.com:8388".to_string(),
            password: "secret".to_string(),
            method: "aes-256-gcm".to_string(),
        };
        assert!(server.validate().is_ok());

        let no_port = ServerConfig {
            address: "example.com".to_string(),
            ..server.clone()
        };
        assert!(no_port.validate().is_err());

        let bad_method = ServerConfig {
            method: "rc4-md5".to_string(),
            ..server.clone()
        };
        assert!(bad_method.validate().is_err());

        let plain = ServerConfig {
            password: String::new(),
            method: "plain".to_string(),
            ..server
        };
        assert!(plain.validate().is_ok());
    }

    #[test]
    fn test_group_expand() {
        let group = ServerGroupConfig {
            hosts: vec![
                "a.example.com".to_string(),
                "b.example.com:9000".to_string(),
                "2001:db8::1".to_string(),
            ],
            port: Some(8388),
            password: "secret".to_string(),
            method: "chacha20-ietf-poly1305".to_string(),
        };

        let servers = group.expand().unwrap();
        let addrs: Vec<_> = servers.iter().map(|s| s.address.as_str()).collect();
        assert_eq!(
            addrs,
            vec!["a.example.com:8388", "b.example.com:9000", "[2001:db8::1]:8388"]
        );
        assert!(servers.iter().all(|s| s.password == "secret"));
    }

    #[test]
    fn test_group_expand_without_port() {
        let group = ServerGroupConfig {
            hosts: vec!["a.example.com".to_string()],
            port: None,
            password: "secret".to_string(),
            method: default_method(),
        };
        assert!(group.expand().is_err());
    }
}
