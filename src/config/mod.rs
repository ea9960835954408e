//! Configuration module for Sockscone
//!
//! This module provides configuration types and TOML parsing.

mod local;
mod server;

pub use local::LocalConfig;
pub use server::{ServerConfig, ServerGroupConfig};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Local front-end settings
    #[serde(default)]
    pub local: LocalConfig,

    /// Individually configured upstream servers
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Group of upstream servers sharing credentials
    #[serde(default)]
    pub server_group: Option<ServerGroupConfig>,
}

impl Config {
    /// Every upstream server in order: `[[servers]]` first, then the group
    pub fn upstreams(&self) -> Result<Vec<ServerConfig>, String> {
        let mut all = self.servers.clone();
        if let Some(group) = &self.server_group {
            all.extend(group.expand()?);
        }
        Ok(all)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.local.validate()?;

        let upstreams = self.upstreams()?;
        if upstreams.is_empty() {
            return Err("no upstream servers configured".to_string());
        }
        for server in &upstreams {
            server.validate()?;
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}
