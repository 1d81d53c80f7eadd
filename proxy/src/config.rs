//! Process configuration (spec.md §6's "Configuration surface").
//!
//! Loaded from JSON, not TOML: the upstream program this implementation
//! follows configures itself from a JSON file, and nothing in the spec
//! calls for switching that to a different format.

use std::path::Path;

use naive_protocol::ClientProtocol;
use serde::Deserialize;

use crate::error::ConfigError;

/// One `listen` entry: a bind address/port, which client protocol to speak
/// on it, and optional SOCKS5 RFC 1929 credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenEntry {
    pub protocol: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    pub addr: String,
    pub port: u16,
}

impl ListenEntry {
    pub fn client_protocol(&self) -> Result<ClientProtocol, ConfigError> {
        self.protocol
            .parse()
            .map_err(|_| ConfigError::UnknownProtocol(self.protocol.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen: Vec<ListenEntry>,
    pub proxy: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub extra_headers: String,
    #[serde(default)]
    pub host_resolver_rules: Option<String>,
    #[serde(default)]
    pub resolver_range: Option<String>,
}

fn default_concurrency() -> usize {
    1
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::NoListeners);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        for entry in &self.listen {
            let protocol = entry.client_protocol()?;
            if protocol == ClientProtocol::Redir && !cfg!(target_os = "linux") {
                return Err(ConfigError::UnsupportedPlatform);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_listen_list() {
        let config = Config {
            listen: vec![],
            proxy: "https://proxy.example".to_string(),
            concurrency: 1,
            extra_headers: String::new(),
            host_resolver_rules: None,
            resolver_range: None,
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoListeners)));
    }

    #[test]
    fn rejects_unknown_protocol() {
        let entry = ListenEntry {
            protocol: "quic".to_string(),
            user: None,
            pass: None,
            addr: "127.0.0.1".to_string(),
            port: 1080,
        };
        assert!(entry.client_protocol().is_err());
    }

    #[test]
    fn parses_socks5_listen_entry() {
        let entry = ListenEntry {
            protocol: "socks5".to_string(),
            user: Some("u".to_string()),
            pass: Some("p".to_string()),
            addr: "127.0.0.1".to_string(),
            port: 1080,
        };
        assert_eq!(entry.client_protocol().unwrap(), ClientProtocol::Socks5);
    }
}
