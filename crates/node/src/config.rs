//! Node configuration.

use crate::error::NodeError;
use serde::{Deserialize, Serialize};
use ssv_registry::DEFAULT_SYNC_OFFSET;
use ssv_types::ShareOptions;
use std::path::PathBuf;
use std::time::Duration;

/// Peer discovery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryType {
    Mdns,
    Discv5,
}

fn default_discovery() -> DiscoveryType {
    DiscoveryType::Discv5
}

fn default_tcp_port() -> u16 {
    13000
}

fn default_udp_port() -> u16 {
    12000
}

fn default_metadata_update_interval() -> Duration {
    Duration::from_secs(12 * 60)
}

fn default_ibft_sync_enabled() -> bool {
    true
}

fn default_max_batch_response() -> usize {
    25
}

fn default_min_peers() -> usize {
    2
}

/// Top-level node configuration, deserialized from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_discovery")]
    pub discovery: DiscoveryType,
    /// Bootstrap ENRs for discv5.
    #[serde(default)]
    pub bootstrap_enrs: Vec<String>,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default)]
    pub host_address: Option<String>,
    /// Path to this operator's private key.
    #[serde(default)]
    pub operator_key_path: Option<PathBuf>,
    /// Validator shares loaded directly from config.
    #[serde(default)]
    pub shares: Vec<ShareOptions>,
    /// Registry replay start as a hex block number (e.g. "0x4e706f").
    #[serde(default)]
    pub registry_sync_offset: Option<String>,
    #[serde(default = "default_metadata_update_interval")]
    pub metadata_update_interval: Duration,
    #[serde(default = "default_ibft_sync_enabled")]
    pub ibft_sync_enabled: bool,
    #[serde(default)]
    pub clean_registry_data: bool,
    #[serde(default = "default_max_batch_response")]
    pub max_batch_response: usize,
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            discovery: default_discovery(),
            bootstrap_enrs: Vec::new(),
            tcp_port: default_tcp_port(),
            udp_port: default_udp_port(),
            host_address: None,
            operator_key_path: None,
            shares: Vec::new(),
            registry_sync_offset: None,
            metadata_update_interval: default_metadata_update_interval(),
            ibft_sync_enabled: default_ibft_sync_enabled(),
            clean_registry_data: false,
            max_batch_response: default_max_batch_response(),
            min_peers: default_min_peers(),
        }
    }
}

impl NodeConfig {
    /// The configured registry replay offset, falling back to the
    /// contract genesis block.
    pub fn registry_offset(&self) -> Result<u64, NodeError> {
        let Some(raw) = &self.registry_sync_offset else {
            return Ok(DEFAULT_SYNC_OFFSET);
        };
        let trimmed = raw.trim_start_matches("0x");
        u64::from_str_radix(trimmed, 16)
            .map_err(|e| NodeError::Config(format!("bad registry sync offset {raw:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_offset_is_contract_genesis() {
        let config = NodeConfig::default();
        assert_eq!(config.registry_offset().unwrap(), 0x4e706f);
    }

    #[test]
    fn offset_parses_hex_with_and_without_prefix() {
        let mut config = NodeConfig::default();
        config.registry_sync_offset = Some("0x4e706f".into());
        assert_eq!(config.registry_offset().unwrap(), 0x4e706f);

        config.registry_sync_offset = Some("49e08f".into());
        assert_eq!(config.registry_offset().unwrap(), 0x49e08f);

        config.registry_sync_offset = Some("not-hex".into());
        assert!(matches!(
            config.registry_offset(),
            Err(NodeError::Config(_))
        ));
    }
}
