//! Invocation space configuration.

use crate::policy::Policy;
use serde::{Deserialize, Serialize};

/// Configuration of one invocation space.
///
/// Deserialized from the `[space]` table of `config.toml`; every field has a
/// default so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    /// Global default policy, the lowest layer of every method's policy.
    pub default_policy: Policy,
    /// First id handed out by `create_remote` without an explicit id.
    pub first_proxy_id: u32,
    /// First id handed out when hosting without an explicit id.
    pub first_object_id: u32,
    /// Capacity of a connection's outbound queue before unreliable
    /// messages start being dropped.
    pub outbound_queue: usize,
    /// Seconds a non-blocking call's result is kept before it is dropped
    /// uncollected.
    pub result_retention_secs: u64,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            default_policy: Policy::default(),
            first_proxy_id: 0,
            first_object_id: 0,
            outbound_queue: 1024,
            result_retention_secs: 300,
        }
    }
}

/// Settings for a TCP node hosting a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address `parley serve` listens on.
    pub listen_addr: String,
    /// Name announced in the handshake; generated when absent.
    pub node_name: Option<String>,
    /// Refuse peers whose registration fingerprint differs.
    pub check_fingerprint: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4600".to_string(),
            node_name: None,
            check_fingerprint: true,
        }
    }
}

/// Top-level `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub space: SpaceConfig,
    pub node: NodeConfig,
}
