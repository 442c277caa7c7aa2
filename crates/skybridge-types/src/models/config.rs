//! Configuration file models.
//!
//! The core consumes this configuration; it never invents it. The file also
//! persists the current Primary assignment so a role swap survives process
//! restart (see `[cluster]`).

use crate::models::node::{Dialect, EndpointKey, PhysicalLabel};
use crate::models::replication::CopyMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One database node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Database/schema name. For an embedded-dialect node this is the path of
    /// the on-disk file instead.
    pub database: String,
    #[serde(default = "default_dialect")]
    pub dialect: Dialect,
    /// When set, the node's database port is only reachable through a
    /// forwarding tunnel to its host.
    #[serde(default)]
    pub requires_tunnel: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl NodeConfig {
    /// Physical identity of this node, used to key tunnels, pools, and locks.
    pub fn endpoint(&self) -> EndpointKey {
        EndpointKey::new(self.host.clone(), self.port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_db_port(),
            user: String::new(),
            password: String::new(),
            database: String::new(),
            dialect: default_dialect(),
            requires_tunnel: false,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_db_port() -> u16 {
    3306
}

fn default_dialect() -> Dialect {
    Dialect::MySql
}

fn default_connect_timeout() -> u64 {
    10
}

/// The two fixed physical cloud endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodesConfig {
    pub hostek: NodeConfig,
    pub vps: NodeConfig,
}

impl NodesConfig {
    pub fn get(&self, label: PhysicalLabel) -> &NodeConfig {
        match label {
            PhysicalLabel::Hostek => &self.hostek,
            PhysicalLabel::Vps => &self.vps,
        }
    }
}

/// Secure-shell credentials for tunneled nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ssh_port(),
            user: String::new(),
            password: String::new(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

/// Role assignment and identity-node designation. `primary` is rewritten on
/// disk by every role swap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    #[serde(default = "default_primary")]
    pub primary: PhysicalLabel,
    /// User accounts always live here, regardless of role assignment.
    #[serde(default = "default_identity")]
    pub identity: PhysicalLabel,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            identity: default_identity(),
        }
    }
}

fn default_primary() -> PhysicalLabel {
    PhysicalLabel::Hostek
}

fn default_identity() -> PhysicalLabel {
    PhysicalLabel::Vps
}

/// The on-disk Local cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("local_cache.db")
}

/// Sync engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncConfig {
    /// Entities the Pull phase fetches, in order. Empty means every table the
    /// schema registry knows, in registry order.
    #[serde(default)]
    pub pull_entities: Vec<String>,
}

/// One replication manifest override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationTableConfig {
    pub table: String,
    #[serde(default)]
    pub mode: CopyMode,
}

/// Replication manifest. Empty means every registry table with the default
/// copy mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub tables: Vec<ReplicationTableConfig>,
}

/// Root of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub nodes: NodesConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl AppConfig {
    /// Physical label currently holding the given role.
    pub fn label_for_role(&self, primary: bool) -> PhysicalLabel {
        if primary {
            self.cluster.primary
        } else {
            self.cluster.primary.other()
        }
    }

    pub fn node(&self, label: PhysicalLabel) -> &NodeConfig {
        self.nodes.get(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.cluster.primary, PhysicalLabel::Hostek);
        assert_eq!(cfg.cluster.identity, PhysicalLabel::Vps);
        assert_eq!(cfg.local.path, PathBuf::from("local_cache.db"));
        assert!(cfg.sync.pull_entities.is_empty());
    }

    #[test]
    fn test_node_section_parses() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [nodes.hostek]
            host = "213.109.159.7"
            user = "app"
            password = "secret"
            database = "helpdesk"

            [nodes.vps]
            host = "74.208.225.182"
            user = "app"
            password = "secret"
            database = "helpdesk"
            requires_tunnel = true
            "#,
        )
        .unwrap();

        assert_eq!(cfg.nodes.hostek.port, 3306);
        assert!(!cfg.nodes.hostek.requires_tunnel);
        assert!(cfg.nodes.vps.requires_tunnel);
        assert_eq!(
            cfg.node(PhysicalLabel::Vps).endpoint().to_string(),
            "74.208.225.182:3306"
        );
    }
}
