//! Node identity, role labels, dialect tags, and reachability state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable name of a physical cloud endpoint. Role labels (Primary/Secondary)
/// move between these two; the labels never gain or lose members.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PhysicalLabel {
    Hostek,
    Vps,
}

impl PhysicalLabel {
    /// The other cloud endpoint.
    pub fn other(self) -> Self {
        match self {
            Self::Hostek => Self::Vps,
            Self::Vps => Self::Hostek,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hostek => "Hostek",
            Self::Vps => "VPS",
        }
    }
}

impl fmt::Display for PhysicalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller asks the router for. Primary/Secondary resolve through the
/// current role assignment; Local and IdentityStore bypass it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeIdentity {
    Primary,
    Secondary,
    Local,
    IdentityStore,
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Local => "local",
            Self::IdentityStore => "identity",
        };
        f.write_str(name)
    }
}

/// Which SQL engine a node speaks. Statements are written once in canonical
/// form and rewritten for this tag before execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Remote relational server (MySQL wire conventions)
    MySql,
    /// Embedded file-based engine (SQLite conventions)
    Sqlite,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

/// Last observed reachability of a node, cached with a short TTL by the
/// router so a dead node is not re-dialed on every call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// Physical endpoint identity: the key for tunnel sessions, connection pools,
/// and cross-operation locks. Role labels deliberately do not appear here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub host: String,
    pub port: u16,
}

impl EndpointKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Point-in-time view of one node for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeStatus {
    pub label: PhysicalLabel,
    pub role: NodeIdentity,
    pub endpoint: EndpointKey,
    pub dialect: Dialect,
    pub reachability: Reachability,
    /// Bound local forwarding port, when a tunnel to this node is open
    pub tunnel_port: Option<u16>,
}

/// Point-in-time view of the whole cluster for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterStatus {
    pub primary: PhysicalLabel,
    pub identity: PhysicalLabel,
    pub nodes: Vec<NodeStatus>,
    /// Completion time of the last successful sync run, if any
    pub last_sync: Option<String>,
}
