//! Core domain models for Skybridge.
//!
//! This module contains all shared data structures used across the Skybridge workspace.

mod config;
mod identity;
mod node;
mod replication;
mod sync;
mod value;

// Re-export all models
pub use config::{
    AppConfig, ClusterConfig, LocalConfig, NodeConfig, NodesConfig, ReplicationConfig,
    ReplicationTableConfig, SshConfig, SyncConfig,
};
pub use identity::{UserAccount, UserRole};
pub use node::{
    ClusterStatus, Dialect, EndpointKey, NodeIdentity, NodeStatus, PhysicalLabel, Reachability,
};
pub use replication::{CopyMode, ReplicationRun, ReplicationState, TableCopy};
pub use sync::{OutcomeKind, SyncOutcome, SyncPhase, SyncRun, SyncState};
pub use value::{SqlRow, SqlValue};
