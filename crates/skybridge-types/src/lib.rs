//! # Skybridge Types
//!
//! Shared models and error definitions for the Skybridge hybrid database manager.
//!
//! This crate provides the foundational type system for the Skybridge workspace:
//!
//! - **`error`** - Typed error hierarchy for dialect, tunnel, routing, storage,
//!   sync, replication, identity, and configuration failures
//! - **`models`** - Domain models (nodes, SQL values, config, sync runs,
//!   replication runs, identity accounts)
//!
//! ## Architecture Role
//!
//! `skybridge-types` sits at the bottom of the dependency graph:
//!
//! ```text
//!         skybridge-types (this crate)
//!                 │
//!                 ▼
//!          skybridge-core
//!                 │
//!                 ▼
//!          skybridge-cli
//! ```
//!
//! All types are designed to be:
//! - **Serializable** via serde for operator-facing summaries
//! - **Clone** for cheap sharing across async boundaries
//! - **PartialEq** for testing and comparison

pub mod error;
pub mod models;

// Re-export error types for convenience
pub use error::{
    ConfigError, CoreError, DialectError, IdentityError, ReplicationError, Result, RouteError,
    StorageError, SyncError, TunnelError,
};

// Re-export core model types
pub use models::{
    AppConfig, ClusterConfig, ClusterStatus, CopyMode, Dialect, EndpointKey, LocalConfig,
    NodeConfig, NodeIdentity, NodeStatus, NodesConfig, OutcomeKind, PhysicalLabel, Reachability,
    ReplicationConfig, ReplicationRun, ReplicationState, ReplicationTableConfig, SqlRow, SqlValue,
    SshConfig, SyncConfig, SyncOutcome, SyncPhase, SyncRun, SyncState, TableCopy, UserAccount,
    UserRole,
};
