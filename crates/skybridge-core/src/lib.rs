//! # Skybridge Core
//!
//! The hybrid data synchronization and secure tunnel engine.
//!
//! ```text
//! skybridge-core/src/
//! ├── dialect.rs      # Canonical SQL -> engine-specific rewriting
//! ├── schema.rs       # Table registry, provisioning, schema comparison
//! ├── config.rs       # TOML config: load / atomic save / explicit reload
//! ├── connection.rs   # LiveConnection over both engines
//! ├── cloud.rs        # Per-endpoint server pools
//! ├── local.rs        # Local cache store (pooled, phase-gated)
//! ├── tunnel/         # Bind policy, SSH forwarding, session registry
//! ├── topology.rs     # Role swap controller (Primary/Secondary mapping)
//! ├── router.rs       # Connection router + reachability cache
//! ├── exclusion.rs    # Cross-operation locks keyed by physical node
//! ├── sync/           # Push / Reconcile / Pull engine
//! ├── replication.rs  # Full-dataset copy between cloud nodes
//! ├── identity.rs     # Identity store adapter (accounts, hashing)
//! └── manager.rs      # Outward facade for collaborators
//! ```
//!
//! Collaborators (UI, CLI) talk to [`manager::HybridManager`]; everything else
//! is plumbing behind it.

#![allow(
    clippy::significant_drop_tightening,
    reason = "RwLock guards in async code require careful lifetime management"
)]

pub mod cloud;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod exclusion;
pub mod identity;
pub mod local;
pub mod manager;
pub mod replication;
pub mod router;
pub mod schema;
pub mod sync;
pub mod topology;
pub mod tunnel;

pub use connection::LiveConnection;
pub use identity::IdentityStore;
pub use manager::{HybridManager, IdentityHandle};
pub use replication::ReplicationEngine;
pub use router::ConnectionRouter;
pub use sync::SyncEngine;
pub use topology::RoleSwapController;
pub use tunnel::TunnelManager;

// Re-export the shared types crate so binaries depend on one name.
pub use skybridge_types as types;
