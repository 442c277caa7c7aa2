//! Connection routing: node identity in, live connection out.
//!
//! The router resolves a requested identity against the current role
//! assignment (identity-store requests bypass it), opens or reuses a tunnel
//! when the node requires one, and hands back a dialect-tagged connection.
//! It never falls back on the caller's behalf: a dead cloud node comes back
//! as `Unreachable` and the layer above decides whether Local will do.
//!
//! Verdicts are cached per label with short TTLs so a tight loop against a
//! dead node does not pay the connect timeout on every call.

use crate::cloud::CloudPools;
use crate::connection::LiveConnection;
use crate::local::LocalStore;
use crate::topology::RoleSwapController;
use crate::tunnel::TunnelManager;
use dashmap::DashMap;
use skybridge_types::{
    EndpointKey, NodeConfig, NodeIdentity, PhysicalLabel, Reachability, Result, RouteError,
    TunnelError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

const REACHABLE_TTL: Duration = Duration::from_secs(30);
const UNREACHABLE_TTL: Duration = Duration::from_secs(15);

pub struct ConnectionRouter {
    topology: RoleSwapController,
    tunnels: Arc<TunnelManager>,
    pools: CloudPools,
    local: Arc<LocalStore>,
    reachability: DashMap<PhysicalLabel, (Reachability, Instant)>,
}

impl ConnectionRouter {
    pub fn new(
        topology: RoleSwapController,
        tunnels: Arc<TunnelManager>,
        local: Arc<LocalStore>,
    ) -> Self {
        Self {
            topology,
            tunnels,
            pools: CloudPools::new(),
            local,
            reachability: DashMap::new(),
        }
    }

    /// Resolve `identity` and return a live connection to it.
    pub async fn connect(&self, identity: NodeIdentity) -> Result<LiveConnection> {
        if identity == NodeIdentity::Local {
            // New local connections wait out any exclusive sync phase
            let _shared = self.local.shared_access().await;
            return Ok(self.local.connection());
        }

        let (label, node) = self
            .topology
            .node_for(identity)
            .await
            .ok_or_else(|| RouteError::UnknownNode {
                label: identity.to_string(),
            })?;
        if node.host.is_empty() {
            return Err(RouteError::UnknownNode {
                label: label.to_string(),
            }
            .into());
        }
        self.cloud_connect(label, &node).await
    }

    /// Connect to a physical endpoint by its stable label, sidestepping the
    /// role mapping. Replication pins its source and destination this way so
    /// a concurrent swap cannot redirect a copy mid-resolution.
    pub async fn connect_label(&self, label: PhysicalLabel) -> Result<LiveConnection> {
        let node = self.topology.snapshot().await.node(label).clone();
        if node.host.is_empty() {
            return Err(RouteError::UnknownNode {
                label: label.to_string(),
            }
            .into());
        }
        self.cloud_connect(label, &node).await
    }

    /// Attempt a connection to one physical label and report what happened.
    /// Used by the status surface; respects the same verdict cache.
    pub async fn probe_label(&self, label: PhysicalLabel) -> Reachability {
        let config = self.topology.snapshot().await;
        let node = config.node(label).clone();
        if node.host.is_empty() {
            return Reachability::Unknown;
        }
        match self.cloud_connect(label, &node).await {
            Ok(_) => Reachability::Reachable,
            Err(_) => Reachability::Unreachable,
        }
    }

    /// Last verdict for a label, if it has not expired.
    pub fn observed(&self, label: PhysicalLabel) -> Reachability {
        self.fresh_state(label).unwrap_or(Reachability::Unknown)
    }

    /// Forget every verdict. Called after a swap or reload so the next
    /// resolution re-probes.
    pub fn reset_reachability(&self) {
        self.reachability.clear();
    }

    /// Drop the cached pool for an effective endpoint whose tunnel closed.
    pub fn evict_pool(&self, endpoint: &EndpointKey) {
        self.pools.evict(endpoint);
    }

    async fn cloud_connect(
        &self,
        label: PhysicalLabel,
        node: &NodeConfig,
    ) -> Result<LiveConnection> {
        if self.fresh_state(label) == Some(Reachability::Unreachable) {
            return Err(RouteError::Unreachable {
                label: label.to_string(),
                reason: "marked unreachable, retry window not elapsed".to_string(),
            }
            .into());
        }

        let (host, port) = match self.effective_endpoint(node).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(label = %label, error = %e, "tunnel unavailable");
                self.note(label, Reachability::Unreachable);
                return Err(RouteError::Unreachable {
                    label: label.to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let conn = self.pools.connection_for(node, &host, port)?;

        if self.fresh_state(label) == Some(Reachability::Reachable) {
            return Ok(conn);
        }
        match timeout(
            Duration::from_secs(node.connect_timeout_secs),
            conn.fetch_all("SELECT 1", vec![]),
        )
        .await
        {
            Ok(Ok(_)) => {
                debug!(label = %label, host, port, "node answered");
                self.note(label, Reachability::Reachable);
                Ok(conn)
            }
            Ok(Err(e)) => {
                self.note(label, Reachability::Unreachable);
                Err(RouteError::Unreachable {
                    label: label.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
            Err(_) => {
                self.note(label, Reachability::Unreachable);
                Err(RouteError::Unreachable {
                    label: label.to_string(),
                    reason: format!("no answer within {}s", node.connect_timeout_secs),
                }
                .into())
            }
        }
    }

    /// Host and port the pool should dial: the node itself, or the local end
    /// of its forwarding tunnel.
    async fn effective_endpoint(&self, node: &NodeConfig) -> std::result::Result<(String, u16), TunnelError> {
        if node.requires_tunnel {
            let ssh = self.topology.snapshot().await.ssh;
            let session = self.tunnels.open(&ssh, node.endpoint(), 0).await?;
            Ok(("127.0.0.1".to_string(), session.local_port()))
        } else {
            Ok((node.host.clone(), node.port))
        }
    }

    fn fresh_state(&self, label: PhysicalLabel) -> Option<Reachability> {
        let entry = self.reachability.get(&label)?;
        let (state, at) = *entry;
        let ttl = match state {
            Reachability::Reachable => REACHABLE_TTL,
            Reachability::Unreachable => UNREACHABLE_TTL,
            Reachability::Unknown => return None,
        };
        (at.elapsed() < ttl).then_some(state)
    }

    fn note(&self, label: PhysicalLabel, state: Reachability) {
        self.reachability.insert(label, (state, Instant::now()));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::save_config;
    use skybridge_types::{AppConfig, CoreError, Dialect};
    use std::path::Path;

    fn sqlite_node(path: &Path) -> NodeConfig {
        NodeConfig {
            host: "stand-in".to_string(),
            database: path.display().to_string(),
            dialect: Dialect::Sqlite,
            connect_timeout_secs: 2,
            ..NodeConfig::default()
        }
    }

    async fn router_in(dir: &tempfile::TempDir) -> ConnectionRouter {
        let mut config = AppConfig::default();
        config.nodes.hostek = sqlite_node(&dir.path().join("hostek.db"));
        config.nodes.vps = sqlite_node(&dir.path().join("vps.db"));
        let config_path = dir.path().join("skybridge.toml");
        save_config(&config_path, &config).unwrap();

        let topology = RoleSwapController::new(config_path, config);
        let local = Arc::new(
            LocalStore::open(&dir.path().join("local_cache.db"))
                .await
                .unwrap(),
        );
        ConnectionRouter::new(topology, Arc::new(TunnelManager::with_ssh()), local)
    }

    async fn stamp(conn: &LiveConnection, marker: &str) {
        conn.execute("CREATE TABLE IF NOT EXISTS marker (name TEXT)", vec![])
            .await
            .unwrap();
        conn.execute("INSERT INTO marker (name) VALUES ($1)", vec![marker.into()])
            .await
            .unwrap();
    }

    async fn read_stamp(conn: &LiveConnection) -> Option<String> {
        conn.fetch_all("SELECT name FROM marker", vec![])
            .await
            .unwrap()
            .first()
            .and_then(|r| r.get_text("name").map(str::to_string))
    }

    #[tokio::test]
    async fn test_primary_resolution_tracks_the_swap() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_in(&dir).await;

        let before = router.connect(NodeIdentity::Primary).await.unwrap();
        stamp(&before, "hostek").await;

        router.topology.swap().await.unwrap();
        router.reset_reachability();

        let after = router.connect(NodeIdentity::Primary).await.unwrap();
        stamp(&after, "vps").await;

        // Each physical file saw exactly its own marker
        let hostek = LiveConnection::sqlite_file(&dir.path().join("hostek.db")).unwrap();
        let vps = LiveConnection::sqlite_file(&dir.path().join("vps.db")).unwrap();
        assert_eq!(read_stamp(&hostek).await.as_deref(), Some("hostek"));
        assert_eq!(read_stamp(&vps).await.as_deref(), Some("vps"));
    }

    #[tokio::test]
    async fn test_identity_store_is_pinned_across_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_in(&dir).await;

        let conn = router.connect(NodeIdentity::IdentityStore).await.unwrap();
        stamp(&conn, "identity-before").await;
        router.topology.swap().await.unwrap();
        router.reset_reachability();
        let conn = router.connect(NodeIdentity::IdentityStore).await.unwrap();
        stamp(&conn, "identity-after").await;

        // Both writes landed on the designated identity node (vps by default)
        let vps = LiveConnection::sqlite_file(&dir.path().join("vps.db")).unwrap();
        let rows = vps.fetch_all("SELECT name FROM marker ORDER BY name", vec![]).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_local_always_connects() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_in(&dir).await;
        let conn = router.connect(NodeIdentity::Local).await.unwrap();
        assert_eq!(conn.dialect(), Dialect::Sqlite);
        // The local cache is provisioned, unlike the cloud stand-ins
        let tables = crate::schema::list_tables(&conn).await.unwrap();
        assert!(tables.contains(&"tickets".to_string()));
    }

    #[tokio::test]
    async fn test_dead_node_reports_unreachable_and_caches_the_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_in(&dir).await;
        // Point the primary at a server endpoint nothing listens on
        {
            let mut config = router.topology.snapshot().await;
            config.nodes.hostek = NodeConfig {
                host: "127.0.0.1".to_string(),
                port: 9,
                database: "helpdesk".to_string(),
                dialect: Dialect::MySql,
                connect_timeout_secs: 2,
                ..NodeConfig::default()
            };
            save_config(router.topology.config_path(), &config).unwrap();
            router.topology.reload().await.unwrap();
        }

        let err = router.connect(NodeIdentity::Primary).await.unwrap_err();
        assert!(matches!(err, CoreError::Route(RouteError::Unreachable { .. })));
        assert!(err.is_recoverable());
        assert_eq!(
            router.observed(PhysicalLabel::Hostek),
            Reachability::Unreachable
        );

        // Cached verdict short-circuits the next attempt
        let err = router.connect(NodeIdentity::Primary).await.unwrap_err();
        match err {
            CoreError::Route(RouteError::Unreachable { reason, .. }) => {
                assert!(reason.contains("retry window"));
            }
            other => panic!("expected unreachable, got {other:?}"),
        }

        router.reset_reachability();
        assert_eq!(
            router.observed(PhysicalLabel::Hostek),
            Reachability::Unknown
        );
    }

    #[tokio::test]
    async fn test_unconfigured_node_is_not_probed() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_in(&dir).await;
        {
            let mut config = router.topology.snapshot().await;
            config.nodes.hostek.host = String::new();
            save_config(router.topology.config_path(), &config).unwrap();
            router.topology.reload().await.unwrap();
        }

        let err = router.connect(NodeIdentity::Primary).await.unwrap_err();
        assert!(matches!(err, CoreError::Route(RouteError::UnknownNode { .. })));
        assert_eq!(
            router.probe_label(PhysicalLabel::Hostek).await,
            Reachability::Unknown
        );
    }
}
