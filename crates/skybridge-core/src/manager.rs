//! The outward-facing handle over the whole subsystem.
//!
//! One `HybridManager` wires the role controller, router, tunnel manager,
//! local cache, and the sync/replication engines together and is the only
//! type callers outside this crate need. It is cheap to clone; every clone
//! shares the same state.
//!
//! Sync and replication claim their physical endpoints through the node
//! locks before starting, so the two can never run concurrently against the
//! same cloud node. A busy endpoint fails fast with `OperationInProgress`.

use crate::config::{load_config, resolve_config_path};
use crate::connection::LiveConnection;
use crate::exclusion::NodeLocks;
use crate::identity::IdentityStore;
use crate::local::LocalStore;
use crate::replication::ReplicationEngine;
use crate::router::ConnectionRouter;
use crate::schema::{self, SchemaDiff};
use crate::sync::SyncEngine;
use crate::topology::RoleSwapController;
use crate::tunnel::TunnelManager;
use skybridge_types::{
    AppConfig, ClusterStatus, CopyMode, EndpointKey, IdentityError, NodeIdentity, NodeStatus,
    PhysicalLabel, ReplicationError, ReplicationRun, ReplicationTableConfig, Result, SyncError,
    SyncRun, UserAccount, UserRole,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct HybridManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    topology: RoleSwapController,
    router: ConnectionRouter,
    tunnels: Arc<TunnelManager>,
    local: Arc<LocalStore>,
    locks: NodeLocks,
    sync: SyncEngine,
    replication: ReplicationEngine,
    identity: IdentityStore,
}

impl HybridManager {
    /// Load configuration (explicit path, `SKYBRIDGE_CONFIG`, or the platform
    /// default) and bring the subsystem up.
    pub async fn start(config_path: Option<PathBuf>) -> Result<Self> {
        let path = resolve_config_path(config_path)?;
        let config = load_config(&path)?;
        Self::with_config(path, config).await
    }

    pub async fn with_config(config_path: PathBuf, config: AppConfig) -> Result<Self> {
        let local = Arc::new(LocalStore::open(&config.local.path).await?);
        let topology = RoleSwapController::new(config_path, config);
        let tunnels = Arc::new(TunnelManager::with_ssh());
        let router = ConnectionRouter::new(topology.clone(), tunnels.clone(), local.clone());
        let sync = SyncEngine::new(local.clone());
        Ok(Self {
            inner: Arc::new(ManagerInner {
                topology,
                router,
                tunnels,
                local,
                locks: NodeLocks::new(),
                sync,
                replication: ReplicationEngine::new(),
                identity: IdentityStore::new(),
            }),
        })
    }

    /// A live connection to the requested node. Cloud failures come back as
    /// `Unreachable`; falling back to Local is [`Self::connection_or_fallback`].
    pub async fn connect(&self, identity: NodeIdentity) -> Result<LiveConnection> {
        self.inner.router.connect(identity).await
    }

    /// Primary if it answers, otherwise the Local cache. Non-recoverable
    /// errors (misconfiguration) still surface.
    pub async fn connection_or_fallback(&self) -> Result<(NodeIdentity, LiveConnection)> {
        match self.inner.router.connect(NodeIdentity::Primary).await {
            Ok(conn) => Ok((NodeIdentity::Primary, conn)),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "primary unavailable, serving from local cache");
                let conn = self.inner.router.connect(NodeIdentity::Local).await?;
                Ok((NodeIdentity::Local, conn))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn current_primary(&self) -> PhysicalLabel {
        self.inner.topology.current_primary().await
    }

    /// Exchange the Primary/Secondary assignment and refresh the routing
    /// plumbing under the new one.
    pub async fn swap_roles(&self) -> Result<PhysicalLabel> {
        let new_primary = self.inner.topology.swap().await?;
        self.refresh_plumbing().await;
        Ok(new_primary)
    }

    /// Re-read the config file, then drop tunnels and verdicts the new
    /// configuration no longer supports.
    pub async fn reload(&self) -> Result<AppConfig> {
        let fresh = self.inner.topology.reload().await?;
        self.refresh_plumbing().await;
        Ok(fresh)
    }

    /// Run the three-phase synchronization between the Local cache and the
    /// current Primary. Errors mean the run could not start; a run that
    /// halted mid-flight comes back as `Ok` with `halted` set.
    pub async fn run_sync(&self) -> Result<SyncRun> {
        let inner = &self.inner;
        let config = inner.topology.snapshot().await;
        let primary = config.cluster.primary;
        let _claim = inner.locks.acquire(&config.node(primary).endpoint(), "sync")?;

        let cloud = self.sync_cloud(primary).await?;
        Ok(inner.sync.run(&cloud, &config.sync.pull_entities).await?)
    }

    /// Copy registry tables from one physical node onto the other,
    /// provisioning the destination first. `mode` overrides the configured
    /// manifest with one copy mode for every table; `None` follows the
    /// config.
    pub async fn run_replication(
        &self,
        source: PhysicalLabel,
        destination: PhysicalLabel,
        mode: Option<CopyMode>,
    ) -> Result<ReplicationRun> {
        let inner = &self.inner;
        if source == destination {
            return Err(ReplicationError::SameEndpoint {
                label: source.to_string(),
            }
            .into());
        }
        let config = inner.topology.snapshot().await;
        let endpoints = [
            config.node(source).endpoint(),
            config.node(destination).endpoint(),
        ];
        let _claims = inner.locks.acquire_all(&endpoints, "replication")?;

        let manifest = match mode {
            Some(mode) => schema::registry()
                .iter()
                .map(|def| ReplicationTableConfig {
                    table: def.name.to_string(),
                    mode,
                })
                .collect(),
            None => config.replication.tables.clone(),
        };

        let source_conn = self.replication_end(source).await?;
        let dest_conn = self.replication_end(destination).await?;
        Ok(inner
            .replication
            .replicate(source, &source_conn, destination, &dest_conn, &manifest)
            .await?)
    }

    /// Account operations, bound to a fresh connection to the identity node.
    pub async fn identity(&self) -> Result<IdentityHandle<'_>> {
        let conn = self.inner.router.connect(NodeIdentity::IdentityStore).await?;
        Ok(IdentityHandle {
            store: &self.inner.identity,
            conn,
        })
    }

    /// Point-in-time view of both cloud nodes and the last completed sync.
    /// Probing a dead node waits out its connect timeout, so this can take a
    /// few seconds.
    pub async fn status(&self) -> Result<ClusterStatus> {
        let inner = &self.inner;
        let config = inner.topology.snapshot().await;
        let primary = config.cluster.primary;
        let mut nodes = Vec::with_capacity(2);
        for label in [PhysicalLabel::Hostek, PhysicalLabel::Vps] {
            let node = config.node(label);
            let role = if label == primary {
                NodeIdentity::Primary
            } else {
                NodeIdentity::Secondary
            };
            nodes.push(NodeStatus {
                label,
                role,
                endpoint: node.endpoint(),
                dialect: node.dialect,
                reachability: inner.router.probe_label(label).await,
                tunnel_port: inner
                    .tunnels
                    .session_for(&node.endpoint())
                    .map(|s| s.local_port()),
            });
        }
        Ok(ClusterStatus {
            primary,
            identity: config.cluster.identity,
            nodes,
            last_sync: inner.local.last_sync().await?,
        })
    }

    pub async fn list_tables(&self, identity: NodeIdentity) -> Result<Vec<String>> {
        let conn = self.inner.router.connect(identity).await?;
        schema::list_tables(&conn).await
    }

    pub async fn compare_schemas(
        &self,
        left: NodeIdentity,
        right: NodeIdentity,
    ) -> Result<SchemaDiff> {
        let a = self.inner.router.connect(left).await?;
        let b = self.inner.router.connect(right).await?;
        schema::compare_schemas(&a, &b).await
    }

    /// Tear down every open tunnel. Returns how many were closed.
    pub fn close_tunnels(&self) -> usize {
        self.inner.tunnels.close_all()
    }

    async fn sync_cloud(&self, primary: PhysicalLabel) -> Result<LiveConnection> {
        let conn = self
            .inner
            .router
            .connect_label(primary)
            .await
            .map_err(|e| SyncError::CloudUnavailable {
                label: primary.to_string(),
                reason: e.to_string(),
            })?;
        schema::ensure_schema(&conn)
            .await
            .map_err(|e| SyncError::CloudUnavailable {
                label: primary.to_string(),
                reason: e.to_string(),
            })?;
        Ok(conn)
    }

    async fn replication_end(&self, label: PhysicalLabel) -> Result<LiveConnection> {
        let conn = self
            .inner
            .router
            .connect_label(label)
            .await
            .map_err(|e| ReplicationError::CloudUnavailable {
                label: label.to_string(),
                reason: e.to_string(),
            })?;
        Ok(conn)
    }

    /// Close tunnels to endpoints the current config no longer tunnels to,
    /// evict their pools, and forget reachability verdicts.
    async fn refresh_plumbing(&self) {
        let inner = &self.inner;
        let config = inner.topology.snapshot().await;
        let keep: Vec<EndpointKey> = [PhysicalLabel::Hostek, PhysicalLabel::Vps]
            .into_iter()
            .map(|label| config.node(label))
            .filter(|node| node.requires_tunnel && !node.host.is_empty())
            .map(|node| node.endpoint())
            .collect();
        for port in inner.tunnels.retain_endpoints(&keep) {
            inner.router.evict_pool(&EndpointKey::new("127.0.0.1", port));
        }
        inner.router.reset_reachability();
    }
}

/// Account operations against the identity node, resolved once per handle.
pub struct IdentityHandle<'a> {
    store: &'a IdentityStore,
    conn: LiveConnection,
}

impl IdentityHandle<'_> {
    pub async fn list(&self) -> std::result::Result<Vec<UserAccount>, IdentityError> {
        self.store.list(&self.conn).await
    }

    pub async fn get(&self, username: &str) -> std::result::Result<UserAccount, IdentityError> {
        self.store.get(&self.conn, username).await
    }

    pub async fn add(
        &self,
        username: &str,
        password: &str,
        role: UserRole,
    ) -> std::result::Result<UserAccount, IdentityError> {
        self.store.add(&self.conn, username, password, role).await
    }

    pub async fn update_role(
        &self,
        username: &str,
        role: UserRole,
    ) -> std::result::Result<(), IdentityError> {
        self.store.update_role(&self.conn, username, role).await
    }

    pub async fn delete(&self, username: &str) -> std::result::Result<(), IdentityError> {
        self.store.delete(&self.conn, username).await
    }

    pub async fn reset_password(
        &self,
        username: &str,
        new_password: &str,
    ) -> std::result::Result<(), IdentityError> {
        self.store
            .reset_password(&self.conn, username, new_password)
            .await
    }

    pub async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> std::result::Result<UserAccount, IdentityError> {
        self.store.verify(&self.conn, username, password).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::save_config;
    use skybridge_types::{
        CoreError, Dialect, NodeConfig, Reachability, ReplicationState, RouteError, SyncPhase,
    };
    use std::path::Path;

    fn stand_in(path: &Path, host: &str) -> NodeConfig {
        NodeConfig {
            host: host.to_string(),
            database: path.display().to_string(),
            dialect: Dialect::Sqlite,
            connect_timeout_secs: 2,
            ..NodeConfig::default()
        }
    }

    async fn manager_in(dir: &tempfile::TempDir) -> HybridManager {
        let mut config = AppConfig::default();
        config.nodes.hostek = stand_in(&dir.path().join("hostek.db"), "hostek-cloud");
        config.nodes.vps = stand_in(&dir.path().join("vps.db"), "vps-cloud");
        config.local.path = dir.path().join("local_cache.db");
        let config_path = dir.path().join("skybridge.toml");
        save_config(&config_path, &config).unwrap();
        HybridManager::with_config(config_path, config).await.unwrap()
    }

    #[tokio::test]
    async fn test_swap_flips_roles_in_the_status_view() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir).await;
        assert_eq!(manager.current_primary().await, PhysicalLabel::Hostek);

        assert_eq!(manager.swap_roles().await.unwrap(), PhysicalLabel::Vps);

        let status = manager.status().await.unwrap();
        assert_eq!(status.primary, PhysicalLabel::Vps);
        let vps = status
            .nodes
            .iter()
            .find(|n| n.label == PhysicalLabel::Vps)
            .unwrap();
        assert_eq!(vps.role, NodeIdentity::Primary);
        assert_eq!(vps.reachability, Reachability::Reachable);
        let hostek = status
            .nodes
            .iter()
            .find(|n| n.label == PhysicalLabel::Hostek)
            .unwrap();
        assert_eq!(hostek.role, NodeIdentity::Secondary);
    }

    #[tokio::test]
    async fn test_run_sync_pushes_local_changes_to_the_primary() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir).await;

        let local = manager.connect(NodeIdentity::Local).await.unwrap();
        local
            .execute(
                "INSERT INTO assets (name, created_at, updated_at) VALUES ($1, $2, $2)",
                vec!["Gateway".into(), "2026-02-01 09:00:00".into()],
            )
            .await
            .unwrap();

        let run = manager.run_sync().await.unwrap();
        assert_eq!(run.phase, SyncPhase::Done);
        assert_eq!(run.pushed, 1);
        assert!(run.is_clean());

        // The record landed on the primary's physical file
        let hostek = LiveConnection::sqlite_file(&dir.path().join("hostek.db")).unwrap();
        let rows = hostek.fetch_all("SELECT name FROM assets", vec![]).await.unwrap();
        assert_eq!(rows.len(), 1);

        let again = manager.run_sync().await.unwrap();
        assert_eq!((again.pushed, again.pulled), (0, 0));

        assert!(manager.status().await.unwrap().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_replication_copies_between_physical_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir).await;

        let hostek = LiveConnection::sqlite_file(&dir.path().join("hostek.db")).unwrap();
        schema::ensure_schema(&hostek).await.unwrap();
        hostek
            .execute("INSERT INTO assets (name) VALUES ($1)", vec!["Rack 1".into()])
            .await
            .unwrap();

        let run = manager
            .run_replication(PhysicalLabel::Hostek, PhysicalLabel::Vps, None)
            .await
            .unwrap();
        assert_eq!(run.state, ReplicationState::Done);
        assert_eq!(run.total_copied(), 1);

        let vps = LiveConnection::sqlite_file(&dir.path().join("vps.db")).unwrap();
        let rows = vps.fetch_all("SELECT name FROM assets", vec![]).await.unwrap();
        assert_eq!(rows.len(), 1);

        // A one-shot mode override applies to every table
        let run = manager
            .run_replication(PhysicalLabel::Hostek, PhysicalLabel::Vps, Some(CopyMode::Truncate))
            .await
            .unwrap();
        assert!(run.tables.iter().all(|t| t.mode == CopyMode::Truncate));

        let err = manager
            .run_replication(PhysicalLabel::Vps, PhysicalLabel::Vps, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Replication(ReplicationError::SameEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_claimed_endpoint_locks_out_both_operations() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir).await;

        let config = manager.inner.topology.snapshot().await;
        let endpoint = config.node(PhysicalLabel::Hostek).endpoint();
        let _claim = manager.inner.locks.acquire(&endpoint, "replication").unwrap();

        let err = manager.run_sync().await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Route(RouteError::OperationInProgress { .. })
        ));

        let err = manager
            .run_replication(PhysicalLabel::Vps, PhysicalLabel::Hostek, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Route(RouteError::OperationInProgress { .. })
        ));
    }

    #[tokio::test]
    async fn test_fallback_serves_local_when_the_primary_is_dead() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir).await;
        // Repoint the primary at a server endpoint nothing listens on
        {
            let mut config = manager.inner.topology.snapshot().await;
            config.nodes.hostek = NodeConfig {
                host: "127.0.0.1".to_string(),
                port: 9,
                database: "helpdesk".to_string(),
                dialect: Dialect::MySql,
                connect_timeout_secs: 2,
                ..NodeConfig::default()
            };
            save_config(manager.inner.topology.config_path(), &config).unwrap();
            manager.reload().await.unwrap();
        }

        let (identity, conn) = manager.connection_or_fallback().await.unwrap();
        assert_eq!(identity, NodeIdentity::Local);
        assert_eq!(conn.dialect(), Dialect::Sqlite);
    }

    #[tokio::test]
    async fn test_identity_handle_reaches_the_designated_node() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir).await;

        let identity = manager.identity().await.unwrap();
        assert!(identity.list().await.unwrap().is_empty());
        assert!(matches!(
            identity.get("admin").await,
            Err(IdentityError::NotFound { .. })
        ));

        // The account table was provisioned on the vps stand-in, the default
        // identity node
        let vps = LiveConnection::sqlite_file(&dir.path().join("vps.db")).unwrap();
        let tables = schema::list_tables(&vps).await.unwrap();
        assert!(tables.contains(&"companion_users".to_string()));
    }

    #[tokio::test]
    async fn test_schema_preflight_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir).await;

        // Local is provisioned at startup; the hostek stand-in starts bare
        let diff = manager
            .compare_schemas(NodeIdentity::Local, NodeIdentity::Primary)
            .await
            .unwrap();
        assert!(diff.missing_on_a.is_empty());
        assert!(diff.missing_on_b.contains(&"assets".to_string()));

        let tables = manager.list_tables(NodeIdentity::Local).await.unwrap();
        assert!(tables.contains(&"sync_meta".to_string()));
    }
}
