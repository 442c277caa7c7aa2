//! Process-wide role assignment, owned by one controller and passed by handle.
//!
//! The whole loaded configuration lives behind a single reader-writer lock.
//! Connection resolutions take one read guard for the entire label-to-node
//! lookup, so a resolution either sees the pre-swap or the post-swap mapping
//! in full, never a torn mixture. `swap()` persists the new assignment to the
//! config file before committing it to memory: if the save fails, the
//! in-memory state is unchanged and the error surfaces.

use crate::config::{load_config, save_config};
use skybridge_types::{AppConfig, NodeConfig, NodeIdentity, PhysicalLabel, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Clone)]
pub struct RoleSwapController {
    config_path: Arc<PathBuf>,
    config: Arc<RwLock<AppConfig>>,
}

impl RoleSwapController {
    pub fn new(config_path: PathBuf, config: AppConfig) -> Self {
        Self {
            config_path: Arc::new(config_path),
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// A point-in-time copy of the loaded configuration.
    pub async fn snapshot(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    pub async fn current_primary(&self) -> PhysicalLabel {
        self.config.read().await.cluster.primary
    }

    pub async fn identity_label(&self) -> PhysicalLabel {
        self.config.read().await.cluster.identity
    }

    /// Which physical label answers to `identity` right now. Local has no
    /// cloud label.
    pub async fn label_for(&self, identity: NodeIdentity) -> Option<PhysicalLabel> {
        let config = self.config.read().await;
        label_in(&config, identity)
    }

    /// Resolve a node identity to its physical label and node config under
    /// one read guard.
    pub async fn node_for(&self, identity: NodeIdentity) -> Option<(PhysicalLabel, NodeConfig)> {
        let config = self.config.read().await;
        let label = label_in(&config, identity)?;
        Some((label, config.node(label).clone()))
    }

    /// Exchange the Primary/Secondary labels. The new assignment is written
    /// to disk first; only a successful save commits it to memory.
    pub async fn swap(&self) -> Result<PhysicalLabel> {
        let mut guard = self.config.write().await;
        let mut next = guard.clone();
        next.cluster.primary = next.cluster.primary.other();
        save_config(&self.config_path, &next)?;
        let new_primary = next.cluster.primary;
        *guard = next;
        info!(primary = %new_primary, "roles swapped");
        Ok(new_primary)
    }

    /// Re-read the config file and replace the in-memory state.
    pub async fn reload(&self) -> Result<AppConfig> {
        let fresh = load_config(&self.config_path)?;
        let mut guard = self.config.write().await;
        *guard = fresh.clone();
        info!(primary = %fresh.cluster.primary, "config reloaded");
        Ok(fresh)
    }
}

fn label_in(config: &AppConfig, identity: NodeIdentity) -> Option<PhysicalLabel> {
    match identity {
        NodeIdentity::Primary => Some(config.cluster.primary),
        NodeIdentity::Secondary => Some(config.cluster.primary.other()),
        // Identity-store requests bypass the role mapping entirely
        NodeIdentity::IdentityStore => Some(config.cluster.identity),
        NodeIdentity::Local => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn controller_in(dir: &tempfile::TempDir) -> RoleSwapController {
        let path = dir.path().join("skybridge.toml");
        let mut config = AppConfig::default();
        config.nodes.hostek.host = "213.109.159.7".to_string();
        config.nodes.vps.host = "74.208.225.182".to_string();
        save_config(&path, &config).unwrap();
        RoleSwapController::new(path, config)
    }

    #[tokio::test]
    async fn test_resolution_follows_the_current_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_in(&dir);

        let (label, node) = controller.node_for(NodeIdentity::Primary).await.unwrap();
        assert_eq!(label, PhysicalLabel::Hostek);
        assert_eq!(node.host, "213.109.159.7");

        controller.swap().await.unwrap();

        let (label, node) = controller.node_for(NodeIdentity::Primary).await.unwrap();
        assert_eq!(label, PhysicalLabel::Vps);
        assert_eq!(node.host, "74.208.225.182");
        let (label, _) = controller.node_for(NodeIdentity::Secondary).await.unwrap();
        assert_eq!(label, PhysicalLabel::Hostek);
    }

    #[tokio::test]
    async fn test_identity_store_ignores_the_swap() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_in(&dir);
        assert_eq!(
            controller.label_for(NodeIdentity::IdentityStore).await,
            Some(PhysicalLabel::Vps)
        );
        controller.swap().await.unwrap();
        assert_eq!(
            controller.label_for(NodeIdentity::IdentityStore).await,
            Some(PhysicalLabel::Vps)
        );
        assert_eq!(controller.label_for(NodeIdentity::Local).await, None);
    }

    #[tokio::test]
    async fn test_swap_survives_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_in(&dir);
        controller.swap().await.unwrap();

        // A second controller reading the same file sees the swapped state
        let reread = load_config(controller.config_path()).unwrap();
        assert_eq!(reread.cluster.primary, PhysicalLabel::Vps);

        let reloaded = controller.reload().await.unwrap();
        assert_eq!(reloaded.cluster.primary, PhysicalLabel::Vps);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_in(&dir);
        // Make the config path unwritable by turning it into a directory
        std::fs::remove_file(controller.config_path()).unwrap();
        std::fs::create_dir(controller.config_path()).unwrap();

        let err = controller.swap().await.unwrap_err();
        assert!(matches!(err, skybridge_types::CoreError::Config(_)));
        assert_eq!(controller.current_primary().await, PhysicalLabel::Hostek);
    }
}
