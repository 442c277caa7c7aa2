//! Lazily-built connection pools for the cloud nodes.
//!
//! Pools are cached per effective endpoint: the node's own host/port for a
//! directly reachable node, or `127.0.0.1:<forwarded port>` when the router
//! goes through a tunnel. Nothing connects until the first statement runs, so
//! building a pool for a dead endpoint costs nothing; the failure surfaces at
//! first acquire, where the router turns it into a reachability verdict.

use crate::connection::{build_sqlite_pool, LiveConnection};
use dashmap::DashMap;
use r2d2_sqlite::SqliteConnectionManager;
use skybridge_types::{Dialect, EndpointKey, NodeConfig, Result};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub struct CloudPools {
    mysql: DashMap<EndpointKey, MySqlPool>,
    sqlite: DashMap<String, r2d2::Pool<SqliteConnectionManager>>,
}

impl CloudPools {
    pub fn new() -> Self {
        Self {
            mysql: DashMap::new(),
            sqlite: DashMap::new(),
        }
    }

    /// A connection for `node`, reached at `host:port` (which differs from
    /// the node's configured endpoint when a tunnel is in between). A node
    /// configured with the embedded dialect opens its database path as a file
    /// instead of dialing a server.
    pub fn connection_for(
        &self,
        node: &NodeConfig,
        host: &str,
        port: u16,
    ) -> Result<LiveConnection> {
        match node.dialect {
            Dialect::MySql => Ok(self.mysql_connection(node, host, port)),
            Dialect::Sqlite => {
                let pool = self
                    .sqlite
                    .entry(node.database.clone())
                    .or_try_insert_with(|| build_sqlite_pool(Path::new(&node.database)))?
                    .clone();
                Ok(LiveConnection::sqlite_from_pool(pool))
            }
        }
    }

    fn mysql_connection(&self, node: &NodeConfig, host: &str, port: u16) -> LiveConnection {
        let key = EndpointKey::new(host, port);
        let pool = self
            .mysql
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(endpoint = %key, "building pool");
                let options = MySqlConnectOptions::new()
                    .host(host)
                    .port(port)
                    .username(&node.user)
                    .password(&node.password)
                    .database(&node.database);
                MySqlPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(node.connect_timeout_secs))
                    .connect_lazy_with(options)
            })
            .clone();
        LiveConnection::mysql(pool)
    }

    /// Drop the cached pool for one effective endpoint (its tunnel closed, or
    /// it went stale after a swap).
    pub fn evict(&self, endpoint: &EndpointKey) {
        if self.mysql.remove(endpoint).is_some() {
            debug!(endpoint = %endpoint, "pool evicted");
        }
    }
}

impl Default for CloudPools {
    fn default() -> Self {
        Self::new()
    }
}
