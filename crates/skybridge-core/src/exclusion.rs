//! Cross-operation locks keyed by physical node identity.
//!
//! Sync and replication must never run concurrently against the same cloud
//! endpoint. Each claims the endpoints it will touch before starting; if any
//! is already held the operation fails fast with `OperationInProgress`
//! instead of queueing behind an operation of unknown duration.

use dashmap::DashMap;
use skybridge_types::{EndpointKey, RouteError};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Default)]
pub struct NodeLocks {
    locks: DashMap<EndpointKey, Arc<Mutex<()>>>,
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim one endpoint for `operation`, or fail fast if it is busy.
    pub fn acquire(
        &self,
        endpoint: &EndpointKey,
        operation: &str,
    ) -> Result<OwnedMutexGuard<()>, RouteError> {
        let lock = self
            .locks
            .entry(endpoint.clone())
            .or_default()
            .clone();
        match lock.try_lock_owned() {
            Ok(guard) => {
                debug!(endpoint = %endpoint, operation, "node claimed");
                Ok(guard)
            }
            Err(_) => Err(RouteError::OperationInProgress {
                endpoint: endpoint.to_string(),
                operation: operation.to_string(),
            }),
        }
    }

    /// Claim several endpoints at once; either all are claimed or none.
    pub fn acquire_all(
        &self,
        endpoints: &[EndpointKey],
        operation: &str,
    ) -> Result<Vec<OwnedMutexGuard<()>>, RouteError> {
        let mut guards = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            // Dropping the partial set on failure releases what was claimed
            guards.push(self.acquire(endpoint, operation)?);
        }
        Ok(guards)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn endpoint(host: &str) -> EndpointKey {
        EndpointKey::new(host, 3306)
    }

    #[test]
    fn test_second_claim_fails_fast() {
        let locks = NodeLocks::new();
        let guard = locks.acquire(&endpoint("a"), "sync").unwrap();

        let err = locks.acquire(&endpoint("a"), "replication").unwrap_err();
        assert!(matches!(err, RouteError::OperationInProgress { .. }));
        assert!(err.is_transient());

        drop(guard);
        assert!(locks.acquire(&endpoint("a"), "replication").is_ok());
    }

    #[test]
    fn test_distinct_endpoints_do_not_contend() {
        let locks = NodeLocks::new();
        let _a = locks.acquire(&endpoint("a"), "sync").unwrap();
        assert!(locks.acquire(&endpoint("b"), "replication").is_ok());
    }

    #[test]
    fn test_all_or_nothing_claim() {
        let locks = NodeLocks::new();
        let held = locks.acquire(&endpoint("b"), "sync").unwrap();

        let err = locks
            .acquire_all(&[endpoint("a"), endpoint("b")], "replication")
            .unwrap_err();
        assert!(matches!(err, RouteError::OperationInProgress { .. }));
        // The partial claim on "a" was released with the error
        assert!(locks.acquire(&endpoint("a"), "sync").is_ok());

        drop(held);
        let guards = locks
            .acquire_all(&[endpoint("b"), endpoint("c")], "replication")
            .unwrap();
        assert_eq!(guards.len(), 2);
    }
}
