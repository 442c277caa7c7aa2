//! Local-port-forwarding tunnels to remote nodes whose database port is not
//! directly exposed.
//!
//! The manager owns every session: callers borrow them, only the manager
//! opens and closes them. Sessions are keyed by the remote endpoint (host and
//! port of the database as seen from the secure-shell host), never by role
//! label, so a role swap by itself does not invalidate any tunnel. At most
//! one session per remote endpoint exists at a time; a second `open` for the
//! same endpoint hands back the existing session.
//!
//! The transport behind a session is a trait so the manager's bind, retry,
//! registry, and shutdown behavior can be exercised without a live
//! secure-shell server.

pub mod policy;
pub mod ssh;

pub use policy::BindPolicy;
pub use ssh::SshTransport;

use async_trait::async_trait;
use dashmap::DashMap;
use skybridge_types::{EndpointKey, SshConfig, TunnelError};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Establishes the secure transport session behind a tunnel.
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    async fn connect(&self, ssh: &SshConfig) -> Result<Arc<dyn TunnelLink>, TunnelError>;
}

/// One established transport session, able to open a forwarded byte channel
/// per accepted local connection.
#[async_trait]
pub trait TunnelLink: Send + Sync {
    /// Splice `socket` with a fresh channel to `remote` until either side
    /// closes.
    async fn forward(&self, remote: &EndpointKey, socket: TcpStream) -> Result<(), TunnelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Opening,
    Bound,
    Failed,
    Closed,
}

#[derive(Debug)]
pub struct TunnelSession {
    remote: EndpointKey,
    local_port: u16,
    /// Bind attempts consumed before the local port was secured.
    attempts: u32,
    state: parking_lot::Mutex<TunnelState>,
    cancel: CancellationToken,
}

impl TunnelSession {
    pub fn remote(&self) -> &EndpointKey {
        &self.remote
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> TunnelState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == TunnelState::Bound
    }

    fn mark(&self, state: TunnelState) {
        *self.state.lock() = state;
    }
}

pub struct TunnelManager {
    sessions: DashMap<EndpointKey, Arc<TunnelSession>>,
    transport: Arc<dyn TunnelTransport>,
    policy: BindPolicy,
    /// Serializes opens so two callers racing on the same endpoint cannot
    /// both establish a transport.
    open_lock: tokio::sync::Mutex<()>,
}

impl TunnelManager {
    pub fn new(transport: Arc<dyn TunnelTransport>, policy: BindPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            transport,
            policy,
            open_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The production configuration: secure-shell transport, default policy.
    pub fn with_ssh() -> Self {
        Self::new(Arc::new(SshTransport), BindPolicy::default())
    }

    /// Open a forwarding tunnel to `remote`, or return the one already
    /// serving it. `local_port_hint` of 0 takes an ephemeral port.
    pub async fn open(
        &self,
        ssh: &SshConfig,
        remote: EndpointKey,
        local_port_hint: u16,
    ) -> Result<Arc<TunnelSession>, TunnelError> {
        let _serialize = self.open_lock.lock().await;

        if let Some(existing) = self.sessions.get(&remote) {
            if existing.is_open() {
                return Ok(existing.clone());
            }
        }
        // Stale Failed/Closed entries make way for a fresh open
        self.sessions.remove(&remote);

        let (listener, attempts) = self.bind_local(&remote, local_port_hint).await?;
        let local_port = listener
            .local_addr()
            .map_err(|e| TunnelError::Io {
                message: e.to_string(),
            })?
            .port();

        let session = Arc::new(TunnelSession {
            remote: remote.clone(),
            local_port,
            attempts,
            state: parking_lot::Mutex::new(TunnelState::Opening),
            cancel: CancellationToken::new(),
        });
        self.sessions.insert(remote.clone(), session.clone());

        let link = match self.transport.connect(ssh).await {
            Ok(link) => link,
            Err(e) => {
                session.mark(TunnelState::Failed);
                self.sessions.remove(&remote);
                return Err(e);
            }
        };
        session.mark(TunnelState::Bound);

        let task_session = session.clone();
        tokio::spawn(async move {
            accept_loop(task_session, listener, link).await;
        });

        info!(remote = %remote, local_port, attempts, "tunnel bound");
        Ok(session)
    }

    /// Bind a local forwarding port per the retry policy. Returns the
    /// listener and the number of attempts it took.
    async fn bind_local(
        &self,
        remote: &EndpointKey,
        hint: u16,
    ) -> Result<(TcpListener, u32), TunnelError> {
        let mut attempt = 0u32;
        loop {
            let Some(port) = self.policy.candidate(hint, attempt) else {
                return Err(TunnelError::BindExhausted {
                    endpoint: remote.to_string(),
                    attempts: self.policy.attempts,
                });
            };
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => return Ok((listener, attempt + 1)),
                Err(e) => {
                    warn!(remote = %remote, port, attempt, error = %e, "local bind failed");
                    attempt += 1;
                    if self.policy.candidate(hint, attempt).is_some() {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }
    }

    /// Tear down the session for `remote`, returning the local port it held.
    /// Closing an absent or already-closed session is a no-op.
    pub fn close(&self, remote: &EndpointKey) -> Option<u16> {
        let (_, session) = self.sessions.remove(remote)?;
        session.cancel.cancel();
        session.mark(TunnelState::Closed);
        info!(remote = %remote, local_port = session.local_port, "tunnel closed");
        Some(session.local_port)
    }

    /// Close every session whose remote endpoint is not in `keep`. Returns
    /// the released local ports so callers can evict stale pools.
    pub fn retain_endpoints(&self, keep: &[EndpointKey]) -> Vec<u16> {
        let stale: Vec<EndpointKey> = self
            .sessions
            .iter()
            .filter(|entry| !keep.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        stale.iter().filter_map(|k| self.close(k)).collect()
    }

    pub fn close_all(&self) -> usize {
        let all: Vec<EndpointKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        all.iter().filter_map(|k| self.close(k)).count()
    }

    /// The open session serving `remote`, if any.
    pub fn session_for(&self, remote: &EndpointKey) -> Option<Arc<TunnelSession>> {
        self.sessions
            .get(remote)
            .map(|e| e.clone())
            .filter(|s| s.is_open())
    }
}

async fn accept_loop(
    session: Arc<TunnelSession>,
    listener: TcpListener,
    link: Arc<dyn TunnelLink>,
) {
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => {
                    let link = link.clone();
                    let remote = session.remote.clone();
                    tokio::spawn(async move {
                        if let Err(e) = link.forward(&remote, socket).await {
                            warn!(remote = %remote, error = %e, "forward failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(remote = %session.remote, error = %e, "accept failed");
                    session.mark(TunnelState::Failed);
                    return;
                }
            },
        }
    }
    session.mark(TunnelState::Closed);
}
