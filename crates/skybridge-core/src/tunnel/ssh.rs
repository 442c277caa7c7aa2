//! Secure-shell transport: one authenticated session per tunnel, one
//! direct-tcpip channel per forwarded connection.

use crate::tunnel::{TunnelLink, TunnelTransport};
use async_ssh2_lite::{AsyncSession, SessionConfiguration};
use async_trait::async_trait;
use skybridge_types::{EndpointKey, SshConfig, TunnelError};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::info;

pub struct SshTransport;

#[async_trait]
impl TunnelTransport for SshTransport {
    async fn connect(&self, ssh: &SshConfig) -> Result<Arc<dyn TunnelLink>, TunnelError> {
        let addr = format!("{}:{}", ssh.host, ssh.port);
        let tcp = timeout(
            Duration::from_secs(ssh.connect_timeout_secs),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| TunnelError::ConnectTimeout {
            host: ssh.host.clone(),
            port: ssh.port,
            timeout_secs: ssh.connect_timeout_secs,
        })?
        .map_err(|e| TunnelError::Io {
            message: e.to_string(),
        })?;

        let config = SessionConfiguration::new();
        let mut session =
            AsyncSession::new(tcp, config).map_err(|e| TunnelError::Handshake {
                host: ssh.host.clone(),
                message: e.to_string(),
            })?;
        session.handshake().await.map_err(|e| TunnelError::Handshake {
            host: ssh.host.clone(),
            message: e.to_string(),
        })?;
        session
            .userauth_password(&ssh.user, &ssh.password)
            .await
            .map_err(|e| TunnelError::Auth {
                host: ssh.host.clone(),
                message: e.to_string(),
            })?;

        info!(host = %ssh.host, port = ssh.port, "ssh transport established");
        Ok(Arc::new(SshLink {
            session: Mutex::new(session),
        }))
    }
}

struct SshLink {
    session: Mutex<AsyncSession<TcpStream>>,
}

#[async_trait]
impl TunnelLink for SshLink {
    async fn forward(&self, remote: &EndpointKey, mut socket: TcpStream) -> Result<(), TunnelError> {
        // Channel setup is serialized on the session; the byte copy afterwards
        // runs on the channel alone
        let mut channel = {
            let session = self.session.lock().await;
            session
                .channel_direct_tcpip(&remote.host, remote.port, None)
                .await
                .map_err(|e| TunnelError::Io {
                    message: e.to_string(),
                })?
        };

        tokio::io::copy_bidirectional(&mut socket, &mut channel)
            .await
            .map_err(|e| TunnelError::Io {
                message: e.to_string(),
            })?;
        Ok(())
    }
}
