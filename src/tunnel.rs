// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SSH tunnel proxy for endpoints that only expose their database on the
//! bastion's loopback.
//!
//! One tunnel per SSH host, shared by every connection that needs it:
//!
//! ```text
//!   client ──► 127.0.0.1:<local_port> ──► [accept loop]
//!                                             │ channel_direct_tcpip
//!                                             ▼
//!                      ssh transport ──► 127.0.0.1:<remote_db_port> (bastion)
//! ```
//!
//! `start()` is idempotent per host: the registry is checked and updated
//! under one lock, so concurrent callers converge on a single transport and
//! local port. Each accepted connection gets its own forwarded channel and
//! a pair of byte-copy workers; one connection dying never affects the
//! others. `stop()` signals the accept loop, which disconnects the SSH
//! session; in-flight workers then exit on their next read or write.

use std::collections::HashMap;
use std::time::Duration;

use async_ssh2_lite::{AsyncChannel, AsyncSession, SessionConfiguration};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::SshConfig;
use crate::error::{EngineError, Result};
use crate::metrics;

/// Budget for TCP connect, SSH handshake, and auth, each.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-host singleton SSH tunnels.
pub struct TunnelProxy {
    tunnels: Mutex<HashMap<String, TunnelHandle>>,
}

struct TunnelHandle {
    local_port: u16,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for TunnelProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelProxy {
    pub fn new() -> Self {
        Self {
            tunnels: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure a tunnel to `ssh.host` exists and return its local port.
    ///
    /// Reuses the existing tunnel when one is already up for this host. The
    /// registry lock is held across the open, so two concurrent starts for
    /// the same host produce one transport.
    pub async fn start(&self, ssh: &SshConfig) -> Result<u16> {
        let mut tunnels = self.tunnels.lock().await;
        if let Some(handle) = tunnels.get(&ssh.host) {
            metrics::record_tunnel_start(&ssh.host, true);
            return Ok(handle.local_port);
        }
        let handle = open_tunnel(ssh).await?;
        let local_port = handle.local_port;
        tunnels.insert(ssh.host.clone(), handle);
        metrics::record_tunnel_start(&ssh.host, false);
        metrics::set_open_tunnels(tunnels.len());
        Ok(local_port)
    }

    /// Local port of an established tunnel, if any.
    pub async fn local_port(&self, host: &str) -> Option<u16> {
        self.tunnels.lock().await.get(host).map(|h| h.local_port)
    }

    /// Tear down the tunnel for `host`. Returns false when none exists.
    pub async fn stop(&self, host: &str) -> bool {
        let mut tunnels = self.tunnels.lock().await;
        match tunnels.remove(host) {
            Some(handle) => {
                let _ = handle.shutdown_tx.send(true);
                metrics::set_open_tunnels(tunnels.len());
                info!(host = %host, "tunnel stopped");
                true
            }
            None => false,
        }
    }

    /// Tear down every tunnel.
    pub async fn stop_all(&self) {
        let mut tunnels = self.tunnels.lock().await;
        for (host, handle) in tunnels.drain() {
            let _ = handle.shutdown_tx.send(true);
            info!(host = %host, "tunnel stopped");
        }
        metrics::set_open_tunnels(0);
    }
}

async fn open_tunnel(ssh: &SshConfig) -> Result<TunnelHandle> {
    let addr = format!("{}:{}", ssh.host, ssh.port);
    let tcp = timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| EngineError::tunnel(&ssh.host, "connect timed out"))?
        .map_err(|e| EngineError::tunnel(&ssh.host, format!("connect: {e}")))?;

    let mut session = AsyncSession::new(tcp, SessionConfiguration::new())
        .map_err(|e| EngineError::tunnel(&ssh.host, format!("session: {e}")))?;
    timeout(HANDSHAKE_TIMEOUT, session.handshake())
        .await
        .map_err(|_| EngineError::tunnel(&ssh.host, "handshake timed out"))?
        .map_err(|e| EngineError::tunnel(&ssh.host, format!("handshake: {e}")))?;
    session
        .userauth_password(&ssh.user, &ssh.password)
        .await
        .map_err(|e| EngineError::tunnel(&ssh.host, format!("auth: {e}")))?;
    if !session.authenticated() {
        return Err(EngineError::tunnel(&ssh.host, "authentication rejected"));
    }

    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| EngineError::tunnel(&ssh.host, format!("bind: {e}")))?;
    let local_port = listener
        .local_addr()
        .map_err(|e| EngineError::tunnel(&ssh.host, format!("local_addr: {e}")))?
        .port();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    info!(host = %ssh.host, local_port, remote_db_port = ssh.remote_db_port, "ssh tunnel established");

    tokio::spawn(accept_loop(
        session,
        listener,
        ssh.host.clone(),
        ssh.remote_db_port,
        shutdown_rx,
    ));

    Ok(TunnelHandle {
        local_port,
        shutdown_tx,
    })
}

/// Accept forwarded connections until shutdown, then drop the transport.
async fn accept_loop(
    session: AsyncSession<TcpStream>,
    listener: TcpListener,
    host: String,
    remote_db_port: u16,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(host = %host, error = %e, "tunnel accept failed");
                        break;
                    }
                };
                debug!(host = %host, peer = %peer, "tunnel connection accepted");
                // The database listens on the bastion's own loopback.
                match session.channel_direct_tcpip("127.0.0.1", remote_db_port, None).await {
                    Ok(channel) => {
                        metrics::record_tunnel_connection(&host, true);
                        tokio::spawn(forward(stream, channel));
                    }
                    Err(e) => {
                        metrics::record_tunnel_connection(&host, false);
                        warn!(host = %host, error = %e, "direct-tcpip channel failed");
                        drop(stream);
                    }
                }
            }
        }
    }
    let _ = session.disconnect(None, "tunnel stopped", None).await;
    debug!(host = %host, "tunnel accept loop exited");
}

/// Pump bytes both ways until either side closes, then tear down the pair.
async fn forward(local: TcpStream, channel: AsyncChannel<TcpStream>) {
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let (mut chan_rd, mut chan_wr) = tokio::io::split(channel);

    let mut up = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut local_rd, &mut chan_wr).await;
    });
    let mut down = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut chan_rd, &mut local_wr).await;
    });

    tokio::select! {
        _ = &mut up => down.abort(),
        _ = &mut down => up.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssh_config(host: &str) -> SshConfig {
        SshConfig {
            host: host.to_string(),
            port: 22,
            user: "ops".to_string(),
            password: "pw".to_string(),
            remote_db_port: 3306,
        }
    }

    #[tokio::test]
    async fn test_stop_unknown_host() {
        let proxy = TunnelProxy::new();
        assert!(!proxy.stop("nowhere.example.com").await);
    }

    #[tokio::test]
    async fn test_local_port_unknown_host() {
        let proxy = TunnelProxy::new();
        assert_eq!(proxy.local_port("nowhere.example.com").await, None);
    }

    #[tokio::test]
    async fn test_start_unreachable_host_errors() {
        // Closed local port: connect is refused immediately.
        let proxy = TunnelProxy::new();
        let mut cfg = ssh_config("127.0.0.1");
        cfg.port = 1; // nothing listens here
        let err = proxy.start(&cfg).await.unwrap_err();
        assert!(err.is_connectivity());
        // The failed start leaves no registry entry behind.
        assert_eq!(proxy.local_port("127.0.0.1").await, None);
    }

    #[tokio::test]
    #[ignore] // Requires a reachable SSH host; set TUNNEL_TEST_HOST/USER/PASSWORD
    async fn test_start_is_idempotent_per_host() {
        let host = std::env::var("TUNNEL_TEST_HOST").unwrap();
        let cfg = SshConfig {
            host,
            port: 22,
            user: std::env::var("TUNNEL_TEST_USER").unwrap(),
            password: std::env::var("TUNNEL_TEST_PASSWORD").unwrap(),
            remote_db_port: 3306,
        };
        let proxy = TunnelProxy::new();
        let first = proxy.start(&cfg).await.unwrap();
        let second = proxy.start(&cfg).await.unwrap();
        assert_eq!(first, second);
        assert!(proxy.stop(&cfg.host).await);
    }
}
