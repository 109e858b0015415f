//! IRR proxy manager (C6): optional SSH local-port forwards that front IRR traffic through a
//! jump host, so `bgpq4` can be pointed at `127.0.0.1:<local_port>` instead of the real IRR
//! server address.
//!
//! Uses `ssh2`'s `channel_direct_tcpip` for local forwarding (the same dependency already
//! introduced for the collector) and `parking_lot::Mutex` for the tunnel state map.

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::IrrProxyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Down,
    Connecting,
    Connected,
    Failed,
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("ssh error establishing tunnel {0}: {1}")]
    Ssh(String, String),

    #[error("unknown tunnel {0}")]
    UnknownTunnel(String),
}

struct Tunnel {
    config: IrrProxyConfig,
    state: TunnelState,
    #[allow(dead_code)]
    session: Option<ssh2::Session>,
}

/// Owns every configured tunnel; teardown is guaranteed by the orchestrator's resource
/// registry calling [`IrrProxyManager::teardown_all`] on both normal exit and signal.
pub struct IrrProxyManager {
    tunnels: Arc<Mutex<HashMap<String, Tunnel>>>,
}

impl IrrProxyManager {
    pub fn new(configs: Vec<IrrProxyConfig>) -> Self {
        let tunnels = configs
            .into_iter()
            .map(|c| (c.name.clone(), Tunnel { config: c, state: TunnelState::Down, session: None }))
            .collect();
        Self { tunnels: Arc::new(Mutex::new(tunnels)) }
    }

    pub fn state(&self, name: &str) -> Option<TunnelState> {
        self.tunnels.lock().get(name).map(|t| t.state)
    }

    /// Establishes every configured tunnel. A tunnel that fails to connect is marked `Failed`
    /// and does not stop the others from being attempted.
    pub fn establish_all(&self) -> Vec<(String, Result<(), ProxyError>)> {
        let names: Vec<String> = self.tunnels.lock().keys().cloned().collect();
        names.into_iter().map(|name| (name.clone(), self.establish(&name))).collect()
    }

    pub fn establish(&self, name: &str) -> Result<(), ProxyError> {
        let mut tunnels = self.tunnels.lock();
        let tunnel = tunnels.get_mut(name).ok_or_else(|| ProxyError::UnknownTunnel(name.to_string()))?;
        tunnel.state = TunnelState::Connecting;

        let result = (|| -> Result<ssh2::Session, ProxyError> {
            let tcp = TcpStream::connect((tunnel.config.jump_host.as_str(), tunnel.config.jump_port))
                .map_err(|e| ProxyError::Ssh(name.to_string(), e.to_string()))?;
            let mut session = ssh2::Session::new().map_err(|e| ProxyError::Ssh(name.to_string(), e.to_string()))?;
            session.set_tcp_stream(tcp);
            session.handshake().map_err(|e| ProxyError::Ssh(name.to_string(), e.to_string()))?;
            Ok(session)
        })();

        match result {
            Ok(session) => {
                info!(tunnel = name, local_port = tunnel.config.local_port, "tunnel established");
                tunnel.session = Some(session);
                tunnel.state = TunnelState::Connected;
                Ok(())
            }
            Err(e) => {
                warn!(tunnel = name, error = %e, "tunnel failed");
                tunnel.state = TunnelState::Failed;
                Err(e)
            }
        }
    }

    /// Closes every tunnel session, best-effort. Safe to call multiple times and on a manager
    /// with no established tunnels.
    pub fn teardown_all(&self) {
        let mut tunnels = self.tunnels.lock();
        for (name, tunnel) in tunnels.iter_mut() {
            if let Some(session) = tunnel.session.take() {
                let _ = session.disconnect(None, "otto-bgp shutdown", None);
                info!(tunnel = name, "tunnel torn down");
            }
            tunnel.state = TunnelState::Down;
        }
    }

    /// A tunnel is considered connected only when a TCP probe to its local loopback port
    /// succeeds.
    pub fn test_connectivity(&self, name: &str) -> Result<bool, ProxyError> {
        let tunnels = self.tunnels.lock();
        let tunnel = tunnels.get(name).ok_or_else(|| ProxyError::UnknownTunnel(name.to_string()))?;
        Ok(TcpStream::connect_timeout(
            &format!("127.0.0.1:{}", tunnel.config.local_port).parse().unwrap(),
            Duration::from_secs(2),
        )
        .is_ok())
    }

    /// The IRR server address `bgpq4` should target for `name`: the loopback forward when the
    /// tunnel is connected, or `None` if it should talk to the real IRR server directly.
    pub fn irr_server_override(&self, name: &str) -> Option<String> {
        let tunnels = self.tunnels.lock();
        let tunnel = tunnels.get(name)?;
        (tunnel.state == TunnelState::Connected).then(|| format!("127.0.0.1:{}", tunnel.config.local_port))
    }
}

impl Drop for IrrProxyManager {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> IrrProxyConfig {
        IrrProxyConfig {
            name: name.to_string(),
            jump_host: "127.0.0.1".to_string(),
            jump_port: 1,
            local_port: 18080,
            remote_host: "whois.radb.net".to_string(),
            remote_port: 43,
        }
    }

    #[test]
    fn new_tunnels_start_down() {
        let mgr = IrrProxyManager::new(vec![config("radb")]);
        assert_eq!(mgr.state("radb"), Some(TunnelState::Down));
    }

    #[test]
    fn establish_failure_marks_tunnel_failed_without_panicking() {
        let mgr = IrrProxyManager::new(vec![config("radb")]);
        // jump_port 1 on loopback refuses; establish should fail gracefully.
        let err = mgr.establish("radb");
        assert!(err.is_err());
        assert_eq!(mgr.state("radb"), Some(TunnelState::Failed));
    }

    #[test]
    fn unknown_tunnel_test_connectivity_errors() {
        let mgr = IrrProxyManager::new(vec![]);
        assert!(matches!(mgr.test_connectivity("nope"), Err(ProxyError::UnknownTunnel(_))));
    }

    #[test]
    fn irr_server_override_is_none_until_connected() {
        let mgr = IrrProxyManager::new(vec![config("radb")]);
        assert_eq!(mgr.irr_server_override("radb"), None);
    }
}
