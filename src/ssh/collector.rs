//! SSH collector (C2): a bounded worker pool that runs read-only show commands against a
//! fleet of routers concurrently.
//!
//! Worker-thread-plus-channel pool topology: one OS thread per in-flight unit of work, results
//! returned over an `event::channel` publisher/consumer pair, cooperative cancellation through
//! [`crate::context::Ctx`].

use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::context::{ContextDefault, Ctx};
use crate::event::channel::pub_sub;
use crate::ssh::host_keys::{HostKeyError, HostKeyStore};

/// The two show-command shapes the collector issues. The router inspector operates on
/// `FullBgpConfig` output; `LegacyPeerAsFilter` is retained for the legacy batch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectCommand {
    FullBgpConfig,
    LegacyPeerAsFilter,
}

impl CollectCommand {
    pub fn text(self) -> &'static str {
        match self {
            CollectCommand::FullBgpConfig => "show configuration protocols bgp",
            CollectCommand::LegacyPeerAsFilter => {
                "show configuration protocols bgp group CUSTOMERS | match peer-as"
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Device {
    pub hostname: String,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DeviceResult {
    pub device: Device,
    pub text: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("host key error: {0}")]
    HostKey(#[from] HostKeyError),

    #[error("ssh transport error: {0}")]
    Transport(String),

    #[error("ssh authentication failed")]
    Authentication,

    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("collection was cancelled")]
    Cancelled,
}

pub enum Auth<'a> {
    Password(&'a str),
    PrivateKey { path: &'a std::path::Path, passphrase: Option<&'a str> },
}

#[derive(Clone)]
pub struct CollectorConfig {
    pub username: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub max_workers: usize,
}

/// Trait seam so the orchestrator and tests can substitute a fake transport instead of real
/// `ssh2` sessions; the production implementation lives in [`Ssh2Session`].
pub trait SshSession: Send {
    fn connect(
        host_keys: &mut HostKeyStore,
        device: &Device,
        username: &str,
        auth: &Auth,
        connect_timeout: Duration,
    ) -> Result<Self, CollectorError>
    where
        Self: Sized;

    fn exec(&mut self, command: &str, timeout: Duration) -> Result<String, CollectorError>;
}

/// Real `ssh2`-backed session used in production.
pub struct Ssh2Session {
    session: ssh2::Session,
}

impl SshSession for Ssh2Session {
    fn connect(
        host_keys: &mut HostKeyStore,
        device: &Device,
        username: &str,
        auth: &Auth,
        connect_timeout: Duration,
    ) -> Result<Self, CollectorError> {
        let addr = format!("{}:{}", device.address, device.port);
        let tcp = TcpStream::connect(&addr).map_err(|e| CollectorError::Transport(e.to_string()))?;
        tcp.set_read_timeout(Some(connect_timeout)).ok();

        let mut session = ssh2::Session::new().map_err(|e| CollectorError::Transport(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(connect_timeout.as_millis() as u32);
        session.handshake().map_err(|e| CollectorError::Transport(e.to_string()))?;

        {
            let (key_base64, key_type) = session
                .host_key()
                .map(|(key, kind)| (base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key), format!("{kind:?}")))
                .ok_or_else(|| CollectorError::Transport("no host key offered".to_string()))?;
            host_keys.verify_or_learn(&device.hostname, &key_type, &key_base64)?;
        }

        match auth {
            Auth::Password(password) => session
                .userauth_password(username, password)
                .map_err(|_| CollectorError::Authentication)?,
            Auth::PrivateKey { path, passphrase } => session
                .userauth_pubkey_file(username, None, path, *passphrase)
                .map_err(|_| CollectorError::Authentication)?,
        }

        if !session.authenticated() {
            return Err(CollectorError::Authentication);
        }

        Ok(Self { session })
    }

    fn exec(&mut self, command: &str, timeout: Duration) -> Result<String, CollectorError> {
        self.session.set_timeout(timeout.as_millis() as u32);
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| CollectorError::Transport(e.to_string()))?;
        channel.exec(command).map_err(|e| CollectorError::Transport(e.to_string()))?;
        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| CollectorError::CommandTimeout(timeout).into_transport_or(e))?;
        channel.wait_close().ok();
        Ok(output)
    }
}

// Small helper so a read-timeout IO error surfaces as CommandTimeout while other IO errors
// keep their message, without duplicating the match at every call site.
trait IntoTransportOr {
    fn into_transport_or(self, e: std::io::Error) -> CollectorError;
}
impl IntoTransportOr for CollectorError {
    fn into_transport_or(self, e: std::io::Error) -> CollectorError {
        if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) {
            self
        } else {
            CollectorError::Transport(e.to_string())
        }
    }
}

/// Runs `command` against every device in `devices` using a bounded worker pool, returning one
/// [`DeviceResult`] per device in input order. Per-device failures never fail the pool; only
/// cancellation (`ctx.is_cancelled()`) stops work early.
pub fn collect_all<S: SshSession + 'static>(
    devices: Vec<Device>,
    command: CollectCommand,
    config: CollectorConfig,
    host_keys: Arc<std::sync::Mutex<HostKeyStore>>,
    auth: impl Fn() -> Auth<'static> + Send + Sync + 'static,
    ctx: ContextDefault,
) -> Vec<DeviceResult> {
    let workers = config.max_workers.clamp(1, devices.len().max(1));
    let (publisher, consumer) = pub_sub::<(usize, DeviceResult)>();
    let next_index = Arc::new(AtomicUsize::new(0));
    let devices = Arc::new(devices);
    let auth = Arc::new(auth);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let devices = Arc::clone(&devices);
        let next_index = Arc::clone(&next_index);
        let publisher = publisher.clone();
        let host_keys = Arc::clone(&host_keys);
        let auth = Arc::clone(&auth);
        let ctx = ctx.clone();
        let config = config.clone();

        handles.push(std::thread::spawn(move || loop {
            if ctx.is_cancelled() {
                return;
            }
            let idx = next_index.fetch_add(1, Ordering::SeqCst);
            let Some(device) = devices.get(idx) else { return };

            let result = collect_one::<S>(device, command, &config, &host_keys, auth.as_ref());
            publisher.publish((idx, result));
        }));
    }
    drop(publisher);

    for handle in handles {
        let _ = handle.join();
    }

    let mut results: Vec<Option<DeviceResult>> = (0..devices.len()).map(|_| None).collect();
    while let Ok((idx, result)) = consumer.as_ref().try_recv() {
        results[idx] = Some(result);
    }

    results
        .into_iter()
        .enumerate()
        .map(|(idx, r)| {
            r.unwrap_or_else(|| DeviceResult {
                device: devices[idx].clone(),
                text: String::new(),
                success: false,
                error: Some("cancelled before collection".to_string()),
            })
        })
        .collect()
}

fn collect_one<S: SshSession>(
    device: &Device,
    command: CollectCommand,
    config: &CollectorConfig,
    host_keys: &Arc<std::sync::Mutex<HostKeyStore>>,
    auth: &(impl Fn() -> Auth<'static> + ?Sized),
) -> DeviceResult {
    let run = || -> Result<String, CollectorError> {
        let a = auth();
        let mut keys = host_keys.lock().unwrap();
        let mut session =
            S::connect(&mut keys, device, &config.username, &a, config.connect_timeout)?;
        drop(keys);
        session.exec(command.text(), config.command_timeout)
    };

    match run() {
        Ok(text) => {
            debug!(hostname = %device.hostname, "collected bgp config");
            DeviceResult { device: device.clone(), text, success: true, error: None }
        }
        Err(e) => {
            warn!(hostname = %device.hostname, error = %e, "collection failed");
            DeviceResult { device: device.clone(), text: String::new(), success: false, error: Some(e.to_string()) }
        }
    }
}

/// Clamps the configured worker count to `[1, len(devices)]`, default 5.
pub fn clamp_workers(configured: usize, device_count: usize) -> usize {
    configured.clamp(1, device_count.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_workers_bounds_to_device_count() {
        assert_eq!(clamp_workers(5, 2), 2);
        assert_eq!(clamp_workers(5, 50), 5);
        assert_eq!(clamp_workers(0, 50), 1);
    }

    struct FakeSession {
        response: String,
    }

    impl SshSession for FakeSession {
        fn connect(
            _host_keys: &mut HostKeyStore,
            device: &Device,
            _username: &str,
            _auth: &Auth,
            _connect_timeout: Duration,
        ) -> Result<Self, CollectorError> {
            if device.hostname == "unreachable" {
                return Err(CollectorError::Transport("refused".to_string()));
            }
            Ok(Self { response: format!("config for {}", device.hostname) })
        }

        fn exec(&mut self, _command: &str, _timeout: Duration) -> Result<String, CollectorError> {
            Ok(self.response.clone())
        }
    }

    #[test]
    fn collect_all_preserves_input_order_and_isolates_failures() {
        let devices = vec![
            Device { hostname: "r1".into(), address: "10.0.0.1".into(), port: 22 },
            Device { hostname: "unreachable".into(), address: "10.0.0.2".into(), port: 22 },
            Device { hostname: "r3".into(), address: "10.0.0.3".into(), port: 22 },
        ];
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("known_hosts"), "").unwrap();
        let store = HostKeyStore::load(&dir.path().join("known_hosts"), crate::ssh::host_keys::Mode::Setup).unwrap();

        let results = collect_all::<FakeSession>(
            devices,
            CollectCommand::FullBgpConfig,
            CollectorConfig {
                username: "otto".into(),
                connect_timeout: Duration::from_secs(1),
                command_timeout: Duration::from_secs(1),
                max_workers: 2,
            },
            Arc::new(std::sync::Mutex::new(store)),
            || Auth::Password("unused"),
            ContextDefault::new(),
        );

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].device.hostname, "r1");
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
        assert_eq!(results[2].text, "config for r3");
    }
}
