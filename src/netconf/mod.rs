//! NETCONF applier (C12): drives the connect/lock/load/diff/confirmed-commit/confirm-or-rollback
//! lifecycle against Juniper devices over an `ssh2` `netconf` subsystem channel.
//!
//! Uses the same `ssh2::Session`-over-`TcpStream` connect shape as the SSH collector for the
//! transport, with a lock/load/diff/confirmed-commit/confirm lifecycle and typed errors.
//! Framing uses the NETCONF 1.0 `]]>]]>` end-of-message marker; reply bytes are read
//! line-delimited, the same way the process runner reads `bgpq4` output.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::ssh::collector::{Auth, Device};

const EOM: &str = "]]>]]>";
const DEFAULT_CONFIRM_WINDOW: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum NetconfError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to lock {datastore}: {reason}")]
    Lock { datastore: &'static str, reason: String },

    #[error("failed to load candidate configuration: {0}")]
    Load(String),

    #[error("failed to compute diff: {0}")]
    Diff(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("confirmation window elapsed without an explicit confirm; device will auto-rollback")]
    ConfirmTimeout,

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    Candidate,
}

impl Datastore {
    fn name(self) -> &'static str {
        match self {
            Datastore::Candidate => "candidate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffFormat {
    Text,
    Set,
    Xml,
}

/// Testability seam: a transport that can send a framed RPC and read a framed reply. The
/// production implementation wraps a real `ssh2::Channel` on the `netconf` subsystem.
pub trait NetconfTransport: Send {
    fn send_rpc(&mut self, xml: &str) -> Result<(), NetconfError>;
    fn read_reply(&mut self) -> Result<String, NetconfError>;
}

pub struct Ssh2NetconfTransport {
    channel: ssh2::Channel,
}

impl Ssh2NetconfTransport {
    pub fn connect(device: &Device, username: &str, auth: &Auth, connect_timeout: Duration) -> Result<Self, NetconfError> {
        let addr = format!("{}:{}", device.address, device.port);
        let tcp = TcpStream::connect(&addr).map_err(|e| NetconfError::Connect(e.to_string()))?;
        tcp.set_read_timeout(Some(connect_timeout)).ok();

        let mut session = ssh2::Session::new().map_err(|e| NetconfError::Connect(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(connect_timeout.as_millis() as u32);
        session.handshake().map_err(|e| NetconfError::Connect(e.to_string()))?;

        match auth {
            Auth::Password(password) => session
                .userauth_password(username, password)
                .map_err(|e| NetconfError::Connect(e.to_string()))?,
            Auth::PrivateKey { path, passphrase } => session
                .userauth_pubkey_file(username, None, path, *passphrase)
                .map_err(|e| NetconfError::Connect(e.to_string()))?,
        }
        if !session.authenticated() {
            return Err(NetconfError::Connect("authentication failed".to_string()));
        }

        let mut channel = session.channel_session().map_err(|e| NetconfError::Connect(e.to_string()))?;
        channel.subsystem("netconf").map_err(|e| NetconfError::Connect(e.to_string()))?;

        let mut hello = String::new();
        channel.read_to_string(&mut hello).ok();

        Ok(Self { channel })
    }
}

impl NetconfTransport for Ssh2NetconfTransport {
    fn send_rpc(&mut self, xml: &str) -> Result<(), NetconfError> {
        self.channel
            .write_all(format!("{xml}\n{EOM}\n").as_bytes())
            .map_err(|e| NetconfError::Transport(e.to_string()))
    }

    fn read_reply(&mut self) -> Result<String, NetconfError> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.channel.read(&mut chunk).map_err(|e| NetconfError::Transport(e.to_string()))?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.ends_with(EOM.as_bytes()) {
                break;
            }
        }
        let text = String::from_utf8_lossy(&buf).replace(EOM, "");
        Ok(text)
    }
}

/// Handle returned by [`NetconfSession::confirmed_commit`]: the caller must call `confirm()`
/// inside `window` or the device rolls the commit back on its own.
pub struct ConfirmWindow {
    tx: mpsc::Sender<()>,
    rx: mpsc::Receiver<()>,
    window: Duration,
}

impl ConfirmWindow {
    fn new(window: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx, window }
    }

    pub fn confirm_handle(&self) -> mpsc::Sender<()> {
        self.tx.clone()
    }

    /// Blocks until either a confirmation arrives or the window elapses.
    pub fn wait(&self) -> Result<(), NetconfError> {
        match self.rx.recv_timeout(self.window) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(NetconfError::ConfirmTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(NetconfError::ConfirmTimeout),
        }
    }
}

/// Drives one device through the full lifecycle. Every method releases resources on its own
/// error path; [`NetconfSession::close`] (also run on `Drop`) guarantees the lock and session
/// are released even when the caller abandons the session mid-flow.
pub struct NetconfSession<T: NetconfTransport> {
    transport: T,
    locked: bool,
    hostname: String,
}

impl<T: NetconfTransport> NetconfSession<T> {
    pub fn new(transport: T, hostname: impl Into<String>) -> Self {
        Self { transport, locked: false, hostname: hostname.into() }
    }

    pub fn lock(&mut self, datastore: Datastore) -> Result<(), NetconfError> {
        let rpc = format!(r#"<rpc><lock><target><{ds}/></target></lock></rpc>"#, ds = datastore.name());
        self.transport.send_rpc(&rpc)?;
        let reply = self.transport.read_reply()?;
        if reply.contains("<rpc-error>") {
            return Err(NetconfError::Lock { datastore: datastore.name(), reason: reply });
        }
        self.locked = true;
        info!(hostname = %self.hostname, "configuration locked");
        Ok(())
    }

    pub fn load_candidate(&mut self, config_text: &str) -> Result<(), NetconfError> {
        let rpc = format!(
            r#"<rpc><edit-config><target><candidate/></target><default-operation>merge</default-operation><config>{config_text}</config></edit-config></rpc>"#
        );
        self.transport.send_rpc(&rpc)?;
        let reply = self.transport.read_reply()?;
        if reply.contains("<rpc-error>") {
            return Err(NetconfError::Load(reply));
        }
        Ok(())
    }

    pub fn diff(&mut self, format: DiffFormat) -> Result<String, NetconfError> {
        let format_attr = match format {
            DiffFormat::Text => "text",
            DiffFormat::Set => "set",
            DiffFormat::Xml => "xml",
        };
        let rpc = format!(
            r#"<rpc><get-configuration compare="rollback" format="{format_attr}"/></rpc>"#
        );
        self.transport.send_rpc(&rpc)?;
        let reply = self.transport.read_reply()?;
        if reply.contains("<rpc-error>") {
            return Err(NetconfError::Diff(reply));
        }
        Ok(reply)
    }

    /// Sends `<commit-confirmed>` with `window` as the rollback timer, returning a
    /// [`ConfirmWindow`] the caller must `.wait()` on (after an explicit `.confirm_handle().send(())`
    /// on success, or skipping straight to [`Self::rollback`] on failure).
    pub fn confirmed_commit(&mut self, window: Option<Duration>) -> Result<ConfirmWindow, NetconfError> {
        let window = window.unwrap_or(DEFAULT_CONFIRM_WINDOW);
        let rpc = format!(
            r#"<rpc><commit-configuration><confirmed/><confirm-timeout>{}</confirm-timeout></commit-configuration></rpc>"#,
            window.as_secs()
        );
        self.transport.send_rpc(&rpc)?;
        let reply = self.transport.read_reply()?;
        if reply.contains("<rpc-error>") {
            return Err(NetconfError::Commit(reply));
        }
        Ok(ConfirmWindow::new(window))
    }

    pub fn confirm(&mut self) -> Result<(), NetconfError> {
        self.transport.send_rpc(r#"<rpc><commit-configuration/></rpc>"#)?;
        let reply = self.transport.read_reply()?;
        if reply.contains("<rpc-error>") {
            return Err(NetconfError::Commit(reply));
        }
        info!(hostname = %self.hostname, "commit confirmed");
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), NetconfError> {
        self.transport.send_rpc(r#"<rpc><discard-changes/></rpc>"#)?;
        let reply = self.transport.read_reply()?;
        warn!(hostname = %self.hostname, "rolled back candidate configuration");
        if reply.contains("<rpc-error>") {
            return Err(NetconfError::Commit(reply));
        }
        Ok(())
    }

    pub fn unlock(&mut self, datastore: Datastore) -> Result<(), NetconfError> {
        let rpc = format!(r#"<rpc><unlock><target><{ds}/></target></unlock></rpc>"#, ds = datastore.name());
        self.transport.send_rpc(&rpc)?;
        let reply = self.transport.read_reply()?;
        self.locked = false;
        if reply.contains("<rpc-error>") {
            return Err(NetconfError::Lock { datastore: datastore.name(), reason: reply });
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if self.locked {
            let _ = self.unlock(Datastore::Candidate);
        }
    }
}

impl<T: NetconfTransport> Drop for NetconfSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeTransport {
        replies: VecDeque<String>,
        sent: Vec<String>,
    }

    impl NetconfTransport for FakeTransport {
        fn send_rpc(&mut self, xml: &str) -> Result<(), NetconfError> {
            self.sent.push(xml.to_string());
            Ok(())
        }
        fn read_reply(&mut self) -> Result<String, NetconfError> {
            Ok(self.replies.pop_front().unwrap_or_else(|| "<rpc-reply><ok/></rpc-reply>".to_string()))
        }
    }

    fn ok_transport(n: usize) -> FakeTransport {
        FakeTransport { replies: (0..n).map(|_| "<rpc-reply><ok/></rpc-reply>".to_string()).collect(), sent: Vec::new() }
    }

    #[test]
    fn lock_load_diff_commit_unlock_happy_path() {
        let mut session = NetconfSession::new(ok_transport(5), "r1");
        session.lock(Datastore::Candidate).unwrap();
        session.load_candidate("<configuration/>").unwrap();
        session.diff(DiffFormat::Text).unwrap();
        let window = session.confirmed_commit(Some(Duration::from_millis(50))).unwrap();
        window.confirm_handle().send(()).unwrap();
        window.wait().unwrap();
        session.confirm().unwrap();
        session.unlock(Datastore::Candidate).unwrap();
    }

    #[test]
    fn lock_error_is_surfaced_as_lock_variant() {
        let mut transport = ok_transport(1);
        transport.replies[0] = "<rpc-reply><rpc-error/></rpc-reply>".to_string();
        let mut session = NetconfSession::new(transport, "r1");
        let err = session.lock(Datastore::Candidate).unwrap_err();
        assert!(matches!(err, NetconfError::Lock { .. }));
    }

    #[test]
    fn unconfirmed_commit_times_out() {
        let mut session = NetconfSession::new(ok_transport(1), "r1");
        let window = session.confirmed_commit(Some(Duration::from_millis(20))).unwrap();
        let err = window.wait().unwrap_err();
        assert!(matches!(err, NetconfError::ConfirmTimeout));
    }

    #[test]
    fn close_unlocks_if_still_locked() {
        let mut session = NetconfSession::new(ok_transport(2), "r1");
        session.lock(Datastore::Candidate).unwrap();
        session.close();
        assert!(!session.locked);
    }
}
