//! Host-key store (C1): a pre-distributed hostname -> public-key mapping.
//!
//! Strict mode rejects unknown hosts; setup mode records them on first contact. The file
//! format mirrors OpenSSH's `known_hosts` (`hostname key-type base64-key`) so operators can
//! manage it with familiar tooling; it is parsed by hand since no host-key-file crate fits.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Unknown hostnames are rejected outright.
    Strict,
    /// Unknown hostnames are learned and accepted once; later mismatches still reject.
    Setup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Match,
    Mismatch { expected_fingerprint: String, received_fingerprint: String },
    Unknown,
}

#[derive(Error, Debug)]
pub enum HostKeyError {
    #[error("production known_hosts file missing: {0}")]
    MissingInStrictMode(PathBuf),

    #[error("failed to read known_hosts file {path}: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to write known_hosts file {path}: {source}")]
    Write { path: PathBuf, #[source] source: std::io::Error },

    /// A SecurityError: always fatal, never silently upgraded.
    #[error("host key verification failed for {hostname}: key mismatch (possible MITM). expected {expected}, received {received}")]
    Mismatch { hostname: String, expected: String, received: String },

    #[error("host {0} is not in known_hosts and strict verification is enabled")]
    UnknownHostRejected(String),

    #[error("learn() called while store is in strict mode")]
    LearnInStrictMode,
}

#[derive(Debug, Clone)]
struct Entry {
    key_type: String,
    key_base64: String,
}

/// Base64 decoder tolerant of missing padding, since `known_hosts` entries in the wild are not
/// always padded consistently.
fn key_decode_engine() -> &'static GeneralPurpose {
    static ENGINE: OnceLock<GeneralPurpose> = OnceLock::new();
    ENGINE.get_or_init(|| {
        GeneralPurpose::new(&alphabet::STANDARD, GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent))
    })
}

/// Computes the `SHA256:<base64, unpadded>` fingerprint surfaced to operators, matching
/// `ssh-keygen -lf`: SHA-256 over the decoded key blob only, not the key-type prefix or its
/// base64 text.
pub fn fingerprint(_key_type: &str, key_base64: &str) -> String {
    let mut hasher = Sha256::new();
    match key_decode_engine().decode(key_base64) {
        Ok(raw) => hasher.update(&raw),
        Err(_) => hasher.update(key_base64.as_bytes()),
    }
    let digest = hasher.finalize();
    let b64 = base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest);
    format!("SHA256:{b64}")
}

pub struct HostKeyStore {
    path: PathBuf,
    mode: Mode,
    hosts: HashMap<String, Vec<Entry>>,
}

impl HostKeyStore {
    /// Loads `path` if present. In [`Mode::Strict`] a missing file is a hard `MissingInStrictMode`
    /// error: strict mode refuses to run without pre-distributed keys.
    pub fn load(path: &Path, mode: Mode) -> Result<Self, HostKeyError> {
        let mut hosts: HashMap<String, Vec<Entry>> = HashMap::new();

        if path.exists() {
            let text = fs::read_to_string(path)
                .map_err(|source| HostKeyError::Read { path: path.to_path_buf(), source })?;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let mut parts = line.splitn(3, char::is_whitespace);
                let (Some(host), Some(key_type), Some(key_base64)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    warn!(line, "skipping malformed known_hosts line");
                    continue;
                };
                hosts.entry(host.to_string()).or_default().push(Entry {
                    key_type: key_type.to_string(),
                    key_base64: key_base64.trim().to_string(),
                });
            }
            info!(hosts = hosts.len(), path = %path.display(), "loaded known_hosts");
        } else if mode == Mode::Strict {
            return Err(HostKeyError::MissingInStrictMode(path.to_path_buf()));
        } else {
            warn!(path = %path.display(), "known_hosts missing, running in setup mode");
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|source| HostKeyError::Write { path: path.to_path_buf(), source })?;
            }
        }

        Ok(Self { path: path.to_path_buf(), mode, hosts })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Verifies an offered key against the store. Never returns `Mismatch` without having
    /// found a recorded key for the host — a mismatch always names both fingerprints.
    pub fn verify(&self, hostname: &str, key_type: &str, key_base64: &str) -> Verification {
        match self.hosts.get(hostname) {
            Some(entries) => {
                for entry in entries {
                    if entry.key_type == key_type && entry.key_base64 == key_base64 {
                        return Verification::Match;
                    }
                }
                let expected_fingerprint = entries
                    .iter()
                    .map(|e| fingerprint(&e.key_type, &e.key_base64))
                    .collect::<Vec<_>>()
                    .join(", ");
                let received_fingerprint = fingerprint(key_type, key_base64);
                Verification::Mismatch { expected_fingerprint, received_fingerprint }
            }
            None => Verification::Unknown,
        }
    }

    /// Verifies and converts an `Unknown` result into a hard rejection in strict mode, or
    /// records-and-accepts it in setup mode. This is the single entry point callers (the SSH
    /// collector) should use instead of calling `verify`/`learn` separately.
    pub fn verify_or_learn(
        &mut self,
        hostname: &str,
        key_type: &str,
        key_base64: &str,
    ) -> Result<(), HostKeyError> {
        match self.verify(hostname, key_type, key_base64) {
            Verification::Match => Ok(()),
            Verification::Mismatch { expected_fingerprint, received_fingerprint } => {
                error!(hostname, expected_fingerprint, received_fingerprint, "host key mismatch");
                Err(HostKeyError::Mismatch {
                    hostname: hostname.to_string(),
                    expected: expected_fingerprint,
                    received: received_fingerprint,
                })
            }
            Verification::Unknown => match self.mode {
                Mode::Strict => {
                    error!(hostname, fingerprint = %fingerprint(key_type, key_base64), "unknown host rejected");
                    Err(HostKeyError::UnknownHostRejected(hostname.to_string()))
                }
                Mode::Setup => {
                    self.learn(hostname, key_type, key_base64)?;
                    Ok(())
                }
            },
        }
    }

    /// Allowed only in [`Mode::Setup`]; appends the key in-memory and persists the full file.
    pub fn learn(&mut self, hostname: &str, key_type: &str, key_base64: &str) -> Result<(), HostKeyError> {
        if self.mode == Mode::Strict {
            return Err(HostKeyError::LearnInStrictMode);
        }
        warn!(hostname, fingerprint = %fingerprint(key_type, key_base64), "learning new host key");
        self.hosts.entry(hostname.to_string()).or_default().push(Entry {
            key_type: key_type.to_string(),
            key_base64: key_base64.to_string(),
        });
        self.persist()
    }

    fn persist(&self) -> Result<(), HostKeyError> {
        let mut out = String::new();
        let mut hostnames: Vec<_> = self.hosts.keys().collect();
        hostnames.sort();
        for host in hostnames {
            for entry in &self.hosts[host] {
                out.push_str(host);
                out.push(' ');
                out.push_str(&entry.key_type);
                out.push(' ');
                out.push_str(&entry.key_base64);
                out.push('\n');
            }
        }
        fs::write(&self.path, out).map_err(|source| HostKeyError::Write { path: self.path.clone(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIGQ5example";
    const KEY_B: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIGQ5different";

    #[test]
    fn strict_mode_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let err = HostKeyStore::load(&path, Mode::Strict).unwrap_err();
        assert!(matches!(err, HostKeyError::MissingInStrictMode(_)));
    }

    #[test]
    fn strict_mode_rejects_unknown_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        fs::write(&path, "").unwrap();
        let mut store = HostKeyStore::load(&path, Mode::Strict).unwrap();
        let err = store.verify_or_learn("r1", "ssh-ed25519", KEY_A).unwrap_err();
        assert!(matches!(err, HostKeyError::UnknownHostRejected(h) if h == "r1"));
    }

    #[test]
    fn setup_mode_learns_unknown_host_then_strict_accepts_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");

        let mut setup = HostKeyStore::load(&path, Mode::Setup).unwrap();
        setup.verify_or_learn("r1", "ssh-ed25519", KEY_A).unwrap();

        let mut strict = HostKeyStore::load(&path, Mode::Strict).unwrap();
        strict.verify_or_learn("r1", "ssh-ed25519", KEY_A).unwrap();
    }

    #[test]
    fn mismatch_is_never_silently_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        fs::write(&path, format!("r1 ssh-ed25519 {KEY_A}\n")).unwrap();

        let mut store = HostKeyStore::load(&path, Mode::Setup).unwrap();
        let err = store.verify_or_learn("r1", "ssh-ed25519", KEY_B).unwrap_err();
        match err {
            HostKeyError::Mismatch { hostname, expected, received } => {
                assert_eq!(hostname, "r1");
                assert!(expected.starts_with("SHA256:"));
                assert!(received.starts_with("SHA256:"));
                assert_ne!(expected, received);
            }
            other => panic!("expected Mismatch, got {other:?}"),
        }
    }

    #[test]
    fn fingerprint_has_sha256_prefix_and_no_padding() {
        let fp = fingerprint("ssh-ed25519", KEY_A);
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.contains('='));
    }
}
