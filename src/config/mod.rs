//! Static settings loaded from a YAML configuration file, layered under the environment-variable
//! timeout overrides in [`timeouts`]. Follows a load-a-YAML-file-into-a-serde-struct shape.

pub mod timeouts;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub use timeouts::{TimeoutKind, TimeoutManager};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, #[source] source: serde_yaml::Error },
}

/// Root settings document. Every field has a sensible production default so a completely
/// absent config file (the binary falls back to `Config::default()`) still runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ssh: SshConfig,
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
    pub rpki: RpkiConfig,
    pub rollout: RolloutConfig,
    pub guardrail: GuardrailConfig,
    pub irr_proxies: Vec<IrrProxyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh: SshConfig::default(),
            database: DatabaseConfig::default(),
            policy: PolicyConfig::default(),
            rpki: RpkiConfig::default(),
            rollout: RolloutConfig::default(),
            guardrail: GuardrailConfig::default(),
            irr_proxies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub known_hosts_path: PathBuf,
    pub setup_mode: bool,
    pub max_workers: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        let known_hosts_path = std::env::var("SSH_KNOWN_HOSTS")
            .unwrap_or_else(|_| "/var/lib/otto-bgp/ssh-keys/known_hosts".to_string())
            .into();
        let setup_mode = std::env::var("OTTO_BGP_SETUP_MODE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let max_workers = std::env::var("OTTO_BGP_SSH_MAX_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        Self { known_hosts_path, setup_mode, max_workers }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: std::env::var("OTTO_DB_PATH").unwrap_or_else(|_| "otto_bgp.db".to_string()).into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub bgpq4_path: String,
    pub default_ttl_hours: u32,
    pub min_as: u32,
    pub max_as: u32,
    pub strict_as_filtering: bool,
    pub batch_workers: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            bgpq4_path: "bgpq4".to_string(),
            default_ttl_hours: 24,
            min_as: 256,
            max_as: u32::MAX,
            strict_as_filtering: false,
            batch_workers: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpkiConfig {
    pub vrp_snapshot_path: PathBuf,
    pub max_vrp_age_hours: u64,
    pub fail_closed: bool,
    pub enabled: bool,
}

impl Default for RpkiConfig {
    fn default() -> Self {
        Self {
            vrp_snapshot_path: "/var/lib/otto-bgp/rpki/vrps.json".into(),
            max_vrp_age_hours: 24,
            fail_closed: true,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// `true` runs the autonomous decision rule (safe + low risk -> auto-apply); `false` always
    /// requires operator confirmation regardless of risk.
    pub autonomous: bool,
    pub prefix_count_threshold: usize,
    pub session_impact_threshold: usize,
    pub bogon_prefixes: Vec<String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            autonomous: false,
            prefix_count_threshold: 1000,
            session_impact_threshold: 500,
            bogon_prefixes: vec![
                "0.0.0.0/8".to_string(),
                "10.0.0.0/8".to_string(),
                "127.0.0.0/8".to_string(),
                "169.254.0.0/16".to_string(),
                "172.16.0.0/12".to_string(),
                "192.0.2.0/24".to_string(),
                "192.168.0.0/16".to_string(),
                "198.18.0.0/15".to_string(),
                "224.0.0.0/4".to_string(),
                "240.0.0.0/4".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub default_concurrency: usize,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self { default_concurrency: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IrrProxyConfig {
    pub name: String,
    pub jump_host: String,
    pub jump_port: u16,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl Config {
    /// Loads settings from `path`, falling back to an empty document (all defaults) when the
    /// file does not exist — this is a CLI convenience, not a silent error swallow: a present
    /// but unparsable file is still a `ConfigError`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        serde_yaml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/otto-bgp.yaml")).unwrap();
        assert_eq!(cfg.policy.min_as, 256);
    }

    #[test]
    fn parses_partial_yaml_with_defaults_for_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "policy:\n  min_as: 1000\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.policy.min_as, 1000);
        assert_eq!(cfg.rpki.max_vrp_age_hours, 24);
    }
}
