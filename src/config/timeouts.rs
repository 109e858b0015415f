//! Centralized, environment-overridable timeout configuration.
//!
//! Every bounded operation in the crate reads its timeout through here instead of hard-coding
//! a `Duration` inline, so operators can retune without a rebuild, and the 5-minute cache
//! refresh lets edits to the environment take effect without a process restart.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    Process,
    ThreadPool,
    Network,
    File,
    Batch,
    Rpki,
    Ssh,
    Netconf,
}

struct TimeoutSpec {
    default: f64,
    min: f64,
    max: f64,
    env_var: &'static str,
}

const SPECS: &[(TimeoutKind, TimeoutSpec)] = &[
    (
        TimeoutKind::Process,
        TimeoutSpec { default: 30.0, min: 5.0, max: 300.0, env_var: "OTTO_BGP_PROCESS_TIMEOUT" },
    ),
    (
        TimeoutKind::ThreadPool,
        TimeoutSpec { default: 60.0, min: 10.0, max: 600.0, env_var: "OTTO_BGP_THREAD_TIMEOUT" },
    ),
    (
        TimeoutKind::Network,
        TimeoutSpec { default: 10.0, min: 2.0, max: 60.0, env_var: "OTTO_BGP_NETWORK_TIMEOUT" },
    ),
    (
        TimeoutKind::File,
        TimeoutSpec { default: 30.0, min: 5.0, max: 300.0, env_var: "OTTO_BGP_FILE_TIMEOUT" },
    ),
    (
        TimeoutKind::Batch,
        TimeoutSpec { default: 300.0, min: 60.0, max: 1800.0, env_var: "OTTO_BGP_BATCH_TIMEOUT" },
    ),
    (
        TimeoutKind::Rpki,
        TimeoutSpec { default: 120.0, min: 30.0, max: 600.0, env_var: "OTTO_BGP_RPKI_TIMEOUT" },
    ),
    (
        TimeoutKind::Ssh,
        TimeoutSpec { default: 15.0, min: 5.0, max: 60.0, env_var: "OTTO_BGP_SSH_TIMEOUT" },
    ),
    (
        TimeoutKind::Netconf,
        TimeoutSpec { default: 45.0, min: 10.0, max: 300.0, env_var: "OTTO_BGP_NETCONF_TIMEOUT" },
    ),
];

fn spec_for(kind: TimeoutKind) -> &'static TimeoutSpec {
    &SPECS.iter().find(|(k, _)| *k == kind).expect("every TimeoutKind has a spec").1
}

fn resolve(spec: &TimeoutSpec) -> f64 {
    match std::env::var(spec.env_var) {
        Ok(raw) => match raw.parse::<f64>() {
            Ok(value) if value < spec.min => {
                warn!(env_var = spec.env_var, value, minimum = spec.min, "timeout below minimum, clamping");
                spec.min
            }
            Ok(value) if value > spec.max => {
                warn!(env_var = spec.env_var, value, maximum = spec.max, "timeout above maximum, clamping");
                spec.max
            }
            Ok(value) => value,
            Err(_) => {
                warn!(env_var = spec.env_var, raw, "invalid timeout value, using default");
                spec.default
            }
        },
        Err(_) => spec.default,
    }
}

const CACHE_TTL: Duration = Duration::from_secs(300);

struct Cache {
    values: HashMap<TimeoutKind, f64>,
    loaded_at: Instant,
}

/// Process-wide timeout manager, refreshed every 5 minutes so edits to the environment take
/// effect without a restart.
pub struct TimeoutManager {
    cache: Mutex<Cache>,
}

static INSTANCE: OnceLock<TimeoutManager> = OnceLock::new();

impl TimeoutManager {
    fn new() -> Self {
        Self { cache: Mutex::new(Cache { values: HashMap::new(), loaded_at: Instant::now() }) }
    }

    /// Returns the process-wide singleton, initializing it on first access.
    pub fn global() -> &'static TimeoutManager {
        INSTANCE.get_or_init(Self::new)
    }

    pub fn get(&self, kind: TimeoutKind) -> Duration {
        let mut cache = self.cache.lock().unwrap();
        if cache.loaded_at.elapsed() > CACHE_TTL {
            cache.values.clear();
            cache.loaded_at = Instant::now();
        }
        let value = *cache.values.entry(kind).or_insert_with(|| {
            let v = resolve(spec_for(kind));
            debug!(?kind, seconds = v, "loaded timeout");
            v
        });
        Duration::from_secs_f64(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // run in isolation from other env-mutating tests; the manager is process-global
        std::env::remove_var("OTTO_BGP_SSH_TIMEOUT");
        assert_eq!(TimeoutManager::new().get(TimeoutKind::Ssh), Duration::from_secs_f64(15.0));
    }

    #[test]
    fn clamps_out_of_range_value() {
        std::env::set_var("OTTO_BGP_NETWORK_TIMEOUT", "1000");
        let mgr = TimeoutManager::new();
        assert_eq!(mgr.get(TimeoutKind::Network), Duration::from_secs_f64(60.0));
        std::env::remove_var("OTTO_BGP_NETWORK_TIMEOUT");
    }

    #[test]
    fn falls_back_on_unparsable_value() {
        std::env::set_var("OTTO_BGP_PROCESS_TIMEOUT", "not-a-number");
        let mgr = TimeoutManager::new();
        assert_eq!(mgr.get(TimeoutKind::Process), Duration::from_secs_f64(30.0));
        std::env::remove_var("OTTO_BGP_PROCESS_TIMEOUT");
    }
}
