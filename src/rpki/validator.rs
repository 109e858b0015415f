//! RPKI validator (C8): VRP-covering lookups backed by an `ipnet_trie::IpnetTrie` snapshot.
//!
//! Covering-prefix trie lookup derives VALID/INVALID/NOTFOUND state; a separate preflight check
//! enforces snapshot presence and max age before any query runs.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ipnet::IpNet;
use ipnet_trie::IpnetTrie;
use thiserror::Error;
use tracing::{error, warn};

use crate::context::{ContextDefault, Ctx};
use crate::rpki::model::{AggregateSummary, ValidationResult, ValidationState, Vrp};
use crate::rpki::overrides::OverrideStore;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("VRP snapshot not found at {0}")]
    SnapshotMissing(PathBuf),

    #[error("VRP snapshot is stale: age {age_hours}h exceeds max_vrp_age_hours {max_age_hours}h")]
    SnapshotStale { age_hours: u64, max_age_hours: u64 },

    #[error("failed to read VRP snapshot: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse VRP snapshot: {0}")]
    Parse(String),

    #[error("override store error: {0}")]
    Override(#[from] crate::rpki::overrides::OverrideError),
}

/// Preflight result: `Ok(())` when the snapshot is present and fresh enough to validate
/// against; `Err` carries whether the caller must refuse to continue (fail-closed).
pub fn preflight(snapshot_path: &Path, max_age: Duration, now: SystemTime) -> Result<(), ValidatorError> {
    let metadata = std::fs::metadata(snapshot_path).map_err(|_| ValidatorError::SnapshotMissing(snapshot_path.to_path_buf()))?;
    let modified = metadata.modified()?;
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    if age > max_age {
        return Err(ValidatorError::SnapshotStale { age_hours: age.as_secs() / 3600, max_age_hours: max_age.as_secs() / 3600 });
    }
    Ok(())
}

/// An immutable, loaded VRP snapshot. Every worker thread in a chunked evaluation reads the
/// same `Arc<VrpSnapshot>` concurrently -- no interior mutability needed.
pub struct VrpSnapshot {
    trie: IpnetTrie<Vec<Vrp>>,
}

impl VrpSnapshot {
    pub fn from_vrps(vrps: Vec<Vrp>) -> Self {
        let mut trie: IpnetTrie<Vec<Vrp>> = IpnetTrie::new();
        for vrp in vrps {
            match trie.exact_match_mut(vrp.prefix) {
                Some(existing) => existing.push(vrp),
                None => {
                    trie.insert(vrp.prefix, vec![vrp]);
                }
            }
        }
        Self { trie }
    }

    /// Parses a VRP snapshot in the simple `prefix,origin_as,max_length` CSV-like shape used by
    /// `rpki-client`'s CSV output mode.
    pub fn load_csv(path: &Path) -> Result<Self, ValidatorError> {
        let text = std::fs::read_to_string(path)?;
        let mut vrps = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("ASN") || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 3 {
                return Err(ValidatorError::Parse(format!("line {lineno}: expected 3 fields, got {}", fields.len())));
            }
            let origin_as: u32 = fields[0]
                .trim_start_matches("AS")
                .parse()
                .map_err(|_| ValidatorError::Parse(format!("line {lineno}: bad AS number")))?;
            let prefix: IpNet = fields[1].parse().map_err(|_| ValidatorError::Parse(format!("line {lineno}: bad prefix")))?;
            let max_length: u8 = fields[2].parse().map_err(|_| ValidatorError::Parse(format!("line {lineno}: bad max length")))?;
            vrps.push(Vrp { prefix, origin_as, max_length });
        }
        Ok(Self::from_vrps(vrps))
    }

    /// Covering VRPs for `prefix`: every trie entry whose prefix contains it.
    fn covering(&self, prefix: &IpNet) -> Vec<Vrp> {
        let mut matches = Vec::new();
        for (candidate, vrps) in self.trie.matches(prefix) {
            if candidate.contains(prefix) {
                matches.extend(vrps.iter().copied());
            }
        }
        matches
    }

    fn raw_state(&self, prefix: &IpNet, as_number: u32) -> (ValidationState, String) {
        let covering = self.covering(prefix);
        if covering.is_empty() {
            return (ValidationState::NotFound, "no covering VRP".to_string());
        }
        let sufficient = covering.iter().any(|v| v.origin_as == as_number && v.max_length >= prefix.prefix_len());
        if sufficient {
            (ValidationState::Valid, "covering VRP matches origin and max-length".to_string())
        } else {
            (ValidationState::Invalid, "covering VRP exists but origin/max-length mismatch".to_string())
        }
    }
}

/// `check(prefix, as_number)`, folding in override-store state.
pub fn check(snapshot: &VrpSnapshot, overrides: &OverrideStore, prefix: &IpNet, as_number: u32) -> Result<ValidationResult, ValidatorError> {
    if overrides.is_disabled(as_number)? {
        return Ok(ValidationResult {
            prefix: *prefix,
            as_number,
            state: ValidationState::NotFound,
            reason: "override: disabled".to_string(),
            allowlisted: false,
        });
    }

    let (mut state, mut reason) = snapshot.raw_state(prefix, as_number);
    let mut allowlisted = false;
    if state == ValidationState::Invalid && overrides.is_allowlisted(as_number)? {
        state = ValidationState::Valid;
        reason = "override: allowlisted".to_string();
        allowlisted = true;
    }
    Ok(ValidationResult { prefix: *prefix, as_number, state, reason, allowlisted })
}

/// Per-AS aggregate summary: evaluates every `(prefix, as_number)` pair and folds the results
/// in a single pass.
pub fn check_as(snapshot: &VrpSnapshot, overrides: &OverrideStore, prefixes: &[IpNet], as_number: u32) -> Result<AggregateSummary, ValidatorError> {
    let mut results = Vec::with_capacity(prefixes.len());
    for prefix in prefixes {
        results.push(check(snapshot, overrides, prefix, as_number)?);
    }
    Ok(AggregateSummary::from_results(&results))
}

/// Chunk sizing formula: `max(3, n/(4W))` for n<=50, `max(10, n/(2W))` for
/// n<=500, else `max(25, n/(3W))`. Sequential evaluation (a single chunk) is used for n<=10.
pub fn chunk_size(n: usize, workers: usize) -> usize {
    let w = workers.max(1);
    if n <= 10 {
        return n.max(1);
    }
    if n <= 50 {
        (n / (4 * w)).max(3)
    } else if n <= 500 {
        (n / (2 * w)).max(10)
    } else {
        (n / (3 * w)).max(25)
    }
}

/// Chunked parallel evaluation of many `(prefix, as_number)` pairs against one immutable
/// snapshot, preserving input order in the merged output.
pub fn check_many(
    snapshot: std::sync::Arc<VrpSnapshot>,
    overrides: std::sync::Arc<OverrideStore>,
    pairs: &[(IpNet, u32)],
    workers: usize,
    ctx: ContextDefault,
) -> Result<Vec<ValidationResult>, ValidatorError> {
    if pairs.len() <= 10 {
        let mut out = Vec::with_capacity(pairs.len());
        for (prefix, as_number) in pairs {
            out.push(check(&snapshot, &overrides, prefix, *as_number)?);
        }
        return Ok(out);
    }

    let size = chunk_size(pairs.len(), workers);
    let chunks: Vec<Vec<(IpNet, u32)>> = pairs.chunks(size).map(|c| c.to_vec()).collect();

    let mut handles = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let snapshot = std::sync::Arc::clone(&snapshot);
        let overrides = std::sync::Arc::clone(&overrides);
        let ctx = ctx.clone();
        handles.push(std::thread::spawn(move || -> Result<Vec<ValidationResult>, ValidatorError> {
            let mut out = Vec::with_capacity(chunk.len());
            for (prefix, as_number) in chunk {
                if ctx.is_cancelled() {
                    break;
                }
                out.push(check(&snapshot, &overrides, &prefix, as_number)?);
            }
            Ok(out)
        }));
    }

    let mut merged = Vec::with_capacity(pairs.len());
    for handle in handles {
        match handle.join() {
            Ok(Ok(mut chunk_results)) => merged.append(&mut chunk_results),
            Ok(Err(e)) => {
                error!(error = %e, "rpki chunk evaluation failed");
                return Err(e);
            }
            Err(_) => warn!("rpki validation worker panicked"),
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpki::overrides::OverrideStore;

    fn snapshot() -> VrpSnapshot {
        VrpSnapshot::from_vrps(vec![
            Vrp { prefix: "203.0.113.0/24".parse().unwrap(), origin_as: 65001, max_length: 24 },
            Vrp { prefix: "198.51.100.0/24".parse().unwrap(), origin_as: 65002, max_length: 24 },
        ])
    }

    #[test]
    fn valid_when_covering_vrp_matches_origin_and_length() {
        let snap = snapshot();
        let overrides = OverrideStore::open_in_memory().unwrap();
        let result = check(&snap, &overrides, &"203.0.113.0/24".parse().unwrap(), 65001).unwrap();
        assert_eq!(result.state, ValidationState::Valid);
    }

    #[test]
    fn invalid_when_covering_vrp_has_different_origin() {
        let snap = snapshot();
        let overrides = OverrideStore::open_in_memory().unwrap();
        let result = check(&snap, &overrides, &"203.0.113.0/24".parse().unwrap(), 65099).unwrap();
        assert_eq!(result.state, ValidationState::Invalid);
    }

    #[test]
    fn not_found_when_no_covering_vrp() {
        let snap = snapshot();
        let overrides = OverrideStore::open_in_memory().unwrap();
        let result = check(&snap, &overrides, &"192.0.2.0/24".parse().unwrap(), 65001).unwrap();
        assert_eq!(result.state, ValidationState::NotFound);
    }

    #[test]
    fn disabled_override_forces_not_found() {
        let snap = snapshot();
        let mut overrides = OverrideStore::open_in_memory().unwrap();
        overrides.disable(65001, "maintenance", "operator", None).unwrap();
        let result = check(&snap, &overrides, &"203.0.113.0/24".parse().unwrap(), 65001).unwrap();
        assert_eq!(result.state, ValidationState::NotFound);
        assert_eq!(result.reason, "override: disabled");
    }

    #[test]
    fn allowlist_flips_invalid_to_valid() {
        let snap = snapshot();
        let mut overrides = OverrideStore::open_in_memory().unwrap();
        overrides.disable(65099, "trusted peer", "operator", None).unwrap();
        overrides.enable(65099, "trusted peer", "operator", None).unwrap();
        let result = check(&snap, &overrides, &"203.0.113.0/24".parse().unwrap(), 65099).unwrap();
        assert_eq!(result.state, ValidationState::Valid);
        assert!(result.allowlisted);
    }

    #[test]
    fn chunk_size_matches_spec_formula() {
        assert_eq!(chunk_size(5, 4), 5);
        assert_eq!(chunk_size(40, 4), 3);
        assert_eq!(chunk_size(200, 4), 25);
        assert_eq!(chunk_size(1000, 4), 83);
    }
}
