//! Per-router generated artifacts (§6): `routers/<sanitised-hostname>/AS<n>_policy.txt` files,
//! an optional combined-policy file, and a `metadata.json` sidecar.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::policy::generator::GenerateResult;
use crate::types::sanitize_hostname;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct RouterMetadata {
    hostname: String,
    safe_hostname: String,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    policies: Vec<String>,
    as_numbers: Vec<u32>,
}

/// Writes one `AS<n>_policy.txt` per successful generation result, an optional
/// `<hostname>_combined_policy.txt` (fragments concatenated with a separator line), and a
/// `metadata.json` recording which policy files exist and which AS numbers they cover.
///
/// Returns the router's artifact directory.
pub fn write_router_artifacts(
    routers_dir: &Path,
    hostname: &str,
    results: &[(u32, GenerateResult)],
    write_combined: bool,
    now: DateTime<Utc>,
) -> Result<PathBuf, ArtifactError> {
    let safe_hostname = sanitize_hostname(hostname);
    let dir = routers_dir.join(&safe_hostname);
    std::fs::create_dir_all(&dir)?;

    let mut policies = Vec::new();
    let mut as_numbers = Vec::new();
    let mut combined = String::new();

    for (as_number, result) in results {
        if !result.success {
            continue;
        }
        let filename = format!("AS{as_number}_policy.txt");
        std::fs::write(dir.join(&filename), &result.text)?;
        policies.push(filename);
        as_numbers.push(*as_number);

        if write_combined {
            if !combined.is_empty() {
                combined.push_str("\n! ---\n");
            }
            combined.push_str(&result.text);
        }
    }

    if write_combined && !combined.is_empty() {
        let combined_name = format!("{safe_hostname}_combined_policy.txt");
        std::fs::write(dir.join(&combined_name), &combined)?;
    }

    let metadata_path = dir.join("metadata.json");
    let created_at = match std::fs::read_to_string(&metadata_path) {
        Ok(existing) => serde_json::from_str::<RouterMetadata>(&existing).map(|m| m.created_at).unwrap_or(now),
        Err(_) => now,
    };
    let metadata = RouterMetadata { hostname: hostname.to_string(), safe_hostname, created_at, last_updated: now, policies, as_numbers };
    std::fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::generator::GenerateResult;

    fn ok_result(label: &str) -> GenerateResult {
        GenerateResult { target: label.to_string(), success: true, text: format!("policy-options {{ {label} }}"), error: None, from_cache: false }
    }

    #[test]
    fn writes_one_file_per_as_and_a_metadata_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let results = vec![(65001, ok_result("AS65001")), (65002, ok_result("AS65002"))];
        let artifact_dir = write_router_artifacts(dir.path(), "core/rtr:1", &results, true, Utc::now()).unwrap();

        assert!(artifact_dir.join("AS65001_policy.txt").exists());
        assert!(artifact_dir.join("AS65002_policy.txt").exists());
        assert!(artifact_dir.join("core-rtr-1_combined_policy.txt").exists());

        let metadata: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(artifact_dir.join("metadata.json")).unwrap()).unwrap();
        assert_eq!(metadata["hostname"], "core/rtr:1");
        assert_eq!(metadata["as_numbers"].as_array().unwrap().len(), 2);
        assert_eq!(metadata["policies"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn skips_failed_generation_results() {
        let dir = tempfile::tempdir().unwrap();
        let failed = GenerateResult { target: "AS65099".to_string(), success: false, text: String::new(), error: Some("not found".to_string()), from_cache: false };
        let artifact_dir = write_router_artifacts(dir.path(), "r1", &[(65099, failed)], true, Utc::now()).unwrap();
        assert!(!artifact_dir.join("AS65099_policy.txt").exists());
        let metadata: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(artifact_dir.join("metadata.json")).unwrap()).unwrap();
        assert!(metadata["as_numbers"].as_array().unwrap().is_empty());
    }

    #[test]
    fn preserves_created_at_across_repeated_writes() {
        let dir = tempfile::tempdir().unwrap();
        let first = Utc::now();
        write_router_artifacts(dir.path(), "r1", &[(65001, ok_result("AS65001"))], false, first).unwrap();

        let second = first + chrono::Duration::hours(1);
        let artifact_dir = write_router_artifacts(dir.path(), "r1", &[(65001, ok_result("AS65001"))], false, second).unwrap();
        let metadata: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(artifact_dir.join("metadata.json")).unwrap()).unwrap();
        assert_eq!(metadata["created_at"], first.to_rfc3339());
        assert_eq!(metadata["last_updated"], second.to_rfc3339());
    }
}
