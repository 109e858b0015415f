//! Discovery reports (§6 "Generated artifacts"): CSV, JSON, and plain-text summaries of the
//! router/AS/BGP-group matrix, written to `reports/`.
//!
//! Grounded on the same "serialize a struct, write it out" shape `discovery::write_history_snapshot`
//! already uses for history snapshots, fanned out across the three formats spec.md §6 names.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::discovery::RouterProfile;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct JsonMetadata {
    generated_at: DateTime<Utc>,
    router_count: usize,
}

#[derive(Debug, Serialize)]
struct JsonRouter {
    hostname: String,
    address: String,
    role: Option<String>,
    region: Option<String>,
    as_numbers: Vec<u32>,
    bgp_groups: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Relationship {
    router: String,
    as_number: u32,
    bgp_group: Option<String>,
}

#[derive(Debug, Serialize)]
struct Statistics {
    total_routers: usize,
    total_as_numbers: usize,
    total_bgp_groups: usize,
    total_relationships: usize,
}

#[derive(Debug, Serialize)]
struct JsonReport {
    #[serde(rename = "_metadata")]
    metadata: JsonMetadata,
    routers: Vec<JsonRouter>,
    as_numbers: Vec<u32>,
    bgp_groups: Vec<String>,
    relationships: Vec<Relationship>,
    statistics: Statistics,
}

/// `Router, IP Address, Site, Role, AS Count, AS Numbers, BGP Groups` — one row per router.
pub fn write_csv(path: &Path, profiles: &[RouterProfile]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Router", "IP Address", "Site", "Role", "AS Count", "AS Numbers", "BGP Groups"])?;
    for profile in profiles {
        let as_numbers = join_sorted(profile.discovered_as_numbers.iter().map(|a| a.to_string()));
        let bgp_groups = profile.bgp_groups.keys().cloned().collect::<Vec<_>>().join(";");
        writer.write_record([
            profile.hostname.as_str(),
            profile.address.as_str(),
            profile.region.as_deref().unwrap_or(""),
            profile.role.as_deref().unwrap_or(""),
            &profile.discovered_as_numbers.len().to_string(),
            &as_numbers,
            &bgp_groups,
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn join_sorted(values: impl Iterator<Item = String>) -> String {
    values.collect::<Vec<_>>().join(";")
}

/// Full matrix: `_metadata`, `routers`, `as_numbers`, `bgp_groups`, `relationships`, `statistics`.
pub fn write_json(path: &Path, profiles: &[RouterProfile], now: DateTime<Utc>) -> Result<(), ReportError> {
    let mut all_as_numbers: BTreeSet<u32> = BTreeSet::new();
    let mut all_groups: BTreeSet<String> = BTreeSet::new();
    let mut relationships = Vec::new();
    let mut routers = Vec::with_capacity(profiles.len());

    for profile in profiles {
        all_as_numbers.extend(profile.discovered_as_numbers.iter().copied());
        all_groups.extend(profile.bgp_groups.keys().cloned());

        let mut grouped: BTreeSet<u32> = BTreeSet::new();
        for (group_name, members) in &profile.bgp_groups {
            for &as_number in members {
                grouped.insert(as_number);
                relationships.push(Relationship { router: profile.hostname.clone(), as_number, bgp_group: Some(group_name.clone()) });
            }
        }
        for &as_number in profile.discovered_as_numbers.difference(&grouped) {
            relationships.push(Relationship { router: profile.hostname.clone(), as_number, bgp_group: None });
        }

        routers.push(JsonRouter {
            hostname: profile.hostname.clone(),
            address: profile.address.clone(),
            role: profile.role.clone(),
            region: profile.region.clone(),
            as_numbers: profile.discovered_as_numbers.iter().copied().collect(),
            bgp_groups: profile.bgp_groups.keys().cloned().collect(),
        });
    }

    let report = JsonReport {
        metadata: JsonMetadata { generated_at: now, router_count: profiles.len() },
        as_numbers: all_as_numbers.into_iter().collect(),
        statistics: Statistics {
            total_routers: profiles.len(),
            total_as_numbers: routers.iter().map(|r| r.as_numbers.len()).sum::<usize>(),
            total_bgp_groups: all_groups.len(),
            total_relationships: relationships.len(),
        },
        bgp_groups: all_groups.into_iter().collect(),
        routers,
        relationships,
    };

    std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

/// Plain-text human-readable summary, one paragraph per router.
pub fn write_text(path: &Path, profiles: &[RouterProfile], now: DateTime<Utc>) -> Result<(), ReportError> {
    let mut out = String::new();
    out.push_str(&format!("Otto BGP discovery summary — generated {now}\n"));
    out.push_str(&format!("{} router(s)\n\n", profiles.len()));
    for profile in profiles {
        out.push_str(&format!("{} ({})\n", profile.hostname, profile.address));
        if let Some(region) = &profile.region {
            out.push_str(&format!("  region: {region}\n"));
        }
        if let Some(role) = &profile.role {
            out.push_str(&format!("  role: {role}\n"));
        }
        out.push_str(&format!("  AS numbers ({}): {}\n", profile.discovered_as_numbers.len(), join_sorted(profile.discovered_as_numbers.iter().map(|a| a.to_string()))));
        if !profile.bgp_groups.is_empty() {
            out.push_str("  BGP groups:\n");
            for (name, members) in &profile.bgp_groups {
                out.push_str(&format!("    {name}: {}\n", join_sorted(members.iter().map(|a| a.to_string()))));
            }
        }
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Writes all three report formats under `dir` (`discovery.csv`, `discovery.json`,
/// `discovery_summary.txt`), creating `dir` if necessary.
pub fn generate_all(dir: &Path, profiles: &[RouterProfile], now: DateTime<Utc>) -> Result<(), ReportError> {
    std::fs::create_dir_all(dir)?;
    write_csv(&dir.join("discovery.csv"), profiles)?;
    write_json(&dir.join("discovery.json"), profiles, now)?;
    write_text(&dir.join("discovery_summary.txt"), profiles, now)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::collections::BTreeSet;

    fn profile() -> RouterProfile {
        let mut bgp_groups = IndexMap::new();
        bgp_groups.insert("CUSTOMERS".to_string(), vec![65001, 65002]);
        RouterProfile {
            hostname: "r1".to_string(),
            address: "10.0.0.1".to_string(),
            discovered_as_numbers: BTreeSet::from([65001, 65002, 65003]),
            bgp_groups,
            platform: Some("junos".to_string()),
            role: Some("edge".to_string()),
            region: Some("us-east".to_string()),
            last_confirmed: Utc::now(),
        }
    }

    #[test]
    fn csv_report_contains_header_and_one_row_per_router() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.csv");
        write_csv(&path, &[profile()]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("Router,IP Address,Site,Role,AS Count,AS Numbers,BGP Groups"));
        assert!(contents.contains("r1,10.0.0.1,us-east,edge,3"));
    }

    #[test]
    fn json_report_has_metadata_and_per_router_relationships() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.json");
        write_json(&path, &[profile()], Utc::now()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["_metadata"]["router_count"], 1);
        assert_eq!(value["statistics"]["total_relationships"], 3);
        assert_eq!(value["as_numbers"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn text_report_lists_router_and_as_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        write_text(&path, &[profile()], Utc::now()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("r1 (10.0.0.1)"));
        assert!(contents.contains("65001;65002;65003"));
    }

    #[test]
    fn generate_all_writes_three_files() {
        let dir = tempfile::tempdir().unwrap();
        generate_all(dir.path(), &[profile()], Utc::now()).unwrap();
        assert!(dir.path().join("discovery.csv").exists());
        assert!(dir.path().join("discovery.json").exists());
        assert!(dir.path().join("discovery_summary.txt").exists());
    }
}
