//! Device inventory file loading: CSV with at least an `address` column and
//! optional `hostname, role, region` columns.
//!
//! Uses a "deserialize then validate" shape, adapted
//! to `csv`'s row-at-a-time deserializer since the source format is tabular, not a single YAML
//! document.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::types::synthesize_hostname;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("failed to read inventory file: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Deserialize)]
struct InventoryRow {
    address: String,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    region: Option<String>,
}

/// One row of the loaded inventory: a mandatory `address` and a non-empty `hostname` (supplied
/// or synthesized), plus informational `role`/`region`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub address: String,
    pub hostname: String,
    pub role: Option<String>,
    pub region: Option<String>,
}

/// Loads a device inventory CSV: blank `address` rows are skipped with a
/// warning; a missing `hostname` is synthesized from `address`; hostnames that collide with an
/// earlier row in this same load are disambiguated by appending the row's ordinal.
pub fn load_csv(path: &Path) -> Result<Vec<DeviceDescriptor>, InventoryError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut seen: HashMap<String, ()> = HashMap::new();
    let mut devices = Vec::new();

    for (ordinal, record) in reader.deserialize::<InventoryRow>().enumerate() {
        let row = record?;
        if row.address.trim().is_empty() {
            warn!(row = ordinal, "skipping inventory row with blank address");
            continue;
        }

        let hostname = row
            .hostname
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| synthesize_hostname(&row.address));
        let hostname = disambiguate(&mut seen, hostname, ordinal);

        devices.push(DeviceDescriptor { address: row.address, hostname, role: row.role, region: row.region });
    }

    Ok(devices)
}

fn disambiguate(seen: &mut HashMap<String, ()>, hostname: String, ordinal: usize) -> String {
    if seen.insert(hostname.clone(), ()).is_none() {
        hostname
    } else {
        let disambiguated = format!("{hostname}-{ordinal}");
        seen.insert(disambiguated.clone(), ());
        disambiguated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn synthesizes_hostname_when_absent() {
        let file = write_csv("address\n10.0.0.1\n");
        let devices = load_csv(file.path()).unwrap();
        assert_eq!(devices[0].hostname, "router-10-0-0-1");
    }

    #[test]
    fn skips_blank_address_rows_with_warning() {
        let file = write_csv("address,hostname\n,r1\n10.0.0.2,r2\n");
        let devices = load_csv(file.path()).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].hostname, "r2");
    }

    #[test]
    fn disambiguates_duplicate_hostnames_by_row_ordinal() {
        let file = write_csv("address,hostname\n10.0.0.1,r1\n10.0.0.2,r1\n");
        let devices = load_csv(file.path()).unwrap();
        assert_eq!(devices[0].hostname, "r1");
        assert_eq!(devices[1].hostname, "r1-1");
    }

    #[test]
    fn carries_optional_role_and_region() {
        let file = write_csv("address,hostname,role,region\n10.0.0.1,r1,edge,us-east\n");
        let devices = load_csv(file.path()).unwrap();
        assert_eq!(devices[0].role.as_deref(), Some("edge"));
        assert_eq!(devices[0].region.as_deref(), Some("us-east"));
    }
}
