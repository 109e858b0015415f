//! Discovery persistence (C4): router inventory, BGP group metadata, and router<->AS mapping.
//!
//! Enforces the router profile invariant that every AS appearing in a `bgp_groups` value must
//! also appear in `discovered_as_numbers`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::types::{sanitize_hostname, AsNumber};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterProfile {
    pub hostname: String,
    pub address: String,
    pub discovered_as_numbers: BTreeSet<u32>,
    pub bgp_groups: IndexMap<String, Vec<u32>>,
    pub platform: Option<String>,
    pub role: Option<String>,
    pub region: Option<String>,
    pub last_confirmed: DateTime<Utc>,
}

impl RouterProfile {
    /// Enforces the invariant that every AS in a bgp_groups value also appears in
    /// discovered_as_numbers. Called before persisting a freshly-discovered profile.
    pub fn normalize(mut self) -> Self {
        for as_numbers in self.bgp_groups.values() {
            for as_number in as_numbers {
                self.discovered_as_numbers.insert(*as_number);
            }
        }
        self
    }
}

pub struct DiscoveryStore {
    conn: Connection,
    history_dir: Option<PathBuf>,
}

impl DiscoveryStore {
    pub fn open(path: &Path) -> Result<Self, DiscoveryError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn, history_dir: None })
    }

    pub fn open_in_memory() -> Result<Self, DiscoveryError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn, history_dir: None })
    }

    pub fn with_history_dir(mut self, dir: PathBuf) -> Self {
        self.history_dir = Some(dir);
        self
    }

    fn init_schema(conn: &Connection) -> Result<(), DiscoveryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS routers (
                hostname TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                platform TEXT,
                role TEXT,
                region TEXT,
                last_confirmed TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS bgp_groups (
                router_hostname TEXT NOT NULL,
                group_name TEXT NOT NULL,
                PRIMARY KEY (router_hostname, group_name),
                FOREIGN KEY (router_hostname) REFERENCES routers(hostname)
            );
            CREATE TABLE IF NOT EXISTS router_as_mapping (
                router_hostname TEXT NOT NULL,
                as_number INTEGER NOT NULL,
                bgp_group TEXT,
                PRIMARY KEY (router_hostname, as_number, bgp_group),
                FOREIGN KEY (router_hostname) REFERENCES routers(hostname)
            );",
        )?;
        Ok(())
    }

    /// Upserts a router profile: routers row, one bgp_groups row per group, one
    /// router_as_mapping row per (hostname, AS, group) triple (group is NULL for ungrouped AS).
    pub fn upsert_router(&mut self, profile: &RouterProfile) -> Result<(), DiscoveryError> {
        let profile = profile.clone().normalize();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO routers (hostname, address, platform, role, region, last_confirmed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(hostname) DO UPDATE SET
                address = excluded.address,
                platform = excluded.platform,
                role = excluded.role,
                region = excluded.region,
                last_confirmed = excluded.last_confirmed",
            params![
                profile.hostname,
                profile.address,
                profile.platform,
                profile.role,
                profile.region,
                profile.last_confirmed.to_rfc3339(),
            ],
        )?;

        for group_name in profile.bgp_groups.keys() {
            tx.execute(
                "INSERT OR IGNORE INTO bgp_groups (router_hostname, group_name) VALUES (?1, ?2)",
                params![profile.hostname, group_name],
            )?;
        }

        let mut grouped: BTreeSet<u32> = BTreeSet::new();
        for (group_name, as_numbers) in &profile.bgp_groups {
            for as_number in as_numbers {
                grouped.insert(*as_number);
                tx.execute(
                    "INSERT OR IGNORE INTO router_as_mapping (router_hostname, as_number, bgp_group)
                     VALUES (?1, ?2, ?3)",
                    params![profile.hostname, as_number, group_name],
                )?;
            }
        }
        for as_number in profile.discovered_as_numbers.difference(&grouped) {
            tx.execute(
                "INSERT OR IGNORE INTO router_as_mapping (router_hostname, as_number, bgp_group)
                 VALUES (?1, ?2, NULL)",
                params![profile.hostname, as_number],
            )?;
        }
        tx.commit()?;

        if let Some(dir) = &self.history_dir {
            self.write_history_snapshot(dir, &profile)?;
        }

        info!(hostname = %profile.hostname, as_count = profile.discovered_as_numbers.len(), "upserted router profile");
        Ok(())
    }

    fn write_history_snapshot(&self, dir: &Path, profile: &RouterProfile) -> Result<(), DiscoveryError> {
        let snapshot_dir = dir.join(profile.last_confirmed.format("%Y%m%d_%H%M%S").to_string());
        std::fs::create_dir_all(&snapshot_dir)?;
        let path = snapshot_dir.join(format!("{}.json", sanitize_hostname(&profile.hostname)));
        std::fs::write(path, serde_json::to_string_pretty(profile)?)?;
        Ok(())
    }

    pub fn routers_for_as(&self, as_number: u32) -> Result<Vec<String>, DiscoveryError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT router_hostname FROM router_as_mapping WHERE as_number = ?1 ORDER BY router_hostname",
        )?;
        let rows = stmt.query_map(params![as_number], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn as_for_router(&self, hostname: &str) -> Result<BTreeSet<u32>, DiscoveryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT as_number FROM router_as_mapping WHERE router_hostname = ?1")?;
        let rows = stmt.query_map(params![hostname], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn groups_for_router(&self, hostname: &str) -> Result<Vec<String>, DiscoveryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT group_name FROM bgp_groups WHERE router_hostname = ?1 ORDER BY group_name")?;
        let rows = stmt.query_map(params![hostname], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn all_groups(&self) -> Result<Vec<(String, String)>, DiscoveryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT router_hostname, group_name FROM bgp_groups ORDER BY router_hostname, group_name")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Reconstructs every stored router as a full [`RouterProfile`], for reporting.
    pub fn all_router_profiles(&self) -> Result<Vec<RouterProfile>, DiscoveryError> {
        let mut stmt = self.conn.prepare(
            "SELECT hostname, address, platform, role, region, last_confirmed FROM routers ORDER BY hostname",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut profiles = Vec::new();
        for row in rows {
            let (hostname, address, platform, role, region, last_confirmed) = row?;
            let discovered_as_numbers = self.as_for_router(&hostname)?;

            let mut bgp_groups: IndexMap<String, Vec<u32>> = IndexMap::new();
            for group_name in self.groups_for_router(&hostname)? {
                let mut stmt = self.conn.prepare(
                    "SELECT as_number FROM router_as_mapping WHERE router_hostname = ?1 AND bgp_group = ?2 ORDER BY as_number",
                )?;
                let members = stmt
                    .query_map(params![hostname, group_name], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                bgp_groups.insert(group_name, members);
            }

            profiles.push(RouterProfile {
                hostname,
                address,
                discovered_as_numbers,
                bgp_groups,
                platform,
                role,
                region,
                last_confirmed: DateTime::parse_from_rfc3339(&last_confirmed)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(profiles)
    }

    /// Set of (hostname, group, AS) triples currently stored, used by [`diff`].
    fn all_triples(&self) -> Result<BTreeSet<(String, Option<String>, u32)>, DiscoveryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT router_hostname, bgp_group, as_number FROM router_as_mapping")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

/// Two snapshots differ if any (hostname, group, AS) triple appears in one and not the other.
pub fn diff(before: &DiscoveryStore, after: &DiscoveryStore) -> Result<bool, DiscoveryError> {
    Ok(before.all_triples()? != after.all_triples()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(hostname: &str) -> RouterProfile {
        let mut bgp_groups = IndexMap::new();
        bgp_groups.insert("CUSTOMERS".to_string(), vec![65001, 65002]);
        RouterProfile {
            hostname: hostname.to_string(),
            address: "10.0.0.1".to_string(),
            discovered_as_numbers: BTreeSet::new(),
            bgp_groups,
            platform: Some("junos".to_string()),
            role: None,
            region: Some("us-east".to_string()),
            last_confirmed: Utc::now(),
        }
    }

    #[test]
    fn normalize_folds_group_members_into_discovered_as_numbers() {
        let p = profile("r1").normalize();
        assert_eq!(p.discovered_as_numbers, BTreeSet::from([65001, 65002]));
    }

    #[test]
    fn upsert_and_read_back_router() {
        let mut store = DiscoveryStore::open_in_memory().unwrap();
        store.upsert_router(&profile("r1")).unwrap();

        assert_eq!(store.as_for_router("r1").unwrap(), BTreeSet::from([65001, 65002]));
        assert_eq!(store.groups_for_router("r1").unwrap(), vec!["CUSTOMERS".to_string()]);
        assert_eq!(store.routers_for_as(65001).unwrap(), vec!["r1".to_string()]);
    }

    #[test]
    fn diff_detects_added_mapping() {
        let before = DiscoveryStore::open_in_memory().unwrap();
        let mut after = DiscoveryStore::open_in_memory().unwrap();
        after.upsert_router(&profile("r1")).unwrap();
        assert!(diff(&before, &after).unwrap());
    }

    #[test]
    fn all_router_profiles_reconstructs_groups_and_as_numbers() {
        let mut store = DiscoveryStore::open_in_memory().unwrap();
        store.upsert_router(&profile("r1")).unwrap();
        let profiles = store.all_router_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].hostname, "r1");
        assert_eq!(profiles[0].discovered_as_numbers, BTreeSet::from([65001, 65002]));
        assert_eq!(profiles[0].bgp_groups.get("CUSTOMERS"), Some(&vec![65001, 65002]));
    }

    #[test]
    fn diff_is_false_for_identical_snapshots() {
        let mut a = DiscoveryStore::open_in_memory().unwrap();
        let mut b = DiscoveryStore::open_in_memory().unwrap();
        a.upsert_router(&profile("r1")).unwrap();
        b.upsert_router(&profile("r1")).unwrap();
        assert!(!diff(&a, &b).unwrap());
    }
}
