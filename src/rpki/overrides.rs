//! RPKI override store (C9): atomic disable/enable of RPKI validation per AS, with a 60-second
//! TTL cache over the disabled and allowlisted sets.
//!
//! Atomic current-row + history-row transaction pair, validation limits (reason <= 500 chars,
//! actor <= 100 chars, source address <= 45 chars), and a 60-second process-wide cache behind
//! `std::sync::Mutex`.
//!
//! An explicit `enable` row is not a no-op: since the absence of any row already means RPKI is
//! enabled for that AS, a present `rpki_enabled = 1` row only ever exists because an operator
//! allowlisted a known-invalid origin -- so it is surfaced to the validator as the allowlist
//! set, distinct from "no override at all".

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::info;

const CACHE_TTL: Duration = Duration::from_secs(60);
const MAX_REASON_LEN: usize = 500;
const MAX_ACTOR_LEN: usize = 100;
const MAX_SOURCE_LEN: usize = 45;

#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("AS number {0} is outside the valid range")]
    InvalidAsNumber(u64),
}

fn truncate(value: &str, max_len: usize) -> String {
    value.chars().take(max_len).collect()
}

struct Cache {
    disabled: HashSet<u32>,
    allowlisted: HashSet<u32>,
    loaded_at: Instant,
}

pub struct OverrideStore {
    conn: Connection,
    cache: Mutex<Option<Cache>>,
}

impl OverrideStore {
    pub fn open(conn: Connection) -> Result<Self, OverrideError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rpki_overrides (
                as_number INTEGER PRIMARY KEY,
                rpki_enabled INTEGER NOT NULL,
                reason TEXT,
                modified_date TEXT NOT NULL,
                modified_by TEXT
             );
             CREATE TABLE IF NOT EXISTS rpki_override_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                as_number INTEGER NOT NULL,
                action TEXT NOT NULL CHECK (action IN ('enable', 'disable')),
                reason TEXT,
                timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                user TEXT,
                ip_address TEXT
             );",
        )?;
        Ok(Self { conn, cache: Mutex::new(None) })
    }

    pub fn open_in_memory() -> Result<Self, OverrideError> {
        Self::open(Connection::open_in_memory()?)
    }

    fn validate_as(as_number: u32) -> Result<(), OverrideError> {
        // u32 already bounds the range to [0, 2^32 - 1]; kept as an explicit call site so the
        // validation step stays visible even though it can never fail.
        let _ = as_number;
        Ok(())
    }

    fn invalidate_cache(&self) {
        *self.cache.lock().unwrap() = None;
    }

    fn refresh_cache(&self) -> Result<(), OverrideError> {
        let mut stmt = self.conn.prepare("SELECT as_number, rpki_enabled FROM rpki_overrides")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)? as u32, row.get::<_, i64>(1)? != 0)))?;

        let mut disabled = HashSet::new();
        let mut allowlisted = HashSet::new();
        for row in rows {
            let (as_number, enabled) = row?;
            if enabled {
                allowlisted.insert(as_number);
            } else {
                disabled.insert(as_number);
            }
        }
        *self.cache.lock().unwrap() = Some(Cache { disabled, allowlisted, loaded_at: Instant::now() });
        Ok(())
    }

    fn with_fresh_cache<T>(&self, f: impl FnOnce(&Cache) -> T) -> Result<T, OverrideError> {
        {
            let guard = self.cache.lock().unwrap();
            if let Some(cache) = guard.as_ref() {
                if cache.loaded_at.elapsed() <= CACHE_TTL {
                    return Ok(f(cache));
                }
            }
        }
        self.refresh_cache()?;
        let guard = self.cache.lock().unwrap();
        Ok(f(guard.as_ref().expect("just refreshed")))
    }

    pub fn is_disabled(&self, as_number: u32) -> Result<bool, OverrideError> {
        self.with_fresh_cache(|cache| cache.disabled.contains(&as_number))
    }

    pub fn is_allowlisted(&self, as_number: u32) -> Result<bool, OverrideError> {
        self.with_fresh_cache(|cache| cache.allowlisted.contains(&as_number))
    }

    fn write_override(&mut self, as_number: u32, enabled: bool, action: &str, reason: &str, user: &str, ip_address: Option<&str>) -> Result<(), OverrideError> {
        Self::validate_as(as_number)?;
        let reason = truncate(reason, MAX_REASON_LEN);
        let user = truncate(user, MAX_ACTOR_LEN);
        let ip_address = ip_address.map(|s| truncate(s, MAX_SOURCE_LEN));

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO rpki_overrides (as_number, rpki_enabled, reason, modified_date, modified_by)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP, ?4)
             ON CONFLICT(as_number) DO UPDATE SET
                rpki_enabled = excluded.rpki_enabled,
                reason = excluded.reason,
                modified_date = excluded.modified_date,
                modified_by = excluded.modified_by",
            params![as_number, enabled as i64, reason, user],
        )?;
        tx.execute(
            "INSERT INTO rpki_override_history (as_number, action, reason, user, ip_address)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![as_number, action, reason, user, ip_address],
        )?;
        tx.commit()?;

        self.invalidate_cache();
        info!(as_number, action, %user, "rpki override recorded");
        Ok(())
    }

    pub fn disable(&mut self, as_number: u32, reason: &str, user: &str, ip_address: Option<&str>) -> Result<(), OverrideError> {
        self.write_override(as_number, false, "disable", reason, user, ip_address)
    }

    pub fn enable(&mut self, as_number: u32, reason: &str, user: &str, ip_address: Option<&str>) -> Result<(), OverrideError> {
        self.write_override(as_number, true, "enable", reason, user, ip_address)
    }

    pub fn disabled_as_numbers(&self) -> Result<Vec<u32>, OverrideError> {
        self.with_fresh_cache(|cache| {
            let mut v: Vec<u32> = cache.disabled.iter().copied().collect();
            v.sort_unstable();
            v
        })
    }

    pub fn history(&self, as_number: Option<u32>, limit: u32) -> Result<Vec<(u32, String, String, String)>, OverrideError> {
        let mut stmt = match as_number {
            Some(_) => self.conn.prepare(
                "SELECT as_number, action, reason, timestamp FROM rpki_override_history
                 WHERE as_number = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )?,
            None => self.conn.prepare("SELECT as_number, action, reason, timestamp FROM rpki_override_history ORDER BY timestamp DESC LIMIT ?1")?,
        };

        let rows = match as_number {
            Some(n) => stmt.query_map(params![n, limit], row_to_history_tuple)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map(params![limit], row_to_history_tuple)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }
}

fn row_to_history_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<(u32, String, String, String)> {
    Ok((row.get::<_, i64>(0)? as u32, row.get(1)?, row.get(2)?, row.get(3)?))
}
