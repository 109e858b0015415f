//! Policy cache (C5): `(fingerprint -> policy text)` with TTL and a hit counter.
//!
//! Write retries on `SQLITE_BUSY` reuse the same exponential backoff primitive
//! (`cache::backoff::Backoff`) that other retry paths in the crate use: 3 attempts, doubling
//! delay.

pub mod backoff;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, warn};

use backoff::Backoff;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cache key requires an AS number or a resource name")]
    MissingKeySource,
}

/// Canonical fingerprint: `AS<n>:<name|default>` or `<AS-SET-UPPERCASE>:<name|default>`.
pub fn fingerprint(as_number: Option<u32>, resource: Option<&str>, policy_name: Option<&str>) -> Result<String, CacheError> {
    let base = if let Some(n) = as_number {
        format!("AS{n}")
    } else if let Some(r) = resource {
        r.to_uppercase()
    } else {
        return Err(CacheError::MissingKeySource);
    };
    Ok(match policy_name {
        Some(name) => format!("{base}:{name}"),
        None => format!("{base}:default"),
    })
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub text: String,
    pub prefix_count: i64,
    pub fetched_at: DateTime<Utc>,
    pub ttl_hours: i64,
    pub hits: i64,
}

impl CacheEntry {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.fetched_at + chrono::Duration::hours(self.ttl_hours)
    }
}

pub struct PolicyCache {
    conn: Connection,
}

impl PolicyCache {
    pub fn open(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bgpq4_cache (
                cache_key TEXT PRIMARY KEY,
                as_number INTEGER,
                resource TEXT,
                prefixes TEXT,
                prefix_count INTEGER,
                raw_output TEXT,
                ttl_hours INTEGER,
                fetched_date TEXT NOT NULL,
                hits INTEGER NOT NULL DEFAULT 0,
                last_hit TEXT
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::open(Connection::open_in_memory()?)
    }

    /// Returns the cached text iff `now <= fetched_at + ttl`. A stale entry returns a miss
    /// without being deleted (that's [`sweep`]'s job). Hit-counter increment failures never
    /// fail the read itself.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError> {
        let row = self
            .conn
            .query_row(
                "SELECT prefixes, prefix_count, fetched_date, ttl_hours, hits FROM bgpq4_cache WHERE cache_key = ?1",
                params![key],
                |row| {
                    let fetched_date: String = row.get(2)?;
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, fetched_date, row.get::<_, i64>(3)?, row.get::<_, i64>(4)?))
                },
            )
            .optional()?;

        let Some((text, prefix_count, fetched_raw, ttl_hours, hits)) = row else {
            debug!(key, "cache miss");
            return Ok(None);
        };
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);

        let entry = CacheEntry { text, prefix_count, fetched_at, ttl_hours, hits };
        if !entry.is_valid_at(now) {
            debug!(key, "cache entry stale");
            return Ok(None);
        }

        if let Err(e) = self.conn.execute(
            "UPDATE bgpq4_cache SET hits = hits + 1, last_hit = ?2 WHERE cache_key = ?1",
            params![key, now.to_rfc3339()],
        ) {
            warn!(key, error = %e, "failed to update cache hit counter");
        }

        debug!(key, hits = entry.hits + 1, "cache hit");
        Ok(Some(CacheEntry { hits: entry.hits + 1, ..entry }))
    }

    /// Last-writer-wins on `key`; retries up to 3 times with exponential backoff when the
    /// backing store reports `SQLITE_BUSY`.
    pub fn put(
        &mut self,
        key: &str,
        as_number: Option<u32>,
        resource: Option<&str>,
        text: &str,
        ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let prefix_count = text.matches("route-filter").count() as i64;
        let mut backoff = Backoff::new().with_max_retries(3).with_initial_delay(std::time::Duration::from_millis(100));

        loop {
            let result = self.conn.execute(
                "INSERT INTO bgpq4_cache
                    (cache_key, as_number, resource, prefixes, prefix_count, raw_output, ttl_hours, fetched_date, hits)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?4, ?6, ?7, 0)
                 ON CONFLICT(cache_key) DO UPDATE SET
                    as_number = excluded.as_number,
                    resource = excluded.resource,
                    prefixes = excluded.prefixes,
                    prefix_count = excluded.prefix_count,
                    raw_output = excluded.raw_output,
                    ttl_hours = excluded.ttl_hours,
                    fetched_date = excluded.fetched_date",
                params![key, as_number, resource, text, prefix_count, ttl_hours, now.to_rfc3339()],
            );

            match result {
                Ok(_) => return Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy && backoff.should_retry_conflict() =>
                {
                    backoff.backoff_conflict();
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn invalidate(&mut self, key: &str) -> Result<(), CacheError> {
        self.conn.execute("DELETE FROM bgpq4_cache WHERE cache_key = ?1", params![key])?;
        Ok(())
    }

    /// Removes every entry whose `fetched_at + ttl < now`, returning the count removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let rows: Vec<(String, String, i64)> = {
            let mut stmt = self.conn.prepare("SELECT cache_key, fetched_date, ttl_hours FROM bgpq4_cache")?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<Result<_, _>>()?
        };

        let mut removed = 0;
        for (key, fetched_raw, ttl_hours) in rows {
            let fetched_at = DateTime::parse_from_rfc3339(&fetched_raw).map(|dt| dt.with_timezone(&Utc)).unwrap_or(now);
            if fetched_at + chrono::Duration::hours(ttl_hours) < now {
                self.conn.execute("DELETE FROM bgpq4_cache WHERE cache_key = ?1", params![key])?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_uses_as_number_or_uppercased_resource() {
        assert_eq!(fingerprint(Some(7922), None, None).unwrap(), "AS7922:default");
        assert_eq!(fingerprint(None, Some("as-example"), None).unwrap(), "AS-EXAMPLE:default");
        assert_eq!(fingerprint(Some(7922), None, Some("strict")).unwrap(), "AS7922:strict");
    }

    #[test]
    fn fingerprint_requires_a_source() {
        assert!(matches!(fingerprint(None, None, None), Err(CacheError::MissingKeySource)));
    }

    #[test]
    fn put_then_get_within_ttl_returns_value_and_increments_hits() {
        let mut cache = PolicyCache::open_in_memory().unwrap();
        let now = Utc::now();
        cache.put("AS7922:default", Some(7922), None, "policy-options { ... }", 1, now).unwrap();

        let entry = cache.get("AS7922:default", now).unwrap().unwrap();
        assert_eq!(entry.text, "policy-options { ... }");
        assert_eq!(entry.hits, 1);

        let entry2 = cache.get("AS7922:default", now).unwrap().unwrap();
        assert_eq!(entry2.hits, 2);
    }

    #[test]
    fn get_after_ttl_expiry_is_a_miss_without_deleting() {
        let mut cache = PolicyCache::open_in_memory().unwrap();
        let now = Utc::now();
        cache.put("AS7922:default", Some(7922), None, "X", 1, now).unwrap();

        let later = now + chrono::Duration::hours(2);
        assert!(cache.get("AS7922:default", later).unwrap().is_none());

        // still present, just stale -- sweep is what removes it
        assert_eq!(cache.sweep(later).unwrap(), 1);
        assert!(cache.get("AS7922:default", later).unwrap().is_none());
    }

    #[test]
    fn invalidate_removes_the_key() {
        let mut cache = PolicyCache::open_in_memory().unwrap();
        let now = Utc::now();
        cache.put("AS7922:default", Some(7922), None, "X", 24, now).unwrap();
        cache.invalidate("AS7922:default").unwrap();
        assert!(cache.get("AS7922:default", now).unwrap().is_none());
    }

    #[test]
    fn put_is_last_writer_wins() {
        let mut cache = PolicyCache::open_in_memory().unwrap();
        let now = Utc::now();
        cache.put("AS7922:default", Some(7922), None, "first", 24, now).unwrap();
        cache.put("AS7922:default", Some(7922), None, "second", 24, now).unwrap();
        assert_eq!(cache.get("AS7922:default", now).unwrap().unwrap().text, "second");
    }
}
