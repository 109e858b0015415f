//! Rollout DAO: rusqlite-backed persistence for runs/stages/targets/events.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::rollout::model::{Event, Run, RunStatus, Stage, Target, TargetState};
use crate::rollout::strategy::PlannedTarget;

#[derive(Error, Debug)]
pub enum DaoError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("run {0} not found")]
    RunNotFound(String),
}

pub struct RolloutDao {
    conn: Connection,
}

impl RolloutDao {
    pub fn open(conn: Connection) -> Result<Self, DaoError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rollout_runs (
                run_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('planning','active','paused','completed','failed','aborted')),
                initiated_by TEXT
             );
             CREATE TABLE IF NOT EXISTS rollout_stages (
                stage_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES rollout_runs(run_id),
                sequencing INTEGER NOT NULL,
                name TEXT NOT NULL,
                guardrail_snapshot TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS rollout_targets (
                target_id TEXT PRIMARY KEY,
                stage_id TEXT NOT NULL REFERENCES rollout_stages(stage_id),
                hostname TEXT NOT NULL,
                policy_hash TEXT NOT NULL,
                state TEXT NOT NULL CHECK (state IN ('pending','in_progress','completed','failed','skipped')),
                last_error TEXT,
                updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS rollout_events (
                event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES rollout_runs(run_id),
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, DaoError> {
        Self::open(Connection::open_in_memory()?)
    }

    pub fn create_run(&self, now: DateTime<Utc>, initiated_by: Option<&str>) -> Result<Run, DaoError> {
        let run_id = ulid::Ulid::new().to_string();
        self.conn.execute(
            "INSERT INTO rollout_runs (run_id, created_at, status, initiated_by) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, now.to_rfc3339(), RunStatus::Planning.as_str(), initiated_by],
        )?;
        Ok(Run { run_id, created_at: now, status: RunStatus::Planning, initiated_by: initiated_by.map(String::from) })
    }

    pub fn add_stage(&self, run_id: &str, name: &str, sequencing: i64, guardrail_snapshot: &str) -> Result<Stage, DaoError> {
        let stage_id = ulid::Ulid::new().to_string();
        self.conn.execute(
            "INSERT INTO rollout_stages (stage_id, run_id, sequencing, name, guardrail_snapshot) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![stage_id, run_id, sequencing, name, guardrail_snapshot],
        )?;
        Ok(Stage { stage_id, run_id: run_id.to_string(), sequencing, name: name.to_string(), guardrail_snapshot: guardrail_snapshot.to_string() })
    }

    pub fn enqueue_targets(&self, stage_id: &str, targets: &[PlannedTarget], now: DateTime<Utc>) -> Result<(), DaoError> {
        for target in targets {
            let target_id = ulid::Ulid::new().to_string();
            self.conn.execute(
                "INSERT INTO rollout_targets (target_id, stage_id, hostname, policy_hash, state, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
                params![target_id, stage_id, target.hostname, target.policy_hash, TargetState::Pending.as_str(), now.to_rfc3339()],
            )?;
        }
        Ok(())
    }

    pub fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), DaoError> {
        self.conn.execute("UPDATE rollout_runs SET status = ?2 WHERE run_id = ?1", params![run_id, status.as_str()])?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>, DaoError> {
        self.conn
            .query_row(
                "SELECT run_id, created_at, status, initiated_by FROM rollout_runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    let created_at: String = row.get(1)?;
                    let status: String = row.get(2)?;
                    Ok(Run {
                        run_id: row.get(0)?,
                        created_at: DateTime::parse_from_rfc3339(&created_at).unwrap().with_timezone(&Utc),
                        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
                        initiated_by: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_stages(&self, run_id: &str) -> Result<Vec<Stage>, DaoError> {
        let mut stmt = self.conn.prepare(
            "SELECT stage_id, run_id, sequencing, name, guardrail_snapshot FROM rollout_stages WHERE run_id = ?1 ORDER BY sequencing",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(Stage { stage_id: row.get(0)?, run_id: row.get(1)?, sequencing: row.get(2)?, name: row.get(3)?, guardrail_snapshot: row.get(4)? })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_targets(&self, stage_id: &str) -> Result<Vec<Target>, DaoError> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id, stage_id, hostname, policy_hash, state, last_error, updated_at
             FROM rollout_targets WHERE stage_id = ?1",
        )?;
        let rows = stmt.query_map(params![stage_id], row_to_target)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_pending_targets(&self, stage_id: &str, limit: usize) -> Result<Vec<Target>, DaoError> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id, stage_id, hostname, policy_hash, state, last_error, updated_at
             FROM rollout_targets WHERE stage_id = ?1 AND state = 'pending' LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![stage_id, limit as i64], row_to_target)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_target(&self, target_id: &str) -> Result<Option<Target>, DaoError> {
        self.conn
            .query_row(
                "SELECT target_id, stage_id, hostname, policy_hash, state, last_error, updated_at
                 FROM rollout_targets WHERE target_id = ?1",
                params![target_id],
                row_to_target,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn update_target_state(&self, target_id: &str, state: TargetState, last_error: Option<&str>, now: DateTime<Utc>) -> Result<(), DaoError> {
        self.conn.execute(
            "UPDATE rollout_targets SET state = ?2, last_error = ?3, updated_at = ?4 WHERE target_id = ?1",
            params![target_id, state.as_str(), last_error, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn record_event(&self, run_id: &str, event_type: &str, payload: &str, now: DateTime<Utc>) -> Result<(), DaoError> {
        self.conn.execute(
            "INSERT INTO rollout_events (run_id, event_type, payload, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, event_type, payload, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_events(&self, run_id: &str) -> Result<Vec<Event>, DaoError> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, run_id, event_type, payload, timestamp FROM rollout_events WHERE run_id = ?1 ORDER BY event_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let timestamp: String = row.get(4)?;
            Ok(Event {
                event_id: row.get(0)?,
                run_id: row.get(1)?,
                event_type: row.get(2)?,
                payload: row.get(3)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp).unwrap().with_timezone(&Utc),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn row_to_target(row: &rusqlite::Row<'_>) -> rusqlite::Result<Target> {
    let state: String = row.get(4)?;
    let updated_at: String = row.get(6)?;
    Ok(Target {
        target_id: row.get(0)?,
        stage_id: row.get(1)?,
        hostname: row.get(2)?,
        policy_hash: row.get(3)?,
        state: TargetState::parse(&state).unwrap_or(TargetState::Failed),
        last_error: row.get(5)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at).unwrap().with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_run_add_stage_enqueue_targets_round_trip() {
        let dao = RolloutDao::open_in_memory().unwrap();
        let now = Utc::now();
        let run = dao.create_run(now, Some("operator")).unwrap();
        let stage = dao.add_stage(&run.run_id, "blast_all_routers", 0, "{}").unwrap();
        dao.enqueue_targets(&stage.stage_id, &[PlannedTarget { hostname: "r1".to_string(), policy_hash: "abc".to_string() }], now).unwrap();

        let targets = dao.get_targets(&stage.stage_id).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].state, TargetState::Pending);
    }

    #[test]
    fn update_target_state_persists() {
        let dao = RolloutDao::open_in_memory().unwrap();
        let now = Utc::now();
        let run = dao.create_run(now, None).unwrap();
        let stage = dao.add_stage(&run.run_id, "s", 0, "{}").unwrap();
        dao.enqueue_targets(&stage.stage_id, &[PlannedTarget { hostname: "r1".to_string(), policy_hash: "abc".to_string() }], now).unwrap();
        let target = &dao.get_targets(&stage.stage_id).unwrap()[0];

        dao.update_target_state(&target.target_id, TargetState::Completed, None, now).unwrap();
        let refreshed = dao.get_target(&target.target_id).unwrap().unwrap();
        assert_eq!(refreshed.state, TargetState::Completed);
    }

    #[test]
    fn events_are_appended_in_order() {
        let dao = RolloutDao::open_in_memory().unwrap();
        let now = Utc::now();
        let run = dao.create_run(now, None).unwrap();
        dao.record_event(&run.run_id, "run_planned", "{}", now).unwrap();
        dao.record_event(&run.run_id, "run_paused", "{}", now).unwrap();
        let events = dao.get_events(&run.run_id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "run_planned");
        assert_eq!(events[1].event_type, "run_paused");
    }
}
