//! Rollout entities: Run, Stage, Target, Event.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Planning,
    Active,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Planning => "planning",
            RunStatus::Active => "active",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "planning" => RunStatus::Planning,
            "active" => RunStatus::Active,
            "paused" => RunStatus::Paused,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "aborted" => RunStatus::Aborted,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl TargetState {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetState::Pending => "pending",
            TargetState::InProgress => "in_progress",
            TargetState::Completed => "completed",
            TargetState::Failed => "failed",
            TargetState::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => TargetState::Pending,
            "in_progress" => TargetState::InProgress,
            "completed" => TargetState::Completed,
            "failed" => TargetState::Failed,
            "skipped" => TargetState::Skipped,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TargetState::Completed | TargetState::Failed | TargetState::Skipped)
    }
}

#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub initiated_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub stage_id: String,
    pub run_id: String,
    pub sequencing: i64,
    pub name: String,
    pub guardrail_snapshot: String,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub target_id: String,
    pub stage_id: String,
    pub hostname: String,
    pub policy_hash: String,
    pub state: TargetState,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: i64,
    pub run_id: String,
    pub event_type: String,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

/// First 16 hex characters of a SHA-256 digest over the policy content.
pub fn policy_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_hash_is_16_hex_chars_and_stable() {
        let h1 = policy_hash("policy-options { }");
        let h2 = policy_hash("policy-options { }");
        assert_eq!(h1.len(), 16);
        assert_eq!(h1, h2);
        assert_ne!(h1, policy_hash("different"));
    }

    #[test]
    fn run_status_round_trips_through_strings() {
        for status in [RunStatus::Planning, RunStatus::Active, RunStatus::Paused, RunStatus::Completed, RunStatus::Failed, RunStatus::Aborted] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
    }
}
