//! Policy artifact data model.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct PolicyArtifact {
    pub key: String,
    pub as_number: Option<u32>,
    pub resource: Option<String>,
    pub policy_name: Option<String>,
    pub text: String,
    pub prefix_count: u64,
    pub fetched_at: DateTime<Utc>,
    pub ttl_hours: i64,
}

impl PolicyArtifact {
    pub fn prefix_count_from_text(text: &str) -> u64 {
        text.matches("route-filter").count() as u64
    }
}
