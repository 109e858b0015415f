//! Rollout strategies: trait-object implementations of `BlastStrategy` / `PhasedStrategy` /
//! `CanaryStrategy`.

use std::collections::BTreeMap;

use crate::rollout::model::policy_hash;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub hostname: String,
    pub region: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PlannedTarget {
    pub hostname: String,
    pub policy_hash: String,
}

#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub name: String,
    pub sequencing: i64,
    pub targets: Vec<PlannedTarget>,
}

pub trait RolloutStrategy: Send + Sync {
    fn plan_stages(&self, devices: &[DeviceInfo], policies: &BTreeMap<String, String>) -> Vec<PlannedStage>;
    fn concurrency_for_stage(&self, stage_sequencing: i64) -> usize;
}

fn planned_target(device: &DeviceInfo, policies: &BTreeMap<String, String>) -> PlannedTarget {
    let policy = policies.get(&device.hostname).cloned().unwrap_or_default();
    PlannedTarget { hostname: device.hostname.clone(), policy_hash: policy_hash(&policy) }
}

/// One stage, all targets, the configured default concurrency.
pub struct BlastStrategy {
    pub concurrency: usize,
}

impl RolloutStrategy for BlastStrategy {
    fn plan_stages(&self, devices: &[DeviceInfo], policies: &BTreeMap<String, String>) -> Vec<PlannedStage> {
        let targets = devices.iter().map(|d| planned_target(d, policies)).collect();
        vec![PlannedStage { name: "blast_all_routers".to_string(), sequencing: 0, targets }]
    }

    fn concurrency_for_stage(&self, _stage_sequencing: i64) -> usize {
        self.concurrency
    }
}

/// One stage per distinct value of `group_by` (region/role/…), sequenced by sorted key.
pub struct PhasedStrategy {
    pub group_by: GroupAttribute,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAttribute {
    Region,
    Role,
}

impl GroupAttribute {
    fn key(self, device: &DeviceInfo) -> String {
        match self {
            GroupAttribute::Region => device.region.clone().unwrap_or_else(|| "default".to_string()),
            GroupAttribute::Role => device.role.clone().unwrap_or_else(|| "default".to_string()),
        }
    }

    fn label(self) -> &'static str {
        match self {
            GroupAttribute::Region => "region",
            GroupAttribute::Role => "role",
        }
    }
}

impl RolloutStrategy for PhasedStrategy {
    fn plan_stages(&self, devices: &[DeviceInfo], policies: &BTreeMap<String, String>) -> Vec<PlannedStage> {
        let mut groups: BTreeMap<String, Vec<PlannedTarget>> = BTreeMap::new();
        for device in devices {
            let key = self.group_by.key(device);
            groups.entry(key).or_default().push(planned_target(device, policies));
        }

        groups
            .into_iter()
            .enumerate()
            .map(|(seq, (group_name, targets))| PlannedStage {
                name: format!("{}_{group_name}", self.group_by.label()),
                sequencing: seq as i64,
                targets,
            })
            .collect()
    }

    fn concurrency_for_stage(&self, _stage_sequencing: i64) -> usize {
        self.concurrency
    }
}

/// Stage 0: the canary host alone at concurrency 1. Stage 1: everything else at the configured
/// concurrency.
pub struct CanaryStrategy {
    pub canary_hostname: String,
    pub concurrency: usize,
}

impl RolloutStrategy for CanaryStrategy {
    fn plan_stages(&self, devices: &[DeviceInfo], policies: &BTreeMap<String, String>) -> Vec<PlannedStage> {
        let mut canary = Vec::new();
        let mut main = Vec::new();
        for device in devices {
            let target = planned_target(device, policies);
            if device.hostname == self.canary_hostname {
                canary.push(target);
            } else {
                main.push(target);
            }
        }

        let mut stages = Vec::new();
        if !canary.is_empty() {
            stages.push(PlannedStage { name: "canary".to_string(), sequencing: 0, targets: canary });
        }
        if !main.is_empty() {
            let sequencing = if stages.is_empty() { 0 } else { 1 };
            stages.push(PlannedStage { name: "main_rollout".to_string(), sequencing, targets: main });
        }
        stages
    }

    fn concurrency_for_stage(&self, stage_sequencing: i64) -> usize {
        if stage_sequencing == 0 {
            1
        } else {
            self.concurrency
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(hostname: &str, region: &str) -> DeviceInfo {
        DeviceInfo { hostname: hostname.to_string(), region: Some(region.to_string()), role: None }
    }

    #[test]
    fn blast_strategy_produces_one_stage_with_every_device() {
        let devices = vec![device("r1", "us"), device("r2", "eu")];
        let strategy = BlastStrategy { concurrency: 5 };
        let stages = strategy.plan_stages(&devices, &BTreeMap::new());
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].targets.len(), 2);
        assert_eq!(strategy.concurrency_for_stage(0), 5);
    }

    #[test]
    fn phased_strategy_groups_by_region_in_sorted_order() {
        let devices = vec![device("r1", "us"), device("r2", "eu"), device("r3", "us")];
        let strategy = PhasedStrategy { group_by: GroupAttribute::Region, concurrency: 2 };
        let stages = strategy.plan_stages(&devices, &BTreeMap::new());
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].name, "region_eu");
        assert_eq!(stages[1].name, "region_us");
        assert_eq!(stages[1].targets.len(), 2);
    }

    #[test]
    fn canary_strategy_isolates_canary_host_in_stage_zero() {
        let devices = vec![device("canary1", "us"), device("r2", "us"), device("r3", "eu")];
        let strategy = CanaryStrategy { canary_hostname: "canary1".to_string(), concurrency: 5 };
        let stages = strategy.plan_stages(&devices, &BTreeMap::new());
        assert_eq!(stages[0].name, "canary");
        assert_eq!(stages[0].targets.len(), 1);
        assert_eq!(strategy.concurrency_for_stage(0), 1);
        assert_eq!(strategy.concurrency_for_stage(1), 5);
    }

    #[test]
    fn canary_strategy_with_no_canary_match_skips_canary_stage() {
        let devices = vec![device("r2", "us")];
        let strategy = CanaryStrategy { canary_hostname: "missing".to_string(), concurrency: 5 };
        let stages = strategy.plan_stages(&devices, &BTreeMap::new());
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].name, "main_rollout");
        assert_eq!(stages[0].sequencing, 0);
    }
}
