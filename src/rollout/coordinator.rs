//! Multi-router rollout coordinator (C13).
//!
//! State machine with a `next_batch` stage-advance recursion and idempotent terminal-state
//! transitions, backed by the rusqlite-backed [`RolloutDao`].

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::rollout::dao::{DaoError, RolloutDao};
use crate::rollout::model::{Run, RunStatus, Stage, Target, TargetState};
use crate::rollout::strategy::{DeviceInfo, RolloutStrategy};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("database error: {0}")]
    Database(#[from] DaoError),

    #[error("no active rollout run")]
    NoActiveRun,

    #[error("run {0} has already reached a terminal state and rejects further batches")]
    RunTerminal(String),
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub default_concurrency: usize,
    pub enable_events: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { default_concurrency: 1, enable_events: true }
    }
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub targets: Vec<Target>,
    pub stage_id: String,
    pub stage_name: String,
    pub has_more: bool,
}

pub struct MultiRouterCoordinator {
    dao: RolloutDao,
    config: CoordinatorConfig,
    current_run: Option<Run>,
    current_stages: Vec<Stage>,
    current_stage_index: usize,
}

impl MultiRouterCoordinator {
    pub fn new(dao: RolloutDao, config: CoordinatorConfig) -> Self {
        Self { dao, config, current_run: None, current_stages: Vec::new(), current_stage_index: 0 }
    }

    fn record_event(&self, run_id: &str, event_type: &str, payload: &str) -> Result<(), CoordinatorError> {
        if self.config.enable_events {
            self.dao.record_event(run_id, event_type, payload, Utc::now())?;
        }
        Ok(())
    }

    /// Rebuilds in-memory stage position by scanning stages in order and choosing the first
    /// stage containing any non-terminal target.
    pub fn hydrate_from_db(&mut self, run_id: &str) -> Result<(), CoordinatorError> {
        let run = self.dao.get_run(run_id)?.ok_or(CoordinatorError::NoActiveRun)?;
        let stages = self.dao.get_stages(run_id)?;

        let mut stage_index = stages.len();
        for (idx, stage) in stages.iter().enumerate() {
            let targets = self.dao.get_targets(&stage.stage_id)?;
            if targets.iter().any(|t| !t.state.is_terminal()) {
                stage_index = idx;
                break;
            }
            if targets.iter().all(|t| matches!(t.state, TargetState::Completed | TargetState::Skipped)) {
                stage_index = idx + 1;
            }
        }

        self.current_stage_index = stage_index;
        self.current_stages = stages;
        self.current_run = Some(run);

        info!(run_id, stage_index = self.current_stage_index, "hydrated rollout run");
        self.record_event(run_id, "run_hydrated", &format!(r#"{{"stage_index":{}}}"#, self.current_stage_index))?;
        Ok(())
    }

    /// Plans a new run: creates stages from `strategy`, enqueues their targets, and marks the
    /// run active.
    pub fn plan_run(
        &mut self,
        devices: &[DeviceInfo],
        policies: &BTreeMap<String, String>,
        strategy: &dyn RolloutStrategy,
        initiated_by: Option<&str>,
    ) -> Result<String, CoordinatorError> {
        let now = Utc::now();
        let run = self.dao.create_run(now, initiated_by)?;
        let run_id = run.run_id.clone();
        info!(run_id = %run_id, "planning rollout run");

        let stage_plans = strategy.plan_stages(devices, policies);
        let mut stages = Vec::with_capacity(stage_plans.len());
        let mut total_targets = 0;
        for plan in &stage_plans {
            let stage = self.dao.add_stage(&run_id, &plan.name, plan.sequencing, "{}")?;
            if !plan.targets.is_empty() {
                self.dao.enqueue_targets(&stage.stage_id, &plan.targets, now)?;
            }
            total_targets += plan.targets.len();
            stages.push(stage);
        }

        self.dao.update_run_status(&run_id, RunStatus::Active)?;
        self.current_run = Some(Run { status: RunStatus::Active, ..run });
        self.current_stages = stages;
        self.current_stage_index = 0;

        self.record_event(
            &run_id,
            "run_planned",
            &format!(r#"{{"stages":{},"total_targets":{total_targets}}}"#, stage_plans.len()),
        )?;
        info!(run_id = %run_id, stages = stage_plans.len(), "planned rollout run");
        Ok(run_id)
    }

    /// Returns up to `concurrency` pending targets of the current stage, marking each
    /// `in_progress`. Advances the stage index and emits `stage_completed` when the stage has no
    /// pending or in-progress targets left; emits `run_completed` past the last stage.
    pub fn next_batch(&mut self, concurrency: Option<usize>) -> Result<Option<BatchResult>, CoordinatorError> {
        let run = self.current_run.clone().ok_or(CoordinatorError::NoActiveRun)?;
        if run.status.is_terminal() {
            return Err(CoordinatorError::RunTerminal(run.run_id));
        }
        if self.current_stages.is_empty() {
            return Err(CoordinatorError::NoActiveRun);
        }

        if self.current_stage_index >= self.current_stages.len() {
            self.dao.update_run_status(&run.run_id, RunStatus::Completed)?;
            info!(run_id = %run.run_id, "all stages completed");
            self.record_event(&run.run_id, "run_completed", &format!(r#"{{"total_stages":{}}}"#, self.current_stages.len()))?;
            if let Some(r) = self.current_run.as_mut() {
                r.status = RunStatus::Completed;
            }
            return Ok(None);
        }

        let stage = self.current_stages[self.current_stage_index].clone();
        let batch_size = concurrency.unwrap_or(self.config.default_concurrency);
        let pending = self.dao.get_pending_targets(&stage.stage_id, batch_size)?;

        if pending.is_empty() {
            let all = self.dao.get_targets(&stage.stage_id)?;
            let pending_count = all.iter().filter(|t| t.state == TargetState::Pending).count();
            let in_progress_count = all.iter().filter(|t| t.state == TargetState::InProgress).count();

            if pending_count == 0 && in_progress_count == 0 {
                info!(stage = %stage.name, "stage completed");
                self.record_event(&run.run_id, "stage_completed", &format!(r#"{{"stage_id":"{}","stage_name":"{}"}}"#, stage.stage_id, stage.name))?;
                self.current_stage_index += 1;
                return self.next_batch(concurrency);
            }

            debug!(stage = %stage.name, in_progress_count, "stage targets still in progress");
            return Ok(None);
        }

        let now = Utc::now();
        for target in &pending {
            self.dao.update_target_state(&target.target_id, TargetState::InProgress, None, now)?;
        }

        let has_more = pending.len() == batch_size;
        debug!(stage = %stage.name, batch_size = pending.len(), "retrieved batch");
        Ok(Some(BatchResult { stage_id: stage.stage_id, stage_name: stage.name, targets: pending, has_more }))
    }

    fn transition_target(&self, target_id: &str, state: TargetState, error: Option<&str>, event_type: &str, payload: String) -> Result<(), CoordinatorError> {
        let run_id = self.current_run.as_ref().map(|r| r.run_id.clone());
        self.dao.update_target_state(target_id, state, error, Utc::now())?;
        if let Some(run_id) = run_id {
            self.record_event(&run_id, event_type, &payload)?;
        }
        Ok(())
    }

    pub fn complete_target(&self, target_id: &str) -> Result<(), CoordinatorError> {
        self.transition_target(target_id, TargetState::Completed, None, "target_completed", format!(r#"{{"target_id":"{target_id}"}}"#))
    }

    pub fn fail_target(&self, target_id: &str, error: &str) -> Result<(), CoordinatorError> {
        warn!(target_id, error, "target failed");
        self.transition_target(target_id, TargetState::Failed, Some(error), "target_failed", format!(r#"{{"target_id":"{target_id}","error":{error:?}}}"#))
    }

    pub fn skip_target(&self, target_id: &str, reason: &str) -> Result<(), CoordinatorError> {
        self.transition_target(target_id, TargetState::Skipped, Some(reason), "target_skipped", format!(r#"{{"target_id":"{target_id}","reason":{reason:?}}}"#))
    }

    pub fn pause_run(&mut self) -> Result<(), CoordinatorError> {
        let run = self.current_run.as_ref().ok_or(CoordinatorError::NoActiveRun)?;
        self.dao.update_run_status(&run.run_id, RunStatus::Paused)?;
        self.record_event(&run.run_id, "run_paused", &format!(r#"{{"stage_index":{}}}"#, self.current_stage_index))?;
        if let Some(r) = self.current_run.as_mut() {
            r.status = RunStatus::Paused;
        }
        Ok(())
    }

    pub fn resume_run(&mut self) -> Result<(), CoordinatorError> {
        let run = self.current_run.as_ref().ok_or(CoordinatorError::NoActiveRun)?;
        self.dao.update_run_status(&run.run_id, RunStatus::Active)?;
        self.record_event(&run.run_id, "run_resumed", &format!(r#"{{"stage_index":{}}}"#, self.current_stage_index))?;
        if let Some(r) = self.current_run.as_mut() {
            r.status = RunStatus::Active;
        }
        Ok(())
    }

    pub fn abort_run(&mut self, reason: &str) -> Result<(), CoordinatorError> {
        let run = match self.current_run.as_ref() {
            Some(r) => r.clone(),
            None => return Ok(()),
        };
        self.dao.update_run_status(&run.run_id, RunStatus::Aborted)?;
        warn!(run_id = %run.run_id, reason, "rollout run aborted");
        self.record_event(&run.run_id, "run_aborted", &format!(r#"{{"reason":{reason:?}}}"#))?;
        if let Some(r) = self.current_run.as_mut() {
            r.status = RunStatus::Aborted;
        }
        Ok(())
    }

    pub fn get_run_status(&self) -> Option<(&Run, usize, Option<&Stage>)> {
        self.current_run.as_ref().map(|run| (run, self.current_stage_index, self.current_stages.get(self.current_stage_index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::strategy::{BlastStrategy, GroupAttribute, PhasedStrategy};

    fn devices(names: &[&str]) -> Vec<DeviceInfo> {
        names.iter().map(|n| DeviceInfo { hostname: n.to_string(), region: None, role: None }).collect()
    }

    #[test]
    fn plan_run_creates_active_run_with_pending_targets() {
        let mut coordinator = MultiRouterCoordinator::new(RolloutDao::open_in_memory().unwrap(), CoordinatorConfig::default());
        let strategy = BlastStrategy { concurrency: 5 };
        let run_id = coordinator.plan_run(&devices(&["r1", "r2"]), &BTreeMap::new(), &strategy, Some("operator")).unwrap();
        let (run, stage_index, _) = coordinator.get_run_status().unwrap();
        assert_eq!(run.run_id, run_id);
        assert_eq!(run.status, RunStatus::Active);
        assert_eq!(stage_index, 0);
    }

    #[test]
    fn next_batch_marks_targets_in_progress_and_advances_stage_on_exhaustion() {
        let mut coordinator = MultiRouterCoordinator::new(RolloutDao::open_in_memory().unwrap(), CoordinatorConfig { default_concurrency: 5, enable_events: true });
        let strategy = BlastStrategy { concurrency: 5 };
        coordinator.plan_run(&devices(&["r1", "r2"]), &BTreeMap::new(), &strategy, None).unwrap();

        let batch = coordinator.next_batch(None).unwrap().unwrap();
        assert_eq!(batch.targets.len(), 2);

        for target in &batch.targets {
            coordinator.complete_target(&target.target_id).unwrap();
        }

        // stage now has no pending/in-progress targets -> advances past the last stage -> completed
        let next = coordinator.next_batch(None).unwrap();
        assert!(next.is_none());
        let (run, _, _) = coordinator.get_run_status().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn completed_run_rejects_further_batches() {
        let mut coordinator = MultiRouterCoordinator::new(RolloutDao::open_in_memory().unwrap(), CoordinatorConfig::default());
        let strategy = BlastStrategy { concurrency: 5 };
        coordinator.plan_run(&devices(&["r1"]), &BTreeMap::new(), &strategy, None).unwrap();
        let batch = coordinator.next_batch(None).unwrap().unwrap();
        coordinator.complete_target(&batch.targets[0].target_id).unwrap();
        coordinator.next_batch(None).unwrap();

        let err = coordinator.next_batch(None).unwrap_err();
        assert!(matches!(err, CoordinatorError::RunTerminal(_)));
    }

    #[test]
    fn abort_run_sets_aborted_status() {
        let mut coordinator = MultiRouterCoordinator::new(RolloutDao::open_in_memory().unwrap(), CoordinatorConfig::default());
        let strategy = BlastStrategy { concurrency: 5 };
        coordinator.plan_run(&devices(&["r1"]), &BTreeMap::new(), &strategy, None).unwrap();
        coordinator.abort_run("operator requested").unwrap();
        let (run, _, _) = coordinator.get_run_status().unwrap();
        assert_eq!(run.status, RunStatus::Aborted);
    }

    #[test]
    fn hydrate_from_db_resumes_at_first_non_terminal_stage() {
        let mut coordinator = MultiRouterCoordinator::new(RolloutDao::open_in_memory().unwrap(), CoordinatorConfig::default());
        let strategy = PhasedStrategy { group_by: GroupAttribute::Region, concurrency: 5 };
        let run_id = coordinator
            .plan_run(
                &[
                    DeviceInfo { hostname: "r1".to_string(), region: Some("eu".to_string()), role: None },
                    DeviceInfo { hostname: "r2".to_string(), region: Some("us".to_string()), role: None },
                ],
                &BTreeMap::new(),
                &strategy,
                None,
            )
            .unwrap();

        let batch = coordinator.next_batch(None).unwrap().unwrap();
        coordinator.complete_target(&batch.targets[0].target_id).unwrap();
        // stage "eu" is now terminal; simulate a process restart by resetting in-memory state
        coordinator.current_run = None;
        coordinator.current_stages = Vec::new();
        coordinator.current_stage_index = 0;

        coordinator.hydrate_from_db(&run_id).unwrap();
        assert_eq!(coordinator.current_stage_index, 1);
    }
}
