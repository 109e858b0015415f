//! Multi-router rollout: entities, strategies, persistence, and the coordinator (C13).

pub mod coordinator;
pub mod dao;
pub mod model;
pub mod strategy;

pub use coordinator::{BatchResult, CoordinatorConfig, CoordinatorError, MultiRouterCoordinator};
pub use dao::{DaoError, RolloutDao};
pub use model::{policy_hash, Event, Run, RunStatus, Stage, Target, TargetState};
pub use strategy::{BlastStrategy, CanaryStrategy, DeviceInfo, GroupAttribute, PhasedStrategy, PlannedStage, PlannedTarget, RolloutStrategy};
