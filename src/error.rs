//! Top-level error type composed at the orchestrator/CLI boundary.
//!
//! Each module owns its own `thiserror`-derived error enum; `OttoError` only exists where
//! callers need a single type to match on (the pipeline orchestrator and the CLI).

use thiserror::Error;

use crate::guardrail::GuardrailError;
use crate::inspector::InspectorError;
use crate::netconf::NetconfError;
use crate::policy::{AdapterError, GeneratorError};
use crate::rollout::CoordinatorError;
use crate::rpki::ValidatorError;
use crate::ssh::CollectorError;

/// The six error kinds, expressed as variant groups rather than a flat
/// string-keyed field so each carries the module-specific detail that produced it.
#[derive(Error, Debug)]
pub enum OttoError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("connection error: {0}")]
    Connection(#[from] CollectorError),

    #[error("inspector error: {0}")]
    Inspector(#[from] InspectorError),

    #[error("policy generation error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("policy adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("rpki validation error: {0}")]
    Rpki(#[from] ValidatorError),

    #[error("guardrail error: {0}")]
    Guardrail(#[from] GuardrailError),

    #[error("netconf error: {0}")]
    Netconf(#[from] NetconfError),

    #[error("rollout coordinator error: {0}")]
    Rollout(#[from] CoordinatorError),

    #[error("security error: {0}")]
    Security(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OttoError {
    /// Numeric exit code: 0 success, 1 generic, 2 fatal/validation-failed,
    /// 128+signum on signal (handled separately by the binary's signal handler).
    pub fn exit_code(&self) -> i32 {
        match self {
            OttoError::Validation(_) | OttoError::Configuration(_) | OttoError::Security(_) => 2,
            _ => 1,
        }
    }
}
