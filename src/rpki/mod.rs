//! RPKI validation (C8) and override management (C9).

pub mod model;
pub mod overrides;
pub mod validator;

pub use model::{AggregateSummary, ValidationResult, ValidationState, Vrp};
pub use overrides::{OverrideError, OverrideStore};
pub use validator::{check, check_as, check_many, chunk_size, preflight, ValidatorError, VrpSnapshot};
