//! Policy generation and adaptation (C7, C11): turning an AS number or AS-SET into validated
//! Juniper configuration text, cached and ready for router-scoped assembly.

pub mod adapter;
pub mod generator;
pub mod model;

pub use adapter::{adapt, AdapterError, AdaptedConfig, OutputForm, PolicyFragment};
pub use generator::{
    generate_batch, validate_policy_name, Bgpq4Runner, GenerateResult, GenerateTarget, GeneratorConfig, GeneratorError,
    PolicyGenerator, RealBgpq4,
};
pub use model::PolicyArtifact;
