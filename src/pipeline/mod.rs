//! Pipeline orchestrator (C14): wires collection (C2) -> inspection (C3) -> policy generation
//! (C7) -> RPKI validation (C8) -> guardrails (C10) -> policy adaptation (C11) -> NETCONF
//! application (C12), invoking the rollout coordinator (C13) when a run spans more than one
//! router.
//!
//! One function builds every collaborator, then drives them in sequence per device, in the
//! fixed stage order above.

pub mod artifacts;
pub mod inventory;
pub mod reports;
pub mod resources;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use ipnet::IpNet;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::context::ContextDefault;
use crate::error::OttoError;
use crate::guardrail::{
    BogonCheckRule, ChangeSet, GuardrailEngine, GuardrailReport, GuardrailRule, Mode, PrefixCountRule, RpkiValidationRule,
    RuleContext, SessionImpactRule,
};
use crate::inspector::{self, Pattern};
use crate::netconf::{ConfirmWindow, Datastore, DiffFormat, NetconfSession, NetconfTransport};
use crate::policy::adapter::{self, AdaptedConfig, OutputForm, PolicyFragment};
use crate::policy::generator::{Bgpq4Runner, GenerateResult, GenerateTarget, GeneratorConfig, PolicyGenerator};
use crate::rollout::coordinator::{BatchResult as RolloutBatch, MultiRouterCoordinator};
use crate::rollout::strategy::{DeviceInfo, RolloutStrategy};
use crate::rpki::{self, OverrideStore, ValidationResult, VrpSnapshot};
use crate::ssh::collector::{Auth, CollectCommand, CollectorConfig, Device, DeviceResult, SshSession};
use crate::ssh::host_keys::HostKeyStore;

/// Knobs the pipeline needs beyond the per-module configs already owned by `policy::generator`,
/// `ssh::collector`, etc. Mirrors the fields of `config::Config` the orchestrator actually reads.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub min_as: u32,
    pub max_as: u32,
    pub strict_as_filtering: bool,
    pub output_form: OutputForm,
    pub guardrail_mode: Mode,
    pub rpki_enabled: bool,
    pub prefix_count_threshold: usize,
    pub bogon_prefixes: Vec<String>,
    pub session_impact_threshold: usize,
}

/// The default guardrail rule set, with `rpki_validation` mandatory -- the
/// one rule `GuardrailEngine::validate_config` refuses to start without when RPKI is enabled.
pub fn default_guardrail_rules(session_impact_threshold: usize) -> Vec<Box<dyn GuardrailRule>> {
    vec![
        Box::new(PrefixCountRule),
        Box::new(BogonCheckRule),
        Box::new(RpkiValidationRule),
        Box::new(SessionImpactRule { threshold: session_impact_threshold }),
    ]
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}/\d{1,2})").unwrap())
}

/// Pulls every IPv4 CIDR token out of a `bgpq4` fragment. `policy::adapter::extract_prefix_lists`
/// parses the same text into named prefix-list blocks, but keeps its match private and returns
/// strings, not `IpNet` -- RPKI validation and guardrail evaluation need typed prefixes, so this
/// walks the raw fragment text directly instead.
pub fn extract_prefixes(text: &str) -> Vec<IpNet> {
    prefix_re().captures_iter(text).filter_map(|c| c[1].parse().ok()).collect()
}

/// Fails closed: a stale or missing VRP snapshot is a hard error
/// when `fail_closed` is set, a logged warning otherwise.
pub fn rpki_preflight(snapshot_path: &Path, max_age: Duration, fail_closed: bool) -> Result<(), OttoError> {
    match rpki::preflight(snapshot_path, max_age, SystemTime::now()) {
        Ok(()) => Ok(()),
        Err(err) if fail_closed => Err(OttoError::Data(format!("VRP cache stale: {err}"))),
        Err(err) => {
            warn!(error = %err, "continuing without fresh RPKI data (fail_closed=false)");
            Ok(())
        }
    }
}

/// Everything the pipeline learned about one router: the raw collection outcome, extracted AS
/// numbers, per-AS generation results, RPKI validations, the guardrail verdict, and (if
/// generation produced at least one fragment) the router-scoped adapted configuration.
#[derive(Debug, Clone)]
pub struct DeviceOutcome {
    pub hostname: String,
    pub collection_error: Option<String>,
    pub as_numbers: Vec<u32>,
    pub warnings: Vec<String>,
    pub generated: Vec<GenerateResult>,
    pub validations: Vec<ValidationResult>,
    pub guardrail: Option<GuardrailReport>,
    pub adapted: Option<AdaptedConfig>,
}

impl DeviceOutcome {
    fn collection_failed(hostname: String, error: String) -> Self {
        Self {
            hostname,
            collection_error: Some(error),
            as_numbers: Vec::new(),
            warnings: Vec::new(),
            generated: Vec::new(),
            validations: Vec::new(),
            guardrail: None,
            adapted: None,
        }
    }
}

/// Runs the inspect -> generate -> validate -> guardrail -> adapt stages for one already-collected
/// device. `rpki` is `None` when RPKI validation is disabled; present, it carries the shared
/// snapshot and override store used for every device in the fleet.
pub fn run_device_pipeline<R: Bgpq4Runner>(
    device_result: &DeviceResult,
    config: &PipelineConfig,
    generator: &mut PolicyGenerator<'_, R>,
    rpki_ctx: Option<(&VrpSnapshot, &OverrideStore)>,
    guardrails: &GuardrailEngine,
) -> DeviceOutcome {
    let hostname = device_result.device.hostname.clone();
    if !device_result.success {
        let error = device_result.error.clone().unwrap_or_else(|| "collection failed".to_string());
        warn!(hostname = %hostname, error = %error, "skipping pipeline stages for uncollected device");
        return DeviceOutcome::collection_failed(hostname, error);
    }

    let extraction = inspector::extract(&device_result.text, Pattern::PeerAs, config.min_as, config.max_as, config.strict_as_filtering);
    let as_numbers: Vec<u32> = extraction.as_numbers.iter().map(|a| a.get()).collect();

    let mut generated = Vec::with_capacity(as_numbers.len());
    let mut fragments = Vec::new();
    for &as_number in &as_numbers {
        match generator.generate(GenerateTarget::AsNumber(as_number), None, None) {
            Ok(result) => {
                if result.success {
                    fragments.push(PolicyFragment { as_number, text: result.text.clone() });
                }
                generated.push(result);
            }
            Err(e) => {
                warn!(hostname = %hostname, as_number, error = %e, "policy generation failed");
                generated.push(GenerateResult {
                    target: format!("AS{as_number}"),
                    success: false,
                    text: String::new(),
                    error: Some(e.to_string()),
                    from_cache: false,
                });
            }
        }
    }

    let mut validations = Vec::new();
    let mut rpki_states = Vec::new();
    if let Some((snapshot, overrides)) = rpki_ctx {
        for fragment in &fragments {
            for prefix in extract_prefixes(&fragment.text) {
                match rpki::check(snapshot, overrides, &prefix, fragment.as_number) {
                    Ok(result) => {
                        rpki_states.push((prefix.to_string(), result.state, result.allowlisted));
                        validations.push(result);
                    }
                    Err(e) => warn!(hostname = %hostname, %prefix, error = %e, "rpki validation failed"),
                }
            }
        }
    }

    let added_prefixes: Vec<String> = fragments
        .iter()
        .flat_map(|f| extract_prefixes(&f.text))
        .map(|p| p.to_string())
        .collect();

    let change_set = ChangeSet {
        as_number: as_numbers.first().copied().unwrap_or_default(),
        added_prefixes,
        removed_prefixes: Vec::new(),
        rpki_states,
        sessions_affected_estimate: as_numbers.len(),
    };
    let rule_context = RuleContext {
        rpki_enabled: config.rpki_enabled,
        prefix_count_threshold: config.prefix_count_threshold,
        bogon_prefixes: config.bogon_prefixes.clone(),
    };
    let guardrail = Some(guardrails.evaluate(&change_set, &rule_context, config.guardrail_mode));

    let adapted = if fragments.is_empty() {
        None
    } else {
        match adapter::adapt(&hostname, &fragments, config.output_form) {
            Ok(adapted) => Some(adapted),
            Err(e) => {
                warn!(hostname = %hostname, error = %e, "policy adaptation failed");
                None
            }
        }
    };

    DeviceOutcome {
        hostname,
        collection_error: None,
        as_numbers,
        warnings: extraction.warnings,
        generated,
        validations,
        guardrail,
        adapted,
    }
}

/// Collects the whole fleet over SSH, then runs the per-device pipeline for each result against
/// one shared policy cache, RPKI snapshot, and guardrail engine.
#[allow(clippy::too_many_arguments)]
pub fn run_fleet<S, R>(
    devices: Vec<Device>,
    collect_command: CollectCommand,
    collector_config: CollectorConfig,
    host_keys: Arc<Mutex<HostKeyStore>>,
    auth: impl Fn() -> Auth<'static> + Send + Sync + 'static,
    runner: &R,
    cache: &mut crate::cache::PolicyCache,
    generator_config: GeneratorConfig,
    rpki_ctx: Option<(&VrpSnapshot, &OverrideStore)>,
    guardrails: &GuardrailEngine,
    pipeline_config: &PipelineConfig,
    ctx: ContextDefault,
) -> Vec<DeviceOutcome>
where
    S: SshSession + 'static,
    R: Bgpq4Runner,
{
    info!(device_count = devices.len(), "starting fleet collection");
    let device_results = crate::ssh::collector::collect_all::<S>(devices, collect_command, collector_config, host_keys, auth, ctx);

    device_results
        .iter()
        .map(|device_result| {
            let mut generator = PolicyGenerator::new(runner, cache, generator_config.clone());
            run_device_pipeline(device_result, pipeline_config, &mut generator, rpki_ctx, guardrails)
        })
        .collect()
}

/// Builds the policy map a rollout plan needs (hostname -> adapted configuration text) from a
/// set of per-device pipeline outcomes, then hands it to the coordinator along with the device
/// roster and the caller's chosen strategy.
pub fn plan_rollout_from_outcomes(
    coordinator: &mut MultiRouterCoordinator,
    devices: &[DeviceInfo],
    outcomes: &[DeviceOutcome],
    strategy: &dyn RolloutStrategy,
    initiated_by: Option<&str>,
) -> Result<String, OttoError> {
    let policies: BTreeMap<String, String> = outcomes
        .iter()
        .filter_map(|o| o.adapted.as_ref().map(|a| (o.hostname.clone(), a.text.clone())))
        .collect();
    Ok(coordinator.plan_run(devices, &policies, strategy, initiated_by)?)
}

/// Drives one target through the NETCONF lock/load/diff/confirmed-commit lifecycle. `auto_confirm`
/// is the guardrail verdict's `auto_apply` flag: true sends the confirmation immediately (an
/// autonomous safe change), false leaves the window to elapse and lets the device self-rollback
/// unless an operator confirms out of band before `window.wait()` returns.
pub fn apply_target<T: NetconfTransport>(
    mut session: NetconfSession<T>,
    config_text: &str,
    confirm_window: Option<Duration>,
    auto_confirm: bool,
) -> Result<(), OttoError> {
    session.lock(Datastore::Candidate)?;
    session.load_candidate(config_text)?;
    session.diff(DiffFormat::Text)?;

    let window: ConfirmWindow = session.confirmed_commit(confirm_window)?;
    if auto_confirm {
        let _ = window.confirm_handle().send(());
    }

    match window.wait() {
        Ok(()) => {
            session.confirm()?;
            session.unlock(Datastore::Candidate)?;
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "confirm window elapsed, rolling back");
            session.rollback()?;
            let _ = session.unlock(Datastore::Candidate);
            Err(e.into())
        }
    }
}

/// Applies one coordinator-dispensed batch over NETCONF, feeding the per-target outcome back
/// into `complete_target`/`fail_target`/`skip_target`. `auto_confirm_for` typically closes over
/// the per-device `GuardrailReport.auto_apply` computed earlier in the pipeline.
pub fn apply_batch<T, F, A>(
    coordinator: &MultiRouterCoordinator,
    batch: &RolloutBatch,
    policies: &BTreeMap<String, String>,
    confirm_window: Option<Duration>,
    mut transport_factory: F,
    auto_confirm_for: A,
) where
    T: NetconfTransport,
    F: FnMut(&str) -> Result<T, OttoError>,
    A: Fn(&str) -> bool,
{
    for target in &batch.targets {
        let Some(text) = policies.get(&target.hostname) else {
            warn!(hostname = %target.hostname, "no adapted configuration available for target");
            let _ = coordinator.skip_target(&target.target_id, "no adapted configuration available");
            continue;
        };

        let transport = match transport_factory(&target.hostname) {
            Ok(t) => t,
            Err(e) => {
                let _ = coordinator.fail_target(&target.target_id, &e.to_string());
                continue;
            }
        };

        let session = NetconfSession::new(transport, target.hostname.clone());
        let auto_confirm = auto_confirm_for(&target.hostname);
        match apply_target(session, text, confirm_window, auto_confirm) {
            Ok(()) => {
                info!(hostname = %target.hostname, "applied configuration");
                let _ = coordinator.complete_target(&target.target_id);
            }
            Err(e) => {
                let _ = coordinator.fail_target(&target.target_id, &e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PolicyCache;
    use crate::guardrail::GuardrailEngine;
    use crate::policy::generator::Bgpq4Runner;
    use crate::ssh::collector::Device;
    use std::time::Duration;

    struct FakeRunner {
        stdout: String,
    }
    impl Bgpq4Runner for FakeRunner {
        fn run(&self, _args: &[String], _timeout: Duration) -> Result<crate::command::ProcessOutput, crate::policy::generator::GeneratorError> {
            Ok(crate::command::ProcessOutput { status_success: true, stdout: self.stdout.clone(), stderr: String::new() })
        }
    }

    fn pipeline_config() -> PipelineConfig {
        PipelineConfig {
            min_as: 256,
            max_as: u32::MAX,
            strict_as_filtering: false,
            output_form: OutputForm::Hierarchical,
            guardrail_mode: Mode::Autonomous,
            rpki_enabled: false,
            prefix_count_threshold: 1000,
            bogon_prefixes: vec![],
            session_impact_threshold: 1000,
        }
    }

    #[test]
    fn extract_prefixes_finds_every_cidr_token() {
        let text = "prefix-list AS65001 { route-filter 203.0.113.0/24 exact; route-filter 198.51.100.0/24 exact; }";
        let prefixes = extract_prefixes(text);
        assert_eq!(prefixes.len(), 2);
    }

    #[test]
    fn run_device_pipeline_skips_stages_for_failed_collection() {
        let device_result = DeviceResult {
            device: Device { hostname: "r1".to_string(), address: "10.0.0.1".to_string(), port: 830 },
            text: String::new(),
            success: false,
            error: Some("connection refused".to_string()),
        };
        let runner = FakeRunner { stdout: String::new() };
        let mut cache = PolicyCache::open_in_memory().unwrap();
        let generator_config = GeneratorConfig { bgpq4_path: "bgpq4".to_string(), timeout: Duration::from_secs(5), default_ttl_hours: 24, irr_server_override: None };
        let mut generator = PolicyGenerator::new(&runner, &mut cache, generator_config);
        let guardrails = GuardrailEngine::new(crate::pipeline::default_guardrail_rules(1000));

        let outcome = run_device_pipeline(&device_result, &pipeline_config(), &mut generator, None, &guardrails);
        assert_eq!(outcome.collection_error.as_deref(), Some("connection refused"));
        assert!(outcome.generated.is_empty());
    }

    #[test]
    fn run_device_pipeline_generates_and_adapts_for_successful_collection() {
        let device_result = DeviceResult {
            device: Device { hostname: "r1".to_string(), address: "10.0.0.1".to_string(), port: 830 },
            text: "neighbor 192.0.2.1 { peer-as 65001; }".to_string(),
            success: true,
            error: None,
        };
        let runner = FakeRunner { stdout: "policy-options {\nreplace:\nprefix-list AS65001 {\n203.0.113.0/24;\n}\n}".to_string() };
        let mut cache = PolicyCache::open_in_memory().unwrap();
        let generator_config = GeneratorConfig { bgpq4_path: "bgpq4".to_string(), timeout: Duration::from_secs(5), default_ttl_hours: 24, irr_server_override: None };
        let mut generator = PolicyGenerator::new(&runner, &mut cache, generator_config);
        let guardrails = GuardrailEngine::new(crate::pipeline::default_guardrail_rules(1000));

        let outcome = run_device_pipeline(&device_result, &pipeline_config(), &mut generator, None, &guardrails);
        assert_eq!(outcome.as_numbers, vec![65001]);
        assert!(outcome.generated[0].success);
        assert!(outcome.adapted.is_some());
        assert!(outcome.guardrail.unwrap().safe);
    }

    #[test]
    fn rpki_preflight_is_fail_open_when_not_fail_closed() {
        let result = rpki_preflight(Path::new("/nonexistent/vrps.json"), Duration::from_secs(3600), false);
        assert!(result.is_ok());
    }

    #[test]
    fn rpki_preflight_fails_closed_with_vrp_cache_stale_message() {
        let err = rpki_preflight(Path::new("/nonexistent/vrps.json"), Duration::from_secs(3600), true).unwrap_err();
        assert!(err.to_string().contains("VRP cache stale"));
    }
}
