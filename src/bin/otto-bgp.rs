//! Binary entry point: parses arguments, loads configuration, wires up logging and a
//! cancellation context, dispatches into the library's per-component modules, and translates
//! the result into a process exit code via [`OttoError::exit_code`].
//!
//! Uses `Cli::parse()`, `ctrlc`-driven cooperative cancellation through the same
//! [`otto_bgp::context::Ctx`] trait the worker pools already use, and a resource registry run
//! on every exit path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use clap::Parser;
use rusqlite::Connection;
use tracing::warn;

use otto_bgp::cache::PolicyCache;
use otto_bgp::cli::{messages, Cli, Command, RolloutAction, StrategyArg};
use otto_bgp::config::{Config, TimeoutKind, TimeoutManager};
use otto_bgp::context::{ContextDefault, Ctx};
use otto_bgp::discovery::{DiscoveryStore, RouterProfile};
use otto_bgp::error::OttoError;
use otto_bgp::guardrail::{GuardrailEngine, Mode as GuardrailMode, RuleContext};
use otto_bgp::irr_proxy::IrrProxyManager;
use otto_bgp::logging::Logging;
use otto_bgp::netconf::{NetconfSession, Ssh2NetconfTransport};
use otto_bgp::pipeline::resources::ResourceRegistry;
use otto_bgp::pipeline::{self, inventory, reports};
use otto_bgp::policy::adapter::{self, OutputForm, PolicyFragment};
use otto_bgp::policy::generator::{GenerateTarget, GeneratorConfig, PolicyGenerator, RealBgpq4};
use otto_bgp::rollout::strategy::{BlastStrategy, CanaryStrategy, DeviceInfo, GroupAttribute, PhasedStrategy, RolloutStrategy};
use otto_bgp::rollout::{CoordinatorConfig, MultiRouterCoordinator, RolloutDao};
use otto_bgp::rpki::{OverrideStore, VrpSnapshot};
use otto_bgp::ssh::collector::{clamp_workers, Auth, CollectCommand, CollectorConfig, Device, Ssh2Session};
use otto_bgp::ssh::host_keys::{HostKeyStore, Mode as HostKeyMode};
use otto_bgp::types::sanitize_hostname;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = Logging::try_init() {
        eprintln!("{}", messages::fatal(format!("failed to initialize logging: {e}")));
        return ExitCode::from(1);
    }

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", messages::fatal(messages::with_suggestion(&e.to_string())));
            return ExitCode::from(2);
        }
    };

    let ctx = ContextDefault::new();
    let resources = ResourceRegistry::new();

    {
        let mut ctx_for_signal = ctx.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            warn!("received termination signal, cancelling in-flight work");
            ctx_for_signal.cancel();
        }) {
            warn!(error = %e, "failed to install signal handler");
        }
    }

    let result = run(cli, config, ctx, &resources);
    resources.run_all();

    match result {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("{}", messages::error(messages::with_suggestion(&e.to_string())));
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: Cli, config: Config, ctx: ContextDefault, resources: &ResourceRegistry) -> Result<(), OttoError> {
    let irr_proxies = if config.irr_proxies.is_empty() {
        None
    } else {
        let manager = Arc::new(IrrProxyManager::new(config.irr_proxies.clone()));
        for (name, result) in manager.establish_all() {
            if let Err(e) = result {
                warn!(name, error = %e, "failed to establish irr proxy tunnel");
            }
        }
        let cleanup_handle = Arc::clone(&manager);
        resources.register(move || drop(cleanup_handle));
        Some(manager)
    };

    match cli.command {
        Command::Collect { inventory, output_dir } => handle_collect(&config, &inventory, &output_dir, ctx),
        Command::Generate { as_numbers, output_dir } => {
            let irr_override = irr_proxies.as_ref().and_then(|manager| {
                config.irr_proxies.first().and_then(|proxy| manager.irr_server_override(&proxy.name))
            });
            handle_generate(&config, &as_numbers, &output_dir, irr_override)
        }
        Command::Validate { prefix, as_number } => handle_validate(&config, &prefix, as_number),
        Command::Adapt { router, inputs } => handle_adapt(&router, &inputs),
        Command::Apply { router, config_file } => handle_apply(&config, &router, &config_file),
        Command::Rollout { action } => handle_rollout(&config, action),
        Command::Status { run_id } => handle_status(&config, &run_id),
        Command::Build { output_dir } => handle_build(&config, &output_dir),
        Command::Report { output_dir } => handle_report(&config, &output_dir),
    }
}

/// Resolves SSH credentials from the environment once per process: a configured private key
/// path takes priority over a password. Both are stashed in `OnceLock`s so the closure handed to
/// `collect_all`/`Ssh2NetconfTransport::connect` can hand out `Auth<'static>` borrows without
/// leaking memory on every call.
fn build_auth() -> Auth<'static> {
    static KEY_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();
    static PASSPHRASE: OnceLock<Option<String>> = OnceLock::new();
    static PASSWORD: OnceLock<String> = OnceLock::new();

    let key_path = KEY_PATH.get_or_init(|| std::env::var("OTTO_BGP_SSH_KEY_PATH").ok().map(PathBuf::from));
    if let Some(path) = key_path {
        let passphrase = PASSPHRASE.get_or_init(|| std::env::var("OTTO_BGP_SSH_KEY_PASSPHRASE").ok());
        Auth::PrivateKey { path, passphrase: passphrase.as_deref() }
    } else {
        let password = PASSWORD.get_or_init(|| std::env::var("OTTO_BGP_SSH_PASSWORD").unwrap_or_default());
        Auth::Password(password.as_str())
    }
}

fn ssh_username() -> String {
    std::env::var("OTTO_BGP_SSH_USER").unwrap_or_else(|_| "otto-bgp".to_string())
}

fn handle_collect(config: &Config, inventory_path: &Path, output_dir: &Path, ctx: ContextDefault) -> Result<(), OttoError> {
    let descriptors = inventory::load_csv(inventory_path).map_err(|e| OttoError::Data(e.to_string()))?;
    if descriptors.is_empty() {
        println!("{}", messages::warning("inventory produced no devices"));
        return Ok(());
    }
    std::fs::create_dir_all(output_dir)?;

    let devices: Vec<Device> = descriptors.iter().map(|d| Device { hostname: d.hostname.clone(), address: d.address.clone(), port: 22 }).collect();
    let host_key_mode = if config.ssh.setup_mode { HostKeyMode::Setup } else { HostKeyMode::Strict };
    let host_keys = HostKeyStore::load(&config.ssh.known_hosts_path, host_key_mode).map_err(|e| OttoError::Security(e.to_string()))?;
    let collector_config = CollectorConfig {
        username: ssh_username(),
        connect_timeout: TimeoutManager::global().get(TimeoutKind::Ssh),
        command_timeout: TimeoutManager::global().get(TimeoutKind::Network),
        max_workers: clamp_workers(config.ssh.max_workers, devices.len()),
    };

    let results = otto_bgp::ssh::collector::collect_all::<Ssh2Session>(
        devices,
        CollectCommand::FullBgpConfig,
        collector_config,
        Arc::new(Mutex::new(host_keys)),
        build_auth,
        ctx,
    );

    let mut store = DiscoveryStore::open(&config.database.path)
        .map_err(|e| OttoError::Data(e.to_string()))?
        .with_history_dir(PathBuf::from("discovered/history"));
    for (descriptor, result) in descriptors.iter().zip(results.iter()) {
        if !result.success {
            println!("{}", messages::error(format!("{}: {}", descriptor.hostname, result.error.clone().unwrap_or_default())));
            continue;
        }

        let artifact_path = output_dir.join(format!("{}.conf", sanitize_hostname(&descriptor.hostname)));
        std::fs::write(&artifact_path, &result.text)?;

        let extraction = otto_bgp::inspector::extract(
            &result.text,
            otto_bgp::inspector::Pattern::PeerAs,
            config.policy.min_as,
            config.policy.max_as,
            config.policy.strict_as_filtering,
        );
        let profile = RouterProfile {
            hostname: descriptor.hostname.clone(),
            address: descriptor.address.clone(),
            discovered_as_numbers: extraction.as_numbers.iter().map(|a| a.get()).collect(),
            bgp_groups: extraction.bgp_groups.into_iter().map(|(name, members)| (name, members.into_iter().map(|a| a.get()).collect())).collect(),
            platform: Some("junos".to_string()),
            role: descriptor.role.clone(),
            region: descriptor.region.clone(),
            last_confirmed: chrono::Utc::now(),
        };
        let as_count = profile.discovered_as_numbers.len();
        store.upsert_router(&profile).map_err(|e| OttoError::Data(e.to_string()))?;
        println!("{}", messages::info(format!("{}: collected {as_count} AS numbers -> {}", descriptor.hostname, artifact_path.display())));
    }

    Ok(())
}

fn handle_generate(config: &Config, as_numbers: &[u32], output_dir: &Path, irr_server_override: Option<String>) -> Result<(), OttoError> {
    if as_numbers.is_empty() {
        return Err(OttoError::Validation("at least one --as-numbers value is required".to_string()));
    }
    std::fs::create_dir_all(output_dir)?;

    let conn = Connection::open(&config.database.path)?;
    let mut cache = PolicyCache::open(conn).map_err(|e| OttoError::Data(e.to_string()))?;
    let runner = RealBgpq4 { binary_path: config.policy.bgpq4_path.clone() };
    let generator_config = GeneratorConfig {
        bgpq4_path: config.policy.bgpq4_path.clone(),
        timeout: TimeoutManager::global().get(TimeoutKind::Process),
        default_ttl_hours: config.policy.default_ttl_hours as i64,
        irr_server_override,
    };
    let mut generator = PolicyGenerator::new(&runner, &mut cache, generator_config);

    for &as_number in as_numbers {
        let result = generator.generate(GenerateTarget::AsNumber(as_number), None, None)?;
        if result.success {
            let path = output_dir.join(format!("AS{as_number}_policy.txt"));
            std::fs::write(&path, &result.text)?;
            let cache_note = if result.from_cache { " (cache hit)" } else { "" };
            println!("{}", messages::info(format!("AS{as_number}: wrote {}{cache_note}", path.display())));
        } else {
            println!("{}", messages::error(format!("AS{as_number}: {}", result.error.unwrap_or_default())));
        }
    }
    Ok(())
}

/// Runs C7 (generate) -> C8 (validate) -> C10 (guardrails) -> C11 (adapt) for every router
/// already persisted by `collect`, writing per-router `AS<n>_policy.txt`/`metadata.json` under
/// `output_dir/<sanitised-hostname>/` and a flat `<sanitised-hostname>_adapted.conf` next to it
/// so `rollout plan` can pick it up, matching the convention `adapt` already uses.
fn handle_build(config: &Config, output_dir: &Path) -> Result<(), OttoError> {
    let store = DiscoveryStore::open(&config.database.path).map_err(|e| OttoError::Data(e.to_string()))?;
    let profiles = store.all_router_profiles().map_err(|e| OttoError::Data(e.to_string()))?;
    if profiles.is_empty() {
        println!("{}", messages::warning("no routers discovered yet; run `collect` first"));
        return Ok(());
    }
    std::fs::create_dir_all(output_dir)?;

    let conn = Connection::open(&config.database.path)?;
    let mut cache = PolicyCache::open(conn).map_err(|e| OttoError::Data(e.to_string()))?;
    let runner = RealBgpq4 { binary_path: config.policy.bgpq4_path.clone() };
    let generator_config = GeneratorConfig {
        bgpq4_path: config.policy.bgpq4_path.clone(),
        timeout: TimeoutManager::global().get(TimeoutKind::Process),
        default_ttl_hours: config.policy.default_ttl_hours as i64,
        irr_server_override: None,
    };

    let rpki_loaded = if config.rpki.enabled {
        let max_age = Duration::from_secs(config.rpki.max_vrp_age_hours.saturating_mul(3600));
        pipeline::rpki_preflight(&config.rpki.vrp_snapshot_path, max_age, config.rpki.fail_closed)?;
        match VrpSnapshot::load_csv(&config.rpki.vrp_snapshot_path) {
            Ok(snapshot) => {
                let overrides_conn = Connection::open(&config.database.path)?;
                let overrides = OverrideStore::open(overrides_conn).map_err(|e| OttoError::Data(e.to_string()))?;
                Some((snapshot, overrides))
            }
            Err(e) => {
                warn!(error = %e, "continuing without RPKI annotation");
                None
            }
        }
    } else {
        None
    };

    let guardrail_rules = pipeline::default_guardrail_rules(config.guardrail.session_impact_threshold);
    let guardrails = GuardrailEngine::new(guardrail_rules);
    guardrails.validate_config(config.rpki.enabled)?;
    let guardrail_mode = if config.guardrail.autonomous { GuardrailMode::Autonomous } else { GuardrailMode::OperatorConfirmed };

    for profile in &profiles {
        let mut generator = PolicyGenerator::new(&runner, &mut cache, generator_config.clone());
        let mut results = Vec::with_capacity(profile.discovered_as_numbers.len());
        let mut fragments = Vec::new();
        for &as_number in &profile.discovered_as_numbers {
            let result = generator
                .generate(GenerateTarget::AsNumber(as_number), None, None)
                .unwrap_or_else(|e| otto_bgp::policy::generator::GenerateResult {
                    target: format!("AS{as_number}"),
                    success: false,
                    text: String::new(),
                    error: Some(e.to_string()),
                    from_cache: false,
                });
            if result.success {
                fragments.push(PolicyFragment { as_number, text: result.text.clone() });
            }
            results.push((as_number, result));
        }

        let artifact_dir = pipeline::artifacts::write_router_artifacts(output_dir, &profile.hostname, &results, true, chrono::Utc::now())
            .map_err(|e| OttoError::Data(e.to_string()))?;

        let mut rpki_states = Vec::new();
        let mut added_prefixes = Vec::new();
        if let Some((snapshot, overrides)) = &rpki_loaded {
            for fragment in &fragments {
                for prefix in pipeline::extract_prefixes(&fragment.text) {
                    added_prefixes.push(prefix.to_string());
                    if let Ok(validation) = otto_bgp::rpki::check(snapshot, overrides, &prefix, fragment.as_number) {
                        rpki_states.push((prefix.to_string(), validation.state, validation.allowlisted));
                    }
                }
            }
        } else {
            for fragment in &fragments {
                added_prefixes.extend(pipeline::extract_prefixes(&fragment.text).into_iter().map(|p| p.to_string()));
            }
        }

        let change_set = otto_bgp::guardrail::ChangeSet {
            as_number: profile.discovered_as_numbers.iter().next().copied().unwrap_or_default(),
            added_prefixes,
            removed_prefixes: Vec::new(),
            rpki_states,
            sessions_affected_estimate: profile.discovered_as_numbers.len(),
        };
        let rule_context = RuleContext {
            rpki_enabled: config.rpki.enabled,
            prefix_count_threshold: config.guardrail.prefix_count_threshold,
            bogon_prefixes: config.guardrail.bogon_prefixes.clone(),
        };
        let report = guardrails.evaluate(&change_set, &rule_context, guardrail_mode);

        if fragments.is_empty() {
            println!("{}", messages::warning(format!("{}: no policy fragments generated, skipping adapt", profile.hostname)));
            continue;
        }
        let adapted = adapter::adapt(&profile.hostname, &fragments, OutputForm::Hierarchical)?;
        let adapted_path = PathBuf::from("routers").join(format!("{}_adapted.conf", sanitize_hostname(&profile.hostname)));
        std::fs::create_dir_all("routers")?;
        std::fs::write(&adapted_path, &adapted.text)?;

        println!(
            "{}",
            messages::info(format!(
                "{}: {} AS numbers -> {} (risk={:?} auto_apply={})",
                profile.hostname,
                adapted.included_as_numbers.len(),
                artifact_dir.display(),
                report.risk_level,
                report.auto_apply
            ))
        );
        if !report.issues.is_empty() {
            for issue in &report.issues {
                println!("{}", messages::warning(issue));
            }
        }
    }

    Ok(())
}

fn handle_report(config: &Config, output_dir: &Path) -> Result<(), OttoError> {
    let store = DiscoveryStore::open(&config.database.path).map_err(|e| OttoError::Data(e.to_string()))?;
    let profiles = store.all_router_profiles().map_err(|e| OttoError::Data(e.to_string()))?;
    reports::generate_all(output_dir, &profiles, chrono::Utc::now()).map_err(|e| OttoError::Data(e.to_string()))?;
    println!("{}", messages::info(format!("wrote discovery reports for {} router(s) to {}", profiles.len(), output_dir.display())));
    Ok(())
}

fn handle_validate(config: &Config, prefix: &str, as_number: u32) -> Result<(), OttoError> {
    let prefix: ipnet::IpNet = prefix.parse().map_err(|_| OttoError::Validation(format!("invalid prefix: {prefix}")))?;
    let max_age = Duration::from_secs(config.rpki.max_vrp_age_hours.saturating_mul(3600));
    pipeline::rpki_preflight(&config.rpki.vrp_snapshot_path, max_age, config.rpki.fail_closed)?;

    let snapshot = VrpSnapshot::load_csv(&config.rpki.vrp_snapshot_path)?;
    let conn = Connection::open(&config.database.path)?;
    let overrides = OverrideStore::open(conn).map_err(|e| OttoError::Data(e.to_string()))?;

    let result = otto_bgp::rpki::check(&snapshot, &overrides, &prefix, as_number)?;
    println!("{}", messages::info(format!("{prefix} via AS{as_number}: {:?} ({})", result.state, result.reason)));
    Ok(())
}

fn handle_adapt(router: &str, inputs: &[PathBuf]) -> Result<(), OttoError> {
    let mut fragments = Vec::with_capacity(inputs.len());
    for input in inputs {
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let as_number: u32 = stem
            .split('_')
            .next()
            .and_then(|token| token.strip_prefix("AS"))
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| OttoError::Validation(format!("cannot parse an AS number from file name {}", input.display())))?;
        let text = std::fs::read_to_string(input)?;
        fragments.push(PolicyFragment { as_number, text });
    }

    let adapted = adapter::adapt(router, &fragments, OutputForm::Hierarchical)?;
    std::fs::create_dir_all("routers")?;
    let output_path = PathBuf::from("routers").join(format!("{}_adapted.conf", sanitize_hostname(router)));
    std::fs::write(&output_path, &adapted.text)?;
    println!(
        "{}",
        messages::info(format!("{router}: adapted policy for {} AS numbers -> {}", adapted.included_as_numbers.len(), output_path.display()))
    );
    Ok(())
}

fn handle_apply(config: &Config, router: &str, config_file: &Path) -> Result<(), OttoError> {
    let text = std::fs::read_to_string(config_file)?;
    let device = Device { hostname: router.to_string(), address: router.to_string(), port: 830 };
    let username = ssh_username();
    let auth = build_auth();
    let connect_timeout = TimeoutManager::global().get(TimeoutKind::Ssh);
    let netconf_window = TimeoutManager::global().get(TimeoutKind::Netconf);

    let transport = Ssh2NetconfTransport::connect(&device, &username, &auth, connect_timeout)?;
    let session = NetconfSession::new(transport, router.to_string());

    // A direct `apply` invocation is an explicit operator action, so the confirmation is sent
    // immediately rather than gated on a guardrail verdict (that gating applies to rollout runs).
    pipeline::apply_target(session, &text, Some(netconf_window), true)?;
    let _ = &config.database; // database handle reserved for audit logging once that table lands.
    println!("{}", messages::info(format!("{router}: configuration applied and confirmed")));
    Ok(())
}

fn build_coordinator(config: &Config) -> Result<MultiRouterCoordinator, OttoError> {
    let conn = Connection::open(&config.database.path)?;
    let dao = RolloutDao::open(conn).map_err(|e| OttoError::Data(e.to_string()))?;
    Ok(MultiRouterCoordinator::new(dao, CoordinatorConfig::default()))
}

fn handle_rollout(config: &Config, action: RolloutAction) -> Result<(), OttoError> {
    match action {
        RolloutAction::Plan { inventory, strategy, canary_host, group_by } => {
            handle_rollout_plan(config, &inventory, strategy, canary_host.as_deref(), group_by.as_deref())
        }
        RolloutAction::NextBatch { run_id, concurrency } => handle_rollout_next_batch(config, &run_id, concurrency),
        RolloutAction::Complete { target_id } => {
            build_coordinator(config)?.complete_target(&target_id)?;
            println!("{}", messages::info(format!("target {target_id} completed")));
            Ok(())
        }
        RolloutAction::Fail { target_id, error } => {
            build_coordinator(config)?.fail_target(&target_id, &error)?;
            println!("{}", messages::warning(format!("target {target_id} failed: {error}")));
            Ok(())
        }
        RolloutAction::Skip { target_id, reason } => {
            build_coordinator(config)?.skip_target(&target_id, &reason)?;
            println!("{}", messages::info(format!("target {target_id} skipped: {reason}")));
            Ok(())
        }
        RolloutAction::Pause { run_id } => {
            let mut coordinator = build_coordinator(config)?;
            coordinator.hydrate_from_db(&run_id)?;
            coordinator.pause_run()?;
            println!("{}", messages::info(format!("run {run_id} paused")));
            Ok(())
        }
        RolloutAction::Resume { run_id } => {
            let mut coordinator = build_coordinator(config)?;
            coordinator.hydrate_from_db(&run_id)?;
            coordinator.resume_run()?;
            println!("{}", messages::info(format!("run {run_id} resumed")));
            Ok(())
        }
        RolloutAction::Abort { run_id, reason } => {
            let mut coordinator = build_coordinator(config)?;
            coordinator.hydrate_from_db(&run_id)?;
            coordinator.abort_run(&reason)?;
            println!("{}", messages::warning(format!("run {run_id} aborted: {reason}")));
            Ok(())
        }
    }
}

fn handle_rollout_plan(config: &Config, inventory_path: &Path, strategy_arg: StrategyArg, canary_host: Option<&str>, group_by: Option<&str>) -> Result<(), OttoError> {
    let descriptors = inventory::load_csv(inventory_path).map_err(|e| OttoError::Data(e.to_string()))?;
    let devices: Vec<DeviceInfo> = descriptors.iter().map(|d| DeviceInfo { hostname: d.hostname.clone(), region: d.region.clone(), role: d.role.clone() }).collect();

    // Picks up adapted configs `adapt` already wrote under `routers/`; a hostname with no such
    // file is planned with an empty policy (its target still gets sequenced, just with no
    // configuration to diff against at apply time).
    let mut policies = BTreeMap::new();
    for descriptor in &descriptors {
        let path = PathBuf::from("routers").join(format!("{}_adapted.conf", sanitize_hostname(&descriptor.hostname)));
        if let Ok(text) = std::fs::read_to_string(&path) {
            policies.insert(descriptor.hostname.clone(), text);
        }
    }

    let strategy: Box<dyn RolloutStrategy> = match strategy_arg {
        StrategyArg::Blast => Box::new(BlastStrategy { concurrency: config.rollout.default_concurrency }),
        StrategyArg::Phased => {
            let group_by = match group_by {
                Some("role") => GroupAttribute::Role,
                Some("region") => GroupAttribute::Region,
                _ => return Err(OttoError::Validation("--group-by must be 'region' or 'role' for the phased strategy".to_string())),
            };
            Box::new(PhasedStrategy { group_by, concurrency: config.rollout.default_concurrency })
        }
        StrategyArg::Canary => {
            let canary_hostname = canary_host
                .ok_or_else(|| OttoError::Validation("--canary-host is required for the canary strategy".to_string()))?
                .to_string();
            Box::new(CanaryStrategy { canary_hostname, concurrency: config.rollout.default_concurrency })
        }
    };

    let mut coordinator = build_coordinator(config)?;
    let run_id = coordinator.plan_run(&devices, &policies, strategy.as_ref(), Some("cli"))?;
    println!("{}", messages::info(format!("planned rollout run {run_id} ({} devices)", devices.len())));
    Ok(())
}

fn handle_rollout_next_batch(config: &Config, run_id: &str, concurrency: Option<usize>) -> Result<(), OttoError> {
    let mut coordinator = build_coordinator(config)?;
    coordinator.hydrate_from_db(run_id)?;
    match coordinator.next_batch(concurrency)? {
        Some(batch) => {
            println!("{}", messages::info(format!("stage '{}' dispensed {} targets", batch.stage_name, batch.targets.len())));
            for target in &batch.targets {
                println!("  {} ({})", target.hostname, target.target_id);
            }
        }
        None => println!("{}", messages::info("no batch available: stage advanced or run completed")),
    }
    Ok(())
}

fn handle_status(config: &Config, run_id: &str) -> Result<(), OttoError> {
    let mut coordinator = build_coordinator(config)?;
    coordinator.hydrate_from_db(run_id)?;
    let (run, stage_index, stage) = coordinator
        .get_run_status()
        .ok_or_else(|| OttoError::Data(format!("run {run_id} has no status after hydration")))?;
    println!(
        "{}",
        messages::info(format!(
            "run {}: status={:?} stage_index={stage_index} stage={}",
            run.run_id,
            run.status,
            stage.map(|s| s.name.as_str()).unwrap_or("-")
        ))
    );
    Ok(())
}
