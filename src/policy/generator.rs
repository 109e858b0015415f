//! Policy generator (C7): wraps the external `bgpq4` IRR query tool with cache-first lookup,
//! strict argument-vector construction (never a shell string — this is the command-injection
//! boundary), and a worker-pool batch mode.
//!
//! Subprocess invocation goes through `command::processrunner::BoundedProcess`, generalized
//! from a fixed agent binary to an arbitrary argument vector.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell_regex_free::policy_name_is_valid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheError, PolicyCache};
use crate::command::{CommandExecutor, ProcessOutput};
use crate::context::{ContextDefault, Ctx};
use crate::event::channel::pub_sub;

mod once_cell_regex_free {
    //! Hand-rolled validator: the policy-name character class is small enough that a regex
    //! dependency would be overkill for this one check.
    pub fn policy_name_is_valid(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= 64
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("AS number {0} is not a valid 32-bit AS")]
    InvalidAsNumber(u64),

    #[error("policy name '{0}' contains characters outside [A-Za-z0-9_-] or exceeds 64 characters")]
    InvalidPolicyName(String),

    #[error("bgpq4 invocation failed: {0}")]
    CommandFailed(String),

    #[error("bgpq4 timed out")]
    Timeout,

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("RPKI precondition failed: {0}")]
    RpkiPreconditionFailed(String),
}

#[derive(Debug, Clone)]
pub enum GenerateTarget {
    AsNumber(u32),
    AsSet(String),
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub bgpq4_path: String,
    pub timeout: Duration,
    pub default_ttl_hours: i64,
    pub irr_server_override: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub target: String,
    pub success: bool,
    pub text: String,
    pub error: Option<String>,
    pub from_cache: bool,
}

/// Validates an AS-SET / policy-name string against the command-injection boundary
/// *before* it is placed in the argument vector passed to `bgpq4`.
pub fn validate_policy_name(name: &str) -> Result<(), GeneratorError> {
    if !policy_name_is_valid(name) {
        return Err(GeneratorError::InvalidPolicyName(name.to_string()));
    }
    Ok(())
}

fn build_args(target: &GenerateTarget, irr_server: Option<&str>) -> Vec<String> {
    let mut args = vec!["-Jl".to_string(), "POLICY".to_string()];
    if let Some(server) = irr_server {
        args.push("-h".to_string());
        args.push(server.to_string());
    }
    match target {
        GenerateTarget::AsNumber(n) => args.push(format!("AS{n}")),
        GenerateTarget::AsSet(name) => args.push(name.clone()),
    }
    args
}

pub trait Bgpq4Runner: Send + Sync {
    fn run(&self, args: &[String], timeout: Duration) -> Result<ProcessOutput, GeneratorError>;
}

/// Production runner: shells out to the real `bgpq4` binary via the bounded-process
/// primitive.
pub struct RealBgpq4 {
    pub binary_path: String,
}

impl Bgpq4Runner for RealBgpq4 {
    fn run(&self, args: &[String], timeout: Duration) -> Result<ProcessOutput, GeneratorError> {
        let process = crate::command::BoundedProcess::new(&self.binary_path, args.to_vec());
        process.run_with_timeout(timeout).map_err(|e| match e {
            crate::command::CommandError::Timeout(_) => GeneratorError::Timeout,
            other => GeneratorError::CommandFailed(other.to_string()),
        })
    }
}

pub struct PolicyGenerator<'a, R: Bgpq4Runner> {
    runner: &'a R,
    cache: &'a mut PolicyCache,
    config: GeneratorConfig,
}

impl<'a, R: Bgpq4Runner> PolicyGenerator<'a, R> {
    pub fn new(runner: &'a R, cache: &'a mut PolicyCache, config: GeneratorConfig) -> Self {
        Self { runner, cache, config }
    }

    /// `generate(as_number | as_set) -> {success, text, error?}`.
    /// `policy_name` and `rpki_comment` are optional: the former selects a non-default cache
    /// slot, the latter prepends per-AS RPKI commentary (RPKI-annotated mode).
    pub fn generate(
        &mut self,
        target: GenerateTarget,
        policy_name: Option<&str>,
        rpki_comment: Option<&str>,
    ) -> Result<GenerateResult, GeneratorError> {
        if let Some(name) = policy_name {
            validate_policy_name(name)?;
        }
        let (as_number, resource, label) = match &target {
            GenerateTarget::AsNumber(n) => (Some(*n), None, format!("AS{n}")),
            GenerateTarget::AsSet(name) => {
                validate_policy_name(name)?;
                (None, Some(name.clone()), name.clone())
            }
        };

        let key = crate::cache::fingerprint(as_number, resource.as_deref(), policy_name)?;
        let now = Utc::now();
        if let Some(entry) = self.cache.get(&key, now)? {
            debug!(target = %label, "policy generation cache hit");
            return Ok(GenerateResult { target: label, success: true, text: entry.text, error: None, from_cache: true });
        }

        let args = build_args(&target, self.config.irr_server_override.as_deref());
        let output = match self.runner.run(&args, self.config.timeout) {
            Ok(o) => o,
            Err(e) => {
                warn!(target = %label, error = %e, "bgpq4 invocation failed");
                return Ok(GenerateResult { target: label, success: false, text: String::new(), error: Some(e.to_string()), from_cache: false });
            }
        };

        if !output.status_success {
            return Ok(GenerateResult {
                target: label,
                success: false,
                text: String::new(),
                error: Some(if output.stderr.is_empty() { "bgpq4 exited with failure status".to_string() } else { output.stderr }),
                from_cache: false,
            });
        }

        let mut text = output.stdout;
        if let Some(comment) = rpki_comment {
            text = format!("{comment}\n{text}");
        }

        self.cache.put(&key, as_number, resource.as_deref(), &text, self.config.default_ttl_hours, now)?;

        Ok(GenerateResult { target: label, success: true, text, error: None, from_cache: false })
    }
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<GenerateResult>,
    pub any_succeeded: bool,
}

/// Batch mode: processes up to N AS numbers in parallel using a worker pool separate from the
/// collector's. Partial failures are reported per-item; the batch succeeds if
/// at least one item succeeds.
pub fn generate_batch<R: Bgpq4Runner + 'static>(
    runner: Arc<R>,
    cache_factory: impl Fn() -> PolicyCache + Send + Sync + 'static,
    targets: Vec<GenerateTarget>,
    config: GeneratorConfig,
    workers: usize,
    ctx: ContextDefault,
) -> BatchResult {
    let workers = workers.clamp(1, targets.len().max(1));
    let (publisher, consumer) = pub_sub::<(usize, GenerateResult)>();
    let targets = Arc::new(targets);
    let cache_factory = Arc::new(cache_factory);
    let next_index = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let targets = Arc::clone(&targets);
        let runner = Arc::clone(&runner);
        let cache_factory = Arc::clone(&cache_factory);
        let publisher = publisher.clone();
        let next_index = Arc::clone(&next_index);
        let config = config.clone();
        let ctx = ctx.clone();

        handles.push(std::thread::spawn(move || {
            let mut cache = cache_factory();
            loop {
                if ctx.is_cancelled() {
                    return;
                }
                let idx = next_index.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let Some(target) = targets.get(idx) else { return };
                let mut generator = PolicyGenerator::new(&*runner, &mut cache, config.clone());
                let result = match generator.generate(target.clone(), None, None) {
                    Ok(r) => r,
                    Err(e) => GenerateResult {
                        target: format!("{target:?}"),
                        success: false,
                        text: String::new(),
                        error: Some(e.to_string()),
                        from_cache: false,
                    },
                };
                publisher.publish((idx, result));
            }
        }));
    }
    drop(publisher);
    for handle in handles {
        let _ = handle.join();
    }

    let mut results: Vec<Option<GenerateResult>> = (0..targets.len()).map(|_| None).collect();
    while let Ok((idx, result)) = consumer.as_ref().try_recv() {
        results[idx] = Some(result);
    }

    let results: Vec<GenerateResult> = results
        .into_iter()
        .enumerate()
        .map(|(idx, r)| {
            r.unwrap_or_else(|| GenerateResult {
                target: format!("{:?}", targets[idx]),
                success: false,
                text: String::new(),
                error: Some("cancelled".to_string()),
                from_cache: false,
            })
        })
        .collect();

    let any_succeeded = results.iter().any(|r| r.success);
    BatchResult { results, any_succeeded }
}
