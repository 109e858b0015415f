//! External CLI surface (C15): a thin `clap`-derived front end that parses arguments and hands
//! off to [`crate::pipeline`]. It performs no business logic of its own, matching the
//! framing of C15 as "delegates to core."

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "otto-bgp", author, version, about = "Automated IRR/RPKI prefix-list policy lifecycle for Juniper routers", long_about = None)]
pub struct Cli {
    /// Path to the YAML settings file; a missing file falls back to built-in defaults.
    #[arg(short, long, default_value = "/etc/otto-bgp/config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover BGP neighbors for every router in an inventory file and persist the result.
    Collect {
        /// CSV inventory file (column `address`, optional `hostname,role,region`).
        #[arg(long)]
        inventory: PathBuf,
        /// Directory to write per-router artifacts and reports under.
        #[arg(long, default_value = "routers")]
        output_dir: PathBuf,
    },
    /// Generate IRR-derived prefix-list policies for one or more AS numbers.
    Generate {
        /// AS numbers to generate policy for, e.g. `65001 65002`.
        #[arg(long, required = true, num_args = 1..)]
        as_numbers: Vec<u32>,
        #[arg(long, default_value = "routers")]
        output_dir: PathBuf,
    },
    /// Check RPKI validity for a prefix/AS pair, or for every prefix of an AS already cached.
    Validate {
        #[arg(long)]
        prefix: String,
        #[arg(long)]
        as_number: u32,
    },
    /// Merge per-AS policy fragments into a router-scoped configuration fragment.
    Adapt {
        #[arg(long)]
        router: String,
        /// Files containing one `bgpq4`-shaped fragment each, named `AS<n>_policy.txt`.
        #[arg(long, required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Apply a pre-built configuration fragment to a single router over NETCONF.
    Apply {
        #[arg(long)]
        router: String,
        #[arg(long)]
        config_file: PathBuf,
    },
    /// Drive a multi-router rollout: plan, dispense batches, record completion.
    Rollout {
        #[command(subcommand)]
        action: RolloutAction,
    },
    /// Print the status of a run (and, transitively, of the routers it targets).
    Status {
        #[arg(long)]
        run_id: String,
    },
    /// Run the full per-router pipeline (generate -> validate -> guardrails -> adapt) for every
    /// router already discovered by `collect`, writing per-router artifacts.
    Build {
        #[arg(long, default_value = "routers")]
        output_dir: PathBuf,
    },
    /// Write CSV/JSON/text discovery reports summarising every router already discovered.
    Report {
        #[arg(long, default_value = "reports")]
        output_dir: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum RolloutAction {
    /// Plan a new run from a device inventory and per-host policy map.
    Plan {
        #[arg(long)]
        inventory: PathBuf,
        #[arg(long, value_enum)]
        strategy: StrategyArg,
        /// Required for `--strategy canary`: the hostname treated as the canary target.
        #[arg(long)]
        canary_host: Option<String>,
        /// Required for `--strategy phased`: group devices by `region` or `role`.
        #[arg(long)]
        group_by: Option<String>,
    },
    /// Pull the next batch of pending targets for the current stage of a run.
    NextBatch {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    Complete {
        #[arg(long)]
        target_id: String,
    },
    Fail {
        #[arg(long)]
        target_id: String,
        #[arg(long)]
        error: String,
    },
    Skip {
        #[arg(long)]
        target_id: String,
        #[arg(long)]
        reason: String,
    },
    Pause {
        #[arg(long)]
        run_id: String,
    },
    Resume {
        #[arg(long)]
        run_id: String,
    },
    Abort {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
pub enum StrategyArg {
    Blast,
    Phased,
    Canary,
}

/// Fixed operator-facing message vocabulary. Internal logging goes through
/// `tracing`; this formatting is specifically for stderr/stdout lines a human reads.
pub mod messages {
    pub fn info(msg: impl std::fmt::Display) -> String {
        format!("INFO \u{2713} {msg}")
    }

    pub fn warning(msg: impl std::fmt::Display) -> String {
        format!("WARNING \u{26a0} {msg}")
    }

    pub fn error(msg: impl std::fmt::Display) -> String {
        format!("ERROR \u{2717} {msg}")
    }

    pub fn fatal(msg: impl std::fmt::Display) -> String {
        format!("FATAL \u{2717} Fatal: {msg}")
    }

    pub fn usage(msg: impl std::fmt::Display) -> String {
        format!("USAGE: {msg}")
    }

    /// Appends a standard remediation suggestion when the error matches a known shape,
    /// ("missing file -> check path"; "out-of-range port -> use 1-65535").
    pub fn with_suggestion(msg: &str) -> String {
        let lower = msg.to_lowercase();
        if lower.contains("no such file") || lower.contains("not found") {
            format!("{msg} (check the path)")
        } else if lower.contains("port") && (lower.contains("range") || lower.contains("invalid")) {
            format!("{msg} (use a port between 1 and 65535)")
        } else {
            msg.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_collect_subcommand() {
        let cli = Cli::parse_from(["otto-bgp", "collect", "--inventory", "devices.csv"]);
        assert!(matches!(cli.command, Command::Collect { .. }));
    }

    #[test]
    fn parses_rollout_plan_subcommand() {
        let cli = Cli::parse_from([
            "otto-bgp",
            "rollout",
            "plan",
            "--inventory",
            "devices.csv",
            "--strategy",
            "canary",
            "--canary-host",
            "r1",
        ]);
        match cli.command {
            Command::Rollout { action: RolloutAction::Plan { canary_host, .. } } => {
                assert_eq!(canary_host.as_deref(), Some("r1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_build_and_report_subcommands() {
        let cli = Cli::parse_from(["otto-bgp", "build"]);
        assert!(matches!(cli.command, Command::Build { .. }));
        let cli = Cli::parse_from(["otto-bgp", "report", "--output-dir", "out"]);
        assert!(matches!(cli.command, Command::Report { .. }));
    }

    #[test]
    fn message_helpers_use_fixed_vocabulary() {
        assert!(messages::info("ok").starts_with("INFO"));
        assert!(messages::fatal("bad").starts_with("FATAL"));
        assert_eq!(messages::with_suggestion("file not found"), "file not found (check the path)");
    }
}
