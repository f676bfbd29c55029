use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::paths::{DEFAULT_CONFIG_FILE, ENV_STATE_FILE};

#[derive(Parser)]
#[command(name = "stackform")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan and apply declarative resource stacks", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack configuration file (TOML or JSON)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// State file (defaults to stackform.state.json next to the config)
    #[arg(long, global = true, env = ENV_STATE_FILE)]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check the configuration: references, modules and cycles
    Validate,

    /// Show what apply would change
    Plan(PlanArgs),

    /// Reconcile resources with the configuration
    Apply(ApplyArgs),

    /// Delete every resource recorded in state
    Destroy(DestroyArgs),

    /// Show root outputs from the last apply
    Output(OutputArgs),

    /// Inspect and edit recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply / Destroy
// ============================================================================

#[derive(Args, Clone, Default)]
pub struct PlanArgs {
    /// Limit the plan to these resources or modules (repeatable)
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// Plan deletion of every recorded resource
    #[arg(long)]
    pub destroy: bool,
}

#[derive(Args, Clone)]
pub struct ApplyArgs {
    /// Limit the run to these resources or modules (repeatable)
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of resources applied in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Show the plan without applying it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Clone)]
pub struct DestroyArgs {
    /// Only destroy these resources or modules (repeatable)
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of resources deleted in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,
}

#[derive(Args, Clone)]
pub struct OutputArgs {
    /// Print a single output
    pub name: Option<String>,

    /// Print outputs as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// State Commands
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resource addresses
    List {
        /// Only list addresses containing this string
        filter: Option<String>,
    },

    /// Show the recorded attributes of a resource
    Show {
        /// Resource address (e.g. module.app.aws_lambda_function.this)
        address: String,
    },

    /// Forget a resource without deleting it
    Rm {
        /// Resource addresses to forget
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Mark a resource for replacement on the next apply
    Taint {
        /// Resource address
        address: String,
    },

    /// Remove a stale state lock
    Unlock,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "stackform",
            "apply",
            "--target",
            "module.lambda",
            "-t",
            "aws_s3_bucket.code",
            "--yes",
            "--jobs",
            "1",
        ])
        .unwrap();

        match cli.command {
            Command::Apply(args) => {
                assert_eq!(args.targets, vec!["module.lambda", "aws_s3_bucket.code"]);
                assert!(args.yes);
                assert_eq!(args.jobs, 1);
                assert!(!args.dry_run);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stackform",
            "plan",
            "--destroy",
            "-c",
            "infra/stack.json",
            "--state-file",
            "/tmp/s.json",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("infra/stack.json"));
        assert_eq!(cli.state_file, Some(PathBuf::from("/tmp/s.json")));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Plan(PlanArgs { destroy: true, .. })));
    }

    #[test]
    fn test_state_rm_requires_address() {
        assert!(Cli::try_parse_from(["stackform", "state", "rm"]).is_err());
    }
}
