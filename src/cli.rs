use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dockyard")]
#[command(version)]
#[command(about = "Declarative container stacks: plan, apply and destroy", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack manifest (TOML, or JSON by extension)
    #[arg(short, long, global = true, default_value = "dockyard.toml")]
    pub file: PathBuf,

    /// Stack to operate on
    #[arg(short, long, global = true, env = "DOCKYARD_STACK")]
    pub stack: Option<String>,

    /// Directory holding stack state
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check the manifest and print the execution order
    Validate,

    /// Show what apply would change
    Plan,

    /// Converge the stack to the manifest
    Apply(ApplyArgs),

    /// Delete every resource recorded for the stack
    Destroy(DestroyArgs),

    /// Print the stack outputs from the last apply
    Outputs {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect recorded state
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
// Apply / Destroy
// ============================================================================

#[derive(Parser)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel provider calls (overrides the manifest)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Attempts per provider call for transient failures (overrides the manifest)
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Dry run - show the plan without applying it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel provider calls
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

// ============================================================================
// State Commands
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List stacks with recorded state
    List,

    /// Show the recorded resources of the stack
    Show {
        /// Print the raw record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::parse_from([
            "dockyard", "--stack", "prod", "apply", "--yes", "--jobs", "2", "--retries", "5",
        ]);
        assert_eq!(cli.stack.as_deref(), Some("prod"));
        match cli.command {
            Command::Apply(args) => {
                assert!(args.yes);
                assert_eq!(args.jobs, Some(2));
                assert_eq!(args.retries, Some(5));
                assert!(!args.dry_run);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["dockyard", "plan", "-f", "stack.json", "-vv"]);
        assert_eq!(cli.file, PathBuf::from("stack.json"));
        assert_eq!(cli.verbose, 2);
    }
}
