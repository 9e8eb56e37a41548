use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::core::{plan::normalize_prefix, report::Verbosity, target::TargetKind};

/// Shared application context for global flags
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
    pub verbose: bool,  // global --verbose
    pub log_json: bool, // global --log-json
}

#[derive(Parser)]
#[command(name = "akit")]
#[command(about = "Wire auth-kit routes and layout helpers into an existing Phoenix application")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Show what would change without writing anything
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Log phase progress to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Integrate auth-kit into the router and layout
    Install(InstallArgs),

    /// Report conflicts and planned changes without writing
    Check(CheckArgs),

    /// Inspect or restore pre-write backups
    Backups(BackupsArgs),

    /// Initialize an authkit.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Validate and normalize `--prefix`.
fn parse_prefix(raw: &str) -> Result<String, String> {
    normalize_prefix(raw)
        .ok_or_else(|| format!("invalid route prefix {raw:?}: use letters, digits, '/', '_', '-', '.'"))
}

/// Options shared by `install` and `check`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Root of the Phoenix project
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Route prefix for the auth routes (default from config)
    #[arg(long, value_parser = parse_prefix)]
    pub prefix: Option<String>,

    /// Restrict to these targets (repeatable; default from config)
    #[arg(long = "target", value_enum)]
    pub targets: Vec<TargetKind>,

    /// Host app name used to guess file locations (default: from mix.exs)
    #[arg(long)]
    pub app_name: Option<String>,

    /// Treat every conflict as manual
    #[arg(long)]
    pub no_auto_resolve: bool,

    /// Block instead of skipping targets that are already integrated
    #[arg(long)]
    pub no_skip_if_exists: bool,

    /// Skip the duplicate-construct comparison after injection
    #[arg(long)]
    pub no_validate: bool,

    /// Report verbosity (default from config)
    #[arg(long, value_enum)]
    pub verbosity: Option<Verbosity>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Ask about each manual conflict instead of blocking
    #[arg(long)]
    pub interactive: bool,

    /// Copy originals to .authkit/backups before writing
    #[arg(long)]
    pub backup: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Parser)]
pub struct BackupsArgs {
    #[command(subcommand)]
    pub command: BackupsSubcommand,
}

#[derive(Subcommand)]
pub enum BackupsSubcommand {
    /// List finalized backup sessions
    List(BackupListArgs),

    /// Restore files from a backup session
    Restore(BackupRestoreArgs),
}

#[derive(Args, Debug)]
pub struct BackupListArgs {
    /// Root of the Phoenix project
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupRestoreArgs {
    /// Session ID, unique ID prefix, or 'latest'
    pub session: String,

    /// Root of the Phoenix project
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Emit JSON result instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn prefix_is_normalized_at_parse_time() {
        let cli = Cli::try_parse_from(["akit", "install", "--prefix", "login/", "--target", "router"])
            .unwrap();
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.run.prefix.as_deref(), Some("/login"));
        assert_eq!(args.run.targets, vec![TargetKind::Router]);
    }

    #[test]
    fn bad_prefix_is_rejected() {
        assert!(Cli::try_parse_from(["akit", "check", "--prefix", "a b"]).is_err());
    }
}
