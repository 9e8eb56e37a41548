use std::process::ExitCode;

use authkit_integrate::{
    cli::{AppContext, Cli, Commands},
    infra::logging::{default_level, init_tracing},
};
use clap::Parser;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        dry_run: cli.dry_run,
        verbose: cli.verbose,
        log_json: cli.log_json,
    };
    init_tracing(ctx.log_json, default_level(ctx.verbose));

    let result = match cli.command {
        Commands::Install(args) => authkit_integrate::commands::install(args, &ctx),
        Commands::Check(args) => authkit_integrate::commands::check(args, &ctx),
        Commands::Backups(args) => authkit_integrate::commands::backups(args, &ctx),
        Commands::Init(args) => authkit_integrate::infra::config::init(args, &ctx).map(|_| 0),
        Commands::Completions(args) => authkit_integrate::completion::run(args, &ctx).map(|_| 0),
    };

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
