//! Handlers behind `install`, `check` and `backups`.
//!
//! Each returns the process exit code; `anyhow` errors are reserved for
//! configuration and usage problems that occur before a run starts.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};
use tracing::debug;

use crate::{
    cli::{AppContext, BackupsArgs, BackupsSubcommand, CheckArgs, InstallArgs, RunArgs},
    core::{
        backup::{list_sessions, restore_session},
        conflict::ConflictRecord,
        pipeline::{RunContext, RunPolicy, RunReport},
        plan::normalize_prefix,
        report::{DiagnosticReport, Verbosity},
        resolve::{ConflictPrompt, PromptDecision},
    },
    infra::config::load_config,
};

/// Asks about manual conflicts on a line-oriented stream.
pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> ConflictPrompt for LinePrompt<R, W> {
    fn decide(&mut self, record: &ConflictRecord) -> PromptDecision {
        let asked = write!(
            self.output,
            "[{}] {} at {}\n  acknowledge and continue? [y/N] ",
            record.severity,
            record.describe(),
            record.location
        )
        .and_then(|_| self.output.flush());
        if asked.is_err() {
            return PromptDecision::Abort;
        }

        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(_) => match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" | "a" | "ack" => PromptDecision::Acknowledge,
                _ => PromptDecision::Abort,
            },
            Err(_) => PromptDecision::Abort,
        }
    }
}

struct Prepared {
    ctx: RunContext,
    prefix: String,
    policy: RunPolicy,
    verbosity: Verbosity,
}

fn prepare(args: &RunArgs, app: &AppContext) -> Result<Prepared> {
    let mut config = load_config(&args.root)
        .with_context(|| format!("load configuration from {}", args.root.display()))?;
    if let Some(name) = &args.app_name {
        config.app_name = Some(name.clone());
    }

    let prefix = match &args.prefix {
        Some(p) => p.clone(),
        None => normalize_prefix(&config.default_prefix).with_context(|| {
            format!("default_prefix {:?} in config is not a valid route prefix", config.default_prefix)
        })?,
    };

    let policy = RunPolicy {
        auto_resolve_conflicts: !args.no_auto_resolve,
        interactive: false,
        skip_if_exists: !args.no_skip_if_exists,
        validate: !args.no_validate,
        dry_run: app.dry_run,
        backup: config.backup,
        targets: if args.targets.is_empty() {
            config.targets.clone()
        } else {
            args.targets.clone()
        },
    };
    let verbosity = args.verbosity.unwrap_or(config.verbosity);
    debug!(?policy, %prefix, "run prepared");

    Ok(Prepared {
        ctx: RunContext::new(&args.root, config),
        prefix,
        policy,
        verbosity,
    })
}

fn emit(report: &RunReport, args: &RunArgs, verbosity: Verbosity, app: &AppContext) -> Result<i32> {
    let diagnostic = DiagnosticReport::build(report);
    if args.json {
        println!("{}", diagnostic.to_json().context("serialize report")?);
    } else if !app.quiet || !diagnostic.safe_to_proceed {
        let color = !app.no_color && io::stdout().is_terminal();
        print!("{}", diagnostic.render(verbosity, color));
    }
    Ok(diagnostic.exit_code)
}

pub fn install(args: InstallArgs, app: &AppContext) -> Result<i32> {
    let Prepared {
        ctx,
        prefix,
        mut policy,
        verbosity,
    } = prepare(&args.run, app)?;
    policy.interactive = args.interactive;
    policy.backup |= args.backup;

    let report = if policy.interactive {
        let stdin = io::stdin();
        let mut prompt = LinePrompt::new(stdin.lock(), io::stderr());
        let prompt: &mut dyn ConflictPrompt = &mut prompt;
        ctx.execute(&prefix, &policy, Some(prompt))
    } else {
        ctx.execute(&prefix, &policy, None)
    };
    emit(&report, &args.run, verbosity, app)
}

pub fn check(args: CheckArgs, app: &AppContext) -> Result<i32> {
    let Prepared {
        ctx,
        prefix,
        policy,
        verbosity,
    } = prepare(&args.run, app)?;
    let report = ctx.check(&prefix, &policy);
    emit(&report, &args.run, verbosity, app)
}

pub fn backups(args: BackupsArgs, app: &AppContext) -> Result<i32> {
    match args.command {
        BackupsSubcommand::List(list) => {
            let sessions = list_sessions(&list.root)?;
            if list.json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
                return Ok(0);
            }
            if sessions.is_empty() {
                if !app.quiet {
                    println!("No backup sessions under {}", list.root.display());
                }
                return Ok(0);
            }

            #[derive(Tabled)]
            struct Row {
                #[tabled(rename = "Session")]
                id: String,
                #[tabled(rename = "Created")]
                timestamp: String,
                #[tabled(rename = "Files")]
                files: usize,
                #[tabled(rename = "Success")]
                success: bool,
            }
            let rows: Vec<Row> = sessions
                .into_iter()
                .rev()
                .map(|s| Row {
                    id: s.id,
                    timestamp: s.timestamp,
                    files: s.files,
                    success: s.success,
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::modern()));
            Ok(0)
        }
        BackupsSubcommand::Restore(restore) => {
            let report = restore_session(&restore.root, &restore.session, app.dry_run)?;
            if restore.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if !app.quiet {
                let verb = if report.dry_run { "Would restore" } else { "Restored" };
                for path in &report.restored {
                    println!("{verb} {}", path.display());
                }
                let done = format!("session {}", report.session_id);
                if app.no_color {
                    println!("{done}");
                } else {
                    println!("{}", done.green());
                }
            }
            Ok(0)
        }
    }
}
