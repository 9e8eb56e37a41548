//! Diagnostic report for a finished run
//!
//! Aggregates conflicts, resolutions and per-target results into a risk level,
//! a safe-to-proceed flag, blocking issues and next steps. Rendered as text at
//! three verbosities or serialized as JSON.

use indexmap::IndexMap;
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled, settings::Style};

use crate::core::{
    conflict::{ConflictKind, ConflictRecord, Severity, SuggestedResolution},
    error::ParseError,
    pipeline::{Outcome, RunReport},
    resolve::ResolutionAction,
};

/// How much of the report to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Outcome, risk and next steps
    #[default]
    Summary,
    /// Plus conflict and result tables
    Detailed,
    /// Plus stage trails, timings, warnings and diffs
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        })
    }
}

/// Aggregated view over a `RunReport`.
#[derive(Debug, Serialize)]
pub struct DiagnosticReport<'a> {
    pub outcome: &'static str,
    pub exit_code: i32,
    pub counts_by_kind: IndexMap<&'static str, usize>,
    pub counts_by_severity: IndexMap<String, usize>,
    pub resolutions_applied: usize,
    pub risk_level: RiskLevel,
    pub safe_to_proceed: bool,
    pub blocking_issues: Vec<String>,
    pub next_steps: Vec<String>,
    pub run: &'a RunReport,
}

const SEVERITY_ORDER: [Severity; 5] = [
    Severity::Critical,
    Severity::High,
    Severity::Medium,
    Severity::Low,
    Severity::Info,
];

fn severity_risk(severity: Severity) -> RiskLevel {
    match severity {
        Severity::Critical => RiskLevel::Critical,
        Severity::High => RiskLevel::High,
        Severity::Medium => RiskLevel::Medium,
        Severity::Low | Severity::Info => RiskLevel::Low,
    }
}

fn resolution_label(r: SuggestedResolution) -> &'static str {
    match r {
        SuggestedResolution::AlternatePrefix => "alternate prefix",
        SuggestedResolution::ProvideInstructions => "instructions",
        SuggestedResolution::SkipInstallation => "skip",
        SuggestedResolution::Manual => "manual",
    }
}

fn manual_step(record: &ConflictRecord) -> String {
    match record.kind {
        ConflictKind::IncompatibleStructure => format!(
            "Restructure {} so it holds exactly one `defmodule ... do ... end`, then re-run.",
            record.location.path
        ),
        ConflictKind::AlreadyIntegrated => format!(
            "{} is already integrated; remove the existing auth-kit lines or keep skip-if-exists on.",
            record.location.path
        ),
        _ => format!("Resolve by hand at {}: {}.", record.location, record.describe()),
    }
}

impl<'a> DiagnosticReport<'a> {
    pub fn build(run: &'a RunReport) -> Self {
        let mut counts_by_kind: IndexMap<&'static str, usize> =
            ConflictKind::ALL.iter().map(|k| (k.as_str(), 0)).collect();
        let mut counts_by_severity: IndexMap<String, usize> =
            SEVERITY_ORDER.iter().map(|s| (s.to_string(), 0)).collect();
        for c in &run.conflicts {
            *counts_by_kind.entry(c.kind.as_str()).or_default() += 1;
            *counts_by_severity.entry(c.severity.to_string()).or_default() += 1;
        }

        let mut blocking_issues = Vec::new();
        let mut next_steps = Vec::new();

        let risk_level = match &run.outcome {
            Outcome::Fatal {
                detail, manual_fix, ..
            } => {
                blocking_issues.push(detail.clone());
                next_steps.push(manual_fix.clone());
                RiskLevel::Critical
            }
            Outcome::Blocked {
                reason, manual, ..
            } => {
                if manual.is_empty() {
                    blocking_issues.push(reason.clone());
                    next_steps.push(
                        "Review the conflicting resolutions above and re-run with an explicit --prefix."
                            .to_string(),
                    );
                }
                for m in manual {
                    blocking_issues.push(format!("[{}] {} at {}", m.severity, m.describe(), m.location));
                    next_steps.push(manual_step(m));
                }
                if manual.iter().any(|m| m.severity != Severity::Critical) {
                    next_steps.push(
                        "Re-run with --interactive to acknowledge non-critical conflicts.".to_string(),
                    );
                }
                manual
                    .iter()
                    .map(|m| severity_risk(m.severity))
                    .max()
                    .unwrap_or(RiskLevel::High)
            }
            Outcome::Success { results } | Outcome::Skipped { results, .. } => {
                for r in results {
                    for e in &r.validation_outcome.errors {
                        blocking_issues.push(format!("{}: {e}", r.target_identity));
                    }
                }
                next_steps.extend(run.instructions.iter().cloned());
                for r in results {
                    next_steps.extend(
                        r.conflicts_resolved
                            .iter()
                            .filter_map(|res| match &res.action_taken {
                                ResolutionAction::ProvideInstructions { text } => Some(text.clone()),
                                _ => None,
                            }),
                    );
                }
                if run.dry_run && results.iter().any(|r| r.changed) {
                    next_steps.push("Re-run without --dry-run to apply the changes.".to_string());
                }
                if let Some(id) = &run.backup_session {
                    next_steps.push(format!("Undo with `akit backups restore {id}` if needed."));
                }

                if results.iter().any(|r| !r.success) {
                    RiskLevel::High
                } else if results
                    .iter()
                    .any(|r| !r.validation_outcome.warnings.is_empty())
                    || !run.instructions.is_empty()
                {
                    RiskLevel::Medium
                } else {
                    RiskLevel::Low
                }
            }
        };

        let safe_to_proceed = matches!(&run.outcome,
            Outcome::Success { results } | Outcome::Skipped { results, .. } if results.iter().all(|r| r.success));

        Self {
            outcome: run.outcome.label(),
            exit_code: run.outcome.exit_code(),
            counts_by_kind,
            counts_by_severity,
            resolutions_applied: run.resolutions.len(),
            risk_level,
            safe_to_proceed,
            blocking_issues,
            next_steps,
            run,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Plain or colored text at `verbosity`.
    pub fn render(&self, verbosity: Verbosity, color: bool) -> String {
        let p = Palette { color };
        let run = self.run;
        let mut out = String::new();

        let headline = match &run.outcome {
            Outcome::Blocked { reason, .. } => format!("blocked: {reason}"),
            Outcome::Fatal { kind, .. } => format!("fatal ({})", serde_label(kind)),
            Outcome::Skipped { reason, .. } => format!("skipped: {reason}"),
            Outcome::Success { .. } if run.dry_run => "dry run".to_string(),
            Outcome::Success { .. } => "done".to_string(),
        };
        let headline = if self.safe_to_proceed {
            p.good(&headline)
        } else {
            p.bad(&headline)
        };
        out.push_str(&format!(
            "{} {headline} (prefix {})\n",
            p.bold("akit:"),
            run.requested_prefix
        ));

        for r in run.outcome.results() {
            let status = if r.skipped {
                "already integrated".to_string()
            } else if !r.changed {
                "unchanged".to_string()
            } else {
                match r.editor {
                    Some(editor) => format!("changed ({editor})"),
                    None => "changed".to_string(),
                }
            };
            let status = if r.success {
                status
            } else {
                format!("{status}, {}", p.bad("validation failed"))
            };
            out.push_str(&format!("  {:<7} {}  {status}", r.target.to_string(), r.target_identity));
            if let Some(prefix) = &r.applied_prefix {
                out.push_str(&format!("  mounted at {prefix}"));
            }
            out.push('\n');
        }

        let total: usize = self.counts_by_kind.values().sum();
        out.push_str(&format!(
            "Conflicts: {total}, resolved automatically: {}. Risk: {}. Safe to proceed: {}.\n",
            self.resolutions_applied,
            p.risk(self.risk_level),
            if self.safe_to_proceed { "yes" } else { "no" }
        ));

        if let Outcome::Fatal {
            diagnostic: Some(diag),
            ..
        } = &run.outcome
        {
            out.push_str(&render_parse_error(diag, color));
        }

        if !self.blocking_issues.is_empty() {
            out.push_str(&format!("{}\n", p.bold("Blocking issues:")));
            for issue in &self.blocking_issues {
                out.push_str(&format!("  - {issue}\n"));
            }
        }

        if verbosity != Verbosity::Summary {
            out.push_str(&self.render_tables());
        }
        if verbosity == Verbosity::Technical {
            out.push_str(&self.render_technical(&p));
        }

        if !self.next_steps.is_empty() {
            out.push_str(&format!("{}\n", p.bold("Next steps:")));
            for step in &self.next_steps {
                out.push_str(&format!("  - {step}\n"));
            }
        }
        out
    }

    fn render_tables(&self) -> String {
        #[derive(Tabled)]
        struct ConflictRow {
            #[tabled(rename = "Kind")]
            kind: String,
            #[tabled(rename = "Severity")]
            severity: String,
            #[tabled(rename = "Location")]
            location: String,
            #[tabled(rename = "Resolution")]
            resolution: String,
            #[tabled(rename = "Detail")]
            detail: String,
        }

        #[derive(Tabled)]
        struct ResultRow {
            #[tabled(rename = "Target")]
            target: String,
            #[tabled(rename = "File")]
            file: String,
            #[tabled(rename = "Changed")]
            changed: bool,
            #[tabled(rename = "Editor")]
            editor: String,
            #[tabled(rename = "Prefix")]
            prefix: String,
            #[tabled(rename = "Valid")]
            valid: bool,
        }

        let run = self.run;
        let mut out = String::new();

        if !run.conflicts.is_empty() {
            let rows: Vec<ConflictRow> = run
                .conflicts
                .iter()
                .map(|c| ConflictRow {
                    kind: c.kind.to_string(),
                    severity: c.severity.to_string(),
                    location: c.location.to_string(),
                    resolution: resolution_label(c.suggested_resolution).to_string(),
                    detail: c.describe(),
                })
                .collect();
            out.push_str(&Table::new(rows).with(Style::modern()).to_string());
            out.push('\n');
        }

        let results = run.outcome.results();
        if !results.is_empty() {
            let rows: Vec<ResultRow> = results
                .iter()
                .map(|r| ResultRow {
                    target: r.target.to_string(),
                    file: r.target_identity.clone(),
                    changed: r.changed,
                    editor: r
                        .editor
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    prefix: r.applied_prefix.clone().unwrap_or_else(|| "-".to_string()),
                    valid: r.success,
                })
                .collect();
            out.push_str(&Table::new(rows).with(Style::modern()).to_string());
            out.push('\n');
        }
        out
    }

    fn render_technical(&self, p: &Palette) -> String {
        let run = self.run;
        let mut out = String::new();

        for c in &run.conflicts {
            out.push_str(&format!(
                "{} {:?} origin={:?} auto={}\n",
                p.dim(&c.id),
                c.detail,
                c.origin,
                c.auto_resolvable
            ));
        }
        for res in &run.resolutions {
            out.push_str(&format!("{} -> {}\n", p.dim(&res.conflict_ref), res.resulting_state));
        }
        for r in run.outcome.results() {
            let trail: Vec<String> = r
                .stages
                .stages()
                .iter()
                .map(|s| format!("{s:?}"))
                .collect();
            out.push_str(&format!(
                "{}: {} ({} ms)\n",
                r.target,
                trail.join(" > "),
                r.elapsed_ms
            ));
            for w in &r.validation_outcome.warnings {
                out.push_str(&format!("  {} {w}\n", p.warn("warning:")));
            }
            if let Some(diff) = &r.diff {
                out.push_str(diff);
                if !diff.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        out.push_str(&format!("elapsed: {} ms\n", run.elapsed_ms));
        out
    }
}

fn serde_label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Source snippet pointing at the first syntax error.
pub fn render_parse_error(err: &ParseError, color: bool) -> String {
    use ariadne::{Color, Config as AriadneConfig, IndexType, Label, Report, ReportKind, Source};

    let id = err.path.as_str();
    let range = err.byte_range();
    let range = range.start.min(err.src.len())..range.end.min(err.src.len());

    let mut buf = Vec::new();
    let written = Report::build(ReportKind::Error, (id, range.clone()))
        .with_config(
            AriadneConfig::default()
                .with_color(color)
                .with_index_type(IndexType::Byte),
        )
        .with_message(format!("{} does not parse", err.path))
        .with_label(
            Label::new((id, range))
                .with_message(&err.reason)
                .with_color(Color::Red),
        )
        .with_help("fix the syntax error by hand and re-run; the file was not modified")
        .finish()
        .write((id, Source::from(err.src.as_str())), &mut buf);

    match written {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => format!(
            "{}:{}:{}: {}\n",
            err.path, err.line, err.column, err.reason
        ),
    }
}

struct Palette {
    color: bool,
}

impl Palette {
    fn paint(&self, text: &str, f: impl Fn(&str) -> String) -> String {
        if self.color { f(text) } else { text.to_string() }
    }

    fn bold(&self, text: &str) -> String {
        self.paint(text, |t| t.bold().to_string())
    }

    fn good(&self, text: &str) -> String {
        self.paint(text, |t| t.green().bold().to_string())
    }

    fn bad(&self, text: &str) -> String {
        self.paint(text, |t| t.red().bold().to_string())
    }

    fn warn(&self, text: &str) -> String {
        self.paint(text, |t| t.yellow().to_string())
    }

    fn dim(&self, text: &str) -> String {
        self.paint(text, |t| t.dimmed().to_string())
    }

    fn risk(&self, level: RiskLevel) -> String {
        let text = level.to_string();
        match level {
            RiskLevel::Low => self.paint(&text, |t| t.green().to_string()),
            RiskLevel::Medium => self.warn(&text),
            RiskLevel::High | RiskLevel::Critical => self.bad(&text),
        }
    }
}
