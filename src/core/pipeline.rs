//! Orchestrator: drives one integration run through its stages.
//!
//! Every target finishes its read phases (locate, analyze, detect) and the
//! run-wide resolution before anything is written, so a fatal or blocked
//! outcome leaves the project untouched. Read phases run in parallel across
//! target kinds; injection, writes and validation are sequential.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use rayon::prelude::*;
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info, instrument, warn};

use crate::{
    core::{
        analyzer::{AnalysisCache, Analyzer, ContentHash, StructuralFacts},
        backup::BackupSession,
        conflict::{ConflictKind, ConflictRecord, detect},
        error::{FatalKind, IntegrationError, ParseError, exit_code_for},
        inject::{EditorKind, Injection, Injector},
        plan::{FragmentRole, IntegrationPlan, TargetPlan, normalize_prefix},
        resolve::{
            ConflictPrompt, PatchSet, Resolution, ResolutionAction, ResolutionRecord, Resolver,
            ResolverPolicy, auto_resolution,
        },
        scanners::{ScanContext, enabled_scanners, run_scanners},
        target::{Locator, TargetFile, TargetKind},
        validate::{ValidationInput, ValidationOutcome, validate},
    },
    infra::{
        config::{Config, load_config},
        io::{read_source, write_atomic},
    },
};

/// Per-target lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Located,
    Analyzed,
    ConflictsDetected,
    ConflictsResolved,
    Blocked,
    Injected,
    Validated,
    Done,
}

impl Stage {
    /// Stages reachable from `self` in one step.
    pub fn allowed_transitions(self) -> &'static [Stage] {
        match self {
            Stage::Located => &[Stage::Analyzed],
            Stage::Analyzed => &[Stage::ConflictsDetected],
            Stage::ConflictsDetected => &[Stage::ConflictsResolved, Stage::Blocked],
            // Done directly when the target is skipped
            Stage::ConflictsResolved => &[Stage::Injected, Stage::Done],
            Stage::Injected => &[Stage::Validated],
            Stage::Validated => &[Stage::Done],
            Stage::Blocked | Stage::Done => &[],
        }
    }

    pub fn can_advance_to(self, next: Stage) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

/// Stages one target has passed through, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StageTrail(Vec<Stage>);

impl StageTrail {
    fn start() -> Self {
        Self(vec![Stage::Located])
    }

    pub fn current(&self) -> Stage {
        self.0.last().copied().unwrap_or(Stage::Located)
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.current().can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.current()
        );
        self.0.push(next);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.0
    }
}

/// Caller-facing knobs for one run.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub auto_resolve_conflicts: bool,
    pub interactive: bool,
    pub skip_if_exists: bool,
    pub validate: bool,
    pub dry_run: bool,
    pub backup: bool,
    pub targets: Vec<TargetKind>,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            auto_resolve_conflicts: true,
            interactive: false,
            skip_if_exists: true,
            validate: true,
            dry_run: false,
            backup: false,
            targets: TargetKind::ALL.to_vec(),
        }
    }
}

impl RunPolicy {
    fn resolver_policy(&self) -> ResolverPolicy {
        ResolverPolicy {
            auto_resolve: self.auto_resolve_conflicts,
            interactive: self.interactive,
            skip_if_exists: self.skip_if_exists,
        }
    }
}

/// Per-target result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationResult {
    pub target: TargetKind,
    /// Project-relative path of the edited file
    pub target_identity: String,
    /// Prefix the route call uses; None for targets without one
    pub applied_prefix: Option<String>,
    pub conflicts_resolved: Vec<ResolutionRecord>,
    pub validation_outcome: ValidationOutcome,
    pub success: bool,
    pub changed: bool,
    pub skipped: bool,
    pub editor: Option<EditorKind>,
    pub stages: StageTrail,
    /// Diagnostic only
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Terminal verdict of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        results: Vec<IntegrationResult>,
    },
    Skipped {
        reason: String,
        results: Vec<IntegrationResult>,
    },
    Blocked {
        reason: String,
        manual: Vec<ConflictRecord>,
        partial_resolutions: Vec<ResolutionRecord>,
    },
    Fatal {
        kind: FatalKind,
        detail: String,
        manual_fix: String,
        #[serde(skip)]
        diagnostic: Option<Box<ParseError>>,
    },
}

impl Outcome {
    fn fatal(err: IntegrationError) -> Self {
        let kind = err.fatal_kind().unwrap_or(FatalKind::InjectionFailure);
        let manual_fix = err.manual_fix();
        let detail = err.to_string();
        let diagnostic = match err {
            IntegrationError::Parse(p) => Some(Box::new(p)),
            _ => None,
        };
        Outcome::Fatal {
            kind,
            detail,
            manual_fix,
            diagnostic,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "done",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Blocked { .. } => "blocked",
            Outcome::Fatal { .. } => "fatal",
        }
    }

    pub fn results(&self) -> &[IntegrationResult] {
        match self {
            Outcome::Success { results } | Outcome::Skipped { results, .. } => results,
            Outcome::Blocked { .. } | Outcome::Fatal { .. } => &[],
        }
    }

    /// 0 done/skipped, 1 invalid prefix, 2 blocked, 3 parse, 4 not found, 5 injection or failed validation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success { results } => {
                if results.iter().all(|r| r.success) {
                    0
                } else {
                    5
                }
            }
            Outcome::Skipped { .. } => 0,
            Outcome::Blocked { .. } => 2,
            Outcome::Fatal { kind, .. } => exit_code_for(*kind),
        }
    }
}

/// Everything a report needs about one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub requested_prefix: String,
    pub dry_run: bool,
    pub conflicts: Vec<ConflictRecord>,
    pub resolutions: Vec<ResolutionRecord>,
    /// Project-level manual steps (per-target ones live in validation warnings)
    pub instructions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_session: Option<String>,
    pub elapsed_ms: u64,
    pub outcome: Outcome,
}

/// A target after its read phases.
struct Prepared {
    plan: TargetPlan,
    file: TargetFile,
    rel: String,
    facts: Arc<StructuralFacts>,
    conflicts: Vec<ConflictRecord>,
    trail: StageTrail,
    started: Instant,
}

impl Prepared {
    fn already_integrated(&self) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::AlreadyIntegrated)
    }
}

/// A target whose new text exists only in memory so far.
struct Pending {
    prepared: Prepared,
    injection: Injection,
    resolved: Vec<ResolutionRecord>,
    instructions: Vec<String>,
}

/// Owns the project root, its configuration and the analysis cache.
pub struct RunContext {
    root: PathBuf,
    config: Config,
    cache: AnalysisCache,
}

impl RunContext {
    pub fn new(root: &Path, config: Config) -> Self {
        Self {
            root: dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf()),
            config,
            cache: AnalysisCache::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Read-only run: resolution and in-memory injection, never a write or a prompt.
    pub fn check(&self, prefix: &str, policy: &RunPolicy) -> RunReport {
        let policy = RunPolicy {
            dry_run: true,
            interactive: false,
            backup: false,
            ..policy.clone()
        };
        self.execute(prefix, &policy, None)
    }

    /// Drive every requested target to a terminal stage.
    #[instrument(skip_all, fields(root = %self.root.display(), prefix, dry_run = policy.dry_run))]
    pub fn execute(
        &self,
        prefix: &str,
        policy: &RunPolicy,
        prompt: Option<&mut dyn ConflictPrompt>,
    ) -> RunReport {
        let started = Instant::now();
        let Some(normalized) = normalize_prefix(prefix) else {
            warn!(prefix, "rejected route prefix; nothing read or written");
            return RunReport {
                requested_prefix: prefix.to_string(),
                dry_run: policy.dry_run,
                conflicts: Vec::new(),
                resolutions: Vec::new(),
                instructions: Vec::new(),
                backup_session: None,
                elapsed_ms: elapsed_ms(started),
                outcome: Outcome::fatal(IntegrationError::InvalidPrefix {
                    prefix: prefix.to_string(),
                }),
            };
        };
        let plan = IntegrationPlan::new(&normalized, &policy.targets, &self.config);

        let mut report = RunReport {
            requested_prefix: plan.prefix.clone(),
            dry_run: policy.dry_run,
            conflicts: Vec::new(),
            resolutions: Vec::new(),
            instructions: Vec::new(),
            backup_session: None,
            elapsed_ms: 0,
            outcome: Outcome::Success {
                results: Vec::new(),
            },
        };
        report.outcome = self.drive(&plan, policy, prompt, &mut report);
        report.elapsed_ms = elapsed_ms(started);

        info!(
            outcome = report.outcome.label(),
            conflicts = report.conflicts.len(),
            elapsed_ms = report.elapsed_ms,
            "run finished"
        );
        report
    }

    fn drive(
        &self,
        plan: &IntegrationPlan,
        policy: &RunPolicy,
        prompt: Option<&mut dyn ConflictPrompt>,
        report: &mut RunReport,
    ) -> Outcome {
        let locator = Locator::new(
            &self.root,
            self.config.app_name.as_deref(),
            &self.config.locator,
        );
        let scanners = enabled_scanners(&self.config);
        let scan_ctx = ScanContext {
            root: &self.root,
            prefix: &plan.prefix,
            config: &self.config,
        };

        let (prepared, scanned) = rayon::join(
            || {
                plan.targets
                    .par_iter()
                    .map(|tp| self.read_phase(&locator, tp, &plan.prefix))
                    .collect::<Vec<_>>()
            },
            || run_scanners(&scanners, &scan_ctx),
        );

        let mut targets = Vec::with_capacity(prepared.len());
        for result in prepared {
            match result {
                Ok(p) => targets.push(p),
                Err(e) => {
                    warn!(error = %e, "read phase failed; nothing will be written");
                    return Outcome::fatal(e);
                }
            }
        }

        report.conflicts = targets
            .iter()
            .flat_map(|t| t.conflicts.iter().cloned())
            .chain(scanned)
            .collect();

        // Prior integration of every target short-circuits resolution
        if policy.skip_if_exists
            && !targets.is_empty()
            && targets.iter().all(Prepared::already_integrated)
        {
            info!(targets = targets.len(), "every target already integrated; skipping");
            let mut results = Vec::with_capacity(targets.len());
            for mut prepared in targets {
                let resolved: Vec<ResolutionRecord> = prepared
                    .conflicts
                    .iter()
                    .filter(|c| c.kind == ConflictKind::AlreadyIntegrated)
                    .filter_map(auto_resolution)
                    .collect();
                report.resolutions.extend(resolved.iter().cloned());
                prepared.trail.advance(Stage::ConflictsResolved);
                results.push(skipped_result(prepared, resolved));
            }
            return Outcome::Skipped {
                reason: "every requested target is already integrated".to_string(),
                results,
            };
        }

        let mut resolver = Resolver::new(policy.resolver_policy(), prompt);
        let (patch, resolutions) = match resolver.resolve(&plan.prefix, &report.conflicts) {
            Resolution::Ready { patch, resolutions } => (patch, resolutions),
            Resolution::Blocked {
                manual,
                partial_resolutions,
                reason,
            } => {
                for t in &mut targets {
                    t.trail.advance(Stage::Blocked);
                }
                report.resolutions = partial_resolutions.clone();
                return Outcome::Blocked {
                    reason,
                    manual,
                    partial_resolutions,
                };
            }
        };
        report.resolutions = resolutions.clone();
        if patch.prefix_changed(&plan.prefix) {
            info!(from = %plan.prefix, to = %patch.prefix, "routes move to an alternate prefix");
        }

        let target_of: HashMap<String, Option<TargetKind>> = report
            .conflicts
            .iter()
            .map(|c| (c.id.clone(), c.target))
            .collect();
        let for_target = |kind: Option<TargetKind>| -> Vec<ResolutionRecord> {
            resolutions
                .iter()
                .filter(|r| target_of.get(r.conflict_ref.as_str()).copied().flatten() == kind)
                .cloned()
                .collect()
        };
        report.instructions = instructions_of(&for_target(None));

        match self.commit(targets, &patch, policy, &for_target, report) {
            Ok(outcome) => outcome,
            Err(e) => Outcome::fatal(e),
        }
    }

    /// Locate, read, analyze and detect for one target. Never writes.
    #[instrument(skip_all, fields(target = %tp.kind))]
    fn read_phase(
        &self,
        locator: &Locator<'_>,
        tp: &TargetPlan,
        prefix: &str,
    ) -> Result<Prepared, IntegrationError> {
        let started = Instant::now();
        let path = locator.locate(tp.kind)?;
        let mut trail = StageTrail::start();

        let text = read_source(&path)?;
        let analysis = Analyzer::new(&self.cache).analyze(&path, &text)?;
        trail.advance(Stage::Analyzed);

        let file = TargetFile {
            kind: tp.kind,
            hash: ContentHash::of(&text),
            path,
            text,
            tree: Some(analysis.tree),
        };
        let rel = file.relative_to(&self.root).display().to_string();
        let conflicts = detect(&analysis.facts, tp, prefix, Path::new(&rel));
        trail.advance(Stage::ConflictsDetected);
        debug!(path = %rel, conflicts = conflicts.len(), "read phase complete");

        Ok(Prepared {
            plan: tp.clone(),
            file,
            rel,
            facts: analysis.facts,
            conflicts,
            trail,
            started,
        })
    }

    /// Inject all targets in memory, then back up, write and validate each.
    fn commit(
        &self,
        targets: Vec<Prepared>,
        patch: &PatchSet,
        policy: &RunPolicy,
        for_target: &dyn Fn(Option<TargetKind>) -> Vec<ResolutionRecord>,
        report: &mut RunReport,
    ) -> Result<Outcome, IntegrationError> {
        let injector = Injector::new().map_err(|e| IntegrationError::InjectionFailure {
            path: self.root.clone(),
            structural: "not attempted".to_string(),
            textual: format!("invalid pattern: {e}"),
        })?;

        let mut results = Vec::new();
        let mut pending = Vec::new();

        for mut prepared in targets {
            prepared.trail.advance(Stage::ConflictsResolved);
            let kind = prepared.plan.kind;
            let resolved = for_target(Some(kind));

            if patch.skip_targets.contains(&kind) {
                info!(target = %kind, "already integrated; skipping");
                results.push(skipped_result(prepared, resolved));
                continue;
            }

            let injection = injector.inject(
                &prepared.file.path,
                &prepared.file.text,
                prepared.file.tree.as_ref(),
                &prepared.facts,
                &prepared.plan,
                &patch.prefix,
            )?;
            if let Some(reason) = &injection.fallback_reason {
                warn!(target = %kind, %reason, "textual fallback used");
            }
            pending.push(Pending {
                instructions: instructions_of(&resolved),
                prepared,
                injection,
                resolved,
            });
        }

        if policy.backup && !policy.dry_run {
            report.backup_session = self.back_up(&pending, &patch.prefix)?;
        }

        let requested = report.requested_prefix.clone();
        for p in pending {
            results.push(self.write_and_validate(p, patch, &requested, policy)?);
        }

        if !results.is_empty() && results.iter().all(|r| r.skipped) {
            return Ok(Outcome::Skipped {
                reason: "every requested target is already integrated".to_string(),
                results,
            });
        }
        Ok(Outcome::Success { results })
    }

    /// Back up the originals of every target about to change.
    fn back_up(&self, pending: &[Pending], prefix: &str) -> Result<Option<String>, IntegrationError> {
        let changed: Vec<&Pending> = pending.iter().filter(|p| p.injection.changed()).collect();
        if changed.is_empty() {
            return Ok(None);
        }
        let as_io = |e: anyhow::Error| {
            IntegrationError::io(
                self.root.join(crate::core::backup::STATE_DIR),
                std::io::Error::other(format!("{e:#}")),
            )
        };

        let mut session = BackupSession::begin(&self.root, "install", Some(prefix)).map_err(as_io)?;
        for p in &changed {
            session
                .backup_file(Path::new(&p.prepared.rel))
                .map_err(as_io)?;
        }
        session.finalize(true).map_err(as_io)?;
        Ok(Some(session.id().to_string()))
    }

    fn write_and_validate(
        &self,
        pending: Pending,
        patch: &PatchSet,
        requested: &str,
        policy: &RunPolicy,
    ) -> Result<IntegrationResult, IntegrationError> {
        let Pending {
            mut prepared,
            injection,
            resolved,
            instructions,
        } = pending;
        let kind = prepared.plan.kind;
        let changed = injection.changed();

        if changed && !policy.dry_run {
            write_atomic(&prepared.file.path, injection.text.as_bytes())
                .map_err(|e| IntegrationError::io(&prepared.file.path, e))?;
            self.cache.invalidate(&prepared.file.hash);
            info!(target = %kind, path = %prepared.rel, "written");
        }
        prepared.trail.advance(Stage::Injected);

        // Re-read what was committed; dry runs validate the in-memory text
        let committed = if policy.dry_run {
            Ok(injection.text.clone())
        } else {
            read_source(&prepared.file.path)
        };

        let call_inserted = injection
            .inserted
            .iter()
            .any(|f| f.role == FragmentRole::Call);
        // an untouched route call keeps mounting whatever it already mounted
        let applied_prefix = if call_inserted {
            prepared.plan.route_macro.as_ref().map(|_| patch.prefix.clone())
        } else {
            existing_prefix(&prepared)
        };

        let outcome = match &committed {
            Ok(text) => validate(
                &Analyzer::new(&self.cache),
                &ValidationInput {
                    path: &prepared.file.path,
                    text,
                    before: &prepared.facts,
                    plan: &prepared.plan,
                    requested_prefix: requested,
                    applied_prefix: applied_prefix.as_deref().unwrap_or(&patch.prefix),
                    inserted: &injection.inserted,
                    editor: injection.editor,
                    instructions: &instructions,
                    check_duplicates: policy.validate,
                },
            ),
            Err(e) => ValidationOutcome {
                errors: vec![format!("could not re-read after writing: {e}")],
                warnings: Vec::new(),
            },
        };
        prepared.trail.advance(Stage::Validated);

        let success = outcome.passed();
        if success {
            prepared.trail.advance(Stage::Done);
        } else {
            warn!(target = %kind, errors = ?outcome.errors, "validation failed");
        }

        let diff = changed.then(|| unified_diff(&prepared.rel, &prepared.file.text, &injection.text));
        Ok(IntegrationResult {
            target: kind,
            target_identity: prepared.rel.clone(),
            applied_prefix,
            conflicts_resolved: resolved,
            validation_outcome: outcome,
            success,
            changed,
            skipped: false,
            editor: injection.editor,
            stages: prepared.trail,
            elapsed_ms: elapsed_ms(prepared.started),
            diff,
        })
    }
}

fn instructions_of(resolutions: &[ResolutionRecord]) -> Vec<String> {
    resolutions
        .iter()
        .filter_map(|r| match &r.action_taken {
            ResolutionAction::ProvideInstructions { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Result for a target left unchanged because it is already integrated.
fn skipped_result(mut prepared: Prepared, resolved: Vec<ResolutionRecord>) -> IntegrationResult {
    prepared.trail.advance(Stage::Done);
    IntegrationResult {
        target: prepared.plan.kind,
        applied_prefix: existing_prefix(&prepared),
        target_identity: prepared.rel,
        conflicts_resolved: resolved,
        validation_outcome: ValidationOutcome::default(),
        success: true,
        changed: false,
        skipped: true,
        editor: None,
        elapsed_ms: elapsed_ms(prepared.started),
        stages: prepared.trail,
        diff: None,
    }
}

fn existing_prefix(prepared: &Prepared) -> Option<String> {
    let route_macro = prepared.plan.route_macro.as_ref()?;
    prepared
        .facts
        .calls_named(route_macro)
        .find_map(|c| c.first_literal())
        .map(str::to_string)
}

fn unified_diff(rel: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{rel}"), &format!("b/{rel}"))
        .to_string()
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Run the engine against `root` with the project's own configuration.
pub fn run(root: &Path, desired_prefix: &str, policy: &RunPolicy) -> Outcome {
    let config = load_config(root).unwrap_or_else(|e| {
        warn!(error = %e, "configuration unreadable; using defaults");
        Config::default()
    });
    RunContext::new(root, config)
        .execute(desired_prefix, policy, None)
        .outcome
}
