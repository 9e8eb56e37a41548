//! Conflict resolution engine with one deterministic strategy per kind
//!
//! Resolution order:
//! 1. duplicate_path → alternate prefix outside the taken-path set
//! 2. missing_prerequisite → literal instructions (nothing is fabricated)
//! 3. already_integrated → skip that target
//! 4. Everything else → manual (prompt when interactive, else halt)
//!
//! All resolutions are merged into one `PatchSet` that must be internally
//! consistent before any target is injected.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::{
    analyzer::is_under,
    conflict::{ConflictDetail, ConflictKind, ConflictRecord, Severity},
    target::TargetKind,
};

/// What the resolver did about one conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolutionAction {
    AlternatePrefix { from: String, to: String },
    ProvideInstructions { text: String },
    SkipInstallation { target: Option<TargetKind> },
    /// A manual conflict the user chose to leave in place
    Acknowledged,
}

/// Immutable outcome of resolving one `ConflictRecord`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionRecord {
    /// `ConflictRecord::id` this resolves
    pub conflict_ref: String,
    pub action_taken: ResolutionAction,
    pub resulting_state: String,
}

/// Answer to an interactive manual conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDecision {
    /// Proceed, leaving the construct as it is
    Acknowledge,
    /// Stop the run
    Abort,
}

/// Caller-supplied decision source for manual conflicts.
pub trait ConflictPrompt {
    fn decide(&mut self, record: &ConflictRecord) -> PromptDecision;
}

/// Merged result of every resolution in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchSet {
    /// Prefix the route call will use
    pub prefix: String,
    pub skip_targets: BTreeSet<TargetKind>,
    /// Outstanding manual steps, in conflict order
    pub instructions: Vec<String>,
    /// Manual conflicts the user acknowledged
    pub acknowledged: Vec<String>,
}

impl PatchSet {
    pub fn prefix_changed(&self, requested: &str) -> bool {
        self.prefix != requested
    }
}

/// Resolver verdict for the whole run
#[derive(Debug, Clone)]
pub enum Resolution {
    Ready {
        patch: PatchSet,
        resolutions: Vec<ResolutionRecord>,
    },
    Blocked {
        manual: Vec<ConflictRecord>,
        partial_resolutions: Vec<ResolutionRecord>,
        reason: String,
    },
}

/// First `<prefix>_N` (N ≥ 2) that neither equals nor contains a taken path.
pub fn alternate_prefix(prefix: &str, taken: &[String]) -> String {
    (2u32..)
        .map(|n| format!("{prefix}_{n}"))
        .find(|candidate| !taken.iter().any(|t| is_under(t, candidate)))
        .unwrap_or_else(|| format!("{prefix}_{}", taken.len() + 2))
}

/// Literal manual steps for a missing prerequisite.
fn instructions_for(record: &ConflictRecord) -> String {
    match &record.detail {
        ConflictDetail::MissingBlock { kind, name } => format!(
            "Define `{kind} :{name} do ... end` in {} before the auth-kit routes; \
             the routes pipe through it.",
            record.location.path
        ),
        ConflictDetail::MissingDependency { name } => format!(
            "Add `{{:{name}, \"~> 0.1\"}}` to deps in {} and run `mix deps.get`.",
            record.location.path
        ),
        other => format!("Review {} ({other:?}).", record.location),
    }
}

/// The deterministic auto-resolution for `record`, if its kind has one.
pub fn auto_resolution(record: &ConflictRecord) -> Option<ResolutionRecord> {
    let (action_taken, resulting_state) = match (&record.kind, &record.detail) {
        (ConflictKind::DuplicatePath, ConflictDetail::DuplicatePath { prefix, taken, .. }) => {
            let to = alternate_prefix(prefix, taken);
            let state = format!("routes mounted at {to} instead of {prefix}");
            (
                ResolutionAction::AlternatePrefix {
                    from: prefix.clone(),
                    to,
                },
                state,
            )
        }
        (ConflictKind::MissingPrerequisite, _) => (
            ResolutionAction::ProvideInstructions {
                text: instructions_for(record),
            },
            "manual step required; nothing generated".to_string(),
        ),
        (ConflictKind::AlreadyIntegrated, _) => (
            ResolutionAction::SkipInstallation {
                target: record.target,
            },
            match record.target {
                Some(t) => format!("{t} left unchanged"),
                None => "left unchanged".to_string(),
            },
        ),
        _ => return None,
    };

    Some(ResolutionRecord {
        conflict_ref: record.id.clone(),
        action_taken,
        resulting_state,
    })
}

/// Run-level policy knobs the resolver honors.
#[derive(Debug, Clone, Copy)]
pub struct ResolverPolicy {
    pub auto_resolve: bool,
    pub interactive: bool,
    pub skip_if_exists: bool,
}

pub struct Resolver<'p> {
    policy: ResolverPolicy,
    prompt: Option<&'p mut dyn ConflictPrompt>,
}

impl<'p> Resolver<'p> {
    pub fn new(policy: ResolverPolicy, prompt: Option<&'p mut dyn ConflictPrompt>) -> Self {
        Self { policy, prompt }
    }

    fn treat_as_manual(&self, record: &ConflictRecord) -> bool {
        !self.policy.auto_resolve
            || !record.auto_resolvable
            || (record.kind == ConflictKind::AlreadyIntegrated && !self.policy.skip_if_exists)
    }

    /// Resolve every record and merge the results into one patch set.
    #[instrument(skip_all, fields(records = records.len(), prefix = requested_prefix))]
    pub fn resolve(&mut self, requested_prefix: &str, records: &[ConflictRecord]) -> Resolution {
        let mut resolutions = Vec::new();
        let mut manual = Vec::new();

        for record in records {
            if self.treat_as_manual(record) {
                manual.push(record.clone());
                continue;
            }
            if let Some(res) = auto_resolution(record) {
                debug!(conflict = %record.id, state = %res.resulting_state, "auto-resolved");
                resolutions.push(res);
            }
        }

        // Interactive: ask about each manual conflict; critical ones stay blocking
        if self.policy.interactive && !manual.is_empty() {
            if let Some(prompt) = self.prompt.as_deref_mut() {
                let mut still_manual = Vec::new();
                let mut aborted = false;
                for record in manual {
                    if aborted || record.severity == Severity::Critical {
                        still_manual.push(record);
                        continue;
                    }
                    match prompt.decide(&record) {
                        PromptDecision::Acknowledge => {
                            info!(conflict = %record.id, "acknowledged");
                            resolutions.push(ResolutionRecord {
                                conflict_ref: record.id.clone(),
                                action_taken: ResolutionAction::Acknowledged,
                                resulting_state: "left unchanged at the user's request".to_string(),
                            });
                        }
                        PromptDecision::Abort => {
                            aborted = true;
                            still_manual.push(record);
                        }
                    }
                }
                manual = still_manual;
            }
        }

        if !manual.is_empty() {
            warn!(count = manual.len(), "manual conflicts remain");
            return Resolution::Blocked {
                reason: format!("{} conflict(s) need manual resolution", manual.len()),
                manual,
                partial_resolutions: resolutions,
            };
        }

        match merge(requested_prefix, records, &resolutions) {
            Ok(patch) => Resolution::Ready { patch, resolutions },
            Err(reason) => {
                warn!(%reason, "inconsistent patch set");
                Resolution::Blocked {
                    manual: Vec::new(),
                    partial_resolutions: resolutions,
                    reason,
                }
            }
        }
    }
}

/// Fold resolutions into one patch set, rejecting contradictions.
pub fn merge(
    requested_prefix: &str,
    records: &[ConflictRecord],
    resolutions: &[ResolutionRecord],
) -> Result<PatchSet, String> {
    let mut patch = PatchSet {
        prefix: requested_prefix.to_string(),
        ..PatchSet::default()
    };
    let mut prefixes = BTreeSet::new();

    for res in resolutions {
        match &res.action_taken {
            ResolutionAction::AlternatePrefix { from, to } => {
                if from != requested_prefix {
                    return Err(format!(
                        "{} proposes a prefix change from {from}, but {requested_prefix} was requested",
                        res.conflict_ref
                    ));
                }
                prefixes.insert(to.clone());
            }
            ResolutionAction::ProvideInstructions { text } => {
                if !patch.instructions.contains(text) {
                    patch.instructions.push(text.clone());
                }
            }
            ResolutionAction::SkipInstallation { target } => {
                if let Some(t) = target {
                    patch.skip_targets.insert(*t);
                }
            }
            ResolutionAction::Acknowledged => patch
                .acknowledged
                .push(res.conflict_ref.clone()),
        }
    }

    if prefixes.len() > 1 {
        let all: Vec<_> = prefixes.into_iter().collect();
        return Err(format!("conflicting alternate prefixes proposed: {}", all.join(", ")));
    }
    if let Some(alt) = prefixes.into_iter().next() {
        // The new prefix must clear every taken path the detector saw
        let clash = records.iter().find_map(|r| match &r.detail {
            ConflictDetail::DuplicatePath { taken, .. } => {
                taken.iter().find(|t| is_under(t, &alt)).cloned()
            }
            _ => None,
        });
        if let Some(path) = clash {
            return Err(format!("alternate prefix {alt} still collides with {path}"));
        }
        patch.prefix = alt;
    }

    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conflict::{ConflictOrigin, Location};

    fn duplicate(path: &str, taken: &[&str]) -> ConflictRecord {
        ConflictRecord::new(
            ConflictKind::DuplicatePath,
            Some(TargetKind::Router),
            path,
            ConflictDetail::DuplicatePath {
                path: path.to_string(),
                prefix: "/auth_kit".to_string(),
                taken: taken.iter().map(|s| s.to_string()).collect(),
            },
            ConflictOrigin::Detector,
            Location {
                path: "lib/app_web/router.ex".to_string(),
                line: Some(4),
            },
        )
    }

    fn record(kind: ConflictKind, detail: ConflictDetail) -> ConflictRecord {
        ConflictRecord::new(
            kind,
            Some(TargetKind::Router),
            "subject",
            detail,
            ConflictOrigin::Detector,
            Location {
                path: "lib/app_web/router.ex".to_string(),
                line: None,
            },
        )
    }

    const AUTO: ResolverPolicy = ResolverPolicy {
        auto_resolve: true,
        interactive: false,
        skip_if_exists: true,
    };

    struct Scripted(Vec<PromptDecision>);

    impl ConflictPrompt for Scripted {
        fn decide(&mut self, _record: &ConflictRecord) -> PromptDecision {
            self.0.remove(0)
        }
    }

    #[test]
    fn test_alternate_prefix_skips_taken_and_parents() {
        let taken = vec!["/auth_kit/login".to_string(), "/auth_kit_2/x".to_string()];
        assert_eq!(alternate_prefix("/auth_kit", &taken), "/auth_kit_3");
        assert_eq!(alternate_prefix("/auth_kit", &[]), "/auth_kit_2");
    }

    #[test]
    fn test_duplicates_merge_into_one_prefix() {
        let taken = ["/auth_kit/login", "/auth_kit/logout"];
        let records = vec![duplicate("/auth_kit/login", &taken), duplicate("/auth_kit/logout", &taken)];

        match Resolver::new(AUTO, None).resolve("/auth_kit", &records) {
            Resolution::Ready { patch, resolutions } => {
                assert_eq!(patch.prefix, "/auth_kit_2");
                assert!(patch.prefix_changed("/auth_kit"));
                assert_eq!(resolutions.len(), 2);
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn test_instructions_never_fabricate() {
        let r = record(
            ConflictKind::MissingPrerequisite,
            ConflictDetail::MissingBlock {
                kind: "pipeline".to_string(),
                name: "browser".to_string(),
            },
        );
        match Resolver::new(AUTO, None).resolve("/auth_kit", &[r]) {
            Resolution::Ready { patch, resolutions } => {
                assert_eq!(patch.prefix, "/auth_kit");
                assert_eq!(patch.instructions.len(), 1);
                assert!(patch.instructions[0].contains("pipeline :browser"));
                assert!(matches!(
                    resolutions[0].action_taken,
                    ResolutionAction::ProvideInstructions { .. }
                ));
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn test_manual_conflicts_block_with_partial_resolutions() {
        let records = vec![
            duplicate("/auth_kit/login", &["/auth_kit/login"]),
            record(
                ConflictKind::ConflictingBlock,
                ConflictDetail::ReservedBlock {
                    kind: "pipeline".to_string(),
                    name: "auth_kit".to_string(),
                },
            ),
        ];
        match Resolver::new(AUTO, None).resolve("/auth_kit", &records) {
            Resolution::Blocked {
                manual,
                partial_resolutions,
                ..
            } => {
                assert_eq!(manual.len(), 1);
                assert_eq!(partial_resolutions.len(), 1);
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_auto_resolve_off_makes_everything_manual() {
        let policy = ResolverPolicy {
            auto_resolve: false,
            ..AUTO
        };
        let records = vec![duplicate("/auth_kit", &["/auth_kit"])];
        assert!(matches!(
            Resolver::new(policy, None).resolve("/auth_kit", &records),
            Resolution::Blocked { .. }
        ));
    }

    #[test]
    fn test_prompt_acknowledges_but_not_critical() {
        let policy = ResolverPolicy {
            interactive: true,
            ..AUTO
        };
        let blocking = record(
            ConflictKind::ConflictingBlock,
            ConflictDetail::CompetingDependency {
                name: "pow".to_string(),
            },
        );
        let mut prompt = Scripted(vec![PromptDecision::Acknowledge]);
        match Resolver::new(policy, Some(&mut prompt)).resolve("/auth_kit", &[blocking]) {
            Resolution::Ready { patch, .. } => assert_eq!(patch.acknowledged.len(), 1),
            other => panic!("expected ready, got {other:?}"),
        }

        let critical = record(
            ConflictKind::IncompatibleStructure,
            ConflictDetail::Structure {
                reason: "no module".to_string(),
            },
        );
        let mut prompt = Scripted(Vec::new());
        assert!(matches!(
            Resolver::new(policy, Some(&mut prompt)).resolve("/auth_kit", &[critical]),
            Resolution::Blocked { .. }
        ));
    }

    #[test]
    fn test_merge_rejects_divergent_prefixes() {
        let a = ResolutionRecord {
            conflict_ref: "a".to_string(),
            action_taken: ResolutionAction::AlternatePrefix {
                from: "/auth_kit".to_string(),
                to: "/auth_kit_2".to_string(),
            },
            resulting_state: String::new(),
        };
        let b = ResolutionRecord {
            conflict_ref: "b".to_string(),
            action_taken: ResolutionAction::AlternatePrefix {
                from: "/auth_kit".to_string(),
                to: "/auth_kit_3".to_string(),
            },
            resulting_state: String::new(),
        };
        let err = merge("/auth_kit", &[], &[a, b]).unwrap_err();
        assert!(err.contains("/auth_kit_2, /auth_kit_3"));
    }

    #[test]
    fn test_already_integrated_skips_target() {
        let r = record(
            ConflictKind::AlreadyIntegrated,
            ConflictDetail::AlreadyIntegrated {
                existing_prefix: None,
            },
        );
        match Resolver::new(AUTO, None).resolve("/auth_kit", std::slice::from_ref(&r)) {
            Resolution::Ready { patch, .. } => {
                assert!(patch.skip_targets.contains(&TargetKind::Router))
            }
            other => panic!("expected ready, got {other:?}"),
        }

        let strict = ResolverPolicy {
            skip_if_exists: false,
            ..AUTO
        };
        assert!(matches!(
            Resolver::new(strict, None).resolve("/auth_kit", &[r]),
            Resolution::Blocked { .. }
        ));
    }
}
