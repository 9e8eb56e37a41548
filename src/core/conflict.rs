//! Conflict taxonomy and the Conflict Detector
//!
//! Detection is a pure function of structural facts and the target's plan:
//! - One record per conflicting construct, never one per file
//! - Record ids are derived from kind, target and subject (stable across runs)
//! - Records are immutable once created; only the resolver acts on them

use std::{fmt, path::Path};

use serde::Serialize;

use crate::core::{
    analyzer::{StructuralFacts, is_under},
    plan::TargetPlan,
    target::TargetKind,
};

/// Category of conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Desired route path collides with an existing declared path
    DuplicatePath,
    /// Host construct clashes with one the add-on needs to own
    ConflictingBlock,
    /// Something the integration depends on is absent
    MissingPrerequisite,
    /// The fragments are already there
    AlreadyIntegrated,
    /// File shape the injector cannot reason about
    IncompatibleStructure,
}

impl ConflictKind {
    pub const ALL: [ConflictKind; 5] = [
        ConflictKind::DuplicatePath,
        ConflictKind::ConflictingBlock,
        ConflictKind::MissingPrerequisite,
        ConflictKind::AlreadyIntegrated,
        ConflictKind::IncompatibleStructure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConflictKind::DuplicatePath => "duplicate_path",
            ConflictKind::ConflictingBlock => "conflicting_block",
            ConflictKind::MissingPrerequisite => "missing_prerequisite",
            ConflictKind::AlreadyIntegrated => "already_integrated",
            ConflictKind::IncompatibleStructure => "incompatible_structure",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ConflictKind::DuplicatePath | ConflictKind::ConflictingBlock => Severity::High,
            ConflictKind::MissingPrerequisite => Severity::Medium,
            ConflictKind::AlreadyIntegrated => Severity::Info,
            ConflictKind::IncompatibleStructure => Severity::Critical,
        }
    }

    /// The single deterministic strategy for this kind, if any.
    pub fn suggested_resolution(self) -> SuggestedResolution {
        match self {
            ConflictKind::DuplicatePath => SuggestedResolution::AlternatePrefix,
            ConflictKind::MissingPrerequisite => SuggestedResolution::ProvideInstructions,
            ConflictKind::AlreadyIntegrated => SuggestedResolution::SkipInstallation,
            ConflictKind::ConflictingBlock | ConflictKind::IncompatibleStructure => {
                SuggestedResolution::Manual
            }
        }
    }

    pub fn auto_resolvable(self) -> bool {
        self.suggested_resolution() != SuggestedResolution::Manual
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedResolution {
    AlternatePrefix,
    ProvideInstructions,
    SkipInstallation,
    Manual,
}

/// Which component produced the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOrigin {
    /// Structural comparison of a target against its plan
    Detector,
    /// mix.exs dependency inspection
    DependencyScanner,
    /// config/*.exs inspection
    ConfigScanner,
    /// lib/**/*.ex inspection
    SourceScanner,
}

/// Kind-specific payload; carries everything resolution needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictDetail {
    DuplicatePath {
        /// The colliding host path
        path: String,
        /// Prefix the caller asked for
        prefix: String,
        /// Every path already declared in the file (sorted, unique)
        taken: Vec<String>,
    },
    RestrictedImport {
        module: String,
        options: Vec<String>,
    },
    ReservedBlock {
        kind: String,
        name: String,
    },
    MissingBlock {
        kind: String,
        name: String,
    },
    MissingDependency {
        name: String,
    },
    CompetingDependency {
        name: String,
    },
    ConfigOverride {
        key: String,
        value: String,
        requested: String,
    },
    GeneratedModule {
        module: String,
    },
    AlreadyIntegrated {
        /// Prefix of the existing route call, if the target has one
        existing_prefix: Option<String>,
    },
    Structure {
        reason: String,
    },
}

/// Where the conflicting construct lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    /// Root-relative path
    pub path: String,
    /// 1-based line, when the construct has one
    pub line: Option<usize>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path, line),
            None => f.write_str(&self.path),
        }
    }
}

/// One detected conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    /// `<kind>:<scope>:<subject>`, stable across runs
    pub id: String,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub auto_resolvable: bool,
    pub suggested_resolution: SuggestedResolution,
    pub detail: ConflictDetail,
    pub origin: ConflictOrigin,
    /// Target the record is bound to; None for project-wide findings
    pub target: Option<TargetKind>,
    pub location: Location,
}

impl ConflictRecord {
    pub fn new(
        kind: ConflictKind,
        target: Option<TargetKind>,
        subject: &str,
        detail: ConflictDetail,
        origin: ConflictOrigin,
        location: Location,
    ) -> Self {
        let scope = target
            .map(|t| t.to_string())
            .unwrap_or_else(|| "project".to_string());
        Self {
            id: format!("{kind}:{scope}:{subject}"),
            kind,
            severity: kind.severity(),
            auto_resolvable: kind.auto_resolvable(),
            suggested_resolution: kind.suggested_resolution(),
            detail,
            origin,
            target,
            location,
        }
    }

    /// Override the kind-default severity (scanner findings are less certain).
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        match &self.detail {
            ConflictDetail::DuplicatePath { path, prefix, .. } => {
                format!("route {path} is already declared under the requested prefix {prefix}")
            }
            ConflictDetail::RestrictedImport { module, options } => format!(
                "`import {module}` is restricted with {}",
                options.join("/")
            ),
            ConflictDetail::ReservedBlock { kind, name } => {
                format!("`{kind} :{name}` is reserved by auth-kit but defined by the host")
            }
            ConflictDetail::MissingBlock { kind, name } => {
                format!("required `{kind} :{name}` is not defined")
            }
            ConflictDetail::MissingDependency { name } => {
                format!("dependency :{name} is not listed in mix.exs")
            }
            ConflictDetail::CompetingDependency { name } => {
                format!("competing auth dependency :{name} is installed")
            }
            ConflictDetail::ConfigOverride {
                key,
                value,
                requested,
            } => format!("config sets {key} to {value:?}, requested {requested:?}"),
            ConflictDetail::GeneratedModule { module } => {
                format!("generated auth module {module} already exists")
            }
            ConflictDetail::AlreadyIntegrated { existing_prefix } => match existing_prefix {
                Some(p) => format!("auth-kit is already integrated at {p}"),
                None => "auth-kit is already integrated".to_string(),
            },
            ConflictDetail::Structure { reason } => reason.clone(),
        }
    }
}

/// Compare a target's facts against its plan.
///
/// Returns records in a fixed order: structure, blocks, prerequisites, paths,
/// prior integration.
pub fn detect(
    facts: &StructuralFacts,
    plan: &TargetPlan,
    prefix: &str,
    rel_path: &Path,
) -> Vec<ConflictRecord> {
    let path = rel_path.display().to_string();
    let at = |line: Option<usize>| Location {
        path: path.clone(),
        line,
    };
    let target = Some(plan.kind);
    let mut out = Vec::new();

    // Structure the injector cannot handle
    let module_line = facts.module.as_ref().map(|m| m.span.start_line);
    let mut structure = Vec::new();
    if facts.module_count == 0 {
        structure.push(("no-module", "no `defmodule ... do` declaration found".to_string()));
    }
    if facts.module_count > 1 {
        structure.push((
            "multiple-modules",
            format!("{} top-level modules; expected exactly one", facts.module_count),
        ));
    }
    if facts.keyword_modules > 0 {
        structure.push((
            "keyword-module",
            "module uses the keyword `do:` form".to_string(),
        ));
    }
    for (subject, reason) in structure {
        out.push(ConflictRecord::new(
            ConflictKind::IncompatibleStructure,
            target,
            subject,
            ConflictDetail::Structure { reason },
            ConflictOrigin::Detector,
            at(module_line),
        ));
    }

    // Restricted import of our own module
    for import in facts.imports_of(&plan.import_module) {
        if import.is_restricted() {
            out.push(ConflictRecord::new(
                ConflictKind::ConflictingBlock,
                target,
                &format!("import:{}", import.module),
                ConflictDetail::RestrictedImport {
                    module: import.module.clone(),
                    options: import.options.clone(),
                },
                ConflictOrigin::Detector,
                at(Some(import.span.start_line)),
            ));
        }
    }

    // Host-defined blocks reserved for the add-on
    for reserved in &plan.reserved {
        for block in facts
            .blocks
            .iter()
            .filter(|b| b.kind == reserved.kind && b.name.as_deref() == Some(&reserved.name))
        {
            out.push(ConflictRecord::new(
                ConflictKind::ConflictingBlock,
                target,
                &format!("{}:{}", reserved.kind, reserved.name),
                ConflictDetail::ReservedBlock {
                    kind: reserved.kind.clone(),
                    name: reserved.name.clone(),
                },
                ConflictOrigin::Detector,
                at(Some(block.line)),
            ));
        }
    }

    if let Some(prereq) = &plan.prerequisite
        && !facts.block_present(&prereq.kind, &prereq.name)
    {
        out.push(ConflictRecord::new(
            ConflictKind::MissingPrerequisite,
            target,
            &format!("{}:{}", prereq.kind, prereq.name),
            ConflictDetail::MissingBlock {
                kind: prereq.kind.clone(),
                name: prereq.name.clone(),
            },
            ConflictOrigin::Detector,
            at(module_line),
        ));
    }

    // Host routes at or below the requested prefix
    if let Some(route_macro) = &plan.route_macro {
        let mut taken: Vec<String> = facts
            .declared_paths
            .iter()
            .map(|p| p.path.clone())
            .collect();
        taken.sort();
        taken.dedup();

        for declared in facts
            .declared_paths
            .iter()
            .filter(|p| &p.source != route_macro && is_under(&p.path, prefix))
        {
            out.push(ConflictRecord::new(
                ConflictKind::DuplicatePath,
                target,
                &format!("{}@{}", declared.path, declared.line),
                ConflictDetail::DuplicatePath {
                    path: declared.path.clone(),
                    prefix: prefix.to_string(),
                    taken: taken.clone(),
                },
                ConflictOrigin::Detector,
                at(Some(declared.line)),
            ));
        }
    }

    // Prior integration: import plus (where planned) the route call
    let import_present = facts.import_present(&plan.import_module);
    let call_present = plan
        .route_macro
        .as_ref()
        .is_none_or(|m| facts.call_present(m));
    if import_present && call_present {
        let existing_prefix = plan.route_macro.as_ref().and_then(|m| {
            facts
                .calls_named(m)
                .next()
                .and_then(|c| c.first_literal())
                .map(str::to_string)
        });
        out.push(ConflictRecord::new(
            ConflictKind::AlreadyIntegrated,
            target,
            &plan.import_module,
            ConflictDetail::AlreadyIntegrated { existing_prefix },
            ConflictOrigin::Detector,
            at(None),
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::analyzer::{AnalysisCache, Analyzer},
        infra::config::Config,
    };

    fn detect_in(src: &str, kind: TargetKind, prefix: &str) -> Vec<ConflictRecord> {
        let cache = AnalysisCache::default();
        let analysis = Analyzer::new(&cache)
            .analyze(Path::new("router.ex"), src)
            .expect("parses");
        let plan = TargetPlan::for_kind(kind, &Config::default());
        detect(&analysis.facts, &plan, prefix, Path::new("lib/app_web/router.ex"))
    }

    fn kinds(records: &[ConflictRecord]) -> Vec<ConflictKind> {
        records.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn test_clean_router_has_no_conflicts() {
        let src = "defmodule App.Router do\n  pipeline :browser do\n  end\nend\n";
        assert!(detect_in(src, TargetKind::Router, "/auth_kit").is_empty());
    }

    #[test]
    fn test_missing_prerequisite_is_auto_resolvable() {
        let records = detect_in("defmodule App.Router do\nend\n", TargetKind::Router, "/auth_kit");
        assert_eq!(kinds(&records), vec![ConflictKind::MissingPrerequisite]);
        let r = &records[0];
        assert!(r.auto_resolvable);
        assert_eq!(r.severity, Severity::Medium);
        assert_eq!(r.suggested_resolution, SuggestedResolution::ProvideInstructions);
        assert_eq!(r.id, "missing_prerequisite:router:pipeline:browser");
        assert_eq!(r.location.to_string(), "lib/app_web/router.ex:1");
    }

    #[test]
    fn test_one_duplicate_record_per_colliding_path() {
        let src = r#"defmodule App.Router do
  pipeline :browser do
  end

  scope "/auth_kit" do
    get "/login", SessionController, :new
    post "/logout", SessionController, :delete
  end

  get "/auth_kit_other", OtherController, :index
end
"#;
        let records = detect_in(src, TargetKind::Router, "/auth_kit");
        assert_eq!(kinds(&records), vec![ConflictKind::DuplicatePath; 2]);
        match &records[0].detail {
            ConflictDetail::DuplicatePath { path, taken, .. } => {
                assert_eq!(path, "/auth_kit/login");
                assert_eq!(
                    taken,
                    &vec![
                        "/auth_kit/login".to_string(),
                        "/auth_kit/logout".to_string(),
                        "/auth_kit_other".to_string()
                    ]
                );
            }
            other => panic!("unexpected detail {other:?}"),
        }
        assert_ne!(records[0].id, records[1].id);
    }

    #[test]
    fn test_already_integrated_ignores_prefix_and_own_paths() {
        let src = r#"defmodule App.Router do
  import AuthKit.Router

  pipeline :browser do
  end

  auth_kit_routes "/auth_kit_2"
end
"#;
        let records = detect_in(src, TargetKind::Router, "/auth_kit_2");
        assert_eq!(kinds(&records), vec![ConflictKind::AlreadyIntegrated]);
        assert_eq!(
            records[0].detail,
            ConflictDetail::AlreadyIntegrated {
                existing_prefix: Some("/auth_kit_2".to_string())
            }
        );
    }

    #[test]
    fn test_blocking_kinds_are_manual() {
        let src = r#"defmodule App.Router do
  import AuthKit.Router, only: [auth_kit_routes: 1]

  pipeline :browser do
  end

  pipeline :auth_kit do
  end
end

defmodule App.Other do
end
"#;
        let records = detect_in(src, TargetKind::Router, "/auth_kit");
        assert_eq!(
            kinds(&records),
            vec![
                ConflictKind::IncompatibleStructure,
                ConflictKind::ConflictingBlock,
                ConflictKind::ConflictingBlock,
            ]
        );
        assert!(records.iter().all(|r| !r.auto_resolvable));
        assert_eq!(records[0].severity, Severity::Critical);
    }

    #[test]
    fn test_layout_only_needs_the_import() {
        let src = "defmodule AppWeb.Layouts do\n  import AuthKit.Components\nend\n";
        let records = detect_in(src, TargetKind::Layout, "/auth_kit");
        assert_eq!(kinds(&records), vec![ConflictKind::AlreadyIntegrated]);
    }
}
