//! Post-injection Validator
//!
//! Re-analyzes the committed text and reports blocking errors and advisory
//! warnings. It never reverts anything.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::{
    analyzer::{Analyzer, StructuralFacts},
    inject::EditorKind,
    plan::{Fragment, FragmentRole, TargetPlan},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// What the validator compares the committed text against.
pub struct ValidationInput<'a> {
    pub path: &'a Path,
    /// Text as committed (re-read from disk, or in memory for dry runs)
    pub text: &'a str,
    /// Facts of the text before injection
    pub before: &'a StructuralFacts,
    pub plan: &'a TargetPlan,
    pub requested_prefix: &'a str,
    pub applied_prefix: &'a str,
    pub inserted: &'a [Fragment],
    pub editor: Option<EditorKind>,
    /// Outstanding manual steps from resolution
    pub instructions: &'a [String],
    /// Compare construct counts against the pre-injection facts
    pub check_duplicates: bool,
}

#[instrument(skip_all, fields(path = %input.path.display()))]
pub fn validate(analyzer: &Analyzer<'_>, input: &ValidationInput<'_>) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    let after = match analyzer.analyze(input.path, input.text) {
        Ok(analysis) => analysis.facts,
        Err(e) => {
            outcome
                .errors
                .push(format!("file no longer parses: {} at line {}", e.reason, e.line));
            return outcome;
        }
    };

    let imports = after.import_count(&input.plan.import_module);
    if imports != 1 {
        outcome.errors.push(format!(
            "`import {}` present {imports} times, expected exactly once",
            input.plan.import_module
        ));
    }

    if let Some(route_macro) = &input.plan.route_macro {
        let calls = after.call_count(route_macro);
        if calls != 1 {
            outcome.errors.push(format!(
                "`{route_macro}` called {calls} times, expected exactly once"
            ));
        }
        let existing = after
            .calls_named(route_macro)
            .filter_map(|c| c.first_literal())
            .find(|p| *p != input.applied_prefix);
        if let Some(other) = existing {
            outcome.warnings.push(format!(
                "`{route_macro}` mounts {other}, not {}",
                input.applied_prefix
            ));
        }
    }

    if let Some(module) = &after.module {
        let mut outside: Vec<(String, usize)> = after
            .imports_of(&input.plan.import_module)
            .filter(|i| !module.encloses(&i.span))
            .map(|i| (format!("import {}", i.module), i.span.start_line))
            .collect();
        if let Some(route_macro) = &input.plan.route_macro {
            outside.extend(
                after
                    .calls_named(route_macro)
                    .filter(|c| !module.encloses(&c.span))
                    .map(|c| (c.name.clone(), c.span.start_line)),
            );
        }
        let name = module.name.as_deref().unwrap_or("module");
        for (what, line) in outside {
            outcome
                .errors
                .push(format!("`{what}` at line {line} lies outside `defmodule {name}`"));
        }
    }

    if input.check_duplicates {
        let added = |role: FragmentRole| input.inserted.iter().filter(|f| f.role == role).count();
        let (before, after) = (input.before, &*after);

        if after.imports.len() > before.imports.len() + added(FragmentRole::Import) {
            outcome.errors.push(format!(
                "import-like directives grew from {} to {}; duplicate introduced",
                before.imports.len(),
                after.imports.len()
            ));
        }
        if after.calls.len() > before.calls.len() + added(FragmentRole::Call) {
            outcome.errors.push(format!(
                "calls grew from {} to {}; duplicate introduced",
                before.calls.len(),
                after.calls.len()
            ));
        }
        if after.blocks.len() != before.blocks.len() {
            outcome.errors.push(format!(
                "block count changed from {} to {}",
                before.blocks.len(),
                after.blocks.len()
            ));
        }
    }

    if input.plan.route_macro.is_some() && input.applied_prefix != input.requested_prefix {
        outcome.warnings.push(format!(
            "routes mounted at {} instead of the requested {}",
            input.applied_prefix, input.requested_prefix
        ));
    }
    outcome
        .warnings
        .extend(input.instructions.iter().cloned());
    if input.editor == Some(EditorKind::Textual) {
        outcome
            .warnings
            .push("structural editor unavailable; textual fallback was used".to_string());
    }

    debug!(
        errors = outcome.errors.len(),
        warnings = outcome.warnings.len(),
        "validated"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{analyzer::AnalysisCache, target::TargetKind},
        infra::config::Config,
    };

    const BEFORE: &str = "defmodule App.Router do\n  pipeline :browser do\n  end\nend\n";

    fn check(after: &str, inserted: &[Fragment], applied: &str) -> ValidationOutcome {
        let cache = AnalysisCache::default();
        let analyzer = Analyzer::new(&cache);
        let before = analyzer
            .analyze(Path::new("router.ex"), BEFORE)
            .unwrap()
            .facts;
        let plan = TargetPlan::for_kind(TargetKind::Router, &Config::default());
        validate(
            &analyzer,
            &ValidationInput {
                path: Path::new("router.ex"),
                text: after,
                before: &before,
                plan: &plan,
                requested_prefix: "/auth_kit",
                applied_prefix: applied,
                inserted,
                editor: Some(EditorKind::Structural),
                instructions: &[],
                check_duplicates: true,
            },
        )
    }

    fn both() -> Vec<Fragment> {
        TargetPlan::for_kind(TargetKind::Router, &Config::default()).fragments("/auth_kit")
    }

    #[test]
    fn test_clean_injection_passes() {
        let after = "defmodule App.Router do\n  import AuthKit.Router\n  pipeline :browser do\n  end\n  auth_kit_routes \"/auth_kit\"\nend\n";
        let outcome = check(after, &both(), "/auth_kit");
        assert!(outcome.passed(), "{outcome:?}");
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_duplicate_call_is_an_error() {
        let after = "defmodule App.Router do\n  import AuthKit.Router\n  pipeline :browser do\n  end\n  auth_kit_routes \"/auth_kit\"\n  auth_kit_routes \"/auth_kit\"\nend\n";
        let outcome = check(after, &both(), "/auth_kit");
        assert_eq!(outcome.errors.len(), 2);
    }

    #[test]
    fn test_fragments_after_module_end_are_errors() {
        let after = "defmodule App.Router do\n  pipeline :browser do\n  end\nend\n  import AuthKit.Router\n  auth_kit_routes \"/auth_kit\"\n";
        let outcome = check(after, &both(), "/auth_kit");
        assert_eq!(outcome.errors.len(), 2, "{outcome:?}");
        assert!(outcome.errors[0].contains("`import AuthKit.Router` at line 5"));
        assert!(outcome.errors[1].contains("`auth_kit_routes` at line 6"));
        assert!(outcome.errors[1].ends_with("outside `defmodule App.Router`"));
    }

    #[test]
    fn test_unparseable_result_is_an_error() {
        let outcome = check("defmodule App.Router do\n", &both(), "/auth_kit");
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("file no longer parses"));
    }

    #[test]
    fn test_prefix_change_is_a_warning() {
        let after = "defmodule App.Router do\n  import AuthKit.Router\n  pipeline :browser do\n  end\n  auth_kit_routes \"/auth_kit_2\"\nend\n";
        let outcome = check(after, &both(), "/auth_kit_2");
        assert!(outcome.passed());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("/auth_kit_2"));
    }
}
