//! Desired end state for each target: which fragments must exist and which
//! host constructs the integration depends on.

use serde::Serialize;

use crate::{
    core::{analyzer::join_path, target::TargetKind},
    infra::config::Config,
};

/// The two fragment shapes the injector knows how to place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentRole {
    Import,
    Call,
}

/// A rendered fragment ready for insertion (no indentation, no newline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub role: FragmentRole,
    pub text: String,
}

/// A `<kind> :<name> do ... end` block the host must already define.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockRef {
    pub kind: String,
    pub name: String,
}

impl BlockRef {
    pub fn pipeline(name: &str) -> Self {
        Self {
            kind: "pipeline".to_string(),
            name: name.to_string(),
        }
    }

    /// Source form, e.g. `pipeline :browser`.
    pub fn display(&self) -> String {
        format!("{} :{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetPlan {
    pub kind: TargetKind,
    /// Module brought in with `import`
    pub import_module: String,
    /// Route-mounting macro; None for targets that only import
    pub route_macro: Option<String>,
    pub prerequisite: Option<BlockRef>,
    /// Block names the host must not define itself
    pub reserved: Vec<BlockRef>,
}

impl TargetPlan {
    pub fn for_kind(kind: TargetKind, config: &Config) -> Self {
        match kind {
            TargetKind::Router => Self {
                kind,
                import_module: config.router_module.clone(),
                route_macro: Some(config.route_macro.clone()),
                prerequisite: Some(BlockRef::pipeline(&config.prerequisite_pipeline)),
                reserved: vec![BlockRef::pipeline(&config.reserved_pipeline)],
            },
            TargetKind::Layout => Self {
                kind,
                import_module: config.components_module.clone(),
                route_macro: None,
                prerequisite: None,
                reserved: Vec::new(),
            },
        }
    }

    pub fn import_fragment(&self) -> Fragment {
        Fragment {
            role: FragmentRole::Import,
            text: format!("import {}", self.import_module),
        }
    }

    pub fn call_fragment(&self, prefix: &str) -> Option<Fragment> {
        self.route_macro
            .as_ref()
            .map(|name| Fragment {
                role: FragmentRole::Call,
                text: format!("{name} \"{prefix}\""),
            })
    }

    /// Fragments in source order (import before call).
    pub fn fragments(&self, prefix: &str) -> Vec<Fragment> {
        let mut out = vec![self.import_fragment()];
        out.extend(self.call_fragment(prefix));
        out
    }
}

/// Desired state for one run.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationPlan {
    /// Normalized prefix the caller asked for
    pub prefix: String,
    pub targets: Vec<TargetPlan>,
}

impl IntegrationPlan {
    pub fn new(prefix: &str, kinds: &[TargetKind], config: &Config) -> Self {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();

        Self {
            prefix: join_path("", prefix),
            targets: kinds
                .into_iter()
                .map(|k| TargetPlan::for_kind(k, config))
                .collect(),
        }
    }

    pub fn target(&self, kind: TargetKind) -> Option<&TargetPlan> {
        self.targets
            .iter()
            .find(|t| t.kind == kind)
    }
}

/// Validate a user-supplied route prefix and normalize it (`auth/` → `/auth`).
///
/// Only characters that can appear unescaped inside a route string literal
/// are accepted.
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let ok = !raw.trim().is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'));
    ok.then(|| join_path("", raw))
}
