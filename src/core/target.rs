//! Target files and the locator that finds them.
//!
//! Lookup order: high-probability conventional paths first, then a broader
//! gitignore-aware pattern search. The first existing match wins and nothing is
//! ever written here.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use tree_sitter::Tree;

use crate::{
    core::{analyzer::ContentHash, error::IntegrationError},
    infra::{config::LocatorConfig, walk::FileWalker},
};

/// The two artifact kinds the installer knows how to edit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Router,
    Layout,
}

impl TargetKind {
    pub const ALL: [TargetKind; 2] = [TargetKind::Router, TargetKind::Layout];

    /// Conventional locations, most likely first.
    pub fn candidates(self, app: &str) -> Vec<String> {
        match self {
            TargetKind::Router => vec![
                format!("lib/{app}_web/router.ex"),
                format!("lib/{app}/router.ex"),
                "web/router.ex".to_string(),
            ],
            TargetKind::Layout => vec![
                format!("lib/{app}_web/components/layouts.ex"),
                format!("lib/{app}_web/views/layout_view.ex"),
                "web/views/layout_view.ex".to_string(),
            ],
        }
    }

    /// Glob patterns for the broader search (matched on root-relative paths).
    pub fn patterns(self) -> &'static [&'static str] {
        match self {
            TargetKind::Router => &["lib/**/router.ex", "lib/**/*_router.ex", "web/**/router.ex"],
            TargetKind::Layout => &[
                "lib/**/layouts.ex",
                "lib/**/layout_view.ex",
                "web/**/layout_view.ex",
            ],
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Router => write!(f, "router"),
            TargetKind::Layout => write!(f, "layout"),
        }
    }
}

/// A located target, owned by one pipeline run.
#[derive(Debug)]
pub struct TargetFile {
    pub kind: TargetKind,
    pub path: PathBuf,
    pub text: String,
    /// None when parsing failed
    pub tree: Option<Tree>,
    pub hash: ContentHash,
}

impl TargetFile {
    /// Path relative to the project root, for display and backups.
    pub fn relative_to(&self, root: &Path) -> PathBuf {
        self.path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.path.clone())
    }
}

/// Finds target files under a project root.
pub struct Locator<'a> {
    root: PathBuf,
    app: String,
    config: &'a LocatorConfig,
}

impl<'a> Locator<'a> {
    pub fn new(root: &Path, app: Option<&str>, config: &'a LocatorConfig) -> Self {
        let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let app = app
            .map(str::to_string)
            .unwrap_or_else(|| infer_app_name(&root));
        Self { root, app, config }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    /// Locate the file for `kind`, or fail with `TargetNotFound`.
    #[instrument(skip(self), fields(root = %self.root.display(), app = %self.app))]
    pub fn locate(&self, kind: TargetKind) -> Result<PathBuf, IntegrationError> {
        let mut searched = Vec::new();

        for rel in kind.candidates(&self.app) {
            let path = self.root.join(&rel);
            debug!(candidate = %path.display(), "probing conventional path");
            if path.is_file() {
                return Ok(path);
            }
            searched.push(rel);
        }

        let mut patterns: Vec<String> = kind
            .patterns()
            .iter()
            .map(|p| p.to_string())
            .collect();
        patterns.extend(self.extra_patterns(kind).iter().cloned());

        let walker = FileWalker::new(&self.config.ignore)
            .and_then(|w| w.with_include_patterns(&patterns))
            .map_err(|e| IntegrationError::io(&self.root, std::io::Error::other(e.to_string())))?;

        let mut matches = walker.walk_files(&self.root);
        matches.sort();
        searched.extend(patterns);

        match matches.into_iter().next() {
            Some(found) => {
                debug!(found = %found.display(), "pattern search matched");
                Ok(found)
            }
            None => Err(IntegrationError::TargetNotFound {
                kind,
                root: self.root.clone(),
                searched,
            }),
        }
    }

    fn extra_patterns(&self, kind: TargetKind) -> &[String] {
        match kind {
            TargetKind::Router => &self.config.extra_router_patterns,
            TargetKind::Layout => &self.config.extra_layout_patterns,
        }
    }
}

/// App name from `mix.exs` (`app: :my_app`), else the root directory name.
pub fn infer_app_name(root: &Path) -> String {
    let from_mix = std::fs::read_to_string(root.join("mix.exs"))
        .ok()
        .and_then(|mix| {
            let re = regex::Regex::new(r"app:\s*:([a-z_][a-z0-9_]*)").ok()?;
            re.captures(&mix)
                .map(|c| c[1].to_string())
        });

    from_mix.unwrap_or_else(|| {
        root.file_name()
            .map(|n| {
                n.to_string_lossy()
                    .replace('-', "_")
                    .to_lowercase()
            })
            .unwrap_or_else(|| "app".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    #[test]
    fn test_infer_app_name_from_mix() {
        let tmp = tempdir().unwrap();
        write(
            tmp.path(),
            "mix.exs",
            "def project do\n  [app: :shop_front, version: \"0.1.0\"]\nend\n",
        );
        assert_eq!(infer_app_name(tmp.path()), "shop_front");
    }

    #[test]
    fn test_conventional_candidate_wins_over_pattern() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "lib/shop_web/router.ex", "defmodule A do\nend\n");
        write(tmp.path(), "lib/admin/admin_router.ex", "defmodule B do\nend\n");

        let cfg = LocatorConfig::default();
        let locator = Locator::new(tmp.path(), Some("shop"), &cfg);
        let found = locator.locate(TargetKind::Router).unwrap();
        assert!(found.ends_with("lib/shop_web/router.ex"));
    }

    #[test]
    fn test_pattern_fallback_and_not_found() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "lib/legacy/web/router.ex", "defmodule A do\nend\n");

        let cfg = LocatorConfig::default();
        let locator = Locator::new(tmp.path(), Some("shop"), &cfg);
        let found = locator.locate(TargetKind::Router).unwrap();
        assert!(found.ends_with("lib/legacy/web/router.ex"));

        let err = locator.locate(TargetKind::Layout).unwrap_err();
        match err {
            IntegrationError::TargetNotFound { kind, searched, .. } => {
                assert_eq!(kind, TargetKind::Layout);
                assert!(searched.iter().any(|s| s.contains("layouts.ex")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
