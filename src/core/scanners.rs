//! Project-wide conflict scanners
//!
//! Scanners look past the two target files: mix.exs dependencies,
//! `config/*.exs` overrides and generated auth modules under `lib/`. A scanner
//! whose input files are absent reports nothing.

use std::path::Path;

use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, instrument};

use crate::{
    core::{
        analyzer::join_path,
        conflict::{ConflictDetail, ConflictKind, ConflictOrigin, ConflictRecord, Location, Severity},
    },
    infra::{config::Config, walk::FileWalker},
};

/// Inputs shared by every scanner.
pub struct ScanContext<'a> {
    pub root: &'a Path,
    /// Normalized prefix the caller asked for
    pub prefix: &'a str,
    pub config: &'a Config,
}

/// A broader source of conflict records.
pub trait ConflictScanner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read-only inspection; unreadable or absent inputs yield no records.
    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<ConflictRecord>;
}

/// Scanners enabled by `[scanners]` in the config.
pub fn enabled_scanners(config: &Config) -> Vec<Box<dyn ConflictScanner>> {
    let mut out: Vec<Box<dyn ConflictScanner>> = Vec::new();
    if config.scanners.dependencies {
        out.push(Box::new(DependencyScanner));
    }
    if config.scanners.config {
        out.push(Box::new(ConfigScanner));
    }
    if config.scanners.source {
        out.push(Box::new(SourceScanner));
    }
    out
}

/// Run scanners in parallel; results keep scanner order.
#[instrument(skip_all, fields(scanners = scanners.len()))]
pub fn run_scanners(
    scanners: &[Box<dyn ConflictScanner>],
    ctx: &ScanContext<'_>,
) -> Vec<ConflictRecord> {
    let per_scanner: Vec<Vec<ConflictRecord>> = scanners
        .par_iter()
        .map(|s| {
            let found = s.scan(ctx);
            debug!(scanner = s.name(), records = found.len(), "scan finished");
            found
        })
        .collect();
    per_scanner.into_iter().flatten().collect()
}

fn location(root: &Path, path: &Path, line: Option<usize>) -> Location {
    Location {
        path: path
            .strip_prefix(root)
            .unwrap_or(path)
            .display()
            .to_string(),
        line,
    }
}

/// Drop `#` comments so commented-out entries are not matched.
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) if !line[..pos].contains('"') => &line[..pos],
        _ => line,
    }
}

/// mix.exs: the add-on dependency must be listed; competing auth libraries
/// must not be.
pub struct DependencyScanner;

impl ConflictScanner for DependencyScanner {
    fn name(&self) -> &'static str {
        "dependencies"
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<ConflictRecord> {
        let path = ctx.root.join("mix.exs");
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        let Ok(dep_re) = Regex::new(r"\{\s*:([a-z_][a-z0-9_]*)\s*,") else {
            return Vec::new();
        };

        let deps: Vec<(String, usize)> = text
            .lines()
            .enumerate()
            .flat_map(|(i, line)| {
                dep_re
                    .captures_iter(strip_comment(line))
                    .map(move |c| (c[1].to_string(), i + 1))
                    .collect::<Vec<_>>()
            })
            .collect();

        let scanners = &ctx.config.scanners;
        let mut out = Vec::new();

        if !deps.iter().any(|(name, _)| name == &scanners.addon_dependency) {
            out.push(ConflictRecord::new(
                ConflictKind::MissingPrerequisite,
                None,
                &format!("dep:{}", scanners.addon_dependency),
                ConflictDetail::MissingDependency {
                    name: scanners.addon_dependency.clone(),
                },
                ConflictOrigin::DependencyScanner,
                location(ctx.root, &path, None),
            ));
        }

        for (name, line) in deps
            .iter()
            .filter(|(name, _)| scanners.competing_deps.contains(name))
        {
            out.push(ConflictRecord::new(
                ConflictKind::ConflictingBlock,
                None,
                &format!("dep:{name}"),
                ConflictDetail::CompetingDependency { name: name.clone() },
                ConflictOrigin::DependencyScanner,
                location(ctx.root, &path, Some(*line)),
            ));
        }

        out
    }
}

/// `config/*.exs`: an explicit `route_prefix` for the add-on that disagrees
/// with the requested prefix.
pub struct ConfigScanner;

impl ConflictScanner for ConfigScanner {
    fn name(&self) -> &'static str {
        "config"
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<ConflictRecord> {
        let dir = ctx.root.join("config");
        if !dir.is_dir() {
            return Vec::new();
        }
        let app = &ctx.config.scanners.addon_dependency;
        let (Ok(head_re), Ok(prefix_re)) = (
            Regex::new(&format!(r"^\s*config\s+:{}\s*,", regex::escape(app))),
            Regex::new(r#"route_prefix:\s*"([^"]*)""#),
        ) else {
            return Vec::new();
        };

        let files = FileWalker::new(&[])
            .and_then(|w| w.with_include_patterns(&["config/*.exs".to_string()]))
            .map(|w| w.walk_files(ctx.root))
            .unwrap_or_default();

        let mut out = Vec::new();
        for file in files {
            let Ok(text) = std::fs::read_to_string(&file) else {
                continue;
            };

            // A statement runs from a `config` line to the next one
            let mut in_addon = false;
            for (i, raw) in text.lines().enumerate() {
                let line = strip_comment(raw);
                if line.trim_start().starts_with("config ") {
                    in_addon = head_re.is_match(line);
                }
                if !in_addon {
                    continue;
                }
                let Some(value) = prefix_re
                    .captures(line)
                    .map(|c| c[1].to_string())
                else {
                    continue;
                };
                if join_path("", &value) != ctx.prefix {
                    out.push(ConflictRecord::new(
                        ConflictKind::ConflictingBlock,
                        None,
                        &format!("config:{}:{}", location(ctx.root, &file, None).path, i + 1),
                        ConflictDetail::ConfigOverride {
                            key: format!(":{app}, :route_prefix"),
                            value,
                            requested: ctx.prefix.to_string(),
                        },
                        ConflictOrigin::ConfigScanner,
                        location(ctx.root, &file, Some(i + 1)),
                    ));
                }
            }
        }
        out
    }
}

/// `lib/**/*.ex`: a generated `*.UserAuth` module already owns auth routes.
pub struct SourceScanner;

impl ConflictScanner for SourceScanner {
    fn name(&self) -> &'static str {
        "source"
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<ConflictRecord> {
        if !ctx.root.join("lib").is_dir() {
            return Vec::new();
        }
        let Ok(module_re) = Regex::new(r"^\s*defmodule\s+([A-Z][A-Za-z0-9_.]*\.UserAuth)\s+do\b")
        else {
            return Vec::new();
        };

        let files = FileWalker::new(&ctx.config.locator.ignore)
            .and_then(|w| w.with_include_patterns(&["lib/**/*.ex".to_string()]))
            .map(|w| w.walk_files(ctx.root))
            .unwrap_or_default();

        let mut out = Vec::new();
        for file in files {
            let Ok(text) = std::fs::read_to_string(&file) else {
                continue;
            };
            for (i, line) in text.lines().enumerate() {
                if let Some(c) = module_re.captures(line) {
                    out.push(
                        ConflictRecord::new(
                            ConflictKind::ConflictingBlock,
                            None,
                            &format!("module:{}", &c[1]),
                            ConflictDetail::GeneratedModule {
                                module: c[1].to_string(),
                            },
                            ConflictOrigin::SourceScanner,
                            location(ctx.root, &file, Some(i + 1)),
                        )
                        .with_severity(Severity::Medium),
                    );
                }
            }
        }
        out
    }
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

    fn scan_all(root: &Path, prefix: &str) -> Vec<ConflictRecord> {
        let config = Config::default();
        let ctx = ScanContext {
            root,
            prefix,
            config: &config,
        };
        run_scanners(&enabled_scanners(&config), &ctx)
    }

    #[test]
    fn test_absent_inputs_report_nothing() {
        let tmp = tempdir().unwrap();
        assert!(scan_all(tmp.path(), "/auth_kit").is_empty());
    }

    #[test]
    fn test_dependency_scanner() {
        let tmp = tempdir().unwrap();
        write(
            tmp.path(),
            "mix.exs",
            r#"defp deps do
  [
    {:phoenix, "~> 1.7"},
    # {:coherence, "~> 0.5"},
    {:pow, "~> 1.0"}
  ]
end
"#,
        );

        let records = scan_all(tmp.path(), "/auth_kit");
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["missing_prerequisite:project:dep:auth_kit", "conflicting_block:project:dep:pow"]
        );
        assert_eq!(records[1].location.to_string(), "mix.exs:5");
        assert!(records[0].auto_resolvable);
        assert!(!records[1].auto_resolvable);
    }

    #[test]
    fn test_config_scanner_compares_normalized_prefix() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "mix.exs", "[{:auth_kit, \"~> 0.1\"}]\n");
        write(
            tmp.path(),
            "config/config.exs",
            "import Config\n\nconfig :auth_kit,\n  route_prefix: \"/login\"\n\nconfig :logger, route_prefix: \"/x\"\n",
        );

        let records = scan_all(tmp.path(), "/auth_kit");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin, ConflictOrigin::ConfigScanner);
        assert_eq!(records[0].location.to_string(), "config/config.exs:4");

        assert!(scan_all(tmp.path(), "/login").is_empty());
    }

    #[test]
    fn test_source_scanner_finds_generated_module() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "mix.exs", "[{:auth_kit, \"~> 0.1\"}]\n");
        write(
            tmp.path(),
            "lib/shop_web/user_auth.ex",
            "defmodule ShopWeb.UserAuth do\n  use ShopWeb, :verified_routes\nend\n",
        );
        write(tmp.path(), "deps/other/lib/x.ex", "defmodule Other.UserAuth do\nend\n");

        let records = scan_all(tmp.path(), "/auth_kit");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Medium);
        assert_eq!(
            records[0].detail,
            ConflictDetail::GeneratedModule {
                module: "ShopWeb.UserAuth".to_string()
            }
        );
    }
}
