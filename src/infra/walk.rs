//! Filepath: src/infra/walk.rs
//! Gitignore-aware file walker for host projects.
//! - Respects .gitignore, .git/info/exclude, and global gitignore
//! - Extra ignore globs (early prune + late filter)
//! - Optional include globs (only matching files are returned)
//! - Hidden files always skipped (`.elixir_ls`, `.git`, ...)
//! - Deterministic ordering for stable tests/CI
//!
//! Backed by ripgrep's `ignore` crate and `globset`. All globs match on paths
//! relative to the walk root.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};

/// Gitignore-aware walker with extra ignore globs and optional include globs.
pub struct FileWalker
{
    /// Compiled set of additional ignore patterns
    ignore_patterns: GlobSet,

    /// Only files matching one of these are returned; None = all files
    include_patterns: Option<GlobSet>,
}

fn build_set(patterns: &[String]) -> Result<GlobSet>
{
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns
    {
        builder.add(Glob::new(pattern)?);
    }

    Ok(builder.build()?)
}

impl FileWalker
{
    /// Build a walker with additional ignore patterns (e.g., "deps/**",
    /// "_build/**"). Patterns match on root-relative paths.
    pub fn new(additional_ignores: &[String]) -> Result<Self>
    {
        Ok(Self {
            ignore_patterns: build_set(additional_ignores)?,
            include_patterns: None,
        })
    }

    /// Restrict results to files matching any of `patterns`.
    pub fn with_include_patterns(
        mut self,
        patterns: &[String],
    ) -> Result<Self>
    {
        self.include_patterns = Some(build_set(patterns)?);
        Ok(self)
    }

    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        // WalkBuilder::hidden(true) skips dotfiles
        b.hidden(true);

        b.git_ignore(true);
        b.git_global(true);
        b.git_exclude(true);
        // Host projects are not always git checkouts
        b.require_git(false);

        b.follow_links(false);

        // Early directory pruning using extra ignores on relative paths
        let extra = self
            .ignore_patterns
            .clone();
        let base = root.to_path_buf();
        b.filter_entry(move |ent: &DirEntry| {
            let is_dir = ent
                .file_type()
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            if !is_dir
            {
                return true;
            }
            let rel = ent
                .path()
                .strip_prefix(&base)
                .unwrap_or(ent.path());
            !(extra.is_match(rel) || extra.is_match(rel.join("_")))
        });

        b
    }

    /// Traverse files under `root`, respecting ignore rules and globs.
    /// Returns a **sorted** list of absolute file paths.
    pub fn walk_files<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Vec<PathBuf>
    {
        let root_path = root.as_ref();
        let walker = self
            .build_walk(root_path)
            .build();

        let mut out: Vec<PathBuf> = walker
            .filter_map(|res| res.ok())
            .filter(|entry| {
                entry
                    .file_type()
                    .is_some_and(|ft| ft.is_file())
            })
            .map(|entry| entry.into_path())
            .filter(|abs| {
                let rel = abs
                    .strip_prefix(root_path)
                    .unwrap_or(abs);
                if self
                    .ignore_patterns
                    .is_match(rel)
                {
                    return false;
                }
                self.include_patterns
                    .as_ref()
                    .is_none_or(|inc| inc.is_match(rel))
            })
            .collect();

        out.sort();

        out
    }
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    /// Create a file with parent dirs as needed
    fn write_file(
        root: &Path,
        rel: &str,
        contents: &str,
    ) -> Result<()>
    {
        let path = root.join(rel);
        if let Some(parent) = path.parent()
        {
            std::fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn relative(
        root: &Path,
        files: Vec<PathBuf>,
    ) -> Vec<PathBuf>
    {
        files
            .into_iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_path_buf()
            })
            .collect()
    }

    #[test]
    fn test_include_patterns_select_routers() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "lib/shop_web/router.ex", "defmodule R do\nend")?;
        write_file(root, "lib/shop_web/endpoint.ex", "defmodule E do\nend")?;
        write_file(root, "lib/admin/admin_router.ex", "defmodule A do\nend")?;

        let walker = FileWalker::new(&[])?.with_include_patterns(&[
            "lib/**/router.ex".to_string(),
            "lib/**/*_router.ex".to_string(),
        ])?;
        let files = relative(root, walker.walk_files(root));

        assert_eq!(
            files,
            vec![
                PathBuf::from("lib/admin/admin_router.ex"),
                PathBuf::from("lib/shop_web/router.ex"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_additional_globs_prune_dependencies() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "deps/phoenix/lib/router.ex", "defmodule P do\nend")?;
        write_file(root, "_build/dev/lib/router.ex", "defmodule B do\nend")?;
        write_file(root, "lib/router.ex", "defmodule R do\nend")?;

        let ignores = vec!["deps/**".to_string(), "_build/**".to_string()];
        let walker = FileWalker::new(&ignores)?;
        let files = relative(root, walker.walk_files(root));

        assert_eq!(files, vec![PathBuf::from("lib/router.ex")]);
        Ok(())
    }

    #[test]
    fn test_hidden_files_are_skipped() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, ".elixir_ls/router.ex", "x")?;
        write_file(root, "router.ex", "y")?;

        let files = relative(root, FileWalker::new(&[])?.walk_files(root));
        assert_eq!(files, vec![PathBuf::from("router.ex")]);
        Ok(())
    }
}
