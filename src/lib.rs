//! **authkit-integrate** - installer engine that wires auth-kit into an existing Phoenix app
//!
//! Locates the router and layout, parses them with tree-sitter, detects and
//! resolves conflicts, injects the import and route call at structurally
//! correct positions, and validates the result. Repeated runs are no-ops.

/// Command-line interface with clap integration
pub mod cli;

/// `install`, `check` and `backups` handlers
pub mod commands;

/// Shell completion generation
pub mod completion;

/// Integration pipeline: locate, analyze, detect, resolve, inject, validate
pub mod core {
    /// Target kinds, target files and the locator
    pub mod target;
    pub use target::{Locator, TargetFile, TargetKind};

    /// Closed node model the analyzer works on
    pub mod syntax;

    /// Structural facts, injection points and the analysis cache
    pub mod analyzer;
    pub use analyzer::{AnalysisCache, Analyzer, StructuralFacts};

    /// Desired end state: fragments, prerequisites, reserved names
    pub mod plan;
    pub use plan::{IntegrationPlan, TargetPlan};

    /// Conflict taxonomy and the per-target detector
    pub mod conflict;
    pub use conflict::{ConflictKind, ConflictRecord, Severity};

    /// Project-wide scanners (mix.exs, config, generated modules)
    pub mod scanners;

    /// Resolution strategies and the merged patch set
    pub mod resolve;
    pub use resolve::{ConflictPrompt, PatchSet, PromptDecision, ResolutionRecord};

    /// Structural and textual fragment editors
    pub mod inject;

    /// Post-injection validation
    pub mod validate;

    /// Orchestrator and run outcomes
    pub mod pipeline;
    pub use pipeline::{IntegrationResult, Outcome, RunContext, RunPolicy, RunReport, Stage, run};

    /// Diagnostic report and renderers
    pub mod report;

    /// Pre-write backup sessions
    pub mod backup;

    /// Error taxonomy and exit codes
    pub mod error;
    pub use error::{IntegrationError, ParseError};
}

/// Language processing - tree-sitter parsing and lowering
pub mod parsers {
    /// Elixir parsing into the closed node model
    pub mod elixir_parser;
    pub use elixir_parser::ElixirParser;
}

/// Infrastructure - configuration, I/O, walking and logging
pub mod infra {
    /// Layered configuration (`authkit.toml` + `AUTHKIT__*`)
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// UTF-8 reads and atomic writes
    pub mod io;

    /// CRLF/LF-robust line indexing
    pub mod line_index;
    pub use line_index::NewlineIndex;

    /// Gitignore-aware file discovery
    pub mod walk;
    pub use walk::FileWalker;

    /// Tracing subscriber setup
    pub mod logging;
}

pub use cli::{AppContext, Cli, Commands};
pub use core::{Outcome, RunPolicy, run};
pub use infra::{Config, load_config};
