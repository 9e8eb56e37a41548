//! Error taxonomy for the integration pipeline
//!
//! Every phase returns explicit `Result` values; the orchestrator maps these
//! onto `Outcome` variants and CLI exit codes.

use std::path::PathBuf;

use miette::{Diagnostic, SourceSpan};
use serde::Serialize;

use crate::core::target::TargetKind;

/// Source file that does not parse, with the first error location.
#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
#[error("{path} does not parse: {reason} at line {line}, column {column}")]
#[diagnostic(
    code(authkit::parse_error),
    help("fix the syntax error by hand and re-run; the installer never edits unparseable files")
)]
pub struct ParseError {
    pub path: String,
    pub reason: String,
    /// 1-based line of the first error node
    pub line: usize,
    /// 1-based column of the first error node
    pub column: usize,

    #[source_code]
    pub src: String,

    #[label("parser stopped here")]
    pub span: SourceSpan,
}

impl ParseError {
    /// Byte range of the error, for snippet renderers.
    pub fn byte_range(&self) -> std::ops::Range<usize> {
        let start = self.span.offset();
        start..start + self.span.len().max(1)
    }
}

/// Fatal and blocking failures raised by pipeline phases.
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    /// Requested route prefix cannot be written into a route string literal
    #[error("invalid route prefix {prefix:?}")]
    InvalidPrefix { prefix: String },

    /// Locator found no candidate file
    #[error("no {kind} file found under {root}")]
    TargetNotFound {
        kind: TargetKind,
        root: PathBuf,
        searched: Vec<String>,
    },

    /// Analyzer could not parse the target
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Resolver halted on manual conflicts
    #[error("{count} conflict(s) need manual resolution")]
    UnresolvedConflict { count: usize },

    /// Both the structural and the textual editor failed
    #[error("could not inject into {path}: structural editor: {structural}; textual editor: {textual}")]
    InjectionFailure {
        path: PathBuf,
        structural: String,
        textual: String,
    },

    /// Post-injection validation reported blocking findings
    #[error("validation of {path} reported {errors} error(s)")]
    ValidationFailure { path: PathBuf, errors: usize },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Machine-readable classification of a fatal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    InvalidPrefix,
    TargetNotFound,
    ParseError,
    InjectionFailure,
    Io,
}

impl IntegrationError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IntegrationError::Io {
            path: path.into(),
            source,
        }
    }

    /// Fatal classification; `None` for non-fatal errors.
    pub fn fatal_kind(&self) -> Option<FatalKind> {
        match self {
            IntegrationError::InvalidPrefix { .. } => Some(FatalKind::InvalidPrefix),
            IntegrationError::TargetNotFound { .. } => Some(FatalKind::TargetNotFound),
            IntegrationError::Parse(_) => Some(FatalKind::ParseError),
            IntegrationError::InjectionFailure { .. } => Some(FatalKind::InjectionFailure),
            IntegrationError::Io { .. } => Some(FatalKind::Io),
            IntegrationError::UnresolvedConflict { .. }
            | IntegrationError::ValidationFailure { .. } => None,
        }
    }

    /// Literal manual-fix instructions for the user.
    pub fn manual_fix(&self) -> String {
        match self {
            IntegrationError::InvalidPrefix { prefix } => format!(
                "Pick a prefix made of letters, digits, '/', '_', '-' and '.' (got {prefix:?}), \
                 e.g. --prefix /auth_kit."
            ),
            IntegrationError::TargetNotFound { kind, searched, .. } => format!(
                "Create the {kind} file or pass its location explicitly. Searched: {}",
                searched.join(", ")
            ),
            IntegrationError::Parse(p) => format!(
                "Fix the syntax error in {} (line {}, column {}) and re-run the installer.",
                p.path, p.line, p.column
            ),
            IntegrationError::UnresolvedConflict { .. } => {
                "Resolve the listed conflicts by hand, or re-run with --interactive.".to_string()
            }
            IntegrationError::InjectionFailure { path, .. } => format!(
                "Add the auth-kit import and route call to {} by hand; the file was left untouched.",
                path.display()
            ),
            IntegrationError::ValidationFailure { path, .. } => format!(
                "Inspect {} and remove duplicated auth-kit lines by hand.",
                path.display()
            ),
            IntegrationError::Io { path, .. } => {
                format!("Check permissions for {} and re-run.", path.display())
            }
        }
    }
}

/// CLI exit code mapping
/// 0=done/skipped, 1=invalid input, 2=blocked, 3=parse, 4=not found, 5=injection/internal
pub fn exit_code_for(kind: FatalKind) -> i32 {
    match kind {
        FatalKind::InvalidPrefix => 1,
        FatalKind::ParseError => 3,
        FatalKind::TargetNotFound => 4,
        FatalKind::InjectionFailure | FatalKind::Io => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = IntegrationError::TargetNotFound {
            kind: TargetKind::Router,
            root: PathBuf::from("/tmp/app"),
            searched: vec!["lib/app_web/router.ex".into()],
        };
        assert_eq!(err.fatal_kind(), Some(FatalKind::TargetNotFound));
        assert!(err.manual_fix().contains("lib/app_web/router.ex"));

        let blocked = IntegrationError::UnresolvedConflict { count: 2 };
        assert_eq!(blocked.fatal_kind(), None);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(FatalKind::ParseError), 3);
        assert_eq!(exit_code_for(FatalKind::TargetNotFound), 4);
        assert_eq!(exit_code_for(FatalKind::InjectionFailure), 5);
        assert_eq!(exit_code_for(FatalKind::InvalidPrefix), 1);
    }

    #[test]
    fn test_parse_error_byte_range_never_empty() {
        let err = ParseError {
            path: "router.ex".into(),
            reason: "missing end".into(),
            line: 3,
            column: 1,
            src: "defmodule A do\n".into(),
            span: (15usize, 0usize).into(),
        };
        assert_eq!(err.byte_range(), 15..16);
    }
}
