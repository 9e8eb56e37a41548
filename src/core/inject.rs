//! Code Injector: structural editor with textual fallback
//!
//! Both editors implement `FragmentEditor` and produce the complete new text
//! in memory. Nothing here touches the filesystem; the orchestrator commits the
//! result with a single atomic write.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use tree_sitter::{InputEdit, Point, Tree};

use crate::{
    core::{
        analyzer::{Anchor, InjectionPoint, ModuleFacts, StructuralFacts, extract_facts},
        error::{IntegrationError, ParseError},
        plan::{Fragment, FragmentRole, TargetPlan},
    },
    infra::io::line_ending,
    parsers::elixir_parser::ElixirParser,
};

/// Which editor produced an injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorKind
{
    Structural,
    Textual,
}

impl std::fmt::Display for EditorKind
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result
    {
        match self
        {
            EditorKind::Structural => f.write_str("structural"),
            EditorKind::Textual => f.write_str("textual"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EditError
{
    #[error("editor not available for this target")]
    Unavailable,

    #[error("no anchor for the {0:?} fragment")]
    NoAnchor(FragmentRole),

    #[error("edited text does not parse: {0}")]
    Reparse(#[from] ParseError),

    #[error("verification failed: {0}")]
    Verification(String),
}

/// Everything an editor needs to place fragments into one target.
pub struct EditRequest<'a>
{
    pub path: &'a Path,
    pub text: &'a str,
    /// Parse tree of `text`, when one is available
    pub tree: Option<&'a Tree>,
    pub facts: &'a StructuralFacts,
    /// Fragments still missing, in source order
    pub fragments: &'a [Fragment],
}

/// New text and tree after a successful edit.
#[derive(Debug)]
pub struct EditOutput
{
    pub text: String,
    pub tree: Tree,
}

/// One "apply fragments at point" capability.
pub trait FragmentEditor
{
    fn kind(&self) -> EditorKind;

    fn available(
        &self,
        req: &EditRequest<'_>,
    ) -> bool;

    fn apply(
        &self,
        req: &EditRequest<'_>,
    ) -> Result<EditOutput, EditError>;
}

/// A pending insertion at a byte offset of the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice
{
    pub offset: usize,
    pub role: FragmentRole,
    pub text: String,
}

/// Text inserted for `fragment` at `point`: a new line carrying the anchor's
/// indentation, or a trailing line at end of file.
fn splice_text(
    point: &InjectionPoint,
    fragment: &Fragment,
    source: &str,
) -> String
{
    let eol = line_ending(source);
    match point.anchor
    {
        Anchor::EndOfFile if source.is_empty() || source.ends_with('\n') =>
        {
            format!("{}{}{eol}", point.indent, fragment.text)
        }
        Anchor::EndOfFile | Anchor::AfterLast | Anchor::AfterOpening =>
        {
            format!("{eol}{}{}", point.indent, fragment.text)
        }
    }
}

/// Puts `do` and `end` of a one-line module on their own lines so fragments
/// can land between them. Returns the replaced byte range and its
/// replacement, or `None` when the body already spans lines.
fn open_inline_body(
    text: &str,
    module: &ModuleFacts,
) -> Option<(std::ops::Range<usize>, String)>
{
    if !module.is_inline(text)
    {
        return None;
    }
    let eol = line_ending(text);
    let outer = module.indent(text);
    let body = text[module.body_start..module.body_end].trim();
    let replacement = if body.is_empty()
    {
        format!("{eol}{outer}")
    }
    else
    {
        format!("{eol}{outer}  {body}{eol}{outer}")
    };
    Some((module.body_start..module.body_end, replacement))
}

/// Descending offset; on ties the call goes first so the import lands
/// before it.
fn order_for_application(splices: &mut [Splice])
{
    splices.sort_by(|a, b| {
        b.offset
            .cmp(&a.offset)
            .then(b.role.cmp(&a.role))
    });
}

fn point_at(
    text: &str,
    byte: usize,
) -> Point
{
    let before = &text.as_bytes()[..byte];
    let row = memchr::memchr_iter(b'\n', before).count();
    let column = match memchr::memrchr(b'\n', before)
    {
        Some(nl) => byte - nl - 1,
        None => byte,
    };
    Point::new(row, column)
}

/// Construct counts after the edit must grow by exactly the inserted fragments.
fn verify_counts(
    before: &StructuralFacts,
    after: &StructuralFacts,
    fragments: &[Fragment],
) -> Result<(), EditError>
{
    let want_imports = fragments
        .iter()
        .filter(|f| f.role == FragmentRole::Import)
        .count();
    let want_calls = fragments
        .iter()
        .filter(|f| f.role == FragmentRole::Call)
        .count();

    if after.imports.len() != before.imports.len() + want_imports
    {
        return Err(EditError::Verification(format!(
            "expected {} import-like directives, found {}",
            before.imports.len() + want_imports,
            after.imports.len()
        )));
    }
    if after.calls.len() != before.calls.len() + want_calls
    {
        return Err(EditError::Verification(format!(
            "expected {} calls, found {}",
            before.calls.len() + want_calls,
            after.calls.len()
        )));
    }
    Ok(())
}

/// Tree-sitter editor: splices at node-derived offsets, keeps the tree in sync
/// with `Tree::edit` and re-parses incrementally.
#[derive(Default)]
pub struct StructuralEditor
{
    parser: ElixirParser,
}

impl FragmentEditor for StructuralEditor
{
    fn kind(&self) -> EditorKind
    {
        EditorKind::Structural
    }

    fn available(
        &self,
        req: &EditRequest<'_>,
    ) -> bool
    {
        req.tree
            .is_some()
    }

    fn apply(
        &self,
        req: &EditRequest<'_>,
    ) -> Result<EditOutput, EditError>
    {
        let mut tree = req
            .tree
            .cloned()
            .ok_or(EditError::Unavailable)?;
        let mut text = req
            .text
            .to_string();

        let mut opened = None;
        if let Some((range, replacement)) = req
            .facts
            .module
            .as_ref()
            .and_then(|m| open_inline_body(&text, m))
        {
            let start_position = point_at(&text, range.start);
            let old_end_position = point_at(&text, range.end);
            let new_end = range.start + replacement.len();
            text.replace_range(range.clone(), &replacement);
            tree.edit(&InputEdit {
                start_byte: range.start,
                old_end_byte: range.end,
                new_end_byte: new_end,
                start_position,
                old_end_position,
                new_end_position: point_at(&text, new_end),
            });
            tree = self
                .parser
                .reparse(req.path, &text, &tree)?;
            debug!("opened one-line module body");
            opened = Some(extract_facts(&tree, &text));
        }
        let facts = opened
            .as_ref()
            .unwrap_or(req.facts);

        let mut splices: Vec<Splice> = req
            .fragments
            .iter()
            .map(|f| {
                let point = match f.role
                {
                    FragmentRole::Import => &facts.import_point,
                    FragmentRole::Call => &facts.call_point,
                };
                Splice {
                    offset: point.offset,
                    role: f.role,
                    text: splice_text(point, f, &text),
                }
            })
            .collect();
        order_for_application(&mut splices);

        for splice in &splices
        {
            if splice.offset > text.len() || !text.is_char_boundary(splice.offset)
            {
                return Err(EditError::NoAnchor(splice.role));
            }
            let start_position = point_at(&text, splice.offset);
            text.insert_str(splice.offset, &splice.text);
            let new_end = splice.offset + splice.text.len();

            tree.edit(&InputEdit {
                start_byte: splice.offset,
                old_end_byte: splice.offset,
                new_end_byte: new_end,
                start_position,
                old_end_position: start_position,
                new_end_position: point_at(&text, new_end),
            });
        }

        let tree = self
            .parser
            .reparse(req.path, &text, &tree)?;
        verify_counts(req.facts, &extract_facts(&tree, &text), req.fragments)?;

        Ok(EditOutput { text, tree })
    }
}

/// Line-pattern editor used when the structural editor is unavailable or
/// fails: after the last import-like line, else after the last
/// `defmodule ... do` line, else at end of file.
pub struct TextualEditor
{
    parser: ElixirParser,
    directive_re: Regex,
    module_re: Regex,
}

impl TextualEditor
{
    pub fn new() -> Result<Self, regex::Error>
    {
        Ok(Self {
            parser: ElixirParser::new(),
            directive_re: Regex::new(r"(?m)^([ \t]*)(?:import|alias|use|require)[ \t][^\r\n]*")?,
            module_re: Regex::new(r"(?m)^([ \t]*)defmodule[ \t][^\r\n]*?\bdo[ \t]*\r?$")?,
        })
    }

    /// Anchor shared by every fragment: (line end offset, indent, anchor).
    fn anchor(
        &self,
        text: &str,
    ) -> InjectionPoint
    {
        let line_end = |end: usize| {
            // the module pattern may swallow the '\r' of a CRLF line end
            if end > 0 && text.as_bytes()[end - 1] == b'\r' { end - 1 } else { end }
        };

        if let Some(c) = self
            .directive_re
            .captures_iter(text)
            .last()
        {
            let (m, indent) = (c.get(0), c.get(1));
            if let (Some(m), Some(indent)) = (m, indent)
            {
                return InjectionPoint {
                    offset: m.end(),
                    indent: indent
                        .as_str()
                        .to_string(),
                    anchor: Anchor::AfterLast,
                    line: text[..m.start()]
                        .matches('\n')
                        .count()
                        + 1,
                };
            }
        }

        if let Some(c) = self
            .module_re
            .captures_iter(text)
            .last()
        {
            if let (Some(m), Some(indent)) = (c.get(0), c.get(1))
            {
                return InjectionPoint {
                    offset: line_end(m.end()),
                    indent: format!("{}  ", indent.as_str()),
                    anchor: Anchor::AfterOpening,
                    line: text[..m.start()]
                        .matches('\n')
                        .count()
                        + 1,
                };
            }
        }

        InjectionPoint {
            offset: text.len(),
            indent: String::new(),
            anchor: Anchor::EndOfFile,
            line: text
                .matches('\n')
                .count(),
        }
    }
}

impl FragmentEditor for TextualEditor
{
    fn kind(&self) -> EditorKind
    {
        EditorKind::Textual
    }

    fn available(
        &self,
        _req: &EditRequest<'_>,
    ) -> bool
    {
        true
    }

    fn apply(
        &self,
        req: &EditRequest<'_>,
    ) -> Result<EditOutput, EditError>
    {
        let mut text = req
            .text
            .to_string();
        if let Some((range, replacement)) = req
            .facts
            .module
            .as_ref()
            .and_then(|m| open_inline_body(&text, m))
        {
            text.replace_range(range, &replacement);
        }

        let point = self.anchor(&text);
        if point.anchor == Anchor::EndOfFile && req.facts.module.is_some()
        {
            // the module opening was not recognised; end of file is outside it
            let role = req
                .fragments
                .first()
                .map_or(FragmentRole::Import, |f| f.role);
            return Err(EditError::NoAnchor(role));
        }

        let mut splices: Vec<Splice> = req
            .fragments
            .iter()
            .filter(|f| {
                // Idempotency: never re-add a line that is already there
                !text
                    .lines()
                    .any(|l| l.trim() == f.text)
            })
            .map(|f| Splice {
                offset: point.offset,
                role: f.role,
                text: splice_text(&point, f, &text),
            })
            .collect();
        order_for_application(&mut splices);

        let inserted: Vec<Fragment> = req
            .fragments
            .iter()
            .filter(|f| {
                splices
                    .iter()
                    .any(|s| s.role == f.role)
            })
            .cloned()
            .collect();

        for splice in &splices
        {
            text.insert_str(splice.offset, &splice.text);
        }

        let tree = self
            .parser
            .parse(req.path, &text)?;
        verify_counts(req.facts, &extract_facts(&tree, &text), &inserted)?;

        Ok(EditOutput { text, tree })
    }
}

/// Result of injecting one target.
#[derive(Debug)]
pub struct Injection
{
    pub text: String,
    pub tree: Option<Tree>,
    /// None when nothing had to be inserted
    pub editor: Option<EditorKind>,
    pub inserted: Vec<Fragment>,
    /// Why the structural editor was not used, if it was skipped
    pub fallback_reason: Option<String>,
}

impl Injection
{
    pub fn changed(&self) -> bool
    {
        !self
            .inserted
            .is_empty()
    }
}

/// Tries editors in order; the first success wins.
pub struct Injector
{
    editors: Vec<Box<dyn FragmentEditor>>,
}

impl Injector
{
    /// Structural first, textual fallback.
    pub fn new() -> Result<Self, regex::Error>
    {
        Ok(Self::with_editors(vec![
            Box::new(StructuralEditor::default()),
            Box::new(TextualEditor::new()?),
        ]))
    }

    pub fn with_editors(editors: Vec<Box<dyn FragmentEditor>>) -> Self
    {
        Self { editors }
    }

    /// Fragments of `plan` the facts say are absent.
    pub fn missing_fragments(
        facts: &StructuralFacts,
        plan: &TargetPlan,
        prefix: &str,
    ) -> Vec<Fragment>
    {
        plan.fragments(prefix)
            .into_iter()
            .filter(|f| match f.role
            {
                FragmentRole::Import => !facts.import_present(&plan.import_module),
                FragmentRole::Call => plan
                    .route_macro
                    .as_ref()
                    .is_some_and(|m| !facts.call_present(m)),
            })
            .collect()
    }

    #[instrument(skip_all, fields(path = %path.display(), target = %plan.kind))]
    pub fn inject(
        &self,
        path: &Path,
        text: &str,
        tree: Option<&Tree>,
        facts: &StructuralFacts,
        plan: &TargetPlan,
        prefix: &str,
    ) -> Result<Injection, IntegrationError>
    {
        let fragments = Self::missing_fragments(facts, plan, prefix);
        if fragments.is_empty()
        {
            debug!("all fragments already present");
            return Ok(Injection {
                text: text.to_string(),
                tree: tree.cloned(),
                editor: None,
                inserted: Vec::new(),
                fallback_reason: None,
            });
        }

        let req = EditRequest {
            path,
            text,
            tree,
            facts,
            fragments: &fragments,
        };

        let mut failures: Vec<(EditorKind, String)> = Vec::new();
        for editor in &self.editors
        {
            if !editor.available(&req)
            {
                failures.push((editor.kind(), EditError::Unavailable.to_string()));
                continue;
            }
            match editor.apply(&req)
            {
                Ok(out) =>
                {
                    debug!(editor = %editor.kind(), fragments = fragments.len(), "injected");
                    let inserted = match editor.kind()
                    {
                        EditorKind::Structural => fragments.clone(),
                        EditorKind::Textual => fragments
                            .iter()
                            .filter(|f| {
                                !text
                                    .lines()
                                    .any(|l| l.trim() == f.text)
                            })
                            .cloned()
                            .collect(),
                    };
                    return Ok(Injection {
                        text: out.text,
                        tree: Some(out.tree),
                        editor: Some(editor.kind()),
                        inserted,
                        fallback_reason: failures
                            .first()
                            .map(|(kind, why)| format!("{kind} editor: {why}")),
                    });
                }
                Err(e) =>
                {
                    warn!(editor = %editor.kind(), error = %e, "editor failed, falling back");
                    failures.push((editor.kind(), e.to_string()));
                }
            }
        }

        let reason_of = |kind: EditorKind| {
            failures
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, why)| why.clone())
                .unwrap_or_else(|| "not configured".to_string())
        };
        Err(IntegrationError::InjectionFailure {
            path: PathBuf::from(path),
            structural: reason_of(EditorKind::Structural),
            textual: reason_of(EditorKind::Textual),
        })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::{
        core::{
            analyzer::{AnalysisCache, Analyzer},
            target::TargetKind,
        },
        infra::config::Config,
    };

    struct Failing(EditorKind);

    impl FragmentEditor for Failing
    {
        fn kind(&self) -> EditorKind
        {
            self.0
        }

        fn available(
            &self,
            _req: &EditRequest<'_>,
        ) -> bool
        {
            true
        }

        fn apply(
            &self,
            _req: &EditRequest<'_>,
        ) -> Result<EditOutput, EditError>
        {
            Err(EditError::Verification("forced".to_string()))
        }
    }

    fn run_with(
        injector: &Injector,
        src: &str,
        kind: TargetKind,
        prefix: &str,
    ) -> Result<Injection, IntegrationError>
    {
        let cache = AnalysisCache::default();
        let analysis = Analyzer::new(&cache)
            .analyze(Path::new("router.ex"), src)
            .expect("parses");
        let plan = TargetPlan::for_kind(kind, &Config::default());
        injector.inject(
            Path::new("router.ex"),
            src,
            Some(&analysis.tree),
            &analysis.facts,
            &plan,
            prefix,
        )
    }

    #[test]
    fn test_empty_module_gets_import_then_call()
    {
        let injector = Injector::new().unwrap();
        let out = run_with(
            &injector,
            "defmodule App.Router do\nend\n",
            TargetKind::Router,
            "/auth_kit",
        )
        .unwrap();

        assert_eq!(
            out.text,
            "defmodule App.Router do\n  import AuthKit.Router\n  auth_kit_routes \"/auth_kit\"\nend\n"
        );
        assert_eq!(out.editor, Some(EditorKind::Structural));
        assert_eq!(out.inserted.len(), 2);
        assert!(out.fallback_reason.is_none());
    }

    #[test]
    fn test_one_line_module_is_opened_before_splicing()
    {
        let injector = Injector::new().unwrap();
        let out = run_with(
            &injector,
            "defmodule ShopWeb.Router do end\n",
            TargetKind::Router,
            "/auth_kit",
        )
        .unwrap();

        assert_eq!(
            out.text,
            "defmodule ShopWeb.Router do\n  import AuthKit.Router\n  auth_kit_routes \"/auth_kit\"\nend\n"
        );
        assert_eq!(out.editor, Some(EditorKind::Structural));
    }

    #[test]
    fn test_one_line_module_keeps_its_body()
    {
        let injector = Injector::new().unwrap();
        let out = run_with(
            &injector,
            "defmodule ShopWeb.Router do use ShopWeb, :router end\n",
            TargetKind::Router,
            "/auth_kit",
        )
        .unwrap();

        assert_eq!(
            out.text,
            "defmodule ShopWeb.Router do\n  use ShopWeb, :router\n  import AuthKit.Router\n  auth_kit_routes \"/auth_kit\"\nend\n"
        );
    }

    #[test]
    fn test_textual_editor_opens_one_line_module()
    {
        let injector = Injector::with_editors(vec![
            Box::new(Failing(EditorKind::Structural)),
            Box::new(TextualEditor::new().unwrap()),
        ]);
        let out = run_with(
            &injector,
            "defmodule ShopWeb.Layouts do end\n",
            TargetKind::Layout,
            "/auth_kit",
        )
        .unwrap();

        assert_eq!(out.editor, Some(EditorKind::Textual));
        assert_eq!(
            out.text,
            "defmodule ShopWeb.Layouts do\n  import AuthKit.Components\nend\n"
        );
    }

    #[test]
    fn test_fragments_follow_last_constructs()
    {
        let src = "defmodule App.Router do\n  use App, :router\n\n  scope \"/\" do\n    get \"/\", P, :i\n  end\nend\n";
        let injector = Injector::new().unwrap();
        let out = run_with(&injector, src, TargetKind::Router, "/auth_kit").unwrap();

        let lines: Vec<&str> = out
            .text
            .lines()
            .collect();
        assert_eq!(lines[2], "  import AuthKit.Router");
        assert_eq!(lines[7], "  auth_kit_routes \"/auth_kit\"");
        assert_eq!(lines[8], "end");
    }

    #[test]
    fn test_partial_prior_only_adds_missing_call()
    {
        let src = "defmodule App.Router do\n  import AuthKit.Router\nend\n";
        let injector = Injector::new().unwrap();
        let out = run_with(&injector, src, TargetKind::Router, "/auth_kit").unwrap();

        assert_eq!(
            out.text
                .matches("import AuthKit.Router")
                .count(),
            1
        );
        assert_eq!(out.inserted.len(), 1);
        assert_eq!(out.inserted[0].role, FragmentRole::Call);
    }

    #[test]
    fn test_nothing_missing_is_a_no_op()
    {
        let src = "defmodule AppWeb.Layouts do\n  import AuthKit.Components\nend\n";
        let injector = Injector::new().unwrap();
        let out = run_with(&injector, src, TargetKind::Layout, "/auth_kit").unwrap();
        assert!(!out.changed());
        assert_eq!(out.text, src);
        assert!(out.editor.is_none());
    }

    #[test]
    fn test_falls_back_to_textual_editor()
    {
        let injector = Injector::with_editors(vec![
            Box::new(Failing(EditorKind::Structural)),
            Box::new(TextualEditor::new().unwrap()),
        ]);
        let src = "defmodule AppWeb.Layouts do\n  use AppWeb, :html\nend\n";
        let out = run_with(&injector, src, TargetKind::Layout, "/auth_kit").unwrap();

        assert_eq!(out.editor, Some(EditorKind::Textual));
        assert_eq!(
            out.text,
            "defmodule AppWeb.Layouts do\n  use AppWeb, :html\n  import AuthKit.Components\nend\n"
        );
        assert!(
            out.fallback_reason
                .unwrap()
                .contains("forced")
        );
    }

    #[test]
    fn test_both_editors_failing_is_injection_failure()
    {
        let injector = Injector::with_editors(vec![
            Box::new(Failing(EditorKind::Structural)),
            Box::new(Failing(EditorKind::Textual)),
        ]);
        let err = run_with(
            &injector,
            "defmodule A do\nend\n",
            TargetKind::Router,
            "/auth_kit",
        )
        .unwrap_err();
        assert!(matches!(err, IntegrationError::InjectionFailure { .. }));
    }

    #[test]
    fn test_crlf_files_stay_crlf()
    {
        let src = "defmodule App.Router do\r\n  use App, :router\r\nend\r\n";
        let injector = Injector::new().unwrap();
        let out = run_with(&injector, src, TargetKind::Router, "/auth_kit").unwrap();
        assert_eq!(
            out.text,
            "defmodule App.Router do\r\n  use App, :router\r\n  import AuthKit.Router\r\n  auth_kit_routes \"/auth_kit\"\r\nend\r\n"
        );
    }
}
