//! Structural Analyzer
//!
//! Parses a target, lowers it into the closed node model and extracts the
//! facts every later phase works from. Facts are plan-independent so they can
//! be memoized by content hash alone.

use std::{fmt, path::Path, sync::Arc};

use moka::sync::Cache;
use serde::Serialize;
use tracing::{debug, instrument};
use tree_sitter::Tree;

use crate::{
    core::{
        error::ParseError,
        syntax::{BlockNode, CallNode, Directive, ImportNode, SourceNode, Span, walk_all},
    },
    infra::line_index::NewlineIndex,
    parsers::elixir_parser::{ElixirParser, lower},
};

/// xxh64 of a file's full text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContentHash(pub u64);

impl ContentHash {
    pub fn of(text: &str) -> Self {
        ContentHash(xxhash_rust::xxh64::xxh64(text.as_bytes(), 0))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Calls whose first string argument declares a route path.
const ROUTE_VERBS: &[&str] = &[
    "get", "post", "put", "patch", "delete", "options", "head", "match", "live", "forward",
    "resources",
];

/// The top-level module declaration.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleFacts {
    pub name: Option<String>,
    pub span: Span,
    pub body_start: usize,
    pub body_end: usize,
}

impl ModuleFacts {
    /// Whether `span` sits between `do` and the closing `end`.
    pub fn encloses(&self, span: &Span) -> bool {
        self.body_start <= span.start_byte && span.end_byte <= self.body_end
    }

    /// `do` and `end` share a line, as in `defmodule A do end`.
    pub fn is_inline(&self, text: &str) -> bool {
        text.get(self.body_start..self.body_end)
            .is_some_and(|body| !body.contains('\n'))
    }

    /// Leading whitespace of the `defmodule` line.
    pub fn indent<'t>(&self, text: &'t str) -> &'t str {
        let line_start = text
            .get(..self.span.start_byte)
            .and_then(|before| memchr::memrchr(b'\n', before.as_bytes()))
            .map_or(0, |nl| nl + 1);
        let rest = &text[line_start..];
        let width = rest
            .bytes()
            .take_while(|b| *b == b' ' || *b == b'\t')
            .count();
        &rest[..width]
    }
}

/// A named `do ... end` block below the module (pipeline, scope, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockFact {
    pub kind: String,
    pub name: Option<String>,
    pub line: usize,
}

/// A route path declared by a verb or a route-mounting macro.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredPath {
    /// Full path with enclosing scope prefixes applied
    pub path: String,
    /// Name of the declaring call (`get`, `auth_kit_routes`, ...)
    pub source: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// After the last construct of the fragment's kind
    AfterLast,
    /// Right after `defmodule ... do`
    AfterOpening,
    EndOfFile,
}

/// Where a fragment goes: at `offset` (a line end), on a new line indented
/// with `indent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionPoint {
    pub offset: usize,
    pub indent: String,
    pub anchor: Anchor,
    /// 1-based line the fragment lands after
    pub line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructuralFacts {
    /// First top-level `defmodule ... do` block
    pub module: Option<ModuleFacts>,
    /// Top-level `defmodule` occurrences, both block and keyword form
    pub module_count: usize,
    /// Top-level `defmodule Name, do: ...` occurrences
    pub keyword_modules: usize,
    /// Import-like directives at any depth
    pub imports: Vec<ImportNode>,
    /// Plain calls at any depth
    pub calls: Vec<CallNode>,
    /// Blocks at any depth below the module
    pub blocks: Vec<BlockFact>,
    pub declared_paths: Vec<DeclaredPath>,
    pub import_point: InjectionPoint,
    pub call_point: InjectionPoint,
    pub line_count: usize,
}

impl StructuralFacts {
    /// `import <module>` occurrences (other directives do not count).
    pub fn import_count(&self, module: &str) -> usize {
        self.imports_of(module).count()
    }

    pub fn imports_of<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a ImportNode> + 'a {
        self.imports
            .iter()
            .filter(move |i| i.directive == Directive::Import && i.module == module)
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls_named(name).count()
    }

    pub fn calls_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a CallNode> + 'a {
        self.calls
            .iter()
            .filter(move |c| c.name == name)
    }

    pub fn import_present(&self, module: &str) -> bool {
        self.import_count(module) > 0
    }

    pub fn call_present(&self, name: &str) -> bool {
        self.call_count(name) > 0
    }

    pub fn block_present(&self, kind: &str, name: &str) -> bool {
        self.blocks
            .iter()
            .any(|b| b.kind == kind && b.name.as_deref() == Some(name))
    }
}

/// Parsed tree plus extracted facts for one content hash.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub tree: Tree,
    pub facts: Arc<StructuralFacts>,
}

/// Memoized analyses keyed by content hash, owned by the run context.
#[derive(Clone)]
pub struct AnalysisCache {
    inner: Cache<ContentHash, Analysis>,
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new(64)
    }
}

impl AnalysisCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::new(capacity),
        }
    }

    pub fn get(&self, hash: &ContentHash) -> Option<Analysis> {
        self.inner.get(hash)
    }

    pub fn insert(&self, hash: ContentHash, analysis: Analysis) {
        self.inner.insert(hash, analysis);
    }

    /// Drop the entry for content that no longer exists on disk.
    pub fn invalidate(&self, hash: &ContentHash) {
        self.inner.invalidate(hash);
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.inner.contains_key(hash)
    }
}

pub struct Analyzer<'c> {
    parser: ElixirParser,
    cache: &'c AnalysisCache,
}

impl<'c> Analyzer<'c> {
    pub fn new(cache: &'c AnalysisCache) -> Self {
        Self {
            parser: ElixirParser::new(),
            cache,
        }
    }

    pub fn parser(&self) -> &ElixirParser {
        &self.parser
    }

    /// Parse and extract facts, reusing a cached analysis for identical text.
    #[instrument(skip(self, text), fields(path = %path.display(), bytes = text.len()))]
    pub fn analyze(&self, path: &Path, text: &str) -> Result<Analysis, ParseError> {
        let hash = ContentHash::of(text);
        if let Some(hit) = self.cache.get(&hash) {
            debug!(%hash, "analysis cache hit");
            return Ok(hit);
        }

        let tree = self.parser.parse(path, text)?;
        let facts = Arc::new(extract_facts(&tree, text));
        debug!(
            %hash,
            imports = facts.imports.len(),
            calls = facts.calls.len(),
            paths = facts.declared_paths.len(),
            "analyzed"
        );

        let analysis = Analysis { tree, facts };
        self.cache.insert(hash, analysis.clone());
        Ok(analysis)
    }
}

/// Extract facts from an already-parsed tree.
pub fn extract_facts(tree: &Tree, text: &str) -> StructuralFacts {
    let nodes = lower(tree, text);
    let index = NewlineIndex::build(text.as_bytes());

    let mut module_count = 0;
    let mut keyword_modules = 0;
    let mut module_block: Option<&BlockNode> = None;
    for node in &nodes {
        match node {
            SourceNode::Block(b) if b.kind == "defmodule" => {
                module_count += 1;
                module_block.get_or_insert(b);
            }
            SourceNode::Call(c) if c.name == "defmodule" => {
                module_count += 1;
                keyword_modules += 1;
            }
            SourceNode::Import(_)
            | SourceNode::Call(_)
            | SourceNode::Block(_)
            | SourceNode::Unknown { .. } => {}
        }
    }

    let mut imports = Vec::new();
    let mut calls = Vec::new();
    let mut blocks = Vec::new();
    walk_all(&nodes, &mut |node| match node {
        SourceNode::Import(i) => imports.push(i.clone()),
        SourceNode::Call(c) => calls.push(c.clone()),
        SourceNode::Block(b) if b.kind != "defmodule" => blocks.push(BlockFact {
            kind: b.kind.clone(),
            name: b.name.clone(),
            line: b.span.start_line,
        }),
        SourceNode::Block(_) | SourceNode::Unknown { .. } => {}
    });

    let mut declared_paths = Vec::new();
    collect_paths(&nodes, "", &mut declared_paths);

    let (import_point, call_point) = match module_block {
        Some(module) => (
            point_after_last(module, text, &index, |n| matches!(n, SourceNode::Import(_))),
            point_after_last(module, text, &index, is_routing_construct),
        ),
        None => (end_of_file(text, &index), end_of_file(text, &index)),
    };

    StructuralFacts {
        module: module_block.map(|b| ModuleFacts {
            name: b.name.clone(),
            span: b.span,
            body_start: b.body_start,
            body_end: b.body_end,
        }),
        module_count,
        keyword_modules,
        imports,
        calls,
        blocks,
        declared_paths,
        import_point,
        call_point,
        line_count: index.line_count(),
    }
}

/// Constructs a route-mounting call is grouped with.
fn is_routing_construct(node: &SourceNode) -> bool {
    match node {
        SourceNode::Block(b) => b.kind == "scope" || b.kind == "pipeline",
        SourceNode::Import(_) => true,
        SourceNode::Call(c) => first_string_arg(c).is_some_and(|p| p.starts_with('/')),
        SourceNode::Unknown { .. } => false,
    }
}

fn point_after_last(
    module: &BlockNode,
    text: &str,
    index: &NewlineIndex,
    same_kind: impl Fn(&SourceNode) -> bool,
) -> InjectionPoint {
    let bytes = text.as_bytes();

    if let Some(last) = module.children.iter().rev().find(|&n| same_kind(n)) {
        let span = last.span();
        return InjectionPoint {
            offset: index.line_end_after(span.end_byte, bytes),
            indent: index
                .indent_of_line(span.start_line, text)
                .to_string(),
            anchor: Anchor::AfterLast,
            line: index.line_of_byte(span.end_byte.saturating_sub(1)),
        };
    }

    let module_line = module.span.start_line;
    let indent = match module.children.first() {
        Some(first) => index
            .indent_of_line(first.span().start_line, text)
            .to_string(),
        None => format!("{}  ", index.indent_of_line(module_line, text)),
    };
    InjectionPoint {
        offset: index.line_end_after(module.body_start, bytes),
        indent,
        anchor: Anchor::AfterOpening,
        line: index.line_of_byte(module.body_start.saturating_sub(1)),
    }
}

fn end_of_file(text: &str, index: &NewlineIndex) -> InjectionPoint {
    InjectionPoint {
        offset: text.len(),
        indent: String::new(),
        anchor: Anchor::EndOfFile,
        line: index.line_count(),
    }
}

/// First argument as a string literal (not an atom or alias).
fn first_string_arg(call: &CallNode) -> Option<&str> {
    let arg = call.args.first()?;
    if arg.text.starts_with('"') {
        arg.literal.as_deref()
    } else {
        None
    }
}

fn collect_paths(nodes: &[SourceNode], prefix: &str, out: &mut Vec<DeclaredPath>) {
    for node in nodes {
        match node {
            SourceNode::Block(b) if b.kind == "scope" => {
                let scoped = match b.args.first() {
                    Some(arg) if arg.text.starts_with('"') => arg
                        .literal
                        .as_deref()
                        .map(|p| join_path(prefix, p)),
                    _ => Some(prefix.to_string()),
                };
                // Interpolated scope paths cannot be reasoned about
                if let Some(scoped) = scoped {
                    collect_paths(&b.children, &scoped, out);
                }
            }
            SourceNode::Block(b) => collect_paths(&b.children, prefix, out),
            SourceNode::Call(c) => {
                let Some(path) = first_string_arg(c) else {
                    continue;
                };
                if ROUTE_VERBS.contains(&c.name.as_str()) || path.starts_with('/') {
                    out.push(DeclaredPath {
                        path: join_path(prefix, path),
                        source: c.name.clone(),
                        line: c.span.start_line,
                    });
                }
            }
            SourceNode::Import(_) | SourceNode::Unknown { .. } => {}
        }
    }
}

/// Join route segments: no duplicate slashes, no trailing slash except root.
pub fn join_path(prefix: &str, path: &str) -> String {
    let mut out = String::from("/");
    for segment in prefix
        .split('/')
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
    {
        if out.len() > 1 {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// `path` equals `prefix` or lies below it.
pub fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = join_path("", prefix);
    let path = join_path("", path);
    prefix == "/" || path == prefix || path.starts_with(&format!("{prefix}/"))
}
