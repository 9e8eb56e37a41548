//! Filepath: src/parsers/elixir_parser.rs
//! Tree-sitter parsing for Elixir routers and layouts, plus lowering into the
//! closed `SourceNode` model.

use std::path::Path;

use tree_sitter::{Language, Node, Parser, Tree};

use crate::core::{
    error::ParseError,
    syntax::{Arg, BlockNode, CallNode, Directive, ImportNode, SourceNode, Span},
};

pub struct ElixirParser {
    language: Language,
}

impl Default for ElixirParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ElixirParser {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_elixir::LANGUAGE.into(),
        }
    }

    fn parser(&self, path: &Path, source: &str) -> Result<Parser, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| ParseError {
                path: path.display().to_string(),
                reason: format!("grammar could not be loaded: {e}"),
                line: 1,
                column: 1,
                src: source.to_string(),
                span: (0usize, 0usize).into(),
            })?;
        Ok(parser)
    }

    /// Parse `source`; any ERROR or MISSING node is a parse failure.
    pub fn parse(&self, path: &Path, source: &str) -> Result<Tree, ParseError> {
        self.parse_with(path, source, None)
    }

    /// Incremental reparse after `old` was adjusted with `Tree::edit`.
    pub fn reparse(&self, path: &Path, source: &str, old: &Tree) -> Result<Tree, ParseError> {
        self.parse_with(path, source, Some(old))
    }

    fn parse_with(
        &self,
        path: &Path,
        source: &str,
        old: Option<&Tree>,
    ) -> Result<Tree, ParseError> {
        let mut parser = self.parser(path, source)?;
        let tree = parser.parse(source, old).ok_or_else(|| ParseError {
            path: path.display().to_string(),
            reason: "parser returned no tree".to_string(),
            line: 1,
            column: 1,
            src: source.to_string(),
            span: (0usize, 0usize).into(),
        })?;

        if tree.root_node().has_error() {
            return Err(describe_error(path, source, &tree));
        }
        Ok(tree)
    }
}

/// Build a ParseError pointing at the first ERROR/MISSING node.
fn describe_error(path: &Path, source: &str, tree: &Tree) -> ParseError {
    let root = tree.root_node();
    let node = first_error_node(root).unwrap_or(root);
    let bytes = source.as_bytes();

    let reason = if node.is_missing() {
        format!("missing `{}`", node.kind())
    } else {
        let text = node.utf8_text(bytes).unwrap_or_default();
        let snippet: String = text.trim().chars().take(24).collect();
        if snippet.is_empty() {
            "unexpected end of input".to_string()
        } else {
            format!("unexpected `{snippet}`")
        }
    };

    let pos = node.start_position();
    ParseError {
        path: path.display().to_string(),
        reason,
        line: pos.row + 1,
        column: pos.column + 1,
        src: source.to_string(),
        span: (node.start_byte(), node.end_byte() - node.start_byte()).into(),
    }
}

/// Depth-first search for the first error or missing node.
fn first_error_node(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error_node(child) {
            return Some(found);
        }
    }
    None
}

/// Lower the top-level expressions of a parsed file.
pub fn lower(tree: &Tree, source: &str) -> Vec<SourceNode> {
    lower_children(tree.root_node(), source.as_bytes())
}

fn lower_children(node: Node, bytes: &[u8]) -> Vec<SourceNode> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if let Some(lowered) = lower_node(child, bytes) {
            out.push(lowered);
        }
    }
    out
}

fn lower_node(node: Node, bytes: &[u8]) -> Option<SourceNode> {
    match node.kind() {
        "comment" => None,
        "call" => Some(lower_call(node, bytes)),
        kind => Some(SourceNode::Unknown {
            kind: kind.to_string(),
            span: span_of(node),
        }),
    }
}

fn lower_call(node: Node, bytes: &[u8]) -> SourceNode {
    let name = node
        .child_by_field_name("target")
        .and_then(|t| t.utf8_text(bytes).ok())
        .unwrap_or_default()
        .to_string();

    let mut arguments = None;
    let mut do_block = None;
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "arguments" => arguments = Some(child),
            "do_block" => do_block = Some(child),
            _ => {}
        }
    }

    let args = arguments
        .map(|a| lower_args(a, bytes))
        .unwrap_or_default();

    match (Directive::from_keyword(&name), do_block) {
        (Some(directive), None) => {
            let module = args
                .first()
                .map(|a| a.literal.clone().unwrap_or_else(|| a.text.clone()))
                .unwrap_or_default();
            let options = args
                .iter()
                .flat_map(|a| a.keys.iter().cloned())
                .collect();
            SourceNode::Import(ImportNode {
                directive,
                module,
                options,
                span: span_of(node),
            })
        }
        (_, Some(body)) => {
            let (body_start, body_end) = body_bounds(body);
            SourceNode::Block(BlockNode {
                kind: name,
                name: args.first().and_then(|a| a.literal.clone()),
                args,
                span: span_of(node),
                body_start,
                body_end,
                children: lower_children(body, bytes),
            })
        }
        (None, None) => SourceNode::Call(CallNode {
            name,
            args,
            span: span_of(node),
        }),
    }
}

/// Byte offsets just past `do` and at the start of `end`.
fn body_bounds(body: Node) -> (usize, usize) {
    let mut start = None;
    let mut end = None;
    let mut cursor = body.walk();
    for child in body.children(&mut cursor) {
        match child.kind() {
            "do" if start.is_none() => start = Some(child.end_byte()),
            "end" => end = Some(child.start_byte()),
            _ => {}
        }
    }
    (
        start.unwrap_or_else(|| (body.start_byte() + 2).min(body.end_byte())),
        end.unwrap_or_else(|| body.end_byte()),
    )
}

fn lower_args(arguments: Node, bytes: &[u8]) -> Vec<Arg> {
    let mut out = Vec::new();
    let mut cursor = arguments.walk();
    for child in arguments.named_children(&mut cursor) {
        if child.kind() == "comment" {
            continue;
        }
        out.push(Arg {
            text: child
                .utf8_text(bytes)
                .unwrap_or_default()
                .to_string(),
            literal: literal_of(child, bytes),
            keys: keyword_keys(child, bytes),
        });
    }
    out
}

/// Literal value of strings, atoms and aliases.
fn literal_of(node: Node, bytes: &[u8]) -> Option<String> {
    let text = node.utf8_text(bytes).ok()?;
    match node.kind() {
        "alias" => Some(text.to_string()),
        "atom" => Some(text.trim_start_matches(':').to_string()),
        "quoted_atom" => Some(
            text.trim_start_matches(':')
                .trim_matches('"')
                .to_string(),
        ),
        "string" => {
            let mut value = String::new();
            let mut cursor = node.walk();
            for part in node.named_children(&mut cursor) {
                match part.kind() {
                    "interpolation" => return None,
                    _ => value.push_str(part.utf8_text(bytes).ok()?),
                }
            }
            Some(value)
        }
        _ => None,
    }
}

fn keyword_keys(node: Node, bytes: &[u8]) -> Vec<String> {
    if node.kind() != "keywords" {
        return Vec::new();
    }
    let mut keys = Vec::new();
    let mut cursor = node.walk();
    for pair in node.named_children(&mut cursor) {
        let key = pair
            .child_by_field_name("key")
            .and_then(|k| k.utf8_text(bytes).ok());
        if let Some(key) = key {
            keys.push(
                key.trim()
                    .trim_end_matches(':')
                    .trim_matches('"')
                    .to_string(),
            );
        }
    }
    keys
}

fn span_of(node: Node) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    Span {
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        start_line: start.row + 1,
        end_line: end.row + 1,
        start_column: start.column + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTER: &str = r#"defmodule DemoWeb.Router do
  use DemoWeb, :router
  import Plug.Conn, only: [put_status: 2]

  pipeline :browser do
    plug :accepts, ["html"]
  end

  # public pages
  scope "/", DemoWeb do
    pipe_through :browser
    get "/", PageController, :home
  end
end
"#;

    fn parse(src: &str) -> Vec<SourceNode> {
        let parser = ElixirParser::new();
        let tree = parser
            .parse(Path::new("router.ex"), src)
            .expect("parses");
        lower(&tree, src)
    }

    fn module_children(nodes: &[SourceNode]) -> &[SourceNode] {
        match nodes.first() {
            Some(SourceNode::Block(b)) => &b.children,
            other => panic!("expected defmodule block, got {other:?}"),
        }
    }

    #[test]
    fn test_lowers_module_structure() {
        let nodes = parse(ROUTER);
        assert_eq!(nodes.len(), 1);
        let SourceNode::Block(module) = &nodes[0] else {
            panic!("expected block");
        };
        assert_eq!(module.kind, "defmodule");
        assert_eq!(module.name.as_deref(), Some("DemoWeb.Router"));

        let children = module_children(&nodes);
        assert!(matches!(
            &children[0],
            SourceNode::Import(ImportNode { directive: Directive::Use, module, .. }) if module == "DemoWeb"
        ));
        match &children[1] {
            SourceNode::Import(import) => {
                assert_eq!(import.module, "Plug.Conn");
                assert!(import.is_restricted());
            }
            other => panic!("expected import, got {other:?}"),
        }
        match &children[2] {
            SourceNode::Block(b) => {
                assert_eq!(b.kind, "pipeline");
                assert_eq!(b.name.as_deref(), Some("browser"));
            }
            other => panic!("expected pipeline, got {other:?}"),
        }
    }

    #[test]
    fn test_scope_children_and_literals() {
        let nodes = parse(ROUTER);
        let children = module_children(&nodes);
        let scope = children
            .iter()
            .find_map(|n| match n {
                SourceNode::Block(b) if b.kind == "scope" => Some(b),
                _ => None,
            })
            .expect("scope block");
        assert_eq!(scope.name.as_deref(), Some("/"));
        let get = scope
            .children
            .iter()
            .find_map(|n| match n {
                SourceNode::Call(c) if c.name == "get" => Some(c),
                _ => None,
            })
            .expect("get call");
        assert_eq!(get.first_literal(), Some("/"));
        assert_eq!(get.args.len(), 3);
        assert!(scope.body_start < scope.body_end);
        assert_eq!(&ROUTER[scope.body_end..scope.body_end + 3], "end");
    }

    #[test]
    fn test_missing_end_is_parse_error() {
        let parser = ElixirParser::new();
        let err = parser
            .parse(
                Path::new("router.ex"),
                "defmodule Broken.Router do\n  scope \"/\" do\n    get \"/\", P, :i\n",
            )
            .unwrap_err();
        assert_eq!(err.path, "router.ex");
        assert!(err.line >= 1);
    }

    #[test]
    fn test_keyword_form_module_is_a_call() {
        let nodes = parse("defmodule Tiny, do: :ok\n");
        assert!(matches!(&nodes[0], SourceNode::Call(c) if c.name == "defmodule"));
    }
}
