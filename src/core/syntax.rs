//! Closed node model for host source files.
//!
//! The parser lowers tree-sitter nodes into exactly four shapes so every
//! downstream consumer matches exhaustively instead of poking at raw node kinds.

use serde::Serialize;

/// Byte and line extent of a node (lines and columns are 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
}

/// Import-like directive keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    Import,
    Alias,
    Use,
    Require,
}

impl Directive {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "import" => Some(Directive::Import),
            "alias" => Some(Directive::Alias),
            "use" => Some(Directive::Use),
            "require" => Some(Directive::Require),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Directive::Import => "import",
            Directive::Alias => "alias",
            Directive::Use => "use",
            Directive::Require => "require",
        }
    }
}

/// One argument of a call, with its literal value when it has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Arg {
    /// Raw source text
    pub text: String,
    /// Literal value: string contents, atom name, or alias
    pub literal: Option<String>,
    /// Keyword keys when the argument is a keyword list (`only: ...`)
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportNode {
    pub directive: Directive,
    pub module: String,
    /// Keyword option keys, e.g. `only`, `except`, `as`
    pub options: Vec<String>,
    pub span: Span,
}

impl ImportNode {
    /// Import restricted to a subset of the module's functions/macros.
    pub fn is_restricted(&self) -> bool {
        self.options
            .iter()
            .any(|k| k == "only" || k == "except")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallNode {
    pub name: String,
    pub args: Vec<Arg>,
    pub span: Span,
}

impl CallNode {
    /// Literal value of the first argument, if any.
    pub fn first_literal(&self) -> Option<&str> {
        self.args
            .first()
            .and_then(|a| a.literal.as_deref())
    }
}

/// A call with a `do ... end` body: `defmodule`, `scope`, `pipeline`, ...
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockNode {
    pub kind: String,
    /// Literal first argument (module alias, scope path, pipeline atom)
    pub name: Option<String>,
    pub args: Vec<Arg>,
    pub span: Span,
    /// Byte offset just past the `do` keyword
    pub body_start: usize,
    /// Byte offset of the closing `end` keyword
    pub body_end: usize,
    pub children: Vec<SourceNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum SourceNode {
    Import(ImportNode),
    Call(CallNode),
    Block(BlockNode),
    Unknown { kind: String, span: Span },
}

impl SourceNode {
    pub fn span(&self) -> &Span {
        match self {
            SourceNode::Import(i) => &i.span,
            SourceNode::Call(c) => &c.span,
            SourceNode::Block(b) => &b.span,
            SourceNode::Unknown { span, .. } => span,
        }
    }

    /// Depth-first visit of this node and all nested block children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a SourceNode)) {
        visit(self);
        match self {
            SourceNode::Block(b) => {
                for child in &b.children {
                    child.walk(visit);
                }
            }
            SourceNode::Import(_) | SourceNode::Call(_) | SourceNode::Unknown { .. } => {}
        }
    }
}

/// Visit every node of a forest depth-first.
pub fn walk_all<'a>(nodes: &'a [SourceNode], visit: &mut impl FnMut(&'a SourceNode)) {
    for node in nodes {
        node.walk(visit);
    }
}
