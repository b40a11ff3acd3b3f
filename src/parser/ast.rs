//! Compiled form of a template
//!
//! A template compiles to a tree of [`Node`]s holding resolved [`Expr`]s.
//! The tree is plain data: it serializes to JSON for the compiled-form cache
//! and is interpreted by the renderer.

use serde::{Deserialize, Serialize};

pub use crate::error::Span;

/// A node with its source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// One compiled template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub body: Vec<Node>,
}

impl Template {
    /// JSON encoding used as the stored compiled text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `===`
    Identical,
    /// `!==`
    NotIdentical,
    Eq,
    NotEq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl CompareOp {
    /// Operators in the order they are matched, longest first
    pub const ALL: [(&'static str, CompareOp); 8] = [
        ("===", CompareOp::Identical),
        ("!==", CompareOp::NotIdentical),
        ("==", CompareOp::Eq),
        ("!=", CompareOp::NotEq),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];
}

/// A resolved expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Literal),
    /// Numeric literal, kept verbatim
    Number(String),
    /// String literal with its original quote character
    Str { value: String, quote: char },
    Array(Vec<Expr>),
    /// Variable reference with zero or more access segments
    Path { root: String, segments: Vec<Segment> },
    /// `inner|name(args)`
    Filter {
        inner: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    /// Registered function call
    Call { name: String, args: Vec<Expr> },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Isset(Box<Expr>),
    Empty(Box<Expr>),
    /// Registered custom condition
    Condition { name: String, args: Vec<Expr> },
}

impl Expr {
    pub fn var(root: impl Into<String>) -> Self {
        Expr::Path {
            root: root.into(),
            segments: Vec::new(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Str {
            value: value.into(),
            quote: '\'',
        }
    }
}

/// One step of a variable path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Map key or list position
    Key(String),
    /// `[expr]`
    Index(Expr),
    /// Readable object member
    Member(String),
    /// Object method call
    Call { name: String, args: Vec<Expr> },
    /// Member of a value whose shape was unknown at compile time
    Dynamic(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub cond: Expr,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub value: Expr,
    pub body: Vec<Node>,
}

/// Iteration header shared by `@foreach` and `@forelse`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub collection: Expr,
    pub key: Option<String>,
    pub item: String,
    pub body: Vec<Node>,
}

/// Body of a section or push: a block, or inline content that closes at once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capture {
    Block(Vec<Node>),
    Inline(Expr),
}

/// What `@each` emits for an empty collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EachFallback {
    /// `'raw|text'`
    Text(String),
    Template(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Text(String),
    Print {
        expr: Expr,
        escape: bool,
    },
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Node>>,
    },
    Foreach(Loop),
    Forelse {
        each: Loop,
        empty: Vec<Node>,
    },
    For {
        var: String,
        start: Expr,
        end: Expr,
        body: Vec<Node>,
    },
    While {
        cond: Expr,
        body: Vec<Node>,
    },
    Switch {
        subject: Expr,
        cases: Vec<Case>,
        default: Option<Vec<Node>>,
    },
    Set {
        name: String,
        value: Expr,
    },
    Include {
        template: Expr,
        data: Option<Expr>,
    },
    Each {
        template: Expr,
        items: Expr,
        item: String,
        empty: Option<EachFallback>,
    },
    Extends {
        layout: Expr,
        data: Option<Expr>,
    },
    Section {
        name: Expr,
        content: Capture,
    },
    Yield {
        name: Expr,
        default: Option<Expr>,
    },
    Push {
        name: Expr,
        content: Capture,
    },
    Stack {
        name: Expr,
        default: Option<Expr>,
    },
    Script(String),
    /// Registered custom directive
    Custom {
        name: String,
        args: Vec<Expr>,
    },
    Break,
    Continue,
}
