//! Directive compilation
//!
//! Each `@name(args)` tag is translated by one rule. Block directives open a
//! [`Frame`] that collects the nodes up to the matching terminator, so the
//! compiled form is a tree even though tags arrive as a flat sequence.
//!
//! Three pieces of block state need care:
//! - `@foreach(items as item if cond)` opens an implicit conditional that
//!   the single `@endforeach` closes as well.
//! - `@push` regions nest; `@endpush` closes the innermost one.
//! - At most one `@section` block may be open at a time.

use std::collections::VecDeque;
use std::mem;

use tracing::trace;

use crate::error::{CompileError, ExprError, Span};
use crate::functions::DirectiveScope;
use crate::parser::ast::{Branch, Capture, Case, EachFallback, Expr, Loop, Node};
use crate::parser::expression::ExpressionResolver;
use crate::parser::headers::{parse_assignment, parse_binding, parse_count_header};
use crate::parser::split::{
    is_identifier, quoted, split_args, split_once_top_level, split_top_level,
};
use crate::value::Shape;

/// Directive names with built-in meaning; custom directives may not reuse them
pub const BUILTIN_DIRECTIVES: &[&str] = &[
    "if",
    "elseif",
    "else",
    "endif",
    "isset",
    "endisset",
    "empty",
    "endempty",
    "ifempty",
    "foreach",
    "endforeach",
    "forelse",
    "endforelse",
    "for",
    "endfor",
    "while",
    "endwhile",
    "switch",
    "case",
    "default",
    "endswitch",
    "break",
    "continue",
    "set",
    "include",
    "each",
    "extends",
    "section",
    "endsection",
    "yield",
    "push",
    "endpush",
    "stack",
    "script",
    "endscript",
    "javascript",
];

pub fn is_builtin_directive(name: &str) -> bool {
    BUILTIN_DIRECTIVES.contains(&name)
}

/// Marker distinguishing literal `@each` fallback text from a template name
const RAW_FALLBACK_PREFIX: &str = "raw|";

/// Which arm of a `@switch` is collecting nodes
enum SwitchArm {
    /// Between `@switch` and the first `@case`
    Preamble,
    Case(Expr),
    Default,
}

enum Block {
    Conditional {
        /// Terminator: `endif`, `endisset`, `endempty`, `endforeach` or `end<condition>`
        closer: String,
        branches: Vec<Branch>,
        cond: Expr,
        in_else: bool,
        /// Opened by `@foreach(... if cond)`
        implicit: bool,
    },
    Foreach {
        collection: Expr,
        key: Option<String>,
        item: String,
    },
    Forelse {
        collection: Expr,
        key: Option<String>,
        item: String,
        /// Set once the empty-branch separator is seen
        loop_body: Option<Vec<Node>>,
    },
    For {
        var: String,
        start: Expr,
        end: Expr,
    },
    While {
        cond: Expr,
    },
    Switch {
        subject: Expr,
        cases: Vec<Case>,
        default: Option<Vec<Node>>,
        arm: SwitchArm,
    },
    Section {
        name: Expr,
    },
    Push {
        name: Expr,
    },
}

impl Block {
    fn is_loop(&self) -> bool {
        matches!(
            self,
            Block::Foreach { .. } | Block::Forelse { .. } | Block::For { .. } | Block::While { .. }
        )
    }

    fn closer(&self) -> &str {
        match self {
            Block::Conditional { closer, .. } => closer,
            Block::Foreach { .. } => "endforeach",
            Block::Forelse { .. } => "endforelse",
            Block::For { .. } => "endfor",
            Block::While { .. } => "endwhile",
            Block::Switch { .. } => "endswitch",
            Block::Section { .. } => "endsection",
            Block::Push { .. } => "endpush",
        }
    }
}

struct Frame {
    block: Block,
    opener: String,
    span: Span,
    body: Vec<Node>,
}

/// Translates directives into nodes, tracking open blocks for one compile pass
pub struct DirectiveCompiler<'a> {
    resolver: ExpressionResolver<'a>,
    scope: Option<&'a DirectiveScope>,
    scripts: VecDeque<String>,
    root: Vec<Node>,
    frames: Vec<Frame>,
}

impl<'a> DirectiveCompiler<'a> {
    pub fn new(
        resolver: ExpressionResolver<'a>,
        scope: Option<&'a DirectiveScope>,
        scripts: VecDeque<String>,
    ) -> Self {
        Self {
            resolver,
            scope,
            scripts,
            root: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn resolver(&self) -> &ExpressionResolver<'a> {
        &self.resolver
    }

    /// Append a node to the innermost open block
    pub fn emit(&mut self, node: Node) {
        match self.frames.last_mut() {
            Some(frame) => frame.body.push(node),
            None => self.root.push(node),
        }
    }

    /// Close the pass; every block must have been terminated
    pub fn finish(self) -> Result<Vec<Node>, CompileError> {
        if let Some(frame) = self.frames.last() {
            let opener = frame.opener.clone();
            let closer = frame.block.closer().to_string();
            return Err(CompileError::unbalanced(
                frame.span.clone(),
                opener.clone(),
                format!("@{} is never closed; expected @{}", opener, closer),
            ));
        }
        Ok(self.root)
    }

    pub fn compile(
        &mut self,
        name: &str,
        args: Option<&str>,
        span: Span,
    ) -> Result<(), CompileError> {
        trace!(directive = name, "compiling directive");
        let tag = Tag { name, args, span };

        match name {
            "if" => {
                let cond = self.condition(&tag, "@if(condition)")?;
                self.open_conditional(&tag, "endif", cond, false);
                Ok(())
            }
            "elseif" => {
                let cond = self.condition(&tag, "@elseif(condition)")?;
                self.continue_conditional(&tag, cond)
            }
            "else" => {
                tag.no_args()?;
                self.else_branch(&tag)
            }
            "endif" | "endisset" | "endempty" => {
                tag.no_args()?;
                self.close_conditional(&tag)
            }
            "isset" => {
                let arg = tag.required("@isset(expression)")?;
                let expr = self.expr(&tag, arg)?;
                self.open_conditional(&tag, "endisset", Expr::Isset(Box::new(expr)), false);
                Ok(())
            }
            "empty" => match tag.args {
                None => self.empty_separator(&tag),
                Some(_) => {
                    let arg = tag.required("@empty(expression)")?;
                    let expr = self.expr(&tag, arg)?;
                    self.open_conditional(&tag, "endempty", Expr::Empty(Box::new(expr)), false);
                    Ok(())
                }
            },
            "ifempty" => {
                tag.no_args()?;
                self.empty_separator(&tag)
            }
            "foreach" => self.open_foreach(&tag),
            "endforeach" => {
                tag.no_args()?;
                self.close_foreach(&tag)
            }
            "forelse" => self.open_forelse(&tag),
            "endforelse" => {
                tag.no_args()?;
                self.close_forelse(&tag)
            }
            "for" => self.open_for(&tag),
            "endfor" => {
                tag.no_args()?;
                let (block, body) = self.close(&tag)?;
                if let Block::For { var, start, end } = block {
                    self.resolver.pop_scope();
                    self.emit(Node::For {
                        var,
                        start,
                        end,
                        body,
                    });
                }
                Ok(())
            }
            "while" => {
                let cond = self.condition(&tag, "@while(condition)")?;
                self.open(&tag, Block::While { cond });
                Ok(())
            }
            "endwhile" => {
                tag.no_args()?;
                let (block, body) = self.close(&tag)?;
                if let Block::While { cond } = block {
                    self.emit(Node::While { cond, body });
                }
                Ok(())
            }
            "switch" => {
                let arg = tag.required("@switch(expression)")?;
                let subject = self.expr(&tag, arg)?;
                self.open(
                    &tag,
                    Block::Switch {
                        subject,
                        cases: Vec::new(),
                        default: None,
                        arm: SwitchArm::Preamble,
                    },
                );
                Ok(())
            }
            "case" => {
                let arg = tag.required("@case(value)")?;
                let value = self.expr(&tag, arg)?;
                self.switch_arm(&tag, SwitchArm::Case(value))
            }
            "default" => {
                tag.no_args()?;
                self.switch_arm(&tag, SwitchArm::Default)
            }
            "endswitch" => {
                tag.no_args()?;
                self.close_switch(&tag)
            }
            "break" => {
                tag.no_args()?;
                if !self.frames.iter().any(|f| {
                    f.block.is_loop() || matches!(f.block, Block::Switch { .. })
                }) {
                    return Err(CompileError::unbalanced(
                        tag.span.clone(),
                        "break",
                        "@break outside of a loop or @switch",
                    ));
                }
                self.emit(Node::Break);
                Ok(())
            }
            "continue" => {
                tag.no_args()?;
                if !self.frames.iter().any(|f| f.block.is_loop()) {
                    return Err(CompileError::unbalanced(
                        tag.span.clone(),
                        "continue",
                        "@continue outside of a loop",
                    ));
                }
                self.emit(Node::Continue);
                Ok(())
            }
            "set" => self.set(&tag),
            "include" => {
                let arg = tag.required("@include('template') or @include('template' with data)")?;
                let (template, data) = self.target_with_data(&tag, arg)?;
                self.emit(Node::Include { template, data });
                Ok(())
            }
            "each" => self.each(&tag),
            "extends" => {
                let arg = tag.required("@extends('layout') or @extends('layout' with data)")?;
                let (layout, data) = self.target_with_data(&tag, arg)?;
                self.emit(Node::Extends { layout, data });
                Ok(())
            }
            "section" => self.open_section(&tag),
            "endsection" => {
                tag.no_args()?;
                match self.frames.last() {
                    Some(Frame {
                        block: Block::Section { .. },
                        ..
                    }) => {}
                    _ => {
                        return Err(CompileError::SectionState {
                            span: tag.span.clone(),
                            directive: "endsection".to_string(),
                            message: "no section is open".to_string(),
                        })
                    }
                }
                let (block, body) = self.close(&tag)?;
                if let Block::Section { name } = block {
                    self.emit(Node::Section {
                        name,
                        content: Capture::Block(body),
                    });
                }
                Ok(())
            }
            "yield" => {
                let (name, default) = self.name_with_default(&tag, "@yield('section')")?;
                self.emit(Node::Yield { name, default });
                Ok(())
            }
            "push" => self.open_push(&tag),
            "endpush" => {
                tag.no_args()?;
                match self.frames.last() {
                    Some(Frame {
                        block: Block::Push { .. },
                        ..
                    }) => {}
                    _ => {
                        return Err(CompileError::SectionState {
                            span: tag.span.clone(),
                            directive: "endpush".to_string(),
                            message: "no push region is open".to_string(),
                        })
                    }
                }
                let (block, body) = self.close(&tag)?;
                if let Block::Push { name } = block {
                    self.emit(Node::Push {
                        name,
                        content: Capture::Block(body),
                    });
                }
                Ok(())
            }
            "stack" => {
                let (name, default) = self.name_with_default(&tag, "@stack('name')")?;
                self.emit(Node::Stack { name, default });
                Ok(())
            }
            "javascript" => {
                tag.no_args()?;
                let body = self.scripts.pop_front().ok_or_else(|| {
                    CompileError::directive_syntax(
                        tag.span.clone(),
                        "javascript",
                        "",
                        "a @script ... @endscript block",
                    )
                })?;
                self.emit(Node::Script(body));
                Ok(())
            }
            "script" | "endscript" => Err(CompileError::unbalanced(
                tag.span.clone(),
                name,
                "@script blocks must be closed by @endscript",
            )),
            _ => self.custom(&tag),
        }
    }

    fn expr(&self, tag: &Tag<'_>, text: &str) -> Result<Expr, CompileError> {
        self.resolver
            .resolve_filtered(text)
            .map_err(|e| tag.expr_error(e))
    }

    fn condition(&self, tag: &Tag<'_>, expected: &str) -> Result<Expr, CompileError> {
        let arg = tag.required(expected)?;
        self.resolver
            .resolve_condition(arg)
            .map_err(|e| tag.expr_error(e))
    }

    fn open(&mut self, tag: &Tag<'_>, block: Block) {
        self.frames.push(Frame {
            block,
            opener: tag.name.to_string(),
            span: tag.span.clone(),
            body: Vec::new(),
        });
    }

    /// Pop the innermost frame, which must be closed by this tag
    fn close(&mut self, tag: &Tag<'_>) -> Result<(Block, Vec<Node>), CompileError> {
        let frame = self.frames.pop().ok_or_else(|| {
            CompileError::unbalanced(
                tag.span.clone(),
                tag.name,
                format!("@{} without an open block", tag.name),
            )
        })?;
        if frame.block.closer() != tag.name {
            let message = format!(
                "@{} cannot close @{}; expected @{}",
                tag.name,
                frame.opener,
                frame.block.closer()
            );
            self.frames.push(frame);
            return Err(CompileError::unbalanced(tag.span.clone(), tag.name, message));
        }
        Ok((frame.block, frame.body))
    }

    fn open_conditional(&mut self, tag: &Tag<'_>, closer: &str, cond: Expr, implicit: bool) {
        self.open(
            tag,
            Block::Conditional {
                closer: closer.to_string(),
                branches: Vec::new(),
                cond,
                in_else: false,
                implicit,
            },
        );
    }

    /// The innermost frame, if it is an explicit conditional
    fn conditional_frame(&mut self, tag: &Tag<'_>) -> Result<&mut Frame, CompileError> {
        let problem = match self.frames.last() {
            None => Some(format!("@{} without an open condition", tag.name)),
            Some(frame) => match &frame.block {
                Block::Conditional { implicit: true, .. } => Some(format!(
                    "@{} cannot continue the condition of @foreach ... if",
                    tag.name
                )),
                Block::Conditional { in_else: true, .. } => {
                    Some(format!("@{} after @else", tag.name))
                }
                Block::Conditional { .. } => None,
                _ => Some(format!(
                    "@{} inside @{}; close it first",
                    tag.name, frame.opener
                )),
            },
        };
        if let Some(message) = problem {
            return Err(CompileError::unbalanced(tag.span.clone(), tag.name, message));
        }
        self.frames.last_mut().ok_or_else(|| {
            CompileError::unbalanced(tag.span.clone(), tag.name, "no open condition")
        })
    }

    fn continue_conditional(&mut self, tag: &Tag<'_>, next: Expr) -> Result<(), CompileError> {
        let frame = self.conditional_frame(tag)?;
        let body = mem::take(&mut frame.body);
        if let Block::Conditional { branches, cond, .. } = &mut frame.block {
            let current = mem::replace(cond, next);
            branches.push(Branch {
                cond: current,
                body,
            });
        }
        Ok(())
    }

    fn else_branch(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        let frame = self.conditional_frame(tag)?;
        let body = mem::take(&mut frame.body);
        if let Block::Conditional {
            branches,
            cond,
            in_else,
            ..
        } = &mut frame.block
        {
            branches.push(Branch {
                cond: cond.clone(),
                body,
            });
            *in_else = true;
        }
        Ok(())
    }

    fn close_conditional(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        if let Some(Frame {
            block: Block::Conditional { implicit: true, .. },
            ..
        }) = self.frames.last()
        {
            return Err(CompileError::unbalanced(
                tag.span.clone(),
                tag.name,
                format!("@{} cannot close the condition of @foreach ... if", tag.name),
            ));
        }
        let (block, body) = self.close(tag)?;
        self.emit_conditional(block, body);
        Ok(())
    }

    fn emit_conditional(&mut self, block: Block, body: Vec<Node>) {
        if let Block::Conditional {
            mut branches,
            cond,
            in_else,
            ..
        } = block
        {
            let otherwise = if in_else {
                Some(body)
            } else {
                branches.push(Branch { cond, body });
                None
            };
            self.emit(Node::If {
                branches,
                otherwise,
            });
        }
    }

    /// Parse `collection as binding`, declaring the loop variables in a new scope
    fn loop_header<'t>(
        &mut self,
        tag: &Tag<'t>,
        expected: &str,
    ) -> Result<(Expr, Option<String>, String, Option<&'t str>), CompileError> {
        let args = tag.required(expected)?;
        let malformed = || {
            CompileError::directive_syntax(tag.span.clone(), tag.name, args, expected)
        };
        let (collection_text, rest) = split_once_top_level(args, " as ").ok_or_else(malformed)?;
        let (binding_text, filter) = match split_once_top_level(rest, " if ") {
            Some((binding, cond)) => (binding, Some(cond)),
            None => (rest, None),
        };
        let binding = parse_binding(binding_text).ok_or_else(malformed)?;

        let collection = self.expr(tag, collection_text)?;
        let element = self.resolver.shape_of_expr(&collection).element();
        self.resolver.push_scope();
        if let Some(key) = &binding.key {
            self.resolver.declare(key.clone(), Shape::Scalar);
        }
        self.resolver.declare(binding.item.clone(), element);
        Ok((collection, binding.key, binding.item, filter))
    }

    fn open_foreach(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        const EXPECTED: &str = "@foreach(collection as item) or @foreach(collection as key => item if condition)";
        let (collection, key, item, filter) = self.loop_header(tag, EXPECTED)?;
        let cond = match filter {
            Some(text) => Some(
                self.resolver
                    .resolve_condition(text)
                    .map_err(|e| tag.expr_error(e))?,
            ),
            None => None,
        };
        self.open(
            tag,
            Block::Foreach {
                collection,
                key,
                item,
            },
        );
        if let Some(cond) = cond {
            self.open_conditional(tag, "endforeach", cond, true);
        }
        Ok(())
    }

    fn close_foreach(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        if let Some(Frame {
            block: Block::Conditional { implicit: true, .. },
            ..
        }) = self.frames.last()
        {
            let (block, body) = self.close(tag)?;
            self.emit_conditional(block, body);
        }
        let (block, body) = self.close(tag)?;
        if let Block::Foreach {
            collection,
            key,
            item,
        } = block
        {
            self.resolver.pop_scope();
            self.emit(Node::Foreach(Loop {
                collection,
                key,
                item,
                body,
            }));
        }
        Ok(())
    }

    fn open_forelse(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        const EXPECTED: &str = "@forelse(collection as item) or @forelse(collection as key => item)";
        let (collection, key, item, filter) = self.loop_header(tag, EXPECTED)?;
        if filter.is_some() {
            self.resolver.pop_scope();
            return Err(CompileError::directive_syntax(
                tag.span.clone(),
                tag.name,
                tag.args.unwrap_or_default(),
                EXPECTED,
            ));
        }
        self.open(
            tag,
            Block::Forelse {
                collection,
                key,
                item,
                loop_body: None,
            },
        );
        Ok(())
    }

    fn empty_separator(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        match self.frames.last_mut() {
            Some(Frame {
                block: Block::Forelse { loop_body, .. },
                body,
                ..
            }) if loop_body.is_none() => {
                *loop_body = Some(mem::take(body));
                // Loop variables are not visible in the empty branch
                self.resolver.pop_scope();
                Ok(())
            }
            _ => Err(CompileError::unbalanced(
                tag.span.clone(),
                tag.name,
                format!("@{} without arguments must separate the branches of @forelse", tag.name),
            )),
        }
    }

    fn close_forelse(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        let (block, body) = self.close(tag)?;
        if let Block::Forelse {
            collection,
            key,
            item,
            loop_body,
        } = block
        {
            let (loop_body, empty) = match loop_body {
                Some(loop_body) => (loop_body, body),
                None => {
                    self.resolver.pop_scope();
                    (body, Vec::new())
                }
            };
            self.emit(Node::Forelse {
                each: Loop {
                    collection,
                    key,
                    item,
                    body: loop_body,
                },
                empty,
            });
        }
        Ok(())
    }

    fn open_for(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        const EXPECTED: &str = "@for(i in start count end)";
        let args = tag.required(EXPECTED)?;
        let header = parse_count_header(args).ok_or_else(|| {
            CompileError::directive_syntax(tag.span.clone(), tag.name, args, EXPECTED)
        })?;
        let start = self.expr(tag, &header.start)?;
        let end = self.expr(tag, &header.end)?;
        self.resolver.push_scope();
        self.resolver.declare(header.var.clone(), Shape::Scalar);
        self.open(
            tag,
            Block::For {
                var: header.var,
                start,
                end,
            },
        );
        Ok(())
    }

    fn switch_arm(&mut self, tag: &Tag<'_>, next: SwitchArm) -> Result<(), CompileError> {
        let span = tag.span.clone();
        let frame = match self.frames.last_mut() {
            Some(frame) if matches!(frame.block, Block::Switch { .. }) => frame,
            _ => {
                return Err(CompileError::unbalanced(
                    span,
                    tag.name,
                    format!("@{} outside of @switch", tag.name),
                ))
            }
        };
        if let Block::Switch {
            default: Some(_), ..
        } = &frame.block
        {
            if matches!(next, SwitchArm::Default) {
                return Err(CompileError::directive_syntax(
                    span,
                    tag.name,
                    "",
                    "a single @default per @switch",
                ));
            }
        }
        finish_arm(frame, &span)?;
        if let Block::Switch { arm, .. } = &mut frame.block {
            *arm = next;
        }
        Ok(())
    }

    fn close_switch(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        if let Some(frame) = self.frames.last_mut() {
            if matches!(frame.block, Block::Switch { .. }) {
                finish_arm(frame, &tag.span)?;
            }
        }
        let (block, _) = self.close(tag)?;
        if let Block::Switch {
            subject,
            cases,
            default,
            ..
        } = block
        {
            self.emit(Node::Switch {
                subject,
                cases,
                default,
            });
        }
        Ok(())
    }

    fn set(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        const EXPECTED: &str = "@set(name = expression)";
        let args = tag.required(EXPECTED)?;
        let (name, value_text) = parse_assignment(args).ok_or_else(|| {
            CompileError::directive_syntax(tag.span.clone(), tag.name, args, EXPECTED)
        })?;
        let value = self.expr(tag, &value_text)?;
        let shape = self.resolver.shape_of_expr(&value);
        self.resolver.declare_global(name.clone(), shape);
        self.emit(Node::Set { name, value });
        Ok(())
    }

    /// `target`, `target, data` or `target with data`
    fn target_with_data(
        &self,
        tag: &Tag<'_>,
        args: &str,
    ) -> Result<(Expr, Option<Expr>), CompileError> {
        if let Some((target, data)) = split_once_top_level(args, " with ") {
            return Ok((self.expr(tag, target)?, Some(self.expr(tag, data)?)));
        }
        match split_args(args).as_slice() {
            [target] => Ok((self.expr(tag, target)?, None)),
            [target, data] => Ok((self.expr(tag, target)?, Some(self.expr(tag, data)?))),
            _ => Err(CompileError::directive_syntax(
                tag.span.clone(),
                tag.name,
                args,
                format!("@{}(name) or @{}(name with data)", tag.name, tag.name),
            )),
        }
    }

    fn name_with_default(
        &self,
        tag: &Tag<'_>,
        expected: &str,
    ) -> Result<(Expr, Option<Expr>), CompileError> {
        let args = tag.required(expected)?;
        match split_args(args).as_slice() {
            [name] => Ok((self.expr(tag, name)?, None)),
            [name, default] => Ok((self.expr(tag, name)?, Some(self.expr(tag, default)?))),
            _ => Err(CompileError::directive_syntax(
                tag.span.clone(),
                tag.name,
                args,
                expected,
            )),
        }
    }

    fn each(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        const EXPECTED: &str = "@each('template', items, 'item') or @each('template', items, 'item', 'raw|text' or 'fallback')";
        let args = tag.required(EXPECTED)?;
        let parts = split_args(args);
        let malformed =
            || CompileError::directive_syntax(tag.span.clone(), tag.name, args, EXPECTED);
        if !(3..=4).contains(&parts.len()) {
            return Err(malformed());
        }

        let template = self.expr(tag, parts[0])?;
        let items = self.expr(tag, parts[1])?;
        let item = match quoted(parts[2]) {
            Some((_, name)) if is_identifier(name) => name.to_string(),
            None if is_identifier(parts[2]) => parts[2].to_string(),
            _ => return Err(malformed()),
        };
        let empty = match parts.get(3) {
            None => None,
            Some(fallback) => match quoted(fallback) {
                Some((_, body)) if body.starts_with(RAW_FALLBACK_PREFIX) => Some(
                    EachFallback::Text(body[RAW_FALLBACK_PREFIX.len()..].to_string()),
                ),
                _ => Some(EachFallback::Template(self.expr(tag, fallback)?)),
            },
        };

        self.emit(Node::Each {
            template,
            items,
            item,
            empty,
        });
        Ok(())
    }

    /// `name` opens a block; `name, content` or `name with content` is inline
    fn capture_header(
        &self,
        tag: &Tag<'_>,
        expected: &str,
    ) -> Result<(Expr, Option<Expr>), CompileError> {
        let args = tag.required(expected)?;
        if let Some((name, content)) = split_once_top_level(args, " with ") {
            return Ok((self.expr(tag, name)?, Some(self.expr(tag, content)?)));
        }
        let parts = split_top_level(args, &[","]);
        match parts.as_slice() {
            [name] => Ok((self.expr(tag, name)?, None)),
            [name, content] => Ok((self.expr(tag, name)?, Some(self.expr(tag, content)?))),
            _ => Err(CompileError::directive_syntax(
                tag.span.clone(),
                tag.name,
                args,
                expected,
            )),
        }
    }

    fn open_section(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        let (name, content) =
            self.capture_header(tag, "@section('name') or @section('name', content)")?;
        if let Some(open) = self
            .frames
            .iter()
            .find(|f| matches!(f.block, Block::Section { .. }))
        {
            return Err(CompileError::SectionState {
                span: tag.span.clone(),
                directive: "section".to_string(),
                message: format!(
                    "a section is already open since byte {}; close it with @endsection first",
                    open.span.start
                ),
            });
        }
        match content {
            Some(content) => self.emit(Node::Section {
                name,
                content: Capture::Inline(content),
            }),
            None => self.open(tag, Block::Section { name }),
        }
        Ok(())
    }

    fn open_push(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        let (name, content) = self.capture_header(tag, "@push('stack') or @push('stack', content)")?;
        match content {
            Some(content) => self.emit(Node::Push {
                name,
                content: Capture::Inline(content),
            }),
            None => self.open(tag, Block::Push { name }),
        }
        Ok(())
    }

    /// Custom conditions and custom directives
    fn custom(&mut self, tag: &Tag<'_>) -> Result<(), CompileError> {
        let registry = self.resolver.registry();
        let name = tag.name;

        if registry.condition(name).is_some() {
            let cond = self.condition_call(tag, name)?;
            self.open_conditional(tag, &format!("end{}", name), cond, false);
            return Ok(());
        }
        if let Some(base) = name.strip_prefix("else") {
            if registry.condition(base).is_some() {
                let cond = self.condition_call(tag, base)?;
                return self.continue_conditional(tag, cond);
            }
        }
        if let Some(base) = name.strip_prefix("end") {
            if registry.condition(base).is_some() {
                tag.no_args()?;
                return self.close_conditional(tag);
            }
        }

        let in_scope = self.scope.is_some_and(|scope| scope.contains(name));
        if in_scope || registry.directive(name).is_some() {
            let args = match tag.args {
                Some(args) => self
                    .resolver
                    .resolve_args(args)
                    .map_err(|e| tag.expr_error(e))?,
                None => Vec::new(),
            };
            self.emit(Node::Custom {
                name: name.to_string(),
                args,
            });
            return Ok(());
        }

        Err(CompileError::UnknownDirective {
            span: tag.span.clone(),
            name: name.to_string(),
        })
    }

    fn condition_call(&self, tag: &Tag<'_>, condition: &str) -> Result<Expr, CompileError> {
        let args = match tag.args {
            Some(args) => self
                .resolver
                .resolve_args(args)
                .map_err(|e| tag.expr_error(e))?,
            None => Vec::new(),
        };
        Ok(Expr::Condition {
            name: condition.to_string(),
            args,
        })
    }
}

/// Store the nodes collected for the current switch arm
fn finish_arm(frame: &mut Frame, span: &Span) -> Result<(), CompileError> {
    let body = mem::take(&mut frame.body);
    if let Block::Switch {
        cases,
        default,
        arm,
        ..
    } = &mut frame.block
    {
        match mem::replace(arm, SwitchArm::Preamble) {
            SwitchArm::Preamble => {
                let stray = body
                    .iter()
                    .any(|node| !matches!(node, Node::Text(t) if t.trim().is_empty()));
                if stray {
                    return Err(CompileError::directive_syntax(
                        span.clone(),
                        "switch",
                        "",
                        "only whitespace between @switch and the first @case",
                    ));
                }
            }
            SwitchArm::Case(value) => cases.push(Case { value, body }),
            SwitchArm::Default => *default = Some(body),
        }
    }
    Ok(())
}

/// A directive occurrence being compiled
struct Tag<'t> {
    name: &'t str,
    args: Option<&'t str>,
    span: Span,
}

impl<'t> Tag<'t> {
    fn required(&self, expected: &str) -> Result<&'t str, CompileError> {
        match self.args {
            Some(args) if !args.trim().is_empty() => Ok(args.trim()),
            _ => Err(CompileError::directive_syntax(
                self.span.clone(),
                self.name,
                self.args.unwrap_or_default(),
                expected,
            )),
        }
    }

    fn no_args(&self) -> Result<(), CompileError> {
        match self.args {
            None => Ok(()),
            Some(args) => Err(CompileError::directive_syntax(
                self.span.clone(),
                self.name,
                args,
                format!("@{} without arguments", self.name),
            )),
        }
    }

    fn expr_error(&self, err: ExprError) -> CompileError {
        err.at(self.span.clone(), format!("@{}", self.name))
    }
}
