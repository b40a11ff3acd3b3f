//! Interpreter for compiled templates
//!
//! Walks the node tree of a [`Template`], reading variables from a
//! [`Scope`] and writing to the current sink of a [`RenderState`].

use tracing::{trace, warn};

use super::config::EngineConfig;
use super::error::RenderError;
use super::scope::Scope;
use super::state::RenderState;
use crate::functions::{DirectiveScope, FunctionRegistry, Kind};
use crate::parser::ast::{
    Capture, CompareOp, EachFallback, Expr, Literal, Loop, Node, Segment, Template,
};
use crate::value::{escape_html, Context, FieldReadable, Value};

/// Supplies compiled sub-templates to `@include`, `@each` and layouts
pub trait TemplateLoader {
    /// Compiled form of `id`; `data` is what the template will see
    fn load(&self, id: &str, data: &Context) -> Result<Template, RenderError>;
}

/// How a block finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Evaluator<'r> {
    registry: &'r FunctionRegistry,
    directives: Option<&'r DirectiveScope>,
    loader: &'r dyn TemplateLoader,
    config: &'r EngineConfig,
    state: &'r mut RenderState,
    depth: usize,
}

impl<'r> Evaluator<'r> {
    pub fn new(
        registry: &'r FunctionRegistry,
        directives: Option<&'r DirectiveScope>,
        loader: &'r dyn TemplateLoader,
        config: &'r EngineConfig,
        state: &'r mut RenderState,
    ) -> Self {
        Self {
            registry,
            directives,
            loader,
            config,
            state,
            depth: 0,
        }
    }

    /// Run `template` as one document and return what it wrote
    pub fn render_document(
        &mut self,
        template: &Template,
        scope: &mut Scope,
    ) -> Result<String, RenderError> {
        self.state.begin_document();
        self.block(&template.body, scope)?;
        self.state.finish_document()
    }

    fn block(&mut self, nodes: &[Node], scope: &mut Scope) -> Result<Flow, RenderError> {
        for node in nodes {
            let flow = self.node(node, scope)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn node(&mut self, node: &Node, scope: &mut Scope) -> Result<Flow, RenderError> {
        match node {
            Node::Text(text) => self.state.write(text),
            Node::Print { expr, escape } => {
                let text = self.display(expr, scope, "{{ }}")?;
                if *escape {
                    self.state.write(&escape_html(&text));
                } else {
                    self.state.write(&text);
                }
            }
            Node::If {
                branches,
                otherwise,
            } => {
                for branch in branches {
                    if self.eval(&branch.cond, scope)?.is_truthy() {
                        return self.block(&branch.body, scope);
                    }
                }
                if let Some(body) = otherwise {
                    return self.block(body, scope);
                }
            }
            Node::Foreach(each) => {
                let entries = self.entries(&each.collection, scope, "@foreach")?;
                self.iterate(each, entries, scope)?;
            }
            Node::Forelse { each, empty } => {
                let entries = self.entries(&each.collection, scope, "@forelse")?;
                if entries.is_empty() {
                    return self.block(empty, scope);
                }
                self.iterate(each, entries, scope)?;
            }
            Node::For {
                var,
                start,
                end,
                body,
            } => {
                let start = self.bound(start, scope)?;
                let end = self.bound(end, scope)?;
                for i in start..end {
                    scope.push();
                    scope.bind(var.clone(), Value::Int(i));
                    let flow = self.block(body, scope);
                    scope.pop();
                    if flow? == Flow::Break {
                        break;
                    }
                }
            }
            Node::While { cond, body } => {
                let mut iterations = 0;
                while self.eval(cond, scope)?.is_truthy() {
                    iterations += 1;
                    if iterations > self.config.max_loop_iterations {
                        return Err(RenderError::LoopLimit {
                            limit: self.config.max_loop_iterations,
                        });
                    }
                    if self.block(body, scope)? == Flow::Break {
                        break;
                    }
                }
            }
            Node::Switch {
                subject,
                cases,
                default,
            } => {
                let subject = self.eval(subject, scope)?;
                let mut chosen = default.as_deref();
                for case in cases {
                    if self.eval(&case.value, scope)?.loose_eq(&subject) {
                        chosen = Some(case.body.as_slice());
                        break;
                    }
                }
                if let Some(body) = chosen {
                    if self.block(body, scope)? == Flow::Continue {
                        return Ok(Flow::Continue);
                    }
                }
            }
            Node::Set { name, value } => {
                let value = self.eval(value, scope)?;
                scope.set(name, value);
            }
            Node::Include { template, data } => {
                let id = self.template_name(template, scope, "@include")?;
                let extra = self.data(data.as_ref(), scope, "@include")?;
                self.include(&id, extra, scope)?;
            }
            Node::Each {
                template,
                items,
                item,
                empty,
            } => {
                let id = self.template_name(template, scope, "@each")?;
                let entries = self.entries(items, scope, "@each")?;
                if entries.is_empty() {
                    match empty {
                        Some(EachFallback::Text(text)) => self.state.write(text),
                        Some(EachFallback::Template(fallback)) => {
                            let fallback = self.template_name(fallback, scope, "@each")?;
                            self.include(&fallback, Context::new(), scope)?;
                        }
                        None => {}
                    }
                }
                for (_, value) in entries {
                    let mut extra = Context::new();
                    extra.insert(item.clone(), value);
                    self.include(&id, extra, scope)?;
                }
            }
            Node::Extends { layout, data } => {
                let id = self.template_name(layout, scope, "@extends")?;
                let data = self.data(data.as_ref(), scope, "@extends")?;
                trace!(layout = %id, "layout requested");
                self.state.set_layout(id, data);
            }
            Node::Section { name, content } => {
                let name = self.display(name, scope, "@section")?;
                match content {
                    Capture::Inline(expr) => {
                        let text = self.display(expr, scope, "@section")?;
                        self.state.define_section(&name, text)?;
                    }
                    Capture::Block(body) => {
                        self.state.open_section(&name)?;
                        let flow = self.block(body, scope)?;
                        self.state.close_section()?;
                        return Ok(flow);
                    }
                }
            }
            Node::Yield { name, default } => {
                let name = self.display(name, scope, "@yield")?;
                let text = match self.state.section(&name) {
                    Some(content) => content.to_string(),
                    None => match default {
                        Some(default) => self.display(default, scope, "@yield")?,
                        None => {
                            warn!(section = %name, "yield of a section that was never defined");
                            self.config.section_fallback.clone()
                        }
                    },
                };
                self.state.write(&text);
            }
            Node::Push { name, content } => {
                let name = self.display(name, scope, "@push")?;
                match content {
                    Capture::Inline(expr) => {
                        let text = self.display(expr, scope, "@push")?;
                        self.state.push_content(&name, text);
                    }
                    Capture::Block(body) => {
                        self.state.open_push(&name);
                        let flow = self.block(body, scope)?;
                        self.state.close_push()?;
                        return Ok(flow);
                    }
                }
            }
            Node::Stack { name, default } => {
                let name = self.display(name, scope, "@stack")?;
                let text = match (self.state.stack(&name), default) {
                    (Some(content), _) => content,
                    (None, Some(default)) => self.display(default, scope, "@stack")?,
                    (None, None) => String::new(),
                };
                self.state.write(&text);
            }
            Node::Script(body) => {
                self.state.write("<script>\n");
                self.state.write(body);
                self.state.write("\n</script>");
            }
            Node::Custom { name, args } => {
                let text = self.custom_directive(name, args, scope)?;
                self.state.write(&text);
            }
            Node::Break => return Ok(Flow::Break),
            Node::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn iterate(
        &mut self,
        each: &Loop,
        entries: Vec<(Value, Value)>,
        scope: &mut Scope,
    ) -> Result<(), RenderError> {
        for (key, item) in entries {
            scope.push();
            if let Some(key_name) = &each.key {
                scope.bind(key_name.clone(), key);
            }
            scope.bind(each.item.clone(), item);
            let flow = self.block(&each.body, scope);
            scope.pop();
            if flow? == Flow::Break {
                break;
            }
        }
        Ok(())
    }

    fn include(&mut self, id: &str, extra: Context, scope: &Scope) -> Result<(), RenderError> {
        let limit = self.config.max_include_depth;
        if self.depth >= limit {
            return Err(RenderError::IncludeDepth {
                template: id.to_string(),
                limit,
            });
        }
        let mut data = scope.visible();
        data.extend(extra);
        let template = self.loader.load(id, &data)?;
        trace!(template = id, depth = self.depth + 1, "include");

        let mut inner = Scope::new(data);
        self.depth += 1;
        let result = self.block(&template.body, &mut inner);
        self.depth -= 1;
        result.map(|_| ())
    }

    fn custom_directive(
        &self,
        name: &str,
        args: &[Expr],
        scope: &Scope,
    ) -> Result<String, RenderError> {
        let values = self.eval_all(args, scope)?;
        let result = match self.directives.and_then(|d| d.get(name)) {
            Some(callable) => callable
                .call(&values)
                .map_err(|source| RenderError::Call {
                    kind: Kind::Directive,
                    name: name.to_string(),
                    source,
                })?,
            None => self.registry.resolve_directive(name, &values)?,
        };
        result.to_display().ok_or_else(|| {
            RenderError::type_error(format!("@{}", name), "printable value", result.kind())
        })
    }

    /// Key/value pairs of an iterable; `null` iterates as empty
    fn entries(
        &self,
        expr: &Expr,
        scope: &Scope,
        context: &str,
    ) -> Result<Vec<(Value, Value)>, RenderError> {
        match self.eval(expr, scope)? {
            Value::List(items) => Ok(items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), v))
                .collect()),
            Value::Map(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (Value::String(k), v))
                .collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(RenderError::type_error(
                context,
                "list or map",
                other.kind(),
            )),
        }
    }

    /// A `@for` bound: an integer, or the length of a collection
    fn bound(&self, expr: &Expr, scope: &Scope) -> Result<i64, RenderError> {
        let value = self.eval(expr, scope)?;
        let bound = match &value {
            Value::List(_) | Value::Map(_) => value.len().map(|n| n as i64),
            other => other.as_i64(),
        };
        bound.ok_or_else(|| RenderError::type_error("@for", "integer or collection", value.kind()))
    }

    fn template_name(
        &self,
        expr: &Expr,
        scope: &Scope,
        context: &str,
    ) -> Result<String, RenderError> {
        match self.eval(expr, scope)? {
            Value::String(name) => Ok(name),
            other => Err(RenderError::type_error(
                context,
                "template name",
                other.kind(),
            )),
        }
    }

    fn data(
        &self,
        expr: Option<&Expr>,
        scope: &Scope,
        context: &str,
    ) -> Result<Context, RenderError> {
        let Some(expr) = expr else {
            return Ok(Context::new());
        };
        match self.eval(expr, scope)? {
            Value::Map(map) => Ok(map),
            Value::Null => Ok(Context::new()),
            other => Err(RenderError::type_error(context, "map", other.kind())),
        }
    }

    fn display(&self, expr: &Expr, scope: &Scope, context: &str) -> Result<String, RenderError> {
        let value = self.eval(expr, scope)?;
        value
            .to_display()
            .ok_or_else(|| RenderError::type_error(context, "printable value", value.kind()))
    }

    fn eval_all(&self, exprs: &[Expr], scope: &Scope) -> Result<Vec<Value>, RenderError> {
        exprs.iter().map(|e| self.eval(e, scope)).collect()
    }

    pub fn eval(&self, expr: &Expr, scope: &Scope) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
            Expr::Literal(Literal::Null) => Ok(Value::Null),
            Expr::Number(text) => number(text),
            Expr::Str { value, .. } => Ok(Value::String(value.clone())),
            Expr::Array(items) => self.eval_all(items, scope).map(Value::List),
            Expr::Path { root, segments } => self.path(root, segments, scope),
            Expr::Filter { inner, name, args } => {
                let mut values = Vec::with_capacity(args.len() + 1);
                values.push(self.eval(inner, scope)?);
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                Ok(self.registry.resolve_filter(name, &values)?)
            }
            Expr::Call { name, args } => {
                let values = self.eval_all(args, scope)?;
                Ok(self.registry.resolve_function(name, &values)?)
            }
            Expr::Compare { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(Value::Bool(compare(*op, &left, &right)))
            }
            Expr::And(a, b) => Ok(Value::Bool(
                self.eval(a, scope)?.is_truthy() && self.eval(b, scope)?.is_truthy(),
            )),
            Expr::Or(a, b) => Ok(Value::Bool(
                self.eval(a, scope)?.is_truthy() || self.eval(b, scope)?.is_truthy(),
            )),
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner, scope)?.is_truthy())),
            Expr::Isset(inner) => Ok(Value::Bool(!self.lenient(inner, scope)?.is_null())),
            Expr::Empty(inner) => Ok(Value::Bool(!self.lenient(inner, scope)?.is_truthy())),
            Expr::Condition { name, args } => {
                let values = self.eval_all(args, scope)?;
                Ok(Value::Bool(self.registry.check_condition(name, &values)?))
            }
        }
    }

    /// Evaluate for `isset`/`empty`: missing variables and members read as null
    fn lenient(&self, expr: &Expr, scope: &Scope) -> Result<Value, RenderError> {
        match self.eval(expr, scope) {
            Err(RenderError::UndefinedVariable { .. } | RenderError::InaccessibleMember { .. }) => {
                Ok(Value::Null)
            }
            other => other,
        }
    }

    fn path(&self, root: &str, segments: &[Segment], scope: &Scope) -> Result<Value, RenderError> {
        let mut value = scope
            .get(root)
            .cloned()
            .ok_or_else(|| RenderError::UndefinedVariable {
                name: root.to_string(),
            })?;
        let inaccessible = |member: &str| RenderError::InaccessibleMember {
            member: member.to_string(),
            root: root.to_string(),
        };

        for segment in segments {
            value = match segment {
                Segment::Key(key) => read_member(&value, key)?.unwrap_or_default(),
                Segment::Index(index) => {
                    let key = match self.eval(index, scope)? {
                        Value::Int(i) => i.to_string(),
                        Value::String(s) => s,
                        other => {
                            return Err(RenderError::type_error(
                                format!("index into `{}`", root),
                                "integer or string",
                                other.kind(),
                            ))
                        }
                    };
                    read_member(&value, &key)?.unwrap_or_default()
                }
                Segment::Member(name) | Segment::Dynamic(name) => {
                    read_member(&value, name)?.ok_or_else(|| inaccessible(name))?
                }
                Segment::Call { name, args } => {
                    let values = self.eval_all(args, scope)?;
                    let Value::Object(obj) = &value else {
                        return Err(inaccessible(name));
                    };
                    match obj.call(name, &values) {
                        Some(result) => result.map_err(|source| RenderError::Call {
                            kind: Kind::Function,
                            name: format!("{}.{}", obj.type_name(), name),
                            source,
                        })?,
                        None => return Err(inaccessible(name)),
                    }
                }
            };
        }
        Ok(value)
    }
}

/// Member read that reports a failing method or getter as a call error
fn read_member(value: &Value, name: &str) -> Result<Option<Value>, RenderError> {
    value.try_read(name).map_err(|source| RenderError::Call {
        kind: Kind::Function,
        name: match value {
            Value::Object(obj) => format!("{}.{}", obj.type_name(), name),
            other => format!("{}.{}", other.kind(), name),
        },
        source,
    })
}

fn number(text: &str) -> Result<Value, RenderError> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| RenderError::type_error("number literal", "number", text))
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CompareOp::Identical => left.strict_eq(right),
        CompareOp::NotIdentical => !left.strict_eq(right),
        CompareOp::Eq => left.loose_eq(right),
        CompareOp::NotEq => !left.loose_eq(right),
        CompareOp::Ge => matches!(left.compare(right), Some(Greater | Equal)),
        CompareOp::Le => matches!(left.compare(right), Some(Less | Equal)),
        CompareOp::Gt => matches!(left.compare(right), Some(Greater)),
        CompareOp::Lt => matches!(left.compare(right), Some(Less)),
    }
}
