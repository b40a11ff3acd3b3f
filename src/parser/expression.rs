//! Expression resolution
//!
//! [`ExpressionResolver`] turns the text of an expression into an [`Expr`].
//! Categories are tried in a fixed order, first match wins: reserved
//! literals, list literals, numbers, indexed names, function calls, dotted
//! paths, quoted strings and finally bare identifiers.
//!
//! Dotted paths are resolved against the shape of their root variable, which
//! comes from the compile context or from a block-local declaration such as a
//! loop variable.

use indexmap::IndexMap;

use crate::error::ExprError;
use crate::functions::FunctionRegistry;
use crate::parser::ast::{CompareOp, Expr, Literal, Segment};
use crate::parser::filters::FilterPipeline;
use crate::parser::headers::is_number;
use crate::parser::split::{
    contains_top_level, is_identifier, is_key, is_wrapped, matching_close, quoted, split_args,
    split_call, split_top_level, unescape,
};
use crate::value::{getter_name, Shape, ShapeLookup};

pub struct ExpressionResolver<'a> {
    registry: &'a FunctionRegistry,
    shapes: &'a dyn ShapeLookup,
    /// Block-local declarations, innermost last
    scopes: Vec<IndexMap<String, Shape>>,
}

impl<'a> ExpressionResolver<'a> {
    pub fn new(registry: &'a FunctionRegistry, shapes: &'a dyn ShapeLookup) -> Self {
        Self {
            registry,
            shapes,
            scopes: vec![IndexMap::new()],
        }
    }

    pub fn registry(&self) -> &'a FunctionRegistry {
        self.registry
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Declare a variable in the innermost scope
    pub fn declare(&mut self, name: impl Into<String>, shape: Shape) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), shape);
        }
    }

    /// Declare a variable for the rest of the template
    pub fn declare_global(&mut self, name: impl Into<String>, shape: Shape) {
        self.scopes[0].insert(name.into(), shape);
    }

    /// Shape of a variable, or `None` when it is not declared anywhere
    pub fn shape_of(&self, name: &str) -> Option<Shape> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
            .or_else(|| self.shapes.shape_of(name))
    }

    /// Best compile-time shape for the value of `expr`
    pub fn shape_of_expr(&self, expr: &Expr) -> Shape {
        match expr {
            Expr::Path { root, segments } => {
                let mut shape = self.shape_of(root).unwrap_or_default();
                for segment in segments {
                    shape = match segment {
                        Segment::Key(key) | Segment::Member(key) => shape.child(key),
                        Segment::Index(Expr::Str { value, .. }) => shape.child(value),
                        Segment::Index(_) => shape.element(),
                        Segment::Call { .. } | Segment::Dynamic(_) => Shape::Unknown,
                    };
                }
                shape
            }
            Expr::Array(_) => Shape::List(None),
            Expr::Str { .. } | Expr::Number(_) | Expr::Literal(_) => Shape::Scalar,
            _ => Shape::Unknown,
        }
    }

    /// Resolve an expression that may carry a filter chain
    pub fn resolve_filtered(&self, text: &str) -> Result<Expr, ExprError> {
        FilterPipeline::new(self).resolve(text)
    }

    /// Resolve each comma-separated argument, filter chains included
    pub fn resolve_args(&self, text: &str) -> Result<Vec<Expr>, ExprError> {
        split_args(text)
            .into_iter()
            .map(|arg| self.resolve_filtered(arg))
            .collect()
    }

    /// Resolve one expression without filters
    pub fn resolve(&self, text: &str) -> Result<Expr, ExprError> {
        let code = text.trim();
        if code.is_empty() {
            return Err(ExprError::invalid(text, "empty expression"));
        }

        match code {
            "true" => return Ok(Expr::Literal(Literal::Bool(true))),
            "false" => return Ok(Expr::Literal(Literal::Bool(false))),
            "null" => return Ok(Expr::Literal(Literal::Null)),
            _ => {}
        }

        if is_wrapped(code, '[', ']') {
            return Ok(Expr::Array(self.resolve_args(&code[1..code.len() - 1])?));
        }

        if is_number(code) {
            return Ok(Expr::Number(code.to_string()));
        }

        if let Some((root, indices)) = split_indexed(code) {
            if !indices.is_empty() && is_identifier(root) {
                let segments = indices
                    .into_iter()
                    .map(|index| self.resolve_filtered(index).map(Segment::Index))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Expr::Path {
                    root: root.to_string(),
                    segments,
                });
            }
        }

        if let Some((name, args)) = split_call(code) {
            if self.registry.function(name).is_none() {
                return Err(ExprError::UnknownFunction {
                    name: name.to_string(),
                    expr: code.to_string(),
                });
            }
            return Ok(Expr::Call {
                name: name.to_string(),
                args: self.resolve_args(args)?,
            });
        }

        if contains_top_level(code, '.') {
            return self.resolve_dotted(code);
        }

        if let Some((quote, body)) = quoted(code) {
            return Ok(Expr::Str {
                value: unescape(body),
                quote,
            });
        }

        if is_identifier(code) {
            return Ok(Expr::var(code));
        }

        Err(ExprError::invalid(code, "unrecognised expression"))
    }

    /// `root.part.part(args)...`
    fn resolve_dotted(&self, code: &str) -> Result<Expr, ExprError> {
        let parts = split_top_level(code, &["."]);
        let (root, root_indices) = split_indexed(parts[0])
            .filter(|(root, _)| is_identifier(root))
            .ok_or_else(|| ExprError::invalid(code, "a path must start with a variable name"))?;

        let mut shape = self
            .shape_of(root)
            .ok_or_else(|| ExprError::UndefinedVariable {
                name: root.to_string(),
                expr: code.to_string(),
            })?;

        let mut segments = Vec::new();
        for index in root_indices {
            let index = self.resolve_filtered(index)?;
            shape = index_shape(&shape, &index);
            segments.push(Segment::Index(index));
        }

        for part in &parts[1..] {
            let inaccessible = || ExprError::InaccessibleMember {
                member: part.to_string(),
                root: root.to_string(),
                expr: code.to_string(),
            };

            if let Some((name, args)) = split_call(part) {
                match &shape {
                    Shape::Object(obj) if !obj.has_method(name) => return Err(inaccessible()),
                    Shape::Object(_) | Shape::Unknown => {}
                    _ => return Err(inaccessible()),
                }
                segments.push(Segment::Call {
                    name: name.to_string(),
                    args: self.resolve_args(args)?,
                });
                shape = Shape::Unknown;
                continue;
            }

            let (name, indices) = split_indexed(part)
                .filter(|(name, _)| is_key(name))
                .ok_or_else(|| {
                    ExprError::invalid(
                        code,
                        format!(
                            "invalid key `{}`: only letters, digits and _ are allowed",
                            part
                        ),
                    )
                })?;

            let (segment, next) = match &shape {
                Shape::Map(_) | Shape::List(_) => (Segment::Key(name.to_string()), shape.child(name)),
                Shape::Object(obj) => {
                    if let Some(value) = obj.field(name) {
                        (Segment::Member(name.to_string()), Shape::of(&value))
                    } else if obj.has_method(name) {
                        (
                            Segment::Call {
                                name: name.to_string(),
                                args: Vec::new(),
                            },
                            Shape::Unknown,
                        )
                    } else if obj.has_method(&getter_name(name)) {
                        (
                            Segment::Call {
                                name: getter_name(name),
                                args: Vec::new(),
                            },
                            Shape::Unknown,
                        )
                    } else {
                        return Err(inaccessible());
                    }
                }
                Shape::Scalar => return Err(inaccessible()),
                Shape::Unknown => (Segment::Dynamic(name.to_string()), Shape::Unknown),
            };
            segments.push(segment);
            shape = next;

            for index in indices {
                let index = self.resolve_filtered(index)?;
                shape = index_shape(&shape, &index);
                segments.push(Segment::Index(index));
            }
        }

        Ok(Expr::Path {
            root: root.to_string(),
            segments,
        })
    }

    /// Resolve a condition: `or`, `and`, `not`, comparisons and tests
    pub fn resolve_condition(&self, text: &str) -> Result<Expr, ExprError> {
        let code = text.trim();
        if code.is_empty() {
            return Err(ExprError::invalid(text, "empty condition"));
        }

        let alternatives = split_top_level(code, &["||", " or "]);
        if alternatives.len() > 1 {
            return self.fold(alternatives, Expr::Or);
        }

        let conjuncts = split_top_level(code, &["&&", " and "]);
        if conjuncts.len() > 1 {
            return self.fold(conjuncts, Expr::And);
        }

        if let Some(rest) = code.strip_prefix("not ") {
            return Ok(Expr::Not(Box::new(self.resolve_condition(rest)?)));
        }
        if let Some(rest) = code.strip_prefix('!').filter(|rest| !rest.starts_with('=')) {
            return Ok(Expr::Not(Box::new(self.resolve_condition(rest)?)));
        }

        if is_wrapped(code, '(', ')') {
            return self.resolve_condition(&code[1..code.len() - 1]);
        }

        if let Some((left, op, right)) = split_comparison(code) {
            return Ok(Expr::Compare {
                op,
                left: Box::new(self.resolve_filtered(left)?),
                right: Box::new(self.resolve_filtered(right)?),
            });
        }

        if let Some((name, args)) = split_call(code) {
            match name {
                "isset" => return Ok(Expr::Isset(Box::new(self.resolve_filtered(args)?))),
                "empty" => return Ok(Expr::Empty(Box::new(self.resolve_filtered(args)?))),
                _ if self.registry.condition(name).is_some() => {
                    return Ok(Expr::Condition {
                        name: name.to_string(),
                        args: self.resolve_args(args)?,
                    })
                }
                _ => {}
            }
        }

        self.resolve_filtered(code)
    }

    fn fold(
        &self,
        parts: Vec<&str>,
        combine: fn(Box<Expr>, Box<Expr>) -> Expr,
    ) -> Result<Expr, ExprError> {
        let mut exprs = parts.into_iter().map(|part| self.resolve_condition(part));
        let first = exprs
            .next()
            .unwrap_or_else(|| Err(ExprError::invalid("", "empty condition")))?;
        exprs.try_fold(first, |acc, next| Ok(combine(Box::new(acc), Box::new(next?))))
    }
}

/// Shape after indexing `shape` with `index`
fn index_shape(shape: &Shape, index: &Expr) -> Shape {
    match index {
        Expr::Str { value, .. } => shape.child(value),
        _ => shape.element(),
    }
}

/// `name[a][b]` into `("name", ["a", "b"])`; `name` alone gives no indices
fn split_indexed(code: &str) -> Option<(&str, Vec<&str>)> {
    let name_end = code.find('[').unwrap_or(code.len());
    let name = &code[..name_end];
    if name.is_empty() || !is_key(name) {
        return None;
    }
    let mut indices = Vec::new();
    let mut pos = name_end;
    while pos < code.len() {
        if !code[pos..].starts_with('[') {
            return None;
        }
        let close = matching_close(code, pos)?;
        indices.push(&code[pos + 1..close]);
        pos = close + 1;
    }
    Some((name, indices))
}

/// First top-level comparison operator, longest spelling first
fn split_comparison(code: &str) -> Option<(&str, CompareOp, &str)> {
    let mut found = None;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in code.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '=' | '!' | '<' | '>' if depth == 0 => {
                if let Some((token, op)) = CompareOp::ALL
                    .iter()
                    .find(|(token, _)| code[i..].starts_with(token))
                {
                    found = Some((code[..i].trim(), *op, code[i + token.len()..].trim()));
                    break;
                }
            }
            _ => {}
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{register_builtins, CallError, Callable};
    use crate::value::{Context, HostObject, Value};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Article;

    impl HostObject for Article {
        fn type_name(&self) -> &str {
            "Article"
        }

        fn field(&self, name: &str) -> Option<Value> {
            (name == "title").then(|| Value::from("Hello"))
        }

        fn has_method(&self, name: &str) -> bool {
            matches!(name, "summary" | "getAuthor" | "format")
        }

        fn call(&self, name: &str, _args: &[Value]) -> Option<Result<Value, CallError>> {
            self.has_method(name).then(|| Ok(Value::from(name)))
        }
    }

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        register_builtins(&mut registry).unwrap();
        registry
    }

    fn context() -> Context {
        let mut ctx = Context::new();
        ctx.insert(
            "user".to_string(),
            crate::value::map_of([("name", "John"), ("email", "j@example.com")]),
        );
        ctx.insert("age".to_string(), Value::Int(30));
        ctx.insert("article".to_string(), Value::Object(Arc::new(Article)));
        ctx.insert(
            "posts".to_string(),
            Value::List(vec![crate::value::map_of([("title", "First")])]),
        );
        ctx
    }

    fn resolve(text: &str) -> Result<Expr, ExprError> {
        let registry = registry();
        let ctx = context();
        let resolver = ExpressionResolver::new(&registry, &ctx);
        resolver.resolve_filtered(text)
    }

    fn path(root: &str, segments: Vec<Segment>) -> Expr {
        Expr::Path {
            root: root.to_string(),
            segments,
        }
    }

    #[test]
    fn test_literals() {
        assert_eq!(resolve("true").unwrap(), Expr::Literal(Literal::Bool(true)));
        assert_eq!(resolve("null").unwrap(), Expr::Literal(Literal::Null));
        assert_eq!(resolve("-4.5").unwrap(), Expr::Number("-4.5".to_string()));
        assert_eq!(
            resolve("\"it's\"").unwrap(),
            Expr::Str {
                value: "it's".to_string(),
                quote: '"'
            }
        );
    }

    #[test]
    fn test_array_literal_splits_at_top_level_only() {
        assert_eq!(
            resolve("[1, [2, 3], 'a,b']").unwrap(),
            Expr::Array(vec![
                Expr::Number("1".to_string()),
                Expr::Array(vec![
                    Expr::Number("2".to_string()),
                    Expr::Number("3".to_string())
                ]),
                Expr::string("a,b"),
            ])
        );
        assert_eq!(resolve("[]").unwrap(), Expr::Array(vec![]));
    }

    #[test]
    fn test_index_access() {
        assert_eq!(
            resolve("items[0]").unwrap(),
            path("items", vec![Segment::Index(Expr::Number("0".to_string()))])
        );
        assert_eq!(
            resolve("grid[row][col]").unwrap(),
            path(
                "grid",
                vec![
                    Segment::Index(Expr::var("row")),
                    Segment::Index(Expr::var("col"))
                ]
            )
        );
    }

    #[test]
    fn test_map_path_uses_keys() {
        assert_eq!(
            resolve("user.name").unwrap(),
            path("user", vec![Segment::Key("name".to_string())])
        );
        assert_eq!(
            resolve("posts.0.title").unwrap(),
            path(
                "posts",
                vec![
                    Segment::Key("0".to_string()),
                    Segment::Key("title".to_string())
                ]
            )
        );
    }

    #[test]
    fn test_object_member_fallback_chain() {
        assert_eq!(
            resolve("article.title").unwrap(),
            path("article", vec![Segment::Member("title".to_string())])
        );
        assert_eq!(
            resolve("article.summary").unwrap(),
            path(
                "article",
                vec![Segment::Call {
                    name: "summary".to_string(),
                    args: vec![]
                }]
            )
        );
        assert_eq!(
            resolve("article.author").unwrap(),
            path(
                "article",
                vec![Segment::Call {
                    name: "getAuthor".to_string(),
                    args: vec![]
                }]
            )
        );
        assert_eq!(
            resolve("article.format('d/m', age)").unwrap(),
            path(
                "article",
                vec![Segment::Call {
                    name: "format".to_string(),
                    args: vec![Expr::string("d/m"), Expr::var("age")]
                }]
            )
        );
    }

    #[test]
    fn test_inaccessible_member() {
        assert_eq!(
            resolve("article.secret").unwrap_err(),
            ExprError::InaccessibleMember {
                member: "secret".to_string(),
                root: "article".to_string(),
                expr: "article.secret".to_string(),
            }
        );
        assert!(matches!(
            resolve("age.value"),
            Err(ExprError::InaccessibleMember { .. })
        ));
    }

    #[test]
    fn test_undefined_root() {
        assert_eq!(
            resolve("missing.name").unwrap_err(),
            ExprError::UndefinedVariable {
                name: "missing".to_string(),
                expr: "missing.name".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_key() {
        assert!(matches!(
            resolve("user.first-name"),
            Err(ExprError::Invalid { .. })
        ));
        assert!(matches!(resolve("a b"), Err(ExprError::Invalid { .. })));
        assert!(matches!(resolve("   "), Err(ExprError::Invalid { .. })));
    }

    #[test]
    fn test_declared_unknown_shape_is_dynamic() {
        let registry = registry();
        let ctx = context();
        let mut resolver = ExpressionResolver::new(&registry, &ctx);
        resolver.push_scope();
        resolver.declare("row", Shape::Unknown);
        assert_eq!(
            resolver.resolve("row.cells").unwrap(),
            path("row", vec![Segment::Dynamic("cells".to_string())])
        );
        resolver.pop_scope();
        assert!(resolver.resolve("row.cells").is_err());
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(
            resolve("max(age, 18)").unwrap(),
            Expr::Call {
                name: "max".to_string(),
                args: vec![Expr::var("age"), Expr::Number("18".to_string())]
            }
        );
        assert!(matches!(
            resolve("nope(1)"),
            Err(ExprError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_conditions() {
        let registry = registry();
        let ctx = context();
        let resolver = ExpressionResolver::new(&registry, &ctx);
        let cond = resolver
            .resolve_condition("age >= 18 and not isset(user.name) or empty(posts)")
            .unwrap();
        assert_eq!(
            cond,
            Expr::Or(
                Box::new(Expr::And(
                    Box::new(Expr::Compare {
                        op: CompareOp::Ge,
                        left: Box::new(Expr::var("age")),
                        right: Box::new(Expr::Number("18".to_string())),
                    }),
                    Box::new(Expr::Not(Box::new(Expr::Isset(Box::new(path(
                        "user",
                        vec![Segment::Key("name".to_string())]
                    )))))),
                )),
                Box::new(Expr::Empty(Box::new(Expr::var("posts")))),
            )
        );
    }

    #[test]
    fn test_comparison_ignores_quoted_operators() {
        let registry = registry();
        let ctx = context();
        let resolver = ExpressionResolver::new(&registry, &ctx);
        assert_eq!(
            resolver.resolve_condition("'a<b' !== user.name").unwrap(),
            Expr::Compare {
                op: CompareOp::NotIdentical,
                left: Box::new(Expr::string("a<b")),
                right: Box::new(path("user", vec![Segment::Key("name".to_string())])),
            }
        );
    }

    #[test]
    fn test_custom_condition_leaf() {
        let mut registry = registry();
        registry
            .register_condition("admin", Callable::callback(|_| Ok(Value::Bool(true))))
            .unwrap();
        let ctx = context();
        let resolver = ExpressionResolver::new(&registry, &ctx);
        assert_eq!(
            resolver.resolve_condition("!admin(user)").unwrap(),
            Expr::Not(Box::new(Expr::Condition {
                name: "admin".to_string(),
                args: vec![Expr::var("user")]
            }))
        );
    }

    #[test]
    fn test_shape_of_expr_follows_segments() {
        let registry = registry();
        let ctx = context();
        let resolver = ExpressionResolver::new(&registry, &ctx);
        let posts = resolver.resolve("posts").unwrap();
        assert!(matches!(resolver.shape_of_expr(&posts).element(), Shape::Map(_)));
    }
}
