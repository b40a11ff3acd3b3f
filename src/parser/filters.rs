//! Filter chains
//!
//! `x|f|g(a)` resolves `x`, then wraps it in `f`, then wraps that in `g`
//! with the extra argument `a`. The chain reads left to right and nests
//! inside out: the result is `g(f(x), a)`.

use crate::error::ExprError;
use crate::parser::ast::Expr;
use crate::parser::expression::ExpressionResolver;
use crate::parser::split::{is_identifier, split_args, split_call, split_filters};

/// One `name` or `name(args)` element of a chain
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec<'t> {
    pub name: &'t str,
    pub args: Option<&'t str>,
}

impl<'t> FilterSpec<'t> {
    pub fn parse(text: &'t str) -> Option<Self> {
        if is_identifier(text) {
            return Some(Self {
                name: text,
                args: None,
            });
        }
        split_call(text).map(|(name, args)| Self {
            name,
            args: Some(args),
        })
    }
}

pub struct FilterPipeline<'r, 'a> {
    resolver: &'r ExpressionResolver<'a>,
}

impl<'r, 'a> FilterPipeline<'r, 'a> {
    pub fn new(resolver: &'r ExpressionResolver<'a>) -> Self {
        Self { resolver }
    }

    /// Resolve `base|filter|filter(args)...`
    pub fn resolve(&self, text: &str) -> Result<Expr, ExprError> {
        let mut parts = split_filters(text).into_iter();
        let base = self.resolver.resolve(parts.next().unwrap_or_default())?;

        let chain = parts
            .map(|part| {
                FilterSpec::parse(part).ok_or_else(|| {
                    ExprError::invalid(text, format!("malformed filter `{}`", part))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.apply_filters(base, &chain, text)
    }

    /// Wrap `base` in each filter of `chain`, left to right
    pub fn apply_filters(
        &self,
        base: Expr,
        chain: &[FilterSpec<'_>],
        source: &str,
    ) -> Result<Expr, ExprError> {
        let registry = self.resolver.registry();
        let mut expr = base;

        for spec in chain {
            let callable = registry
                .filter(spec.name)
                .ok_or_else(|| ExprError::UnknownFilter {
                    name: spec.name.to_string(),
                    expr: source.to_string(),
                })?;

            let args = match spec.args {
                Some(args) => split_args(args)
                    .into_iter()
                    .map(|arg| self.resolver.resolve_filtered(arg))
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };

            if let Some(arity) = callable.arity() {
                if !arity.accepts(args.len() + 1) {
                    return Err(ExprError::invalid(
                        source,
                        format!(
                            "filter `{}` takes {} argument(s) including the filtered value, got {}",
                            spec.name,
                            arity,
                            args.len() + 1
                        ),
                    ));
                }
            }

            expr = Expr::Filter {
                inner: Box::new(expr),
                name: spec.name.to_string(),
                args,
            };
        }
        Ok(expr)
    }
}
