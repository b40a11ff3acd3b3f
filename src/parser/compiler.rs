//! Template compiler
//!
//! Drives one pass over a template: the [`TagScanner`] splits the text,
//! interpolations are resolved into `Print` nodes and directives are handed
//! to the [`DirectiveCompiler`].

use tracing::debug;

use crate::error::{normalize_newlines, CompileError};
use crate::functions::{DirectiveScope, FunctionRegistry};
use crate::parser::ast::{Node, Template};
use crate::parser::directives::DirectiveCompiler;
use crate::parser::expression::ExpressionResolver;
use crate::parser::scanner::{Piece, TagScanner};
use crate::value::{NoShapes, ShapeLookup};

pub struct Compiler<'a> {
    registry: &'a FunctionRegistry,
    scope: Option<&'a DirectiveScope>,
    scanner: TagScanner,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a FunctionRegistry) -> Self {
        Self {
            registry,
            scope: None,
            scanner: TagScanner::new(),
        }
    }

    /// Directives visible to this compiler only, on top of the registry's
    pub fn with_scope(mut self, scope: &'a DirectiveScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Compile without knowledge of the render data
    ///
    /// Dotted paths then only resolve against variables the template
    /// declares itself (loop variables, `@set`).
    pub fn compile(&self, text: &str) -> Result<Template, CompileError> {
        self.compile_with(text, &NoShapes)
    }

    /// Compile against the shapes of the data the template will render with
    pub fn compile_with(
        &self,
        text: &str,
        shapes: &dyn ShapeLookup,
    ) -> Result<Template, CompileError> {
        let text = normalize_newlines(text);
        let scanned = self.scanner.scan(&text)?;
        debug!(
            pieces = scanned.pieces.len(),
            scripts = scanned.scripts.len(),
            "scanned template"
        );

        let resolver = ExpressionResolver::new(self.registry, shapes);
        let mut directives = DirectiveCompiler::new(resolver, self.scope, scanned.scripts);

        for piece in scanned.pieces {
            let span = piece.span;
            match piece.node {
                Piece::Literal(text) => directives.emit(Node::Text(text)),
                Piece::Interpolation { expr, escaped } => {
                    let resolved = directives
                        .resolver()
                        .resolve_filtered(&expr)
                        .map_err(|e| e.at(span, format!("{{{{ {} }}}}", expr.trim())))?;
                    directives.emit(Node::Print {
                        expr: resolved,
                        escape: escaped,
                    });
                }
                Piece::Directive { name, args } => {
                    directives.compile(&name, args.as_deref(), span)?
                }
            }
        }

        Ok(Template {
            body: directives.finish()?,
        })
    }
}
