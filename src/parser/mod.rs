//! Template compiler: scanning, expression resolution and directive translation

pub mod ast;
mod compiler;
pub mod directives;
pub mod expression;
pub mod filters;
pub mod headers;
pub mod lexer;
pub mod scanner;
pub mod split;

pub use ast::*;
pub use compiler::Compiler;
pub use directives::{is_builtin_directive, BUILTIN_DIRECTIVES};
pub use expression::ExpressionResolver;
