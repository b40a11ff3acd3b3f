//! Tag scanner
//!
//! Splits normalised template text into literal runs, interpolations and
//! directives. `@script` bodies are set aside in order and replaced by a
//! `@javascript` directive that consumes the next stored body.

use std::collections::VecDeque;

use crate::error::{CompileError, Span};
use crate::parser::ast::Spanned;
use crate::parser::lexer::{lex, Interpolation, Token};

/// One scanned piece of template text
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Literal(String),
    Interpolation { expr: String, escaped: bool },
    Directive { name: String, args: Option<String> },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScannedTemplate {
    pub pieces: Vec<Spanned<Piece>>,
    /// Verbatim `@script` bodies, in source order
    pub scripts: VecDeque<String>,
}

/// Name of the directive standing in for an extracted script body
pub const SCRIPT_DIRECTIVE: &str = "javascript";

#[derive(Debug, Clone, Copy, Default)]
pub struct TagScanner;

impl TagScanner {
    pub fn new() -> Self {
        Self
    }

    /// Scan `text`, which must already have normalised line endings
    pub fn scan(&self, text: &str) -> Result<ScannedTemplate, CompileError> {
        let mut out = ScannedTemplate::default();

        for (token, span) in lex(text) {
            let token = token.map_err(|e| {
                CompileError::syntax(span.clone(), fragment(text, &span), e.message)
            })?;

            match token {
                Token::Text | Token::At => push_literal(&mut out, &text[span.clone()], span),
                Token::EscapedAt => push_literal(&mut out, "@", span),
                Token::Brace => {
                    if text[span.start..].starts_with("{{") {
                        return Err(CompileError::syntax(
                            span.start..line_end(text, span.start),
                            fragment(text, &(span.start..line_end(text, span.start))),
                            "unclosed interpolation tag",
                        ));
                    }
                    push_literal(&mut out, "{", span)
                }
                Token::Comment(_) => {}
                Token::Script(body) => {
                    out.scripts.push_back(body);
                    out.pieces.push(Spanned::new(
                        Piece::Directive {
                            name: SCRIPT_DIRECTIVE.to_string(),
                            args: None,
                        },
                        span,
                    ));
                }
                Token::Interpolation(Interpolation::Verbatim(inner)) => {
                    push_literal(&mut out, &format!("{{{{ {} }}}}", inner), span)
                }
                Token::Interpolation(Interpolation::Escaped(expr)) => out.pieces.push(
                    Spanned::new(Piece::Interpolation { expr, escaped: true }, span),
                ),
                Token::Interpolation(Interpolation::Raw(expr)) => out.pieces.push(Spanned::new(
                    Piece::Interpolation {
                        expr,
                        escaped: false,
                    },
                    span,
                )),
                Token::Directive(tag) => out.pieces.push(Spanned::new(
                    Piece::Directive {
                        name: tag.name,
                        args: tag.args,
                    },
                    span,
                )),
            }
        }
        Ok(out)
    }
}

/// Append literal text, merging with a preceding literal
fn push_literal(out: &mut ScannedTemplate, text: &str, span: Span) {
    if let Some(Spanned {
        node: Piece::Literal(prev),
        span: prev_span,
    }) = out.pieces.last_mut()
    {
        prev.push_str(text);
        prev_span.end = span.end;
        return;
    }
    out.pieces
        .push(Spanned::new(Piece::Literal(text.to_string()), span));
}

fn line_end(text: &str, from: usize) -> usize {
    text[from..].find('\n').map_or(text.len(), |i| from + i)
}

fn fragment(text: &str, span: &Span) -> String {
    text.get(span.clone()).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pieces(text: &str) -> Vec<Piece> {
        TagScanner::new()
            .scan(text)
            .unwrap()
            .pieces
            .into_iter()
            .map(|p| p.node)
            .collect()
    }

    fn literal(s: &str) -> Piece {
        Piece::Literal(s.to_string())
    }

    #[test]
    fn test_literal_interpolation_directive() {
        assert_eq!(
            pieces("Hi {{ name }}!@if(x){{{ html }}}@endif"),
            vec![
                literal("Hi "),
                Piece::Interpolation {
                    expr: "name".to_string(),
                    escaped: true
                },
                literal("!"),
                Piece::Directive {
                    name: "if".to_string(),
                    args: Some("x".to_string())
                },
                Piece::Interpolation {
                    expr: "html".to_string(),
                    escaped: false
                },
                Piece::Directive {
                    name: "endif".to_string(),
                    args: None
                },
            ]
        );
    }

    #[test]
    fn test_verbatim_interpolation_is_literal() {
        assert_eq!(
            pieces("<p>@{{ message }}</p>"),
            vec![literal("<p>{{ message }}</p>")]
        );
    }

    #[test]
    fn test_comments_vanish() {
        assert_eq!(
            pieces("a{* @foreach {{ nope }} *}b"),
            vec![literal("ab")]
        );
    }

    #[test]
    fn test_scripts_are_stored_in_order() {
        let scanned = TagScanner::new()
            .scan("@script one @endscript|@script two @endscript")
            .unwrap();
        assert_eq!(
            scanned.scripts,
            VecDeque::from(vec![" one ".to_string(), " two ".to_string()])
        );
        assert_eq!(scanned.pieces.len(), 3);
    }

    #[test]
    fn test_escaped_at() {
        assert_eq!(
            pieces("mail john@@example.com"),
            vec![literal("mail john@example.com")]
        );
    }

    #[test]
    fn test_directive_directly_after_text() {
        assert_eq!(
            pieces("adult@else minor"),
            vec![
                literal("adult"),
                Piece::Directive {
                    name: "else".to_string(),
                    args: None
                },
                literal(" minor"),
            ]
        );
    }

    #[test]
    fn test_unclosed_interpolation() {
        let err = TagScanner::new().scan("Hi {{ name\nnext").unwrap_err();
        assert_eq!(
            err,
            CompileError::syntax(3..10, "{{ name", "unclosed interpolation tag")
        );
    }

    #[test]
    fn test_mismatched_braces_carry_fragment() {
        let err = TagScanner::new().scan("x {{ a }}} y").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Syntax { ref fragment, .. } if fragment == "{{ a }}}"
        ));
    }

    #[test]
    fn test_single_brace_is_literal() {
        assert_eq!(pieces("a { b } c"), vec![literal("a { b } c")]);
    }
}
