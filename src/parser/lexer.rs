//! Lexer for template text using logos
//!
//! Template text is mostly literal; the lexer only has to find the tags
//! inside it. Comments and `@script` blocks are consumed whole by callbacks
//! so nothing inside them is ever matched as a tag.

use logos::{Lexer, Logos};

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Malformed tag
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LexError {
    pub message: String,
}

impl LexError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Which kind of interpolation tag was found
#[derive(Debug, Clone, PartialEq)]
pub enum Interpolation {
    /// `{{ expr }}`
    Escaped(String),
    /// `{{{ expr }}}`
    Raw(String),
    /// `@{{ expr }}`, emitted literally as `{{ expr }}`
    Verbatim(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveTag {
    pub name: String,
    pub args: Option<String>,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
pub enum Token {
    #[regex(r"@?\{\{\{?[^\t\r\n}]+\}?\}\}", interpolation)]
    Interpolation(Interpolation),

    #[regex(r"@[a-z]+", directive)]
    Directive(DirectiveTag),

    /// Body of an `@script ... @endscript` block
    #[token("@script", script)]
    Script(String),

    /// `{* ... *}`, never part of the output
    #[token("{*", comment)]
    Comment(String),

    /// `@@` stands for a literal `@`
    #[token("@@")]
    EscapedAt,

    #[regex(r"[^@{]+")]
    Text,

    #[token("@")]
    At,

    #[token("{")]
    Brace,
}

fn interpolation(lex: &mut Lexer<Token>) -> Result<Interpolation, LexError> {
    let slice = lex.slice();
    let verbatim = slice.starts_with('@');
    let tag = slice.trim_start_matches('@');
    let open = tag.chars().take_while(|c| *c == '{').count();
    let close = tag.chars().rev().take_while(|c| *c == '}').count();
    let inner = tag[open..tag.len() - close].trim().to_string();

    match (verbatim, open, close) {
        (true, 2, 2) => Ok(Interpolation::Verbatim(inner)),
        (false, 2, 2) => Ok(Interpolation::Escaped(inner)),
        (false, 3, 3) => Ok(Interpolation::Raw(inner)),
        _ => Err(LexError::new(
            "mismatched braces: use {{ expr }} for escaped output or {{{ expr }}} for raw output",
        )),
    }
}

fn directive(lex: &mut Lexer<Token>) -> Result<DirectiveTag, LexError> {
    let name = lex.slice()[1..].to_string();
    let rest = lex.remainder();
    let gap = rest.len() - rest.trim_start_matches([' ', '\t']).len();

    if !rest[gap..].starts_with('(') {
        swallow_newline(lex);
        return Ok(DirectiveTag { name, args: None });
    }

    let close = closing_paren(&rest[gap..])
        .ok_or_else(|| LexError::new(format!("unterminated argument list for @{}", name)))?;
    let args = rest[gap + 1..gap + close].to_string();
    lex.bump(gap + close + 1);
    swallow_newline(lex);
    Ok(DirectiveTag {
        name,
        args: Some(args),
    })
}

fn script(lex: &mut Lexer<Token>) -> Result<String, LexError> {
    const END: &str = "@endscript";
    let rest = lex.remainder();
    let end = rest
        .find(END)
        .ok_or_else(|| LexError::new("@script without matching @endscript"))?;
    let body = rest[..end].to_string();
    lex.bump(end + END.len());
    swallow_newline(lex);
    Ok(body)
}

fn comment(lex: &mut Lexer<Token>) -> Result<String, LexError> {
    let rest = lex.remainder();
    let end = rest
        .find("*}")
        .ok_or_else(|| LexError::new("unterminated comment"))?;
    let body = rest[..end].to_string();
    lex.bump(end + 2);
    Ok(body)
}

/// A line break right after a directive belongs to the directive
fn swallow_newline(lex: &mut Lexer<Token>) {
    if lex.remainder().starts_with('\n') {
        lex.bump(1);
    }
}

/// Offset of the `)` closing the `(` at the start of `input`
///
/// Quotes are honoured; a line break before the close means the list is
/// unterminated.
pub fn closing_paren(input: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in input.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            } else if c == '\n' {
                return None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            '\n' => return None,
            _ => {}
        }
    }
    None
}

/// Lex input string into tokens with spans
pub fn lex(input: &str) -> impl Iterator<Item = (Result<Token, LexError>, Span)> + '_ {
    Token::lexer(input).spanned()
}
