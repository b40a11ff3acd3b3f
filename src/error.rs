//! Error types for template compilation

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Failure while compiling one template
///
/// Every variant carries the span of the offending tag in the
/// line-ending-normalised source, and the raw text it came from.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("syntax error in `{fragment}`: {message}")]
    Syntax {
        span: Span,
        fragment: String,
        message: String,
    },

    #[error("invalid expression `{expr}` in {origin}: {message}")]
    InvalidExpression {
        span: Span,
        origin: String,
        expr: String,
        message: String,
    },

    #[error("undefined variable `{name}` in {origin}")]
    UndefinedVariable {
        span: Span,
        origin: String,
        name: String,
        expr: String,
    },

    #[error("cannot access member `{member}` of `{root}` in {origin}")]
    InaccessibleMember {
        span: Span,
        origin: String,
        member: String,
        root: String,
        expr: String,
    },

    #[error("unknown filter `{name}` in {origin}")]
    UnknownFilter {
        span: Span,
        origin: String,
        name: String,
        expr: String,
    },

    #[error("unknown function `{name}` in {origin}")]
    UnknownFunction {
        span: Span,
        origin: String,
        name: String,
        expr: String,
    },

    #[error("unknown directive @{name}")]
    UnknownDirective { span: Span, name: String },

    #[error("malformed @{directive}({args}): expected {expected}")]
    DirectiveSyntax {
        span: Span,
        directive: String,
        args: String,
        expected: String,
    },

    #[error("section error at @{directive}: {message}")]
    SectionState {
        span: Span,
        directive: String,
        message: String,
    },

    #[error("unbalanced @{directive}: {message}")]
    UnbalancedBlock {
        span: Span,
        directive: String,
        message: String,
    },
}

impl CompileError {
    pub fn syntax(span: Span, fragment: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            span,
            fragment: fragment.into(),
            message: message.into(),
        }
    }

    pub fn directive_syntax(
        span: Span,
        directive: impl Into<String>,
        args: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::DirectiveSyntax {
            span,
            directive: directive.into(),
            args: args.into(),
            expected: expected.into(),
        }
    }

    pub fn unbalanced(span: Span, directive: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnbalancedBlock {
            span,
            directive: directive.into(),
            message: message.into(),
        }
    }

    pub fn span(&self) -> &Span {
        match self {
            Self::Syntax { span, .. }
            | Self::InvalidExpression { span, .. }
            | Self::UndefinedVariable { span, .. }
            | Self::InaccessibleMember { span, .. }
            | Self::UnknownFilter { span, .. }
            | Self::UnknownFunction { span, .. }
            | Self::UnknownDirective { span, .. }
            | Self::DirectiveSyntax { span, .. }
            | Self::SectionState { span, .. }
            | Self::UnbalancedBlock { span, .. } => span,
        }
    }

    /// Short label shown under the offending span
    fn label(&self) -> String {
        match self {
            Self::Syntax { message, .. } => message.clone(),
            Self::InvalidExpression { message, .. } => message.clone(),
            Self::UndefinedVariable { name, .. } => format!("`{}` is not defined here", name),
            Self::InaccessibleMember { member, root, .. } => {
                format!("`{}` has no readable member `{}`", root, member)
            }
            Self::UnknownFilter { name, .. } => format!("no filter named `{}`", name),
            Self::UnknownFunction { name, .. } => format!("no function named `{}`", name),
            Self::UnknownDirective { name, .. } => format!("no directive named @{}", name),
            Self::DirectiveSyntax { expected, .. } => format!("expected {}", expected),
            Self::SectionState { message, .. } => message.clone(),
            Self::UnbalancedBlock { message, .. } => message.clone(),
        }
    }

    /// Format the error with source context using ariadne
    ///
    /// `source` must be the text the template was compiled from; spans are
    /// clamped so a mismatched source never panics the reporter.
    pub fn format(&self, source: &str, filename: &str) -> String {
        let source = normalize_newlines(source);
        let end = self.span().end.min(source.len());
        let start = self.span().start.min(end);
        let mut buf = Vec::new();

        let written = Report::build(ReportKind::Error, filename, start)
            .with_message(self.to_string())
            .with_label(
                Label::new((filename, start..end))
                    .with_message(self.label())
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source.as_str())), &mut buf);

        match written {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => format!("{}: {}", filename, self),
        }
    }
}

/// Failure while resolving one expression, before it is tied to a tag
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("invalid expression `{expr}`: {message}")]
    Invalid { expr: String, message: String },

    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String, expr: String },

    #[error("cannot access member `{member}` of `{root}`")]
    InaccessibleMember {
        member: String,
        root: String,
        expr: String,
    },

    #[error("unknown filter `{name}`")]
    UnknownFilter { name: String, expr: String },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String, expr: String },
}

impl ExprError {
    pub fn invalid(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            expr: expr.into(),
            message: message.into(),
        }
    }

    /// Attach the tag location and the directive or interpolation it came from
    pub fn at(self, span: Span, origin: impl Into<String>) -> CompileError {
        let origin = origin.into();
        match self {
            ExprError::Invalid { expr, message } => CompileError::InvalidExpression {
                span,
                origin,
                expr,
                message,
            },
            ExprError::UndefinedVariable { name, expr } => CompileError::UndefinedVariable {
                span,
                origin,
                name,
                expr,
            },
            ExprError::InaccessibleMember { member, root, expr } => {
                CompileError::InaccessibleMember {
                    span,
                    origin,
                    member,
                    root,
                    expr,
                }
            }
            ExprError::UnknownFilter { name, expr } => CompileError::UnknownFilter {
                span,
                origin,
                name,
                expr,
            },
            ExprError::UnknownFunction { name, expr } => CompileError::UnknownFunction {
                span,
                origin,
                name,
                expr,
            },
        }
    }
}

/// `\r\n` and lone `\r` become `\n`
pub fn normalize_newlines(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_includes_label() {
        let source = "Hello {{ name }}\n@bogus(1)\n";
        let err = CompileError::UnknownDirective {
            span: 17..26,
            name: "bogus".to_string(),
        };
        let report = err.format(source, "page.tpl");
        assert!(report.contains("page.tpl"));
        assert!(report.contains("no directive named @bogus"));
    }

    #[test]
    fn test_format_clamps_out_of_range_span() {
        let err = CompileError::syntax(100..200, "{{", "unclosed interpolation");
        let report = err.format("{{", "short.tpl");
        assert!(report.contains("unclosed interpolation"));
    }

    #[test]
    fn test_expr_error_at_keeps_fields() {
        let err = ExprError::InaccessibleMember {
            member: "secret".to_string(),
            root: "user".to_string(),
            expr: "user.secret".to_string(),
        }
        .at(3..20, "{{ }}");
        assert_eq!(err.span(), &(3..20));
        assert_eq!(
            err.to_string(),
            "cannot access member `secret` of `user` in {{ }}"
        );
    }

    #[test]
    fn test_normalize_newlines() {
        assert_eq!(normalize_newlines("a\r\nb\rc\n"), "a\nb\nc\n");
    }
}
