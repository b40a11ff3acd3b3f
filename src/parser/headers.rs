//! Small chumsky grammars for directive headers
//!
//! Most directive arguments are expressions and go to the resolver. The few
//! with fixed keyword structure (`@for`, `@set`, loop bindings) are parsed
//! here.

use chumsky::prelude::*;

type Extra<'a> = extra::Err<Rich<'a, char>>;

fn ident<'a>() -> impl Parser<'a, &'a str, String, Extra<'a>> + Clone {
    text::ascii::ident().map(|s: &str| s.to_string())
}

/// A run of non-blank characters
fn operand<'a>() -> impl Parser<'a, &'a str, String, Extra<'a>> + Clone {
    none_of(" \t\n")
        .repeated()
        .at_least(1)
        .collect::<String>()
}

fn number<'a>() -> impl Parser<'a, &'a str, (), Extra<'a>> + Clone {
    just('-')
        .or_not()
        .then(text::digits(10))
        .then(just('.').then(text::digits(10)).or_not())
        .then(end())
        .ignored()
}

/// `-?\d+(\.\d+)?`
pub fn is_number(input: &str) -> bool {
    number().parse(input).into_result().is_ok()
}

/// Loop variables after `as`: `item` or `key => item`
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub key: Option<String>,
    pub item: String,
}

fn binding<'a>() -> impl Parser<'a, &'a str, Binding, Extra<'a>> + Clone {
    ident()
        .padded()
        .then(just("=>").padded().ignore_then(ident()).padded().or_not())
        .then_ignore(end())
        .map(|(first, second)| match second {
            Some(item) => Binding {
                key: Some(first),
                item,
            },
            None => Binding {
                key: None,
                item: first,
            },
        })
}

pub fn parse_binding(input: &str) -> Option<Binding> {
    binding().parse(input).into_result().ok()
}

/// `var in start count end`
#[derive(Debug, Clone, PartialEq)]
pub struct CountHeader {
    pub var: String,
    pub start: String,
    pub end: String,
}

fn count_header<'a>() -> impl Parser<'a, &'a str, CountHeader, Extra<'a>> + Clone {
    ident()
        .padded()
        .then_ignore(just("in").padded())
        .then(operand())
        .then_ignore(just("count").padded())
        .then(operand().padded())
        .then_ignore(end())
        .map(|((var, start), end)| CountHeader { var, start, end })
}

pub fn parse_count_header(input: &str) -> Option<CountHeader> {
    count_header().parse(input).into_result().ok()
}

/// `name = expression`
fn assignment<'a>() -> impl Parser<'a, &'a str, (String, String), Extra<'a>> + Clone {
    ident()
        .padded()
        .then_ignore(just('='))
        .then(any().repeated().at_least(1).collect::<String>())
        .then_ignore(end())
        .map(|(name, expr)| (name, expr.trim().to_string()))
}

pub fn parse_assignment(input: &str) -> Option<(String, String)> {
    assignment()
        .parse(input)
        .into_result()
        .ok()
        .filter(|(_, expr)| !expr.is_empty() && !expr.starts_with('='))
}
