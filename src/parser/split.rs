//! Nesting-aware string splitting for expression text
//!
//! Separators only count at the top level: outside quotes and outside any
//! `()`, `[]` or `{}` group.

/// Walk `input`, calling `at_top(i)` for every byte offset that sits at the
/// top level. Stops early when the callback returns `true`.
fn walk_top_level(input: &str, mut at_top: impl FnMut(usize) -> bool) {
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
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                continue;
            }
            '(' | '[' | '{' => {
                depth += 1;
                continue;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                continue;
            }
            _ => {}
        }
        if depth == 0 && at_top(i) {
            return;
        }
    }
}

/// Split on every top-level occurrence of any separator, trimming the pieces
pub fn split_top_level<'a>(input: &'a str, separators: &[&str]) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut skip_until = 0;

    walk_top_level(input, |i| {
        if i < skip_until {
            return false;
        }
        if let Some(sep) = separators.iter().find(|s| input[i..].starts_with(**s)) {
            pieces.push(input[start..i].trim());
            start = i + sep.len();
            skip_until = start;
        }
        false
    });
    pieces.push(input[start..].trim());
    pieces
}

/// Split a comma-separated argument list; an empty list yields no items
pub fn split_args(input: &str) -> Vec<&str> {
    if input.trim().is_empty() {
        return Vec::new();
    }
    split_top_level(input, &[","])
}

/// Split a filter chain on single `|`, leaving `||` alone
pub fn split_filters(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;

    walk_top_level(input, |i| {
        let pipe = bytes[i] == b'|';
        let doubled = (i > 0 && bytes[i - 1] == b'|') || bytes.get(i + 1) == Some(&b'|');
        if pipe && !doubled {
            pieces.push(input[start..i].trim());
            start = i + 1;
        }
        false
    });
    pieces.push(input[start..].trim());
    pieces
}

/// First top-level occurrence of `pattern`
pub fn find_top_level(input: &str, pattern: &str) -> Option<usize> {
    let mut found = None;
    walk_top_level(input, |i| {
        if input[i..].starts_with(pattern) {
            found = Some(i);
            return true;
        }
        false
    });
    found
}

/// Split once around the first top-level `pattern`
pub fn split_once_top_level<'a>(input: &'a str, pattern: &str) -> Option<(&'a str, &'a str)> {
    find_top_level(input, pattern)
        .map(|i| (input[..i].trim(), input[i + pattern.len()..].trim()))
}

/// Whether `input` contains `c` at the top level
pub fn contains_top_level(input: &str, c: char) -> bool {
    let mut found = false;
    walk_top_level(input, |i| {
        found = input[i..].starts_with(c);
        found
    });
    found
}

/// Offset of the bracket closing the one at `open` (`(`, `[` or `{`)
pub fn matching_close(input: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in input[open..].char_indices() {
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
            ')' | ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether the whole of `input` is one `open ... close` group
pub fn is_wrapped(input: &str, open: char, close: char) -> bool {
    input.starts_with(open)
        && input.ends_with(close)
        && matching_close(input, 0) == Some(input.len() - close.len_utf8())
}

/// `name(args)` with the closing paren at the very end; returns `(name, args)`
pub fn split_call(input: &str) -> Option<(&str, &str)> {
    let paren = input.find('(')?;
    let name = input[..paren].trim_end();
    if !is_identifier(name) {
        return None;
    }
    let close = matching_close(input, paren)?;
    (close == input.len() - 1).then(|| (name, &input[paren + 1..close]))
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `[A-Za-z0-9_]+`, the keys allowed after a dot
pub fn is_key(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `input` is one quoted string; returns the quote and raw body
pub fn quoted(input: &str) -> Option<(char, &str)> {
    let quote = input.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    if input.len() < 2 || !input.ends_with(quote) {
        return None;
    }
    let body = &input[1..input.len() - 1];
    // The closing quote must not be escaped or matched earlier
    let mut escaped = false;
    for c in body.chars() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return None;
        }
    }
    (!escaped).then_some((quote, body))
}

/// Resolve backslash escapes in a quoted string body
pub fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_nesting() {
        assert_eq!(
            split_args("a, [b, c], f(d, e), 'x, y'"),
            vec!["a", "[b, c]", "f(d, e)", "'x, y'"]
        );
        assert!(split_args("  ").is_empty());
    }

    #[test]
    fn test_split_filters_ignores_logical_or() {
        assert_eq!(split_filters("a || b"), vec!["a || b"]);
        assert_eq!(
            split_filters("name|upper|join(', ')"),
            vec!["name", "upper", "join(', ')"]
        );
        assert_eq!(split_filters("'a|b'|upper"), vec!["'a|b'", "upper"]);
    }

    #[test]
    fn test_split_on_words() {
        assert_eq!(
            split_top_level("a and b && (c and d)", &[" and ", "&&"]),
            vec!["a", "b", "(c and d)"]
        );
    }

    #[test]
    fn test_split_once() {
        assert_eq!(
            split_once_top_level("'page' with [1, 2]", " with "),
            Some(("'page'", "[1, 2]"))
        );
        assert_eq!(split_once_top_level("'a with b'", " with "), None);
    }

    #[test]
    fn test_wrapping() {
        assert!(is_wrapped("(a and b)", '(', ')'));
        assert!(!is_wrapped("(a) and (b)", '(', ')'));
        assert!(is_wrapped("[1, [2]]", '[', ']'));
    }

    #[test]
    fn test_split_call() {
        assert_eq!(split_call("max(a, b)"), Some(("max", "a, b")));
        assert_eq!(split_call("f(a)(b)"), None);
        assert_eq!(split_call("a.b(c)"), None);
    }

    #[test]
    fn test_quoted() {
        assert_eq!(quoted("'it\\'s'"), Some(('\'', "it\\'s")));
        assert_eq!(quoted("'a' ~ 'b'"), None);
        assert_eq!(quoted("\"x\""), Some(('"', "x")));
        assert_eq!(unescape("it\\'s\\n"), "it's\n");
    }

    #[test]
    fn test_contains_top_level() {
        assert!(contains_top_level("user.name", '.'));
        assert!(!contains_top_level("'a.b'", '.'));
        assert!(!contains_top_level("f(a.b)", '.'));
    }
}
