//! Built-in filters and functions

use super::registry::{Arity, CallError, Callable, FunctionRegistry, RegistryError};
use crate::value::Value;

/// Register every built-in filter and function
pub fn register_builtins(registry: &mut FunctionRegistry) -> Result<(), RegistryError> {
    let filters: [(&str, Arity, fn(&[Value]) -> Result<Value, CallError>); 21] = [
        ("lower", Arity::exact(1), lower),
        ("upper", Arity::exact(1), upper),
        ("title", Arity::exact(1), title),
        ("capitalize", Arity::exact(1), capitalize),
        ("trim", Arity::exact(1), trim),
        ("length", Arity::exact(1), length),
        ("join", Arity::range(1, 2), join),
        ("first", Arity::exact(1), first),
        ("last", Arity::exact(1), last),
        ("reverse", Arity::exact(1), reverse),
        ("default", Arity::exact(2), default),
        ("nl2br", Arity::exact(1), nl2br),
        ("escurl", Arity::exact(1), escurl),
        ("round", Arity::range(1, 2), round),
        ("floor", Arity::exact(1), floor),
        ("ceil", Arity::exact(1), ceil),
        ("slice", Arity::range(2, 3), slice),
        ("excerpt", Arity::range(1, 2), excerpt),
        ("slug", Arity::exact(1), slug),
        ("keys", Arity::exact(1), keys),
        ("values", Arity::exact(1), values),
    ];
    for (name, arity, func) in filters {
        registry.register_filter(name, Callable::native(arity, func))?;
    }

    registry.register_function("range", Callable::native(Arity::range(2, 3), range))?;
    registry.register_function("max", Callable::native(Arity::at_least(1), max))?;
    registry.register_function("min", Callable::native(Arity::at_least(1), min))?;
    Ok(())
}

fn text_arg(args: &[Value]) -> String {
    args.first().map(Value::to_text).unwrap_or_default()
}

fn number_arg(args: &[Value], index: usize) -> Result<f64, CallError> {
    let value = args.get(index).unwrap_or(&Value::Null);
    value
        .as_f64()
        .ok_or_else(|| CallError::type_mismatch("number", value))
}

fn int_arg(args: &[Value], index: usize) -> Result<i64, CallError> {
    let value = args.get(index).unwrap_or(&Value::Null);
    value
        .as_i64()
        .ok_or_else(|| CallError::type_mismatch("integer", value))
}

/// Floats that are whole come back as integers
fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::Int(f as i64)
    } else {
        Value::Float(f)
    }
}

fn lower(args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::from(text_arg(args).to_lowercase()))
}

fn upper(args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::from(text_arg(args).to_uppercase()))
}

fn capitalize_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn title(args: &[Value]) -> Result<Value, CallError> {
    let text = text_arg(args);
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    Ok(Value::from(out))
}

fn capitalize(args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::from(capitalize_word(&text_arg(args))))
}

fn trim(args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::from(text_arg(args).trim()))
}

fn length(args: &[Value]) -> Result<Value, CallError> {
    match &args[0] {
        Value::Null => Ok(Value::Int(0)),
        Value::Int(_) | Value::Float(_) => Ok(Value::from(args[0].to_text().chars().count())),
        other => other
            .len()
            .map(Value::from)
            .ok_or_else(|| CallError::type_mismatch("string, list or map", other)),
    }
}

fn join(args: &[Value]) -> Result<Value, CallError> {
    let separator = args.get(1).map(Value::to_text).unwrap_or_default();
    match &args[0] {
        Value::List(items) => Ok(Value::from(
            items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(&separator),
        )),
        Value::Map(map) => Ok(Value::from(
            map.values()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(&separator),
        )),
        other => Err(CallError::type_mismatch("list", other)),
    }
}

fn first(args: &[Value]) -> Result<Value, CallError> {
    match &args[0] {
        Value::List(items) => Ok(items.first().cloned().unwrap_or_default()),
        Value::Map(map) => Ok(map.values().next().cloned().unwrap_or_default()),
        Value::String(s) => Ok(s.chars().next().map(String::from).into()),
        other => Err(CallError::type_mismatch("list or string", other)),
    }
}

fn last(args: &[Value]) -> Result<Value, CallError> {
    match &args[0] {
        Value::List(items) => Ok(items.last().cloned().unwrap_or_default()),
        Value::Map(map) => Ok(map.values().last().cloned().unwrap_or_default()),
        Value::String(s) => Ok(s.chars().last().map(String::from).into()),
        other => Err(CallError::type_mismatch("list or string", other)),
    }
}

fn reverse(args: &[Value]) -> Result<Value, CallError> {
    match &args[0] {
        Value::List(items) => Ok(Value::List(items.iter().rev().cloned().collect())),
        Value::String(s) => Ok(Value::from(s.chars().rev().collect::<String>())),
        other => Err(CallError::type_mismatch("list or string", other)),
    }
}

fn default(args: &[Value]) -> Result<Value, CallError> {
    if args[0].is_truthy() {
        Ok(args[0].clone())
    } else {
        Ok(args[1].clone())
    }
}

fn nl2br(args: &[Value]) -> Result<Value, CallError> {
    Ok(Value::from(text_arg(args).replace('\n', "<br />\n")))
}

/// Percent-encode everything except RFC 3986 unreserved characters
fn escurl(args: &[Value]) -> Result<Value, CallError> {
    let text = text_arg(args);
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    Ok(Value::from(out))
}

fn round(args: &[Value]) -> Result<Value, CallError> {
    let value = number_arg(args, 0)?;
    let precision = if args.len() > 1 { int_arg(args, 1)? } else { 0 };
    if precision <= 0 {
        return Ok(number_value(value.round()));
    }
    let factor = 10f64.powi(precision.min(15) as i32);
    Ok(Value::Float((value * factor).round() / factor))
}

fn floor(args: &[Value]) -> Result<Value, CallError> {
    Ok(number_value(number_arg(args, 0)?.floor()))
}

fn ceil(args: &[Value]) -> Result<Value, CallError> {
    Ok(number_value(number_arg(args, 0)?.ceil()))
}

/// Resolve a possibly negative `start` and optional `len` against `total`
fn slice_bounds(total: usize, start: i64, len: Option<i64>) -> (usize, usize) {
    let total_i = total as i64;
    let from = if start < 0 {
        total_i.saturating_add(start).max(0)
    } else {
        start.min(total_i)
    };
    let to = match len {
        Some(len) if len < 0 => total_i.saturating_add(len).max(from),
        Some(len) => from.saturating_add(len).min(total_i),
        None => total_i,
    };
    (from as usize, to as usize)
}

fn slice(args: &[Value]) -> Result<Value, CallError> {
    let start = int_arg(args, 1)?;
    let len = if args.len() > 2 && !args[2].is_null() {
        Some(int_arg(args, 2)?)
    } else {
        None
    };
    match &args[0] {
        Value::List(items) => {
            let (from, to) = slice_bounds(items.len(), start, len);
            Ok(Value::List(items[from..to].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = slice_bounds(chars.len(), start, len);
            Ok(Value::from(chars[from..to].iter().collect::<String>()))
        }
        other => Err(CallError::type_mismatch("list or string", other)),
    }
}

fn excerpt(args: &[Value]) -> Result<Value, CallError> {
    let text = text_arg(args);
    let limit = if args.len() > 1 {
        int_arg(args, 1)?.max(0) as usize
    } else {
        100
    };
    if text.chars().count() <= limit {
        return Ok(Value::from(text));
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    Ok(Value::from(cut))
}

fn slug(args: &[Value]) -> Result<Value, CallError> {
    let mut out = String::new();
    let mut pending_dash = false;
    for c in text_arg(args).chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    Ok(Value::from(out))
}

fn keys(args: &[Value]) -> Result<Value, CallError> {
    match &args[0] {
        Value::Map(map) => Ok(Value::List(map.keys().cloned().map(Value::from).collect())),
        Value::List(items) => Ok(Value::List((0..items.len()).map(Value::from).collect())),
        other => Err(CallError::type_mismatch("list or map", other)),
    }
}

fn values(args: &[Value]) -> Result<Value, CallError> {
    match &args[0] {
        Value::Map(map) => Ok(Value::List(map.values().cloned().collect())),
        Value::List(items) => Ok(Value::List(items.clone())),
        other => Err(CallError::type_mismatch("list or map", other)),
    }
}

const MAX_RANGE_ITEMS: u64 = 100_000;

/// Inclusive integer range with an optional step
fn range(args: &[Value]) -> Result<Value, CallError> {
    let start = int_arg(args, 0)?;
    let end = int_arg(args, 1)?;
    let step = if args.len() > 2 {
        int_arg(args, 2)?
            .checked_abs()
            .ok_or_else(|| CallError::Message("range step is out of bounds".to_string()))?
    } else {
        1
    };
    if step == 0 {
        return Err(CallError::Message("range step must not be zero".to_string()));
    }
    let steps = start.abs_diff(end) / step.unsigned_abs();
    if steps >= MAX_RANGE_ITEMS {
        return Err(CallError::Message(format!(
            "range of {} items is too large",
            steps.saturating_add(1)
        )));
    }
    // every item lies between start and end, so the narrowing cast is exact
    let items = (0..=steps as i128)
        .map(|i| {
            let offset = i * step as i128;
            if start <= end {
                start as i128 + offset
            } else {
                start as i128 - offset
            }
        })
        .map(|n| Value::Int(n as i64))
        .collect();
    Ok(Value::List(items))
}

/// Arguments, or the items of a single list argument
fn operands(args: &[Value]) -> Vec<Value> {
    match args {
        [Value::List(items)] => items.clone(),
        [Value::Map(map)] => map.values().cloned().collect(),
        _ => args.to_vec(),
    }
}

fn extreme(args: &[Value], want: std::cmp::Ordering) -> Result<Value, CallError> {
    let mut best: Option<Value> = None;
    for value in operands(args) {
        best = match best {
            Some(current) if value.compare(&current) != Some(want) => Some(current),
            _ => Some(value),
        };
    }
    best.ok_or_else(|| CallError::Message("expected at least one value".to_string()))
}

fn max(args: &[Value]) -> Result<Value, CallError> {
    extreme(args, std::cmp::Ordering::Greater)
}

fn min(args: &[Value]) -> Result<Value, CallError> {
    extreme(args, std::cmp::Ordering::Less)
}
