//! Registry of filters, functions, custom directives and custom conditions

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::parser::directives::is_builtin_directive;
use crate::value::Value;

/// Failure reported by a callable
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    #[error("expected {expected} argument(s), got {got}")]
    Arity { expected: String, got: usize },

    #[error("expected {expected}, got {got}")]
    Type { expected: String, got: String },

    #[error("{0}")]
    Message(String),
}

impl CallError {
    pub fn type_mismatch(expected: impl Into<String>, got: &Value) -> Self {
        Self::Type {
            expected: expected.into(),
            got: got.kind().to_string(),
        }
    }
}

/// Accepted argument count, counting the filtered value as the first argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exact(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    pub const fn range(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", max),
            Some(max) => write!(f, "{} to {}", self.min, max),
            None => write!(f, "at least {}", self.min),
        }
    }
}

pub type NativeFn = fn(&[Value]) -> Result<Value, CallError>;
pub type CallbackFn = Arc<dyn Fn(&[Value]) -> Result<Value, CallError> + Send + Sync>;

/// Something a template can call
#[derive(Clone)]
pub enum Callable {
    /// Built-in transformation with a fixed arity contract
    Native { arity: Arity, func: NativeFn },
    /// User-supplied closure; arguments are not counted
    Callback(CallbackFn),
}

impl Callable {
    pub fn native(arity: Arity, func: NativeFn) -> Self {
        Callable::Native { arity, func }
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Callable::Callback(Arc::new(f))
    }

    pub fn arity(&self) -> Option<Arity> {
        match self {
            Callable::Native { arity, .. } => Some(*arity),
            Callable::Callback(_) => None,
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, CallError> {
        match self {
            Callable::Native { arity, func } => {
                if !arity.accepts(args.len()) {
                    return Err(CallError::Arity {
                        expected: arity.to_string(),
                        got: args.len(),
                    });
                }
                func(args)
            }
            Callable::Callback(f) => f(args),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Native { arity, .. } => write!(f, "Native({})", arity),
            Callable::Callback(_) => write!(f, "Callback"),
        }
    }
}

/// The namespace a registry entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Filter,
    Function,
    Directive,
    Condition,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::Filter => "filter",
            Kind::Function => "function",
            Kind::Directive => "directive",
            Kind::Condition => "condition",
        })
    }
}

/// Errors raised by registration and lookup
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    /// Name already taken in its namespace
    #[error("{kind} `{name}` is already registered")]
    Conflict { kind: Kind, name: String },

    /// Directive and condition names must be lowercase ASCII letters
    #[error("{kind} name `{name}` is not a valid directive name; use lowercase letters only")]
    InvalidName { kind: Kind, name: String },

    #[error("unknown {kind} `{name}`")]
    Unknown { kind: Kind, name: String },

    #[error("{kind} `{name}` failed: {source}")]
    Call {
        kind: Kind,
        name: String,
        #[source]
        source: CallError,
    },
}

/// Name to callable mappings, one namespace per [`Kind`]
///
/// Registration is append-only: registering a taken name fails instead of
/// replacing the entry. Filters and functions are independent, so one name
/// can be both.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    filters: IndexMap<String, Callable>,
    functions: IndexMap<String, Callable>,
    directives: IndexMap<String, Callable>,
    conditions: IndexMap<String, Callable>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_filter(
        &mut self,
        name: impl Into<String>,
        callable: Callable,
    ) -> Result<(), RegistryError> {
        insert_unique(&mut self.filters, Kind::Filter, name.into(), callable)
    }

    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        callable: Callable,
    ) -> Result<(), RegistryError> {
        insert_unique(&mut self.functions, Kind::Function, name.into(), callable)
    }

    /// Register `@name(args)`; the callable returns the text to emit
    pub fn register_directive(
        &mut self,
        name: impl Into<String>,
        callable: Callable,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        ensure_directive_name(Kind::Directive, &name)?;
        self.ensure_directive_name_free(&name)?;
        self.directives.insert(name, callable);
        Ok(())
    }

    /// Register a condition usable as `@name(args) ... @elsename(args) ... @endname`
    pub fn register_condition(
        &mut self,
        name: impl Into<String>,
        callable: Callable,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        ensure_directive_name(Kind::Condition, &name)?;
        for taken in [name.clone(), format!("else{}", name), format!("end{}", name)] {
            self.ensure_directive_name_free(&taken)?;
        }
        self.conditions.insert(name, callable);
        Ok(())
    }

    fn ensure_directive_name_free(&self, name: &str) -> Result<(), RegistryError> {
        let condition_owned = self.conditions.keys().any(|c| {
            name == c || name.strip_prefix("else") == Some(c) || name.strip_prefix("end") == Some(c)
        });
        if is_builtin_directive(name) || self.directives.contains_key(name) || condition_owned {
            return Err(RegistryError::Conflict {
                kind: Kind::Directive,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn filter(&self, name: &str) -> Option<&Callable> {
        self.filters.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&Callable> {
        self.functions.get(name)
    }

    pub fn directive(&self, name: &str) -> Option<&Callable> {
        self.directives.get(name)
    }

    pub fn condition(&self, name: &str) -> Option<&Callable> {
        self.conditions.get(name)
    }

    pub fn resolve_filter(&self, name: &str, args: &[Value]) -> Result<Value, RegistryError> {
        invoke(self.filter(name), Kind::Filter, name, args)
    }

    pub fn resolve_function(&self, name: &str, args: &[Value]) -> Result<Value, RegistryError> {
        invoke(self.function(name), Kind::Function, name, args)
    }

    pub fn resolve_directive(&self, name: &str, args: &[Value]) -> Result<Value, RegistryError> {
        invoke(self.directive(name), Kind::Directive, name, args)
    }

    pub fn check_condition(&self, name: &str, args: &[Value]) -> Result<bool, RegistryError> {
        invoke(self.condition(name), Kind::Condition, name, args).map(|v| v.is_truthy())
    }

    /// Names of all registered filters, in registration order
    pub fn filter_names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }
}

/// Names the tag lexer can produce after `@`
fn ensure_directive_name(kind: Kind, name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_lowercase()) {
        return Err(RegistryError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn insert_unique(
    map: &mut IndexMap<String, Callable>,
    kind: Kind,
    name: String,
    callable: Callable,
) -> Result<(), RegistryError> {
    if map.contains_key(&name) {
        return Err(RegistryError::Conflict { kind, name });
    }
    map.insert(name, callable);
    Ok(())
}

pub(crate) fn invoke(
    callable: Option<&Callable>,
    kind: Kind,
    name: &str,
    args: &[Value],
) -> Result<Value, RegistryError> {
    let callable = callable.ok_or_else(|| RegistryError::Unknown {
        kind,
        name: name.to_string(),
    })?;
    callable.call(args).map_err(|source| RegistryError::Call {
        kind,
        name: name.to_string(),
        source,
    })
}

/// Directives that exist for one render only
///
/// Unlike the engine registry, a scope may replace its own entries and may
/// shadow engine-level directives of the same name.
#[derive(Debug, Clone, Default)]
pub struct DirectiveScope {
    directives: IndexMap<String, Callable>,
}

impl DirectiveScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`DirectiveScope::insert`]
    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Result<Self, RegistryError>
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.insert(name, Callable::callback(f))?;
        Ok(self)
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        callable: Callable,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        ensure_directive_name(Kind::Directive, &name)?;
        self.directives.insert(name, callable);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.directives.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shout(args: &[Value]) -> Result<Value, CallError> {
        Ok(Value::from(args[0].to_text().to_uppercase()))
    }

    #[test]
    fn test_duplicate_filter_fails() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_filter("shout", Callable::native(Arity::exact(1), shout))
            .unwrap();
        let err = registry
            .register_filter("shout", Callable::native(Arity::exact(1), shout))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Conflict {
                kind: Kind::Filter,
                name: "shout".to_string()
            }
        );
    }

    #[test]
    fn test_filter_and_function_namespaces_are_disjoint() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_filter("shout", Callable::native(Arity::exact(1), shout))
            .unwrap();
        registry
            .register_function("shout", Callable::callback(|_| Ok(Value::from("fn"))))
            .unwrap();
        assert_eq!(
            registry.resolve_filter("shout", &[Value::from("a")]).unwrap(),
            Value::from("A")
        );
        assert_eq!(
            registry.resolve_function("shout", &[]).unwrap(),
            Value::from("fn")
        );
    }

    #[test]
    fn test_unknown_lookup() {
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.resolve_function("nope", &[]),
            Err(RegistryError::Unknown {
                kind: Kind::Function,
                ..
            })
        ));
    }

    #[test]
    fn test_native_arity_is_checked() {
        let callable = Callable::native(Arity::range(1, 2), shout);
        assert!(matches!(
            callable.call(&[]),
            Err(CallError::Arity { got: 0, .. })
        ));
        assert_eq!(Arity::range(1, 2).to_string(), "1 to 2");
        assert_eq!(Arity::at_least(1).to_string(), "at least 1");
    }

    #[test]
    fn test_builtin_directive_names_are_reserved() {
        let mut registry = FunctionRegistry::new();
        assert!(registry
            .register_directive("foreach", Callable::callback(|_| Ok(Value::Null)))
            .is_err());
        assert!(registry
            .register_condition("set", Callable::callback(|_| Ok(Value::Null)))
            .is_err());
    }

    #[test]
    fn test_condition_reserves_else_and_end_forms() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_condition("admin", Callable::callback(|_| Ok(Value::Bool(true))))
            .unwrap();
        assert!(registry
            .register_directive("endadmin", Callable::callback(|_| Ok(Value::Null)))
            .is_err());
        assert!(registry.check_condition("admin", &[]).unwrap());
    }

    #[test]
    fn test_scope_may_replace_entries() {
        let mut scope = DirectiveScope::new()
            .with("badge", |_| Ok(Value::from("a")))
            .unwrap();
        scope
            .insert("badge", Callable::callback(|_| Ok(Value::from("b"))))
            .unwrap();
        let value = scope.get("badge").unwrap().call(&[]).unwrap();
        assert_eq!(value, Value::from("b"));
    }

    #[test]
    fn test_directive_names_must_be_lexable() {
        let mut registry = FunctionRegistry::new();
        for name in ["myWidget", "h1", "is_admin", ""] {
            assert!(
                matches!(
                    registry.register_directive(name, Callable::callback(|_| Ok(Value::Null))),
                    Err(RegistryError::InvalidName { kind: Kind::Directive, .. })
                ),
                "{name}"
            );
        }
        assert!(matches!(
            registry.register_condition("isAdmin", Callable::callback(|_| Ok(Value::Bool(true)))),
            Err(RegistryError::InvalidName { kind: Kind::Condition, .. })
        ));
        assert!(DirectiveScope::new()
            .with("my-widget", |_| Ok(Value::Null))
            .is_err());
        assert!(registry
            .register_directive("widget", Callable::callback(|_| Ok(Value::Null)))
            .is_ok());
    }
}
