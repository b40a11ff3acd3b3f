//! Runtime values and the capability traits used to read them
//!
//! Template data is a tree of [`Value`]s. Host types that want to expose
//! members and methods to templates implement [`HostObject`]; everything is
//! read through [`FieldReadable`], which hides the difference between map
//! keys, list indices and object members.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::functions::CallError;
use crate::parser::headers::is_number;

/// Variables handed to a render, in insertion order
pub type Context = IndexMap<String, Value>;

/// A value bound in a template context
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Object(Arc<dyn HostObject>),
}

/// A host type exposed to templates
///
/// Member access on an object follows a fixed chain: a readable field of the
/// requested name, then a method of that name taking no arguments, then a
/// `get` + capitalised-name accessor. Implementors only describe what they
/// expose; the chain itself lives in [`FieldReadable`].
pub trait HostObject: Send + Sync {
    /// Name used in error messages
    fn type_name(&self) -> &str;

    /// Directly readable member
    fn field(&self, name: &str) -> Option<Value>;

    /// Whether a callable member of this name exists
    fn has_method(&self, name: &str) -> bool;

    /// Invoke a method. `None` means no such method.
    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, CallError>>;

    /// Text used when the object itself is printed
    fn display(&self) -> Option<String> {
        None
    }
}

/// Capability-based member lookup
pub trait FieldReadable {
    /// Read `name`, returning `Ok(None)` when the value has no such member.
    /// A method or getter that runs and fails yields its error.
    fn try_read(&self, name: &str) -> Result<Option<Value>, CallError>;
}

impl FieldReadable for Value {
    fn try_read(&self, name: &str) -> Result<Option<Value>, CallError> {
        match self {
            Value::Map(map) => Ok(map.get(name).cloned()),
            Value::List(items) => Ok(name.parse::<usize>().ok().and_then(|i| items.get(i).cloned())),
            Value::Object(obj) => read_object_member(obj.as_ref(), name),
            _ => Ok(None),
        }
    }
}

/// Member, then bare zero-argument method, then getter convention
fn read_object_member(obj: &dyn HostObject, name: &str) -> Result<Option<Value>, CallError> {
    if let Some(value) = obj.field(name) {
        return Ok(Some(value));
    }
    if obj.has_method(name) {
        return obj.call(name, &[]).transpose();
    }
    let getter = getter_name(name);
    if obj.has_method(&getter) {
        return obj.call(&getter, &[]).transpose();
    }
    Ok(None)
}

/// `name` -> `getName`
pub fn getter_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("get{}{}", first.to_uppercase(), chars.as_str()),
        None => "get".to_string(),
    }
}

impl Value {
    /// Short lowercase name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by conditions and `empty` tests
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !(s.is_empty() || s == "0"),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Text emitted by an interpolation, or `None` for values that cannot be printed
    pub fn to_display(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(true) => Some("1".to_string()),
            Value::Bool(false) => Some(String::new()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(format_float(*f)),
            Value::String(s) => Some(s.clone()),
            Value::List(_) | Value::Map(_) => None,
            Value::Object(obj) => obj.display(),
        }
    }

    /// Display text with lists joined, for contexts that must produce a string
    pub fn to_text(&self) -> String {
        match self {
            Value::List(items) => items.iter().map(Value::to_text).collect::<Vec<_>>().join(","),
            Value::Map(_) => String::new(),
            other => other.to_display().unwrap_or_default(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; numeric strings count
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) if is_number(s.trim()) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Integral view; floats with a fractional part are rejected
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Element count for strings (characters), lists and maps
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        match self {
            Value::Int(_) | Value::Float(_) => true,
            Value::String(s) => is_number(s.trim()),
            _ => false,
        }
    }

    /// Loose equality (`==`)
    pub fn loose_eq(&self, other: &Value) -> bool {
        if self.is_numeric() && other.is_numeric() {
            return self.as_f64() == other.as_f64();
        }
        match (self, other) {
            (Value::Null, v) | (v, Value::Null) => !v.is_truthy(),
            (Value::Bool(a), v) | (v, Value::Bool(a)) => *a == v.is_truthy(),
            _ => self.strict_eq(other),
        }
    }

    /// Strict equality (`===`): same variant and same content
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.strict_eq(w)))
            }
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_numeric() && other.is_numeric() {
            return self.as_f64()?.partial_cmp(&other.as_f64()?);
        }
        Some(self.to_text().cmp(&other.to_text()))
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Map(map) => f.debug_map().entries(map.iter()).finish(),
            Value::Object(obj) => write!(f, "Object({})", obj.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

/// HTML-escape text for `{{ }}` output
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<Arc<dyn HostObject>> for Value {
    fn from(obj: Arc<dyn HostObject>) -> Self {
        Value::Object(obj)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Build a map value from key/value pairs
pub fn map_of<I, K, V>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<IndexMap<_, _>>(),
    )
}

/// Build a [`Context`] from a JSON object; other JSON values give an empty context
pub fn context_from_json(json: serde_json::Value) -> Context {
    match Value::from(json) {
        Value::Map(map) => map,
        _ => Context::new(),
    }
}

/// Compile-time knowledge about a variable, derived from a sample value
#[derive(Clone, Default)]
pub enum Shape {
    /// Nothing known; member segments resolve at render time
    #[default]
    Unknown,
    Scalar,
    List(Option<Box<Value>>),
    Map(IndexMap<String, Value>),
    Object(Arc<dyn HostObject>),
}

impl Shape {
    pub fn of(value: &Value) -> Shape {
        match value {
            Value::List(items) => Shape::List(items.first().cloned().map(Box::new)),
            Value::Map(map) => Shape::Map(map.clone()),
            Value::Object(obj) => Shape::Object(Arc::clone(obj)),
            _ => Shape::Scalar,
        }
    }

    /// Shape of the value found under `key`
    pub fn child(&self, key: &str) -> Shape {
        match self {
            Shape::Map(map) => map.get(key).map(Shape::of).unwrap_or_default(),
            Shape::List(sample) => sample.as_deref().map(Shape::of).unwrap_or_default(),
            Shape::Object(obj) => obj.field(key).map(|v| Shape::of(&v)).unwrap_or_default(),
            _ => Shape::Unknown,
        }
    }

    /// Shape of one element when iterating
    pub fn element(&self) -> Shape {
        match self {
            Shape::List(sample) => sample.as_deref().map(Shape::of).unwrap_or_default(),
            Shape::Map(map) => map.values().next().map(Shape::of).unwrap_or_default(),
            _ => Shape::Unknown,
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Unknown => write!(f, "Unknown"),
            Shape::Scalar => write!(f, "Scalar"),
            Shape::List(_) => write!(f, "List"),
            Shape::Map(_) => write!(f, "Map"),
            Shape::Object(obj) => write!(f, "Object({})", obj.type_name()),
        }
    }
}

/// Source of variable shapes for the expression resolver
pub trait ShapeLookup {
    fn shape_of(&self, name: &str) -> Option<Shape>;
}

impl ShapeLookup for Context {
    fn shape_of(&self, name: &str) -> Option<Shape> {
        self.get(name).map(Shape::of)
    }
}

/// A lookup that knows no variables
pub struct NoShapes;

impl ShapeLookup for NoShapes {
    fn shape_of(&self, _name: &str) -> Option<Shape> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Person {
        name: String,
        nickname: String,
    }

    impl HostObject for Person {
        fn type_name(&self) -> &str {
            "Person"
        }

        fn field(&self, name: &str) -> Option<Value> {
            match name {
                "nickname" => Some(Value::from(self.nickname.as_str())),
                _ => None,
            }
        }

        fn has_method(&self, name: &str) -> bool {
            matches!(name, "getName" | "shout")
        }

        fn call(&self, name: &str, _args: &[Value]) -> Option<Result<Value, CallError>> {
            match name {
                "getName" => Some(Ok(Value::from(self.name.as_str()))),
                "shout" => Some(Ok(Value::from(self.name.to_uppercase()))),
                _ => None,
            }
        }
    }

    fn person() -> Value {
        Value::Object(Arc::new(Person {
            name: "john".to_string(),
            nickname: "jj".to_string(),
        }))
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::from("0").is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::from("false").is_truthy());
        assert!(Value::Float(0.5).is_truthy());
        assert!(person().is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(30).to_display().as_deref(), Some("30"));
        assert_eq!(Value::Float(2.0).to_display().as_deref(), Some("2"));
        assert_eq!(Value::Float(2.5).to_display().as_deref(), Some("2.5"));
        assert_eq!(Value::Bool(true).to_display().as_deref(), Some("1"));
        assert_eq!(Value::Bool(false).to_display().as_deref(), Some(""));
        assert_eq!(Value::List(vec![]).to_display(), None);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#039;Jerry&#039;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_object_member_chain() {
        let p = person();
        // direct member
        assert_eq!(p.try_read("nickname").unwrap(), Some(Value::from("jj")));
        // bare method
        assert_eq!(p.try_read("shout").unwrap(), Some(Value::from("JOHN")));
        // getter convention
        assert_eq!(p.try_read("name").unwrap(), Some(Value::from("john")));
        assert_eq!(p.try_read("age").unwrap(), None);
    }

    #[test]
    fn test_list_and_map_reads() {
        let list = Value::from(vec!["a", "b"]);
        assert_eq!(list.try_read("1").unwrap(), Some(Value::from("b")));
        assert_eq!(list.try_read("x").unwrap(), None);

        let mut map = IndexMap::new();
        map.insert("k".to_string(), Value::Int(1));
        assert_eq!(Value::Map(map).try_read("k").unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_comparisons() {
        assert!(Value::Int(30).loose_eq(&Value::from("30")));
        assert!(!Value::Int(30).strict_eq(&Value::from("30")));
        assert_eq!(Value::Int(15).compare(&Value::Int(18)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert!(Value::Null.loose_eq(&Value::Bool(false)));
    }

    #[test]
    fn test_only_decimal_strings_are_numeric() {
        assert!(Value::from(" 2.50 ").loose_eq(&Value::Float(2.5)));
        assert!(Value::from("-3").loose_eq(&Value::Int(-3)));
        assert!(Value::from("nan").loose_eq(&Value::from("nan")));
        assert!(!Value::from("inf").loose_eq(&Value::from("infinity")));
        assert_eq!(Value::from("nan").as_f64(), None);
        assert_eq!(Value::from("1e3").as_f64(), None);
        assert_eq!(
            Value::from("inf").compare(&Value::from("abc")),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({"name": "John", "age": 30, "tags": ["a"], "ratio": 0.5});
        let ctx = context_from_json(json);
        assert_eq!(ctx.get("name"), Some(&Value::from("John")));
        assert_eq!(ctx.get("age"), Some(&Value::Int(30)));
        assert_eq!(ctx.get("ratio"), Some(&Value::Float(0.5)));
        let keys: Vec<_> = ctx.keys().cloned().collect();
        assert_eq!(keys, vec!["name", "age", "tags", "ratio"]);
    }

    #[test]
    fn test_getter_name() {
        assert_eq!(getter_name("name"), "getName");
        assert_eq!(getter_name("firstName"), "getFirstName");
    }

    #[test]
    fn test_shape_children() {
        let mut user = IndexMap::new();
        user.insert("name".to_string(), Value::from("A"));
        let users = Value::List(vec![Value::Map(user)]);
        let shape = Shape::of(&users);
        assert!(matches!(shape, Shape::List(Some(_))));
        assert!(matches!(shape.element(), Shape::Map(_)));
        assert!(matches!(shape.element().child("name"), Shape::Scalar));
        assert!(matches!(Shape::of(&Value::List(vec![])).element(), Shape::Unknown));
    }
}
