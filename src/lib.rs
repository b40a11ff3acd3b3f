//! Trellis - a compiler and renderer for an HTML template language
//!
//! Templates mix literal text with `{{ expr }}` interpolation and
//! `@directive(args)` control tags. A template is compiled once into a
//! serializable instruction tree, cached by a [`SourceStore`], and rendered
//! with a map of [`Value`]s.
//!
//! # Example
//!
//! ```rust
//! use trellis::{context_from_json, render_str};
//!
//! let data = context_from_json(serde_json::json!({ "name": "John", "age": 30 }));
//! let out = render_str("{{ name }} is {{ age }}", data).unwrap();
//! assert_eq!(out, "John is 30");
//! ```

pub mod error;
pub mod functions;
pub mod parser;
pub mod render;
pub mod store;
pub mod value;

pub use error::{CompileError, ExprError, Span};
pub use functions::{
    register_builtins, Arity, CallError, Callable, DirectiveScope, FunctionRegistry, Kind,
    RegistryError,
};
pub use parser::{Compiler, Template};
pub use render::{ConfigError, Engine, EngineConfig, RenderError};
pub use store::{FileStore, MemoryStore, SourceStore, StoreError, TemplateId};
pub use value::{context_from_json, map_of, Context, FieldReadable, HostObject, Value};

/// Id under which [`render_str`] stores its template
const INLINE_ID: &str = "inline";

/// Compile and render template text with the builtin filters
///
/// # Example
///
/// ```rust
/// use trellis::{render_str, Context};
///
/// let out = render_str("@foreach(range(1, 3) as i){{ i }}@endforeach", Context::new()).unwrap();
/// assert_eq!(out, "123");
/// ```
pub fn render_str(text: &str, data: Context) -> Result<String, RenderError> {
    let store = MemoryStore::new().with_source(INLINE_ID, text)?;
    let engine = Engine::with_store(EngineConfig::default(), store)?;
    engine.render(INLINE_ID, data)
}
