//! Filters, functions and custom directives callable from templates
//!
//! Filters and functions live in separate namespaces of one
//! [`FunctionRegistry`]. The compiler consults it to reject unknown names
//! early; the renderer consults it again to invoke them.

mod builtins;
mod registry;

pub use builtins::register_builtins;
pub use registry::{
    Arity, CallError, Callable, CallbackFn, DirectiveScope, FunctionRegistry, Kind, NativeFn,
    RegistryError,
};
