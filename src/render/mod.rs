//! Runtime: configuration, the render engine and its interpreter
//!
//! [`Engine`] owns the function registry and a [`SourceStore`](crate::store::SourceStore).
//! Each render builds a fresh [`RenderState`] for sections, stacks and the
//! pending layout, so renders never share mutable state.

mod config;
mod engine;
mod error;
mod evaluator;
mod scope;
mod state;

pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::RenderError;
pub use evaluator::{Evaluator, TemplateLoader};
pub use scope::Scope;
pub use state::{LayoutRequest, RenderState};
