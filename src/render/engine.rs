use tracing::{debug, trace};

use super::config::EngineConfig;
use super::error::RenderError;
use super::evaluator::{Evaluator, TemplateLoader};
use super::scope::Scope;
use super::state::RenderState;
use crate::functions::{
    register_builtins, CallError, Callable, DirectiveScope, FunctionRegistry, RegistryError,
};
use crate::parser::{Compiler, Template};
use crate::store::{FileStore, SourceStore, TemplateId};
use crate::value::{Context, Value};

/// Compiles templates on demand and renders them with data
///
/// A template is recompiled when its source is newer than the stored
/// compiled form; otherwise the compiled form is decoded and reused.
pub struct Engine<S: SourceStore = FileStore> {
    config: EngineConfig,
    store: S,
    registry: FunctionRegistry,
    shared: Context,
}

impl Engine<FileStore> {
    /// Engine reading sources from `config.template_dir`
    pub fn new(config: EngineConfig) -> Result<Self, RegistryError> {
        let store = FileStore::new(
            config.template_dir.clone(),
            config.cache_dir.clone(),
            config.extension.clone(),
        );
        Self::with_store(config, store)
    }
}

impl<S: SourceStore> Engine<S> {
    pub fn with_store(config: EngineConfig, store: S) -> Result<Self, RegistryError> {
        let mut registry = FunctionRegistry::new();
        if config.builtins {
            register_builtins(&mut registry)?;
        }
        Ok(Self {
            config,
            store,
            registry,
            shared: Context::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Make `value` visible to every render; per-render data wins on conflict
    pub fn share(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.shared.insert(name.into(), value.into());
        self
    }

    pub fn share_all(&mut self, data: Context) -> &mut Self {
        self.shared.extend(data);
        self
    }

    pub fn add_filter<F>(&mut self, name: &str, f: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.registry.register_filter(name, Callable::callback(f))?;
        Ok(self)
    }

    pub fn add_function<F>(&mut self, name: &str, f: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.registry.register_function(name, Callable::callback(f))?;
        Ok(self)
    }

    /// Register `@name(args)`; the callback's result is written unescaped
    pub fn add_directive<F>(&mut self, name: &str, f: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.registry.register_directive(name, Callable::callback(f))?;
        Ok(self)
    }

    /// Register `@name(args) ... @else ... @endname`
    pub fn add_condition<F>(&mut self, name: &str, f: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.registry.register_condition(
            name,
            Callable::callback(move |args: &[Value]| Ok(Value::Bool(f(args)))),
        )?;
        Ok(self)
    }

    /// Render template `id` with `data`
    pub fn render(&self, id: &str, data: Context) -> Result<String, RenderError> {
        self.render_with(id, data, None)
    }

    /// Render with extra directives that exist for this call only
    pub fn render_scoped(
        &self,
        id: &str,
        data: Context,
        directives: &DirectiveScope,
    ) -> Result<String, RenderError> {
        self.render_with(id, data, Some(directives))
    }

    /// Compiled form of `id`, compiling it first if the stored form is stale
    pub fn compile(&self, id: &str, data: &Context) -> Result<Template, RenderError> {
        Loader {
            engine: self,
            directives: None,
        }
        .load(id, data)
    }

    fn render_with(
        &self,
        id: &str,
        data: Context,
        directives: Option<&DirectiveScope>,
    ) -> Result<String, RenderError> {
        let loader = Loader {
            engine: self,
            directives,
        };
        let mut state = RenderState::new();
        let mut context = self.shared.clone();
        context.extend(data);

        let mut current = id.to_string();
        let mut layouts = 0;
        loop {
            let template = loader.load(&current, &context)?;
            let output = {
                let mut evaluator = Evaluator::new(
                    &self.registry,
                    directives,
                    &loader,
                    &self.config,
                    &mut state,
                );
                evaluator.render_document(&template, &mut Scope::new(context.clone()))?
            };

            let Some(layout) = state.take_layout() else {
                return Ok(output);
            };
            layouts += 1;
            if layouts > self.config.max_layout_depth {
                return Err(RenderError::LayoutDepth {
                    limit: self.config.max_layout_depth,
                });
            }
            trace!(template = %current, layout = %layout.id, "rendering layout");
            context.extend(layout.data);
            current = layout.id;
        }
    }
}

struct Loader<'e, S: SourceStore> {
    engine: &'e Engine<S>,
    directives: Option<&'e DirectiveScope>,
}

impl<S: SourceStore> TemplateLoader for Loader<'_, S> {
    fn load(&self, id: &str, data: &Context) -> Result<Template, RenderError> {
        let id: TemplateId = id.parse()?;
        let store = &self.engine.store;
        if !store.exists(&id) {
            return Err(RenderError::TemplateNotFound { id: id.to_string() });
        }

        let stale = store.is_stale_or_missing(&id)?;
        debug!(template = %id, stale, "loading template");
        if !stale {
            let json = store.read_compiled(&id)?;
            return Template::from_json(&json).map_err(|source| RenderError::CompiledForm {
                template: id.to_string(),
                source,
            });
        }

        let source = store.read(&id)?;
        let mut compiler = Compiler::new(&self.engine.registry);
        if let Some(directives) = self.directives {
            compiler = compiler.with_scope(directives);
        }
        let template =
            compiler
                .compile_with(&source, data)
                .map_err(|source| RenderError::Compile {
                    template: id.to_string(),
                    source,
                })?;
        let json = template.to_json().map_err(|source| RenderError::CompiledForm {
            template: id.to_string(),
            source,
        })?;
        store.write_compiled(&id, &json)?;
        debug!(template = %id, location = %store.compiled_location(&id), "compiled");
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::value::map_of;
    use pretty_assertions::assert_eq;

    fn engine(sources: &[(&str, &str)]) -> Engine<MemoryStore> {
        let store = MemoryStore::new();
        for (id, text) in sources {
            store.set_source(id, *text).unwrap();
        }
        Engine::with_store(EngineConfig::default(), store).unwrap()
    }

    fn ctx(value: Value) -> Context {
        match value {
            Value::Map(map) => map,
            _ => Context::new(),
        }
    }

    #[test]
    fn test_render_compiles_once() {
        let engine = engine(&[("hello", "Hi {{ name }}")]);
        let data = ctx(map_of([("name", "Ann")]));
        assert_eq!(engine.render("hello", data.clone()).unwrap(), "Hi Ann");
        assert_eq!(engine.render("hello", data).unwrap(), "Hi Ann");
        assert_eq!(engine.store().compiled_count(), 1);
    }

    #[test]
    fn test_source_change_recompiles() {
        let engine = engine(&[("page", "one")]);
        assert_eq!(engine.render("page", Context::new()).unwrap(), "one");
        engine
            .store()
            .set_source("page", "two")
            .unwrap();
        assert_eq!(engine.render("page", Context::new()).unwrap(), "two");
    }

    #[test]
    fn test_missing_template() {
        let engine = engine(&[]);
        assert!(matches!(
            engine.render("nope", Context::new()),
            Err(RenderError::TemplateNotFound { ref id }) if id == "nope"
        ));
    }

    #[test]
    fn test_shared_data_is_overridden_per_render() {
        let mut engine = engine(&[("t", "{{ site }}/{{ user }}")]);
        engine.share("site", "example").share("user", "nobody");
        assert_eq!(
            engine
                .render("t", ctx(map_of([("user", "ann")])))
                .unwrap(),
            "example/ann"
        );
    }

    #[test]
    fn test_layout_replaces_child_output() {
        let engine = engine(&[
            ("base", "<title>@yield('title')</title>@yield('body')"),
            (
                "child",
                "ignored@extends('base')@section('title', 'Home')@section('body')\nHello\n@endsection",
            ),
        ]);
        assert_eq!(
            engine.render("child", Context::new()).unwrap(),
            "<title>Home</title>Hello\n"
        );
    }

    #[test]
    fn test_layout_chain_is_bounded() {
        let store = MemoryStore::new();
        store
            .set_source("a", "@extends('a')")
            .unwrap();
        let engine =
            Engine::with_store(EngineConfig::default().with_max_layout_depth(3), store).unwrap();
        assert!(matches!(
            engine.render("a", Context::new()),
            Err(RenderError::LayoutDepth { limit: 3 })
        ));
    }

    #[test]
    fn test_custom_registrations() {
        let mut engine = engine(&[("t", "{{ 'a'|twice }}@shout('x') @admin(role)yes@else no@endadmin")]);
        engine
            .add_filter("twice", |args: &[Value]| {
                Ok(Value::from(args[0].to_text().repeat(2)))
            })
            .unwrap()
            .add_directive("shout", |args: &[Value]| {
                Ok(Value::from(args[0].to_text().to_uppercase()))
            })
            .unwrap()
            .add_condition("admin", |args: &[Value]| {
                args.first().and_then(Value::as_str) == Some("admin")
            })
            .unwrap();
        assert_eq!(
            engine
                .render("t", ctx(map_of([("role", "admin")])))
                .unwrap(),
            "aaX yes"
        );
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut engine = engine(&[]);
        let result = engine.add_filter("upper", |args: &[Value]| Ok(args[0].clone()));
        assert!(matches!(result, Err(RegistryError::Conflict { .. })));
    }

    #[test]
    fn test_unlexable_directive_name_is_rejected() {
        let mut engine = engine(&[]);
        let result = engine.add_directive("myWidget", |_: &[Value]| Ok(Value::Null));
        assert!(matches!(result, Err(RegistryError::InvalidName { .. })));
        assert!(engine.add_condition("is_admin", |_: &[Value]| true).is_err());
    }

    #[test]
    fn test_scoped_directive() {
        let engine = engine(&[("t", "@stamp()")]);
        let scope = DirectiveScope::new()
            .with("stamp", |_: &[Value]| Ok(Value::from("T")))
            .unwrap();
        assert_eq!(
            engine.render_scoped("t", Context::new(), &scope).unwrap(),
            "T"
        );
    }

    #[test]
    fn test_compile_error_names_template() {
        let engine = engine(&[("bad", "@if(x)")]);
        let err = engine.render("bad", Context::new()).unwrap_err();
        assert!(matches!(err, RenderError::Compile { ref template, .. } if template == "bad"));
    }
}
