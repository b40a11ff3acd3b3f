//! Engine configuration

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read engine config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse engine config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Configuration options for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Root directory of template sources
    pub template_dir: PathBuf,

    /// Directory for compiled forms
    pub cache_dir: PathBuf,

    /// File suffix of template sources
    pub extension: String,

    /// Emitted by `@yield` for a section that was never defined
    pub section_fallback: String,

    /// Upper bound on `@while` iterations in one loop
    pub max_loop_iterations: usize,

    /// Upper bound on nested `@include`/`@each`
    pub max_include_depth: usize,

    /// Upper bound on `@extends` chains
    pub max_layout_depth: usize,

    /// Register the builtin filters and functions
    pub builtins: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("templates"),
            cache_dir: PathBuf::from("cache"),
            extension: ".tpl".to_string(),
            section_fallback: String::new(),
            max_loop_iterations: 10_000,
            max_include_depth: 32,
            max_layout_depth: 16,
            builtins: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string; missing keys take defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_section_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.section_fallback = fallback.into();
        self
    }

    pub fn with_max_loop_iterations(mut self, max: usize) -> Self {
        self.max_loop_iterations = max;
        self
    }

    pub fn with_max_include_depth(mut self, max: usize) -> Self {
        self.max_include_depth = max;
        self
    }

    pub fn with_max_layout_depth(mut self, max: usize) -> Self {
        self.max_layout_depth = max;
        self
    }

    /// Skip registering the builtin filters and functions
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }
}
