//! Template sources and their compiled forms
//!
//! A [`SourceStore`] maps a [`TemplateId`] to source text and keeps the
//! compiled JSON for it. The compiled form is stale when it is missing or
//! older than the source; it is then regenerated and replaced whole.

mod file;
mod memory;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("template `{id}` not found at {location}")]
    SourceNotFound { id: String, location: String },

    #[error("invalid template identifier `{id}`: {reason}")]
    InvalidIdentifier { id: String, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no compiled form stored for `{id}`")]
    CompiledMissing { id: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Dotted logical template name such as `blog.index`
///
/// Segments are non-empty and use only ASCII alphanumerics, `_` and `-`, so
/// the mapping to a path is collision free and cannot leave the template
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        let invalid = |reason: &str| StoreError::InvalidIdentifier {
            id: id.clone(),
            reason: reason.to_string(),
        };
        if id.is_empty() {
            return Err(invalid("identifier is empty"));
        }
        for segment in id.split('.') {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid(
                    "segments may only contain ASCII letters, digits, `_` and `-`",
                ));
            }
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `a.b.c` becomes `a/b/c{ext}`
    pub fn relative_path(&self, extension: &str) -> PathBuf {
        let mut path: PathBuf = self.0.split('.').collect();
        let file = format!(
            "{}{}",
            path.file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
            extension
        );
        path.set_file_name(file);
        path
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TemplateId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Where template sources live and where their compiled forms are kept
pub trait SourceStore {
    /// Source text of a template
    fn read(&self, id: &TemplateId) -> Result<String, StoreError>;

    fn exists(&self, id: &TemplateId) -> bool;

    /// Whether the compiled form is missing or older than the source
    fn is_stale_or_missing(&self, id: &TemplateId) -> Result<bool, StoreError>;

    /// Replace the compiled form in full
    fn write_compiled(&self, id: &TemplateId, compiled: &str) -> Result<(), StoreError>;

    fn read_compiled(&self, id: &TemplateId) -> Result<String, StoreError>;

    /// Human-readable locator of the compiled form, for diagnostics
    fn compiled_location(&self, id: &TemplateId) -> String;
}

impl<S: SourceStore + ?Sized> SourceStore for &S {
    fn read(&self, id: &TemplateId) -> Result<String, StoreError> {
        (**self).read(id)
    }

    fn exists(&self, id: &TemplateId) -> bool {
        (**self).exists(id)
    }

    fn is_stale_or_missing(&self, id: &TemplateId) -> Result<bool, StoreError> {
        (**self).is_stale_or_missing(id)
    }

    fn write_compiled(&self, id: &TemplateId, compiled: &str) -> Result<(), StoreError> {
        (**self).write_compiled(id, compiled)
    }

    fn read_compiled(&self, id: &TemplateId) -> Result<String, StoreError> {
        (**self).read_compiled(id)
    }

    fn compiled_location(&self, id: &TemplateId) -> String {
        (**self).compiled_location(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_relative_path() {
        let id = TemplateId::new("blog.posts.index").unwrap();
        assert_eq!(
            id.relative_path(".tpl"),
            Path::new("blog").join("posts").join("index.tpl")
        );
        assert_eq!(
            TemplateId::new("home").unwrap().relative_path(".tpl"),
            Path::new("home.tpl")
        );
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        for bad in ["", "a..b", ".a", "a.", "../etc", "a/b", "a b", "a\\b"] {
            assert!(
                matches!(
                    TemplateId::new(bad),
                    Err(StoreError::InvalidIdentifier { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!("mail-v2.user_card".parse::<TemplateId>().is_ok());
    }
}
