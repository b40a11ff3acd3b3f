use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use super::{SourceStore, StoreError, TemplateId};

/// Sources under a template directory, compiled JSON under a cache directory
#[derive(Debug, Clone)]
pub struct FileStore {
    template_dir: PathBuf,
    cache_dir: PathBuf,
    extension: String,
}

impl FileStore {
    pub fn new(
        template_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            template_dir: template_dir.into(),
            cache_dir: cache_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn source_path(&self, id: &TemplateId) -> PathBuf {
        self.template_dir.join(id.relative_path(&self.extension))
    }

    pub fn compiled_path(&self, id: &TemplateId) -> PathBuf {
        self.cache_dir.join(format!("{}.json", id))
    }

    fn source_not_found(&self, id: &TemplateId) -> StoreError {
        StoreError::SourceNotFound {
            id: id.to_string(),
            location: self.source_path(id).display().to_string(),
        }
    }
}

fn modified(path: &Path) -> Result<SystemTime, StoreError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| StoreError::io(path, e))
}

impl SourceStore for FileStore {
    fn read(&self, id: &TemplateId) -> Result<String, StoreError> {
        let path = self.source_path(id);
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => self.source_not_found(id),
            _ => StoreError::io(path, e),
        })
    }

    fn exists(&self, id: &TemplateId) -> bool {
        self.source_path(id).is_file()
    }

    fn is_stale_or_missing(&self, id: &TemplateId) -> Result<bool, StoreError> {
        let source = self.source_path(id);
        if !source.is_file() {
            return Err(self.source_not_found(id));
        }
        let compiled = self.compiled_path(id);
        if !compiled.is_file() {
            return Ok(true);
        }
        Ok(modified(&compiled)? < modified(&source)?)
    }

    fn write_compiled(&self, id: &TemplateId, compiled: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| StoreError::io(&self.cache_dir, e))?;
        let target = self.compiled_path(id);
        let tmp = self
            .cache_dir
            .join(format!(".{}.{}.tmp", id, std::process::id()));
        fs::write(&tmp, compiled).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &target).map_err(|e| StoreError::io(&target, e))?;
        debug!(template = %id, path = %target.display(), "wrote compiled form");
        Ok(())
    }

    fn read_compiled(&self, id: &TemplateId) -> Result<String, StoreError> {
        let path = self.compiled_path(id);
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::CompiledMissing { id: id.to_string() },
            _ => StoreError::io(path, e),
        })
    }

    fn compiled_location(&self, id: &TemplateId) -> String {
        self.compiled_path(id).display().to_string()
    }
}
