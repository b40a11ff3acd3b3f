use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{SourceStore, StoreError, TemplateId};

#[derive(Debug, Default)]
struct Entries {
    /// Logical clock; every write takes the next tick
    clock: u64,
    sources: HashMap<TemplateId, (String, u64)>,
    compiled: HashMap<TemplateId, (String, u64)>,
}

impl Entries {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// In-process template store
///
/// Replacing a source with [`MemoryStore::set_source`] makes any compiled
/// form written before it stale.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryStore::set_source`]
    pub fn with_source(self, id: &str, text: impl Into<String>) -> Result<Self, StoreError> {
        self.set_source(id, text)?;
        Ok(self)
    }

    pub fn set_source(&self, id: &str, text: impl Into<String>) -> Result<(), StoreError> {
        let id = TemplateId::new(id)?;
        let mut entries = self.lock();
        let stamp = entries.tick();
        entries.sources.insert(id, (text.into(), stamp));
        Ok(())
    }

    /// Number of compiled forms currently stored
    pub fn compiled_count(&self) -> usize {
        self.lock().compiled.len()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SourceStore for MemoryStore {
    fn read(&self, id: &TemplateId) -> Result<String, StoreError> {
        self.lock()
            .sources
            .get(id)
            .map(|(text, _)| text.clone())
            .ok_or_else(|| StoreError::SourceNotFound {
                id: id.to_string(),
                location: self.compiled_location(id),
            })
    }

    fn exists(&self, id: &TemplateId) -> bool {
        self.lock().sources.contains_key(id)
    }

    fn is_stale_or_missing(&self, id: &TemplateId) -> Result<bool, StoreError> {
        let entries = self.lock();
        let (_, source_stamp) =
            entries
                .sources
                .get(id)
                .ok_or_else(|| StoreError::SourceNotFound {
                    id: id.to_string(),
                    location: format!("memory:{}", id),
                })?;
        Ok(match entries.compiled.get(id) {
            Some((_, compiled_stamp)) => compiled_stamp < source_stamp,
            None => true,
        })
    }

    fn write_compiled(&self, id: &TemplateId, compiled: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        let stamp = entries.tick();
        entries
            .compiled
            .insert(id.clone(), (compiled.to_string(), stamp));
        Ok(())
    }

    fn read_compiled(&self, id: &TemplateId) -> Result<String, StoreError> {
        self.lock()
            .compiled
            .get(id)
            .map(|(text, _)| text.clone())
            .ok_or_else(|| StoreError::CompiledMissing { id: id.to_string() })
    }

    fn compiled_location(&self, id: &TemplateId) -> String {
        format!("memory:{}", id)
    }
}
