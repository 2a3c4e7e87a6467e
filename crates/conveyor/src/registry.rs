//! Registry of reader and writer plugins.

use crate::plugin::{ReaderFactory, WriterFactory};
use indexmap::IndexMap;
use std::sync::Arc;

/// Registry of available plugins, keyed by name.
///
/// Containers resolve the factories they need once, at construction time;
/// nothing below the container looks plugins up by name.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    readers: IndexMap<String, Arc<dyn ReaderFactory>>,
    writers: IndexMap<String, Arc<dyn WriterFactory>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader factory, replacing any reader of the same name.
    pub fn register_reader(&mut self, factory: impl ReaderFactory + 'static) {
        self.readers
            .insert(factory.name().to_string(), Arc::new(factory));
    }

    /// Register a writer factory, replacing any writer of the same name.
    pub fn register_writer(&mut self, factory: impl WriterFactory + 'static) {
        self.writers
            .insert(factory.name().to_string(), Arc::new(factory));
    }

    pub fn reader(&self, name: &str) -> Option<Arc<dyn ReaderFactory>> {
        self.readers.get(name).cloned()
    }

    pub fn writer(&self, name: &str) -> Option<Arc<dyn WriterFactory>> {
        self.writers.get(name).cloned()
    }

    /// Iterate over all reader factories in registration order.
    pub fn readers(&self) -> impl Iterator<Item = &Arc<dyn ReaderFactory>> {
        self.readers.values()
    }

    /// Iterate over all writer factories in registration order.
    pub fn writers(&self) -> impl Iterator<Item = &Arc<dyn WriterFactory>> {
        self.writers.values()
    }

    /// Number of registered plugins, readers and writers combined.
    pub fn len(&self) -> usize {
        self.readers.len() + self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty() && self.writers.is_empty()
    }
}
