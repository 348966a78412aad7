//! Name-to-constructor table of archive sources.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{ArchiveSource, LocSource, SourceContext, SourceError};

/// Builds a source from the shared request context.
pub type SourceConstructor = fn(SourceContext) -> Arc<dyn ArchiveSource>;

/// Registered archive sources, keyed by machine name.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    constructors: BTreeMap<&'static str, SourceConstructor>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a source constructor.
    pub fn register(&mut self, name: &'static str, constructor: SourceConstructor) {
        debug!(name, "registering archive source");
        self.constructors.insert(name, constructor);
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    /// Builds the source registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnknownSource`] for unregistered names.
    pub fn build(&self, name: &str, ctx: SourceContext) -> Result<Arc<dyn ArchiveSource>, SourceError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| SourceError::UnknownSource {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;
        Ok(constructor(ctx))
    }
}

/// Registry with every built-in source.
#[must_use]
pub fn build_default_source_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register("loc", loc_source);
    registry
}

fn loc_source(ctx: SourceContext) -> Arc<dyn ArchiveSource> {
    Arc::new(LocSource::new(ctx))
}
