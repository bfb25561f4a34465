//! Mapping from intention variants to the collectors that run them.

use crate::scheduler::{
    domain::IntentionKindTag,
    ports::{Collector, CollectorError, CollectorResult},
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Collectors keyed by the variant they handle.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: HashMap<IntentionKindTag, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `collector` for `tag`, replacing any previous one.
    #[must_use]
    pub fn with_collector(mut self, tag: IntentionKindTag, collector: Arc<dyn Collector>) -> Self {
        self.register(tag, collector);
        self
    }

    /// Registers `collector` for `tag`, replacing any previous one.
    pub fn register(&mut self, tag: IntentionKindTag, collector: Arc<dyn Collector>) {
        self.collectors.insert(tag, collector);
    }

    /// Returns the collector for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::NotRegistered`] when no collector handles
    /// the variant.
    pub fn get(&self, tag: IntentionKindTag) -> CollectorResult<Arc<dyn Collector>> {
        self.collectors
            .get(&tag)
            .cloned()
            .ok_or(CollectorError::NotRegistered(tag))
    }

    /// Returns the registered variants in polling order.
    #[must_use]
    pub fn tags(&self) -> Vec<IntentionKindTag> {
        IntentionKindTag::ALL
            .into_iter()
            .filter(|tag| self.collectors.contains_key(tag))
            .collect()
    }
}

impl fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
