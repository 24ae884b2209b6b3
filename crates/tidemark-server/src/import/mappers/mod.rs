use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use tidemark_core::event::CanonicalEvent;
use tidemark_core::import::ImportSource;

pub mod derive;
pub mod fields;
pub mod simple_analytics;
pub mod umami;

pub use fields::{FieldRule, FieldSpec, SourceRow};
pub use simple_analytics::SimpleAnalyticsMapper;
pub use umami::UmamiMapper;

/// Job-level values stamped onto every event.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub site_id: String,
    pub import_id: String,
}

/// Converts one platform's export rows into canonical events.
///
/// Implementations own their pageview sentinel: the worker never inspects
/// source columns itself.
pub trait SourceMapper: Send + Sync + 'static {
    fn source(&self) -> ImportSource;

    /// Declared columns; drives both the CSV headers and row validation.
    fn fields(&self) -> &'static [FieldSpec];

    fn expected_headers(&self) -> Vec<&'static str> {
        fields::header_names(self.fields())
    }

    /// Event time of the row, or `None` when missing or unparseable.
    fn timestamp(&self, row: &SourceRow) -> Option<DateTime<Utc>>;

    /// Validate and convert a row. `None` drops it.
    fn transform(&self, row: &SourceRow, ctx: &TransformContext) -> Option<CanonicalEvent>;
}

/// Mappers keyed by platform tag.
pub struct MapperRegistry {
    mappers: HashMap<ImportSource, Arc<dyn SourceMapper>>,
}

impl MapperRegistry {
    pub fn empty() -> Self {
        Self {
            mappers: HashMap::new(),
        }
    }

    pub fn register(&mut self, mapper: Arc<dyn SourceMapper>) {
        self.mappers.insert(mapper.source(), mapper);
    }

    pub fn get(&self, source: ImportSource) -> Option<Arc<dyn SourceMapper>> {
        self.mappers.get(&source).cloned()
    }
}

impl Default for MapperRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(UmamiMapper));
        registry.register(Arc::new(SimpleAnalyticsMapper));
        registry
    }
}
