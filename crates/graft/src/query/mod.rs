//! Compiled queries.

mod exec;
mod predicate;


use std::fmt;

use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::language::Language;
use crate::native::{QueryId, QueryRange};
use crate::node::SyntaxNode;

pub use exec::{CaptureResult, QueryCapture, QueryMatch};
pub use predicate::Properties;

use predicate::PatternPredicates;

/// A query compiled by the native engine, with its predicates compiled here.
///
/// Immutable once built and reusable across trees of its language.
pub struct Query {
    engine: Engine,
    id: QueryId,
    language: Language,
    patterns: Vec<PatternPredicates>,
}

impl Query {
    pub(crate) fn new(engine: &Engine, language: &Language, source: &str) -> Result<Self> {
        if !language.engine().ptr_eq(engine) {
            return Err(Error::ForeignLanguage);
        }
        let language_id = language.id();
        let id = engine.with_native(|native| native.new_query(language_id, source))?;
        let mut query = Self {
            engine: engine.clone(),
            id,
            language: language.clone(),
            patterns: Vec::new(),
        };

        let descriptors = engine.with_native(|native| native.query_predicates(id));
        query.patterns = predicate::compile(&descriptors)?;

        debug!(
            query = id.get(),
            patterns = query.patterns.len(),
            predicates = query.patterns.iter().map(|p| p.filters.len()).sum::<usize>(),
            "compiled query"
        );
        Ok(query)
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Number of filtering predicates (`#eq?`, `#not-eq?`, `#match?`) on a pattern.
    pub fn filter_count(&self, pattern: usize) -> usize {
        self.patterns.get(pattern).map_or(0, |p| p.filters.len())
    }

    pub fn set_properties(&self, pattern: usize) -> Option<&Properties> {
        self.patterns.get(pattern)?.set_properties.as_deref()
    }

    pub fn asserted_properties(&self, pattern: usize) -> Option<&Properties> {
        self.patterns.get(pattern)?.asserted_properties.as_deref()
    }

    pub fn refuted_properties(&self, pattern: usize) -> Option<&Properties> {
        self.patterns.get(pattern)?.refuted_properties.as_deref()
    }

    /// Matches under `root` that pass every predicate, one per match.
    pub fn matches(&self, root: &SyntaxNode, range: QueryRange) -> Result<Vec<QueryMatch>> {
        exec::matches(self, root, range)
    }

    /// Captures of matches under `root` that pass every predicate, one per
    /// capture.
    pub fn captures(&self, root: &SyntaxNode, range: QueryRange) -> Result<Vec<CaptureResult>> {
        exec::captures(self, root, range)
    }

    /// Bounds were checked against `pattern_count` when the stream was split.
    pub(crate) fn pattern(&self, pattern: u32) -> &PatternPredicates {
        &self.patterns[pattern as usize]
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        let id = self.id;
        self.engine
            .release("query", id.get(), |native| native.delete_query(id));
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("language", &self.language.id())
            .field("patterns", &self.patterns.len())
            .finish()
    }
}
