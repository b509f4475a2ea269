//! Graft: an identity-preserving syntax node model over a native incremental
//! parsing engine.
//!
//! Nodes cross the native boundary as six-word records through a single
//! transfer buffer owned by an [`Engine`]. Each [`Tree`] keeps a weak identity
//! cache, so the same native node always comes back as the same
//! [`SyntaxNode`]. [`Query`] compiles the text predicates of a native query
//! once and applies them to every match.
//!
//! ```ignore
//! let engine = Engine::new(native);
//! let language = engine.language(language_id)?;
//! let mut parser = engine.parser();
//! parser.set_language(&language)?;
//! let tree = parser.parse("x + x", None, &ParseOptions::new())?;
//! let query = engine.query(&language, "(binary_expression) @b")?;
//! let matches = query.matches(&tree.root_node(), QueryRange::new())?;
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod cache;
mod cursor;
mod engine;
mod error;
mod invariants;
mod language;
mod native;
mod node;
mod parser;
pub mod query;
mod transfer;
mod tree;

#[cfg(test)]
pub(crate) mod test_utils;


pub use cursor::TreeCursor;
pub use engine::Engine;
pub use error::{Error, PredicateError, Result};
pub use language::{FieldAccessor, GENERIC_CLASS_NAME, Language, NodeClass};
pub use native::{
    ChunkFn, CursorId, CursorMove, LanguageId, LanguageTables, LogType, Logger, Nav, NavMany,
    Native, NativeError, ParseOptions, PredicateStep, QueryId, QueryRange, RawMatches, Slot,
    StreamItem, TreeId,
};
pub use node::{FieldValue, NodeSummary, SyntaxNode};
pub use parser::Parser;
pub use query::{CaptureResult, Properties, Query, QueryCapture, QueryMatch};
pub use transfer::Exchange;
pub use tree::{TextInput, Tree};

pub use graft_core::{InputEdit, NodeFieldId, NodeTypeId, Point, Range};
