//! The native parsing engine, seen from the managed side.
//!
//! Handles are opaque `u32`s. Node-level calls operate on whatever node was
//! most recently marshaled into the [`Exchange`]; node-producing calls write
//! their results through [`Exchange::emit`] and hand back [`Slot`]s.

use std::rc::Rc;

use graft_core::{InputEdit, NodeFieldId, NodeKind, NodeTypeId, Point, PredicateStepType, Range, RawNode};

use crate::transfer::Exchange;

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl $name {
                pub fn get(self) -> u32 {
                    self.0
                }
            }
        )*
    };
}

handle! {
    /// A language registered with the native engine.
    LanguageId,
    /// A parsed tree owned by the native engine.
    TreeId,
    /// A traversal cursor owned by the native engine.
    CursorId,
    /// A compiled query owned by the native engine.
    QueryId,
}

/// Result of a node-producing native call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// No node.
    Null,
    /// The node is live in the tree's identity cache; nothing was written.
    Cached(u64),
    /// Six words were written at the next buffer offset.
    Fresh(NodeTypeId),
}

/// Single-node navigation from the marshaled node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Nav {
    Parent,
    FirstChild,
    LastChild,
    FirstNamedChild,
    LastNamedChild,
    NextSibling,
    PreviousSibling,
    NextNamedSibling,
    PreviousNamedSibling,
    Child(u32),
    NamedChild(u32),
    FirstChildForIndex(u32),
    FirstNamedChildForIndex(u32),
    DescendantForIndex(u32, u32),
    NamedDescendantForIndex(u32, u32),
    DescendantForPosition(Point, Point),
    NamedDescendantForPosition(Point, Point),
    ChildForFieldId(NodeFieldId),
    /// Nearest proper ancestor whose type is one of these.
    Closest(Vec<String>),
}

/// Multi-node navigation from the marshaled node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavMany {
    Children,
    NamedChildren,
    ChildrenForFieldId(NodeFieldId),
    /// Depth-first descendants of the given types intersecting `[start, end)`.
    DescendantsOfType {
        types: Vec<String>,
        start: Point,
        end: Point,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorMove {
    FirstChild,
    NextSibling,
    Parent,
}

/// One step of a raw predicate descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PredicateStep {
    pub kind: PredicateStepType,
    /// Capture name for `Capture` steps, literal text for `String` steps.
    pub value: String,
}

impl PredicateStep {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            kind: PredicateStepType::String,
            value: value.into(),
        }
    }

    pub fn capture(name: impl Into<String>) -> Self {
        Self {
            kind: PredicateStepType::Capture,
            value: name.into(),
        }
    }

    pub fn done() -> Self {
        Self {
            kind: PredicateStepType::Done,
            value: String::new(),
        }
    }
}

/// Entry of a flat match or capture stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamItem {
    /// Pattern index, or capture index directly after it in a capture stream.
    Index(u32),
    /// Capture name; consumes the next node of the parallel array.
    Name(Rc<str>),
}

/// Raw output of a match or capture search.
#[derive(Clone, Debug, Default)]
pub struct RawMatches {
    pub stream: Vec<StreamItem>,
    pub nodes: Vec<Slot>,
}

/// Metadata tables of one language.
#[derive(Clone, Debug, Default)]
pub struct LanguageTables {
    /// Indexed by node type id.
    pub kinds: Vec<NodeKind>,
    /// Indexed by field id; entry 0 is always `None`.
    pub fields: Vec<Option<String>>,
    /// `node-types.json` descriptors, empty when the language ships none.
    pub node_types: Vec<RawNode>,
}

/// Options for one parse.
#[derive(Clone, Debug, Default)]
pub struct ParseOptions {
    pub(crate) buffer_size: Option<usize>,
    pub(crate) included_ranges: Vec<Range>,
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve string input to the engine in chunks of at most `size` bytes.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Restrict parsing to these ranges of the input.
    pub fn included_ranges(mut self, ranges: Vec<Range>) -> Self {
        self.included_ranges = ranges;
        self
    }

    pub fn get_buffer_size(&self) -> Option<usize> {
        self.buffer_size
    }

    pub fn get_included_ranges(&self) -> &[Range] {
        &self.included_ranges
    }
}

/// Bounds of a match or capture search. A zero `end` means unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryRange {
    pub(crate) start: Point,
    pub(crate) end: Point,
}

impl QueryRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, point: Point) -> Self {
        self.start = point;
        self
    }

    pub fn end(mut self, point: Point) -> Self {
        self.end = point;
        self
    }

    pub fn get_start(&self) -> Point {
        self.start
    }

    pub fn get_end(&self) -> Point {
        self.end
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_zero() && self.end.is_zero()
    }
}

/// Origin of a parser log message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogType {
    Parse,
    Lex,
}

/// Receives parser log messages while [`Native::parse`] runs.
///
/// It is called from inside the native engine, so it must not touch nodes,
/// trees or cursors of the same engine.
pub type Logger = Rc<dyn Fn(LogType, &str)>;

/// Chunk source handed to [`Native::parse`]: `(byte offset, position) -> text`.
/// An empty chunk ends the input.
pub type ChunkFn<'a> = dyn FnMut(usize, Point) -> String + 'a;

/// Errors raised by the native engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NativeError {
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },

    #[error("language rejected: {0}")]
    LanguageRejected(String),

    #[error("parse failed: {0}")]
    ParseFailed(String),

    #[error("query {kind} error at byte {offset}")]
    QuerySyntax { offset: u32, kind: String },

    #[error("invalid included ranges")]
    InvalidRanges,
}

/// A native incremental parsing engine.
///
/// Implementations are driven by exactly one [`crate::Engine`] and are never
/// called reentrantly.
pub trait Native {
    // Languages
    fn language_tables(&mut self, language: LanguageId) -> Result<LanguageTables, NativeError>;

    // Trees
    fn parse(
        &mut self,
        language: LanguageId,
        input: &mut ChunkFn<'_>,
        old_tree: Option<TreeId>,
        options: &ParseOptions,
    ) -> Result<TreeId, NativeError>;
    fn edit_tree(&mut self, tree: TreeId, edit: &InputEdit);
    /// Reposition the marshaled node after an edit, rewriting it in place.
    fn edit_node(&mut self, tree: TreeId, exchange: &mut Exchange<'_>, edit: &InputEdit);
    fn root_node(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> Slot;
    fn changed_ranges(&mut self, old: TreeId, new: TreeId) -> Vec<Range>;
    /// Smallest range covering the nodes changed by edits since the parse.
    fn edited_range(&mut self, tree: TreeId) -> Option<Range>;
    /// Logger for subsequent parses; `None` turns logging off.
    fn set_logger(&mut self, logger: Option<Logger>);
    fn delete_tree(&mut self, tree: TreeId);

    // Nodes
    fn node_type(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> String;
    fn node_type_id(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> NodeTypeId;
    fn is_named(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool;
    fn is_missing(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool;
    fn has_changes(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool;
    fn has_error(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool;
    fn start_index(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32;
    fn end_index(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32;
    /// Writes the point through [`Exchange::write_point`].
    fn start_position(&mut self, tree: TreeId, exchange: &mut Exchange<'_>);
    /// Writes the point through [`Exchange::write_point`].
    fn end_position(&mut self, tree: TreeId, exchange: &mut Exchange<'_>);
    fn child_count(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32;
    fn named_child_count(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32;
    fn to_sexp(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> String;
    fn navigate(&mut self, tree: TreeId, exchange: &mut Exchange<'_>, nav: &Nav) -> Slot;
    fn navigate_many(
        &mut self,
        tree: TreeId,
        exchange: &mut Exchange<'_>,
        nav: &NavMany,
    ) -> Vec<Slot>;

    // Cursors
    /// New cursor positioned at the marshaled node.
    fn walk(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> CursorId;
    fn cursor_goto(&mut self, cursor: CursorId, to: CursorMove) -> bool;
    fn cursor_goto_first_child_for_index(&mut self, cursor: CursorId, index: u32) -> Option<u32>;
    /// Reposition the cursor at the marshaled node of `tree`.
    fn cursor_reset(&mut self, cursor: CursorId, tree: TreeId, exchange: &mut Exchange<'_>);
    fn cursor_current_node(&mut self, cursor: CursorId, exchange: &mut Exchange<'_>) -> Slot;
    fn cursor_current_field_name(&mut self, cursor: CursorId) -> Option<String>;
    /// Writes the point through [`Exchange::write_point`].
    fn cursor_start_position(&mut self, cursor: CursorId, exchange: &mut Exchange<'_>);
    /// Writes the point through [`Exchange::write_point`].
    fn cursor_end_position(&mut self, cursor: CursorId, exchange: &mut Exchange<'_>);
    fn delete_cursor(&mut self, cursor: CursorId);

    // Queries
    fn new_query(&mut self, language: LanguageId, source: &str) -> Result<QueryId, NativeError>;
    /// Per pattern, a flat step list in which `Done` terminates each predicate.
    fn query_predicates(&mut self, query: QueryId) -> Vec<Vec<PredicateStep>>;
    /// Matches under the marshaled node: `Index(pattern)` then capture names.
    fn query_matches(
        &mut self,
        query: QueryId,
        tree: TreeId,
        exchange: &mut Exchange<'_>,
        range: QueryRange,
    ) -> RawMatches;
    /// Captures under the marshaled node: `Index(pattern)`, `Index(capture)`,
    /// then the names of every capture in that match.
    fn query_captures(
        &mut self,
        query: QueryId,
        tree: TreeId,
        exchange: &mut Exchange<'_>,
        range: QueryRange,
    ) -> RawMatches;
    fn delete_query(&mut self, query: QueryId);
}
