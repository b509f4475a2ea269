//! A [`graft::Native`] engine over arborium's tree-sitter runtime.
//!
//! Node records carry the tree-sitter node id in their first two words and
//! the node's four context words after it, so a marshaled record rebuilds the
//! exact native node without any lookup table.
//!
//! ```ignore
//! let mut native = ArboriumNative::new();
//! let javascript = native.register(arborium_javascript::language().into(), None)?;
//! let engine = graft::Engine::new(native);
//! let language = engine.language(javascript)?;
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod convert;
mod cursor;
mod query;


use std::collections::HashMap;
use std::ffi::c_void;

use arborium_tree_sitter as tree_sitter;
use arborium_tree_sitter::{Node, ffi};
use graft::{
    ChunkFn, CursorId, CursorMove, Exchange, LanguageId, LanguageTables, Logger, Nav, NavMany,
    Native, NativeError, ParseOptions, PredicateStep, QueryId, QueryRange, RawMatches, Slot,
    StreamItem, TreeId,
};
use graft_core::{InputEdit, NodeFields, NodeKind, NodeTypeId, Point, Range, RawNode};
use tracing::debug;

use crate::convert::{
    from_ts_log_type, from_ts_point, from_ts_range, saturate, to_ts_edit, to_ts_point, to_ts_range,
};
use crate::cursor::RawCursor;
use crate::query::RawQuery;

struct RegisteredLanguage {
    language: tree_sitter::Language,
    raw: *const ffi::TSLanguage,
    node_types: Vec<RawNode>,
}

/// Owns every tree, cursor and query the managed side holds a handle to.
pub struct ArboriumNative {
    parser: tree_sitter::Parser,
    languages: Vec<RegisteredLanguage>,
    trees: HashMap<u32, tree_sitter::Tree>,
    cursors: HashMap<u32, RawCursor>,
    queries: HashMap<u32, RawQuery>,
    next_handle: u32,
}

impl Default for ArboriumNative {
    fn default() -> Self {
        Self::new()
    }
}

impl ArboriumNative {
    pub fn new() -> Self {
        Self {
            parser: tree_sitter::Parser::new(),
            languages: Vec::new(),
            trees: HashMap::new(),
            cursors: HashMap::new(),
            queries: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Make a grammar available to the managed side.
    ///
    /// `node_types` is the grammar's `node-types.json`; without it every node
    /// gets the generic class.
    pub fn register(
        &mut self,
        language: tree_sitter::Language,
        node_types: Option<&str>,
    ) -> Result<LanguageId, NativeError> {
        self.parser
            .set_language(&language)
            .map_err(|err| NativeError::LanguageRejected(err.to_string()))?;
        let node_types = match node_types {
            Some(json) => graft_core::parse_node_types(json)
                .map_err(|err| NativeError::LanguageRejected(err.to_string()))?,
            None => Vec::new(),
        };

        let id = LanguageId(self.languages.len() as u32);
        debug!(
            language = id.get(),
            kinds = language.node_kind_count(),
            node_types = node_types.len(),
            "registered language"
        );
        // Static grammars ignore reference counts, so the extra copy is never released.
        let raw = language.clone().into_raw();
        self.languages.push(RegisteredLanguage {
            language,
            raw,
            node_types,
        });
        Ok(id)
    }

    fn handle(&mut self) -> u32 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn registered(&self, language: LanguageId) -> Result<&RegisteredLanguage, NativeError> {
        self.languages
            .get(language.0 as usize)
            .ok_or(NativeError::UnknownHandle {
                kind: "language",
                id: language.0,
            })
    }

    fn node<'t>(&'t self, tree: TreeId, exchange: &Exchange<'_>) -> Node<'t> {
        marshaled_node(&self.trees, tree, exchange)
    }

    fn cursor(&mut self, cursor: CursorId) -> &mut RawCursor {
        self.cursors
            .get_mut(&cursor.0)
            .unwrap_or_else(|| unknown_handle("cursor", cursor.0))
    }

    fn search(
        &self,
        query: QueryId,
        tree: TreeId,
        exchange: &mut Exchange<'_>,
        range: QueryRange,
        captures: bool,
    ) -> RawMatches {
        let root = self.node(tree, exchange);
        let query = self
            .queries
            .get(&query.0)
            .unwrap_or_else(|| unknown_handle("query", query.0));

        let mut raw = RawMatches::default();
        for found in query.search(root, range, captures) {
            raw.stream.push(StreamItem::Index(found.pattern));
            if let Some(index) = found.capture_index {
                raw.stream.push(StreamItem::Index(index));
            }
            for (name, node) in found.captures {
                raw.stream.push(StreamItem::Name(name));
                raw.nodes.push(emit(exchange, Some(node)));
            }
        }
        raw
    }
}

impl Native for ArboriumNative {
    fn language_tables(&mut self, language: LanguageId) -> Result<LanguageTables, NativeError> {
        let registered = self.registered(language)?;
        let ts = &registered.language;

        let kinds = (0..ts.node_kind_count())
            .map(|id| {
                let id = id as NodeTypeId;
                NodeKind {
                    name: ts.node_kind_for_id(id).unwrap_or_default().to_owned(),
                    named: ts.node_kind_is_named(id),
                    visible: ts.node_kind_is_visible(id),
                }
            })
            .collect();
        let fields = std::iter::once(None)
            .chain((1..=ts.field_count()).map(|id| ts.field_name_for_id(id as u16).map(str::to_owned)))
            .collect();

        Ok(LanguageTables {
            kinds,
            fields,
            node_types: registered.node_types.clone(),
        })
    }

    fn parse(
        &mut self,
        language: LanguageId,
        input: &mut ChunkFn<'_>,
        old_tree: Option<TreeId>,
        options: &ParseOptions,
    ) -> Result<TreeId, NativeError> {
        let registered = self
            .languages
            .get(language.0 as usize)
            .ok_or(NativeError::UnknownHandle {
                kind: "language",
                id: language.0,
            })?;
        let old = match old_tree {
            Some(id) => Some(self.trees.get(&id.0).ok_or(NativeError::UnknownHandle {
                kind: "tree",
                id: id.0,
            })?),
            None => None,
        };

        let mut text = String::new();
        let mut position = Point::ZERO;
        loop {
            let chunk = input(text.len(), position);
            if chunk.is_empty() {
                break;
            }
            position = position.advance(&chunk);
            text.push_str(&chunk);
        }

        self.parser
            .set_language(&registered.language)
            .map_err(|err| NativeError::LanguageRejected(err.to_string()))?;
        let ranges: Vec<tree_sitter::Range> =
            options.get_included_ranges().iter().map(to_ts_range).collect();
        self.parser
            .set_included_ranges(&ranges)
            .map_err(|_| NativeError::InvalidRanges)?;
        let parsed = self
            .parser
            .parse(&text, old)
            .ok_or_else(|| NativeError::ParseFailed("parser returned no tree".to_owned()))?;

        let id = self.handle();
        debug!(
            tree = id,
            bytes = text.len(),
            incremental = old_tree.is_some(),
            "tree-sitter parse"
        );
        self.trees.insert(id, parsed);
        Ok(TreeId(id))
    }

    fn edit_tree(&mut self, tree: TreeId, edit: &InputEdit) {
        self.trees
            .get_mut(&tree.0)
            .unwrap_or_else(|| unknown_handle("tree", tree.0))
            .edit(&to_ts_edit(edit));
    }

    fn edit_node(&mut self, tree: TreeId, exchange: &mut Exchange<'_>, edit: &InputEdit) {
        let fields = exchange.marshaled();
        let mut node = self.node(tree, exchange);
        node.edit(&to_ts_edit(edit));
        exchange.write_marshaled(NodeFields::new(fields.id(), node.into_raw().context));
    }

    fn root_node(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> Slot {
        let root = tree_of(&self.trees, tree).root_node();
        emit(exchange, Some(root))
    }

    fn changed_ranges(&mut self, old: TreeId, new: TreeId) -> Vec<Range> {
        let old = tree_of(&self.trees, old);
        let new = tree_of(&self.trees, new);
        old.changed_ranges(new).map(from_ts_range).collect()
    }

    fn edited_range(&mut self, tree: TreeId) -> Option<Range> {
        let root = tree_of(&self.trees, tree).root_node();
        if !root.has_changes() {
            return None;
        }
        let mut range = root.range();
        let mut cursor = root.walk();

        while cursor.goto_first_child() {
            loop {
                let node = cursor.node();
                if node.has_changes() {
                    range.start_byte = node.start_byte();
                    range.start_point = node.start_position();
                    break;
                }
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
        }

        cursor.reset(root);
        while cursor.goto_first_child() {
            loop {
                let node = cursor.node();
                if node.has_changes() {
                    range.end_byte = node.end_byte();
                    range.end_point = node.end_position();
                }
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
        }
        Some(from_ts_range(range))
    }

    fn set_logger(&mut self, logger: Option<Logger>) {
        self.parser.set_logger(logger.map(|logger| {
            Box::new(move |kind: tree_sitter::LogType, message: &str| {
                logger(from_ts_log_type(kind), message)
            }) as Box<dyn FnMut(tree_sitter::LogType, &str)>
        }));
    }

    fn delete_tree(&mut self, tree: TreeId) {
        self.trees.remove(&tree.0);
    }

    fn node_type(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> String {
        self.node(tree, exchange).kind().to_owned()
    }

    fn node_type_id(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> NodeTypeId {
        self.node(tree, exchange).kind_id()
    }

    fn is_named(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool {
        self.node(tree, exchange).is_named()
    }

    fn is_missing(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool {
        self.node(tree, exchange).is_missing()
    }

    fn has_changes(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool {
        self.node(tree, exchange).has_changes()
    }

    fn has_error(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool {
        self.node(tree, exchange).has_error()
    }

    fn start_index(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32 {
        saturate(self.node(tree, exchange).start_byte())
    }

    fn end_index(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32 {
        saturate(self.node(tree, exchange).end_byte())
    }

    fn start_position(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) {
        let point = from_ts_point(self.node(tree, exchange).start_position());
        exchange.write_point(point);
    }

    fn end_position(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) {
        let point = from_ts_point(self.node(tree, exchange).end_position());
        exchange.write_point(point);
    }

    fn child_count(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32 {
        saturate(self.node(tree, exchange).child_count())
    }

    fn named_child_count(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32 {
        saturate(self.node(tree, exchange).named_child_count())
    }

    fn to_sexp(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> String {
        self.node(tree, exchange).to_sexp()
    }

    fn navigate(&mut self, tree: TreeId, exchange: &mut Exchange<'_>, nav: &Nav) -> Slot {
        let node = self.node(tree, exchange);
        let target = match nav {
            Nav::Parent => node.parent(),
            Nav::FirstChild => node.child(0),
            Nav::LastChild => node.child_count().checked_sub(1).and_then(|i| node.child(i as u32)),
            Nav::FirstNamedChild => node.named_child(0),
            Nav::LastNamedChild => node
                .named_child_count()
                .checked_sub(1)
                .and_then(|i| node.named_child(i as u32)),
            Nav::NextSibling => node.next_sibling(),
            Nav::PreviousSibling => node.prev_sibling(),
            Nav::NextNamedSibling => node.next_named_sibling(),
            Nav::PreviousNamedSibling => node.prev_named_sibling(),
            Nav::Child(index) => node.child(*index),
            Nav::NamedChild(index) => node.named_child(*index),
            Nav::FirstChildForIndex(index) => node.first_child_for_byte(*index as usize),
            Nav::FirstNamedChildForIndex(index) => node.first_named_child_for_byte(*index as usize),
            Nav::DescendantForIndex(start, end) => {
                node.descendant_for_byte_range(*start as usize, *end as usize)
            }
            Nav::NamedDescendantForIndex(start, end) => {
                node.named_descendant_for_byte_range(*start as usize, *end as usize)
            }
            Nav::DescendantForPosition(start, end) => {
                node.descendant_for_point_range(to_ts_point(*start), to_ts_point(*end))
            }
            Nav::NamedDescendantForPosition(start, end) => {
                node.named_descendant_for_point_range(to_ts_point(*start), to_ts_point(*end))
            }
            Nav::ChildForFieldId(field) => node.child_by_field_id(field.get()),
            Nav::Closest(types) => closest(node, types),
        };
        emit(exchange, target)
    }

    fn navigate_many(&mut self, tree: TreeId, exchange: &mut Exchange<'_>, nav: &NavMany) -> Vec<Slot> {
        let node = self.node(tree, exchange);
        let mut cursor = node.walk();
        let targets: Vec<Node<'_>> = match nav {
            NavMany::Children => node.children(&mut cursor).collect(),
            NavMany::NamedChildren => node.named_children(&mut cursor).collect(),
            NavMany::ChildrenForFieldId(field) => node.children_by_field_id(*field, &mut cursor).collect(),
            NavMany::DescendantsOfType { types, start, end } => {
                descendants_of_type(node, types, *start, *end)
            }
        };
        targets
            .into_iter()
            .map(|target| emit(exchange, Some(target)))
            .collect()
    }

    fn walk(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> CursorId {
        let cursor = RawCursor::new(self.node(tree, exchange));
        let id = self.handle();
        self.cursors.insert(id, cursor);
        CursorId(id)
    }

    fn cursor_goto(&mut self, cursor: CursorId, to: CursorMove) -> bool {
        self.cursor(cursor).goto(to)
    }

    fn cursor_goto_first_child_for_index(&mut self, cursor: CursorId, index: u32) -> Option<u32> {
        self.cursor(cursor).goto_first_child_for_byte(index)
    }

    fn cursor_reset(&mut self, cursor: CursorId, tree: TreeId, exchange: &mut Exchange<'_>) {
        let node = marshaled_node(&self.trees, tree, exchange);
        self.cursors
            .get_mut(&cursor.0)
            .unwrap_or_else(|| unknown_handle("cursor", cursor.0))
            .reset(node);
    }

    fn cursor_current_node(&mut self, cursor: CursorId, exchange: &mut Exchange<'_>) -> Slot {
        let node = self.cursor(cursor).node();
        emit(exchange, Some(node))
    }

    fn cursor_current_field_name(&mut self, cursor: CursorId) -> Option<String> {
        self.cursor(cursor).field_name()
    }

    fn cursor_start_position(&mut self, cursor: CursorId, exchange: &mut Exchange<'_>) {
        let point = from_ts_point(self.cursor(cursor).node().start_position());
        exchange.write_point(point);
    }

    fn cursor_end_position(&mut self, cursor: CursorId, exchange: &mut Exchange<'_>) {
        let point = from_ts_point(self.cursor(cursor).node().end_position());
        exchange.write_point(point);
    }

    fn delete_cursor(&mut self, cursor: CursorId) {
        self.cursors.remove(&cursor.0);
    }

    fn new_query(&mut self, language: LanguageId, source: &str) -> Result<QueryId, NativeError> {
        let query = RawQuery::new(self.registered(language)?.raw, source)?;
        let id = self.handle();
        debug!(query = id, patterns = query.pattern_count(), "compiled query");
        self.queries.insert(id, query);
        Ok(QueryId(id))
    }

    fn query_predicates(&mut self, query: QueryId) -> Vec<Vec<PredicateStep>> {
        self.queries
            .get(&query.0)
            .unwrap_or_else(|| unknown_handle("query", query.0))
            .predicates()
    }

    fn query_matches(
        &mut self,
        query: QueryId,
        tree: TreeId,
        exchange: &mut Exchange<'_>,
        range: QueryRange,
    ) -> RawMatches {
        self.search(query, tree, exchange, range, false)
    }

    fn query_captures(
        &mut self,
        query: QueryId,
        tree: TreeId,
        exchange: &mut Exchange<'_>,
        range: QueryRange,
    ) -> RawMatches {
        self.search(query, tree, exchange, range, true)
    }

    fn delete_query(&mut self, query: QueryId) {
        self.queries.remove(&query.0);
    }
}

fn tree_of(trees: &HashMap<u32, tree_sitter::Tree>, tree: TreeId) -> &tree_sitter::Tree {
    trees
        .get(&tree.0)
        .unwrap_or_else(|| unknown_handle("tree", tree.0))
}

/// Rebuild the marshaled node from its id and context words.
fn marshaled_node<'t>(
    trees: &'t HashMap<u32, tree_sitter::Tree>,
    tree: TreeId,
    exchange: &Exchange<'_>,
) -> Node<'t> {
    let fields = exchange.marshaled();
    let raw = ffi::TSNode {
        context: fields.context(),
        id: fields.id() as usize as *const c_void,
        tree: tree_of(trees, tree).root_node().into_raw().tree,
    };
    // SAFETY: records are only ever produced by `emit` for nodes of this tree.
    unsafe { Node::from_raw(raw) }
}

fn emit(exchange: &mut Exchange<'_>, node: Option<Node<'_>>) -> Slot {
    match node {
        Some(node) => {
            let (id, type_id) = (node.id() as u64, node.kind_id());
            exchange.emit(id, type_id, node.into_raw().context)
        }
        None => Slot::Null,
    }
}

fn closest<'t>(node: Node<'t>, types: &[String]) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if types.iter().any(|ty| ty == parent.kind()) {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

/// Preorder walk from `node` itself, keeping nodes of `types` that
/// intersect `[start, end)`.
fn descendants_of_type<'t>(node: Node<'t>, types: &[String], start: Point, end: Point) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let mut found = Vec::new();
    loop {
        let current = cursor.node();
        if types.iter().any(|ty| ty == current.kind())
            && from_ts_point(current.end_position()) > start
            && from_ts_point(current.start_position()) < end
        {
            found.push(current);
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return found;
            }
        }
    }
}

#[cold]
fn unknown_handle(kind: &str, id: u32) -> ! {
    panic!("ArboriumNative: unknown {kind} handle {id}")
}
