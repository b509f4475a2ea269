//! A deterministic in-memory engine for tests.
//!
//! Grammar: statements separated by `;`, each a left-associative chain of
//! identifiers joined by `+`. Any other character turns its statement into an
//! `ERROR` node; a dangling `+` gets a zero-width MISSING identifier.
//!
//! Node ids are `(tree << 32) | (index + 1)`, so both id words are exercised.
//! Context words are `[start byte, start row, start column, kind]`, which is
//! what `edit_node` repositions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use graft_core::{ERROR_TYPE_ID, InputEdit, NodeFields, NodeKind, NodeTypeId, Point, Range};

use crate::engine::Engine;
use crate::language::Language;
use crate::native::{
    ChunkFn, CursorId, CursorMove, LanguageId, LanguageTables, LogType, Logger, Nav, NavMany,
    Native, NativeError, ParseOptions, PredicateStep, QueryId, QueryRange, RawMatches, Slot,
    StreamItem, TreeId,
};
use crate::transfer::Exchange;
use crate::tree::Tree;

pub const IDENTIFIER: NodeTypeId = 1;
pub const PLUS: NodeTypeId = 2;
pub const SEMICOLON: NodeTypeId = 3;
pub const BINARY_EXPRESSION: NodeTypeId = 4;
pub const PROGRAM: NodeTypeId = 5;
pub const HIDDEN_EXPRESSION: NodeTypeId = 6;

pub const FIELD_LEFT: u16 = 1;
pub const FIELD_OPERATOR: u16 = 2;
pub const FIELD_RIGHT: u16 = 3;
pub const FIELD_BODY: u16 = 4;

pub const LANGUAGE: LanguageId = LanguageId(0);

pub const NODE_TYPES_JSON: &str = r#"[
    {"type": "_expression", "named": true, "subtypes": [
        {"type": "binary_expression", "named": true},
        {"type": "identifier", "named": true}
    ]},
    {"type": "binary_expression", "named": true, "fields": {
        "right": {"multiple": false, "required": true, "types": [{"type": "_expression", "named": true}]},
        "precedence": {"multiple": false, "required": false, "types": [{"type": "identifier", "named": true}]},
        "operator": {"multiple": false, "required": true, "types": [{"type": "+", "named": false}]},
        "left": {"multiple": false, "required": true, "types": [{"type": "_expression", "named": true}]}
    }},
    {"type": "identifier", "named": true},
    {"type": "program", "named": true, "root": true, "fields": {
        "body": {"multiple": true, "required": false, "types": [{"type": "_expression", "named": true}]}
    }},
    {"type": "+", "named": false},
    {"type": ";", "named": false}
]"#;

pub const EQ_QUERY: &str = r#"(binary_expression left: (_) @l operator: "+" right: (_) @r) (#eq? @l @r)"#;
pub const NOT_EQ_QUERY: &str =
    r#"(binary_expression left: (_) @l operator: "+" right: (_) @r) (#not-eq? @l @r)"#;
pub const MATCH_QUERY: &str = r#"((identifier) @name (#match? @name "^[A-Z]"))"#;
pub const SET_QUERY: &str = r#"((identifier) @id (#set! "kind" "test"))"#;
pub const PROPERTIES_QUERY: &str = r#"((identifier) @id (#set! "kind" "test") (#set! "flag") (#is? "local") (#is-not? "builtin" "yes"))"#;
pub const VACUOUS_QUERY: &str =
    r#"((identifier) @id (#eq? @id @absent) (#match? @absent "^$") (#not-eq? @absent "x"))"#;
pub const MULTI_QUERY: &str = r#"(binary_expression) @bin ((identifier) @id (#eq? @id "x"))"#;
pub const EQ_TEXT_QUERY: &str = r#"((identifier) @id (#eq? @id "x"))"#;
pub const NOT_EQ_TEXT_QUERY: &str = r#"((identifier) @id (#not-eq? @id "x"))"#;
pub const UNKNOWN_PREDICATE_QUERY: &str = r#"((identifier) @id (#frobnicate? @id))"#;
pub const MALFORMED_QUERY: &str = "(identifier) @broken";

/// Observable side effects of the fixture engine.
#[derive(Debug, Default)]
pub struct FixtureLog {
    pub chunk_lens: Vec<usize>,
    pub parses: usize,
    pub incremental_parses: usize,
    pub edits: usize,
    pub repositioned: usize,
    pub deleted_trees: Vec<u32>,
    pub deleted_cursors: Vec<u32>,
    pub deleted_queries: Vec<u32>,
    /// When set, cursors report no current node.
    pub detached_cursors: bool,
}

#[derive(Clone, Debug)]
struct FixtureNode {
    kind: NodeTypeId,
    start: u32,
    end: u32,
    start_point: Point,
    end_point: Point,
    parent: Option<usize>,
    children: Vec<usize>,
    field: Option<u16>,
    missing: bool,
    changed: bool,
}

impl FixtureNode {
    fn is_named(&self) -> bool {
        matches!(self.kind, IDENTIFIER | BINARY_EXPRESSION | PROGRAM | ERROR_TYPE_ID)
    }

    fn type_name(&self) -> &'static str {
        match self.kind {
            IDENTIFIER => "identifier",
            PLUS => "+",
            SEMICOLON => ";",
            BINARY_EXPRESSION => "binary_expression",
            PROGRAM => "program",
            ERROR_TYPE_ID => "ERROR",
            _ => "end",
        }
    }

    fn range(&self) -> Range {
        Range {
            start_index: self.start,
            end_index: self.end,
            start_position: self.start_point,
            end_position: self.end_point,
        }
    }

    fn has_error(&self, nodes: &[FixtureNode]) -> bool {
        self.kind == ERROR_TYPE_ID
            || self.missing
            || self.children.iter().any(|&c| nodes[c].has_error(nodes))
    }
}

#[derive(Debug)]
struct FixtureTree {
    source: String,
    nodes: Vec<FixtureNode>,
}

impl FixtureTree {
    fn parse(source: String) -> Self {
        let mut tree = FixtureTree {
            source,
            nodes: Vec::new(),
        };
        let len = tree.source.len() as u32;
        let root = tree.push(PROGRAM, 0, len, None);

        let bytes = tree.source.as_bytes().to_vec();
        let mut statement_start = 0u32;
        for i in 0..=bytes.len() {
            if i == bytes.len() || bytes[i] == b';' {
                tree.parse_statement(root, statement_start, i as u32);
                if i < bytes.len() {
                    tree.push(SEMICOLON, i as u32, i as u32 + 1, Some(root));
                }
                statement_start = i as u32 + 1;
            }
        }
        tree
    }

    fn point_at(&self, offset: u32) -> Point {
        Point::ZERO.advance(&self.source[..offset as usize])
    }

    fn push(&mut self, kind: NodeTypeId, start: u32, end: u32, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(FixtureNode {
            kind,
            start,
            end,
            start_point: self.point_at(start),
            end_point: self.point_at(end),
            parent,
            children: Vec::new(),
            field: None,
            missing: false,
            changed: false,
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }
        index
    }

    fn tokens(&self, start: u32, end: u32) -> Vec<(NodeTypeId, u32, u32)> {
        let bytes = self.source.as_bytes();
        let mut tokens = Vec::new();
        let mut i = start as usize;
        while i < end as usize {
            let b = bytes[i];
            if b.is_ascii_whitespace() {
                i += 1;
            } else if b == b'+' {
                tokens.push((PLUS, i as u32, i as u32 + 1));
                i += 1;
            } else if b.is_ascii_alphabetic() || b == b'_' {
                let from = i;
                while i < end as usize && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push((IDENTIFIER, from as u32, i as u32));
            } else {
                tokens.push((ERROR_TYPE_ID, i as u32, i as u32 + 1));
                i += 1;
            }
        }
        tokens
    }

    fn parse_statement(&mut self, root: usize, start: u32, end: u32) {
        let tokens = self.tokens(start, end);
        let Some(&(_, first_start, _)) = tokens.first() else {
            return;
        };
        let last_end = tokens.last().map_or(first_start, |t| t.2);

        if tokens.iter().any(|t| t.0 == ERROR_TYPE_ID) {
            let error = self.push(ERROR_TYPE_ID, first_start, last_end, Some(root));
            for &(kind, s, e) in &tokens {
                if kind != ERROR_TYPE_ID {
                    self.push(kind, s, e, Some(error));
                }
            }
            return;
        }

        // Build the chain detached, then hang it under the root.
        let mut iter = tokens.into_iter().peekable();
        let Some((_, s, e)) = iter.next() else {
            return;
        };
        let mut current = self.push(IDENTIFIER, s, e, None);
        while let Some((PLUS, op_start, op_end)) = iter.next() {
            let right = match iter.next() {
                Some((IDENTIFIER, s, e)) => self.push(IDENTIFIER, s, e, None),
                _ => {
                    let missing = self.push(IDENTIFIER, op_end, op_end, None);
                    self.nodes[missing].missing = true;
                    missing
                }
            };
            let left_start = self.nodes[current].start;
            let right_end = self.nodes[right].end;
            let binary = self.push(BINARY_EXPRESSION, left_start, right_end, None);
            let op = self.push(PLUS, op_start, op_end, None);
            self.adopt(binary, current, Some(FIELD_LEFT));
            self.adopt(binary, op, Some(FIELD_OPERATOR));
            self.adopt(binary, right, Some(FIELD_RIGHT));
            current = binary;
        }
        self.adopt(root, current, Some(FIELD_BODY));
    }

    fn adopt(&mut self, parent: usize, child: usize, field: Option<u16>) {
        self.nodes[child].parent = Some(parent);
        self.nodes[child].field = field;
        self.nodes[parent].children.push(child);
    }

    fn preorder(&self, from: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(i) = stack.pop() {
            out.push(i);
            stack.extend(self.nodes[i].children.iter().rev());
        }
        out
    }

    fn field_child(&self, node: usize, field: u16) -> Option<usize> {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].field == Some(field))
    }

    fn text(&self, node: usize) -> &str {
        let n = &self.nodes[node];
        &self.source[n.start as usize..n.end as usize]
    }

    fn sexp(&self, node: usize, field: Option<&str>, out: &mut String) {
        let n = &self.nodes[node];
        if !n.is_named() {
            return;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        if let Some(field) = field {
            out.push_str(field);
            out.push_str(": ");
        }
        out.push('(');
        if n.missing {
            out.push_str("MISSING ");
        }
        out.push_str(n.type_name());
        for &c in &n.children {
            let field = self.nodes[c].field.and_then(|f| FIELDS[f as usize]);
            self.sexp(c, field, out);
        }
        out.push(')');
    }
}

const FIELDS: [Option<&str>; 5] = [None, Some("left"), Some("operator"), Some("right"), Some("body")];

fn shift_index(index: u32, edit: &InputEdit) -> u32 {
    if index >= edit.old_end_index {
        index - edit.old_end_index + edit.new_end_index
    } else if index > edit.start_index {
        edit.new_end_index.min(index)
    } else {
        index
    }
}

fn shift_point(point: Point, edit: &InputEdit) -> Point {
    if point >= edit.old_end_position {
        let row = point.row - edit.old_end_position.row + edit.new_end_position.row;
        let column = if point.row == edit.old_end_position.row {
            point.column - edit.old_end_position.column + edit.new_end_position.column
        } else {
            point.column
        };
        Point::new(row, column)
    } else {
        point
    }
}

type Matcher = fn(&FixtureTree, usize) -> Option<Vec<(&'static str, usize)>>;

struct PatternDef {
    steps: Vec<PredicateStep>,
    matcher: Matcher,
}

struct QueryDef {
    patterns: Vec<PatternDef>,
    corrupt: bool,
}

fn binary_operands(tree: &FixtureTree, node: usize) -> Option<Vec<(&'static str, usize)>> {
    if tree.nodes[node].kind != BINARY_EXPRESSION {
        return None;
    }
    let left = tree.field_child(node, FIELD_LEFT)?;
    let right = tree.field_child(node, FIELD_RIGHT)?;
    Some(vec![("l", left), ("r", right)])
}

fn identifier(tree: &FixtureTree, node: usize, name: &'static str) -> Option<Vec<(&'static str, usize)>> {
    (tree.nodes[node].kind == IDENTIFIER).then(|| vec![(name, node)])
}

fn identifier_as_id(tree: &FixtureTree, node: usize) -> Option<Vec<(&'static str, usize)>> {
    identifier(tree, node, "id")
}

fn identifier_as_name(tree: &FixtureTree, node: usize) -> Option<Vec<(&'static str, usize)>> {
    identifier(tree, node, "name")
}

fn identifier_as_broken(tree: &FixtureTree, node: usize) -> Option<Vec<(&'static str, usize)>> {
    identifier(tree, node, "broken")
}

fn binary_as_bin(tree: &FixtureTree, node: usize) -> Option<Vec<(&'static str, usize)>> {
    (tree.nodes[node].kind == BINARY_EXPRESSION).then(|| vec![("bin", node)])
}

fn steps(items: &[(u8, &str)]) -> Vec<PredicateStep> {
    items
        .iter()
        .map(|&(kind, value)| match kind {
            b'@' => PredicateStep::capture(value),
            b'"' => PredicateStep::string(value),
            _ => PredicateStep::done(),
        })
        .collect()
}

fn query_def(source: &str) -> Option<QueryDef> {
    let single = |steps: Vec<PredicateStep>, matcher: Matcher| QueryDef {
        patterns: vec![PatternDef { steps, matcher }],
        corrupt: false,
    };
    let def = match source {
        EQ_QUERY => single(
            steps(&[(b'"', "eq?"), (b'@', "l"), (b'@', "r"), (0, "")]),
            binary_operands,
        ),
        NOT_EQ_QUERY => single(
            steps(&[(b'"', "not-eq?"), (b'@', "l"), (b'@', "r"), (0, "")]),
            binary_operands,
        ),
        MATCH_QUERY => single(
            steps(&[(b'"', "match?"), (b'@', "name"), (b'"', "^[A-Z]"), (0, "")]),
            identifier_as_name,
        ),
        SET_QUERY => single(
            steps(&[(b'"', "set!"), (b'"', "kind"), (b'"', "test"), (0, "")]),
            identifier_as_id,
        ),
        PROPERTIES_QUERY => single(
            steps(&[
                (b'"', "set!"),
                (b'"', "kind"),
                (b'"', "test"),
                (0, ""),
                (b'"', "set!"),
                (b'"', "flag"),
                (0, ""),
                (b'"', "is?"),
                (b'"', "local"),
                (0, ""),
                (b'"', "is-not?"),
                (b'"', "builtin"),
                (b'"', "yes"),
                (0, ""),
            ]),
            identifier_as_id,
        ),
        VACUOUS_QUERY => single(
            steps(&[
                (b'"', "eq?"),
                (b'@', "id"),
                (b'@', "absent"),
                (0, ""),
                (b'"', "match?"),
                (b'@', "absent"),
                (b'"', "^$"),
                (0, ""),
                (b'"', "not-eq?"),
                (b'@', "absent"),
                (b'"', "x"),
                (0, ""),
            ]),
            identifier_as_id,
        ),
        EQ_TEXT_QUERY => single(
            steps(&[(b'"', "eq?"), (b'@', "id"), (b'"', "x"), (0, "")]),
            identifier_as_id,
        ),
        NOT_EQ_TEXT_QUERY => single(
            steps(&[(b'"', "not-eq?"), (b'@', "id"), (b'"', "x"), (0, "")]),
            identifier_as_id,
        ),
        MULTI_QUERY => QueryDef {
            patterns: vec![
                PatternDef {
                    steps: Vec::new(),
                    matcher: binary_as_bin,
                },
                PatternDef {
                    steps: steps(&[(b'"', "eq?"), (b'@', "id"), (b'"', "x"), (0, "")]),
                    matcher: identifier_as_id,
                },
            ],
            corrupt: false,
        },
        UNKNOWN_PREDICATE_QUERY => single(
            steps(&[(b'"', "frobnicate?"), (b'@', "id"), (0, "")]),
            identifier_as_id,
        ),
        MALFORMED_QUERY => QueryDef {
            patterns: vec![PatternDef {
                steps: Vec::new(),
                matcher: identifier_as_broken,
            }],
            corrupt: true,
        },
        _ => return None,
    };
    Some(def)
}

#[derive(Debug)]
struct FixtureCursor {
    tree: u32,
    /// Path from the node the cursor was created at.
    stack: Vec<usize>,
}

/// The fixture engine. Keep [`FixtureNative::log`] before handing it to an
/// [`Engine`].
#[derive(Default)]
pub struct FixtureNative {
    log: Rc<RefCell<FixtureLog>>,
    trees: HashMap<u32, FixtureTree>,
    cursors: HashMap<u32, FixtureCursor>,
    queries: HashMap<u32, QueryDef>,
    logger: Option<Logger>,
    next_handle: u32,
}

impl FixtureNative {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Rc<RefCell<FixtureLog>> {
        self.log.clone()
    }

    fn trace(&self, kind: LogType, message: &str) {
        if let Some(logger) = &self.logger {
            logger(kind, message);
        }
    }

    fn handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn tree(&self, tree: TreeId) -> &FixtureTree {
        self.trees.get(&tree.0).expect("fixture: unknown tree")
    }

    /// Index of the marshaled node, checked against `tree`.
    fn marshaled(&self, tree: TreeId, exchange: &Exchange<'_>) -> (NodeFields, usize) {
        let fields = exchange.marshaled();
        let id = fields.id();
        assert_eq!((id >> 32) as u32, tree.0, "fixture: node marshaled for the wrong tree");
        (fields, (id & 0xFFFF_FFFF) as usize - 1)
    }

    fn node(&self, tree: TreeId, exchange: &Exchange<'_>) -> (&FixtureTree, usize) {
        let (_, index) = self.marshaled(tree, exchange);
        (self.tree(tree), index)
    }

    fn emit(exchange: &mut Exchange<'_>, tree: u32, t: &FixtureTree, index: usize) -> Slot {
        let n = &t.nodes[index];
        let id = (u64::from(tree) << 32) | (index as u64 + 1);
        let context = [n.start, n.start_point.row, n.start_point.column, u32::from(n.kind)];
        exchange.emit(id, n.kind, context)
    }

    fn sibling(t: &FixtureTree, index: usize, step: isize, named: bool) -> Option<usize> {
        let parent = t.nodes[index].parent?;
        let siblings = &t.nodes[parent].children;
        let mut pos = siblings.iter().position(|&c| c == index)? as isize;
        loop {
            pos += step;
            if pos < 0 || pos as usize >= siblings.len() {
                return None;
            }
            let candidate = siblings[pos as usize];
            if !named || t.nodes[candidate].is_named() {
                return Some(candidate);
            }
        }
    }

    fn descendant(t: &FixtureTree, from: usize, named: bool, contains: impl Fn(&FixtureNode) -> bool) -> usize {
        let mut best = from;
        let mut current = from;
        'descend: loop {
            for &c in &t.nodes[current].children {
                let child = &t.nodes[c];
                if contains(child) {
                    current = c;
                    if !named || child.is_named() {
                        best = c;
                    }
                    continue 'descend;
                }
            }
            return best;
        }
    }

    fn resolve(&self, tree: TreeId, index: usize, nav: &Nav) -> Option<usize> {
        let t = self.tree(tree);
        let n = &t.nodes[index];
        let named_children = || n.children.iter().copied().filter(|&c| t.nodes[c].is_named());
        match nav {
            Nav::Parent => n.parent,
            Nav::FirstChild => n.children.first().copied(),
            Nav::LastChild => n.children.last().copied(),
            Nav::FirstNamedChild => named_children().next(),
            Nav::LastNamedChild => named_children().last(),
            Nav::NextSibling => Self::sibling(t, index, 1, false),
            Nav::PreviousSibling => Self::sibling(t, index, -1, false),
            Nav::NextNamedSibling => Self::sibling(t, index, 1, true),
            Nav::PreviousNamedSibling => Self::sibling(t, index, -1, true),
            Nav::Child(i) => n.children.get(*i as usize).copied(),
            Nav::NamedChild(i) => named_children().nth(*i as usize),
            Nav::FirstChildForIndex(byte) => {
                n.children.iter().copied().find(|&c| t.nodes[c].end > *byte)
            }
            Nav::FirstNamedChildForIndex(byte) => named_children().find(|&c| t.nodes[c].end > *byte),
            Nav::DescendantForIndex(s, e) => Some(Self::descendant(t, index, false, |c| {
                c.start <= *s && c.end >= *e && c.end > c.start
            })),
            Nav::NamedDescendantForIndex(s, e) => Some(Self::descendant(t, index, true, |c| {
                c.start <= *s && c.end >= *e && c.end > c.start
            })),
            Nav::DescendantForPosition(s, e) => Some(Self::descendant(t, index, false, |c| {
                c.start_point <= *s && c.end_point >= *e && c.end > c.start
            })),
            Nav::NamedDescendantForPosition(s, e) => Some(Self::descendant(t, index, true, |c| {
                c.start_point <= *s && c.end_point >= *e && c.end > c.start
            })),
            Nav::ChildForFieldId(field) => t.field_child(index, field.get()),
            Nav::Closest(types) => {
                let mut current = n.parent;
                while let Some(p) = current {
                    if types.iter().any(|ty| ty == t.nodes[p].type_name()) {
                        return Some(p);
                    }
                    current = t.nodes[p].parent;
                }
                None
            }
        }
    }

    fn search(
        &self,
        query: QueryId,
        tree: TreeId,
        exchange: &mut Exchange<'_>,
        range: QueryRange,
        captures: bool,
    ) -> RawMatches {
        let (_, root) = self.marshaled(tree, exchange);
        let def = self.queries.get(&query.0).expect("fixture: unknown query");
        let t = self.tree(tree);

        let mut found = Vec::new();
        for node in t.preorder(root) {
            for (pattern, p) in def.patterns.iter().enumerate() {
                let Some(caps) = (p.matcher)(t, node) else {
                    continue;
                };
                if !range.is_unbounded() {
                    let n = &t.nodes[caps[0].1];
                    let end = range.get_end();
                    if n.end_point <= range.get_start() || (!end.is_zero() && n.start_point >= end) {
                        continue;
                    }
                }
                found.push((pattern as u32, caps));
            }
        }

        let mut raw = RawMatches::default();
        for (pattern, caps) in &found {
            let rounds = if captures { caps.len() } else { 1 };
            for capture_index in 0..rounds {
                raw.stream.push(StreamItem::Index(*pattern));
                if captures {
                    raw.stream.push(StreamItem::Index(capture_index as u32));
                }
                for &(name, node) in caps {
                    raw.stream.push(StreamItem::Name(Rc::from(name)));
                    raw.nodes.push(Self::emit(exchange, tree.0, t, node));
                }
            }
        }
        if def.corrupt {
            raw.stream.push(StreamItem::Name(Rc::from("dangling")));
        }
        raw
    }
}

impl Native for FixtureNative {
    fn language_tables(&mut self, language: LanguageId) -> Result<LanguageTables, NativeError> {
        if language != LANGUAGE {
            return Err(NativeError::UnknownHandle {
                kind: "language",
                id: language.0,
            });
        }
        let kind = |name: &str, named, visible| NodeKind {
            name: name.to_owned(),
            named,
            visible,
        };
        Ok(LanguageTables {
            kinds: vec![
                kind("end", false, false),
                kind("identifier", true, true),
                kind("+", false, true),
                kind(";", false, true),
                kind("binary_expression", true, true),
                kind("program", true, true),
                kind("_expression", true, false),
            ],
            fields: FIELDS.iter().map(|f| f.map(str::to_owned)).collect(),
            node_types: graft_core::parse_node_types(NODE_TYPES_JSON).expect("fixture node types"),
        })
    }

    fn parse(
        &mut self,
        language: LanguageId,
        input: &mut ChunkFn<'_>,
        old_tree: Option<TreeId>,
        options: &ParseOptions,
    ) -> Result<TreeId, NativeError> {
        if language != LANGUAGE {
            return Err(NativeError::UnknownHandle {
                kind: "language",
                id: language.0,
            });
        }
        if let Some(old) = old_tree
            && !self.trees.contains_key(&old.0)
        {
            return Err(NativeError::UnknownHandle {
                kind: "tree",
                id: old.0,
            });
        }

        self.trace(LogType::Parse, "new_parse");
        let mut source = String::new();
        let mut position = Point::ZERO;
        loop {
            let chunk = input(source.len(), position);
            if chunk.is_empty() {
                break;
            }
            self.trace(
                LogType::Lex,
                &format!("chunk offset:{}, length:{}", source.len(), chunk.len()),
            );
            self.log.borrow_mut().chunk_lens.push(chunk.len());
            position = position.advance(&chunk);
            source.push_str(&chunk);
        }

        let ranges = options.get_included_ranges();
        if !ranges.is_empty() {
            if ranges.windows(2).any(|w| w[0].end_index > w[1].start_index) {
                return Err(NativeError::InvalidRanges);
            }
            let mut masked: Vec<u8> = source
                .bytes()
                .map(|b| if b == b'\n' { b } else { b' ' })
                .collect();
            for range in ranges {
                let end = (range.end_index as usize).min(source.len());
                let start = (range.start_index as usize).min(end);
                masked[start..end].copy_from_slice(&source.as_bytes()[start..end]);
            }
            source = String::from_utf8_lossy(&masked).into_owned();
        }

        let id = self.handle();
        self.trees.insert(id, FixtureTree::parse(source));
        {
            let mut log = self.log.borrow_mut();
            log.parses += 1;
            if old_tree.is_some() {
                log.incremental_parses += 1;
            }
        }
        self.trace(LogType::Parse, "done");
        Ok(TreeId(id))
    }

    fn edit_tree(&mut self, tree: TreeId, edit: &InputEdit) {
        let t = self.trees.get_mut(&tree.0).expect("fixture: unknown tree");
        for n in &mut t.nodes {
            n.changed = n.start <= edit.old_end_index && n.end >= edit.start_index;
            n.start = shift_index(n.start, edit);
            n.end = shift_index(n.end, edit);
            n.start_point = shift_point(n.start_point, edit);
            n.end_point = shift_point(n.end_point, edit);
        }
        self.log.borrow_mut().edits += 1;
    }

    fn edit_node(&mut self, tree: TreeId, exchange: &mut Exchange<'_>, edit: &InputEdit) {
        let (fields, _) = self.marshaled(tree, exchange);
        let [start, row, column, kind] = fields.context();
        let start = shift_index(start, edit);
        let point = shift_point(Point::new(row, column), edit);
        exchange.write_marshaled(NodeFields::new(fields.id(), [start, point.row, point.column, kind]));
        self.log.borrow_mut().repositioned += 1;
    }

    fn root_node(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> Slot {
        let t = self.tree(tree);
        Self::emit(exchange, tree.0, t, 0)
    }

    fn changed_ranges(&mut self, old: TreeId, new: TreeId) -> Vec<Range> {
        let (old, new) = (self.tree(old), self.tree(new));
        let statements = |t: &FixtureTree| -> Vec<usize> {
            t.nodes[0]
                .children
                .iter()
                .copied()
                .filter(|&c| t.nodes[c].kind != SEMICOLON)
                .collect()
        };
        let (before, after) = (statements(old), statements(new));
        after
            .iter()
            .enumerate()
            .filter(|&(i, &n)| before.get(i).is_none_or(|&o| old.text(o) != new.text(n)))
            .map(|(_, &n)| new.nodes[n].range())
            .collect()
    }

    fn edited_range(&mut self, tree: TreeId) -> Option<Range> {
        let t = self.tree(tree);
        if !t.nodes[0].changed {
            return None;
        }
        let mut range = t.nodes[0].range();

        // Start: first changed child at each level, descending into it.
        let mut current = 0;
        while let Some(&last) = t.nodes[current].children.last() {
            let children = &t.nodes[current].children;
            current = match children.iter().copied().find(|&c| t.nodes[c].changed) {
                Some(changed) => {
                    range.start_index = t.nodes[changed].start;
                    range.start_position = t.nodes[changed].start_point;
                    changed
                }
                None => last,
            };
        }

        // End: last changed child at each level, descending into the last child.
        let mut current = 0;
        while let Some(&last) = t.nodes[current].children.last() {
            let children = &t.nodes[current].children;
            if let Some(changed) = children.iter().rev().copied().find(|&c| t.nodes[c].changed) {
                range.end_index = t.nodes[changed].end;
                range.end_position = t.nodes[changed].end_point;
            }
            current = last;
        }
        Some(range)
    }

    fn set_logger(&mut self, logger: Option<Logger>) {
        self.logger = logger;
    }

    fn delete_tree(&mut self, tree: TreeId) {
        self.trees.remove(&tree.0);
        self.log.borrow_mut().deleted_trees.push(tree.0);
    }

    fn node_type(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> String {
        let (t, i) = self.node(tree, exchange);
        t.nodes[i].type_name().to_owned()
    }

    fn node_type_id(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> NodeTypeId {
        let (t, i) = self.node(tree, exchange);
        t.nodes[i].kind
    }

    fn is_named(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool {
        let (t, i) = self.node(tree, exchange);
        t.nodes[i].is_named()
    }

    fn is_missing(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool {
        let (t, i) = self.node(tree, exchange);
        t.nodes[i].missing
    }

    fn has_changes(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool {
        let (t, i) = self.node(tree, exchange);
        t.nodes[i].changed
    }

    fn has_error(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> bool {
        let (t, i) = self.node(tree, exchange);
        t.nodes[i].has_error(&t.nodes)
    }

    fn start_index(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32 {
        let (fields, _) = self.marshaled(tree, exchange);
        fields.context()[0]
    }

    fn end_index(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32 {
        let (fields, i) = self.marshaled(tree, exchange);
        let n = &self.tree(tree).nodes[i];
        fields.context()[0] + (n.end - n.start)
    }

    fn start_position(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) {
        let (fields, _) = self.marshaled(tree, exchange);
        let [_, row, column, _] = fields.context();
        exchange.write_point(Point::new(row, column));
    }

    fn end_position(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) {
        let (_, i) = self.marshaled(tree, exchange);
        let point = self.tree(tree).nodes[i].end_point;
        exchange.write_point(point);
    }

    fn child_count(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32 {
        let (t, i) = self.node(tree, exchange);
        t.nodes[i].children.len() as u32
    }

    fn named_child_count(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> u32 {
        let (t, i) = self.node(tree, exchange);
        t.nodes[i]
            .children
            .iter()
            .filter(|&&c| t.nodes[c].is_named())
            .count() as u32
    }

    fn to_sexp(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> String {
        let (t, i) = self.node(tree, exchange);
        let mut out = String::new();
        t.sexp(i, None, &mut out);
        out
    }

    fn navigate(&mut self, tree: TreeId, exchange: &mut Exchange<'_>, nav: &Nav) -> Slot {
        let (_, index) = self.marshaled(tree, exchange);
        match self.resolve(tree, index, nav) {
            Some(target) => Self::emit(exchange, tree.0, self.tree(tree), target),
            None => Slot::Null,
        }
    }

    fn navigate_many(&mut self, tree: TreeId, exchange: &mut Exchange<'_>, nav: &NavMany) -> Vec<Slot> {
        let (_, index) = self.marshaled(tree, exchange);
        let t = self.tree(tree);
        let n = &t.nodes[index];
        let targets: Vec<usize> = match nav {
            NavMany::Children => n.children.clone(),
            NavMany::NamedChildren => n
                .children
                .iter()
                .copied()
                .filter(|&c| t.nodes[c].is_named())
                .collect(),
            NavMany::ChildrenForFieldId(field) => n
                .children
                .iter()
                .copied()
                .filter(|&c| t.nodes[c].field == Some(field.get()))
                .collect(),
            NavMany::DescendantsOfType { types, start, end } => t
                .preorder(index)
                .into_iter()
                .filter(|&d| {
                    let d = &t.nodes[d];
                    types.iter().any(|ty| ty == d.type_name())
                        && d.end_point > *start
                        && d.start_point < *end
                })
                .collect(),
        };
        targets
            .into_iter()
            .map(|target| Self::emit(exchange, tree.0, t, target))
            .collect()
    }

    fn walk(&mut self, tree: TreeId, exchange: &mut Exchange<'_>) -> CursorId {
        let (_, index) = self.marshaled(tree, exchange);
        let id = self.handle();
        self.cursors.insert(
            id,
            FixtureCursor {
                tree: tree.0,
                stack: vec![index],
            },
        );
        CursorId(id)
    }

    fn cursor_goto(&mut self, cursor: CursorId, to: CursorMove) -> bool {
        let c = self.cursors.get_mut(&cursor.0).expect("fixture: unknown cursor");
        let t = self.trees.get(&c.tree).expect("fixture: unknown tree");
        let current = *c.stack.last().expect("fixture: empty cursor");
        match to {
            CursorMove::FirstChild => match t.nodes[current].children.first() {
                Some(&child) => {
                    c.stack.push(child);
                    true
                }
                None => false,
            },
            CursorMove::NextSibling if c.stack.len() > 1 => {
                match Self::sibling(t, current, 1, false) {
                    Some(sibling) => {
                        *c.stack.last_mut().expect("fixture: empty cursor") = sibling;
                        true
                    }
                    None => false,
                }
            }
            CursorMove::Parent if c.stack.len() > 1 => {
                c.stack.pop();
                true
            }
            CursorMove::NextSibling | CursorMove::Parent => false,
        }
    }

    fn cursor_goto_first_child_for_index(&mut self, cursor: CursorId, index: u32) -> Option<u32> {
        let c = self.cursors.get(&cursor.0).expect("fixture: unknown cursor");
        let t = self.trees.get(&c.tree).expect("fixture: unknown tree");
        let current = *c.stack.last().expect("fixture: empty cursor");
        let (position, child) = t.nodes[current]
            .children
            .iter()
            .copied()
            .enumerate()
            .find(|&(_, child)| t.nodes[child].end > index)?;
        self.cursors
            .get_mut(&cursor.0)
            .expect("fixture: unknown cursor")
            .stack
            .push(child);
        Some(position as u32)
    }

    fn cursor_reset(&mut self, cursor: CursorId, tree: TreeId, exchange: &mut Exchange<'_>) {
        let (_, index) = self.marshaled(tree, exchange);
        let c = self.cursors.get_mut(&cursor.0).expect("fixture: unknown cursor");
        c.tree = tree.0;
        c.stack = vec![index];
    }

    fn cursor_current_node(&mut self, cursor: CursorId, exchange: &mut Exchange<'_>) -> Slot {
        if self.log.borrow().detached_cursors {
            return Slot::Null;
        }
        let c = self.cursors.get(&cursor.0).expect("fixture: unknown cursor");
        let t = self.trees.get(&c.tree).expect("fixture: unknown tree");
        let current = *c.stack.last().expect("fixture: empty cursor");
        Self::emit(exchange, c.tree, t, current)
    }

    fn cursor_current_field_name(&mut self, cursor: CursorId) -> Option<String> {
        let c = self.cursors.get(&cursor.0).expect("fixture: unknown cursor");
        if c.stack.len() < 2 {
            return None;
        }
        let t = self.trees.get(&c.tree).expect("fixture: unknown tree");
        let current = *c.stack.last().expect("fixture: empty cursor");
        let field = t.nodes[current].field?;
        FIELDS[field as usize].map(str::to_owned)
    }

    fn cursor_start_position(&mut self, cursor: CursorId, exchange: &mut Exchange<'_>) {
        let c = self.cursors.get(&cursor.0).expect("fixture: unknown cursor");
        let t = self.trees.get(&c.tree).expect("fixture: unknown tree");
        let current = *c.stack.last().expect("fixture: empty cursor");
        exchange.write_point(t.nodes[current].start_point);
    }

    fn cursor_end_position(&mut self, cursor: CursorId, exchange: &mut Exchange<'_>) {
        let c = self.cursors.get(&cursor.0).expect("fixture: unknown cursor");
        let t = self.trees.get(&c.tree).expect("fixture: unknown tree");
        let current = *c.stack.last().expect("fixture: empty cursor");
        exchange.write_point(t.nodes[current].end_point);
    }

    fn delete_cursor(&mut self, cursor: CursorId) {
        self.cursors.remove(&cursor.0);
        self.log.borrow_mut().deleted_cursors.push(cursor.0);
    }

    fn new_query(&mut self, language: LanguageId, source: &str) -> Result<QueryId, NativeError> {
        if language != LANGUAGE {
            return Err(NativeError::UnknownHandle {
                kind: "language",
                id: language.0,
            });
        }
        let def = query_def(source).ok_or_else(|| NativeError::QuerySyntax {
            offset: 0,
            kind: "syntax".to_owned(),
        })?;
        let id = self.handle();
        self.queries.insert(id, def);
        Ok(QueryId(id))
    }

    fn query_predicates(&mut self, query: QueryId) -> Vec<Vec<PredicateStep>> {
        let def = self.queries.get(&query.0).expect("fixture: unknown query");
        def.patterns.iter().map(|p| p.steps.clone()).collect()
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
        self.log.borrow_mut().deleted_queries.push(query.0);
    }
}

/// Engine over a fresh fixture, its log, and the toy language.
pub fn setup() -> (Engine, Language, Rc<RefCell<FixtureLog>>) {
    let native = FixtureNative::new();
    let log = native.log();
    let engine = Engine::new(native);
    let language = engine.language(LANGUAGE).expect("fixture language");
    (engine, language, log)
}

pub fn parse(engine: &Engine, language: &Language, source: &str) -> Tree {
    let mut parser = engine.parser();
    parser.set_language(language).expect("fixture language");
    parser
        .parse(source, None, &ParseOptions::new())
        .expect("fixture parse")
}
