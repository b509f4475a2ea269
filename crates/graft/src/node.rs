//! Syntax nodes.
//!
//! Every accessor marshals the node immediately before its native call; no
//! node state other than the raw words is kept on the managed side.

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use graft_core::{NodeFieldId, NodeFields, NodeTypeId, Point, Range};
use serde::{Serialize, Serializer};

use crate::cache;
use crate::cursor::TreeCursor;
use crate::language::{FieldAccessor, NodeClass};
use crate::native::{Nav, NavMany, Native, TreeId};
use crate::transfer::Exchange;
use crate::tree::Tree;

/// A node of a [`Tree`].
///
/// Cloning is cheap. Two handles to the same underlying node of the same tree
/// are always the same object, so `==` is reference identity.
#[derive(Clone)]
pub struct SyntaxNode(pub(crate) Rc<NodeInner>);

pub(crate) struct NodeInner {
    tree: Tree,
    fields: Cell<NodeFields>,
    class: Rc<NodeClass>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.tree.cache().forget(self.fields.get().id());
    }
}

/// Result of a field accessor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Single(Option<SyntaxNode>),
    Multiple(Vec<SyntaxNode>),
}

impl FieldValue {
    pub fn single(self) -> Option<SyntaxNode> {
        match self {
            FieldValue::Single(node) => node,
            FieldValue::Multiple(nodes) => nodes.into_iter().next(),
        }
    }

    pub fn into_vec(self) -> Vec<SyntaxNode> {
        match self {
            FieldValue::Single(node) => node.into_iter().collect(),
            FieldValue::Multiple(nodes) => nodes,
        }
    }
}

/// Lifetime-free view of a node for output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    #[serde(rename = "type")]
    pub type_name: String,
    pub text: String,
    pub start: Point,
    pub end: Point,
}

impl SyntaxNode {
    pub(crate) fn new(tree: Tree, fields: NodeFields, class: Rc<NodeClass>) -> Self {
        Self(Rc::new(NodeInner {
            tree,
            fields: Cell::new(fields),
            class,
        }))
    }

    pub(crate) fn fields(&self) -> NodeFields {
        self.0.fields.get()
    }

    pub(crate) fn set_fields(&self, fields: NodeFields) {
        self.0.fields.set(fields);
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeInner> {
        Rc::downgrade(&self.0)
    }

    /// The 64-bit native node id.
    pub fn id(&self) -> u64 {
        self.fields().id()
    }

    pub fn tree(&self) -> &Tree {
        &self.0.tree
    }

    pub fn node_class(&self) -> &NodeClass {
        &self.0.class
    }

    fn call<R>(&self, f: impl FnOnce(&mut dyn Native, TreeId, &mut Exchange<'_>) -> R) -> R {
        let tree = self.tree();
        tree.engine().exchange(Some(tree.cache()), |native, exchange| {
            exchange.marshal(self);
            f(native, tree.id(), exchange)
        })
    }

    fn nav(&self, nav: Nav) -> Option<SyntaxNode> {
        let tree = self.tree();
        tree.engine().exchange(Some(tree.cache()), |native, exchange| {
            exchange.marshal(self);
            let slot = native.navigate(tree.id(), exchange, &nav);
            cache::unmarshal(tree, slot, &mut exchange.reader())
        })
    }

    fn nav_many(&self, nav: NavMany) -> Vec<SyntaxNode> {
        let tree = self.tree();
        tree.engine().exchange(Some(tree.cache()), |native, exchange| {
            exchange.marshal(self);
            let slots = native.navigate_many(tree.id(), exchange, &nav);
            cache::unmarshal_many(tree, &slots, &mut exchange.reader())
        })
    }

    // ------------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------------

    /// Grammar type name. Specialized classes know it without a native call.
    pub fn type_name(&self) -> String {
        match self.0.class.type_name() {
            Some(name) => name.to_owned(),
            None => self.call(|native, tree, exchange| native.node_type(tree, exchange)),
        }
    }

    pub fn type_id(&self) -> NodeTypeId {
        self.call(|native, tree, exchange| native.node_type_id(tree, exchange))
    }

    pub fn is_named(&self) -> bool {
        self.call(|native, tree, exchange| native.is_named(tree, exchange))
    }

    pub fn is_missing(&self) -> bool {
        self.call(|native, tree, exchange| native.is_missing(tree, exchange))
    }

    pub fn has_changes(&self) -> bool {
        self.call(|native, tree, exchange| native.has_changes(tree, exchange))
    }

    pub fn has_error(&self) -> bool {
        self.call(|native, tree, exchange| native.has_error(tree, exchange))
    }

    pub fn start_index(&self) -> u32 {
        self.call(|native, tree, exchange| native.start_index(tree, exchange))
    }

    pub fn end_index(&self) -> u32 {
        self.call(|native, tree, exchange| native.end_index(tree, exchange))
    }

    pub fn start_position(&self) -> Point {
        self.call(|native, tree, exchange| {
            native.start_position(tree, exchange);
            exchange.point()
        })
    }

    pub fn end_position(&self) -> Point {
        self.call(|native, tree, exchange| {
            native.end_position(tree, exchange);
            exchange.point()
        })
    }

    pub fn range(&self) -> Range {
        Range {
            start_index: self.start_index(),
            end_index: self.end_index(),
            start_position: self.start_position(),
            end_position: self.end_position(),
        }
    }

    pub fn child_count(&self) -> u32 {
        self.call(|native, tree, exchange| native.child_count(tree, exchange))
    }

    pub fn named_child_count(&self) -> u32 {
        self.call(|native, tree, exchange| native.named_child_count(tree, exchange))
    }

    /// Source text covered by this node.
    pub fn text(&self) -> String {
        self.tree().text(&self.range())
    }

    /// S-expression rendering of the subtree.
    pub fn to_sexp(&self) -> String {
        self.call(|native, tree, exchange| native.to_sexp(tree, exchange))
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    pub fn parent(&self) -> Option<SyntaxNode> {
        self.nav(Nav::Parent)
    }

    pub fn children(&self) -> Vec<SyntaxNode> {
        self.nav_many(NavMany::Children)
    }

    pub fn named_children(&self) -> Vec<SyntaxNode> {
        self.nav_many(NavMany::NamedChildren)
    }

    pub fn first_child(&self) -> Option<SyntaxNode> {
        self.nav(Nav::FirstChild)
    }

    pub fn last_child(&self) -> Option<SyntaxNode> {
        self.nav(Nav::LastChild)
    }

    pub fn first_named_child(&self) -> Option<SyntaxNode> {
        self.nav(Nav::FirstNamedChild)
    }

    pub fn last_named_child(&self) -> Option<SyntaxNode> {
        self.nav(Nav::LastNamedChild)
    }

    pub fn next_sibling(&self) -> Option<SyntaxNode> {
        self.nav(Nav::NextSibling)
    }

    pub fn previous_sibling(&self) -> Option<SyntaxNode> {
        self.nav(Nav::PreviousSibling)
    }

    pub fn next_named_sibling(&self) -> Option<SyntaxNode> {
        self.nav(Nav::NextNamedSibling)
    }

    pub fn previous_named_sibling(&self) -> Option<SyntaxNode> {
        self.nav(Nav::PreviousNamedSibling)
    }

    pub fn child(&self, index: u32) -> Option<SyntaxNode> {
        self.nav(Nav::Child(index))
    }

    pub fn named_child(&self, index: u32) -> Option<SyntaxNode> {
        self.nav(Nav::NamedChild(index))
    }

    /// First child that extends past byte `index`.
    pub fn first_child_for_index(&self, index: u32) -> Option<SyntaxNode> {
        self.nav(Nav::FirstChildForIndex(index))
    }

    pub fn first_named_child_for_index(&self, index: u32) -> Option<SyntaxNode> {
        self.nav(Nav::FirstNamedChildForIndex(index))
    }

    /// Smallest descendant spanning bytes `[start, end]`.
    pub fn descendant_for_index(&self, start: u32, end: u32) -> Option<SyntaxNode> {
        self.nav(Nav::DescendantForIndex(start, end))
    }

    pub fn named_descendant_for_index(&self, start: u32, end: u32) -> Option<SyntaxNode> {
        self.nav(Nav::NamedDescendantForIndex(start, end))
    }

    pub fn descendant_for_position(&self, start: Point, end: Point) -> Option<SyntaxNode> {
        self.nav(Nav::DescendantForPosition(start, end))
    }

    pub fn named_descendant_for_position(&self, start: Point, end: Point) -> Option<SyntaxNode> {
        self.nav(Nav::NamedDescendantForPosition(start, end))
    }

    /// Descendants of any of `types`, depth-first, intersecting `[start, end)`.
    ///
    /// `start` defaults to the origin and `end` to unbounded.
    pub fn descendants_of_type(
        &self,
        types: &[&str],
        start: Option<Point>,
        end: Option<Point>,
    ) -> Vec<SyntaxNode> {
        self.nav_many(NavMany::DescendantsOfType {
            types: types.iter().map(|t| (*t).to_owned()).collect(),
            start: start.unwrap_or(Point::ZERO),
            end: end.unwrap_or(Point::MAX),
        })
    }

    /// Nearest proper ancestor of any of `types`.
    pub fn closest(&self, types: &[&str]) -> Option<SyntaxNode> {
        self.nav(Nav::Closest(types.iter().map(|t| (*t).to_owned()).collect()))
    }

    pub fn child_for_field_id(&self, field_id: NodeFieldId) -> Option<SyntaxNode> {
        self.nav(Nav::ChildForFieldId(field_id))
    }

    pub fn children_for_field_id(&self, field_id: NodeFieldId) -> Vec<SyntaxNode> {
        self.nav_many(NavMany::ChildrenForFieldId(field_id))
    }

    pub fn child_for_field_name(&self, field_name: &str) -> Option<SyntaxNode> {
        let field_id = self.tree().language().field_id_for_name(field_name)?;
        self.child_for_field_id(field_id)
    }

    pub fn children_for_field_name(&self, field_name: &str) -> Vec<SyntaxNode> {
        match self.tree().language().field_id_for_name(field_name) {
            Some(field_id) => self.children_for_field_id(field_id),
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Specialized accessors
    // ------------------------------------------------------------------------

    /// Read a field through its pre-resolved accessor.
    pub fn field_value(&self, accessor: &FieldAccessor) -> FieldValue {
        if accessor.multiple {
            FieldValue::Multiple(self.children_for_field_id(accessor.field_id))
        } else {
            FieldValue::Single(self.child_for_field_id(accessor.field_id))
        }
    }

    /// Read a field declared by this node's class, by field name.
    pub fn field(&self, field_name: &str) -> Option<FieldValue> {
        let accessor = self.0.class.field(field_name)?;
        Some(self.field_value(accessor))
    }

    /// Read a field by accessor name (`left_node`, `arguments_nodes`).
    pub fn accessor(&self, accessor: &str) -> Option<FieldValue> {
        let accessor = self.0.class.accessor(accessor)?;
        Some(self.field_value(accessor))
    }

    /// A cursor positioned at this node.
    pub fn walk(&self) -> TreeCursor {
        let id = self.call(|native, tree, exchange| native.walk(tree, exchange));
        TreeCursor::new(self.tree().clone(), id)
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            type_name: self.type_name(),
            text: self.text(),
            start: self.start_position(),
            end: self.end_position(),
        }
    }
}

impl PartialEq for SyntaxNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SyntaxNode {}

impl Hash for SyntaxNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for SyntaxNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {{", self.0.class.name())?;
        writeln!(f, "  type: {},", self.type_name())?;
        writeln!(f, "  startPosition: {},", self.start_position())?;
        writeln!(f, "  endPosition: {},", self.end_position())?;
        writeln!(f, "  childCount: {},", self.child_count())?;
        write!(f, "}}")
    }
}

impl fmt::Display for SyntaxNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sexp())
    }
}

impl Serialize for SyntaxNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.summary().serialize(serializer)
    }
}
