//! Stateful depth-first traversal.

use std::fmt;

use graft_core::Point;

use crate::cache;
use crate::error::{Error, Result};
use crate::native::{CursorId, CursorMove};
use crate::node::SyntaxNode;
use crate::tree::Tree;

/// A cursor over a [`Tree`], owned by the native engine.
///
/// Position reads address the cursor itself; no node is marshaled.
pub struct TreeCursor {
    tree: Tree,
    id: CursorId,
}

impl TreeCursor {
    pub(crate) fn new(tree: Tree, id: CursorId) -> Self {
        Self { tree, id }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    fn goto(&mut self, to: CursorMove) -> bool {
        let id = self.id;
        self.tree
            .engine()
            .with_native(|native| native.cursor_goto(id, to))
    }

    pub fn goto_first_child(&mut self) -> bool {
        self.goto(CursorMove::FirstChild)
    }

    pub fn goto_next_sibling(&mut self) -> bool {
        self.goto(CursorMove::NextSibling)
    }

    pub fn goto_parent(&mut self) -> bool {
        self.goto(CursorMove::Parent)
    }

    /// Move to the first child extending past byte `index`; returns its index.
    pub fn goto_first_child_for_index(&mut self, index: u32) -> Option<u32> {
        let id = self.id;
        self.tree
            .engine()
            .with_native(|native| native.cursor_goto_first_child_for_index(id, index))
    }

    /// Reposition the cursor at `node`, which may belong to another tree of
    /// the same engine.
    pub fn reset(&mut self, node: &SyntaxNode) -> Result<()> {
        if !node.tree().engine().ptr_eq(self.tree.engine()) {
            return Err(Error::ForeignNode);
        }
        let id = self.id;
        let tree = node.tree();
        tree.engine().exchange(Some(tree.cache()), |native, exchange| {
            exchange.marshal(node);
            native.cursor_reset(id, tree.id(), exchange);
        });
        self.tree = tree.clone();
        Ok(())
    }

    /// The node under the cursor, or `None` when the engine reports no node
    /// at the cursor position.
    pub fn current_node(&self) -> Option<SyntaxNode> {
        let id = self.id;
        let tree = &self.tree;
        tree.engine().exchange(Some(tree.cache()), |native, exchange| {
            let slot = native.cursor_current_node(id, exchange);
            cache::unmarshal(tree, slot, &mut exchange.reader())
        })
    }

    pub fn current_field_name(&self) -> Option<String> {
        let id = self.id;
        self.tree
            .engine()
            .with_native(|native| native.cursor_current_field_name(id))
    }

    pub fn start_position(&self) -> Point {
        let id = self.id;
        self.tree.engine().exchange(None, |native, exchange| {
            native.cursor_start_position(id, exchange);
            exchange.point()
        })
    }

    pub fn end_position(&self) -> Point {
        let id = self.id;
        self.tree.engine().exchange(None, |native, exchange| {
            native.cursor_end_position(id, exchange);
            exchange.point()
        })
    }

    pub fn start_index(&self) -> Option<u32> {
        self.current_node().map(|node| node.start_index())
    }

    pub fn end_index(&self) -> Option<u32> {
        self.current_node().map(|node| node.end_index())
    }

    pub fn node_type(&self) -> Option<String> {
        self.current_node().map(|node| node.type_name())
    }

    pub fn node_is_named(&self) -> bool {
        self.current_node().is_some_and(|node| node.is_named())
    }

    pub fn node_is_missing(&self) -> bool {
        self.current_node().is_some_and(|node| node.is_missing())
    }

    pub fn node_text(&self) -> Option<String> {
        self.current_node().map(|node| node.text())
    }
}

impl Drop for TreeCursor {
    fn drop(&mut self) {
        let id = self.id;
        self.tree
            .engine()
            .release("cursor", id.get(), |native| native.delete_cursor(id));
    }
}

impl fmt::Debug for TreeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeCursor")
            .field("id", &self.id)
            .field("tree", &self.tree.id())
            .finish()
    }
}
