//! Owned tree-sitter cursors that outlive any single borrow of their tree.
//!
//! The managed cursor keeps its tree alive, so the raw cursor never points
//! into a deleted tree.

use std::ffi::CStr;

use arborium_tree_sitter::{Node, ffi};
use graft::CursorMove;

pub(crate) struct RawCursor(ffi::TSTreeCursor);

impl RawCursor {
    pub(crate) fn new(node: Node<'_>) -> Self {
        // SAFETY: the node is valid for the duration of the call.
        Self(unsafe { ffi::ts_tree_cursor_new(node.into_raw()) })
    }

    pub(crate) fn reset(&mut self, node: Node<'_>) {
        // SAFETY: `self.0` was created by `ts_tree_cursor_new`.
        unsafe { ffi::ts_tree_cursor_reset(&mut self.0, node.into_raw()) }
    }

    pub(crate) fn goto(&mut self, to: CursorMove) -> bool {
        // SAFETY: `self.0` was created by `ts_tree_cursor_new`.
        unsafe {
            match to {
                CursorMove::FirstChild => ffi::ts_tree_cursor_goto_first_child(&mut self.0),
                CursorMove::NextSibling => ffi::ts_tree_cursor_goto_next_sibling(&mut self.0),
                CursorMove::Parent => ffi::ts_tree_cursor_goto_parent(&mut self.0),
            }
        }
    }

    /// Index of the child moved to, `None` when no child ends past `index`.
    pub(crate) fn goto_first_child_for_byte(&mut self, index: u32) -> Option<u32> {
        // SAFETY: `self.0` was created by `ts_tree_cursor_new`.
        let child = unsafe { ffi::ts_tree_cursor_goto_first_child_for_byte(&mut self.0, index) };
        u32::try_from(child).ok()
    }

    pub(crate) fn node(&self) -> Node<'_> {
        // SAFETY: the cursor's tree is alive while the cursor is (see module docs).
        unsafe { Node::from_raw(ffi::ts_tree_cursor_current_node(&self.0)) }
    }

    pub(crate) fn field_name(&self) -> Option<String> {
        // SAFETY: field names are static strings owned by the language.
        unsafe {
            let name = ffi::ts_tree_cursor_current_field_name(&self.0);
            if name.is_null() {
                return None;
            }
            CStr::from_ptr(name).to_str().ok().map(str::to_owned)
        }
    }
}

impl Drop for RawCursor {
    fn drop(&mut self) {
        // SAFETY: deleted exactly once.
        unsafe { ffi::ts_tree_cursor_delete(&mut self.0) }
    }
}
