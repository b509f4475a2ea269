//! Protocol invariant checks excluded from coverage reports.
//!
//! A failure here is a bug in the binding or in a `Native` implementation,
//! never a user error.

#![cfg_attr(coverage_nightly, coverage(off))]

use std::cell::{BorrowMutError, RefMut};

use graft_core::NODE_FIELD_COUNT;

use crate::node::SyntaxNode;

pub(crate) fn ensure_idle<'a, T: ?Sized>(
    borrow: Result<RefMut<'a, T>, BorrowMutError>,
) -> RefMut<'a, T> {
    borrow.unwrap_or_else(|_| {
        panic!(
            "Engine: nested boundary crossing \
             (a native call is in progress; node and cursor operations must not interleave)"
        )
    })
}

pub(crate) fn ensure_cached(node: Option<SyntaxNode>, id: u64) -> SyntaxNode {
    node.unwrap_or_else(|| {
        panic!("Native: reported node {id:#x} as cached but it is not live in the identity cache")
    })
}

pub(crate) fn ensure_written(len: usize, offset: usize) {
    assert!(
        offset + NODE_FIELD_COUNT <= len,
        "Native: returned a fresh slot without writing its record (offset {offset}, {len} words written)"
    );
}

pub(crate) fn ensure_root(node: Option<SyntaxNode>) -> SyntaxNode {
    node.unwrap_or_else(|| panic!("Native: tree has no root node"))
}
