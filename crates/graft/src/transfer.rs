//! The single-slot channel nodes cross the boundary through.
//!
//! `marshal` copies one node's six words to the head of the buffer; the
//! following native call operates on that node. Native results are written
//! back through [`Exchange::emit`], one six-word record per fresh node,
//! starting again at the head. Nothing is batched across calls.

use graft_core::{NODE_FIELD_COUNT, NodeFields, NodeTypeId, Point};

use crate::cache::NodeCache;
use crate::invariants::ensure_written;
use crate::native::Slot;
use crate::node::SyntaxNode;

/// Backing storage owned by the engine. Grows to the largest batch seen.
#[derive(Debug)]
pub(crate) struct TransferBuffer {
    words: Vec<u32>,
    point: Point,
}

impl TransferBuffer {
    pub(crate) fn new() -> Self {
        Self {
            words: vec![0; NODE_FIELD_COUNT],
            point: Point::ZERO,
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity_in_nodes(&self) -> usize {
        self.words.len() / NODE_FIELD_COUNT
    }
}

/// One marshal → native call → unmarshal sequence.
pub struct Exchange<'a> {
    buffer: &'a mut TransferBuffer,
    cache: Option<&'a NodeCache>,
    written: usize,
}

impl<'a> Exchange<'a> {
    pub(crate) fn new(buffer: &'a mut TransferBuffer, cache: Option<&'a NodeCache>) -> Self {
        Self {
            buffer,
            cache,
            written: 0,
        }
    }

    pub(crate) fn marshal(&mut self, node: &SyntaxNode) {
        self.write_marshaled(node.fields());
    }

    /// The node most recently marshaled.
    ///
    /// Read it before the first [`emit`](Self::emit): results reuse the same words.
    pub fn marshaled(&self) -> NodeFields {
        NodeFields::from_slice(&self.buffer.words)
    }

    /// Overwrite the marshaled node, e.g. after repositioning it.
    pub fn write_marshaled(&mut self, fields: NodeFields) {
        self.buffer.words[..NODE_FIELD_COUNT].copy_from_slice(fields.words());
        self.written = 0;
    }

    /// Whether the tree's identity cache holds a live node with this id.
    pub fn is_cached(&self, id: u64) -> bool {
        self.cache.is_some_and(|cache| cache.contains(id))
    }

    /// Hand one result node back to the managed side.
    ///
    /// Cached nodes are reported by id only; everything else is written as a
    /// six-word record at the next offset.
    pub fn emit(&mut self, id: u64, type_id: NodeTypeId, context: [u32; 4]) -> Slot {
        if id == 0 {
            return Slot::Null;
        }
        if self.is_cached(id) {
            return Slot::Cached(id);
        }
        let start = self.written;
        let end = start + NODE_FIELD_COUNT;
        if self.buffer.words.len() < end {
            self.buffer.words.resize(end, 0);
        }
        self.buffer.words[start..end].copy_from_slice(NodeFields::new(id, context).words());
        self.written = end;
        Slot::Fresh(type_id)
    }

    pub fn write_point(&mut self, point: Point) {
        self.buffer.point = point;
    }

    pub(crate) fn point(&self) -> Point {
        self.buffer.point
    }

    pub(crate) fn reader(&self) -> SlotReader<'_> {
        SlotReader {
            words: &self.buffer.words[..self.written],
            offset: 0,
        }
    }
}

/// Walks the records of fresh slots in emission order.
pub(crate) struct SlotReader<'b> {
    words: &'b [u32],
    offset: usize,
}

impl SlotReader<'_> {
    pub(crate) fn next_fields(&mut self) -> NodeFields {
        ensure_written(self.words.len(), self.offset);
        let fields = NodeFields::from_slice(&self.words[self.offset..]);
        self.offset += NODE_FIELD_COUNT;
        fields
    }
}
