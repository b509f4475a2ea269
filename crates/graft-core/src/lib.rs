#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Wire-level vocabulary shared by the graft binding and native engines.
//!
//! Three layers:
//! - **Deserialization layer**: 1:1 mapping to `node-types.json`
//! - **Geometry**: points, ranges and edits in byte/row/column form
//! - **Wire**: the six-word node record and predicate step encoding

use std::collections::HashMap;
use std::num::NonZeroU16;

mod point;
pub mod utils;
mod wire;


pub use point::{InputEdit, Point, Range};
pub use wire::{ERROR_TYPE_ID, NODE_FIELD_COUNT, NodeFields, PredicateStepType};

// ============================================================================
// Deserialization Layer
// ============================================================================

/// Raw node definition from `node-types.json`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawNode {
    #[serde(rename = "type")]
    pub type_name: String,
    pub named: bool,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub extra: bool,
    #[serde(default)]
    pub fields: HashMap<String, RawCardinality>,
    pub children: Option<RawCardinality>,
    pub subtypes: Option<Vec<RawTypeRef>>,
}

/// Cardinality constraints for a field or children slot.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawCardinality {
    pub multiple: bool,
    pub required: bool,
    pub types: Vec<RawTypeRef>,
}

/// Reference to a node type.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawTypeRef {
    #[serde(rename = "type")]
    pub type_name: String,
    pub named: bool,
}

/// Parse `node-types.json` content into raw nodes.
pub fn parse_node_types(json: &str) -> Result<Vec<RawNode>, serde_json::Error> {
    serde_json::from_str(json)
}

// ============================================================================
// Common Types
// ============================================================================

/// Node type ID (tree-sitter uses u16).
pub type NodeTypeId = u16;

/// Field ID (tree-sitter uses NonZeroU16).
pub type NodeFieldId = NonZeroU16;

/// Metadata for one entry of a language's symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeKind {
    pub name: String,
    pub named: bool,
    pub visible: bool,
}

impl NodeKind {
    /// Named and visible: the kinds that can carry fields.
    pub fn is_regular(&self) -> bool {
        self.named && self.visible
    }
}
