//! Per-tree identity cache: one live `SyntaxNode` per native node id.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::{Rc, Weak};

use graft_core::{ERROR_TYPE_ID, NodeFields, NodeTypeId};
use tracing::trace;

use crate::invariants::ensure_cached;
use crate::native::Slot;
use crate::node::{NodeInner, SyntaxNode};
use crate::transfer::SlotReader;
use crate::tree::Tree;

/// Weak map from node id to the wrapper handed out for it.
///
/// Entries die with their node, so the cache never keeps nodes alive.
#[derive(Debug, Default)]
pub(crate) struct NodeCache {
    nodes: RefCell<HashMap<u64, Weak<NodeInner>>>,
}

impl NodeCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id: u64) -> Option<SyntaxNode> {
        self.nodes
            .borrow()
            .get(&id)
            .and_then(Weak::upgrade)
            .map(SyntaxNode::from_inner)
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.nodes
            .borrow()
            .get(&id)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    pub(crate) fn insert(&self, node: &SyntaxNode) {
        self.nodes.borrow_mut().insert(node.id(), node.downgrade());
    }

    /// Drop the entry for a node that just died.
    ///
    /// Skips a live replacement and tolerates being called mid-borrow.
    pub(crate) fn forget(&self, id: u64) {
        if let Ok(mut nodes) = self.nodes.try_borrow_mut()
            && let Entry::Occupied(entry) = nodes.entry(id)
            && entry.get().strong_count() == 0
        {
            entry.remove();
        }
    }

    pub(crate) fn live_nodes(&self) -> Vec<SyntaxNode> {
        self.nodes
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .map(SyntaxNode::from_inner)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// The cached node for `fields`, or a new one registered in the tree cache.
///
/// A cached node takes the freshly reported words, so it always reflects the
/// engine's latest view of that node.
pub(crate) fn get_or_create(tree: &Tree, fields: NodeFields, type_id: NodeTypeId) -> SyntaxNode {
    if let Some(node) = tree.cache().get(fields.id()) {
        node.set_fields(fields);
        return node;
    }
    let class = if type_id == ERROR_TYPE_ID {
        tree.language().generic_class()
    } else {
        tree.language().node_class(type_id)
    };
    let node = SyntaxNode::new(tree.clone(), fields, class);
    tree.cache().insert(&node);
    node
}

/// Turn one slot into a node. Id `0` is `None`.
pub(crate) fn unmarshal(tree: &Tree, slot: Slot, reader: &mut SlotReader<'_>) -> Option<SyntaxNode> {
    match slot {
        Slot::Null => None,
        Slot::Cached(id) => Some(ensure_cached(tree.cache().get(id), id)),
        Slot::Fresh(type_id) => {
            let fields = reader.next_fields();
            if fields.is_null() {
                return None;
            }
            Some(get_or_create(tree, fields, type_id))
        }
    }
}

/// Turn a batch of slots into nodes.
///
/// Nodes repeated within the batch resolve through a per-call map first, so
/// they share one wrapper even before the tree cache sees them. The reader
/// only advances for fresh slots. Null slots are skipped.
pub(crate) fn unmarshal_many(
    tree: &Tree,
    slots: &[Slot],
    reader: &mut SlotReader<'_>,
) -> Vec<SyntaxNode> {
    let mut local: HashMap<u64, SyntaxNode> = HashMap::new();
    let mut nodes = Vec::with_capacity(slots.len());

    for &slot in slots {
        let node = match slot {
            Slot::Cached(id) => match local.get(&id) {
                Some(node) => node.clone(),
                None => ensure_cached(tree.cache().get(id), id),
            },
            Slot::Fresh(type_id) => {
                let fields = reader.next_fields();
                if fields.is_null() {
                    continue;
                }
                match local.get(&fields.id()) {
                    Some(node) => node.clone(),
                    None => get_or_create(tree, fields, type_id),
                }
            }
            Slot::Null => continue,
        };
        local.entry(node.id()).or_insert_with(|| node.clone());
        nodes.push(node);
    }

    trace!(slots = slots.len(), distinct = local.len(), "unmarshaled node batch");
    nodes
}

impl SyntaxNode {
    pub(crate) fn from_inner(inner: Rc<NodeInner>) -> Self {
        Self(inner)
    }
}
