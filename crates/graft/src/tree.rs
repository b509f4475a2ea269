//! Parsed trees and their source input.

use std::fmt;
use std::rc::Rc;

use graft_core::{InputEdit, Point, Range};
use tracing::debug;

use crate::cache::{self, NodeCache};
use crate::cursor::TreeCursor;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::invariants::ensure_root;
use crate::language::Language;
use crate::native::TreeId;
use crate::node::SyntaxNode;

/// Source a tree was parsed from.
#[derive(Clone)]
pub enum TextInput {
    Text(Rc<str>),
    /// `(byte offset, position) -> chunk`; an empty chunk ends the input.
    Chunks(Rc<dyn Fn(usize, Point) -> String>),
}

impl TextInput {
    pub fn chunks(f: impl Fn(usize, Point) -> String + 'static) -> Self {
        TextInput::Chunks(Rc::new(f))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TextInput::Text(text) => Some(text),
            TextInput::Chunks(_) => None,
        }
    }

    /// The chunk starting at `offset`, at most `buffer_size` bytes for text.
    pub(crate) fn chunk(&self, offset: usize, position: Point, buffer_size: Option<usize>) -> String {
        match self {
            TextInput::Text(text) => {
                let rest = text.get(offset..).unwrap_or_default();
                let Some(size) = buffer_size.filter(|&size| size < rest.len()) else {
                    return rest.to_owned();
                };
                let mut end = size.max(1);
                while !rest.is_char_boundary(end) {
                    end += 1;
                }
                rest[..end].to_owned()
            }
            TextInput::Chunks(f) => f(offset, position),
        }
    }
}

impl From<&str> for TextInput {
    fn from(text: &str) -> Self {
        TextInput::Text(text.into())
    }
}

impl From<String> for TextInput {
    fn from(text: String) -> Self {
        TextInput::Text(text.into())
    }
}

impl fmt::Debug for TextInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextInput::Text(text) => f.debug_tuple("Text").field(text).finish(),
            TextInput::Chunks(_) => f.write_str("Chunks(..)"),
        }
    }
}

/// A syntax tree owned by the native engine.
///
/// Cheap to clone. The native tree is deleted once the last handle and the
/// last node of this tree are gone.
#[derive(Clone)]
pub struct Tree(Rc<TreeInner>);

struct TreeInner {
    engine: Engine,
    id: TreeId,
    input: TextInput,
    language: Language,
    cache: NodeCache,
}

impl Drop for TreeInner {
    fn drop(&mut self) {
        let id = self.id;
        debug!(tree = id.get(), "deleting tree");
        self.engine
            .release("tree", id.get(), |native| native.delete_tree(id));
    }
}

impl Tree {
    pub(crate) fn new(engine: Engine, id: TreeId, input: TextInput, language: Language) -> Self {
        Self(Rc::new(TreeInner {
            engine,
            id,
            input,
            language,
            cache: NodeCache::new(),
        }))
    }

    pub fn id(&self) -> TreeId {
        self.0.id
    }

    pub fn engine(&self) -> &Engine {
        &self.0.engine
    }

    pub fn language(&self) -> &Language {
        &self.0.language
    }

    pub fn input(&self) -> &TextInput {
        &self.0.input
    }

    pub(crate) fn cache(&self) -> &NodeCache {
        &self.0.cache
    }

    /// Number of nodes of this tree currently alive on the managed side.
    pub fn live_node_count(&self) -> usize {
        self.0.cache.len()
    }

    pub fn root_node(&self) -> SyntaxNode {
        self.engine().exchange(Some(self.cache()), |native, exchange| {
            let slot = native.root_node(self.id(), exchange);
            ensure_root(cache::unmarshal(self, slot, &mut exchange.reader()))
        })
    }

    /// Apply an edit to the native tree.
    ///
    /// Live nodes are repositioned on a best-effort basis; re-fetch nodes from
    /// `root_node` before relying on their positions.
    pub fn edit(&self, edit: &InputEdit) {
        let id = self.id();
        self.engine().with_native(|native| native.edit_tree(id, edit));

        let live = self.cache().live_nodes();
        for node in &live {
            self.engine().exchange(Some(self.cache()), |native, exchange| {
                exchange.marshal(node);
                native.edit_node(id, exchange, edit);
                node.set_fields(exchange.marshaled());
            });
        }
        debug!(tree = id.get(), repositioned = live.len(), "edited tree");
    }

    pub fn walk(&self) -> TreeCursor {
        self.root_node().walk()
    }

    /// Source text of `range`.
    ///
    /// Chunked input is read until the range is covered or a chunk comes
    /// back empty.
    pub fn text(&self, range: &Range) -> String {
        let start = range.start_index as usize;
        let end = (range.end_index as usize).max(start);
        match &self.0.input {
            TextInput::Text(text) => {
                let bytes = text.as_bytes();
                let end = end.min(bytes.len());
                let start = start.min(end);
                String::from_utf8_lossy(&bytes[start..end]).into_owned()
            }
            TextInput::Chunks(f) => {
                let goal = end - start;
                let mut result = String::new();
                let mut position = range.start_position;
                while result.len() < goal {
                    let chunk = f(start + result.len(), position);
                    if chunk.is_empty() {
                        break;
                    }
                    position = position.advance(&chunk);
                    result.push_str(&chunk);
                }
                if result.len() > goal {
                    let mut cut = goal;
                    while !result.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    result.truncate(cut);
                }
                result
            }
        }
    }

    /// Ranges whose syntactic structure differs between `self` and `other`.
    pub fn changed_ranges(&self, other: &Tree) -> Result<Vec<Range>> {
        if !self.engine().ptr_eq(other.engine()) {
            return Err(Error::ForeignTree);
        }
        let (old, new) = (self.id(), other.id());
        Ok(self
            .engine()
            .with_native(|native| native.changed_ranges(old, new)))
    }

    /// Smallest range covering the nodes changed by `edit` calls, or `None`
    /// when the tree is unedited.
    pub fn edited_range(&self) -> Option<Range> {
        let id = self.id();
        self.engine().with_native(|native| native.edited_range(id))
    }

    pub fn ptr_eq(&self, other: &Tree) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Tree {}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("id", &self.0.id)
            .field("language", &self.0.language.id())
            .field("live_nodes", &self.live_node_count())
            .finish()
    }
}
