//! Drives native match search and rebuilds matches from the flat stream.

use std::rc::Rc;

use serde::Serialize;
use tracing::trace;

use crate::cache;
use crate::error::{Error, Result};
use crate::native::{QueryRange, StreamItem};
use crate::node::SyntaxNode;
use crate::query::{Properties, Query};

/// A named node bound by a pattern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryCapture {
    pub name: Rc<str>,
    pub node: SyntaxNode,
}

/// One accepted match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMatch {
    pub pattern: u32,
    pub captures: Vec<QueryCapture>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_properties: Option<Rc<Properties>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asserted_properties: Option<Rc<Properties>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refuted_properties: Option<Rc<Properties>>,
}

/// One capture of an accepted match, in capture order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub pattern: u32,
    pub name: Rc<str>,
    pub node: SyntaxNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_properties: Option<Rc<Properties>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asserted_properties: Option<Rc<Properties>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refuted_properties: Option<Rc<Properties>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Search {
    Matches,
    Captures,
}

/// A match as the engine reported it, before predicates run.
struct RawMatch {
    pattern: u32,
    capture_index: Option<u32>,
    captures: Vec<QueryCapture>,
}

pub(crate) fn matches(query: &Query, root: &SyntaxNode, range: QueryRange) -> Result<Vec<QueryMatch>> {
    let raw = search(query, root, range, Search::Matches)?;
    let found = raw.len();

    let results: Vec<QueryMatch> = raw
        .into_iter()
        .filter_map(|m| {
            let predicates = query.pattern(m.pattern);
            predicates.accepts(&m.captures).then(|| QueryMatch {
                pattern: m.pattern,
                captures: m.captures,
                set_properties: predicates.set_properties.clone(),
                asserted_properties: predicates.asserted_properties.clone(),
                refuted_properties: predicates.refuted_properties.clone(),
            })
        })
        .collect();

    trace!(found, kept = results.len(), "query matches");
    Ok(results)
}

pub(crate) fn captures(
    query: &Query,
    root: &SyntaxNode,
    range: QueryRange,
) -> Result<Vec<CaptureResult>> {
    let raw = search(query, root, range, Search::Captures)?;
    let found = raw.len();

    let mut results = Vec::with_capacity(found);
    for mut m in raw {
        let predicates = query.pattern(m.pattern);
        if !predicates.accepts(&m.captures) {
            continue;
        }
        // Bounds were checked while splitting the stream.
        let index = m.capture_index.unwrap_or_default() as usize;
        let QueryCapture { name, node } = m.captures.swap_remove(index);
        results.push(CaptureResult {
            pattern: m.pattern,
            name,
            node,
            set_properties: predicates.set_properties.clone(),
            asserted_properties: predicates.asserted_properties.clone(),
            refuted_properties: predicates.refuted_properties.clone(),
        });
    }

    trace!(found, kept = results.len(), "query captures");
    Ok(results)
}

fn search(query: &Query, root: &SyntaxNode, range: QueryRange, kind: Search) -> Result<Vec<RawMatch>> {
    let tree = root.tree();
    if !tree.engine().ptr_eq(query.engine()) {
        return Err(Error::ForeignNode);
    }

    let query_id = query.id();
    let (stream, nodes, expected) = tree.engine().exchange(Some(tree.cache()), |native, exchange| {
        exchange.marshal(root);
        let raw = match kind {
            Search::Matches => native.query_matches(query_id, tree.id(), exchange, range),
            Search::Captures => native.query_captures(query_id, tree.id(), exchange, range),
        };
        let nodes = cache::unmarshal_many(tree, &raw.nodes, &mut exchange.reader());
        (raw.stream, nodes, raw.nodes.len())
    });
    if nodes.len() != expected {
        return Err(Error::MalformedStream("null node in query results"));
    }

    split_stream(stream, nodes, kind == Search::Captures, query.pattern_count())
}

/// Rebuild matches from `Index(pattern) [Index(capture)] Name*` runs, taking
/// one node per name.
fn split_stream(
    stream: Vec<StreamItem>,
    nodes: Vec<SyntaxNode>,
    with_capture_index: bool,
    pattern_count: usize,
) -> Result<Vec<RawMatch>> {
    let mut items = stream.into_iter().peekable();
    let mut nodes = nodes.into_iter();
    let mut matches = Vec::new();

    while let Some(item) = items.next() {
        let StreamItem::Index(pattern) = item else {
            return Err(Error::MalformedStream("capture name before pattern index"));
        };
        if pattern as usize >= pattern_count {
            return Err(Error::MalformedStream("pattern index out of range"));
        }
        let capture_index = if with_capture_index {
            match items.next() {
                Some(StreamItem::Index(index)) => Some(index),
                _ => return Err(Error::MalformedStream("missing capture index")),
            }
        } else {
            None
        };

        let mut captures = Vec::new();
        while let Some(StreamItem::Name(name)) =
            items.next_if(|item| matches!(item, StreamItem::Name(_)))
        {
            let node = nodes
                .next()
                .ok_or(Error::MalformedStream("more capture names than nodes"))?;
            captures.push(QueryCapture { name, node });
        }

        if let Some(index) = capture_index
            && index as usize >= captures.len()
        {
            return Err(Error::MalformedStream("capture index past the end of its match"));
        }
        matches.push(RawMatch {
            pattern,
            capture_index,
            captures,
        });
    }

    if nodes.next().is_some() {
        return Err(Error::MalformedStream("more nodes than capture names"));
    }
    Ok(matches)
}
