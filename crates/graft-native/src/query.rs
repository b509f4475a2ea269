//! Queries over the raw C API.
//!
//! The safe `Query` wrapper evaluates text predicates itself and rejects the
//! ones it does not know. The managed side compiles predicates on its own,
//! so the engine here only reports their raw steps and the unfiltered matches.

use std::ffi::c_char;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::rc::Rc;
use std::slice;

use arborium_tree_sitter::{Node, ffi};
use graft::{NativeError, PredicateStep, QueryRange};
use graft_core::{Point, PredicateStepType};

use crate::convert::to_raw_point;

pub(crate) struct RawQuery {
    ptr: NonNull<ffi::TSQuery>,
    capture_names: Vec<Rc<str>>,
}

/// One match as found by the query cursor.
pub(crate) struct FoundMatch<'t> {
    pub(crate) pattern: u32,
    /// Index into `captures` of the capture being reported, for capture searches.
    pub(crate) capture_index: Option<u32>,
    pub(crate) captures: Vec<(Rc<str>, Node<'t>)>,
}

impl RawQuery {
    pub(crate) fn new(language: *const ffi::TSLanguage, source: &str) -> Result<Self, NativeError> {
        let len = u32::try_from(source.len()).map_err(|_| NativeError::QuerySyntax {
            offset: u32::MAX,
            kind: "syntax".to_owned(),
        })?;
        let mut offset = 0u32;
        let mut error: ffi::TSQueryError = ffi::TSQueryErrorNone;
        // SAFETY: the source pointer is valid for `len` bytes.
        let ptr = unsafe {
            ffi::ts_query_new(
                language,
                source.as_ptr().cast::<c_char>(),
                len,
                &mut offset,
                &mut error,
            )
        };
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(NativeError::QuerySyntax {
                offset,
                kind: error_kind(error).to_owned(),
            });
        };

        let mut query = Self {
            ptr,
            capture_names: Vec::new(),
        };
        // SAFETY: `ptr` is a live query.
        let count = unsafe { ffi::ts_query_capture_count(ptr.as_ptr()) };
        query.capture_names = (0..count)
            .map(|id| Rc::from(query.capture_name(id)))
            .collect();
        Ok(query)
    }

    pub(crate) fn pattern_count(&self) -> u32 {
        // SAFETY: `ptr` is a live query.
        unsafe { ffi::ts_query_pattern_count(self.ptr.as_ptr()) }
    }

    pub(crate) fn predicates(&self) -> Vec<Vec<PredicateStep>> {
        (0..self.pattern_count())
            .map(|pattern| {
                let mut count = 0u32;
                // SAFETY: the returned steps live as long as the query.
                let steps = unsafe {
                    let ptr = ffi::ts_query_predicates_for_pattern(self.ptr.as_ptr(), pattern, &mut count);
                    if ptr.is_null() || count == 0 {
                        &[][..]
                    } else {
                        slice::from_raw_parts(ptr, count as usize)
                    }
                };
                steps
                    .iter()
                    .filter_map(|step| {
                        let kind = PredicateStepType::from_raw(step.type_)?;
                        let value = match kind {
                            PredicateStepType::Done => String::new(),
                            PredicateStepType::Capture => self.capture_name(step.value_id),
                            PredicateStepType::String => self.string_value(step.value_id),
                        };
                        Some(PredicateStep { kind, value })
                    })
                    .collect()
            })
            .collect()
    }

    /// Runs the query under `node`, restricted to `range`.
    ///
    /// Capture searches yield one entry per capture, in document order, each
    /// carrying every capture of its match.
    pub(crate) fn search<'t>(&self, node: Node<'t>, range: QueryRange, captures: bool) -> Vec<FoundMatch<'t>> {
        let cursor = QueryCursor::new();
        // SAFETY: the cursor, query and node are all live for the search.
        unsafe {
            if !range.is_unbounded() {
                let end = if range.get_end().is_zero() {
                    Point::MAX
                } else {
                    range.get_end()
                };
                ffi::ts_query_cursor_set_point_range(
                    cursor.0,
                    to_raw_point(range.get_start()),
                    to_raw_point(end),
                );
            }
            ffi::ts_query_cursor_exec(cursor.0, self.ptr.as_ptr(), node.into_raw());
        }

        let mut found = Vec::new();
        let mut slot = MaybeUninit::<ffi::TSQueryMatch>::uninit();
        loop {
            let mut capture_index = 0u32;
            // SAFETY: the cursor writes a full match whenever it returns true.
            let current = unsafe {
                let more = if captures {
                    ffi::ts_query_cursor_next_capture(cursor.0, slot.as_mut_ptr(), &mut capture_index)
                } else {
                    ffi::ts_query_cursor_next_match(cursor.0, slot.as_mut_ptr())
                };
                if !more {
                    break;
                }
                slot.assume_init_ref()
            };

            // SAFETY: match captures stay valid until the cursor advances.
            let raw_captures = unsafe {
                if current.capture_count == 0 {
                    &[][..]
                } else {
                    slice::from_raw_parts(current.captures, usize::from(current.capture_count))
                }
            };
            found.push(FoundMatch {
                pattern: u32::from(current.pattern_index),
                capture_index: captures.then_some(capture_index),
                captures: raw_captures
                    .iter()
                    .map(|capture| {
                        let name = Rc::clone(&self.capture_names[capture.index as usize]);
                        // SAFETY: captured nodes belong to the searched tree.
                        (name, unsafe { Node::from_raw(capture.node) })
                    })
                    .collect(),
            });
        }
        found
    }

    fn capture_name(&self, id: u32) -> String {
        let mut len = 0u32;
        // SAFETY: names live as long as the query.
        unsafe {
            let ptr = ffi::ts_query_capture_name_for_id(self.ptr.as_ptr(), id, &mut len);
            lossy(ptr, len)
        }
    }

    fn string_value(&self, id: u32) -> String {
        let mut len = 0u32;
        // SAFETY: strings live as long as the query.
        unsafe {
            let ptr = ffi::ts_query_string_value_for_id(self.ptr.as_ptr(), id, &mut len);
            lossy(ptr, len)
        }
    }
}

impl Drop for RawQuery {
    fn drop(&mut self) {
        // SAFETY: deleted exactly once.
        unsafe { ffi::ts_query_delete(self.ptr.as_ptr()) }
    }
}

struct QueryCursor(*mut ffi::TSQueryCursor);

impl QueryCursor {
    fn new() -> Self {
        // SAFETY: no preconditions.
        Self(unsafe { ffi::ts_query_cursor_new() })
    }
}

impl Drop for QueryCursor {
    fn drop(&mut self) {
        // SAFETY: deleted exactly once.
        unsafe { ffi::ts_query_cursor_delete(self.0) }
    }
}

unsafe fn lossy(ptr: *const c_char, len: u32) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: the caller guarantees `ptr` is valid for `len` bytes.
    let bytes = unsafe { slice::from_raw_parts(ptr.cast::<u8>(), len as usize) };
    String::from_utf8_lossy(bytes).into_owned()
}

fn error_kind(error: ffi::TSQueryError) -> &'static str {
    match error {
        ffi::TSQueryErrorNodeType => "node type",
        ffi::TSQueryErrorField => "field",
        ffi::TSQueryErrorCapture => "capture",
        ffi::TSQueryErrorStructure => "structure",
        ffi::TSQueryErrorLanguage => "language",
        _ => "syntax",
    }
}
