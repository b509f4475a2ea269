//! Conversions between the wire types and tree-sitter's.

use arborium_tree_sitter as tree_sitter;
use arborium_tree_sitter::ffi;
use graft::LogType;
use graft_core::{InputEdit, Point, Range};

pub(crate) fn to_ts_point(point: Point) -> tree_sitter::Point {
    tree_sitter::Point::new(point.row as usize, point.column as usize)
}

pub(crate) fn from_ts_point(point: tree_sitter::Point) -> Point {
    Point::new(saturate(point.row), saturate(point.column))
}

pub(crate) fn to_raw_point(point: Point) -> ffi::TSPoint {
    ffi::TSPoint {
        row: point.row,
        column: point.column,
    }
}

pub(crate) fn to_ts_range(range: &Range) -> tree_sitter::Range {
    tree_sitter::Range {
        start_byte: range.start_index as usize,
        end_byte: range.end_index as usize,
        start_point: to_ts_point(range.start_position),
        end_point: to_ts_point(range.end_position),
    }
}

pub(crate) fn from_ts_range(range: tree_sitter::Range) -> Range {
    Range {
        start_index: saturate(range.start_byte),
        end_index: saturate(range.end_byte),
        start_position: from_ts_point(range.start_point),
        end_position: from_ts_point(range.end_point),
    }
}

pub(crate) fn to_ts_edit(edit: &InputEdit) -> tree_sitter::InputEdit {
    tree_sitter::InputEdit {
        start_byte: edit.start_index as usize,
        old_end_byte: edit.old_end_index as usize,
        new_end_byte: edit.new_end_index as usize,
        start_position: to_ts_point(edit.start_position),
        old_end_position: to_ts_point(edit.old_end_position),
        new_end_position: to_ts_point(edit.new_end_position),
    }
}

pub(crate) fn from_ts_log_type(kind: tree_sitter::LogType) -> LogType {
    match kind {
        tree_sitter::LogType::Parse => LogType::Parse,
        tree_sitter::LogType::Lex => LogType::Lex,
    }
}

/// Offsets past `u32::MAX` cannot cross the boundary; clamp them.
pub(crate) fn saturate(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
