//! Source geometry: row/column points, byte ranges and edits.

use std::fmt;

use serde::Serialize;

/// A row/column position. Columns count bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    pub const ZERO: Self = Self { row: 0, column: 0 };
    pub const MAX: Self = Self {
        row: u32::MAX,
        column: u32::MAX,
    };

    pub const fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Position reached after walking over `text` starting from `self`.
    pub fn advance(self, text: &str) -> Self {
        let mut point = self;
        for line in text.split_inclusive('\n') {
            if line.ends_with('\n') {
                point.row += 1;
                point.column = 0;
            } else {
                point.column += line.len() as u32;
            }
        }
        point
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{row: {}, column: {}}}", self.row, self.column)
    }
}

/// A span of source in both byte and point coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub start_index: u32,
    pub end_index: u32,
    pub start_position: Point,
    pub end_position: Point,
}

/// Description of one text edit, in the six coordinates the engine needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct InputEdit {
    pub start_index: u32,
    pub old_end_index: u32,
    pub new_end_index: u32,
    pub start_position: Point,
    pub old_end_position: Point,
    pub new_end_position: Point,
}

impl InputEdit {
    /// Edit that replaces `old[start..old_end]` with `new_text`.
    ///
    /// Positions are computed from `old` so callers only supply byte offsets.
    pub fn replace(old: &str, start: usize, old_end: usize, new_text: &str) -> Self {
        let start_position = Point::ZERO.advance(&old[..start]);
        let old_end_position = start_position.advance(&old[start..old_end]);
        let new_end_position = start_position.advance(new_text);
        Self {
            start_index: start as u32,
            old_end_index: old_end as u32,
            new_end_index: (start + new_text.len()) as u32,
            start_position,
            old_end_position,
            new_end_position,
        }
    }
}
