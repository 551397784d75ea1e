//! Locations and byte-range edits in source text.
//!
//! tree-sitter reports positions as 0-based rows and byte columns; mutation
//! sites carry 1-based lines and columns, plus a byte offset and length that
//! address the text directly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A (line, column) position in a source file, both 1-based.
#[derive(Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct LineColumn {
    pub line: u32,
    pub column: u32,
}

impl From<tree_sitter::Point> for LineColumn {
    fn from(p: tree_sitter::Point) -> Self {
        LineColumn {
            line: p.row as u32 + 1,
            column: p.column as u32 + 1,
        }
    }
}

impl fmt::Debug for LineColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LineColumn({}, {})", self.line, self.column)
    }
}

/// Replace the byte range `[offset, offset + length)` of `source` with
/// `replacement`.
///
/// Out-of-range or overflowing ranges, and ranges that would split a
/// multi-byte character, return the input unchanged: an invalid site must
/// never corrupt the file it is applied to. Bytes outside the range are
/// preserved exactly.
pub fn splice(source: &str, offset: usize, length: usize, replacement: &str) -> String {
    let Some(end) = offset.checked_add(length) else {
        return source.to_owned();
    };
    if end > source.len() || !source.is_char_boundary(offset) || !source.is_char_boundary(end) {
        return source.to_owned();
    }
    let mut out = String::with_capacity(source.len() - length + replacement.len());
    out.push_str(&source[..offset]);
    out.push_str(replacement);
    out.push_str(&source[end..]);
    out
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn line_column_from_point_is_one_based() {
        let lc: LineColumn = tree_sitter::Point { row: 0, column: 0 }.into();
        assert_eq!(format!("{lc:?}"), "LineColumn(1, 1)");
    }

    #[test]
    fn splice_at_file_prefix() {
        assert_eq!(splice("let a = 1\n", 0, 3, "var"), "var a = 1\n");
    }

    #[test]
    fn splice_interior_region() {
        assert_eq!(splice("a + b", 2, 1, "-"), "a - b");
    }

    #[test]
    fn splice_empty_replacement_deletes() {
        assert_eq!(splice("!flag", 0, 1, ""), "flag");
    }

    #[test]
    fn splice_past_eof_is_identity() {
        assert_eq!(splice("short", 3, 10, "x"), "short");
        assert_eq!(splice("short", 99, 1, "x"), "short");
    }

    #[test]
    fn splice_overflowing_range_is_identity() {
        assert_eq!(splice("short", usize::MAX, 2, "x"), "short");
    }

    #[test]
    fn splice_preserves_multibyte_text_outside_range() {
        let source = "let π = 1 + 2 // émoji 🎛 ok\n";
        let offset = source.find('+').unwrap();
        let spliced = splice(source, offset, 1, "-");
        assert_eq!(spliced, "let π = 1 - 2 // émoji 🎛 ok\n");
        assert_eq!(spliced.len(), source.len());
    }

    #[test]
    fn splice_inside_multibyte_char_is_identity() {
        let source = "π";
        assert_eq!(splice(source, 1, 1, "x"), "π");
    }
}
