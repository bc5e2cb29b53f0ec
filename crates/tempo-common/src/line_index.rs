use serde::Serialize;

/// A 1-based line/column pair, as shown to users in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// Offsets of every line start in a source file.
///
/// Built once per file. Expression ranges are byte offsets, and this index
/// turns them into positions only when a diagnostic needs them.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<u32>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(
                source
                    .bytes()
                    .enumerate()
                    .filter(|(_, b)| *b == b'\n')
                    .map(|(i, _)| (i + 1) as u32),
            )
            .collect();
        Self { line_starts }
    }

    /// Position of a byte offset. Columns count bytes from the line start.
    pub fn position(&self, offset: u32) -> Position {
        let line_idx = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        Position {
            line: line_idx as u32 + 1,
            column: offset - self.line_starts[line_idx] + 1,
        }
    }

    /// Positions of both ends of a `start..end` byte range.
    pub fn range(&self, start: u32, end: u32) -> (Position, Position) {
        (self.position(start), self.position(end))
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_one_based() {
        let index = LineIndex::new("Product.all()\n  ->map(p|$p.name)");
        assert_eq!(index.position(0), Position { line: 1, column: 1 });
        assert_eq!(index.position(8), Position { line: 1, column: 9 });
        assert_eq!(index.position(14), Position { line: 2, column: 1 });
        assert_eq!(index.position(18), Position { line: 2, column: 5 });
    }

    #[test]
    fn range_spans_lines() {
        let index = LineIndex::new("a\nbc\nd");
        let (start, end) = index.range(2, 6);
        assert_eq!(start, Position { line: 2, column: 1 });
        assert_eq!(end, Position { line: 3, column: 2 });
        assert_eq!(index.line_count(), 3);
    }

    #[test]
    fn empty_source_has_one_line() {
        let index = LineIndex::new("");
        assert_eq!(index.line_count(), 1);
        assert_eq!(index.position(0), Position { line: 1, column: 1 });
    }
}
