//! Mapping between character offsets and wrapped-line indices.
//!
//! Every line contributes its length plus one separator character to the
//! offset space, so offsets line up with the original text stream.

/// Index of the line containing `offset`. Offsets past the end clamp to the
/// last line; an empty sequence yields 0.
pub fn offset_to_line_index<S: AsRef<str>>(lines: &[S], offset: usize) -> usize {
    let mut running = 0usize;
    for (idx, line) in lines.iter().enumerate() {
        let span = line.as_ref().chars().count() + 1;
        if running + span > offset {
            return idx;
        }
        running += span;
    }
    lines.len().saturating_sub(1)
}

/// Offset of the first character of line `index`.
pub fn line_index_to_offset<S: AsRef<str>>(lines: &[S], index: usize) -> usize {
    lines
        .iter()
        .take(index)
        .map(|line| line.as_ref().chars().count() + 1)
        .sum()
}

/// Wrapped lines with precomputed line start offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrappedLines {
    lines: Vec<String>,
    starts: Vec<usize>,
    total: usize,
}

impl WrappedLines {
    pub fn new(lines: Vec<String>) -> Self {
        let mut starts = Vec::with_capacity(lines.len());
        let mut total = 0usize;
        for line in &lines {
            starts.push(total);
            total += line.chars().count() + 1;
        }
        Self {
            lines,
            starts,
            total,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Size of the offset space covered by these lines.
    pub fn total_span(&self) -> usize {
        self.total
    }

    /// Same result as [`offset_to_line_index`], by binary search.
    pub fn line_at(&self, offset: usize) -> usize {
        if self.lines.is_empty() {
            return 0;
        }
        let idx = self.starts.partition_point(|&start| start <= offset);
        idx.saturating_sub(1).min(self.lines.len() - 1)
    }

    /// Same result as [`line_index_to_offset`], clamping past the end.
    pub fn offset_of(&self, index: usize) -> usize {
        self.starts.get(index).copied().unwrap_or(self.total)
    }
}
