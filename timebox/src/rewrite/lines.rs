// Line-granular copy/skip/insert over the original document text
//
// Lines keep their own terminators ("\n", "\r\n" or nothing on the last
// line), so copied lines come out byte-identical.

use super::RewriteError;

/// Byte offset -> 0-based line index for one document
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(content: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            content
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1)
                .filter(|&start| start < content.len()),
        );
        Self {
            starts,
            len: content.len(),
        }
    }

    /// Number of lines; an empty document has none
    pub fn line_count(&self) -> usize {
        if self.len == 0 {
            0
        } else {
            self.starts.len()
        }
    }

    /// Line containing `offset`. Offsets past the end map to the last line.
    pub fn line_of(&self, offset: usize) -> usize {
        self.starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1)
    }

    pub fn line_start(&self, line: usize) -> Option<usize> {
        self.starts.get(line).copied()
    }
}

/// Split into lines, each keeping its terminator
pub fn split_lines(content: &str) -> Vec<&str> {
    content.split_inclusive('\n').collect()
}

/// Rebuilds a document line by line from its original text
pub struct LineRewriter<'a> {
    lines: Vec<&'a str>,
    index: LineIndex,
    cursor: usize,
    out: String,
}

impl<'a> LineRewriter<'a> {
    pub fn new(content: &'a str) -> Self {
        Self {
            lines: split_lines(content),
            index: LineIndex::new(content),
            cursor: 0,
            out: String::with_capacity(content.len() + 128),
        }
    }

    /// Original line `line`, terminator included
    pub fn line(&self, line: usize) -> Option<&'a str> {
        self.lines.get(line).copied()
    }

    pub fn line_index_of_byte(&self, offset: usize) -> usize {
        self.index.line_of(offset)
    }

    /// Copy original lines up to, not including, `line`
    pub fn copy_lines_until(&mut self, line: usize) -> Result<(), RewriteError> {
        if line < self.cursor {
            return Err(RewriteError::LineOrder {
                line,
                cursor: self.cursor,
            });
        }
        let end = line.min(self.lines.len());
        for original in &self.lines[self.cursor..end] {
            self.out.push_str(original);
        }
        self.cursor = end;
        Ok(())
    }

    /// Drop original lines `start..=end` and write `replacement` in their place
    ///
    /// Replacement lines must carry their own terminators.
    pub fn replace_lines(
        &mut self,
        start: usize,
        end: usize,
        replacement: &[String],
    ) -> Result<(), RewriteError> {
        if end < start || end >= self.lines.len() {
            return Err(RewriteError::LineRange {
                start,
                end,
                lines: self.lines.len(),
            });
        }
        self.copy_lines_until(start)?;
        for line in replacement {
            self.out.push_str(line);
        }
        self.cursor = end + 1;
        Ok(())
    }

    pub fn copy_remaining_lines(&mut self) {
        for original in &self.lines[self.cursor..] {
            self.out.push_str(original);
        }
        self.cursor = self.lines.len();
    }

    /// The rewritten text
    pub fn finish(mut self) -> String {
        self.copy_remaining_lines();
        self.out
    }
}

/// Split a line into its content and terminator
pub fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index() {
        let index = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_of(0), 0);
        assert_eq!(index.line_of(2), 0);
        assert_eq!(index.line_of(3), 1);
        assert_eq!(index.line_of(6), 2);
        assert_eq!(index.line_of(7), 3);
        assert_eq!(index.line_of(100), 3);
        assert_eq!(index.line_start(3), Some(7));
    }

    #[test]
    fn test_line_index_trailing_newline() {
        let index = LineIndex::new("a\nb\n");
        assert_eq!(index.line_count(), 2);
        assert_eq!(index.line_of(3), 1);
        assert_eq!(LineIndex::new("").line_count(), 0);
    }

    #[test]
    fn test_copy_only_is_identity() {
        for doc in ["", "one", "one\n", "a\r\nb\r\n", "a\n\n\nb"] {
            assert_eq!(LineRewriter::new(doc).finish(), doc);
        }
    }

    #[test]
    fn test_replace_middle_lines() {
        let mut rw = LineRewriter::new("a\nb\nc\nd\n");
        rw.replace_lines(1, 2, &["X\n".to_string()]).unwrap();
        assert_eq!(rw.finish(), "a\nX\nd\n");
    }

    #[test]
    fn test_replace_rejects_bad_ranges() {
        let mut rw = LineRewriter::new("a\nb\n");
        assert!(matches!(
            rw.replace_lines(1, 5, &[]),
            Err(RewriteError::LineRange { .. })
        ));
        rw.copy_lines_until(2).unwrap();
        assert!(matches!(
            rw.copy_lines_until(1),
            Err(RewriteError::LineOrder { .. })
        ));
    }

    #[test]
    fn test_split_terminator() {
        assert_eq!(split_terminator("a\r\n"), ("a", "\r\n"));
        assert_eq!(split_terminator("a\n"), ("a", "\n"));
        assert_eq!(split_terminator("a"), ("a", ""));
    }
}
