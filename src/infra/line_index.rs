//! Newline index with LF/CRLF-robust line/byte mapping.
//!
//! The injector anchors fragments at line ends and copies the indentation of
//! the anchor line, so it needs cheap byte→line and line→byte lookups.
//!
//! Notes
//! - 1-based external line numbers.
//! - An empty buffer has 0 lines.
//! - A non-empty buffer without '\n' has 1 line.
//! - Line end bytes exclude the trailing '\r' of CRLF lines.

#[derive(Debug, Clone)]
pub struct NewlineIndex {
    /// Byte positions of every '\n' in the buffer.
    nl_positions: Vec<usize>,
    /// Total byte length of the buffer.
    len: usize,
}

impl NewlineIndex {
    /// Build an index recording positions of '\n'.
    pub fn build(bytes: &[u8]) -> Self {
        let nl_positions = memchr::memchr_iter(b'\n', bytes).collect();

        Self {
            nl_positions,
            len: bytes.len(),
        }
    }

    /// Empty buffer => 0 lines; else (#'\n' + 1).
    pub fn line_count(&self) -> usize {
        if self.len == 0 {
            0
        } else {
            self.nl_positions.len() + 1
        }
    }

    /// Start byte (inclusive) of a 1-based line.
    pub fn start_byte_of_line(&self, line1: usize) -> Option<usize> {
        if line1 == 0 || line1 > self.line_count() {
            return None;
        }
        if line1 == 1 {
            return Some(0);
        }
        self.nl_positions
            .get(line1 - 2)
            .map(|&prev_nl| prev_nl + 1)
    }

    /// End byte (exclusive) of a 1-based line, before any "\r\n".
    pub fn end_byte_of_line(&self, line1: usize, bytes: &[u8]) -> Option<usize> {
        if line1 == 0 || line1 > self.line_count() {
            return None;
        }

        if line1 <= self.nl_positions.len() {
            let nl = self.nl_positions[line1 - 1];
            if nl > 0 && bytes.get(nl - 1) == Some(&b'\r') {
                return Some(nl - 1);
            }
            return Some(nl);
        }

        // Last line without trailing '\n' ends at EOF.
        Some(self.len)
    }

    /// 1-based line covering `byte`. Offsets at '\n' belong to the *next* line.
    /// Returns 0 for empty buffers.
    pub fn line_of_byte(&self, byte: usize) -> usize {
        if self.len == 0 {
            return 0;
        }
        let idx = match self.nl_positions.binary_search(&byte) {
            Ok(pos) => pos + 1,
            Err(pos) => pos,
        };
        idx + 1
    }

    /// End of the line that contains the last byte of `[.., byte)`.
    ///
    /// `byte` is treated as an exclusive end offset, so the end of a node whose
    /// last character closes a line maps to that same line.
    pub fn line_end_after(&self, byte: usize, bytes: &[u8]) -> usize {
        let line = self.line_of_byte(byte.saturating_sub(1));
        self.end_byte_of_line(line, bytes)
            .unwrap_or(self.len)
    }

    /// Leading spaces/tabs of a 1-based line.
    pub fn indent_of_line<'a>(&self, line1: usize, text: &'a str) -> &'a str {
        let Some(start) = self.start_byte_of_line(line1) else {
            return "";
        };
        let rest = &text[start..];
        let width = rest
            .bytes()
            .take_while(|b| *b == b' ' || *b == b'\t')
            .count();
        &rest[..width]
    }
}
