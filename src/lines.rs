//! Forward-only line splitting over a growing text buffer.
//!
//! Both the Stage 2 NDJSON parser and the SSE decoder receive text in
//! arbitrary fragments and need complete lines out of it. [`LineBuffer`]
//! remembers how far it has already searched for a terminator, so each byte
//! is scanned once no matter how many fragments a long line arrives in.
//!
//! A line ends at `\n`, `\r\n` or a lone `\r`. A line ending in `\r` is
//! released at once; if the next fragment then opens with `\n`, that `\n` is
//! the second half of the same terminator and is skipped.

/// Growing buffer + line start + last-scanned offset.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: String,
    /// Start of the line currently being assembled.
    line_start: usize,
    /// Everything before this offset is known to contain no unconsumed
    /// terminator.
    scanned: usize,
    /// The last line ended in `\r` at the very end of the buffer.
    after_cr: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment.
    pub fn push_str(&mut self, fragment: &str) {
        self.compact();
        self.buf.push_str(fragment);
    }

    /// Next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        if self.after_cr && self.scanned < self.buf.len() {
            // line_start == scanned while after_cr is set.
            if self.buf.as_bytes()[self.scanned] == b'\n' {
                self.line_start += 1;
                self.scanned += 1;
            }
            self.after_cr = false;
        }
        let Some(rel) = self.buf[self.scanned..].find(['\n', '\r']) else {
            self.scanned = self.buf.len();
            return None;
        };
        let end = self.scanned + rel;
        let mut next = end + 1;
        if self.buf.as_bytes()[end] == b'\r' {
            match self.buf.as_bytes().get(next) {
                Some(b'\n') => next += 1,
                Some(_) => {}
                None => self.after_cr = true,
            }
        }
        let line = self.buf[self.line_start..end].to_string();
        self.line_start = next;
        self.scanned = next;
        Some(line)
    }

    /// Take whatever trails the last terminator. Used when the producer has
    /// finished and the final line may be unterminated.
    pub fn take_remainder(&mut self) -> Option<String> {
        let rest = self.buf[self.line_start..].trim_end_matches('\r').to_string();
        self.buf.clear();
        self.line_start = 0;
        self.scanned = 0;
        self.after_cr = false;
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Bytes held for the incomplete trailing line.
    pub fn pending_len(&self) -> usize {
        self.buf.len() - self.line_start
    }

    /// Drop consumed lines so the buffer only holds the partial tail.
    fn compact(&mut self) {
        if self.line_start > 0 {
            self.buf.drain(..self.line_start);
            self.scanned -= self.line_start;
            self.line_start = 0;
        }
    }
}
