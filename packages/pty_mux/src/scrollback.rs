//! Bounded, line-oriented scrollback for replaying output to new viewers.
//!
//! Each entry is either a terminated line (ending in `\n`) or the single
//! trailing partial line. Only terminated lines count toward the cap; the
//! oldest are evicted first. A stream that never emits `\n` grows the partial
//! tail without bound.

use std::collections::VecDeque;

/// Default maximum number of terminated lines kept per session.
pub const DEFAULT_MAX_LINES: usize = 10_000;

#[derive(Debug, Clone)]
pub struct ScrollbackBuffer {
    entries: VecDeque<String>,
    max_lines: usize,
    line_count: usize,
}

impl ScrollbackBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_lines,
            line_count: 0,
        }
    }

    /// Append raw output. Control sequences are stored verbatim.
    pub fn write(&mut self, text: &str) {
        for fragment in text.split_inclusive('\n') {
            let terminated = fragment.ends_with('\n');
            match self.entries.back_mut() {
                // Grow the partial tail in place
                Some(tail) if !tail.ends_with('\n') => {
                    tail.push_str(fragment);
                    if terminated {
                        self.line_count += 1;
                        self.evict();
                    }
                }
                _ => {
                    self.entries.push_back(fragment.to_string());
                    if terminated {
                        self.line_count += 1;
                    }
                    self.evict();
                }
            }
        }
    }

    fn evict(&mut self) {
        while self.line_count > self.max_lines {
            match self.entries.front() {
                Some(front) if front.ends_with('\n') => {
                    self.entries.pop_front();
                    self.line_count -= 1;
                }
                _ => break,
            }
        }
    }

    /// All entries concatenated in order.
    pub fn contents(&self) -> String {
        let mut out = String::with_capacity(self.entries.iter().map(String::len).sum());
        for entry in &self.entries {
            out.push_str(entry);
        }
        out
    }

    /// Number of terminated lines; the partial tail is excluded.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.line_count = 0;
    }
}

impl Default for ScrollbackBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}
