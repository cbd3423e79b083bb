//! Bounded per-batch log tail
//!
//! Keeps the most recent display lines of a batch for live status views.
//! When full, the oldest line is evicted before the new one is stored.

use std::collections::VecDeque;

/// Default and maximum number of lines kept per batch
pub const DEFAULT_LOG_TAIL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct LogTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_TAIL_CAPACITY)
    }
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, DEFAULT_LOG_TAIL_CAPACITY);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
