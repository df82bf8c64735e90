//! Bounded buffer of captured output lines

use std::collections::VecDeque;
use std::sync::Mutex;

/// Line buffer shared between the reader tasks and consumers
///
/// Appends never block on consumers; when full, the oldest line is dropped.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Remove and return up to `max_lines`, oldest first
    pub fn drain(&self, max_lines: usize) -> Vec<String> {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let n = max_lines.min(lines.len());
        lines.drain(..n).collect()
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
