// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-target log ring with gap-free sequence assignment.
//!
//! Each process and session owns one [`LogRing`]. The ring is the single
//! writer of sequence numbers for its target: sequences are strictly
//! increasing and gap-free until capacity eviction, and eviction is
//! observable only as a jump in the first retained sequence, never as a
//! reorder.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Origin of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Stdout,
    Stderr,
    System,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Stdout => "stdout",
            LogLevel::Stderr => "stderr",
            LogLevel::System => "system",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogLevel::Stdout),
            "stderr" => Ok(LogLevel::Stderr),
            "system" => Ok(LogLevel::System),
            _ => Err(()),
        }
    }
}

/// One buffered log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub content: String,
    /// Unix epoch milliseconds at emission.
    pub timestamp: u64,
    /// Strictly increasing within the owning target.
    pub sequence: u64,
}

/// Bounded, line-oriented buffer that assigns sequence numbers at push.
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    next_sequence: u64,
    entries: VecDeque<LogEntry>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), next_sequence: 1, entries: VecDeque::new() }
    }

    /// Append a line, assigning the next sequence. Returns a clone of the
    /// stored entry for fan-out to subscribers.
    pub fn push(&mut self, level: LogLevel, content: impl Into<String>, timestamp: u64) -> LogEntry {
        let entry = LogEntry {
            level,
            content: content.into(),
            timestamp,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    /// The most recent `lines` entries matching `levels`, in ascending
    /// sequence order. `lines == 0` means all retained entries; an empty
    /// `levels` slice means no level filtering.
    pub fn tail(&self, lines: usize, levels: &[LogLevel]) -> Vec<LogEntry> {
        let matches = |e: &LogEntry| levels.is_empty() || levels.contains(&e.level);
        let mut out: Vec<LogEntry> = if lines == 0 {
            self.entries.iter().filter(|e| matches(e)).cloned().collect()
        } else {
            let mut picked: Vec<LogEntry> =
                self.entries.iter().rev().filter(|e| matches(e)).take(lines).cloned().collect();
            picked.reverse();
            picked
        };
        out.shrink_to_fit();
        out
    }

    /// Sequence of the oldest retained entry, if any. A value greater than 1
    /// means the ring has evicted.
    pub fn first_sequence(&self) -> Option<u64> {
        self.entries.front().map(|e| e.sequence)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
