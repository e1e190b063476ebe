//! Sequence number gap tracking
//!
//! Tracks the expected next sequence number of one inbound stream and keeps
//! every skipped number in a missing set until it is recovered.

use std::collections::BTreeSet;

/// Default cap on individually tracked missing numbers.
pub const DEFAULT_MAX_MISSING: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// First message or `n == expected`.
    InOrder,
    /// `[from, to]` (inclusive) were skipped.
    Gap { from: u64, to: u64 },
    /// A previously missing number arrived.
    Recovered,
    /// Already seen; nothing missing at that position.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct SequenceTracker {
    expected: Option<u64>,
    last_received: Option<u64>,
    missing: BTreeSet<u64>,
    sequence_errors: u64,
    untracked: u64,
    max_missing: usize,
}

impl SequenceTracker {
    /// Unsynchronised tracker; the first sequence seen becomes the baseline.
    pub fn new() -> Self {
        SequenceTracker {
            expected: None,
            last_received: None,
            missing: BTreeSet::new(),
            sequence_errors: 0,
            untracked: 0,
            max_missing: DEFAULT_MAX_MISSING,
        }
    }

    /// Tracker expecting `next` as its first sequence number.
    pub fn starting_at(next: u64) -> Self {
        let mut tracker = Self::new();
        tracker.expected = Some(next);
        tracker
    }

    pub fn with_max_missing(mut self, max_missing: usize) -> Self {
        self.max_missing = max_missing;
        self
    }

    /// Feed one received sequence number.
    pub fn on_sequence(&mut self, seq: u64) -> SequenceOutcome {
        let expected = match self.expected {
            None => {
                self.expected = Some(seq.wrapping_add(1));
                self.last_received = Some(seq);
                return SequenceOutcome::InOrder;
            }
            Some(e) => e,
        };

        if seq == expected {
            self.expected = Some(seq.wrapping_add(1));
            self.last_received = Some(seq);
            SequenceOutcome::InOrder
        } else if seq > expected {
            for missing in expected..seq {
                if self.missing.len() >= self.max_missing {
                    self.untracked += seq - missing;
                    break;
                }
                self.missing.insert(missing);
            }
            self.expected = Some(seq.wrapping_add(1));
            self.last_received = Some(seq);
            self.sequence_errors += 1;
            SequenceOutcome::Gap {
                from: expected,
                to: seq - 1,
            }
        } else if self.missing.remove(&seq) {
            SequenceOutcome::Recovered
        } else {
            SequenceOutcome::Duplicate
        }
    }

    /// Reinitialise to an exchange-supplied next sequence, dropping all gap state.
    pub fn reset(&mut self, next: u64) {
        self.expected = Some(next);
        self.last_received = None;
        self.missing.clear();
        self.untracked = 0;
    }

    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    pub fn last_received(&self) -> Option<u64> {
        self.last_received
    }

    pub fn missing(&self) -> &BTreeSet<u64> {
        &self.missing
    }

    pub fn has_gaps(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn first_missing(&self) -> Option<u64> {
        self.missing.first().copied()
    }

    /// Earliest contiguous run of missing numbers, at most `max_len` long,
    /// as an inclusive `(start, end)` pair.
    pub fn first_missing_range(&self, max_len: u64) -> Option<(u64, u64)> {
        let mut iter = self.missing.iter().copied();
        let start = iter.next()?;
        let mut end = start;
        for seq in iter {
            if seq != end + 1 || seq - start >= max_len.max(1) {
                break;
            }
            end = seq;
        }
        Some((start, end))
    }

    /// Number of gap events (not missing numbers).
    pub fn sequence_errors(&self) -> u64 {
        self.sequence_errors
    }

    /// Missing numbers dropped because the missing set was at its cap.
    pub fn untracked(&self) -> u64 {
        self.untracked
    }

    /// Check if a specific sequence number is still missing
    pub fn is_missing(&self, seq: u64) -> bool {
        self.missing.contains(&seq)
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
