//! Feed statistics
//!
//! Atomic counters shared by every pipeline stage. Writers use relaxed
//! increments; `snapshot()` gives a point-in-time copy at any pipeline state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct FeedMetrics {
    packets_received: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_received: AtomicU64,
    messages_received: AtomicU64,
    messages_processed: AtomicU64,
    messages_filtered: AtomicU64,
    duplicates: AtomicU64,
    sequence_errors: AtomicU64,
    decode_errors: AtomicU64,
    book_errors: AtomicU64,
    unknown_messages: AtomicU64,
    gap_requests: AtomicU64,
    retransmitted_packets: AtomicU64,
    latency_sum_ns: AtomicU64,
    latency_samples: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        #[inline]
        pub fn $inc(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(add_packets_received, packets_received);
    counter!(add_packets_dropped, packets_dropped);
    counter!(add_bytes_received, bytes_received);
    counter!(add_messages_received, messages_received);
    counter!(add_messages_processed, messages_processed);
    counter!(add_messages_filtered, messages_filtered);
    counter!(add_duplicates, duplicates);
    counter!(add_sequence_errors, sequence_errors);
    counter!(add_decode_errors, decode_errors);
    counter!(add_book_errors, book_errors);
    counter!(add_unknown_messages, unknown_messages);
    counter!(add_gap_requests, gap_requests);
    counter!(add_retransmitted_packets, retransmitted_packets);

    /// Fold a batch of latency samples into the running totals.
    #[inline]
    pub fn record_latency(&self, sum_ns: u64, samples: u64) {
        if samples == 0 {
            return;
        }
        self.latency_sum_ns.fetch_add(sum_ns, Ordering::Relaxed);
        self.latency_samples.fetch_add(samples, Ordering::Relaxed);
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn sequence_errors(&self) -> u64 {
        self.sequence_errors.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    /// Mean origin-to-receive latency in nanoseconds, if any samples exist.
    pub fn average_latency_ns(&self) -> Option<f64> {
        self.snapshot().average_latency_ns()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_filtered: self.messages_filtered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            sequence_errors: self.sequence_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            book_errors: self.book_errors.load(Ordering::Relaxed),
            unknown_messages: self.unknown_messages.load(Ordering::Relaxed),
            gap_requests: self.gap_requests.load(Ordering::Relaxed),
            retransmitted_packets: self.retransmitted_packets.load(Ordering::Relaxed),
            latency_sum_ns: self.latency_sum_ns.load(Ordering::Relaxed),
            latency_samples: self.latency_samples.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.packets_received,
            &self.packets_dropped,
            &self.bytes_received,
            &self.messages_received,
            &self.messages_processed,
            &self.messages_filtered,
            &self.duplicates,
            &self.sequence_errors,
            &self.decode_errors,
            &self.book_errors,
            &self.unknown_messages,
            &self.gap_requests,
            &self.retransmitted_packets,
            &self.latency_sum_ns,
            &self.latency_samples,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Plain copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_received: u64,
    pub messages_received: u64,
    pub messages_processed: u64,
    pub messages_filtered: u64,
    pub duplicates: u64,
    pub sequence_errors: u64,
    pub decode_errors: u64,
    pub book_errors: u64,
    pub unknown_messages: u64,
    pub gap_requests: u64,
    pub retransmitted_packets: u64,
    pub latency_sum_ns: u64,
    pub latency_samples: u64,
}

impl StatsSnapshot {
    pub fn average_latency_ns(&self) -> Option<f64> {
        if self.latency_samples == 0 {
            None
        } else {
            Some(self.latency_sum_ns as f64 / self.latency_samples as f64)
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Feed Statistics ===")?;
        writeln!(
            f,
            "Packets: {} received, {} dropped, {} bytes",
            self.packets_received, self.packets_dropped, self.bytes_received
        )?;
        writeln!(
            f,
            "Messages: {} received, {} processed, {} filtered, {} duplicates, {} unknown",
            self.messages_received,
            self.messages_processed,
            self.messages_filtered,
            self.duplicates,
            self.unknown_messages
        )?;
        writeln!(
            f,
            "Errors: {} sequence, {} decode, {} book",
            self.sequence_errors, self.decode_errors, self.book_errors
        )?;
        writeln!(
            f,
            "Recovery: {} gap requests, {} retransmitted packets",
            self.gap_requests, self.retransmitted_packets
        )?;
        match self.average_latency_ns() {
            Some(avg) => write!(f, "Latency: {:.0} ns mean over {} samples", avg, self.latency_samples),
            None => write!(f, "Latency: n/a"),
        }
    }
}
