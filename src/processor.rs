//! Processing stage
//!
//! Everything the processing thread does to one packet, usable synchronously
//! for tests, replays and benchmarks. Per message:
//!
//! 1. administrative messages (heartbeat, sequence reset) skip sequencing;
//! 2. others go through the sequence tracker, duplicates are dropped;
//! 3. unsubscribed instruments are filtered out;
//! 4. the book is updated (errors are counted, never fatal);
//! 5. the handler gets exactly one callback.

use crate::book_builder::SharedBooks;
use crate::config::FeedConfig;
use crate::decoder::{DecodeError, Decoder, PacketSummary};
use crate::handler::EventHandler;
use crate::protocol::Message;
use crate::recovery::{GapFillScheduler, GapRequest};
use crate::sequence::{SequenceOutcome, SequenceTracker};
use crate::stats::FeedMetrics;
use crate::subscription::Subscriptions;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

pub struct FeedProcessor {
    decoder: Decoder,
    sequence: SequenceTracker,
    books: SharedBooks,
    subscriptions: Arc<Subscriptions>,
    metrics: Arc<FeedMetrics>,
    gap_fill: Option<GapFillScheduler>,
    book_building: bool,
}

impl FeedProcessor {
    pub fn new(
        config: &FeedConfig,
        books: SharedBooks,
        subscriptions: Arc<Subscriptions>,
        metrics: Arc<FeedMetrics>,
    ) -> Self {
        let sequence = match config.sequence.initial {
            Some(next) => SequenceTracker::starting_at(next),
            None => SequenceTracker::new(),
        }
        .with_max_missing(config.sequence.max_missing);

        let gap_fill = config.recovery.enabled.then(|| {
            GapFillScheduler::new(config.recovery.retry_interval(), config.recovery.max_range)
        });

        FeedProcessor {
            decoder: Decoder::new(config.features.latency_tracking),
            sequence,
            books,
            subscriptions,
            metrics,
            gap_fill,
            book_building: config.book.enabled,
        }
    }

    /// Decode and apply one packet. A framing error drops the whole packet and
    /// is returned after being counted.
    pub fn process_packet<H: EventHandler + ?Sized>(
        &mut self,
        packet: &[u8],
        recv_ts_ns: u64,
        handler: &mut H,
    ) -> Result<PacketSummary, DecodeError> {
        let FeedProcessor {
            decoder,
            sequence,
            books,
            subscriptions,
            metrics,
            gap_fill,
            book_building,
        } = self;

        let mut processed = 0u64;
        let mut filtered = 0u64;
        let mut duplicates = 0u64;
        let mut book_errors = 0u64;

        let result = decoder.decode_packet(packet, recv_ts_ns, |msg| {
            let header = msg.header();

            match msg {
                Message::Heartbeat(_) => {}
                Message::SequenceReset(reset) => {
                    info!(
                        "sequence reset to {} (was expecting {:?})",
                        reset.new_seq,
                        sequence.expected()
                    );
                    sequence.reset(reset.new_seq);
                    if let Some(scheduler) = gap_fill.as_mut() {
                        scheduler.clear();
                    }
                }
                _ => {
                    match sequence.on_sequence(header.sequence) {
                        SequenceOutcome::InOrder | SequenceOutcome::Recovered => {}
                        SequenceOutcome::Gap { from, to } => {
                            warn!("sequence gap [{from}, {to}], received {}", header.sequence);
                            metrics.add_sequence_errors(1);
                        }
                        SequenceOutcome::Duplicate => {
                            duplicates += 1;
                            return;
                        }
                    }

                    if !subscriptions.is_subscribed(header.instrument_id) {
                        filtered += 1;
                        return;
                    }

                    if *book_building {
                        if let Err(e) = books.write().apply_message(msg) {
                            debug!("book update failed for seq {}: {e}", header.sequence);
                            book_errors += 1;
                        }
                    }
                }
            }

            msg.dispatch(&mut *handler);
            processed += 1;
        });

        match result {
            Ok(summary) => {
                metrics.add_messages_received(summary.dispatched as u64 + summary.unknown as u64);
                metrics.add_messages_processed(processed);
                metrics.add_messages_filtered(filtered);
                metrics.add_duplicates(duplicates);
                metrics.add_book_errors(book_errors);
                metrics.add_unknown_messages(summary.unknown as u64);
                let latency = decoder.take_latency();
                metrics.record_latency(latency.sum_ns, latency.samples);
                Ok(summary)
            }
            Err(e) => {
                warn!("dropping corrupt packet ({} bytes): {e}", packet.len());
                metrics.add_decode_errors(1);
                metrics.add_packets_dropped(1);
                Err(e)
            }
        }
    }

    /// Gap-fill request due now, if recovery is enabled and data is missing.
    pub fn poll_gap_fill(&mut self, now: Instant) -> Option<GapRequest> {
        let request = self.gap_fill.as_mut()?.poll(&self.sequence, now)?;
        self.metrics.add_gap_requests(1);
        Some(request)
    }

    pub fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    pub fn books(&self) -> &SharedBooks {
        &self.books
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }
}
