//! Feed Pipeline - Low-Latency Exchange Feed Handler Core
//!
//! Building blocks and a threaded coordinator for consuming binary
//! market-data feeds:
//! - Lock-free SPSC ring buffer and fixed-capacity object pool
//! - Bounds-checked little-endian wire decoding
//! - Per-stream sequence tracking with gap-fill recovery
//! - Per-instrument order book maintenance
//! - Receive → process → dispatch pipeline with pinned worker threads

pub mod book_builder;
pub mod config;
pub mod decoder;
pub mod handler;
pub mod net;
pub mod pipeline;
pub mod pool;
pub mod processor;
pub mod protocol;
pub mod recovery;
pub mod ring_buffer;
pub mod sequence;
pub mod stats;
pub mod subscription;
pub mod util;

pub use book_builder::{BookBuilder, BookError, BookSnapshot, OrderBook, PriceLevel, SharedBooks, TrackedOrder};
pub use config::{ConfigError, FeedConfig, TransportConfig};
pub use decoder::{DecodeError, Decoder, PacketSummary};
pub use handler::{CountingHandler, EventHandler, NullHandler};
pub use pipeline::{FeedPipeline, PipelineError, PipelineState};
pub use pool::{ObjectPool, Pooled};
pub use processor::FeedProcessor;
pub use protocol::{Message, MessageHeader, MessageType, PacketBuilder, PacketHeader, Side};
pub use recovery::{GapFillScheduler, GapRequest, RecoveryError, Retransmitter, TcpRetransmitter};
pub use sequence::{SequenceOutcome, SequenceTracker};
pub use stats::{FeedMetrics, StatsSnapshot};
pub use subscription::Subscriptions;
