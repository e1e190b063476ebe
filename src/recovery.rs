//! Gap-fill recovery
//!
//! The processing thread owns the sequence tracker, so it also decides when
//! to ask for missing data: `GapFillScheduler` turns the tracker's missing set
//! into `GapRequest`s. The gap-fill thread hands each request to a
//! `Retransmitter` and feeds whatever comes back into the normal receive path.
//! Request formats are venue-specific; `TcpRetransmitter` implements the
//! reference binding.

use crate::config::SocketConfig;
use crate::net::{connect_tcp, send_packet};
use crate::protocol::*;
use crate::sequence::SequenceTracker;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use std::io::{self, Read};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("retransmission server unreachable: {0}")]
    Connect(#[source] io::Error),

    #[error("retransmission i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid retransmitted packet: {0}")]
    InvalidPacket(String),

    #[error("retransmission rejected for [{start}, {end}]")]
    Rejected { start: u64, end: u64 },
}

/// Inclusive range of sequence numbers to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRequest {
    pub start: u64,
    pub end: u64,
}

/// Source of retransmitted packets.
pub trait Retransmitter: Send {
    /// Request `[start, end]` and return the raw packets that answer it.
    fn request_range(&mut self, start: u64, end: u64) -> Result<Vec<Vec<u8>>, RecoveryError>;
}

/// Decides when to issue a gap-fill request for the earliest missing run.
#[derive(Debug, Clone)]
pub struct GapFillScheduler {
    retry_interval: Duration,
    max_range: u64,
    last_request: Option<(GapRequest, Instant)>,
}

impl GapFillScheduler {
    pub fn new(retry_interval: Duration, max_range: u64) -> Self {
        GapFillScheduler {
            retry_interval,
            max_range,
            last_request: None,
        }
    }

    /// Next request to issue, if any. The same start is not re-requested
    /// until `retry_interval` has passed.
    pub fn poll(&mut self, tracker: &SequenceTracker, now: Instant) -> Option<GapRequest> {
        let (start, end) = tracker.first_missing_range(self.max_range)?;
        let request = GapRequest { start, end };

        if let Some((last, at)) = self.last_request {
            if last.start == start && now.duration_since(at) < self.retry_interval {
                return None;
            }
        }
        self.last_request = Some((request, now));
        Some(request)
    }

    /// Forget outstanding requests (after a sequence reset).
    pub fn clear(&mut self) {
        self.last_request = None;
    }
}

/// Reference retransmission client.
///
/// Opens a TCP session per request, sends a single `RetransmissionRequest`
/// message (`start u64 | end u64`) and reads packets until the server sends
/// an empty packet or closes the connection.
#[derive(Debug, Clone)]
pub struct TcpRetransmitter {
    endpoint: String,
    channel_id: u32,
    socket: SocketConfig,
}

impl TcpRetransmitter {
    pub fn new(endpoint: impl Into<String>, channel_id: u32, timeout: Duration) -> Self {
        let socket = SocketConfig {
            poll_interval_ms: timeout.as_millis().max(1) as u64,
            connect_timeout_ms: timeout.as_millis().max(1) as u64,
            ..SocketConfig::default()
        };
        TcpRetransmitter {
            endpoint: endpoint.into(),
            channel_id,
            socket,
        }
    }

    pub fn encode_request(channel_id: u32, start: u64, end: u64) -> Vec<u8> {
        let mut body = [0u8; RETRANSMISSION_REQUEST_SIZE - MESSAGE_HEADER_SIZE];
        LittleEndian::write_u64(&mut body[0..8], start);
        LittleEndian::write_u64(&mut body[8..16], end);

        let now = crate::util::now_nanos();
        let mut builder = PacketBuilder::new(channel_id, 0, now);
        builder.push_raw(RETRANSMISSION_REQUEST_TYPE, 0, 0, now, &body);
        builder.finish()
    }
}

impl Retransmitter for TcpRetransmitter {
    fn request_range(&mut self, start: u64, end: u64) -> Result<Vec<Vec<u8>>, RecoveryError> {
        let mut stream = connect_tcp(&self.endpoint, &self.socket).map_err(RecoveryError::Connect)?;
        send_packet(&mut stream, &Self::encode_request(self.channel_id, start, end))?;
        debug!("requested retransmission [{start}, {end}] from {}", self.endpoint);

        let mut packets = Vec::new();
        loop {
            let mut hdr = [0u8; PACKET_HEADER_SIZE];
            match stream.read_exact(&mut hdr) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let size = LittleEndian::read_u16(&hdr[0..2]) as usize;
            let count = LittleEndian::read_u16(&hdr[2..4]);
            if !(PACKET_HEADER_SIZE..=MAX_PACKET_SIZE).contains(&size) {
                return Err(RecoveryError::InvalidPacket(format!("packet size {size}")));
            }
            if count == 0 {
                break;
            }

            let mut packet = vec![0u8; size];
            packet[..PACKET_HEADER_SIZE].copy_from_slice(&hdr);
            stream.read_exact(&mut packet[PACKET_HEADER_SIZE..])?;
            packets.push(packet);
        }

        if packets.is_empty() {
            return Err(RecoveryError::Rejected { start, end });
        }
        info!(
            "retransmission [{start}, {end}] returned {} packets",
            packets.len()
        );
        Ok(packets)
    }
}
