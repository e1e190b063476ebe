//! Packet decoder
//!
//! Validates a whole packet before anything is dispatched: a packet whose
//! framing is wrong anywhere is rejected as a unit, so handlers never see half
//! a packet. Messages are read field by field with bounds-checked slices.

use crate::protocol::*;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("packet size mismatch: header declares {declared} bytes, received {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("truncated message {index}: declared length {declared} exceeds remaining {remaining}")]
    TruncatedMessage {
        index: usize,
        declared: usize,
        remaining: usize,
    },

    #[error("message {index} of type {msg_type} is {declared} bytes, needs {need}")]
    MessageTooShort {
        index: usize,
        msg_type: u16,
        declared: usize,
        need: usize,
    },

    #[error("invalid side {0}")]
    InvalidSide(u8),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Running latency sum, drained by the processing stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyAccumulator {
    pub sum_ns: u64,
    pub samples: u64,
}

impl LatencyAccumulator {
    pub fn record(&mut self, latency_ns: u64) {
        self.sum_ns = self.sum_ns.saturating_add(latency_ns);
        self.samples += 1;
    }

    pub fn average_ns(&self) -> Option<f64> {
        if self.samples == 0 {
            None
        } else {
            Some(self.sum_ns as f64 / self.samples as f64)
        }
    }
}

/// What one successfully decoded packet contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSummary {
    pub header: PacketHeader,
    pub dispatched: usize,
    pub unknown: usize,
}

#[derive(Debug, Default)]
pub struct Decoder {
    latency_tracking: bool,
    latency: LatencyAccumulator,
}

impl Decoder {
    pub fn new(latency_tracking: bool) -> Self {
        Decoder {
            latency_tracking,
            latency: LatencyAccumulator::default(),
        }
    }

    pub fn read_packet_header(buffer: &[u8]) -> DecodeResult<PacketHeader> {
        if buffer.len() < PACKET_HEADER_SIZE {
            return Err(DecodeError::BufferTooSmall {
                need: PACKET_HEADER_SIZE,
                have: buffer.len(),
            });
        }
        Ok(PacketHeader {
            pkt_size: LittleEndian::read_u16(&buffer[0..2]),
            msg_count: LittleEndian::read_u16(&buffer[2..4]),
            channel_id: LittleEndian::read_u32(&buffer[4..8]),
            seq_num: LittleEndian::read_u64(&buffer[8..16]),
            send_time: LittleEndian::read_u64(&buffer[16..24]),
        })
    }

    pub fn read_message_header(buffer: &[u8]) -> DecodeResult<MessageHeader> {
        if buffer.len() < MESSAGE_HEADER_SIZE {
            return Err(DecodeError::BufferTooSmall {
                need: MESSAGE_HEADER_SIZE,
                have: buffer.len(),
            });
        }
        Ok(MessageHeader {
            msg_size: LittleEndian::read_u16(&buffer[0..2]),
            msg_type: LittleEndian::read_u16(&buffer[2..4]),
            instrument_id: LittleEndian::read_u32(&buffer[4..8]),
            sequence: LittleEndian::read_u64(&buffer[8..16]),
            send_time: LittleEndian::read_u64(&buffer[16..24]),
        })
    }

    /// Decode one packet and hand every recognised message to `on_message`.
    ///
    /// `recv_ts_ns` is the local receive time in nanoseconds since the UNIX
    /// epoch; with latency tracking on, `recv_ts_ns - send_time` is sampled
    /// per message.
    pub fn decode_packet<F>(
        &mut self,
        packet: &[u8],
        recv_ts_ns: u64,
        mut on_message: F,
    ) -> DecodeResult<PacketSummary>
    where
        F: FnMut(&Message),
    {
        let header = Self::read_packet_header(packet)?;
        let declared = header.pkt_size as usize;
        if declared != packet.len() {
            return Err(DecodeError::SizeMismatch {
                declared,
                actual: packet.len(),
            });
        }

        let body = &packet[PACKET_HEADER_SIZE..];
        Self::validate_framing(body, header.msg_count as usize)?;

        let mut offset = 0;
        let mut dispatched = 0;
        let mut unknown = 0;
        for _ in 0..header.msg_count {
            let msg_bytes = &body[offset..];
            let msg_header = Self::read_message_header(msg_bytes)?;
            let len = msg_header.msg_size as usize;

            match Self::decode_body(msg_header, &msg_bytes[..len])? {
                Some(msg) => {
                    if self.latency_tracking
                        && msg_header.send_time != 0
                        && recv_ts_ns >= msg_header.send_time
                    {
                        self.latency.record(recv_ts_ns - msg_header.send_time);
                    }
                    on_message(&msg);
                    dispatched += 1;
                }
                None => {
                    debug!(
                        "skipping unknown message type {} (seq {}, {} bytes)",
                        msg_header.msg_type, msg_header.sequence, len
                    );
                    unknown += 1;
                }
            }
            offset += len;
        }

        Ok(PacketSummary {
            header,
            dispatched,
            unknown,
        })
    }

    /// Walk all message headers and check lengths, without dispatching.
    fn validate_framing(body: &[u8], count: usize) -> DecodeResult<()> {
        let mut offset = 0;
        for index in 0..count {
            let remaining = body.len() - offset;
            let msg_header = Self::read_message_header(&body[offset..])?;
            let declared = msg_header.msg_size as usize;
            if declared < MESSAGE_HEADER_SIZE || declared > remaining {
                return Err(DecodeError::TruncatedMessage {
                    index,
                    declared,
                    remaining,
                });
            }
            if let Some(msg_type) = MessageType::from_u16(msg_header.msg_type) {
                let need = msg_type.wire_size();
                if declared < need {
                    return Err(DecodeError::MessageTooShort {
                        index,
                        msg_type: msg_header.msg_type,
                        declared,
                        need,
                    });
                }
                if let Some(at) = side_offset(msg_type) {
                    let side = body[offset + at];
                    if Side::from_u8(side).is_none() {
                        return Err(DecodeError::InvalidSide(side));
                    }
                }
            }
            offset += declared;
        }
        Ok(())
    }

    /// Decode a single message from the front of `buffer`, returning it with
    /// the number of bytes it occupies.
    pub fn decode_message(buffer: &[u8]) -> DecodeResult<(Message, usize)> {
        let header = Self::read_message_header(buffer)?;
        let declared = header.msg_size as usize;
        if declared < MESSAGE_HEADER_SIZE || declared > buffer.len() {
            return Err(DecodeError::TruncatedMessage {
                index: 0,
                declared,
                remaining: buffer.len(),
            });
        }
        let msg_type = MessageType::from_u16(header.msg_type)
            .ok_or(DecodeError::InvalidMessageType(header.msg_type))?;
        if declared < msg_type.wire_size() {
            return Err(DecodeError::MessageTooShort {
                index: 0,
                msg_type: header.msg_type,
                declared,
                need: msg_type.wire_size(),
            });
        }
        let msg = Self::decode_body(header, &buffer[..declared])?
            .ok_or(DecodeError::InvalidMessageType(header.msg_type))?;
        Ok((msg, declared))
    }

    /// `msg` is already length-checked against the wire size of its type.
    fn decode_body(header: MessageHeader, msg: &[u8]) -> DecodeResult<Option<Message>> {
        let msg_type = match MessageType::from_u16(header.msg_type) {
            Some(t) => t,
            None => return Ok(None),
        };

        let side_at = |offset: usize| Side::from_u8(msg[offset]).ok_or(DecodeError::InvalidSide(msg[offset]));

        let decoded = match msg_type {
            MessageType::Heartbeat => Message::Heartbeat(header),
            MessageType::SequenceReset => Message::SequenceReset(SequenceReset {
                header,
                new_seq: LittleEndian::read_u64(&msg[24..32]),
            }),
            MessageType::SecurityDefinition => {
                let mut symbol = [0u8; 16];
                symbol.copy_from_slice(&msg[24..40]);
                Message::SecurityDefinition(SecurityDefinition {
                    header,
                    symbol,
                    lot_size: LittleEndian::read_u32(&msg[40..44]),
                    price_decimals: msg[44],
                })
            }
            MessageType::AddOrder => Message::AddOrder(AddOrder {
                header,
                order_id: LittleEndian::read_u64(&msg[24..32]),
                price: LittleEndian::read_u64(&msg[32..40]),
                quantity: LittleEndian::read_u32(&msg[40..44]),
                side: side_at(44)?,
            }),
            MessageType::ModifyOrder => Message::ModifyOrder(ModifyOrder {
                header,
                order_id: LittleEndian::read_u64(&msg[24..32]),
                price: LittleEndian::read_u64(&msg[32..40]),
                quantity: LittleEndian::read_u32(&msg[40..44]),
                side: side_at(44)?,
            }),
            MessageType::DeleteOrder => Message::DeleteOrder(DeleteOrder {
                header,
                order_id: LittleEndian::read_u64(&msg[24..32]),
                side: side_at(32)?,
            }),
            MessageType::Trade => Message::Trade(Trade {
                header,
                order_id: LittleEndian::read_u64(&msg[24..32]),
                trade_id: LittleEndian::read_u64(&msg[32..40]),
                price: LittleEndian::read_u64(&msg[40..48]),
                quantity: LittleEndian::read_u32(&msg[48..52]),
                side: side_at(52)?,
            }),
            MessageType::TradeCancel => Message::TradeCancel(TradeCancel {
                header,
                trade_id: LittleEndian::read_u64(&msg[24..32]),
            }),
            MessageType::Statistics => Message::Statistics(Statistics {
                header,
                high: LittleEndian::read_u64(&msg[24..32]),
                low: LittleEndian::read_u64(&msg[32..40]),
                shares_traded: LittleEndian::read_u64(&msg[40..48]),
                turnover: LittleEndian::read_u64(&msg[48..56]),
            }),
        };
        Ok(Some(decoded))
    }

    pub fn latency(&self) -> LatencyAccumulator {
        self.latency
    }

    /// Return the accumulated latency and start a fresh accumulation.
    pub fn take_latency(&mut self) -> LatencyAccumulator {
        std::mem::take(&mut self.latency)
    }

    pub fn latency_tracking(&self) -> bool {
        self.latency_tracking
    }
}

/// Offset of the side byte for message types that carry one.
fn side_offset(msg_type: MessageType) -> Option<usize> {
    match msg_type {
        MessageType::AddOrder | MessageType::ModifyOrder => Some(44),
        MessageType::DeleteOrder => Some(32),
        MessageType::Trade => Some(52),
        _ => None,
    }
}
