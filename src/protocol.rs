//! Binary wire format
//!
//! Every datagram (or TCP frame) is one packet: a 24-byte packet header
//! followed by `msg_count` self-describing messages. All integers are
//! little-endian and every record is a multiple of 8 bytes.
//!
//! Packet header: 24 bytes
//!   - pkt_size: u16   - total packet length including header
//!   - msg_count: u16
//!   - channel_id: u32
//!   - seq_num: u64    - sequence of the first message in the packet
//!   - send_time: u64  - nanoseconds since the UNIX epoch
//!
//! Message header: 24 bytes
//!   - msg_size: u16   - total message length including header
//!   - msg_type: u16
//!   - instrument_id: u32
//!   - sequence: u64
//!   - send_time: u64
//!
//! Prices are integer ticks: `price * 10^8`.

use byteorder::{ByteOrder, LittleEndian};

pub const PACKET_HEADER_SIZE: usize = 24;
pub const MESSAGE_HEADER_SIZE: usize = 24;

/// Largest packet the receive path buffers.
pub const MAX_PACKET_SIZE: usize = 2048;

pub const PRICE_SCALE: u64 = 100_000_000;

/// Outbound-only gap-fill request; never dispatched to handlers.
pub const RETRANSMISSION_REQUEST_TYPE: u16 = 201;
pub const RETRANSMISSION_REQUEST_SIZE: usize = 40;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Heartbeat = 1,
    SequenceReset = 2,
    SecurityDefinition = 11,
    AddOrder = 30,
    ModifyOrder = 31,
    DeleteOrder = 32,
    Trade = 50,
    TradeCancel = 51,
    Statistics = 60,
}

impl MessageType {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(MessageType::Heartbeat),
            2 => Some(MessageType::SequenceReset),
            11 => Some(MessageType::SecurityDefinition),
            30 => Some(MessageType::AddOrder),
            31 => Some(MessageType::ModifyOrder),
            32 => Some(MessageType::DeleteOrder),
            50 => Some(MessageType::Trade),
            51 => Some(MessageType::TradeCancel),
            60 => Some(MessageType::Statistics),
            _ => None,
        }
    }

    /// Wire size of a message of this type, header included.
    pub const fn wire_size(self) -> usize {
        match self {
            MessageType::Heartbeat => 24,
            MessageType::SequenceReset => 32,
            MessageType::SecurityDefinition => 48,
            MessageType::AddOrder => 48,
            MessageType::ModifyOrder => 48,
            MessageType::DeleteOrder => 40,
            MessageType::Trade => 56,
            MessageType::TradeCancel => 32,
            MessageType::Statistics => 56,
        }
    }

    /// Administrative messages carry no instrument and consume no sequence number.
    pub const fn is_administrative(self) -> bool {
        matches!(self, MessageType::Heartbeat | MessageType::SequenceReset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Side::Bid),
            1 => Some(Side::Ask),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Side::Bid => 0,
            Side::Ask => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub pkt_size: u16,
    pub msg_count: u16,
    pub channel_id: u32,
    pub seq_num: u64,
    pub send_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub msg_size: u16,
    pub msg_type: u16,
    pub instrument_id: u32,
    pub sequence: u64,
    pub send_time: u64,
}

/// 24 (header) + 24 = 48 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOrder {
    pub header: MessageHeader,
    pub order_id: u64,
    pub price: u64,
    pub quantity: u32,
    pub side: Side,
}

/// Same layout as `AddOrder`; price and quantity are the new values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifyOrder {
    pub header: MessageHeader,
    pub order_id: u64,
    pub price: u64,
    pub quantity: u32,
    pub side: Side,
}

/// 24 + 16 = 40 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOrder {
    pub header: MessageHeader,
    pub order_id: u64,
    pub side: Side,
}

/// 24 + 32 = 56 bytes. `order_id == 0` means no resting order is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trade {
    pub header: MessageHeader,
    pub order_id: u64,
    pub trade_id: u64,
    pub price: u64,
    pub quantity: u32,
    pub side: Side,
}

/// 24 + 8 = 32 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeCancel {
    pub header: MessageHeader,
    pub trade_id: u64,
}

/// 24 + 24 = 48 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityDefinition {
    pub header: MessageHeader,
    pub symbol: [u8; 16],
    pub lot_size: u32,
    pub price_decimals: u8,
}

impl SecurityDefinition {
    /// Symbol with trailing NUL/space padding stripped.
    pub fn symbol_str(&self) -> String {
        String::from_utf8_lossy(&self.symbol)
            .trim_end_matches(['\0', ' '])
            .to_string()
    }
}

/// 24 + 32 = 56 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub header: MessageHeader,
    pub high: u64,
    pub low: u64,
    pub shares_traded: u64,
    pub turnover: u64,
}

/// 24 + 8 = 32 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceReset {
    pub header: MessageHeader,
    pub new_seq: u64,
}

/// One decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Heartbeat(MessageHeader),
    SequenceReset(SequenceReset),
    SecurityDefinition(SecurityDefinition),
    AddOrder(AddOrder),
    ModifyOrder(ModifyOrder),
    DeleteOrder(DeleteOrder),
    Trade(Trade),
    TradeCancel(TradeCancel),
    Statistics(Statistics),
}

impl Message {
    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::Heartbeat(h) => h,
            Message::SequenceReset(m) => &m.header,
            Message::SecurityDefinition(m) => &m.header,
            Message::AddOrder(m) => &m.header,
            Message::ModifyOrder(m) => &m.header,
            Message::DeleteOrder(m) => &m.header,
            Message::Trade(m) => &m.header,
            Message::TradeCancel(m) => &m.header,
            Message::Statistics(m) => &m.header,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Heartbeat(_) => MessageType::Heartbeat,
            Message::SequenceReset(_) => MessageType::SequenceReset,
            Message::SecurityDefinition(_) => MessageType::SecurityDefinition,
            Message::AddOrder(_) => MessageType::AddOrder,
            Message::ModifyOrder(_) => MessageType::ModifyOrder,
            Message::DeleteOrder(_) => MessageType::DeleteOrder,
            Message::Trade(_) => MessageType::Trade,
            Message::TradeCancel(_) => MessageType::TradeCancel,
            Message::Statistics(_) => MessageType::Statistics,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.header().sequence
    }

    pub fn instrument_id(&self) -> u32 {
        self.header().instrument_id
    }

    /// Append the wire encoding of this message to `out`. Header length and
    /// type are derived from the variant; the header's own values are ignored.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let msg_type = self.message_type();
        let size = msg_type.wire_size();
        let start = out.len();
        out.resize(start + size, 0);
        let buf = &mut out[start..];

        let header = self.header();
        LittleEndian::write_u16(&mut buf[0..2], size as u16);
        LittleEndian::write_u16(&mut buf[2..4], msg_type as u16);
        LittleEndian::write_u32(&mut buf[4..8], header.instrument_id);
        LittleEndian::write_u64(&mut buf[8..16], header.sequence);
        LittleEndian::write_u64(&mut buf[16..24], header.send_time);

        match self {
            Message::Heartbeat(_) => {}
            Message::SequenceReset(m) => {
                LittleEndian::write_u64(&mut buf[24..32], m.new_seq);
            }
            Message::SecurityDefinition(m) => {
                buf[24..40].copy_from_slice(&m.symbol);
                LittleEndian::write_u32(&mut buf[40..44], m.lot_size);
                buf[44] = m.price_decimals;
            }
            Message::AddOrder(AddOrder { order_id, price, quantity, side, .. })
            | Message::ModifyOrder(ModifyOrder { order_id, price, quantity, side, .. }) => {
                LittleEndian::write_u64(&mut buf[24..32], *order_id);
                LittleEndian::write_u64(&mut buf[32..40], *price);
                LittleEndian::write_u32(&mut buf[40..44], *quantity);
                buf[44] = side.as_u8();
            }
            Message::DeleteOrder(m) => {
                LittleEndian::write_u64(&mut buf[24..32], m.order_id);
                buf[32] = m.side.as_u8();
            }
            Message::Trade(m) => {
                LittleEndian::write_u64(&mut buf[24..32], m.order_id);
                LittleEndian::write_u64(&mut buf[32..40], m.trade_id);
                LittleEndian::write_u64(&mut buf[40..48], m.price);
                LittleEndian::write_u32(&mut buf[48..52], m.quantity);
                buf[52] = m.side.as_u8();
            }
            Message::TradeCancel(m) => {
                LittleEndian::write_u64(&mut buf[24..32], m.trade_id);
            }
            Message::Statistics(m) => {
                LittleEndian::write_u64(&mut buf[24..32], m.high);
                LittleEndian::write_u64(&mut buf[32..40], m.low);
                LittleEndian::write_u64(&mut buf[40..48], m.shares_traded);
                LittleEndian::write_u64(&mut buf[48..56], m.turnover);
            }
        }
    }
}

/// Builds one packet in the wire format. Used by the gap-fill client, the
/// TCP heartbeat sender, the feed generator and tests.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    channel_id: u32,
    seq_num: u64,
    send_time: u64,
    msg_count: u16,
    buf: Vec<u8>,
}

impl PacketBuilder {
    pub fn new(channel_id: u32, seq_num: u64, send_time: u64) -> Self {
        PacketBuilder {
            channel_id,
            seq_num,
            send_time,
            msg_count: 0,
            buf: vec![0u8; PACKET_HEADER_SIZE],
        }
    }

    pub fn push(&mut self, msg: &Message) -> &mut Self {
        msg.encode(&mut self.buf);
        self.msg_count += 1;
        self
    }

    /// Append a message with an arbitrary type and body. The body is padded
    /// to a multiple of 8 bytes.
    pub fn push_raw(
        &mut self,
        msg_type: u16,
        instrument_id: u32,
        sequence: u64,
        send_time: u64,
        body: &[u8],
    ) -> &mut Self {
        let size = MESSAGE_HEADER_SIZE + body.len().next_multiple_of(8);
        let start = self.buf.len();
        self.buf.resize(start + size, 0);
        let msg = &mut self.buf[start..];
        LittleEndian::write_u16(&mut msg[0..2], size as u16);
        LittleEndian::write_u16(&mut msg[2..4], msg_type);
        LittleEndian::write_u32(&mut msg[4..8], instrument_id);
        LittleEndian::write_u64(&mut msg[8..16], sequence);
        LittleEndian::write_u64(&mut msg[16..24], send_time);
        msg[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + body.len()].copy_from_slice(body);
        self.msg_count += 1;
        self
    }

    pub fn message_count(&self) -> u16 {
        self.msg_count
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msg_count == 0
    }

    /// Finalise the packet header and return the encoded bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let size = self.buf.len() as u16;
        LittleEndian::write_u16(&mut self.buf[0..2], size);
        LittleEndian::write_u16(&mut self.buf[2..4], self.msg_count);
        LittleEndian::write_u32(&mut self.buf[4..8], self.channel_id);
        LittleEndian::write_u64(&mut self.buf[8..16], self.seq_num);
        LittleEndian::write_u64(&mut self.buf[16..24], self.send_time);
        self.buf
    }
}

/// Build a message header for encoding; size and type are filled in by `encode`.
pub fn header(instrument_id: u32, sequence: u64, send_time: u64) -> MessageHeader {
    MessageHeader {
        msg_size: 0,
        msg_type: 0,
        instrument_id,
        sequence,
        send_time,
    }
}

/// Convert price from fixed-point to float
pub fn price_from_fixed(fixed: u64) -> f64 {
    fixed as f64 / PRICE_SCALE as f64
}

/// Convert price to fixed-point
pub fn price_to_fixed(price: f64) -> u64 {
    (price * PRICE_SCALE as f64).round() as u64
}
