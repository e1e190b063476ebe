/// Protocol conformance and decoder tests

use byteorder::{ByteOrder, LittleEndian};
use feed_pipeline::protocol::{header, AddOrder, Trade, PACKET_HEADER_SIZE};
use feed_pipeline::{DecodeError, Decoder, Message, MessageType, PacketBuilder, Side};

fn create_message(msg_type: MessageType, seq: u64) -> Vec<u8> {
    let total_size = msg_type.wire_size();
    let mut msg = vec![0u8; total_size];
    LittleEndian::write_u16(&mut msg[0..2], total_size as u16);
    LittleEndian::write_u16(&mut msg[2..4], msg_type as u16);
    LittleEndian::write_u32(&mut msg[4..8], 1);
    LittleEndian::write_u64(&mut msg[8..16], seq);
    msg
}

fn create_packet(messages: &[Vec<u8>]) -> Vec<u8> {
    let body: usize = messages.iter().map(Vec::len).sum();
    let mut packet = vec![0u8; PACKET_HEADER_SIZE];
    LittleEndian::write_u16(&mut packet[0..2], (PACKET_HEADER_SIZE + body) as u16);
    LittleEndian::write_u16(&mut packet[2..4], messages.len() as u16);
    for msg in messages {
        packet.extend_from_slice(msg);
    }
    packet
}

fn decode_all(packet: &[u8]) -> Result<Vec<Message>, DecodeError> {
    let mut decoder = Decoder::new(false);
    let mut out = Vec::new();
    decoder.decode_packet(packet, 0, |msg| out.push(*msg))?;
    Ok(out)
}

#[test]
fn test_decode_add_order() {
    let mut msg = create_message(MessageType::AddOrder, 42);
    LittleEndian::write_u64(&mut msg[24..32], 7);
    LittleEndian::write_u64(&mut msg[32..40], 9999);
    LittleEndian::write_u32(&mut msg[40..44], 50);
    msg[44] = 0;

    let (decoded, consumed) = Decoder::decode_message(&msg).unwrap();
    assert_eq!(consumed, 48);
    assert_eq!(decoded.sequence(), 42);
    assert_eq!(decoded.message_type(), MessageType::AddOrder);
    match decoded {
        Message::AddOrder(m) => {
            assert_eq!(m.order_id, 7);
            assert_eq!(m.price, 9999);
            assert_eq!(m.quantity, 50);
            assert_eq!(m.side, Side::Bid);
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn test_decode_each_type() {
    for msg_type in [
        MessageType::Heartbeat,
        MessageType::SequenceReset,
        MessageType::SecurityDefinition,
        MessageType::AddOrder,
        MessageType::ModifyOrder,
        MessageType::DeleteOrder,
        MessageType::Trade,
        MessageType::TradeCancel,
        MessageType::Statistics,
    ] {
        let msg = create_message(msg_type, 10);
        let (decoded, consumed) = Decoder::decode_message(&msg).unwrap();
        assert_eq!(consumed, msg_type.wire_size());
        assert_eq!(decoded.message_type(), msg_type);
        assert_eq!(decoded.sequence(), 10);
    }
}

#[test]
fn test_buffer_too_small_header() {
    let small = vec![0u8; 4];
    let result = Decoder::decode_message(&small);
    assert!(matches!(result, Err(DecodeError::BufferTooSmall { .. })));
}

#[test]
fn test_declared_length_exceeds_buffer() {
    let mut msg = create_message(MessageType::AddOrder, 1);
    LittleEndian::write_u16(&mut msg[0..2], 64); // claims 64 bytes
    let result = Decoder::decode_message(&msg);
    assert!(matches!(result, Err(DecodeError::TruncatedMessage { .. })));
}

#[test]
fn test_zero_length() {
    let mut msg = create_message(MessageType::AddOrder, 1);
    LittleEndian::write_u16(&mut msg[0..2], 0);
    assert!(Decoder::decode_message(&msg).is_err());
}

#[test]
fn test_invalid_message_type() {
    let mut msg = create_message(MessageType::AddOrder, 1);
    LittleEndian::write_u16(&mut msg[2..4], 99); // invalid type
    let result = Decoder::decode_message(&msg);
    assert!(matches!(result, Err(DecodeError::InvalidMessageType(99))));
}

#[test]
fn test_invalid_side() {
    let mut msg = create_message(MessageType::DeleteOrder, 1);
    msg[32] = 7;
    let result = Decoder::decode_message(&msg);
    assert_eq!(result.unwrap_err(), DecodeError::InvalidSide(7));
}

#[test]
fn test_packet_round_trip_callback_count() {
    let mut builder = PacketBuilder::new(3, 100, 0);
    for i in 0..10u64 {
        builder.push(&Message::AddOrder(AddOrder {
            header: header(1, i + 1, 0),
            order_id: i,
            price: 100 + i,
            quantity: 10,
            side: if i % 2 == 0 { Side::Bid } else { Side::Ask },
        }));
    }
    builder.push(&Message::Trade(Trade {
        header: header(1, 11, 0),
        order_id: 0,
        trade_id: 1,
        price: 100,
        quantity: 5,
        side: Side::Ask,
    }));
    let packet = builder.finish();

    let messages = decode_all(&packet).unwrap();
    assert_eq!(messages.len(), 11);
    let sequences: Vec<u64> = messages.iter().map(Message::sequence).collect();
    assert_eq!(sequences, (1..=11).collect::<Vec<_>>());

    let header = Decoder::read_packet_header(&packet).unwrap();
    assert_eq!(header.channel_id, 3);
    assert_eq!(header.seq_num, 100);
    assert_eq!(header.msg_count, 11);
    assert_eq!(header.pkt_size as usize, packet.len());
}

#[test]
fn test_truncated_packet_dispatches_nothing() {
    let mut last = create_message(MessageType::AddOrder, 2);
    LittleEndian::write_u16(&mut last[0..2], 200); // overruns the packet
    let packet = create_packet(&[create_message(MessageType::AddOrder, 1), last]);

    let mut decoder = Decoder::new(false);
    let mut seen = 0;
    let result = decoder.decode_packet(&packet, 0, |_| seen += 1);
    assert!(matches!(
        result,
        Err(DecodeError::TruncatedMessage { index: 1, .. })
    ));
    assert_eq!(seen, 0);
}

#[test]
fn test_bad_side_late_in_packet_dispatches_nothing() {
    let mut bad = create_message(MessageType::Trade, 3);
    bad[52] = 9;
    let packet = create_packet(&[
        create_message(MessageType::AddOrder, 1),
        create_message(MessageType::AddOrder, 2),
        bad,
    ]);
    assert_eq!(decode_all(&packet).unwrap_err(), DecodeError::InvalidSide(9));
}

#[test]
fn test_packet_size_mismatch() {
    let mut packet = create_packet(&[create_message(MessageType::Heartbeat, 0)]);
    packet.push(0);
    assert!(matches!(
        decode_all(&packet),
        Err(DecodeError::SizeMismatch { .. })
    ));
}

#[test]
fn test_message_shorter_than_type_requires() {
    let mut short = create_message(MessageType::AddOrder, 1);
    short.truncate(40);
    LittleEndian::write_u16(&mut short[0..2], 40);
    let packet = create_packet(&[short]);
    assert!(matches!(
        decode_all(&packet),
        Err(DecodeError::MessageTooShort { need: 48, .. })
    ));
}

#[test]
fn test_unknown_type_skipped() {
    let mut unknown = vec![0u8; 32];
    LittleEndian::write_u16(&mut unknown[0..2], 32);
    LittleEndian::write_u16(&mut unknown[2..4], 777);
    let packet = create_packet(&[
        create_message(MessageType::AddOrder, 1),
        unknown,
        create_message(MessageType::DeleteOrder, 2),
    ]);

    let mut decoder = Decoder::new(false);
    let mut types = Vec::new();
    let summary = decoder
        .decode_packet(&packet, 0, |m| types.push(m.message_type()))
        .unwrap();
    assert_eq!(types, vec![MessageType::AddOrder, MessageType::DeleteOrder]);
    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.unknown, 1);
}

#[test]
fn test_oversized_message_is_accepted() {
    // Longer than the type requires: trailing bytes are skipped.
    let mut msg = create_message(MessageType::Heartbeat, 0);
    msg.resize(32, 0);
    LittleEndian::write_u16(&mut msg[0..2], 32);
    let packet = create_packet(&[msg, create_message(MessageType::TradeCancel, 5)]);
    let messages = decode_all(&packet).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].sequence(), 5);
}

#[test]
fn test_latency_tracking() {
    let mut msg = create_message(MessageType::AddOrder, 1);
    LittleEndian::write_u64(&mut msg[16..24], 1_000);
    let packet = create_packet(&[msg]);

    let mut decoder = Decoder::new(true);
    decoder.decode_packet(&packet, 1_500, |_| {}).unwrap();
    let latency = decoder.take_latency();
    assert_eq!(latency.samples, 1);
    assert_eq!(latency.sum_ns, 500);
    assert_eq!(decoder.latency().samples, 0);
}
