/// Retransmission client tests against a loopback server

use byteorder::{ByteOrder, LittleEndian};
use feed_pipeline::protocol::*;
use feed_pipeline::{RecoveryError, Retransmitter, TcpRetransmitter};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

fn add_packet(seq: u64) -> Vec<u8> {
    let mut builder = PacketBuilder::new(1, seq, 0);
    builder.push(&Message::AddOrder(AddOrder {
        header: header(9, seq, 0),
        order_id: seq,
        price: 100,
        quantity: 10,
        side: Side::Bid,
    }));
    builder.finish()
}

/// Read one request and return `(channel, start, end)`.
fn read_request(conn: &mut TcpStream) -> (u32, u64, u64) {
    let mut request = [0u8; PACKET_HEADER_SIZE + RETRANSMISSION_REQUEST_SIZE];
    conn.read_exact(&mut request).unwrap();
    let msg = &request[PACKET_HEADER_SIZE..];
    assert_eq!(LittleEndian::read_u16(&msg[0..2]) as usize, RETRANSMISSION_REQUEST_SIZE);
    assert_eq!(LittleEndian::read_u16(&msg[2..4]), RETRANSMISSION_REQUEST_TYPE);
    (
        LittleEndian::read_u32(&request[4..8]),
        LittleEndian::read_u64(&msg[24..32]),
        LittleEndian::read_u64(&msg[32..40]),
    )
}

fn serve_once<F>(reply: F) -> (String, JoinHandle<(u32, u64, u64)>)
where
    F: FnOnce(&mut TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let request = read_request(&mut conn);
        reply(&mut conn);
        request
    });
    (address, server)
}

#[test]
fn test_request_range_reads_until_empty_packet() {
    let (address, server) = serve_once(|conn| {
        conn.write_all(&add_packet(4)).unwrap();
        conn.write_all(&add_packet(5)).unwrap();
        conn.write_all(&PacketBuilder::new(1, 0, 0).finish()).unwrap();
        conn.flush().unwrap();
        // Hold the connection until the client hangs up: the empty packet
        // alone must end the reply.
        let mut rest = Vec::new();
        conn.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    });

    let mut client = TcpRetransmitter::new(address, 1, TIMEOUT);
    let packets = client.request_range(4, 5).unwrap();

    assert_eq!(packets, vec![add_packet(4), add_packet(5)]);
    assert_eq!(server.join().unwrap(), (1, 4, 5));
}

#[test]
fn test_request_range_stops_at_eof() {
    let (address, server) = serve_once(|conn| {
        conn.write_all(&add_packet(7)).unwrap();
    });

    let mut client = TcpRetransmitter::new(address, 3, TIMEOUT);
    let packets = client.request_range(7, 7).unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(server.join().unwrap(), (3, 7, 7));
}

#[test]
fn test_no_packets_is_rejected() {
    let (address, server) = serve_once(|conn| {
        conn.write_all(&PacketBuilder::new(1, 0, 0).finish()).unwrap();
    });

    let mut client = TcpRetransmitter::new(address, 1, TIMEOUT);
    let err = client.request_range(10, 12).unwrap_err();
    assert!(matches!(err, RecoveryError::Rejected { start: 10, end: 12 }));
    server.join().unwrap();
}

#[test]
fn test_bad_packet_size_is_invalid() {
    let (address, server) = serve_once(|conn| {
        let mut hdr = [0u8; PACKET_HEADER_SIZE];
        LittleEndian::write_u16(&mut hdr[0..2], 4); // smaller than a header
        LittleEndian::write_u16(&mut hdr[2..4], 1);
        conn.write_all(&hdr).unwrap();
    });

    let mut client = TcpRetransmitter::new(address, 1, TIMEOUT);
    let err = client.request_range(1, 1).unwrap_err();
    assert!(matches!(err, RecoveryError::InvalidPacket(_)));
    server.join().unwrap();
}

#[test]
fn test_unreachable_server() {
    let closed = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = closed.local_addr().unwrap().to_string();
    drop(closed);

    let mut client = TcpRetransmitter::new(address, 1, Duration::from_millis(200));
    assert!(matches!(
        client.request_range(1, 2),
        Err(RecoveryError::Connect(_))
    ));
}
