//! Transport layer
//!
//! UDP (multicast or unicast) delivers one packet per datagram. TCP is a byte
//! stream, so packets are reassembled from the `pkt_size` field of the packet
//! header. Both are opened with a receive timeout so the receive loop can
//! notice a stop request within one poll interval.

use crate::config::{SocketConfig, TransportConfig};
use crate::protocol::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};

/// An open feed connection.
#[derive(Debug)]
pub enum Transport {
    Udp(UdpSocket),
    Tcp(TcpFramer),
}

impl Transport {
    pub fn open(transport: &TransportConfig, socket: &SocketConfig) -> io::Result<Self> {
        match transport {
            TransportConfig::Multicast {
                group,
                port,
                interface,
            } => build_mcast_socket(*group, *port, *interface, socket).map(Transport::Udp),
            TransportConfig::Udp { bind } => build_udp_socket(*bind, socket).map(Transport::Udp),
            TransportConfig::Tcp { address } => {
                connect_tcp(address, socket).map(|s| Transport::Tcp(TcpFramer::new(s)))
            }
        }
    }

    /// Receive one complete packet into `buf`.
    ///
    /// `Ok(None)` means nothing arrived within the poll interval. A closed TCP
    /// session is reported as `ErrorKind::UnexpectedEof`.
    pub fn recv_packet(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self {
            Transport::Udp(sock) => match sock.recv(buf) {
                Ok(n) => Ok(Some(n)),
                Err(e) if is_timeout(&e) => Ok(None),
                Err(e) => Err(e),
            },
            Transport::Tcp(framer) => framer.recv_packet(buf),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Transport::Udp(sock) => sock.local_addr(),
            Transport::Tcp(framer) => framer.stream.local_addr(),
        }
    }

    /// Independent write handle for TCP sessions (heartbeats, requests).
    pub fn tcp_writer(&self) -> io::Result<Option<TcpStream>> {
        match self {
            Transport::Udp(_) => Ok(None),
            Transport::Tcp(framer) => framer.stream.try_clone().map(Some),
        }
    }

    /// Unblock and close the connection.
    pub fn close(&self) {
        if let Transport::Tcp(framer) = self {
            let _ = framer.stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

pub fn build_mcast_socket(
    group: Ipv4Addr,
    port: u16,
    interface: Ipv4Addr,
    cfg: &SocketConfig,
) -> io::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    sock.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    if cfg.reuse_port {
        sock.set_reuse_port(true)?;
    }

    // Bind to wildcard:port for multicast RX
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    sock.bind(&bind_addr.into())?;
    apply_buffer_sizes(&sock, cfg);
    sock.join_multicast_v4(&group, &interface)?;
    sock.set_read_timeout(Some(cfg.poll_interval()))?;

    info!("joined multicast {group}:{port} on {interface}");
    Ok(sock.into())
}

pub fn build_udp_socket(bind: SocketAddr, cfg: &SocketConfig) -> io::Result<UdpSocket> {
    let sock = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    sock.bind(&bind.into())?;
    apply_buffer_sizes(&sock, cfg);
    sock.set_read_timeout(Some(cfg.poll_interval()))?;

    let udp: UdpSocket = sock.into();
    info!("listening on udp {}", udp.local_addr()?);
    Ok(udp)
}

/// TCP connect with no-delay and explicit buffer sizes.
pub fn connect_tcp(address: &str, cfg: &SocketConfig) -> io::Result<TcpStream> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, format!("no address for {address}"));
    for addr in address.to_socket_addrs()? {
        let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        sock.set_nodelay(cfg.nodelay)?;
        apply_buffer_sizes(&sock, cfg);
        match sock.connect_timeout(&SockAddr::from(addr), cfg.connect_timeout()) {
            Ok(()) => {
                sock.set_read_timeout(Some(cfg.poll_interval()))?;
                info!("connected tcp {addr}");
                return Ok(sock.into());
            }
            Err(e) => {
                debug!("tcp connect to {addr} failed: {e}");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Buffer sizes are hints; the kernel may clamp them.
fn apply_buffer_sizes(sock: &Socket, cfg: &SocketConfig) {
    if cfg.recv_buffer_bytes > 0 {
        if let Err(e) = sock.set_recv_buffer_size(cfg.recv_buffer_bytes) {
            debug!("SO_RCVBUF {} refused: {e}", cfg.recv_buffer_bytes);
        }
    }
    if cfg.send_buffer_bytes > 0 {
        if let Err(e) = sock.set_send_buffer_size(cfg.send_buffer_bytes) {
            debug!("SO_SNDBUF {} refused: {e}", cfg.send_buffer_bytes);
        }
    }
}

/// Reassembles packets from a TCP byte stream.
#[derive(Debug)]
pub struct TcpFramer {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl TcpFramer {
    pub fn new(stream: TcpStream) -> Self {
        TcpFramer {
            stream,
            pending: Vec::with_capacity(MAX_PACKET_SIZE * 2),
        }
    }

    /// Length of the first complete packet in `pending`, if there is one.
    fn complete_packet_len(&self) -> io::Result<Option<usize>> {
        if self.pending.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }
        let size = LittleEndian::read_u16(&self.pending[0..2]) as usize;
        if !(PACKET_HEADER_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid packet size {size} on tcp stream"),
            ));
        }
        Ok((self.pending.len() >= size).then_some(size))
    }

    pub fn recv_packet(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            if let Some(size) = self.complete_packet_len()? {
                if size > buf.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("packet of {size} bytes exceeds buffer"),
                    ));
                }
                buf[..size].copy_from_slice(&self.pending[..size]);
                self.pending.drain(..size);
                return Ok(Some(size));
            }

            let mut chunk = [0u8; MAX_PACKET_SIZE];
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "tcp session closed by peer",
                    ))
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Write one encoded packet to a TCP stream.
pub fn send_packet(stream: &mut TcpStream, packet: &[u8]) -> io::Result<()> {
    stream.write_all(packet)?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{header, Message, PacketBuilder};
    use std::net::TcpListener;

    fn heartbeat_packet(seq: u64) -> Vec<u8> {
        let mut builder = PacketBuilder::new(1, seq, 0);
        builder.push(&Message::Heartbeat(header(0, 0, 0)));
        builder.finish()
    }

    #[test]
    fn test_udp_roundtrip() {
        let cfg = SocketConfig::default();
        let mut transport = Transport::open(
            &TransportConfig::Udp {
                bind: "127.0.0.1:0".parse().unwrap(),
            },
            &cfg,
        )
        .unwrap();
        let addr = transport.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let packet = heartbeat_packet(1);
        sender.send_to(&packet, addr).unwrap();

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let mut received = None;
        for _ in 0..200 {
            if let Some(n) = transport.recv_packet(&mut buf).unwrap() {
                received = Some(n);
                break;
            }
        }
        assert_eq!(received, Some(packet.len()));
        assert_eq!(&buf[..packet.len()], packet.as_slice());
    }

    #[test]
    fn test_tcp_framer_reassembles_split_packets() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let first = heartbeat_packet(1);
        let second = heartbeat_packet(2);

        let writer = {
            let mut bytes = first.clone();
            bytes.extend_from_slice(&second);
            std::thread::spawn(move || {
                let (mut conn, _) = listener.accept().unwrap();
                conn.write_all(&bytes[..10]).unwrap();
                conn.flush().unwrap();
                std::thread::sleep(std::time::Duration::from_millis(20));
                conn.write_all(&bytes[10..]).unwrap();
            })
        };

        let stream = connect_tcp(&addr.to_string(), &SocketConfig::default()).unwrap();
        let mut framer = TcpFramer::new(stream);
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let mut packets = Vec::new();
        while packets.len() < 2 {
            match framer.recv_packet(&mut buf) {
                Ok(Some(n)) => packets.push(buf[..n].to_vec()),
                Ok(None) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        writer.join().unwrap();
        assert_eq!(packets, vec![first, second]);
    }
}
