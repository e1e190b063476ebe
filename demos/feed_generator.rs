/// Synthetic market data feed generator
///
/// Creates realistic order flow as wire-format packets and writes them to a
/// file, stdout, or a UDP destination (`udp:127.0.0.1:51000`).
/// Useful for testing and benchmarking.
///
/// Usage: feed_generator [OUTPUT] [MESSAGES] [INSTRUMENTS]

use feed_pipeline::protocol::*;
use feed_pipeline::util::now_nanos;
use log::{info, warn};
use rand::rngs::ThreadRng;
use rand::Rng;
use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::net::UdpSocket;

const MID_PRICE: u64 = 100_00000000;

enum Sink {
    Stream(Box<dyn Write>),
    Udp { socket: UdpSocket, target: String },
}

impl Sink {
    fn open(sink: &str) -> io::Result<Self> {
        if let Some(target) = sink.strip_prefix("udp:") {
            let socket = UdpSocket::bind("0.0.0.0:0")?;
            return Ok(Sink::Udp {
                socket,
                target: target.to_string(),
            });
        }
        let stream: Box<dyn Write> = if sink == "stdout" {
            Box::new(io::stdout())
        } else {
            Box::new(File::create(sink)?)
        };
        Ok(Sink::Stream(stream))
    }

    fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        match self {
            Sink::Stream(out) => out.write_all(packet),
            Sink::Udp { socket, target } => socket.send_to(packet, target.as_str()).map(|_| ()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Stream(out) => out.flush(),
            Sink::Udp { .. } => Ok(()),
        }
    }
}

/// Live orders so modifies, deletes and executions reference real ids.
struct Generator {
    rng: ThreadRng,
    instruments: u32,
    next_order_id: u64,
    next_trade_id: u64,
    sequence: u64,
    live: Vec<(u64, u32, Side, u64, u32)>,
}

impl Generator {
    fn random_price(&mut self, side: Side) -> u64 {
        let offset = self.rng.gen_range(1..500u64) * 1_000000;
        match side {
            Side::Bid => MID_PRICE - offset,
            Side::Ask => MID_PRICE + offset,
        }
    }

    fn next_message(&mut self) -> Message {
        self.sequence += 1;
        let now = now_nanos();
        let roll = self.rng.gen_range(0..100u32);

        if self.live.is_empty() || roll < 50 {
            let instrument = self.rng.gen_range(1..=self.instruments);
            let side = if self.rng.gen_bool(0.5) { Side::Bid } else { Side::Ask };
            let price = self.random_price(side);
            let quantity = self.rng.gen_range(1..1000u32);
            let order_id = self.next_order_id;
            self.next_order_id += 1;
            self.live.push((order_id, instrument, side, price, quantity));
            return Message::AddOrder(AddOrder {
                header: header(instrument, self.sequence, now),
                order_id,
                price,
                quantity,
                side,
            });
        }

        let idx = self.rng.gen_range(0..self.live.len());
        let (order_id, instrument, side, price, quantity) = self.live[idx];
        let hdr = header(instrument, self.sequence, now);

        if roll < 75 {
            let new_qty = self.rng.gen_range(1..1000u32);
            self.live[idx].4 = new_qty;
            Message::ModifyOrder(ModifyOrder {
                header: hdr,
                order_id,
                price,
                quantity: new_qty,
                side,
            })
        } else if roll < 90 {
            self.live.swap_remove(idx);
            Message::DeleteOrder(DeleteOrder {
                header: hdr,
                order_id,
                side,
            })
        } else {
            let executed = self.rng.gen_range(1..=quantity);
            if executed == quantity {
                self.live.swap_remove(idx);
            } else {
                self.live[idx].4 -= executed;
            }
            self.next_trade_id += 1;
            Message::Trade(Trade {
                header: hdr,
                order_id,
                trade_id: self.next_trade_id,
                price,
                quantity: executed,
                side,
            })
        }
    }
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let output = args.get(1).cloned().unwrap_or_else(|| "/tmp/feed_generator.bin".to_string());
    let message_count: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10000);
    let instruments: u32 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(4).max(1);

    let mut sink = Sink::open(&output)?;
    let mut generator = Generator {
        rng: rand::thread_rng(),
        instruments,
        next_order_id: 1000,
        next_trade_id: 0,
        sequence: 0,
        live: Vec::new(),
    };

    info!("generating {message_count} messages across {instruments} instruments to {output}");

    let mut bytes = 0usize;
    let mut packets = 0u64;
    let mut written = 0usize;

    while written < message_count {
        let mut builder = PacketBuilder::new(1, packets + 1, now_nanos());
        // Leave room for the largest message type
        while written < message_count && builder.len() + 56 <= MAX_PACKET_SIZE {
            builder.push(&generator.next_message());
            written += 1;
        }
        let packet = builder.finish();
        bytes += packet.len();
        packets += 1;
        if let Err(e) = sink.send(&packet) {
            warn!("write failed after {packets} packets: {e}");
            return Err(e);
        }

        if packets % 1000 == 0 {
            info!("generated {written} messages in {packets} packets");
        }
    }
    sink.flush()?;

    info!("feed generation complete: {written} messages, {packets} packets, {bytes} bytes");
    Ok(())
}
