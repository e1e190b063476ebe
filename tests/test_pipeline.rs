/// Threaded pipeline tests over loopback sockets

use feed_pipeline::protocol::*;
use feed_pipeline::{
    EventHandler, FeedConfig, FeedPipeline, PacketBuilder, PipelineError, PipelineState,
    RecoveryError, Retransmitter, TransportConfig,
};
use std::io::Write;
use std::net::{TcpListener, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const X: u32 = 5;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default)]
struct Events {
    adds: Vec<AddOrder>,
    trades: Vec<Trade>,
    disconnects: Vec<String>,
    /// Every callback in delivery order.
    log: Vec<String>,
}

/// Handler that records into shared state the test can inspect.
struct Recorder(Arc<Mutex<Events>>);

impl EventHandler for Recorder {
    fn on_add_order(&mut self, msg: &AddOrder) {
        let mut events = self.0.lock().unwrap();
        events.adds.push(*msg);
        events.log.push(format!("add {}", msg.order_id));
    }
    fn on_trade(&mut self, msg: &Trade) {
        let mut events = self.0.lock().unwrap();
        events.trades.push(*msg);
        events.log.push(format!("trade {}", msg.trade_id));
    }
    fn on_disconnect(&mut self, reason: &str) {
        let mut events = self.0.lock().unwrap();
        events.disconnects.push(reason.to_string());
        events.log.push(format!("disconnect {reason}"));
    }
}

fn udp_config() -> FeedConfig {
    let mut config = FeedConfig::default();
    config.transport = TransportConfig::Udp {
        bind: "127.0.0.1:0".parse().unwrap(),
    };
    config.heartbeat.interval_ms = 0;
    config.socket.poll_interval_ms = 5;
    config
}

fn pipeline(config: FeedConfig) -> (FeedPipeline, Arc<Mutex<Events>>) {
    let events = Arc::new(Mutex::new(Events::default()));
    let mut pipeline = FeedPipeline::new(Box::new(Recorder(Arc::clone(&events))));
    pipeline.initialize(config).unwrap();
    (pipeline, events)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn add_packet(seq: u64) -> Vec<u8> {
    let mut builder = PacketBuilder::new(1, seq, 0);
    builder.push(&Message::AddOrder(AddOrder {
        header: header(X, seq, 0),
        order_id: seq,
        price: 100,
        quantity: 10,
        side: Side::Bid,
    }));
    builder.finish()
}

/// Serves gap fills from memory and records what was asked for.
struct ReplayRetransmitter(Arc<Mutex<Vec<(u64, u64)>>>);

impl Retransmitter for ReplayRetransmitter {
    fn request_range(&mut self, start: u64, end: u64) -> Result<Vec<Vec<u8>>, RecoveryError> {
        self.0.lock().unwrap().push((start, end));
        Ok((start..=end).map(add_packet).collect())
    }
}

fn add_and_trade_packet() -> Vec<u8> {
    let mut builder = PacketBuilder::new(1, 1, 0);
    builder.push(&Message::AddOrder(AddOrder {
        header: header(X, 1, 0),
        order_id: 1,
        price: 9999,
        quantity: 50,
        side: Side::Bid,
    }));
    builder.push(&Message::Trade(Trade {
        header: header(X, 2, 0),
        order_id: 0,
        trade_id: 1,
        price: 9999,
        quantity: 20,
        side: Side::Ask,
    }));
    builder.finish()
}

#[test]
fn test_udp_end_to_end() {
    init_logging();
    let (mut pipeline, events) = pipeline(udp_config());
    assert_eq!(pipeline.state(), PipelineState::Initialized);

    pipeline.connect().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Ready);
    let addr = pipeline.local_addr().unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&add_and_trade_packet(), addr).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.stats().messages_processed >= 2
    }));

    let book = pipeline.order_book(X).unwrap();
    assert_eq!(book.best_bid().unwrap().price, 9999);
    assert_eq!(book.best_bid().unwrap().quantity, 50);
    assert_eq!(book.total_volume, 20);
    assert_eq!(book.last_trade_price, Some(9999));

    let stats = pipeline.stats();
    assert_eq!(stats.packets_received, 1);
    assert_eq!(stats.messages_received, 2);
    assert_eq!(stats.decode_errors, 0);
    {
        let events = events.lock().unwrap();
        assert_eq!(events.adds.len(), 1);
        assert_eq!(events.adds[0].quantity, 50);
        assert_eq!(events.trades.len(), 1);
    }

    pipeline.disconnect();
    assert_eq!(pipeline.state(), PipelineState::Disconnected);
    assert!(pipeline.local_addr().is_none());
    assert_eq!(events.lock().unwrap().disconnects, vec!["local disconnect".to_string()]);
}

#[test]
fn test_corrupt_datagram_counted() {
    init_logging();
    let (mut pipeline, _events) = pipeline(udp_config());
    pipeline.connect().unwrap();
    let addr = pipeline.local_addr().unwrap();

    let mut packet = add_and_trade_packet();
    packet.truncate(packet.len() - 8);
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&packet, addr).unwrap();

    assert!(wait_until(Duration::from_secs(5), || pipeline.stats().decode_errors == 1));
    assert!(pipeline.order_book(X).is_none());
    pipeline.shutdown();
    assert_eq!(pipeline.state(), PipelineState::Shutdown);
}

#[test]
fn test_unsubscribed_before_connect() {
    init_logging();
    let (mut pipeline, events) = pipeline(udp_config());
    pipeline.unsubscribe(X);
    assert!(!pipeline.is_subscribed(X));
    pipeline.connect().unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(&add_and_trade_packet(), pipeline.local_addr().unwrap())
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.stats().messages_filtered == 2
    }));
    assert!(pipeline.order_book(X).is_none());
    assert!(events.lock().unwrap().adds.is_empty());
    pipeline.shutdown();
}

#[test]
fn test_heartbeat_timeout_notifies_once() {
    init_logging();
    let mut config = udp_config();
    config.heartbeat.interval_ms = 20;
    config.heartbeat.missed_before_disconnect = 2;
    let (mut pipeline, events) = pipeline(config);
    pipeline.connect().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !events.lock().unwrap().disconnects.is_empty()
    }));
    assert!(pipeline.is_disconnected());
    assert_eq!(pipeline.state(), PipelineState::Disconnected);

    pipeline.disconnect();
    assert_eq!(events.lock().unwrap().disconnects, vec!["heartbeat timeout".to_string()]);
}

#[test]
fn test_nothing_delivered_after_heartbeat_timeout() {
    init_logging();
    let mut config = udp_config();
    config.heartbeat.interval_ms = 20;
    config.heartbeat.missed_before_disconnect = 2;
    let (mut pipeline, events) = pipeline(config);
    pipeline.connect().unwrap();
    let addr = pipeline.local_addr().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !events.lock().unwrap().disconnects.is_empty()
    }));

    // Late data for a session that is already over.
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&add_packet(1), addr).unwrap();
    thread::sleep(Duration::from_millis(100));

    assert_eq!(
        events.lock().unwrap().log,
        vec!["disconnect heartbeat timeout".to_string()]
    );
    assert!(pipeline.order_book(X).is_none());
    assert_eq!(pipeline.stats().messages_processed, 0);

    pipeline.disconnect();
    assert_eq!(events.lock().unwrap().disconnects.len(), 1);
}

#[test]
fn test_gap_filled_through_retransmitter() {
    init_logging();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut config = udp_config();
    config.recovery.enabled = true;
    config.recovery.retry_interval_ms = 60_000;

    let events = Arc::new(Mutex::new(Events::default()));
    let mut pipeline = FeedPipeline::new(Box::new(Recorder(Arc::clone(&events))))
        .with_retransmitter(Box::new(ReplayRetransmitter(Arc::clone(&calls))));
    pipeline.initialize(config).unwrap();
    pipeline.connect().unwrap();
    let addr = pipeline.local_addr().unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&add_packet(1), addr).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        events.lock().unwrap().adds.len() == 1
    }));
    sender.send_to(&add_packet(4), addr).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        events.lock().unwrap().adds.len() == 4
    }));
    assert_eq!(calls.lock().unwrap().as_slice(), &[(2, 3)]);
    assert_eq!(
        events.lock().unwrap().log,
        vec!["add 1", "add 4", "add 2", "add 3"]
    );

    let stats = pipeline.stats();
    assert_eq!(stats.sequence_errors, 1);
    assert_eq!(stats.gap_requests, 1);
    assert_eq!(stats.retransmitted_packets, 2);
    assert_eq!(stats.duplicates, 0);

    let book = pipeline.order_book(X).unwrap();
    assert_eq!(book.best_bid().unwrap().quantity, 40);
    assert_eq!(book.best_bid().unwrap().order_count, 4);

    // The retransmitter survives the session.
    pipeline.disconnect();
    pipeline.connect().unwrap();
    pipeline.shutdown();
}

#[test]
fn test_tcp_peer_close_disconnects() {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        conn.write_all(&add_and_trade_packet()).unwrap();
        conn.flush().unwrap();
        thread::sleep(Duration::from_millis(50));
        // dropping the connection closes the session
    });

    let mut config = udp_config();
    config.transport = TransportConfig::Tcp { address };
    let (mut pipeline, events) = pipeline(config);
    pipeline.connect().unwrap();
    server.join().unwrap();

    assert!(wait_until(Duration::from_secs(5), || pipeline.is_disconnected()));
    assert!(wait_until(Duration::from_secs(5), || {
        events.lock().unwrap().disconnects.len() == 1
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.stats().messages_processed == 2
    }));

    pipeline.disconnect();
    let events = events.lock().unwrap();
    assert_eq!(events.disconnects.len(), 1);
    assert!(events.disconnects[0].starts_with("receive failed"));
    // Data that arrived before the close is delivered first.
    assert_eq!(events.log.len(), 3);
    assert!(events.log[2].starts_with("disconnect receive failed"));
}

#[test]
fn test_connect_failure_keeps_pipeline_usable() {
    init_logging();
    let closed = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = closed.local_addr().unwrap().to_string();
    drop(closed);

    let mut config = udp_config();
    config.transport = TransportConfig::Tcp { address };
    config.socket.connect_timeout_ms = 200;
    let (mut pipeline, _events) = pipeline(config);

    let err = pipeline.connect().unwrap_err();
    assert!(matches!(err, PipelineError::Transport(_)));
    assert_eq!(pipeline.state(), PipelineState::Initialized);

    pipeline.initialize(udp_config()).unwrap();
    pipeline.connect().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Ready);
    pipeline.shutdown();
}

#[test]
fn test_reconnect_after_disconnect() {
    init_logging();
    let (mut pipeline, events) = pipeline(udp_config());
    pipeline.connect().unwrap();
    pipeline.disconnect();

    assert!(matches!(
        pipeline.initialize(udp_config()),
        Ok(())
    ));
    pipeline.connect().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(&add_and_trade_packet(), pipeline.local_addr().unwrap())
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        events.lock().unwrap().adds.len() == 1
    }));
    pipeline.shutdown();

    assert_eq!(events.lock().unwrap().disconnects.len(), 2);
    assert!(pipeline.connect().is_err());
}

#[test]
fn test_reinitialize_restores_subscribe_all() {
    init_logging();
    let mut config = udp_config();
    config.features.subscribe_all = false;
    let (mut pipeline, _events) = pipeline(config);
    assert!(!pipeline.is_subscribed(X));

    pipeline.initialize(udp_config()).unwrap();
    assert!(pipeline.is_subscribed(X));
}

#[test]
fn test_stats_reset() {
    init_logging();
    let (mut pipeline, _events) = pipeline(udp_config());
    pipeline.connect().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(&add_and_trade_packet(), pipeline.local_addr().unwrap())
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || pipeline.stats().packets_received == 1));

    pipeline.reset_stats();
    assert_eq!(pipeline.stats().packets_received, 0);
    assert!(pipeline.stats().to_string().contains("Feed Statistics"));
    pipeline.shutdown();
}
