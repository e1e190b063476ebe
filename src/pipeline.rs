//! Pipeline coordinator
//!
//! Owns the configuration, shared state and worker threads:
//!
//! ```text
//!  socket ─► feed-rx ─► [ring A: pooled packets] ─► feed-proc ─► handler
//!                                                     ▲   │
//!            feed-gapfill ─► [recovery ring] ─────────┘   │
//!                 ▲                                       │
//!                 └──────────── [gap requests] ◄──────────┘
//!  feed-hb: heartbeat timeout monitor (and sender on TCP)
//! ```
//!
//! Only the processing thread touches the sequence tracker, writes the books
//! and calls the handler. Every other thread communicates through SPSC rings
//! or atomics.

use crate::book_builder::{BookBuilder, BookSnapshot, SharedBooks};
use crate::config::{ConfigError, FeedConfig};
use crate::handler::EventHandler;
use crate::net::{send_packet, Transport};
use crate::pool::{ObjectPool, Pooled};
use crate::processor::FeedProcessor;
use crate::protocol::{header, Message, PacketBuilder, MAX_PACKET_SIZE};
use crate::recovery::{GapRequest, Retransmitter, TcpRetransmitter};
use crate::ring_buffer::{self, Consumer, Producer};
use crate::stats::{FeedMetrics, StatsSnapshot};
use crate::subscription::Subscriptions;
use crate::util::{now_nanos, pin_current_thread, Backoff, StopFlag};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Receive buffers preallocated for the receive thread.
pub const PACKET_POOL_SIZE: usize = 4096;
/// Receive → processing ring capacity (holds `PACKET_RING_SIZE - 1` packets).
pub const PACKET_RING_SIZE: usize = 4096;
const RECOVERY_RING_SIZE: usize = 1024;
const GAP_REQUEST_RING_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transport failed: {0}")]
    Transport(#[source] io::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: io::Error,
    },

    #[error("event handler was lost when a worker thread panicked")]
    HandlerLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Initialized,
    /// Transport open, workers starting.
    Connected,
    /// Workers running.
    Ready,
    Disconnected,
    Shutdown,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Uninitialized => "uninitialized",
            PipelineState::Initialized => "initialized",
            PipelineState::Connected => "connected",
            PipelineState::Ready => "ready",
            PipelineState::Disconnected => "disconnected",
            PipelineState::Shutdown => "shut down",
        };
        f.write_str(name)
    }
}

/// One received datagram (or reassembled TCP packet) in a pool slot.
pub struct RawPacket {
    pub data: [u8; MAX_PACKET_SIZE],
    pub len: usize,
    pub recv_ts_ns: u64,
}

impl RawPacket {
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl Default for RawPacket {
    fn default() -> Self {
        RawPacket {
            data: [0u8; MAX_PACKET_SIZE],
            len: 0,
            recv_ts_ns: 0,
        }
    }
}

type PacketPool = ObjectPool<RawPacket, PACKET_POOL_SIZE>;
type PacketSlot = Pooled<RawPacket, PACKET_POOL_SIZE>;

/// Connection-lost notice, raised at most once per session by whichever
/// thread notices first and delivered by the processing thread.
#[derive(Debug, Default)]
struct DisconnectSignal {
    raised: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl DisconnectSignal {
    /// Returns false if a reason was already recorded.
    fn raise(&self, reason: impl Into<String>) -> bool {
        // The reason is in place before the flag is visible to `take`.
        let mut slot = self.reason.lock();
        if self.raised.swap(true, Ordering::AcqRel) {
            return false;
        }
        *slot = Some(reason.into());
        true
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<String> {
        self.reason.lock().take()
    }
}

/// State shared by the workers of one connected session.
///
/// `stop` ends the producers (receive, heartbeat, gap fill) and is always
/// raised after the disconnect reason is recorded. The processing thread
/// keeps going until both packet producers are done, so everything they
/// pushed is processed before `on_disconnect`.
struct Session {
    stop: Arc<StopFlag>,
    disconnect: Arc<DisconnectSignal>,
    rx_done: Arc<StopFlag>,
    gap_fill_done: Arc<StopFlag>,
    rx: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<Box<dyn EventHandler>>>,
    gap_fill: Option<JoinHandle<Box<dyn Retransmitter>>>,
}

impl Session {
    fn new() -> Self {
        Session {
            stop: Arc::new(StopFlag::default()),
            disconnect: Arc::new(DisconnectSignal::default()),
            rx_done: Arc::new(StopFlag::default()),
            gap_fill_done: Arc::new(StopFlag::default()),
            rx: None,
            heartbeat: None,
            processing: None,
            gap_fill: None,
        }
    }

    /// Stop every worker and hand back what they owned.
    fn join(
        mut self,
        reason: &str,
    ) -> (Option<Box<dyn EventHandler>>, Option<Box<dyn Retransmitter>>) {
        self.disconnect.raise(reason);
        self.stop.raise();

        for (name, handle) in [("feed-rx", self.rx.take()), ("feed-hb", self.heartbeat.take())] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!("{name} thread panicked");
                }
            }
        }
        // Also covers workers that never started or panicked.
        self.rx_done.raise();
        let retransmitter = self.gap_fill.take().and_then(|h| match h.join() {
            Ok(r) => Some(r),
            Err(_) => {
                error!("feed-gapfill thread panicked");
                None
            }
        });
        self.gap_fill_done.raise();
        let handler = self.processing.take().and_then(|h| match h.join() {
            Ok(handler) => Some(handler),
            Err(_) => {
                error!("feed-proc thread panicked");
                None
            }
        });
        (handler, retransmitter)
    }
}

/// Feed handler coordinator.
///
/// ```no_run
/// use feed_pipeline::{FeedConfig, FeedPipeline, NullHandler};
///
/// let mut pipeline = FeedPipeline::new(Box::new(NullHandler));
/// pipeline.initialize(FeedConfig::default())?;
/// pipeline.connect()?;
/// println!("{}", pipeline.stats());
/// pipeline.shutdown();
/// # Ok::<(), feed_pipeline::PipelineError>(())
/// ```
pub struct FeedPipeline {
    state: PipelineState,
    config: Option<FeedConfig>,
    handler: Option<Box<dyn EventHandler>>,
    retransmitter: Option<Box<dyn Retransmitter>>,
    metrics: Arc<FeedMetrics>,
    books: SharedBooks,
    subscriptions: Arc<Subscriptions>,
    session: Option<Session>,
    local_addr: Option<SocketAddr>,
}

impl FeedPipeline {
    pub fn new(handler: Box<dyn EventHandler>) -> Self {
        FeedPipeline {
            state: PipelineState::Uninitialized,
            config: None,
            handler: Some(handler),
            retransmitter: None,
            metrics: Arc::new(FeedMetrics::new()),
            books: BookBuilder::shared(crate::book_builder::DEFAULT_MAX_DEPTH),
            subscriptions: Arc::new(Subscriptions::all()),
            session: None,
            local_addr: None,
        }
    }

    /// Install a gap-fill source used when recovery is enabled.
    pub fn with_retransmitter(mut self, retransmitter: Box<dyn Retransmitter>) -> Self {
        self.retransmitter = Some(retransmitter);
        self
    }

    /// Validate and store the configuration. Performs no I/O.
    pub fn initialize(&mut self, config: FeedConfig) -> Result<(), PipelineError> {
        match self.state {
            PipelineState::Uninitialized
            | PipelineState::Initialized
            | PipelineState::Disconnected => {}
            state => {
                return Err(PipelineError::InvalidState {
                    operation: "initialize",
                    state,
                })
            }
        }
        config.validate()?;

        if config.features.subscribe_all {
            self.subscriptions.subscribe_all();
        } else {
            self.subscriptions.subscribe_none();
        }
        self.books = BookBuilder::shared(config.book.max_depth);
        self.config = Some(config);
        self.state = PipelineState::Initialized;
        info!("feed pipeline initialized");
        Ok(())
    }

    /// Open the transport and start the workers.
    pub fn connect(&mut self) -> Result<(), PipelineError> {
        let config = match (self.state, &self.config) {
            (PipelineState::Initialized | PipelineState::Disconnected, Some(config)) => {
                config.clone()
            }
            (state, _) => {
                return Err(PipelineError::InvalidState {
                    operation: "connect",
                    state,
                })
            }
        };
        let handler = self.handler.take().ok_or(PipelineError::HandlerLost)?;

        let transport = match Transport::open(&config.transport, &config.socket) {
            Ok(transport) => transport,
            Err(e) => {
                error!("failed to open transport {:?}: {e}", config.transport);
                self.handler = Some(handler);
                return Err(PipelineError::Transport(e));
            }
        };
        self.local_addr = transport.local_addr().ok();
        self.state = PipelineState::Connected;

        let retransmitter = if config.recovery.enabled {
            self.retransmitter.take().or_else(|| {
                config.recovery.endpoint.as_ref().map(|endpoint| {
                    Box::new(TcpRetransmitter::new(
                        endpoint.clone(),
                        0,
                        config.recovery.timeout(),
                    )) as Box<dyn Retransmitter>
                })
            })
        } else {
            None
        };
        if config.recovery.enabled && retransmitter.is_none() {
            warn!("recovery enabled without a retransmitter; gaps will only be counted");
        }

        match self.spawn_workers(&config, transport, handler, retransmitter) {
            Ok(session) => {
                self.session = Some(session);
                self.state = PipelineState::Ready;
                info!("feed pipeline ready on {:?}", self.local_addr);
                Ok(())
            }
            Err((e, session)) => {
                let (handler, retransmitter) = session.join("startup failed");
                self.handler = handler;
                if retransmitter.is_some() {
                    self.retransmitter = retransmitter;
                }
                self.local_addr = None;
                self.state = PipelineState::Disconnected;
                error!("failed to start workers: {e}");
                Err(e)
            }
        }
    }

    fn spawn_workers(
        &self,
        config: &FeedConfig,
        transport: Transport,
        handler: Box<dyn EventHandler>,
        retransmitter: Option<Box<dyn Retransmitter>>,
    ) -> Result<Session, (PipelineError, Session)> {
        let mut session = Session::new();

        let (packet_tx, packet_rx) = ring_buffer::channel::<PacketSlot, PACKET_RING_SIZE>();
        let (recovered_tx, recovered_rx) = ring_buffer::channel::<Vec<u8>, RECOVERY_RING_SIZE>();
        let (gap_tx, gap_rx) = ring_buffer::channel::<GapRequest, GAP_REQUEST_RING_SIZE>();
        let pool = PacketPool::new(RawPacket::default);
        let last_activity = Arc::new(AtomicU64::new(now_nanos()));

        let mut processor_config = config.clone();
        processor_config.recovery.enabled &= retransmitter.is_some();
        let processor = FeedProcessor::new(
            &processor_config,
            Arc::clone(&self.books),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.metrics),
        );

        let heartbeat_writer = transport.tcp_writer().unwrap_or_else(|e| {
            warn!("no heartbeat writer for tcp session: {e}");
            None
        });

        let proc_worker = ProcessingWorker {
            processor,
            handler,
            packets: packet_rx,
            recovered: recovered_rx,
            gap_requests: gap_tx,
            rx_done: Arc::clone(&session.rx_done),
            gap_fill_done: Arc::clone(&session.gap_fill_done),
            disconnect: Arc::clone(&session.disconnect),
            core: config.cpu.processing_core,
        };
        match spawn("feed-proc", move || proc_worker.run()) {
            Ok(handle) => session.processing = Some(handle),
            Err(e) => return Err((e, session)),
        }

        if let Some(retransmitter) = retransmitter {
            let worker = GapFillWorker {
                retransmitter,
                requests: gap_rx,
                recovered: recovered_tx,
                metrics: Arc::clone(&self.metrics),
                stop: Arc::clone(&session.stop),
                done: Arc::clone(&session.gap_fill_done),
                idle: config.socket.poll_interval(),
                core: config.cpu.aux_core,
            };
            match spawn("feed-gapfill", move || worker.run()) {
                Ok(handle) => session.gap_fill = Some(handle),
                Err(e) => return Err((e, session)),
            }
        } else {
            session.gap_fill_done.raise();
        }

        if config.heartbeat.interval_ms > 0 {
            let worker = HeartbeatWorker {
                interval: config.heartbeat.interval(),
                timeout: config.heartbeat.timeout(),
                tick: config.socket.poll_interval().min(config.heartbeat.interval()),
                writer: heartbeat_writer.filter(|_| config.heartbeat.send),
                last_activity: Arc::clone(&last_activity),
                stop: Arc::clone(&session.stop),
                disconnect: Arc::clone(&session.disconnect),
                core: config.cpu.aux_core,
            };
            match spawn("feed-hb", move || worker.run()) {
                Ok(handle) => session.heartbeat = Some(handle),
                Err(e) => return Err((e, session)),
            }
        }

        let rx_worker = ReceiveWorker {
            transport,
            pool,
            packets: packet_tx,
            metrics: Arc::clone(&self.metrics),
            last_activity,
            stop: Arc::clone(&session.stop),
            done: Arc::clone(&session.rx_done),
            disconnect: Arc::clone(&session.disconnect),
            core: config.cpu.receive_core,
        };
        match spawn("feed-rx", move || rx_worker.run()) {
            Ok(handle) => session.rx = Some(handle),
            Err(e) => return Err((e, session)),
        }

        Ok(session)
    }

    /// Stop the workers and release the transport. The handler receives
    /// `on_disconnect` once if it has not already been told.
    pub fn disconnect(&mut self) {
        if self.stop_session("local disconnect") {
            self.state = PipelineState::Disconnected;
            info!("feed pipeline disconnected");
        }
    }

    /// Stop everything. Terminal.
    pub fn shutdown(&mut self) {
        if self.state == PipelineState::Shutdown {
            return;
        }
        self.stop_session("shutdown");
        self.state = PipelineState::Shutdown;
        info!("feed pipeline shut down\n{}", self.metrics.snapshot());
    }

    fn stop_session(&mut self, reason: &str) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        let (handler, retransmitter) = session.join(reason);
        self.handler = handler;
        if retransmitter.is_some() {
            self.retransmitter = retransmitter;
        }
        self.local_addr = None;
        true
    }

    pub fn subscribe(&self, instrument_id: u32) {
        debug!("subscribe {instrument_id}");
        self.subscriptions.subscribe(instrument_id);
    }

    pub fn unsubscribe(&self, instrument_id: u32) {
        debug!("unsubscribe {instrument_id}");
        self.subscriptions.unsubscribe(instrument_id);
    }

    pub fn subscribe_all(&self) {
        self.subscriptions.subscribe_all();
    }

    pub fn is_subscribed(&self, instrument_id: u32) -> bool {
        self.subscriptions.is_subscribed(instrument_id)
    }

    /// Point-in-time copy of one instrument's book.
    pub fn order_book(&self, instrument_id: u32) -> Option<BookSnapshot> {
        self.books.read().snapshot(instrument_id)
    }

    pub fn books(&self) -> &SharedBooks {
        &self.books
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    /// Current state. A session whose connection was lost reports
    /// `Disconnected` even before `disconnect()` is called.
    pub fn state(&self) -> PipelineState {
        if self.state == PipelineState::Ready && self.is_disconnected() {
            return PipelineState::Disconnected;
        }
        self.state
    }

    /// Whether the current session has lost its connection.
    pub fn is_disconnected(&self) -> bool {
        match &self.session {
            Some(session) => session.disconnect.is_raised(),
            None => matches!(
                self.state,
                PipelineState::Disconnected | PipelineState::Shutdown
            ),
        }
    }

    /// Local address of the open transport.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> Option<&FeedConfig> {
        self.config.as_ref()
    }
}

impl Drop for FeedPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn<T, F>(name: &'static str, body: F) -> Result<JoinHandle<T>, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|source| PipelineError::Spawn { name, source })
}

struct ReceiveWorker {
    transport: Transport,
    pool: Arc<PacketPool>,
    packets: Producer<PacketSlot, PACKET_RING_SIZE>,
    metrics: Arc<FeedMetrics>,
    last_activity: Arc<AtomicU64>,
    stop: Arc<StopFlag>,
    done: Arc<StopFlag>,
    disconnect: Arc<DisconnectSignal>,
    core: Option<usize>,
}

impl ReceiveWorker {
    fn run(mut self) {
        pin_current_thread(self.core);
        let mut scratch = vec![0u8; MAX_PACKET_SIZE];

        while !self.stop.is_raised() {
            let result = match self.pool.acquire() {
                Some(mut slot) => match self.transport.recv_packet(&mut slot.data) {
                    Ok(Some(len)) => {
                        slot.len = len;
                        slot.recv_ts_ns = now_nanos();
                        self.on_packet(len);
                        if self.stop.is_raised() {
                            // Session already over: nothing more reaches the handler.
                            self.metrics.add_packets_dropped(1);
                        } else if let Err(slot) = self.packets.try_push(slot) {
                            self.metrics.add_packets_dropped(1);
                            debug!("processing ring full, dropped {} bytes", slot.len);
                        }
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                },
                // Pool exhausted: still drain the socket, drop the packet.
                None => match self.transport.recv_packet(&mut scratch) {
                    Ok(Some(len)) => {
                        self.on_packet(len);
                        self.metrics.add_packets_dropped(1);
                        debug!("packet pool exhausted, dropped {len} bytes");
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                },
            };

            if let Err(e) = result {
                if !self.stop.is_raised() {
                    error!("receive failed: {e}");
                    self.disconnect.raise(format!("receive failed: {e}"));
                    self.stop.raise();
                }
                break;
            }
        }

        self.transport.close();
        self.done.raise();
        debug!("feed-rx exiting");
    }

    #[inline]
    fn on_packet(&self, len: usize) {
        self.last_activity.store(now_nanos(), Ordering::Relaxed);
        self.metrics.add_packets_received(1);
        self.metrics.add_bytes_received(len as u64);
    }
}

struct ProcessingWorker {
    processor: FeedProcessor,
    handler: Box<dyn EventHandler>,
    packets: Consumer<PacketSlot, PACKET_RING_SIZE>,
    recovered: Consumer<Vec<u8>, RECOVERY_RING_SIZE>,
    gap_requests: Producer<GapRequest, GAP_REQUEST_RING_SIZE>,
    rx_done: Arc<StopFlag>,
    gap_fill_done: Arc<StopFlag>,
    disconnect: Arc<DisconnectSignal>,
    core: Option<usize>,
}

impl ProcessingWorker {
    const BATCH: usize = 64;

    fn run(mut self) -> Box<dyn EventHandler> {
        pin_current_thread(self.core);
        let mut backoff = Backoff::default();

        loop {
            let mut worked = self.drain(Self::BATCH);

            if let Some(request) = self.processor.poll_gap_fill(Instant::now()) {
                if self.gap_requests.try_push(request).is_err() {
                    debug!("gap request queue full, deferring [{}, {}]", request.start, request.end);
                }
                worked = true;
            }

            if self.rx_done.is_raised() && self.gap_fill_done.is_raised() {
                break;
            }

            if worked {
                backoff.reset();
            } else {
                backoff.idle();
            }
        }

        // Producers are finished; deliver the rest, then the disconnect last.
        while self.drain(usize::MAX) {}
        self.notify_disconnect();
        debug!("feed-proc exiting");
        self.handler
    }

    /// Process up to `limit` packets from each input ring.
    fn drain(&mut self, limit: usize) -> bool {
        let mut worked = false;
        for _ in 0..limit {
            let Some(packet) = self.packets.try_pop() else {
                break;
            };
            // Decode failures are counted and logged by the processor.
            let _ = self
                .processor
                .process_packet(packet.bytes(), packet.recv_ts_ns, &mut *self.handler);
            worked = true;
        }
        for _ in 0..limit {
            let Some(packet) = self.recovered.try_pop() else {
                break;
            };
            let _ = self
                .processor
                .process_packet(&packet, now_nanos(), &mut *self.handler);
            worked = true;
        }
        worked
    }

    fn notify_disconnect(&mut self) {
        if let Some(reason) = self.disconnect.take() {
            warn!("feed disconnected: {reason}");
            self.handler.on_disconnect(&reason);
        }
    }
}

struct HeartbeatWorker {
    interval: Duration,
    timeout: Duration,
    tick: Duration,
    writer: Option<TcpStream>,
    last_activity: Arc<AtomicU64>,
    stop: Arc<StopFlag>,
    disconnect: Arc<DisconnectSignal>,
    core: Option<usize>,
}

impl HeartbeatWorker {
    fn run(mut self) {
        pin_current_thread(self.core);
        let mut last_sent = Instant::now();

        while !self.stop.is_raised() {
            thread::sleep(self.tick);

            let now = now_nanos();
            let silent_ns = now.saturating_sub(self.last_activity.load(Ordering::Relaxed));
            if silent_ns > self.timeout.as_nanos() as u64 {
                warn!(
                    "no data for {} ms (timeout {} ms)",
                    silent_ns / 1_000_000,
                    self.timeout.as_millis()
                );
                self.disconnect.raise("heartbeat timeout");
                self.stop.raise();
                break;
            }

            if last_sent.elapsed() >= self.interval {
                if let Some(writer) = self.writer.as_mut() {
                    let mut builder = PacketBuilder::new(0, 0, now);
                    builder.push(&Message::Heartbeat(header(0, 0, now)));
                    if let Err(e) = send_packet(writer, &builder.finish()) {
                        error!("heartbeat send failed: {e}");
                        self.disconnect.raise(format!("heartbeat send failed: {e}"));
                        self.stop.raise();
                        break;
                    }
                }
                last_sent = Instant::now();
            }
        }
        debug!("feed-hb exiting");
    }
}

struct GapFillWorker {
    retransmitter: Box<dyn Retransmitter>,
    requests: Consumer<GapRequest, GAP_REQUEST_RING_SIZE>,
    recovered: Producer<Vec<u8>, RECOVERY_RING_SIZE>,
    metrics: Arc<FeedMetrics>,
    stop: Arc<StopFlag>,
    done: Arc<StopFlag>,
    idle: Duration,
    core: Option<usize>,
}

impl GapFillWorker {
    fn run(mut self) -> Box<dyn Retransmitter> {
        pin_current_thread(self.core);

        while !self.stop.is_raised() {
            let Some(GapRequest { start, end }) = self.requests.try_pop() else {
                thread::sleep(self.idle);
                continue;
            };

            match self.retransmitter.request_range(start, end) {
                Ok(packets) => {
                    self.metrics.add_retransmitted_packets(packets.len() as u64);
                    for packet in packets {
                        if self.recovered.try_push(packet).is_err() {
                            self.metrics.add_packets_dropped(1);
                            warn!("recovery ring full, dropped retransmitted packet");
                        }
                    }
                }
                Err(e) => warn!("gap fill [{start}, {end}] failed: {e}"),
            }
        }
        self.done.raise();
        debug!("feed-gapfill exiting");
        self.retransmitter
    }
}
