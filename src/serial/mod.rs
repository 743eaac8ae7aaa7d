//! Serial ingestor: the external controller's producer
//!
//! Owns the serial connection and drives it through
//! `Disconnected -> Connecting -> Connected -> (error) Disconnected`, ending in
//! `Stopped` only when the stop signal is raised. Failed connects are retried
//! after a fixed backoff, forever. Parsed events are offered to the queue
//! without blocking; a full queue drops the event.
//!
//! The selection is re-read and re-resolved on every connection attempt, so
//! a controller that comes back under a different enumeration index is
//! picked up again.

pub mod frame;
pub mod port;

use parking_lot::RwLock;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::catalog::{catalog_from_paths, Selection};
use crate::error::{PipelineError, ProtocolError, ResolveError};
use crate::midi::format_hex;
use crate::queue::{QueueSender, SendOutcome};
use crate::resolver::resolve;
use crate::signal::StopSignal;

pub use frame::{decode_frame, strip_line_ending};
pub use port::{SerialConnector, SerialSettings, SystemSerial};

const READ_CHUNK: usize = 64;

/// Connection state of the ingestor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestorState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

/// Callback invoked on every state transition
pub type StateCallback = Arc<dyn Fn(IngestorState) + Send + Sync>;

/// Supplies the current serial selection; called before every connect attempt
pub type SelectionSource = Box<dyn FnMut() -> Selection + Send>;

/// Why a connection attempt failed
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] io::Error),

    #[error("no serial device selected")]
    NoSelection,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Ingestion counters, readable while the ingestor runs
#[derive(Debug, Default)]
pub struct IngestorStats {
    connect_attempts: AtomicU64,
    frames: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    protocol_errors: AtomicU64,
}

impl IngestorStats {
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Well-formed frames decoded
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors.load(Ordering::Relaxed)
    }
}

/// How a connected session ended
enum SessionEnd {
    Stopped,
    QueueClosed,
    Failed(io::Error),
}

/// Serial ingestor state machine. Consumed by [`SerialIngestor::spawn`] or [`SerialIngestor::run`].
pub struct SerialIngestor<C: SerialConnector> {
    connector: C,
    settings: SerialSettings,
    selection: SelectionSource,
    queue: QueueSender,
    stop: StopSignal,
    state: Arc<RwLock<IngestorState>>,
    stats: Arc<IngestorStats>,
    callbacks: Vec<StateCallback>,
}

/// Handle to a running ingestor thread
pub struct IngestorHandle {
    thread: JoinHandle<()>,
    state: Arc<RwLock<IngestorState>>,
    stats: Arc<IngestorStats>,
}

impl IngestorHandle {
    pub fn state(&self) -> IngestorState {
        *self.state.read()
    }

    pub fn stats(&self) -> &IngestorStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread to end. Only returns once the stop signal is raised
    /// or the queue has closed.
    pub fn join(self) -> Arc<IngestorStats> {
        if self.thread.join().is_err() {
            warn!("Serial ingestor thread panicked");
        }
        self.stats
    }
}

impl<C: SerialConnector> SerialIngestor<C> {
    pub fn new(
        connector: C,
        settings: SerialSettings,
        selection: SelectionSource,
        queue: QueueSender,
        stop: StopSignal,
    ) -> Self {
        Self {
            connector,
            settings,
            selection,
            queue,
            stop,
            state: Arc::new(RwLock::new(IngestorState::Disconnected)),
            stats: Arc::new(IngestorStats::default()),
            callbacks: Vec::new(),
        }
    }

    /// Register a callback for state transitions
    pub fn on_state_change(&mut self, callback: StateCallback) {
        self.callbacks.push(callback);
    }

    /// Run the state machine on a dedicated thread
    pub fn spawn(self) -> Result<IngestorHandle, PipelineError> {
        let state = self.state.clone();
        let stats = self.stats.clone();
        let thread = thread::Builder::new()
            .name("serial-ingestor".to_string())
            .spawn(move || self.run())
            .map_err(|source| PipelineError::Spawn {
                name: "serial-ingestor",
                source,
            })?;
        Ok(IngestorHandle {
            thread,
            state,
            stats,
        })
    }

    /// Run the state machine on the current thread until stopped
    pub fn run(mut self) {
        info!(
            "Serial ingestor started ({} baud, channel {}, backoff {:?})",
            self.settings.baud_rate,
            self.settings.channel + 1,
            self.settings.backoff
        );

        while !self.stop.is_raised() {
            self.set_state(IngestorState::Connecting);
            self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);

            let stream = match self.connect() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Serial connect failed: {}", e);
                    self.set_state(IngestorState::Disconnected);
                    debug!("Retrying serial connect in {:?}", self.settings.backoff);
                    if self.stop.wait_timeout(self.settings.backoff) {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(IngestorState::Connected);
            match self.read_frames(stream) {
                SessionEnd::Stopped => break,
                SessionEnd::QueueClosed => {
                    info!("Message queue closed, serial ingestor exiting");
                    break;
                }
                SessionEnd::Failed(e) => {
                    warn!("Serial read failed, reconnecting: {}", e);
                    self.set_state(IngestorState::Disconnected);
                }
            }
        }

        self.set_state(IngestorState::Stopped);
        info!(
            "Serial ingestor stopped (frames: {}, delivered: {}, dropped: {}, protocol errors: {})",
            self.stats.frames(),
            self.stats.delivered(),
            self.stats.dropped(),
            self.stats.protocol_errors()
        );
    }

    fn set_state(&self, state: IngestorState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!("Serial ingestor {:?} -> {:?}", previous, state);
        }
        for callback in &self.callbacks {
            callback(state);
        }
    }

    /// Resolve the current selection against live ports and open the match
    fn connect(&mut self) -> Result<Box<dyn Read>, ConnectError> {
        let selection = (self.selection)();
        if selection.is_empty() {
            return Err(ConnectError::NoSelection);
        }

        let ports = self
            .connector
            .available_ports()
            .map_err(ConnectError::Enumerate)?;
        let index = resolve(&catalog_from_paths(&ports), &selection)?;
        let path = &ports[index];

        let stream = self
            .connector
            .open(path, &self.settings)
            .map_err(|source| ConnectError::Open {
                path: path.clone(),
                source,
            })?;
        info!("Serial port connected: {}", path);
        Ok(stream)
    }

    /// Read frames until the link fails, the queue closes, or a stop is requested
    fn read_frames(&self, mut stream: Box<dyn Read>) -> SessionEnd {
        let mut chunk = [0u8; READ_CHUNK];
        // Bytes of a partially received frame survive read timeouts
        let mut frame = Vec::with_capacity(frame::MAX_FRAME_LEN);
        // Set after an overlong frame until its terminator goes by
        let mut discarding = false;

        loop {
            if self.stop.is_raised() {
                return SessionEnd::Stopped;
            }

            let n = match stream.read(&mut chunk) {
                Ok(0) => {
                    return SessionEnd::Failed(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "serial stream closed",
                    ))
                }
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return SessionEnd::Failed(e),
            };

            for &byte in &chunk[..n] {
                if discarding {
                    discarding = byte != frame::FRAME_END;
                    continue;
                }

                frame.push(byte);
                if byte == frame::FRAME_END {
                    let delivered = self.handle_frame(&frame);
                    frame.clear();
                    if !delivered {
                        return SessionEnd::QueueClosed;
                    }
                } else if frame.len() >= frame::MAX_FRAME_LEN {
                    self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Skipping malformed serial frame: {}",
                        ProtocolError::TooLong(frame::MAX_FRAME_LEN)
                    );
                    frame.clear();
                    discarding = true;
                }
            }
        }
    }

    /// Decode one raw frame and offer its events. Returns `false` once the queue is closed.
    fn handle_frame(&self, raw: &[u8]) -> bool {
        let payload = strip_line_ending(raw);
        trace!("Serial RX <- {}", format_hex(payload));

        let events = match decode_frame(payload, self.settings.channel) {
            Ok(events) => events,
            Err(e) => {
                self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping malformed serial frame: {}", e);
                return true;
            }
        };
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        for event in events {
            match self.queue.try_send(event) {
                SendOutcome::Delivered => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!("Serial -> queue: {}", event);
                }
                SendOutcome::Dropped => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("Message queue full, dropping {}", event);
                }
                SendOutcome::Closed => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::message_queue;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    /// One scripted read result
    enum Chunk {
        Data(Vec<u8>),
        Timeout,
        Fail,
        /// Fills every read with non-terminator bytes, forever
        Endless,
    }

    /// Replays chunks, then times out until the test ends
    struct ScriptedStream {
        chunks: VecDeque<Chunk>,
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Chunk::Data(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.chunks.push_front(Chunk::Data(data[n..].to_vec()));
                    }
                    Ok(n)
                }
                Some(Chunk::Fail) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
                Some(Chunk::Endless) => {
                    buf.fill(0x01);
                    self.chunks.push_front(Chunk::Endless);
                    Ok(buf.len())
                }
                Some(Chunk::Timeout) | None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Err(io::Error::new(io::ErrorKind::TimedOut, "timeout"))
                }
            }
        }
    }

    /// Fails the first `failures` opens, then hands out scripted sessions
    struct ScriptedConnector {
        ports: Vec<String>,
        failures: usize,
        sessions: VecDeque<Vec<Chunk>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedConnector {
        fn new(failures: usize, sessions: Vec<Vec<Chunk>>) -> Self {
            Self {
                ports: vec!["/dev/ttyS0".to_string(), "/dev/ttyACM0".to_string()],
                failures,
                sessions: sessions.into(),
                attempts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl SerialConnector for ScriptedConnector {
        fn available_ports(&mut self) -> io::Result<Vec<String>> {
            Ok(self.ports.clone())
        }

        fn open(&mut self, path: &str, _settings: &SerialSettings) -> io::Result<Box<dyn Read>> {
            assert_eq!(path, "/dev/ttyACM0");
            self.attempts.lock().push(Instant::now());
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
            }
            let chunks = self.sessions.pop_front().unwrap_or_default();
            Ok(Box::new(ScriptedStream {
                chunks: chunks.into(),
            }))
        }
    }

    fn settings(backoff_ms: u64) -> SerialSettings {
        SerialSettings {
            backoff: Duration::from_millis(backoff_ms),
            read_timeout: Duration::from_millis(5),
            ..SerialSettings::default()
        }
    }

    fn selection(key: &'static str) -> SelectionSource {
        Box::new(move || Selection::new(key))
    }

    fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_reconnects_after_two_failures() {
        let connector = ScriptedConnector::new(2, vec![vec![]]);
        let attempts = connector.attempts.clone();
        let (tx, _rx) = message_queue(16);
        let stop = StopSignal::new();

        let ingestor = SerialIngestor::new(connector, settings(100), selection("yACM0"), tx, stop.clone());
        let handle = ingestor.spawn().unwrap();

        wait_for("connected", || handle.state() == IngestorState::Connected);
        assert_eq!(handle.stats().connect_attempts(), 3);

        let times = attempts.lock().clone();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }

        stop.raise();
        let stats = handle.join();
        assert_eq!(stats.connect_attempts(), 3);
    }

    #[test]
    fn test_default_backoff_spacing() {
        let connector = ScriptedConnector::new(2, vec![vec![]]);
        let attempts = connector.attempts.clone();
        let (tx, _rx) = message_queue(16);
        let stop = StopSignal::new();

        let settings = SerialSettings {
            read_timeout: Duration::from_millis(5),
            ..SerialSettings::default()
        };
        let handle = SerialIngestor::new(connector, settings, selection("yACM0"), tx, stop.clone())
            .spawn()
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(20);
        while handle.state() != IngestorState::Connected {
            assert!(Instant::now() < deadline, "never connected");
            std::thread::sleep(Duration::from_millis(20));
        }

        let times = attempts.lock().clone();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }

        stop.raise();
        assert_eq!(handle.join().connect_attempts(), 3);
    }

    #[test]
    fn test_frames_become_events_in_order() {
        let session = vec![
            Chunk::Data(vec![1, 64, 7]),
            Chunk::Timeout,
            Chunk::Data(vec![100, b'\r', b'\n']),
            Chunk::Data(vec![5, b'\n']),
            Chunk::Data(vec![74, 0, b'\n']),
        ];
        let connector = ScriptedConnector::new(0, vec![session]);
        let (tx, rx) = message_queue(16);
        let stop = StopSignal::new();

        let mut ingestor = SerialIngestor::new(connector, settings(50), selection("yACM0"), tx, stop.clone());
        ingestor.settings.channel = 3;
        let handle = ingestor.spawn().unwrap();

        wait_for("frames", || handle.stats().frames() == 2 && handle.stats().protocol_errors() == 1);
        stop.raise();
        let stats = handle.join();

        let received: Vec<(u8, u8, u8)> = std::iter::from_fn(|| rx.recv_timeout(Duration::from_millis(10)).ok())
            .map(|e| (e.channel(), e.controller(), e.value()))
            .collect();
        // The single-byte frame was skipped without touching the queue
        assert_eq!(received, vec![(3, 1, 64), (3, 7, 100), (3, 74, 0)]);
        assert_eq!(stats.delivered(), 3);
        assert_eq!(stats.protocol_errors(), 1);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let session = vec![Chunk::Data(vec![1, 1, 1, 2, 1, 3, b'\n'])];
        let connector = ScriptedConnector::new(0, vec![session]);
        let (tx, rx) = message_queue(2);
        let stop = StopSignal::new();

        let handle = SerialIngestor::new(connector, settings(50), selection("yACM0"), tx, stop.clone())
            .spawn()
            .unwrap();

        wait_for("frame", || handle.stats().frames() == 1);
        stop.raise();
        let stats = handle.join();

        assert_eq!(stats.delivered(), 2);
        assert_eq!(stats.dropped(), 1);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_read_failure_reconnects() {
        let first = vec![Chunk::Data(vec![1, 10, b'\n']), Chunk::Fail];
        let second = vec![Chunk::Data(vec![1, 20, b'\n'])];
        let connector = ScriptedConnector::new(0, vec![first, second]);
        let (tx, rx) = message_queue(16);
        let stop = StopSignal::new();

        let states = Arc::new(Mutex::new(Vec::new()));
        let recorded = states.clone();
        let mut ingestor = SerialIngestor::new(connector, settings(50), selection("yACM0"), tx, stop.clone());
        ingestor.on_state_change(Arc::new(move |s| recorded.lock().push(s)));
        let handle = ingestor.spawn().unwrap();

        wait_for("second session", || handle.stats().delivered() == 2);
        stop.raise();
        handle.join();

        assert_eq!(rx.recv().map(|e| e.value()), Some(10));
        assert_eq!(rx.recv().map(|e| e.value()), Some(20));
        assert_eq!(
            *states.lock(),
            vec![
                IngestorState::Connecting,
                IngestorState::Connected,
                IngestorState::Disconnected,
                IngestorState::Connecting,
                IngestorState::Connected,
                IngestorState::Stopped,
            ]
        );
    }

    #[test]
    fn test_stop_interrupts_backoff() {
        let connector = ScriptedConnector::new(usize::MAX, vec![]);
        let (tx, _rx) = message_queue(4);
        let stop = StopSignal::new();

        let handle = SerialIngestor::new(connector, settings(60_000), selection("yACM0"), tx, stop.clone())
            .spawn()
            .unwrap();

        wait_for("first attempt", || {
            handle.stats().connect_attempts() == 1 && handle.state() == IngestorState::Disconnected
        });
        let start = Instant::now();
        stop.raise();
        let stats = handle.join();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.connect_attempts(), 1);
    }

    #[test]
    fn test_stop_ends_stream_without_newline() {
        let connector = ScriptedConnector::new(0, vec![vec![Chunk::Endless]]);
        let (tx, rx) = message_queue(4);
        let stop = StopSignal::new();

        let handle = SerialIngestor::new(connector, settings(50), selection("yACM0"), tx, stop.clone())
            .spawn()
            .unwrap();

        wait_for("overlong frame", || handle.stats().protocol_errors() >= 1);
        stop.raise();
        let start = Instant::now();
        wait_for("exit", || handle.is_finished());
        assert!(start.elapsed() < Duration::from_secs(3));

        let stats = handle.join();
        assert_eq!(stats.frames(), 0);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_overlong_frame_is_skipped_up_to_newline() {
        let mut overlong = vec![0x01; frame::MAX_FRAME_LEN + 40];
        overlong.push(b'\n');
        let session = vec![Chunk::Data(overlong), Chunk::Data(vec![1, 64, b'\n'])];
        let connector = ScriptedConnector::new(0, vec![session]);
        let (tx, rx) = message_queue(16);
        let stop = StopSignal::new();

        let handle = SerialIngestor::new(connector, settings(50), selection("yACM0"), tx, stop.clone())
            .spawn()
            .unwrap();

        wait_for("valid frame", || handle.stats().frames() == 1);
        stop.raise();
        let stats = handle.join();

        assert_eq!(stats.protocol_errors(), 1);
        assert_eq!(stats.delivered(), 1);
        let event = rx.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!((event.controller(), event.value()), (1, 64));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_unknown_selection_keeps_retrying() {
        let connector = ScriptedConnector::new(0, vec![]);
        let attempts = connector.attempts.clone();
        let (tx, _rx) = message_queue(4);
        let stop = StopSignal::new();

        let handle = SerialIngestor::new(connector, settings(10), selection("USB99"), tx, stop.clone())
            .spawn()
            .unwrap();

        wait_for("retries", || handle.stats().connect_attempts() >= 3);
        stop.raise();
        handle.join();

        // Never resolved, so the port was never opened
        assert!(attempts.lock().is_empty());
    }

    #[test]
    fn test_stops_when_queue_closes() {
        let session = vec![Chunk::Data(vec![1, 1, b'\n'])];
        let connector = ScriptedConnector::new(0, vec![session]);
        let (tx, rx) = message_queue(4);
        drop(rx);

        let handle = SerialIngestor::new(connector, settings(10), selection("yACM0"), tx, StopSignal::new())
            .spawn()
            .unwrap();

        wait_for("exit", || handle.is_finished());
        assert_eq!(handle.state(), IngestorState::Stopped);
    }
}
