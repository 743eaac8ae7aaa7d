//! MIDI writer: the single consumer of the message queue
//!
//! The output handle is opened by the writer thread itself and never leaves
//! it. [`MidiWriter::spawn`] waits for the thread to report whether the open
//! succeeded, so a bad output fails the start before any producer runs.

use crossbeam::channel;
use midir::{MidiOutput, MidiOutputConnection};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::error::PipelineError;
use crate::midi::format_hex;
use crate::queue::QueueReceiver;

/// Default midir client name
pub const DEFAULT_CLIENT_NAME: &str = "modular-midi";

/// A single write to the device failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("MIDI send failed: {0}")]
pub struct SendFailure(pub String);

/// An open output device
pub trait MidiSink {
    /// Port name as reported by the OS
    fn name(&self) -> &str;

    fn send(&mut self, bytes: &[u8]) -> Result<(), SendFailure>;

    /// Release the device
    fn close(self);
}

/// Enumerates and opens output devices.
///
/// Moved into the writer thread, so the sink it opens is created, used and
/// closed on that thread only.
pub trait MidiBackend: Send + 'static {
    type Sink: MidiSink;

    /// Output port names in enumeration order
    fn output_port_names(&self) -> Result<Vec<String>, PipelineError>;

    fn open(self, index: usize) -> Result<Self::Sink, PipelineError>;
}

/// Port names with a placeholder for each port the OS could not name, so
/// positions stay aligned with the enumeration `open` indexes into.
pub fn indexed_port_names(names: impl IntoIterator<Item = Option<String>>) -> Vec<String> {
    names
        .into_iter()
        .enumerate()
        .map(|(index, name)| name.unwrap_or_else(|| unnamed_port(index)))
        .collect()
}

fn unnamed_port(index: usize) -> String {
    format!("output {}", index)
}

/// System MIDI outputs through midir
#[derive(Debug, Clone)]
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn client(&self) -> Result<MidiOutput, PipelineError> {
        MidiOutput::new(&self.client_name).map_err(|e| PipelineError::Enumeration(e.to_string()))
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_NAME)
    }
}

impl MidiBackend for MidirBackend {
    type Sink = MidirSink;

    fn output_port_names(&self) -> Result<Vec<String>, PipelineError> {
        let midi_out = self.client()?;

        let ports = midi_out.ports();
        let names = ports.iter().map(|port| match midi_out.port_name(port) {
            Ok(name) => Some(name),
            Err(e) => {
                debug!("Output port without a name: {}", e);
                None
            }
        });

        Ok(indexed_port_names(names))
    }

    fn open(self, index: usize) -> Result<MidirSink, PipelineError> {
        let midi_out = self.client()?;
        let ports = midi_out.ports();
        let port = ports.get(index).ok_or_else(|| PipelineError::OutputOpen {
            index,
            reason: format!("only {} output ports present", ports.len()),
        })?;
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| unnamed_port(index));

        let conn = midi_out
            .connect(port, &format!("{}-out", self.client_name))
            .map_err(|e| PipelineError::OutputOpen {
                index,
                reason: e.to_string(),
            })?;

        info!("MIDI output connected: {}", name);
        Ok(MidirSink { conn, name })
    }
}

/// Open midir output connection
pub struct MidirSink {
    conn: MidiOutputConnection,
    name: String,
}

impl MidiSink for MidirSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), SendFailure> {
        self.conn.send(bytes).map_err(|e| SendFailure(e.to_string()))
    }

    fn close(self) {
        self.conn.close();
    }
}

/// Totals of a finished writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub written: u64,
    pub failed: u64,
}

/// Handle to the running writer thread
pub struct MidiWriter {
    thread: JoinHandle<WriterReport>,
    port_name: String,
}

impl MidiWriter {
    /// Open output `index` on a dedicated thread and start draining `queue`.
    ///
    /// Returns once the device is open, or with the open error.
    pub fn spawn<B: MidiBackend>(
        backend: B,
        index: usize,
        queue: QueueReceiver,
    ) -> Result<Self, PipelineError> {
        let (ready_tx, ready_rx) = channel::bounded::<Result<String, PipelineError>>(1);

        let thread = thread::Builder::new()
            .name("midi-writer".to_string())
            .spawn(move || {
                let sink = match backend.open(index) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return WriterReport::default();
                    }
                };
                let _ = ready_tx.send(Ok(sink.name().to_string()));
                drop(ready_tx);
                write_loop(sink, queue)
            })
            .map_err(|source| PipelineError::Spawn {
                name: "midi-writer",
                source,
            })?;

        match ready_rx.recv() {
            Ok(Ok(port_name)) => Ok(Self { thread, port_name }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PipelineError::OutputOpen {
                    index,
                    reason: "writer thread exited during open".to_string(),
                })
            }
        }
    }

    /// Name of the bound output port
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Wait for the writer to drain the queue and close the device.
    ///
    /// Only returns once every queue sender has been dropped.
    pub fn join(self) -> WriterReport {
        self.thread.join().unwrap_or_else(|_| {
            warn!("MIDI writer thread panicked");
            WriterReport::default()
        })
    }
}

fn write_loop<S: MidiSink>(mut sink: S, queue: QueueReceiver) -> WriterReport {
    let mut report = WriterReport::default();

    while let Some(event) = queue.recv() {
        let bytes = event.encode();
        trace!("MIDI TX -> {}", format_hex(&bytes));
        match sink.send(&bytes) {
            Ok(()) => {
                report.written += 1;
                debug!("MIDI out: {}", event);
            }
            Err(e) => {
                report.failed += 1;
                warn!("{} ({})", e, event);
            }
        }
    }

    info!(
        "MIDI writer finished on {} (written: {}, failed: {}, dropped upstream: {})",
        sink.name(),
        report.written,
        report.failed,
        queue.stats().dropped()
    );
    sink.close();
    report
}
