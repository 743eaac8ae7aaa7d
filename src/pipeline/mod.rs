//! Pipeline assembly
//!
//! [`PipelineState`] wires the pieces together: it resolves the selected MIDI
//! output, starts the writer on it, and optionally attaches the serial
//! ingestor. Producers obtain queue handles from it; [`PipelineState::shutdown`]
//! tears everything down in dependency order.

use std::sync::Arc;
use tracing::info;

use crate::catalog::{catalog_from_paths, Selection};
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::output::{MidiBackend, MidiWriter, WriterReport};
use crate::queue::{message_queue, QueueSender, DEFAULT_QUEUE_CAPACITY};
use crate::resolver::resolve;
use crate::serial::{
    IngestorHandle, IngestorState, IngestorStats, SelectionSource, SerialConnector, SerialIngestor,
    SerialSettings, StateCallback,
};
use crate::signal::{StopGuard, StopSignal};

/// Runtime settings for one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub serial: SerialSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            serial: SerialSettings::default(),
        }
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            queue_capacity: config.queue.capacity,
            serial: config.serial.settings(),
        }
    }
}

/// Totals reported by [`PipelineState::shutdown`]
#[derive(Debug)]
pub struct PipelineReport {
    pub writer: WriterReport,
    pub serial: Option<Arc<IngestorStats>>,
}

/// The running pipeline. Dropping it without calling `shutdown` still stops
/// the serial ingestor; the writer ends once every producer handle is gone.
pub struct PipelineState {
    settings: PipelineSettings,
    producer: QueueSender,
    writer: MidiWriter,
    ingestor: Option<IngestorHandle>,
    stop: StopSignal,
    _stop_on_drop: StopGuard,
}

impl PipelineState {
    /// Resolve `output` against the backend's live ports and start the writer.
    ///
    /// Every fatal condition (no ports, unknown selection, open failure) is
    /// reported here, before any producer exists.
    pub fn start<B: MidiBackend>(
        settings: PipelineSettings,
        backend: B,
        output: &Selection,
    ) -> Result<Self, PipelineError> {
        let names = backend.output_port_names()?;
        let index = resolve(&catalog_from_paths(&names), output)?;
        info!("MIDI output '{}' resolved to port {}", names[index], index);

        let (producer, receiver) = message_queue(settings.queue_capacity);
        let writer = MidiWriter::spawn(backend, index, receiver)?;

        let stop = StopSignal::new();
        Ok(Self {
            settings,
            producer,
            writer,
            ingestor: None,
            _stop_on_drop: stop.guard(),
            stop,
        })
    }

    /// Start the serial ingestor feeding this pipeline.
    ///
    /// `selection` is consulted on every connect attempt. At most one ingestor
    /// may be attached; a second call replaces nothing and returns the state of
    /// the running one.
    pub fn attach_serial<C: SerialConnector>(
        &mut self,
        connector: C,
        selection: SelectionSource,
        on_state_change: Option<StateCallback>,
    ) -> Result<IngestorState, PipelineError> {
        if let Some(handle) = &self.ingestor {
            return Ok(handle.state());
        }

        let mut ingestor = SerialIngestor::new(
            connector,
            self.settings.serial.clone(),
            selection,
            self.producer.clone(),
            self.stop.clone(),
        );
        if let Some(callback) = on_state_change {
            ingestor.on_state_change(callback);
        }
        let handle = ingestor.spawn()?;
        let state = handle.state();
        self.ingestor = Some(handle);
        Ok(state)
    }

    /// A new producer handle for blocking or non-blocking sends
    pub fn producer(&self) -> QueueSender {
        self.producer.clone()
    }

    pub fn output_name(&self) -> &str {
        self.writer.port_name()
    }

    pub fn serial_state(&self) -> Option<IngestorState> {
        self.ingestor.as_ref().map(IngestorHandle::state)
    }

    pub fn serial_stats(&self) -> Option<&IngestorStats> {
        self.ingestor.as_ref().map(IngestorHandle::stats)
    }

    /// Stop the ingestor, close the queue and wait for the writer to drain it.
    ///
    /// Producer handles obtained from [`producer`](Self::producer) must be
    /// dropped first, or this waits for them.
    pub fn shutdown(self) -> PipelineReport {
        let PipelineState {
            producer,
            writer,
            ingestor,
            stop,
            _stop_on_drop,
            ..
        } = self;

        info!("Shutting down pipeline");
        stop.raise();
        let serial = ingestor.map(IngestorHandle::join);
        drop(producer);
        let writer = writer.join();

        PipelineReport { writer, serial }
    }
}
