//! Typed errors for the message pipeline
//!
//! Application edges (config, catalog files, `main`) use `anyhow`; the
//! pipeline itself returns these so callers can match on the failure mode.

use thiserror::Error;

/// A Control-Change triple that does not fit MIDI ranges
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("MIDI channel must be 0-15, got {0}")]
    ChannelOutOfRange(u8),

    #[error("CC number must be 0-127, got {0}")]
    ControllerOutOfRange(u8),

    #[error("CC value must be 0-127, got {0}")]
    ValueOutOfRange(u8),

    #[error("CC numbers and values rows must have the same length ({controllers} vs {values})")]
    RowLengthMismatch { controllers: usize, values: usize },
}

/// Failure to bind a persisted selection to a live catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no devices available")]
    NoDevicesAvailable,

    #[error("selected device not found: '{0}'")]
    SelectionNotFound(String),
}

/// A serial frame that cannot be decoded into CC pairs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame too short ({0} bytes, need at least 2)")]
    TooShort(usize),

    #[error("frame has odd length ({0} bytes)")]
    OddLength(usize),

    #[error("frame exceeds {0} bytes without a line terminator")]
    TooLong(usize),

    #[error("invalid CC pair at offset {offset}: {source}")]
    InvalidPair {
        offset: usize,
        #[source]
        source: EventError,
    },
}

/// Generator parameters rejected before any event is sent
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WaveformError {
    #[error("center value {0} out of range (0-127)")]
    CenterOutOfRange(i32),

    #[error("CC number {0} out of range (0-126)")]
    ControllerOutOfRange(i32),

    #[error("MIDI channel {0} out of range (0-15)")]
    ChannelOutOfRange(u8),

    #[error("message queue closed after {sent} events")]
    QueueClosed { sent: usize },
}

/// Fatal pipeline start failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no MIDI output ports available")]
    NoOutputDevices,

    #[error("selected MIDI output not found: '{0}'")]
    OutputNotFound(String),

    #[error("failed to open MIDI output {index}: {reason}")]
    OutputOpen { index: usize, reason: String },

    #[error("failed to enumerate MIDI outputs: {0}")]
    Enumeration(String),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl From<ResolveError> for PipelineError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoDevicesAvailable => PipelineError::NoOutputDevices,
            ResolveError::SelectionNotFound(key) => PipelineError::OutputNotFound(key),
        }
    }
}
