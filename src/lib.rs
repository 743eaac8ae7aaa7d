//! modular-midi
//!
//! Bridges Control-Change events from software producers (waveform generators,
//! a serial-attached microcontroller) to a single MIDI output device through
//! one bounded queue and one writer thread.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod midi;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod queue;
pub mod resolver;
pub mod serial;
pub mod signal;
pub mod waveform;

pub use catalog::{CatalogEntry, Selection};
pub use config::AppConfig;
pub use error::{EventError, PipelineError, ProtocolError, ResolveError, WaveformError};
pub use midi::ControlChangeEvent;
pub use pipeline::{PipelineSettings, PipelineState};
pub use queue::{message_queue, QueueReceiver, QueueSender, SendOutcome};
pub use resolver::resolve;
pub use waveform::Waveform;
