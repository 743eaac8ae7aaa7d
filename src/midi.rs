//! MIDI Control-Change events and their wire encoding
//!
//! The pipeline carries nothing but Control-Change messages. Every event is
//! validated on construction, so anything that reaches the queue is already
//! within MIDI range.

use std::fmt;

use crate::error::EventError;

/// Status nibble of a Control-Change message
pub const CONTROL_CHANGE_STATUS: u8 = 0xB0;

/// Highest valid channel (0-based)
pub const MAX_CHANNEL: u8 = 15;

/// Highest valid 7-bit data byte
pub const MAX_DATA: u8 = 127;

/// A single Control-Change event: channel (0-15), controller (0-127), value (0-127)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlChangeEvent {
    channel: u8,
    controller: u8,
    value: u8,
}

impl ControlChangeEvent {
    /// Build an event, rejecting any field outside its MIDI range
    pub fn new(channel: u8, controller: u8, value: u8) -> Result<Self, EventError> {
        if channel > MAX_CHANNEL {
            return Err(EventError::ChannelOutOfRange(channel));
        }
        if controller > MAX_DATA {
            return Err(EventError::ControllerOutOfRange(controller));
        }
        if value > MAX_DATA {
            return Err(EventError::ValueOutOfRange(value));
        }
        Ok(Self {
            channel,
            controller,
            value,
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn controller(&self) -> u8 {
        self.controller
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Encode to the 3-byte wire message: `0xB0 | channel, controller, value`
    pub fn encode(&self) -> [u8; 3] {
        [
            CONTROL_CHANGE_STATUS | self.channel,
            self.controller,
            self.value,
        ]
    }

    /// Decode a 3-byte Control-Change message
    ///
    /// Returns `None` for anything that is not a well-formed CC message
    /// (wrong status, wrong length, data byte with the high bit set).
    pub fn decode(data: &[u8]) -> Option<Self> {
        let &[status, controller, value] = data else {
            return None;
        };
        if status & 0xF0 != CONTROL_CHANGE_STATUS {
            return None;
        }
        Self::new(status & 0x0F, controller, value).ok()
    }
}

impl fmt::Display for ControlChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Channels are shown 1-based, the way musicians count them
        write!(
            f,
            "CC ch:{} cc:{} v:{}",
            self.channel + 1,
            self.controller,
            self.value
        )
    }
}

/// Build a batch of events from two parallel rows: controller numbers and values.
///
/// Rows must have the same length and the channel must be valid; individual
/// pairs outside 0-127 are skipped with a warning rather than failing the batch.
pub fn batch_from_rows(
    controllers: &[i32],
    values: &[i32],
    channel: u8,
) -> Result<Vec<ControlChangeEvent>, EventError> {
    if controllers.len() != values.len() {
        return Err(EventError::RowLengthMismatch {
            controllers: controllers.len(),
            values: values.len(),
        });
    }
    if channel > MAX_CHANNEL {
        return Err(EventError::ChannelOutOfRange(channel));
    }

    let mut batch = Vec::with_capacity(controllers.len());
    for (&cc, &value) in controllers.iter().zip(values) {
        let Ok(cc) = u8::try_from(cc) else {
            tracing::warn!("CC number {} is out of range (0-127), skipping", cc);
            continue;
        };
        let Ok(value) = u8::try_from(value) else {
            tracing::warn!("CC value {} is out of range (0-127), skipping", value);
            continue;
        };
        match ControlChangeEvent::new(channel, cc, value) {
            Ok(event) => batch.push(event),
            Err(e) => tracing::warn!("Skipping CC {}={}: {}", cc, value, e),
        }
    }
    Ok(batch)
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
