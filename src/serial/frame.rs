//! Serial frame decoding
//!
//! A frame is one newline-terminated line from the controller. After trailing
//! CR/LF bytes are stripped it must hold an even number (at least two) of
//! bytes, read as consecutive `(controller, value)` pairs.

use crate::error::ProtocolError;
use crate::midi::ControlChangeEvent;

/// Frame terminator
pub const FRAME_END: u8 = b'\n';

/// Longest accepted frame, terminator included. Every controller once plus CR/LF fits.
pub const MAX_FRAME_LEN: usize = 2 * 128 + 2;

/// Strip every trailing CR and LF byte
pub fn strip_line_ending(frame: &[u8]) -> &[u8] {
    let end = frame
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |i| i + 1);
    &frame[..end]
}

/// Decode a stripped frame into events on `channel`, in byte-pair order.
///
/// The whole frame is rejected if any pair is out of MIDI range; no event of
/// a bad frame is ever produced.
pub fn decode_frame(frame: &[u8], channel: u8) -> Result<Vec<ControlChangeEvent>, ProtocolError> {
    if frame.len() < 2 {
        return Err(ProtocolError::TooShort(frame.len()));
    }
    if frame.len() % 2 != 0 {
        return Err(ProtocolError::OddLength(frame.len()));
    }

    frame
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            ControlChangeEvent::new(channel, pair[0], pair[1])
                .map_err(|source| ProtocolError::InvalidPair { offset: i * 2, source })
        })
        .collect()
}
