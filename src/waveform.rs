//! Synthetic waveform generators
//!
//! Producers that sweep one controller through a shape. Used to exercise the
//! pipeline end to end without a serial controller attached. Unlike the serial
//! ingestor they use blocking delivery: a full queue slows the generator down
//! instead of losing samples.

use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::WaveformError;
use crate::midi::{ControlChangeEvent, MAX_CHANNEL, MAX_DATA};
use crate::queue::QueueSender;

/// Pause between samples of a stepped sweep
pub const STEPPED_TICK: Duration = Duration::from_millis(50);

/// Sampling interval of a smooth sweep
pub const SMOOTH_TICK: Duration = Duration::from_millis(20);

/// Highest controller a generator may drive
pub const MAX_GENERATOR_CONTROLLER: i32 = 126;

/// A generator run, fully parameterized
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// `steps` samples of one full sine period
    Stepped {
        controller: i32,
        center: i32,
        amplitude: i32,
        steps: usize,
        channel: u8,
    },
    /// Continuous sine sampled against wall-clock time
    Smooth {
        controller: i32,
        center: i32,
        amplitude: i32,
        duration: Duration,
        frequency_hz: f64,
        channel: u8,
    },
    /// Deterministic pseudo-random wobble
    Randomized {
        controller: i32,
        center: i32,
        max_deviation: i32,
        count: usize,
        delay: Duration,
        channel: u8,
    },
}

/// Round and clamp a computed sample into MIDI data range
pub fn cc_value(raw: f64) -> u8 {
    // Rounded, not truncated: truncation turns 64 + 30*sin(2*pi) into 63
    raw.round().clamp(0.0, f64::from(MAX_DATA)) as u8
}

/// Sample `i` of a stepped sweep over `steps` samples
pub fn stepped_value(center: i32, amplitude: i32, i: usize, steps: usize) -> u8 {
    if steps <= 1 {
        return cc_value(f64::from(center));
    }
    let angle = TAU * i as f64 / (steps - 1) as f64;
    cc_value(f64::from(center) + f64::from(amplitude) * angle.sin())
}

/// Value of a smooth sweep `elapsed` after it started
pub fn smooth_value(center: i32, amplitude: i32, frequency_hz: f64, elapsed: Duration) -> u8 {
    let angle = TAU * frequency_hz * elapsed.as_secs_f64();
    cc_value(f64::from(center) + f64::from(amplitude) * angle.sin())
}

/// Sample `i` of a randomized sweep
pub fn randomized_value(center: i32, max_deviation: i32, i: usize) -> u8 {
    let i = i as f64;
    let a = f64::from(max_deviation);
    cc_value(f64::from(center) + a * (0.3 * i).sin() + 0.5 * a * (0.7 * i).cos())
}

impl Waveform {
    pub fn controller(&self) -> i32 {
        match self {
            Waveform::Stepped { controller, .. }
            | Waveform::Smooth { controller, .. }
            | Waveform::Randomized { controller, .. } => *controller,
        }
    }

    pub fn center(&self) -> i32 {
        match self {
            Waveform::Stepped { center, .. }
            | Waveform::Smooth { center, .. }
            | Waveform::Randomized { center, .. } => *center,
        }
    }

    pub fn channel(&self) -> u8 {
        match self {
            Waveform::Stepped { channel, .. }
            | Waveform::Smooth { channel, .. }
            | Waveform::Randomized { channel, .. } => *channel,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Waveform::Stepped { .. } => "stepped",
            Waveform::Smooth { .. } => "smooth",
            Waveform::Randomized { .. } => "randomized",
        }
    }

    /// Check parameters shared by every shape
    pub fn validate(&self) -> Result<(), WaveformError> {
        let center = self.center();
        if !(0..=i32::from(MAX_DATA)).contains(&center) {
            return Err(WaveformError::CenterOutOfRange(center));
        }
        let controller = self.controller();
        if !(0..=MAX_GENERATOR_CONTROLLER).contains(&controller) {
            return Err(WaveformError::ControllerOutOfRange(controller));
        }
        if self.channel() > MAX_CHANNEL {
            return Err(WaveformError::ChannelOutOfRange(self.channel()));
        }
        Ok(())
    }

    /// Run the generator to completion on the calling thread.
    ///
    /// Parameters are validated before anything is sent. Every sample waits
    /// for a free queue slot. Returns the number of events sent.
    pub fn run(&self, queue: &QueueSender) -> Result<usize, WaveformError> {
        self.validate()?;
        info!(
            "Starting {} sweep on CC{} (center {}, channel {})",
            self.name(),
            self.controller(),
            self.center(),
            self.channel() + 1
        );

        // validate() bounds the controller to 0-126
        let controller = self.controller() as u8;
        let channel = self.channel();
        let mut sent = 0;
        let mut emit = |value: u8| -> Result<(), WaveformError> {
            let event = ControlChangeEvent::new(channel, controller, value)
                .map_err(|_| WaveformError::ControllerOutOfRange(i32::from(controller)))?;
            queue
                .send_blocking(event)
                .map_err(|_| WaveformError::QueueClosed { sent })?;
            debug!("Generator -> queue: {}", event);
            sent += 1;
            Ok(())
        };

        match *self {
            Waveform::Stepped {
                center,
                amplitude,
                steps,
                ..
            } => {
                for i in 0..steps {
                    emit(stepped_value(center, amplitude, i, steps))?;
                    thread::sleep(STEPPED_TICK);
                }
            }
            Waveform::Smooth {
                center,
                amplitude,
                duration,
                frequency_hz,
                ..
            } => {
                let start = Instant::now();
                loop {
                    let elapsed = start.elapsed();
                    if elapsed >= duration {
                        break;
                    }
                    emit(smooth_value(center, amplitude, frequency_hz, elapsed))?;
                    thread::sleep(SMOOTH_TICK);
                }
            }
            Waveform::Randomized {
                center,
                max_deviation,
                count,
                delay,
                ..
            } => {
                for i in 0..count {
                    emit(randomized_value(center, max_deviation, i))?;
                    thread::sleep(delay);
                }
            }
        }

        info!("Finished {} sweep on CC{} ({} events)", self.name(), controller, sent);
        Ok(sent)
    }
}

/// The built-in demo: modulation, volume, pan and filter cutoff sweeps on channel 1
pub fn demo_sequence() -> Vec<Waveform> {
    vec![
        Waveform::Stepped {
            controller: 1,
            center: 64,
            amplitude: 30,
            steps: 20,
            channel: 0,
        },
        Waveform::Smooth {
            controller: 7,
            center: 100,
            amplitude: 20,
            duration: Duration::from_secs(3),
            frequency_hz: 2.0,
            channel: 0,
        },
        Waveform::Randomized {
            controller: 10,
            center: 64,
            max_deviation: 40,
            count: 15,
            delay: Duration::from_millis(100),
            channel: 0,
        },
        Waveform::Smooth {
            controller: 74,
            center: 80,
            amplitude: 25,
            duration: Duration::from_secs(2),
            frequency_hz: 1.0,
            channel: 0,
        },
    ]
}

/// Run waveforms one after another; stops at the first failure
pub fn run_sequence(waveforms: &[Waveform], queue: &QueueSender) -> Result<usize, WaveformError> {
    waveforms.iter().try_fold(0, |total, w| Ok(total + w.run(queue)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::message_queue;
    use proptest::prelude::*;

    fn stepped(controller: i32, center: i32, steps: usize) -> Waveform {
        Waveform::Stepped {
            controller,
            center,
            amplitude: 30,
            steps,
            channel: 0,
        }
    }

    #[test]
    fn test_stepped_period() {
        let values: Vec<u8> = (0..5).map(|i| stepped_value(64, 30, i, 5)).collect();
        assert_eq!(values, vec![64, 94, 64, 34, 64]);
    }

    #[test]
    fn test_full_period_rounds_back_to_center() {
        let raw = 64.0 + 30.0 * TAU.sin();
        assert!(raw < 64.0);
        assert_eq!(cc_value(raw), 64);
        assert_eq!(cc_value(93.6), 94);
    }

    #[test]
    fn test_single_step_emits_center() {
        assert_eq!(stepped_value(64, 30, 0, 1), 64);

        let (tx, rx) = message_queue(4);
        assert_eq!(stepped(1, 90, 1).run(&tx).unwrap(), 1);
        assert_eq!(rx.recv().map(|e| e.value()), Some(90));
    }

    #[test]
    fn test_zero_steps_sends_nothing() {
        let (tx, rx) = message_queue(4);
        assert_eq!(stepped(1, 64, 0).run(&tx).unwrap(), 0);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_values_clamped() {
        assert_eq!(stepped_value(120, 30, 1, 5), 127);
        assert_eq!(stepped_value(10, 30, 3, 5), 0);
        assert_eq!(randomized_value(0, 63, 15), 0);
    }

    #[test]
    fn test_smooth_value_quarter_period() {
        assert_eq!(smooth_value(100, 20, 2.0, Duration::ZERO), 100);
        assert_eq!(smooth_value(100, 20, 2.0, Duration::from_millis(125)), 120);
        assert_eq!(smooth_value(100, 20, 2.0, Duration::from_millis(375)), 80);
    }

    #[test]
    fn test_randomized_first_samples() {
        // i = 0: 64 + 0 + 20 * cos(0)
        assert_eq!(randomized_value(64, 40, 0), 84);
        // i = 1: 64 + 40 sin(0.3) + 20 cos(0.7) = 64 + 11.82 + 15.30
        assert_eq!(randomized_value(64, 40, 1), 91);
    }

    #[test]
    fn test_invalid_parameters_send_nothing() {
        let (tx, rx) = message_queue(4);

        assert_eq!(stepped(127, 64, 5).run(&tx), Err(WaveformError::ControllerOutOfRange(127)));
        assert_eq!(stepped(-1, 64, 5).run(&tx), Err(WaveformError::ControllerOutOfRange(-1)));
        assert_eq!(stepped(1, 128, 5).run(&tx), Err(WaveformError::CenterOutOfRange(128)));
        assert_eq!(stepped(1, -5, 5).run(&tx), Err(WaveformError::CenterOutOfRange(-5)));

        let bad_channel = Waveform::Randomized {
            controller: 10,
            center: 64,
            max_deviation: 40,
            count: 3,
            delay: Duration::ZERO,
            channel: 16,
        };
        assert_eq!(bad_channel.run(&tx), Err(WaveformError::ChannelOutOfRange(16)));

        assert!(rx.is_empty());
    }

    #[test]
    fn test_stepped_run_sends_in_order() {
        let (tx, rx) = message_queue(8);
        let sent = Waveform::Stepped {
            controller: 1,
            center: 64,
            amplitude: 30,
            steps: 5,
            channel: 2,
        }
        .run(&tx)
        .unwrap();
        assert_eq!(sent, 5);

        let received: Vec<(u8, u8, u8)> = (0..5)
            .filter_map(|_| rx.recv())
            .map(|e| (e.channel(), e.controller(), e.value()))
            .collect();
        assert_eq!(
            received,
            vec![(2, 1, 64), (2, 1, 94), (2, 1, 64), (2, 1, 34), (2, 1, 64)]
        );
    }

    #[test]
    fn test_smooth_run_respects_duration() {
        let (tx, rx) = message_queue(64);
        let start = Instant::now();
        let sent = Waveform::Smooth {
            controller: 7,
            center: 100,
            amplitude: 20,
            duration: Duration::from_millis(200),
            frequency_hz: 2.0,
            channel: 0,
        }
        .run(&tx)
        .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(sent >= 1 && sent <= 11, "sent {}", sent);
        assert_eq!(rx.len(), sent);
    }

    #[test]
    fn test_closed_queue_reports_progress() {
        let (tx, rx) = message_queue(4);
        drop(rx);
        assert_eq!(stepped(1, 64, 5).run(&tx), Err(WaveformError::QueueClosed { sent: 0 }));
    }

    #[test]
    fn test_demo_sequence_is_valid() {
        let demo = demo_sequence();
        assert_eq!(demo.len(), 4);
        assert!(demo.iter().all(|w| w.validate().is_ok()));
        assert_eq!(demo.iter().map(Waveform::controller).collect::<Vec<_>>(), vec![1, 7, 10, 74]);
    }

    #[test]
    fn test_run_sequence_totals() {
        let (tx, rx) = message_queue(16);
        let total = run_sequence(&[stepped(1, 64, 3), stepped(2, 64, 2)], &tx).unwrap();
        assert_eq!(total, 5);
        assert_eq!(rx.len(), 5);
    }

    proptest! {
        #[test]
        fn prop_stepped_values_in_range(
            center in 0i32..=127,
            amplitude in -200i32..=200,
            steps in 1usize..64,
        ) {
            for i in 0..steps {
                prop_assert!(stepped_value(center, amplitude, i, steps) <= 127);
            }
        }

        #[test]
        fn prop_smooth_values_in_range(
            center in 0i32..=127,
            amplitude in -200i32..=200,
            frequency in 0.0f64..50.0,
            millis in 0u64..10_000,
        ) {
            let v = smooth_value(center, amplitude, frequency, Duration::from_millis(millis));
            prop_assert!(v <= 127);
        }

        #[test]
        fn prop_randomized_values_in_range(
            center in 0i32..=127,
            deviation in 0i32..=127,
            i in 0usize..10_000,
        ) {
            prop_assert!(randomized_value(center, deviation, i) <= 127);
        }
    }
}
