//! Carrier Frequency Offset Correction
//!
//! Applies a rotating complex exponential to baseband blocks. Commands are scheduled by
//! baseband timestamp from any thread and picked up by the real-time thread when their
//! start time has been reached.
//!
//! The phase of every sample is derived from its integer offset since the last phase
//! reset, never accumulated, so no floating point drift builds up within a reset period.

use interfaces::BasebandTimestamp;
use num_complex::Complex32;
use std::f64::consts::PI;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Scheduled frequency offset change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfoCommand {
    /// Timestamp from which the command applies
    pub start: BasebandTimestamp,
    /// Frequency offset in Hz
    pub cfo_hz: f64,
    /// Frequency offset drift in Hz per second
    pub cfo_drift_hz_s: f64,
}

/// Schedules CFO commands from a control thread
#[derive(Clone, Debug)]
pub struct CfoController {
    commands: mpsc::Sender<CfoCommand>,
}

impl CfoController {
    /// Queue a command. Fails without side effects when the queue is full.
    pub fn schedule_command(&self, command: CfoCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                warn!("CFO command queue full, dropping command for timestamp {}", command.start);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Applies the active CFO to baseband samples
pub struct CfoProcessor {
    srate_hz: f64,
    commands: mpsc::Receiver<CfoCommand>,
    /// Head of the command queue, waiting for its start time
    pending: Option<CfoCommand>,
    /// Command in effect
    active: Option<CfoCommand>,
    /// Frequency offset normalized to the sampling rate
    norm_freq: f64,
    /// Samples processed since the last phase reset
    offset: u64,
}

impl CfoProcessor {
    /// Create a processor and the controller feeding it
    pub fn new(srate_hz: f64, queue_size: usize) -> (Self, CfoController) {
        let (sender, receiver) = mpsc::channel(queue_size);
        let processor = Self {
            srate_hz,
            commands: receiver,
            pending: None,
            active: None,
            norm_freq: 0.0,
            offset: 0,
        };
        (processor, CfoController { commands: sender })
    }

    /// Current frequency offset in Hz
    pub fn current_cfo_hz(&self) -> f64 {
        self.norm_freq * self.srate_hz
    }

    /// Reset the phase reference and activate the next command if it is due at `now`
    pub fn advance_to_next_symbol(&mut self, now: BasebandTimestamp) {
        self.offset = 0;

        if self.pending.is_none() {
            self.pending = self.commands.try_recv().ok();
        }
        if let Some(command) = self.pending.filter(|command| command.start <= now) {
            debug!(
                "Activating CFO command at {}: cfo={:.2} Hz, drift={:.2} Hz/s",
                now, command.cfo_hz, command.cfo_drift_hz_s
            );
            self.active = Some(command);
            self.norm_freq = command.cfo_hz / self.srate_hz;
            self.pending = None;
        }

        if let Some(active) = self.active.filter(|active| active.cfo_drift_hz_s != 0.0) {
            let elapsed_s = now.saturating_sub(active.start) as f64 / self.srate_hz;
            self.norm_freq = (active.cfo_hz + active.cfo_drift_hz_s * elapsed_s) / self.srate_hz;
        }
    }

    /// Rotate `samples` in place, continuing the phase from the current offset
    pub fn apply(&self, samples: &mut [Complex32]) {
        let norm_freq = self.norm_freq;
        if norm_freq == 0.0 || norm_freq.is_nan() {
            return;
        }

        for (i, sample) in samples.iter_mut().enumerate() {
            let cycles = (norm_freq * (self.offset + i as u64) as f64).fract();
            *sample *= Complex32::from_polar(1.0, (2.0 * PI * cycles) as f32);
        }
    }

    /// Account for `nof_samples` processed samples
    pub fn advance(&mut self, nof_samples: usize) {
        self.offset += nof_samples as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRATE: f64 = 1_920_000.0;

    fn ones(len: usize) -> Vec<Complex32> {
        vec![Complex32::new(1.0, 0.0); len]
    }

    #[test]
    fn test_no_command_is_noop() {
        let (mut cfo, _controller) = CfoProcessor::new(SRATE, 4);
        cfo.advance_to_next_symbol(0);
        let mut samples = ones(16);
        cfo.apply(&mut samples);
        assert_eq!(samples, ones(16));
    }

    #[test]
    fn test_queue_full_rejects_command() {
        let (_cfo, controller) = CfoProcessor::new(SRATE, 2);
        let command = CfoCommand { start: 0, cfo_hz: 100.0, cfo_drift_hz_s: 0.0 };
        assert!(controller.schedule_command(command));
        assert!(controller.schedule_command(command));
        assert!(!controller.schedule_command(command));
    }

    #[test]
    fn test_command_waits_for_start_time() {
        let (mut cfo, controller) = CfoProcessor::new(SRATE, 4);
        assert!(controller.schedule_command(CfoCommand { start: 1000, cfo_hz: 480.0, cfo_drift_hz_s: 0.0 }));

        cfo.advance_to_next_symbol(999);
        assert_eq!(cfo.current_cfo_hz(), 0.0);

        cfo.advance_to_next_symbol(1000);
        assert!((cfo.current_cfo_hz() - 480.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotation_follows_sample_offset() {
        let (mut cfo, controller) = CfoProcessor::new(SRATE, 4);
        let cfo_hz = SRATE / 64.0;
        controller.schedule_command(CfoCommand { start: 0, cfo_hz, cfo_drift_hz_s: 0.0 });
        cfo.advance_to_next_symbol(0);

        let mut samples = ones(64);
        cfo.apply(&mut samples);
        for (n, sample) in samples.iter().enumerate() {
            let expected = Complex32::from_polar(1.0, (2.0 * PI * n as f64 / 64.0) as f32);
            assert!((sample - expected).norm() < 1e-5);
        }
    }

    #[test]
    fn test_phase_continuity_across_blocks() {
        let (mut split, controller) = CfoProcessor::new(SRATE, 4);
        let command = CfoCommand { start: 0, cfo_hz: 1234.5, cfo_drift_hz_s: 0.0 };
        controller.schedule_command(command);
        let (mut whole, controller) = CfoProcessor::new(SRATE, 4);
        controller.schedule_command(command);

        split.advance_to_next_symbol(0);
        whole.advance_to_next_symbol(0);

        let input: Vec<Complex32> = (0..300).map(|i| Complex32::new(i as f32, -(i as f32))).collect();

        let mut expected = input.clone();
        whole.apply(&mut expected);

        let mut first = input[..117].to_vec();
        let mut second = input[117..].to_vec();
        split.apply(&mut first);
        split.advance(first.len());
        split.apply(&mut second);

        first.extend(second);
        assert_eq!(first, expected);
    }

    #[test]
    fn test_drift_updates_frequency_per_reset() {
        let (mut cfo, controller) = CfoProcessor::new(SRATE, 4);
        controller.schedule_command(CfoCommand { start: 0, cfo_hz: 100.0, cfo_drift_hz_s: 10.0 });
        cfo.advance_to_next_symbol(0);
        assert!((cfo.current_cfo_hz() - 100.0).abs() < 1e-9);

        // Half a second later the offset drifted by 5 Hz.
        cfo.advance_to_next_symbol(SRATE as u64 / 2);
        assert!((cfo.current_cfo_hz() - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_nan_frequency_is_noop() {
        let (mut cfo, controller) = CfoProcessor::new(SRATE, 4);
        controller.schedule_command(CfoCommand { start: 0, cfo_hz: f64::NAN, cfo_drift_hz_s: 0.0 });
        cfo.advance_to_next_symbol(0);
        let mut samples = ones(8);
        cfo.apply(&mut samples);
        assert_eq!(samples, ones(8));
    }
}
