//! Baseband Gateway Buffers
//!
//! Multi-channel IQ sample containers exchanged between the lower PHY and the radio
//! transport, plus the metadata describing which part of a buffer carries signal.

use num_complex::Complex32;
use std::ops::Range;

/// Timestamp in samples since an arbitrary epoch
pub type BasebandTimestamp = u64;

/// Transmit buffer metadata
///
/// `tx_start` and `tx_end` delimit the single active window of the buffer. A missing
/// `tx_start` means the window starts at the first sample, a missing `tx_end` means it
/// lasts until the last sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitMetadata {
    /// Set when the buffer carries no signal at all
    pub is_empty: bool,
    /// First sample of the active window
    pub tx_start: Option<usize>,
    /// One past the last sample of the active window
    pub tx_end: Option<usize>,
}

impl TransmitMetadata {
    /// Metadata of a buffer without signal
    pub fn empty() -> Self {
        Self {
            is_empty: true,
            tx_start: None,
            tx_end: None,
        }
    }

    /// Range of samples that carry signal in a buffer of `nof_samples`
    pub fn active_range(&self, nof_samples: usize) -> Range<usize> {
        if self.is_empty {
            return 0..0;
        }
        self.tx_start.unwrap_or(0)..self.tx_end.unwrap_or(nof_samples)
    }
}

/// Sample buffer with one row of samples per channel
#[derive(Clone, Debug)]
pub struct BasebandBuffer {
    /// Channel-major samples, `nof_channels * nof_samples` long
    samples: Vec<Complex32>,
    nof_channels: usize,
    nof_samples: usize,
}

impl BasebandBuffer {
    /// Create a zeroed buffer
    pub fn new(nof_channels: usize, nof_samples: usize) -> Self {
        Self {
            samples: vec![Complex32::new(0.0, 0.0); nof_channels * nof_samples],
            nof_channels,
            nof_samples,
        }
    }

    /// Number of channels
    pub fn nof_channels(&self) -> usize {
        self.nof_channels
    }

    /// Number of samples per channel
    pub fn nof_samples(&self) -> usize {
        self.nof_samples
    }

    /// Samples of one channel
    pub fn channel(&self, channel: usize) -> &[Complex32] {
        let start = channel * self.nof_samples;
        &self.samples[start..start + self.nof_samples]
    }

    /// Mutable samples of one channel
    pub fn channel_mut(&mut self, channel: usize) -> &mut [Complex32] {
        let start = channel * self.nof_samples;
        &mut self.samples[start..start + self.nof_samples]
    }

    /// Zero-copy writable view over a sample range of every channel
    pub fn writer(&mut self, range: Range<usize>) -> BasebandWriter<'_> {
        assert!(range.start <= range.end && range.end <= self.nof_samples, "view out of bounds");
        BasebandWriter {
            samples: &mut self.samples,
            stride: self.nof_samples,
            nof_channels: self.nof_channels,
            range,
        }
    }

    /// Read-only view over a sample range of every channel
    pub fn reader(&self, range: Range<usize>) -> BasebandReader<'_> {
        assert!(range.start <= range.end && range.end <= self.nof_samples, "view out of bounds");
        BasebandReader {
            samples: &self.samples,
            stride: self.nof_samples,
            nof_channels: self.nof_channels,
            range,
        }
    }

    /// Zero a sample range on every channel
    pub fn zero_range(&mut self, range: Range<usize>) {
        self.writer(range).zero();
    }
}

/// Writable view over the same sample range of every channel of a buffer
pub struct BasebandWriter<'a> {
    samples: &'a mut [Complex32],
    stride: usize,
    nof_channels: usize,
    range: Range<usize>,
}

impl<'a> BasebandWriter<'a> {
    /// Number of channels
    pub fn nof_channels(&self) -> usize {
        self.nof_channels
    }

    /// Number of samples per channel in the view
    pub fn nof_samples(&self) -> usize {
        self.range.len()
    }

    /// Mutable samples of one channel within the view
    pub fn channel_mut(&mut self, channel: usize) -> &mut [Complex32] {
        let start = channel * self.stride + self.range.start;
        &mut self.samples[start..start + self.range.len()]
    }

    /// Copy the samples of an equally shaped view
    pub fn copy_from(&mut self, source: &BasebandReader<'_>) {
        assert_eq!(self.nof_channels, source.nof_channels(), "channel count mismatch");
        assert_eq!(self.nof_samples(), source.nof_samples(), "sample count mismatch");
        for channel in 0..self.nof_channels {
            self.channel_mut(channel).copy_from_slice(source.channel(channel));
        }
    }

    /// Zero every sample in the view
    pub fn zero(&mut self) {
        for channel in 0..self.nof_channels {
            self.channel_mut(channel).fill(Complex32::new(0.0, 0.0));
        }
    }
}

/// Read-only view over the same sample range of every channel of a buffer
pub struct BasebandReader<'a> {
    samples: &'a [Complex32],
    stride: usize,
    nof_channels: usize,
    range: Range<usize>,
}

impl<'a> BasebandReader<'a> {
    /// Number of channels
    pub fn nof_channels(&self) -> usize {
        self.nof_channels
    }

    /// Number of samples per channel in the view
    pub fn nof_samples(&self) -> usize {
        self.range.len()
    }

    /// Samples of one channel within the view
    pub fn channel(&self, channel: usize) -> &[Complex32] {
        let start = channel * self.stride + self.range.start;
        &self.samples[start..start + self.range.len()]
    }
}
