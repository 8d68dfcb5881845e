//! Stream format description

use crate::error::AudioError;
use serde::{Deserialize, Serialize};

/// PCM stream format shared by both ends of a session.
///
/// `buffer_size` is the caller's requested I/O buffer in bytes; actual I/O
/// uses [`AudioFormat::adjusted_buffer_size`], which truncates it to a whole
/// number of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bits per sample, 8 or 16.
    pub bit_depth: u16,
    /// Channel count, 1 or 2.
    pub channels: u16,
    /// Requested I/O buffer size in bytes.
    pub buffer_size: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            bit_depth: 16,
            channels: 2,
            buffer_size: 4096,
        }
    }
}

impl AudioFormat {
    /// Bytes per frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        self.channels as usize * (self.bit_depth as usize / 8)
    }

    /// Buffer size truncated down to a whole number of frames.
    /// `None` when the result would be zero, which must abort session start.
    pub fn adjusted_buffer_size(&self) -> Option<usize> {
        let frame = self.frame_size();
        if frame == 0 {
            return None;
        }
        let adjusted = (self.buffer_size / frame) * frame;
        (adjusted > 0).then_some(adjusted)
    }

    /// Reject formats the engine cannot carry at all.
    pub fn validate(&self) -> Result<(), AudioError> {
        if !matches!(self.bit_depth, 8 | 16) {
            return Err(AudioError::UnsupportedFormat(format!(
                "bit depth {} (expected 8 or 16)",
                self.bit_depth
            )));
        }
        if !matches!(self.channels, 1 | 2) {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} channels (expected 1 or 2)",
                self.channels
            )));
        }
        if self.adjusted_buffer_size().is_none() {
            return Err(AudioError::InvalidBufferSize(self.buffer_size, self.frame_size()));
        }
        Ok(())
    }

    /// Same format with a different channel count.
    pub fn with_channels(self, channels: u16) -> Self {
        Self { channels, ..self }
    }
}
