//! Decoded PCM stream descriptions.

use serde::{Deserialize, Serialize};

/// Format of a decoded PCM byte stream.
///
/// Decoded audio is always interleaved signed little-endian integer
/// samples; one frame is one sample period across all channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmSpec {
    /// Sample rate in Hz (e.g. 44100, 48000).
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo).
    pub channels: u16,
    /// Bits per sample (16 for everything symphonia decodes here).
    pub bits_per_sample: u16,
}

impl PcmSpec {
    /// Size of one frame in bytes.
    pub const fn frame_size(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Frames per second. Identical to the sample rate for PCM.
    pub const fn frame_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Convert a frame count into milliseconds.
    pub const fn frames_to_millis(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        frames * 1000 / self.sample_rate as u64
    }

    /// Convert milliseconds into a frame count.
    pub const fn millis_to_frames(&self, millis: u64) -> u64 {
        millis * self.sample_rate as u64 / 1000
    }
}

impl Default for PcmSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        let spec = PcmSpec::default();
        assert_eq!(spec.frame_size(), 4);

        let mono = PcmSpec {
            channels: 1,
            ..PcmSpec::default()
        };
        assert_eq!(mono.frame_size(), 2);
    }

    #[test]
    fn test_frame_millis_conversion() {
        let spec = PcmSpec::default();
        assert_eq!(spec.frames_to_millis(44_100), 1000);
        assert_eq!(spec.millis_to_frames(1000), 44_100);
        assert_eq!(spec.millis_to_frames(500), 22_050);
        assert_eq!(spec.frames_to_millis(0), 0);
    }
}
