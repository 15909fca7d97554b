//! Engine tuning knobs.

/// Configuration for the streaming playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerConfig {
    /// Frames decoded and written to the sink per worker iteration.
    /// Control flags are re-checked between chunks, so smaller chunks
    /// react faster to pause/stop at the cost of more lock traffic.
    pub chunk_frames: usize,
    /// Capacity of the device ring buffer, in frames.
    pub sink_buffer_frames: usize,
}

impl PlayerConfig {
    /// Smaller buffers for faster control response.
    pub const fn low_latency() -> Self {
        Self {
            chunk_frames: 256,
            sink_buffer_frames: 4096,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            // ~23ms at 44.1kHz
            chunk_frames: 1024,
            // ~0.37s at 44.1kHz
            sink_buffer_frames: 16_384,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlayerConfig::default();
        assert!(config.chunk_frames > 0);
        assert!(config.sink_buffer_frames >= config.chunk_frames);
    }

    #[test]
    fn test_low_latency_is_smaller() {
        let default = PlayerConfig::default();
        let low = PlayerConfig::low_latency();
        assert!(low.chunk_frames < default.chunk_frames);
        assert!(low.sink_buffer_frames < default.sink_buffer_frames);
    }
}
