//! Output sink contract and typed device controls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aria_core::{FileFormat, PcmSpec, Resource, Result};
use parking_lot::Mutex;

use crate::decode::PcmSource;

/// A device output accepting a stream of PCM bytes.
///
/// Exclusively owned by whichever worker is currently alive for a handle;
/// only the shared controls may be touched from other threads.
pub trait AudioSink: Send {
    /// Begin (or continue) consuming buffered audio.
    fn start(&mut self);

    /// Pause consumption without discarding buffered audio.
    fn stop(&mut self);

    /// Write PCM bytes. May block while the device buffer is full; this
    /// is the engine's back-pressure. Returns early with the bytes
    /// written so far if the sink is stopped, or `abort` becomes true,
    /// while blocked.
    fn write(&mut self, data: &[u8], abort: &AtomicBool) -> Result<usize>;

    /// Block until all buffered audio has been played, the sink is
    /// stopped, or `abort` becomes true.
    fn drain(&mut self, abort: &AtomicBool);

    /// Discard any buffered, not-yet-played audio.
    fn flush(&mut self);

    /// Device buffer size in bytes.
    fn buffer_size(&self) -> usize;

    /// Frames played since open, offset by [`Self::set_frame_position`].
    fn frame_position(&self) -> u64;

    /// Rebase the reported frame position (used after seeks); discards
    /// buffered audio.
    fn set_frame_position(&mut self, frames: u64);

    /// The controls the device reported supporting at open time.
    fn controls(&self) -> SinkControls;
}

/// A bounded float control shared with the device callback.
#[derive(Clone)]
pub struct FloatControl {
    value: Arc<Mutex<f32>>,
    min: f32,
    max: f32,
}

impl FloatControl {
    /// Create a control with the device-reported bounds.
    pub fn new(initial: f32, min: f32, max: f32) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial.clamp(min, max))),
            min,
            max,
        }
    }

    /// Current value.
    pub fn get(&self) -> f32 {
        *self.value.lock()
    }

    /// Set the value, clamped to the control's bounds. Returns the
    /// clamped value actually applied.
    pub fn set(&self, value: f32) -> f32 {
        let clamped = value.clamp(self.min, self.max);
        *self.value.lock() = clamped;
        clamped
    }

    /// Minimum supported value.
    pub const fn min(&self) -> f32 {
        self.min
    }

    /// Maximum supported value.
    pub const fn max(&self) -> f32 {
        self.max
    }
}

/// A boolean control shared with the device callback.
#[derive(Clone, Default)]
pub struct BoolControl {
    value: Arc<AtomicBool>,
}

impl BoolControl {
    /// Create a control with an initial value.
    pub fn new(initial: bool) -> Self {
        Self {
            value: Arc::new(AtomicBool::new(initial)),
        }
    }

    /// Current value.
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    /// Set the value.
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }
}

/// The typed controls a sink reported supporting at open time.
///
/// Any control a device does not expose is `None`; setters on the handle
/// then fall back to caching the value for the next open.
#[derive(Clone, Default)]
pub struct SinkControls {
    /// Master gain in decibels.
    pub gain: Option<FloatControl>,
    /// Mute flag.
    pub mute: Option<BoolControl>,
    /// Stereo balance, -1.0 (left) to 1.0 (right).
    pub balance: Option<FloatControl>,
}

/// Opens decoders and sinks for the engine.
///
/// The production implementation is symphonia + cpal; tests inject
/// deterministic fakes.
pub trait AudioBackend: Send + Sync {
    /// Open a PCM source for a resource with a declared container format.
    fn open_source(&self, resource: &Resource, format: FileFormat) -> Result<Box<dyn PcmSource>>;

    /// Allocate a device sink for a PCM format.
    fn open_sink(&self, spec: &PcmSpec) -> Result<Box<dyn AudioSink>>;
}
