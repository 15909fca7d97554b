//! Audio output using cpal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aria_core::{Error, FileFormat, PcmSpec, Resource, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, SampleRate, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::buffer::RingBuffer;
use crate::config::PlayerConfig;
use crate::decode::{PcmSource, SymphoniaSource};
use crate::sink::{AudioBackend, AudioSink, BoolControl, FloatControl, SinkControls};

/// Gain control bounds in decibels, matching typical master-gain lines.
const GAIN_MIN_DB: f32 = -80.0;
const GAIN_MAX_DB: f32 = 6.0;

/// State shared between the sink handle and the output callback.
struct SinkShared {
    ring: RingBuffer,
    /// Whether the callback consumes audio or emits silence.
    running: AtomicBool,
    /// Frame position reported at the last rebase.
    base_frames: AtomicU64,
    /// Ring consumption count at the last rebase, in samples.
    consumed_at_rebase: AtomicU64,
    gain: FloatControl,
    mute: BoolControl,
    balance: FloatControl,
    spec: PcmSpec,
}

impl SinkShared {
    fn frame_position(&self) -> u64 {
        let consumed = self
            .ring
            .consumed()
            .saturating_sub(self.consumed_at_rebase.load(Ordering::Acquire));
        self.base_frames.load(Ordering::Acquire) + consumed / u64::from(self.spec.channels)
    }

    fn rebase(&self, frames: u64) {
        self.ring.clear();
        self.consumed_at_rebase
            .store(self.ring.consumed(), Ordering::Release);
        self.base_frames.store(frames, Ordering::Release);
    }
}

fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Device sink writing through a lock-free ring buffer to a cpal stream.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated
/// thread for the lifetime of the sink; the handle only touches shared
/// atomics and the ring.
pub struct CpalSink {
    shared: Arc<SinkShared>,
    shutdown_tx: Option<Sender<()>>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    /// Open the default output device for a PCM format.
    pub fn open(spec: &PcmSpec, buffer_frames: usize) -> Result<Self> {
        let shared = Arc::new(SinkShared {
            ring: RingBuffer::new(buffer_frames * spec.channels as usize),
            running: AtomicBool::new(false),
            base_frames: AtomicU64::new(0),
            consumed_at_rebase: AtomicU64::new(0),
            gain: FloatControl::new(0.0, GAIN_MIN_DB, GAIN_MAX_DB),
            mute: BoolControl::new(false),
            balance: FloatControl::new(0.0, -1.0, 1.0),
            spec: *spec,
        });

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let thread_shared = Arc::clone(&shared);
        let spec = *spec;
        let stream_thread = thread::Builder::new()
            .name("aria-output".to_string())
            .spawn(move || run_stream_thread(&spec, thread_shared, &shutdown_rx, &ready_tx))
            .map_err(|e| Error::Device(format!("Failed to spawn output thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                shutdown_tx: Some(shutdown_tx),
                stream_thread: Some(stream_thread),
            }),
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = stream_thread.join();
                Err(Error::Device("Output thread died during setup".to_string()))
            }
        }
    }
}

impl AudioSink for CpalSink {
    fn start(&mut self) {
        self.shared.running.store(true, Ordering::Release);
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
    }

    fn write(&mut self, data: &[u8], abort: &AtomicBool) -> Result<usize> {
        // i16-LE bytes to f32 samples
        let samples: Vec<f32> = data
            .chunks_exact(2)
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / f32::from(i16::MAX))
            .collect();

        let mut written = 0;
        while written < samples.len() {
            written += self.shared.ring.write(&samples[written..]);
            if written < samples.len() {
                // Full device buffer: block unless the sink was stopped
                // or the engine interrupted the write.
                if !self.shared.running.load(Ordering::Acquire) || abort.load(Ordering::Acquire) {
                    return Ok(written * 2);
                }
                thread::sleep(Duration::from_micros(500));
            }
        }
        Ok(data.len())
    }

    fn drain(&mut self, abort: &AtomicBool) {
        while !self.shared.ring.is_empty()
            && self.shared.running.load(Ordering::Acquire)
            && !abort.load(Ordering::Acquire)
        {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn flush(&mut self) {
        self.shared.ring.clear();
    }

    fn buffer_size(&self) -> usize {
        self.shared.ring.capacity() * 2
    }

    fn frame_position(&self) -> u64 {
        self.shared.frame_position()
    }

    fn set_frame_position(&mut self, frames: u64) {
        self.shared.rebase(frames);
    }

    fn controls(&self) -> SinkControls {
        SinkControls {
            gain: Some(self.shared.gain.clone()),
            mute: Some(self.shared.mute.clone()),
            balance: if self.shared.spec.channels == 2 {
                Some(self.shared.balance.clone())
            } else {
                None
            },
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        // Dropping the sender unblocks the stream thread's recv.
        drop(self.shutdown_tx.take());
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Builds the cpal stream and parks until the sink is dropped.
fn run_stream_thread(
    spec: &PcmSpec,
    shared: Arc<SinkShared>,
    shutdown_rx: &Receiver<()>,
    ready_tx: &Sender<Result<()>>,
) {
    let stream = match build_stream(spec, shared) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Blocks until the sink handle drops its sender.
    let _ = shutdown_rx.recv();
    drop(stream);
    debug!("Output stream thread exiting");
}

fn build_stream(spec: &PcmSpec, shared: Arc<SinkShared>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Device("No output device found".to_string()))?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported_config = device
        .default_output_config()
        .map_err(|e| Error::Device(format!("Failed to get output config: {e}")))?;
    let sample_format = supported_config.sample_format();

    // Ask the device for the decoded format directly; the engine does
    // not resample.
    let config = StreamConfig {
        channels: spec.channels,
        sample_rate: SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        "Opening output: {} Hz, {} channels on {device_name}",
        spec.sample_rate, spec.channels
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_typed_stream::<f32>(&device, &config, shared)?,
        SampleFormat::I16 => build_typed_stream::<i16>(&device, &config, shared)?,
        SampleFormat::U16 => build_typed_stream::<u16>(&device, &config, shared)?,
        _ => {
            return Err(Error::Device(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::Device(format!("Failed to start stream: {e}")))?;

    Ok(stream)
}

fn build_typed_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    shared: Arc<SinkShared>,
) -> Result<Stream> {
    let channels = usize::from(config.channels);

    let err_fn = |err| {
        error!("Audio stream error: {err}");
    };

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // Output silence when the sink is stopped; buffered audio
                // stays in the ring for resume.
                if !shared.running.load(Ordering::Acquire) {
                    for sample in data.iter_mut() {
                        *sample = T::from_sample(0.0f32);
                    }
                    return;
                }

                let gain = if shared.mute.get() {
                    0.0
                } else {
                    db_to_linear(shared.gain.get())
                };
                let balance = shared.balance.get();
                let (left_gain, right_gain) = if channels == 2 {
                    ((1.0 - balance).min(1.0), (1.0 + balance).min(1.0))
                } else {
                    (1.0, 1.0)
                };

                let mut temp = vec![0.0f32; data.len()];
                let read = shared.ring.read(&mut temp);

                for (index, sample) in data.iter_mut().enumerate() {
                    if index < read {
                        let channel_gain = if channels == 2 && index % 2 == 1 {
                            right_gain
                        } else {
                            left_gain
                        };
                        *sample = T::from_sample(temp[index] * gain * channel_gain);
                    } else {
                        *sample = T::from_sample(0.0f32);
                    }
                }

                if read > 0 && read < data.len() {
                    warn!("Buffer underrun: needed {}, got {}", data.len(), read);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Device(format!("Failed to build stream: {e}")))?;

    Ok(stream)
}

/// The production backend: symphonia decoding into cpal output.
pub struct SymphoniaCpalBackend {
    buffer_frames: usize,
}

impl SymphoniaCpalBackend {
    /// Backend with an explicit device ring capacity.
    pub const fn new(buffer_frames: usize) -> Self {
        Self { buffer_frames }
    }
}

impl Default for SymphoniaCpalBackend {
    fn default() -> Self {
        Self::new(PlayerConfig::default().sink_buffer_frames)
    }
}

impl AudioBackend for SymphoniaCpalBackend {
    fn open_source(&self, resource: &Resource, format: FileFormat) -> Result<Box<dyn PcmSource>> {
        Ok(Box::new(SymphoniaSource::open(resource, format)?))
    }

    fn open_sink(&self, spec: &PcmSpec) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(CpalSink::open(spec, self.buffer_frames)?))
    }
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::Device(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// Get the default output device name.
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device().and_then(|d| d.name().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        // This test may fail on CI without audio hardware
        let result = list_output_devices();
        // Just ensure it doesn't panic
        let _ = result;
    }

    #[test]
    fn test_db_to_linear() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!(db_to_linear(-80.0) < 1e-3);
        assert!(db_to_linear(6.0) > 1.9);
    }
}
