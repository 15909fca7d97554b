//! PCM capture from an input device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use aria_core::{Error, FileFormat, PcmSpec, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, Sample, SampleFormat, SampleRate, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Receives chunks of captured audio as interleaved signed 16-bit
/// little-endian PCM.
pub trait RecordingListener: Send + Sync {
    fn recorded(&self, data: &[u8]);
}

impl<F> RecordingListener for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn recorded(&self, data: &[u8]) {
        self(data);
    }
}

struct ListenerEntry {
    id: Uuid,
    listener: Arc<dyn RecordingListener>,
}

/// Copy-on-write listener set; the capture callback iterates a snapshot
/// without holding the lock.
#[derive(Default)]
struct RecordingListenerSet {
    inner: RwLock<Arc<Vec<ListenerEntry>>>,
}

impl RecordingListenerSet {
    fn add(&self, listener: Arc<dyn RecordingListener>) -> Uuid {
        let id = Uuid::new_v4();
        let mut guard = self.inner.write();
        let mut entries: Vec<ListenerEntry> = guard
            .iter()
            .map(|entry| ListenerEntry {
                id: entry.id,
                listener: Arc::clone(&entry.listener),
            })
            .collect();
        entries.push(ListenerEntry { id, listener });
        *guard = Arc::new(entries);
        id
    }

    fn remove(&self, id: Uuid) {
        let mut guard = self.inner.write();
        let entries: Vec<ListenerEntry> = guard
            .iter()
            .filter(|entry| entry.id != id)
            .map(|entry| ListenerEntry {
                id: entry.id,
                listener: Arc::clone(&entry.listener),
            })
            .collect();
        *guard = Arc::new(entries);
    }

    fn dispatch(&self, data: &[u8]) {
        let snapshot = Arc::clone(&self.inner.read());
        for entry in snapshot.iter() {
            entry.listener.recorded(data);
        }
    }
}

/// Captures PCM from the default input device and fans it out to
/// [`RecordingListener`]s.
pub struct Recorder {
    format: FileFormat,
    spec: PcmSpec,
    listeners: Arc<RecordingListenerSet>,
    running: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    capture_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Recorder {
    /// A recorder targeting WAV at 44.1 kHz stereo 16-bit.
    pub fn new() -> Result<Self> {
        Self::with_format(FileFormat::Wav, PcmSpec::default())
    }

    /// A recorder targeting a specific container and capture format.
    /// The container must support writing.
    pub fn with_format(format: FileFormat, spec: PcmSpec) -> Result<Self> {
        if !format.writing_supported() {
            return Err(Error::UnsupportedFormat(format!(
                "{format:?} does not support writing"
            )));
        }
        Ok(Self {
            format,
            spec,
            listeners: Arc::new(RecordingListenerSet::default()),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
            capture_thread: Mutex::new(None),
        })
    }

    pub const fn file_format(&self) -> FileFormat {
        self.format
    }

    pub const fn pcm_spec(&self) -> PcmSpec {
        self.spec
    }

    pub fn add_listener(&self, listener: Arc<dyn RecordingListener>) -> Uuid {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, token: Uuid) {
        self.listeners.remove(token);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Open the input device and start delivering chunks. No-op when
    /// already running.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let spec = self.spec;
        let listeners = Arc::clone(&self.listeners);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("aria-record".to_string())
            .spawn(move || run_capture_thread(&spec, listeners, running, &shutdown_rx, &ready_tx))
            .map_err(|e| Error::Device(format!("Failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.shutdown_tx.lock() = Some(shutdown_tx);
                *self.capture_thread.lock() = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::Release);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::Release);
                let _ = handle.join();
                Err(Error::Device("Capture thread died during setup".to_string()))
            }
        }
    }

    /// Stop capturing and release the device. No-op when not running.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        drop(self.shutdown_tx.lock().take());
        if let Some(handle) = self.capture_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builds the cpal input stream and parks until stopped.
fn run_capture_thread(
    spec: &PcmSpec,
    listeners: Arc<RecordingListenerSet>,
    running: Arc<AtomicBool>,
    shutdown_rx: &Receiver<()>,
    ready_tx: &Sender<Result<()>>,
) {
    let stream = match build_input_stream(spec, listeners, running) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let _ = shutdown_rx.recv();
    drop(stream);
    debug!("Capture thread exiting");
}

fn build_input_stream(
    spec: &PcmSpec,
    listeners: Arc<RecordingListenerSet>,
    running: Arc<AtomicBool>,
) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Device("No input device found".to_string()))?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported_config = device
        .default_input_config()
        .map_err(|e| Error::Device(format!("Failed to get input config: {e}")))?;
    let sample_format = supported_config.sample_format();

    let config = StreamConfig {
        channels: spec.channels,
        sample_rate: SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        "Opening input: {} Hz, {} channels on {device_name}",
        spec.sample_rate, spec.channels
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_typed_input::<f32>(&device, &config, listeners, running)?,
        SampleFormat::I16 => build_typed_input::<i16>(&device, &config, listeners, running)?,
        SampleFormat::U16 => build_typed_input::<u16>(&device, &config, listeners, running)?,
        _ => {
            return Err(Error::Device(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::Device(format!("Failed to start capture: {e}")))?;

    Ok(stream)
}

fn build_typed_input<T: cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    listeners: Arc<RecordingListenerSet>,
    running: Arc<AtomicBool>,
) -> Result<Stream>
where
    f32: cpal::FromSample<T>,
{
    let err_fn = |err| {
        error!("Capture stream error: {err}");
    };

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Acquire) {
                    return;
                }
                let mut bytes = Vec::with_capacity(data.len() * 2);
                for sample in data {
                    let value = f32::from_sample(*sample).clamp(-1.0, 1.0);
                    #[allow(clippy::cast_possible_truncation)]
                    let quantized = (value * f32::from(i16::MAX)) as i16;
                    bytes.extend_from_slice(&quantized.to_le_bytes());
                }
                listeners.dispatch(&bytes);
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Device(format!("Failed to build capture stream: {e}")))?;

    Ok(stream)
}
