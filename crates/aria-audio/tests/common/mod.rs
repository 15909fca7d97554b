//! Shared test doubles: a deterministic backend with an inspectable
//! sink, plus an event recorder.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aria_audio::{
    Audio, AudioBackend, AudioSink, BoolControl, FloatControl, PcmSource, PlayerConfig,
    SinkControls, StreamedAudio,
};
use aria_core::{AudioEvent, AudioEventKind, FileFormat, PcmSpec, Resource, Result};
use parking_lot::Mutex;
use uuid::Uuid;

/// Mono 16-bit at 1 kHz, so one frame is one millisecond.
pub fn test_spec() -> PcmSpec {
    PcmSpec {
        sample_rate: 1000,
        channels: 1,
        bits_per_sample: 16,
    }
}

/// Small chunks so control flags are polled often.
pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        chunk_frames: 16,
        sink_buffer_frames: 256,
    }
}

/// The sample expected at a given frame index.
pub fn sample_at(frame: u64) -> i16 {
    #[allow(clippy::cast_possible_truncation)]
    let value = frame as u16;
    value as i16
}

/// PCM source producing `sample_at(i)` for frame `i`.
struct PatternSource {
    spec: PcmSpec,
    frames: u64,
    cursor: u64,
    report_length: bool,
}

impl PcmSource for PatternSource {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn frame_count(&self) -> Option<u64> {
        self.report_length.then_some(self.frames)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.spec.frame_size();
        let frames = ((buf.len() / frame_size) as u64).min(self.frames - self.cursor);
        for i in 0..frames {
            let bytes = sample_at(self.cursor + i).to_le_bytes();
            let offset = usize::try_from(i).unwrap() * frame_size;
            buf[offset..offset + 2].copy_from_slice(&bytes);
        }
        self.cursor += frames;
        Ok(usize::try_from(frames).unwrap() * frame_size)
    }
}

/// Everything a test can observe about the fake device.
pub struct SinkProbe {
    pub running: AtomicBool,
    pub data: Mutex<Vec<u8>>,
    base: AtomicU64,
    consumed: AtomicU64,
    pub gain: FloatControl,
    pub mute: BoolControl,
    pub balance: FloatControl,
}

impl SinkProbe {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            data: Mutex::new(Vec::new()),
            base: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            gain: FloatControl::new(0.0, -80.0, 6.0),
            mute: BoolControl::new(false),
            balance: FloatControl::new(0.0, -1.0, 1.0),
        }
    }

    pub fn frame_position(&self) -> u64 {
        self.base.load(Ordering::Acquire) + self.consumed.load(Ordering::Acquire)
    }

    /// Frames ever accepted, across rebases.
    pub fn frames_received(&self) -> u64 {
        (self.data.lock().len() / 2) as u64
    }

    /// Decode the accepted bytes back into samples.
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .lock()
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

/// Sink that consumes instantly (optionally throttled) and records
/// everything it accepts.
struct ProbeSink {
    probe: Arc<SinkProbe>,
    delay: Duration,
    spec: PcmSpec,
}

impl AudioSink for ProbeSink {
    fn start(&mut self) {
        self.probe.running.store(true, Ordering::Release);
    }

    fn stop(&mut self) {
        self.probe.running.store(false, Ordering::Release);
    }

    fn write(&mut self, data: &[u8], abort: &AtomicBool) -> Result<usize> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if abort.load(Ordering::Acquire) || !self.probe.running.load(Ordering::Acquire) {
            return Ok(0);
        }
        self.probe.data.lock().extend_from_slice(data);
        self.probe
            .consumed
            .fetch_add((data.len() / self.spec.frame_size()) as u64, Ordering::AcqRel);
        Ok(data.len())
    }

    fn drain(&mut self, _abort: &AtomicBool) {}

    fn flush(&mut self) {}

    fn buffer_size(&self) -> usize {
        4096
    }

    fn frame_position(&self) -> u64 {
        self.probe.frame_position()
    }

    fn set_frame_position(&mut self, frames: u64) {
        self.probe.base.store(frames, Ordering::Release);
        self.probe.consumed.store(0, Ordering::Release);
    }

    fn controls(&self) -> SinkControls {
        SinkControls {
            gain: Some(self.probe.gain.clone()),
            mute: Some(self.probe.mute.clone()),
            balance: Some(self.probe.balance.clone()),
        }
    }
}

/// Deterministic backend over [`PatternSource`] and [`ProbeSink`].
pub struct TestBackend {
    pub frames: u64,
    pub report_length: bool,
    pub write_delay: Duration,
    pub source_opens: AtomicUsize,
    probe: Mutex<Option<Arc<SinkProbe>>>,
}

impl TestBackend {
    pub fn new(frames: u64) -> Arc<Self> {
        Arc::new(Self {
            frames,
            report_length: true,
            write_delay: Duration::ZERO,
            source_opens: AtomicUsize::new(0),
            probe: Mutex::new(None),
        })
    }

    /// Like [`new`](Self::new) but the source reports no length, which
    /// forces the engine to pre-scan.
    pub fn without_length(frames: u64) -> Arc<Self> {
        Arc::new(Self {
            frames,
            report_length: false,
            write_delay: Duration::ZERO,
            source_opens: AtomicUsize::new(0),
            probe: Mutex::new(None),
        })
    }

    /// Like [`new`](Self::new) but every sink write sleeps, pacing the
    /// worker so tests can catch it mid-stream.
    pub fn throttled(frames: u64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            frames,
            report_length: true,
            write_delay: delay,
            source_opens: AtomicUsize::new(0),
            probe: Mutex::new(None),
        })
    }

    pub fn opens(&self) -> usize {
        self.source_opens.load(Ordering::SeqCst)
    }

    /// Probe of the most recently opened sink.
    pub fn probe(&self) -> Arc<SinkProbe> {
        Arc::clone(self.probe.lock().as_ref().expect("no sink opened yet"))
    }

    /// Like [`probe`](Self::probe), but `None` before the first open.
    pub fn try_probe(&self) -> Option<Arc<SinkProbe>> {
        self.probe.lock().clone()
    }
}

impl AudioBackend for TestBackend {
    fn open_source(&self, _resource: &Resource, _format: FileFormat) -> Result<Box<dyn PcmSource>> {
        self.source_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(PatternSource {
            spec: test_spec(),
            frames: self.frames,
            cursor: 0,
            report_length: self.report_length,
        }))
    }

    fn open_sink(&self, spec: &PcmSpec) -> Result<Box<dyn AudioSink>> {
        let probe = Arc::new(SinkProbe::new());
        *self.probe.lock() = Some(Arc::clone(&probe));
        Ok(Box::new(ProbeSink {
            probe,
            delay: self.write_delay,
            spec: *spec,
        }))
    }
}

/// Records every event dispatched to it.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<AudioEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(self: &Arc<Self>, audio: &dyn Audio) -> Uuid {
        let log = Arc::clone(self);
        audio.add_listener(Arc::new(move |event: &AudioEvent| {
            log.events.lock().push(event.clone());
        }))
    }

    pub fn kinds(&self) -> Vec<AudioEventKind> {
        self.events.lock().iter().map(|event| event.kind).collect()
    }

    pub fn count(&self, kind: AudioEventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }

    pub fn last_of(&self, kind: AudioEventKind) -> Option<AudioEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|event| event.kind == kind)
            .cloned()
    }
}

/// Handle over the deterministic backend, not yet opened.
pub fn streamed(backend: &Arc<TestBackend>) -> StreamedAudio {
    StreamedAudio::with_backend(
        Resource::file("track.wav"),
        Arc::clone(backend) as Arc<dyn AudioBackend>,
        test_config(),
    )
    .expect("known extension")
}

/// Poll until `condition` holds, panicking after five seconds.
pub fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}
