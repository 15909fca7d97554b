//! Streaming playback engine.
//!
//! A `StreamedAudio` decodes its resource incrementally: a background
//! worker thread reads one chunk of PCM at a time and writes it to the
//! device sink, whose bounded buffer provides the back-pressure pacing
//! the decode. Control operations run on caller threads and coordinate
//! with the worker through atomic flags, a pause condvar and the session
//! mutex; the worker is shut down cooperatively and never joined, so
//! listeners may call back into the same handle from event dispatch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use aria_core::{
    AudioEvent, AudioEventKind, Error, EventValue, FileFormat, PcmSpec, Resource, Result,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::audio::{Audio, Playable, LOOP_ENDLESS};
use crate::config::PlayerConfig;
use crate::decode::PcmSource;
use crate::listeners::{AudioListener, ListenerSet};
use crate::output::SymphoniaCpalBackend;
use crate::sink::{AudioBackend, AudioSink, SinkControls};

/// Scratch size for skipping and pre-scanning, rounded down to whole
/// frames before use.
const SCAN_CHUNK_BYTES: usize = 16 * 1024;

/// Flags shared between control threads and the playback worker.
struct PlayerState {
    open: AtomicBool,
    playing: AtomicBool,
    paused: AtomicBool,
    looping: AtomicBool,
    /// Aborts a blocking sink write so a control operation can take the
    /// session mutex promptly.
    interrupt: AtomicBool,
    /// Bumped whenever the decode stream rewinds or seeks; the worker
    /// discards chunks decoded under an older epoch.
    epoch: AtomicU64,
    pause_lock: Mutex<()>,
    pause_cond: Condvar,
}

impl PlayerState {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            interrupt: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            pause_lock: Mutex::new(()),
            pause_cond: Condvar::new(),
        }
    }
}

/// The decoder and device of one open handle. Guarded by a mutex;
/// the worker holds it per chunk, control operations for short calls.
struct Session {
    source: Box<dyn PcmSource>,
    sink: Box<dyn AudioSink>,
    spec: PcmSpec,
}

/// Control values remembered across close/reopen and applied to the
/// sink controls whenever a session is built.
struct ControlValues {
    gain_db: f32,
    muted: bool,
    balance: f32,
}

impl Default for ControlValues {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            muted: false,
            balance: 0.0,
        }
    }
}

struct Inner {
    id: Uuid,
    resource: Resource,
    format: FileFormat,
    backend: Arc<dyn AudioBackend>,
    config: PlayerConfig,
    state: PlayerState,
    session: Mutex<Option<Session>>,
    /// Clone of the open sink's controls, kept outside the session so
    /// volume changes never wait behind a blocking device write.
    controls: Mutex<SinkControls>,
    values: Mutex<ControlValues>,
    listeners: ListenerSet,
    frame_length: AtomicU64,
    /// Frames read from the decoder since the last rewind. Ahead of the
    /// device position by whatever is still buffered.
    decode_cursor: AtomicU64,
    /// Set when a pass reaches its natural end and the rewind to frame
    /// zero has not happened yet; any reposition clears it.
    pending_rewind: AtomicBool,
    /// Shutdown token of the live worker, if any.
    worker: Mutex<Option<Arc<AtomicBool>>>,
    /// Serializes compound control operations against each other.
    /// Never held while dispatching events and never taken by the
    /// worker.
    ops: Mutex<()>,
}

impl Inner {
    fn dispatch(&self, kind: AudioEventKind, old: Option<EventValue>, new: Option<EventValue>) {
        if self.listeners.is_empty() {
            return;
        }
        self.listeners.dispatch(&AudioEvent {
            source: self.id,
            kind,
            old_value: old,
            new_value: new,
        });
    }

    fn wake(&self) {
        let _guard = self.state.pause_lock.lock();
        self.state.pause_cond.notify_all();
    }

    /// Take the session mutex, aborting any blocking write the worker
    /// is currently sitting in.
    fn lock_session_interrupting(&self) -> parking_lot::MutexGuard<'_, Option<Session>> {
        self.state.interrupt.store(true, Ordering::Release);
        let guard = self.session.lock();
        self.state.interrupt.store(false, Ordering::Release);
        guard
    }

    /// Retire the live worker. The worker observes its token at the top
    /// of every iteration and inside the session critical section, so
    /// once this returns it will not touch the session again; it is not
    /// joined, allowing retirement from the worker's own thread.
    fn halt_worker(&self) {
        if let Some(shutdown) = self.worker.lock().take() {
            shutdown.store(true, Ordering::Release);
        }
        self.state.interrupt.store(true, Ordering::Release);
        self.wake();
        drop(self.session.lock());
        self.state.interrupt.store(false, Ordering::Release);
    }

    fn clear_worker_slot(&self, token: &Arc<AtomicBool>) {
        let mut slot = self.worker.lock();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, token)) {
            *slot = None;
        }
    }

    /// Reopen the decoder at frame zero, keeping the device. Buffered
    /// audio is discarded and the reported position rebased.
    fn rewind(&self, session: &mut Session) -> Result<()> {
        session.source = self.backend.open_source(&self.resource, self.format)?;
        self.decode_cursor.store(0, Ordering::Release);
        self.pending_rewind.store(false, Ordering::Release);
        self.state.epoch.fetch_add(1, Ordering::AcqRel);
        session.sink.flush();
        session.sink.set_frame_position(0);
        Ok(())
    }

    /// Build the decoder and sink for this resource.
    fn open_session(&self) -> Result<()> {
        let mut source = self.backend.open_source(&self.resource, self.format)?;
        let spec = source.spec();

        let frames = match source.frame_count() {
            Some(frames) => frames,
            None => {
                // The container cannot report a length up front: decode
                // to the end once, counting frames, then reopen. Costs a
                // full decode pass for such formats.
                debug!("Length not reported, pre-scanning {}", self.resource.describe());
                let frames = count_frames(source.as_mut(), &spec)?;
                source = self.backend.open_source(&self.resource, self.format)?;
                frames
            }
        };

        let sink = self.backend.open_sink(&spec)?;
        let controls = sink.controls();
        self.apply_cached_values(&controls);
        *self.controls.lock() = controls;

        self.frame_length.store(frames, Ordering::Release);
        self.decode_cursor.store(0, Ordering::Release);
        self.pending_rewind.store(false, Ordering::Release);
        *self.session.lock() = Some(Session { source, sink, spec });
        Ok(())
    }

    /// Push the remembered volume, mute and balance into a fresh sink,
    /// keeping the clamped values the device actually accepted.
    fn apply_cached_values(&self, controls: &SinkControls) {
        let mut values = self.values.lock();
        if let Some(gain) = &controls.gain {
            values.gain_db = gain.set(values.gain_db);
        }
        if let Some(mute) = &controls.mute {
            mute.set(values.muted);
        }
        if let Some(balance) = &controls.balance {
            values.balance = balance.set(values.balance);
        }
    }

    /// Tear the handle down after an unrecoverable worker error.
    fn fail_close(&self, token: &Arc<AtomicBool>) {
        self.state.playing.store(false, Ordering::Release);
        self.state.looping.store(false, Ordering::Release);
        self.state.paused.store(false, Ordering::Release);
        self.clear_worker_slot(token);
        {
            let mut guard = self.session.lock();
            if let Some(mut session) = guard.take() {
                session.sink.stop();
            }
        }
        *self.controls.lock() = SinkControls::default();
        self.state.open.store(false, Ordering::Release);
        self.frame_length.store(0, Ordering::Release);
        self.decode_cursor.store(0, Ordering::Release);
        self.dispatch(AudioEventKind::Closed, None, None);
    }
}

/// Streamed playback of one audio resource.
///
/// Decodes on demand, so arbitrarily long streams play with a small,
/// bounded memory footprint. For short sounds played often, prefer
/// [`BufferedAudio`](crate::BufferedAudio), which decodes once.
pub struct StreamedAudio {
    inner: Arc<Inner>,
}

impl StreamedAudio {
    /// Create a handle over a resource with the default device backend.
    /// The container format is resolved (and validated) here; nothing
    /// is decoded until [`Audio::open`].
    pub fn new(resource: Resource) -> Result<Self> {
        Self::with_backend(
            resource,
            Arc::new(SymphoniaCpalBackend::default()),
            PlayerConfig::default(),
        )
    }

    /// Create a handle with explicit engine tuning.
    pub fn with_config(resource: Resource, config: PlayerConfig) -> Result<Self> {
        Self::with_backend(
            resource,
            Arc::new(SymphoniaCpalBackend::new(config.sink_buffer_frames)),
            config,
        )
    }

    /// Create a handle over an explicit backend. This is the seam used
    /// by [`BufferedAudio`](crate::BufferedAudio) and by tests.
    pub fn with_backend(
        resource: Resource,
        backend: Arc<dyn AudioBackend>,
        config: PlayerConfig,
    ) -> Result<Self> {
        let format = resource.file_format()?;
        Ok(Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                resource,
                format,
                backend,
                config,
                state: PlayerState::new(),
                session: Mutex::new(None),
                controls: Mutex::new(SinkControls::default()),
                values: Mutex::new(ControlValues::default()),
                listeners: ListenerSet::new(),
                frame_length: AtomicU64::new(0),
                decode_cursor: AtomicU64::new(0),
                pending_rewind: AtomicBool::new(false),
                worker: Mutex::new(None),
                ops: Mutex::new(()),
            }),
        })
    }

    /// Start a worker playing `repetitions` passes over the stream.
    fn begin(&self, repetitions: i32, looping: bool) -> Result<()> {
        {
            let _ops = self.inner.ops.lock();
            if !self.inner.state.open.load(Ordering::Acquire) {
                return Err(Error::NotOpen);
            }
            let was_active = self.inner.state.playing.load(Ordering::Acquire)
                || self.inner.state.paused.load(Ordering::Acquire);
            self.inner.halt_worker();
            {
                let mut guard = self.inner.session.lock();
                let Some(session) = guard.as_mut() else {
                    return Err(Error::NotOpen);
                };
                if was_active || self.inner.pending_rewind.load(Ordering::Acquire) {
                    // Implicit restart from the top.
                    self.inner.rewind(session)?;
                }
                session.sink.start();
            }
            self.inner.state.paused.store(false, Ordering::Release);
            self.inner.state.looping.store(looping, Ordering::Release);
            self.inner.state.playing.store(true, Ordering::Release);
            if let Err(e) = self.spawn_worker(repetitions) {
                self.inner.state.playing.store(false, Ordering::Release);
                self.inner.state.looping.store(false, Ordering::Release);
                *self.inner.worker.lock() = None;
                return Err(e);
            }
        }
        self.inner.dispatch(AudioEventKind::Started, None, None);
        Ok(())
    }

    fn spawn_worker(&self, repetitions: i32) -> Result<()> {
        let shutdown = Arc::new(AtomicBool::new(false));
        *self.inner.worker.lock() = Some(Arc::clone(&shutdown));
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("aria-playback".to_string())
            .spawn(move || playback_worker(&inner, &shutdown, repetitions))
            .map_err(|e| Error::Device(format!("Failed to spawn playback thread: {e}")))?;
        Ok(())
    }
}

impl Playable for StreamedAudio {
    fn play(&self) -> Result<()> {
        self.begin(1, false)
    }

    fn stop(&self) -> Result<()> {
        let was_active;
        let old;
        {
            let _ops = self.inner.ops.lock();
            if !self.inner.state.open.load(Ordering::Acquire) {
                return Ok(());
            }
            was_active = self.inner.state.playing.load(Ordering::Acquire)
                || self.inner.state.paused.load(Ordering::Acquire);
            self.inner.state.playing.store(false, Ordering::Release);
            self.inner.state.looping.store(false, Ordering::Release);
            self.inner.state.paused.store(false, Ordering::Release);
            self.inner.halt_worker();
            let mut guard = self.inner.session.lock();
            old = match guard.as_mut() {
                Some(session) => {
                    let position = session.sink.frame_position();
                    session.sink.stop();
                    self.inner.rewind(session)?;
                    position
                }
                None => 0,
            };
        }
        if was_active {
            self.inner.dispatch(AudioEventKind::Stopped, None, None);
        }
        if old != 0 {
            self.inner.dispatch(
                AudioEventKind::PositionChanged,
                Some(EventValue::Frames(old)),
                Some(EventValue::Frames(0)),
            );
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        let ended;
        {
            let _ops = self.inner.ops.lock();
            if !self.inner.state.open.load(Ordering::Acquire) {
                return Err(Error::NotOpen);
            }
            if !self.inner.state.playing.load(Ordering::Acquire)
                || self.inner.state.paused.load(Ordering::Acquire)
            {
                return Ok(());
            }
            // Park the worker first, then silence the device; buffered
            // audio stays in the sink for resume. The paused flag goes up
            // before playing comes down so the worker never mistakes an
            // in-flight pause for a stop.
            self.inner.state.paused.store(true, Ordering::Release);
            self.inner.state.playing.store(false, Ordering::Release);
            let mut guard = self.inner.lock_session_interrupting();
            // The stream may have run out while we waited for the
            // session; the worker retires under this lock, so a missing
            // slot means there is nothing left to pause.
            ended = self.inner.worker.lock().is_none();
            if ended {
                self.inner.state.paused.store(false, Ordering::Release);
            } else if let Some(session) = guard.as_mut() {
                session.sink.stop();
            }
        }
        if !ended {
            self.inner.dispatch(AudioEventKind::Paused, None, None);
        }
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        {
            let ops = self.inner.ops.lock();
            if !self.inner.state.open.load(Ordering::Acquire) {
                return Err(Error::NotOpen);
            }
            if !self.inner.state.paused.load(Ordering::Acquire) {
                // Nothing is paused: behave like play(). Kept for
                // callers treating resume as "make sound now".
                drop(ops);
                return self.play();
            }
            {
                let mut guard = self.inner.session.lock();
                if let Some(session) = guard.as_mut() {
                    session.sink.start();
                }
            }
            self.inner.state.playing.store(true, Ordering::Release);
            self.inner.state.paused.store(false, Ordering::Release);
            self.inner.wake();
        }
        self.inner.dispatch(AudioEventKind::Resumed, None, None);
        Ok(())
    }

    fn set_volume(&self, decibels: f32) -> f32 {
        let old;
        let applied;
        {
            let _ops = self.inner.ops.lock();
            let mut values = self.inner.values.lock();
            old = values.gain_db;
            applied = match &self.inner.controls.lock().gain {
                Some(control) => control.set(decibels),
                // Closed: remember verbatim, clamp on reopen.
                None => decibels,
            };
            values.gain_db = applied;
        }
        if (applied - old).abs() > f32::EPSILON {
            self.inner.dispatch(
                AudioEventKind::VolumeChanged,
                Some(EventValue::Gain(old)),
                Some(EventValue::Gain(applied)),
            );
        }
        applied
    }

    fn volume(&self) -> f32 {
        self.inner.values.lock().gain_db
    }

    fn set_mute(&self, mute: bool) {
        let changed;
        {
            let _ops = self.inner.ops.lock();
            let mut values = self.inner.values.lock();
            changed = values.muted != mute;
            values.muted = mute;
            if let Some(control) = &self.inner.controls.lock().mute {
                control.set(mute);
            }
        }
        if changed {
            self.inner.dispatch(
                AudioEventKind::MuteChanged,
                Some(EventValue::Muted(!mute)),
                Some(EventValue::Muted(mute)),
            );
        }
    }

    fn is_muted(&self) -> bool {
        self.inner.values.lock().muted
    }

    fn is_playing(&self) -> bool {
        self.inner.state.playing.load(Ordering::Acquire)
    }
}

impl Audio for StreamedAudio {
    fn open(&self) -> Result<()> {
        {
            let _ops = self.inner.ops.lock();
            if self.inner.state.open.load(Ordering::Acquire) {
                return Ok(());
            }
            self.inner.open_session()?;
            self.inner.state.open.store(true, Ordering::Release);
        }
        self.inner.dispatch(AudioEventKind::Opened, None, None);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        {
            let _ops = self.inner.ops.lock();
            if !self.inner.state.open.load(Ordering::Acquire) {
                return Ok(());
            }
            self.inner.state.playing.store(false, Ordering::Release);
            self.inner.state.looping.store(false, Ordering::Release);
            self.inner.state.paused.store(false, Ordering::Release);
            self.inner.halt_worker();
            {
                let mut guard = self.inner.session.lock();
                if let Some(mut session) = guard.take() {
                    session.sink.stop();
                }
            }
            *self.inner.controls.lock() = SinkControls::default();
            self.inner.state.open.store(false, Ordering::Release);
            self.inner.frame_length.store(0, Ordering::Release);
            self.inner.decode_cursor.store(0, Ordering::Release);
        }
        self.inner.dispatch(AudioEventKind::Closed, None, None);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.state.open.load(Ordering::Acquire)
    }

    fn is_paused(&self) -> bool {
        self.inner.state.paused.load(Ordering::Acquire)
    }

    fn loop_for(&self, repetitions: i32) -> Result<()> {
        if repetitions == 0 {
            return Ok(());
        }
        let repetitions = if repetitions < 0 { LOOP_ENDLESS } else { repetitions };
        self.begin(repetitions, true)
    }

    fn set_position(&self, millis: u64) -> Result<()> {
        let spec = self.pcm_spec().ok_or(Error::NotOpen)?;
        self.set_frame_position(spec.millis_to_frames(millis))
    }

    fn set_frame_position(&self, frames: u64) -> Result<()> {
        let old;
        let reached;
        {
            let _ops = self.inner.ops.lock();
            if !self.inner.state.open.load(Ordering::Acquire) {
                return Err(Error::NotOpen);
            }
            let running = self.inner.state.playing.load(Ordering::Acquire)
                && !self.inner.state.paused.load(Ordering::Acquire);
            let target = frames.min(self.inner.frame_length.load(Ordering::Acquire));

            let mut guard = self.inner.lock_session_interrupting();
            let Some(session) = guard.as_mut() else {
                return Err(Error::NotOpen);
            };
            old = session.sink.frame_position();
            if running {
                session.sink.stop();
            }
            session.sink.flush();
            self.inner.state.epoch.fetch_add(1, Ordering::AcqRel);

            // The decoder only moves forward: reopen when the target is
            // behind the decode cursor, then skip the difference.
            let mut cursor = self.inner.decode_cursor.load(Ordering::Acquire);
            if target < cursor {
                session.source = self
                    .inner
                    .backend
                    .open_source(&self.inner.resource, self.inner.format)?;
                cursor = 0;
            }
            let skipped = skip_frames(session, target - cursor)?;
            reached = cursor + skipped;
            self.inner.decode_cursor.store(reached, Ordering::Release);
            self.inner.pending_rewind.store(false, Ordering::Release);
            session.sink.set_frame_position(reached);
            if running {
                session.sink.start();
            }
        }
        if old != reached {
            self.inner.dispatch(
                AudioEventKind::PositionChanged,
                Some(EventValue::Frames(old)),
                Some(EventValue::Frames(reached)),
            );
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        match self.pcm_spec() {
            Some(spec) => spec.frames_to_millis(self.frame_position()),
            None => 0,
        }
    }

    fn frame_position(&self) -> u64 {
        self.inner
            .session
            .lock()
            .as_ref()
            .map_or(0, |session| session.sink.frame_position())
    }

    fn length(&self) -> u64 {
        match self.pcm_spec() {
            Some(spec) => spec.frames_to_millis(self.frame_length()),
            None => 0,
        }
    }

    fn frame_length(&self) -> u64 {
        self.inner.frame_length.load(Ordering::Acquire)
    }

    fn set_balance(&self, balance: f32) -> f32 {
        let _ops = self.inner.ops.lock();
        let mut values = self.inner.values.lock();
        let applied = match &self.inner.controls.lock().balance {
            Some(control) => control.set(balance),
            None => balance.clamp(-1.0, 1.0),
        };
        values.balance = applied;
        applied
    }

    fn balance(&self) -> f32 {
        self.inner.values.lock().balance
    }

    fn buffer_size(&self) -> usize {
        self.inner
            .session
            .lock()
            .as_ref()
            .map_or(0, |session| session.sink.buffer_size())
    }

    fn pcm_spec(&self) -> Option<PcmSpec> {
        self.inner.session.lock().as_ref().map(|session| session.spec)
    }

    fn file_format(&self) -> Result<FileFormat> {
        Ok(self.inner.format)
    }

    fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    fn id(&self) -> Uuid {
        self.inner.id
    }

    fn add_listener(&self, listener: Arc<dyn AudioListener>) -> Uuid {
        self.inner.listeners.add(listener)
    }

    fn remove_listener(&self, token: Uuid) {
        self.inner.listeners.remove(token);
    }
}

impl Drop for StreamedAudio {
    fn drop(&mut self) {
        if self.inner.state.open.load(Ordering::Acquire) {
            if let Err(e) = self.close() {
                warn!("Close on drop failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for StreamedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedAudio")
            .field("id", &self.inner.id)
            .field("resource", &self.inner.resource.describe())
            .field("open", &self.is_open())
            .field("playing", &self.is_playing())
            .finish()
    }
}

/// Decode-and-write loop. One worker is alive per `play`/`loop_for`;
/// `shutdown` is its retirement token.
fn playback_worker(inner: &Arc<Inner>, shutdown: &Arc<AtomicBool>, repetitions: i32) {
    let mut carry: Vec<u8> = Vec::new();
    let mut carry_epoch = inner.state.epoch.load(Ordering::Acquire);
    let mut completed: i32 = 0;

    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }

        if inner.state.paused.load(Ordering::Acquire) {
            let mut guard = inner.state.pause_lock.lock();
            while inner.state.paused.load(Ordering::Acquire)
                && !shutdown.load(Ordering::Acquire)
            {
                inner.state.pause_cond.wait(&mut guard);
            }
            continue;
        }

        if !inner.state.playing.load(Ordering::Acquire) {
            // pause() raises the paused flag before it clears playing;
            // an in-flight pause parks instead of retiring the worker.
            if inner.state.paused.load(Ordering::Acquire) {
                continue;
            }
            return;
        }

        let mut guard = inner.session.lock();
        // Re-checked under the lock: a control op that halted this
        // worker may have mutated the session before we got here.
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        let Some(session) = guard.as_mut() else {
            return;
        };

        if carry_epoch != inner.state.epoch.load(Ordering::Acquire) {
            // Decoded before a seek or rewind; stale.
            carry.clear();
        }

        if carry.is_empty() {
            carry_epoch = inner.state.epoch.load(Ordering::Acquire);
            let frame_size = session.spec.frame_size();
            let mut chunk = vec![0u8; inner.config.chunk_frames * frame_size];
            match session.source.read(&mut chunk) {
                Ok(0) => {
                    // End of stream. Let the device finish the tail so
                    // the event fires at the audible end.
                    session.sink.drain(&inner.state.interrupt);
                    if inner.state.paused.load(Ordering::Acquire) {
                        // A pause landed during the drain; park and
                        // deliver the end of the pass after resume.
                        drop(guard);
                        continue;
                    }
                    completed = completed.saturating_add(1);
                    let more = inner.state.looping.load(Ordering::Acquire)
                        && (repetitions == LOOP_ENDLESS || completed < repetitions);
                    if more {
                        // Listeners observe the end-of-pass position;
                        // the stream rewinds afterwards.
                        drop(guard);
                        inner.dispatch(AudioEventKind::ReachedEnd, None, None);
                        let mut guard = inner.session.lock();
                        if shutdown.load(Ordering::Acquire) {
                            return;
                        }
                        let Some(session) = guard.as_mut() else {
                            return;
                        };
                        match inner.rewind(session) {
                            Ok(()) => continue,
                            Err(e) => {
                                drop(guard);
                                error!("Loop restart failed: {e}");
                                inner.fail_close(shutdown);
                                return;
                            }
                        }
                    }
                    inner.state.playing.store(false, Ordering::Release);
                    inner.state.looping.store(false, Ordering::Release);
                    session.sink.stop();
                    // Retire under the session lock so a pause waiting
                    // for it sees the worker gone.
                    inner.clear_worker_slot(shutdown);
                    inner.pending_rewind.store(true, Ordering::Release);
                    drop(guard);
                    inner.dispatch(AudioEventKind::ReachedEnd, None, None);
                    // Leave the handle open, rewound to frame zero,
                    // unless a control op repositioned it meanwhile.
                    let mut guard = inner.session.lock();
                    if inner.pending_rewind.load(Ordering::Acquire) {
                        if let Some(session) = guard.as_mut() {
                            if let Err(e) = inner.rewind(session) {
                                warn!("Rewind after end of stream failed: {e}");
                            }
                        }
                    }
                    return;
                }
                Ok(read) => {
                    chunk.truncate(read);
                    inner
                        .decode_cursor
                        .fetch_add((read / frame_size) as u64, Ordering::AcqRel);
                    carry = chunk;
                }
                Err(e) => {
                    drop(guard);
                    error!("Decode failed: {e}");
                    inner.fail_close(shutdown);
                    return;
                }
            }
        }

        match session.sink.write(&carry, &inner.state.interrupt) {
            Ok(written) => {
                // Partial on interruption; the rest is retried once the
                // flags settle.
                carry.drain(..written);
            }
            Err(e) => {
                drop(guard);
                error!("Device write failed: {e}");
                inner.fail_close(shutdown);
                return;
            }
        }
    }
}

/// Read and discard `frames` frames; returns how many were actually
/// skipped (fewer if the stream ends first).
fn skip_frames(session: &mut Session, frames: u64) -> Result<u64> {
    let frame_size = session.spec.frame_size();
    let mut scratch = vec![0u8; SCAN_CHUNK_BYTES / frame_size * frame_size];
    let mut skipped = 0u64;
    while skipped < frames {
        let want = usize::try_from((frames - skipped).saturating_mul(frame_size as u64))
            .unwrap_or(usize::MAX)
            .min(scratch.len());
        let read = session.source.read(&mut scratch[..want])?;
        if read == 0 {
            break;
        }
        skipped += (read / frame_size) as u64;
    }
    Ok(skipped)
}

/// Decode a stream to the end, counting frames.
fn count_frames(source: &mut dyn PcmSource, spec: &PcmSpec) -> Result<u64> {
    let frame_size = spec.frame_size();
    let mut scratch = vec![0u8; SCAN_CHUNK_BYTES / frame_size * frame_size];
    let mut bytes = 0u64;
    loop {
        let read = source.read(&mut scratch)?;
        if read == 0 {
            break;
        }
        bytes += read as u64;
    }
    Ok(bytes / frame_size as u64)
}
