//! Playback traits.
//!
//! `Playable` is the minimal transport surface shared by single tracks
//! and playlists; `Audio` is the full control surface of one decoded
//! resource. Both are object-safe so playlists can hold mixed
//! streamed and buffered tracks as `Arc<dyn Audio>`.

use std::sync::Arc;

use aria_core::{AudioEvent, FileFormat, PcmSpec, Resource, Result};
use uuid::Uuid;

use crate::listeners::AudioListener;

/// Loop forever when passed to [`Audio::loop_for`].
pub const LOOP_ENDLESS: i32 = -1;

/// Transport controls common to tracks and playlists.
pub trait Playable: Send + Sync {
    /// Start playback from the beginning. Restarts if already playing.
    fn play(&self) -> Result<()>;

    /// Stop playback and rewind to the start.
    fn stop(&self) -> Result<()>;

    /// Suspend playback, keeping the current position.
    fn pause(&self) -> Result<()>;

    /// Continue after [`pause`](Playable::pause). Falls back to
    /// [`play`](Playable::play) when nothing is paused.
    fn resume(&self) -> Result<()>;

    /// Set the master gain in decibels. The value is clamped to the
    /// device bounds; the applied value is returned.
    fn set_volume(&self, decibels: f32) -> f32;

    /// The current master gain in decibels.
    fn volume(&self) -> f32;

    fn set_mute(&self, mute: bool);

    fn is_muted(&self) -> bool;

    fn is_playing(&self) -> bool;
}

/// One openable, seekable audio resource.
pub trait Audio: Playable {
    /// Open the resource: build the decoder, probe the stream length
    /// and acquire the output device.
    fn open(&self) -> Result<()>;

    /// Stop playback and release the decoder and device.
    fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn is_paused(&self) -> bool;

    /// Play the stream `repetitions` times in a row, or forever for
    /// [`LOOP_ENDLESS`]. Restarts between repetitions are seamless on
    /// the device side.
    fn loop_for(&self, repetitions: i32) -> Result<()>;

    /// Shorthand for `loop_for(LOOP_ENDLESS)`.
    fn loop_endless(&self) -> Result<()> {
        self.loop_for(LOOP_ENDLESS)
    }

    /// Jump to a position in milliseconds.
    fn set_position(&self, millis: u64) -> Result<()>;

    /// Jump to a position in frames.
    fn set_frame_position(&self, frames: u64) -> Result<()>;

    /// Current playback position in milliseconds.
    fn position(&self) -> u64;

    /// Current playback position in frames, as consumed by the device.
    fn frame_position(&self) -> u64;

    /// Total stream length in milliseconds. `0` while closed.
    fn length(&self) -> u64;

    /// Total stream length in frames. `0` while closed.
    fn frame_length(&self) -> u64;

    /// Set the stereo balance in `-1.0..=1.0`; returns the applied
    /// value. Has no effect on mono streams.
    fn set_balance(&self, balance: f32) -> f32;

    fn balance(&self) -> f32;

    /// Size of the device buffer in bytes. `0` while closed.
    fn buffer_size(&self) -> usize;

    /// Decoded PCM format. `None` while closed.
    fn pcm_spec(&self) -> Option<PcmSpec>;

    /// Container format, resolved from the resource.
    fn file_format(&self) -> Result<FileFormat>;

    fn resource(&self) -> &Resource;

    /// Stable identity of this handle, used as the event source id.
    fn id(&self) -> Uuid;

    /// Register an event listener; returns a token for removal.
    fn add_listener(&self, listener: Arc<dyn AudioListener>) -> Uuid;

    fn remove_listener(&self, token: Uuid);
}

/// Convenience for closure listeners on any [`Audio`].
pub fn listen<A, F>(audio: &A, f: F) -> Uuid
where
    A: Audio + ?Sized,
    F: Fn(&AudioEvent) + Send + Sync + 'static,
{
    audio.add_listener(Arc::new(f))
}
