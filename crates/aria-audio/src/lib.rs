//! # aria-audio
//!
//! Streaming audio playback engine for aria.
//!
//! Features:
//! - Streamed playback with a background decode-and-write worker
//! - Fully-buffered playback for short sound effects
//! - Playlist chaining driven by end-of-stream events
//! - Lock-free ring buffer between the worker and the cpal output callback
//! - Simple PCM recording from an input device

pub mod audio;
pub mod buffer;
pub mod buffered;
pub mod config;
pub mod decode;
pub mod listeners;
pub mod output;
pub mod playlist;
pub mod recorder;
pub mod sink;
pub mod streamed;

pub use audio::{listen, Audio, Playable, LOOP_ENDLESS};
pub use buffered::BufferedAudio;
pub use config::PlayerConfig;
pub use decode::{MemorySource, PcmSource, SymphoniaSource};
pub use listeners::{AudioListener, ListenerSet};
pub use output::{default_device_name, list_output_devices, SymphoniaCpalBackend};
pub use playlist::Playlist;
pub use recorder::{Recorder, RecordingListener};
pub use sink::{AudioBackend, AudioSink, BoolControl, FloatControl, SinkControls};
pub use streamed::StreamedAudio;
