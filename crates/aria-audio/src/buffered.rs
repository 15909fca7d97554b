//! Fully-buffered playback.
//!
//! A `BufferedAudio` decodes its whole resource to PCM the first time a
//! decoder is needed and serves every subsequent open, loop restart and
//! backward seek from that buffer. Trades memory for instant restarts,
//! which suits short effects played often; long streams belong in
//! [`StreamedAudio`].

use std::sync::Arc;

use aria_core::{FileFormat, PcmSpec, Resource, Result};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::audio::{Audio, Playable};
use crate::config::PlayerConfig;
use crate::decode::{MemorySource, PcmSource};
use crate::listeners::AudioListener;
use crate::output::SymphoniaCpalBackend;
use crate::sink::{AudioBackend, AudioSink};
use crate::streamed::StreamedAudio;

#[derive(Clone)]
struct CachedPcm {
    data: Arc<Vec<u8>>,
    spec: PcmSpec,
}

/// Backend decorator that decodes the resource once and answers every
/// later `open_source` from memory.
struct CachingBackend {
    delegate: Arc<dyn AudioBackend>,
    cache: Mutex<Option<CachedPcm>>,
}

impl CachingBackend {
    fn fill(&self, resource: &Resource, format: FileFormat) -> Result<CachedPcm> {
        let mut source = self.delegate.open_source(resource, format)?;
        let spec = source.spec();
        let mut data = match source.frame_count() {
            Some(frames) => {
                Vec::with_capacity(usize::try_from(frames).unwrap_or(0) * spec.frame_size())
            }
            None => Vec::new(),
        };
        let mut scratch = vec![0u8; 64 * 1024 / spec.frame_size() * spec.frame_size()];
        loop {
            let read = source.read(&mut scratch)?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&scratch[..read]);
        }
        debug!(
            "Buffered {} bytes of PCM from {}",
            data.len(),
            resource.describe()
        );
        Ok(CachedPcm {
            data: Arc::new(data),
            spec,
        })
    }
}

impl AudioBackend for CachingBackend {
    fn open_source(&self, resource: &Resource, format: FileFormat) -> Result<Box<dyn PcmSource>> {
        let mut cache = self.cache.lock();
        let entry = match cache.as_ref() {
            Some(entry) => entry.clone(),
            None => {
                let entry = self.fill(resource, format)?;
                *cache = Some(entry.clone());
                entry
            }
        };
        Ok(Box::new(MemorySource::new(entry.data, entry.spec)))
    }

    fn open_sink(&self, spec: &PcmSpec) -> Result<Box<dyn AudioSink>> {
        self.delegate.open_sink(spec)
    }
}

/// Playback of a resource decoded entirely into memory.
pub struct BufferedAudio {
    engine: StreamedAudio,
}

impl BufferedAudio {
    /// Create a handle with the default device backend. Nothing is
    /// decoded until [`Audio::open`].
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

    /// Create a handle decoding through an explicit backend.
    pub fn with_backend(
        resource: Resource,
        backend: Arc<dyn AudioBackend>,
        config: PlayerConfig,
    ) -> Result<Self> {
        let caching = Arc::new(CachingBackend {
            delegate: backend,
            cache: Mutex::new(None),
        });
        Ok(Self {
            engine: StreamedAudio::with_backend(resource, caching, config)?,
        })
    }
}

impl Playable for BufferedAudio {
    fn play(&self) -> Result<()> {
        self.engine.play()
    }

    fn stop(&self) -> Result<()> {
        self.engine.stop()
    }

    fn pause(&self) -> Result<()> {
        self.engine.pause()
    }

    fn resume(&self) -> Result<()> {
        self.engine.resume()
    }

    fn set_volume(&self, decibels: f32) -> f32 {
        self.engine.set_volume(decibels)
    }

    fn volume(&self) -> f32 {
        self.engine.volume()
    }

    fn set_mute(&self, mute: bool) {
        self.engine.set_mute(mute);
    }

    fn is_muted(&self) -> bool {
        self.engine.is_muted()
    }

    fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }
}

impl Audio for BufferedAudio {
    fn open(&self) -> Result<()> {
        self.engine.open()
    }

    fn close(&self) -> Result<()> {
        self.engine.close()
    }

    fn is_open(&self) -> bool {
        self.engine.is_open()
    }

    fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    fn loop_for(&self, repetitions: i32) -> Result<()> {
        self.engine.loop_for(repetitions)
    }

    fn set_position(&self, millis: u64) -> Result<()> {
        self.engine.set_position(millis)
    }

    fn set_frame_position(&self, frames: u64) -> Result<()> {
        self.engine.set_frame_position(frames)
    }

    fn position(&self) -> u64 {
        self.engine.position()
    }

    fn frame_position(&self) -> u64 {
        self.engine.frame_position()
    }

    fn length(&self) -> u64 {
        self.engine.length()
    }

    fn frame_length(&self) -> u64 {
        self.engine.frame_length()
    }

    fn set_balance(&self, balance: f32) -> f32 {
        self.engine.set_balance(balance)
    }

    fn balance(&self) -> f32 {
        self.engine.balance()
    }

    fn buffer_size(&self) -> usize {
        self.engine.buffer_size()
    }

    fn pcm_spec(&self) -> Option<PcmSpec> {
        self.engine.pcm_spec()
    }

    fn file_format(&self) -> Result<FileFormat> {
        self.engine.file_format()
    }

    fn resource(&self) -> &Resource {
        self.engine.resource()
    }

    fn id(&self) -> Uuid {
        self.engine.id()
    }

    fn add_listener(&self, listener: Arc<dyn AudioListener>) -> Uuid {
        self.engine.add_listener(listener)
    }

    fn remove_listener(&self, token: Uuid) {
        self.engine.remove_listener(token);
    }
}

impl std::fmt::Debug for BufferedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedAudio")
            .field("id", &self.id())
            .field("resource", &self.resource().describe())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        opens: AtomicUsize,
    }

    struct SilentSource {
        left: usize,
    }

    impl PcmSource for SilentSource {
        fn spec(&self) -> PcmSpec {
            PcmSpec::default()
        }

        fn frame_count(&self) -> Option<u64> {
            Some((self.left / PcmSpec::default().frame_size()) as u64)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.left);
            buf[..n].fill(0);
            self.left -= n;
            Ok(n)
        }
    }

    impl AudioBackend for CountingBackend {
        fn open_source(
            &self,
            _resource: &Resource,
            _format: FileFormat,
        ) -> Result<Box<dyn PcmSource>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SilentSource { left: 4096 }))
        }

        fn open_sink(&self, _spec: &PcmSpec) -> Result<Box<dyn AudioSink>> {
            unreachable!("not opened in this test")
        }
    }

    #[test]
    fn test_cache_decodes_once() {
        let counting = Arc::new(CountingBackend {
            opens: AtomicUsize::new(0),
        });
        let backend = CachingBackend {
            delegate: Arc::clone(&counting) as Arc<dyn AudioBackend>,
            cache: Mutex::new(None),
        };
        let resource = Resource::file("sound.wav");

        for _ in 0..3 {
            let mut source = backend.open_source(&resource, FileFormat::Wav).unwrap();
            let mut buf = vec![0u8; 8192];
            assert_eq!(source.read(&mut buf).unwrap(), 4096);
        }

        assert_eq!(counting.opens.load(Ordering::SeqCst), 1);
        let cache = backend.cache.lock();
        assert_eq!(cache.as_ref().map(|entry| entry.data.len()), Some(4096));
    }
}
