//! Audio decoding using symphonia.

use std::fs::File;
use std::io::Cursor;
use std::sync::Arc;

use aria_core::{Error, FileFormat, PcmSpec, Resource, Result};
use symphonia::core::{
    audio::AudioBufferRef,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    formats::{FormatOptions, FormatReader},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, error};

/// A forward-only stream of decoded PCM frames.
///
/// `read` fills the buffer with whole frames of interleaved signed
/// 16-bit little-endian samples and returns the number of bytes written;
/// `Ok(0)` signals end of stream. There is no random access: seeking is
/// done by the engine, by discarding frames (and reopening the source
/// for backward targets).
pub trait PcmSource: Send {
    /// The decoded PCM format of the stream.
    fn spec(&self) -> PcmSpec;

    /// Total frame count, if the container reports one. Streaming
    /// formats typically return `None` until pre-scanned.
    fn frame_count(&self) -> Option<u64>;

    /// Read up to `buf.len()` bytes of whole frames. `Ok(0)` = end.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// PCM source decoding a container through symphonia.
pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: PcmSpec,
    frame_count: Option<u64>,
    /// Decoded bytes not yet handed out.
    pending: Vec<u8>,
    pending_offset: usize,
    finished: bool,
}

impl SymphoniaSource {
    /// Open a resource with a declared container format.
    pub fn open(resource: &Resource, file_format: FileFormat) -> Result<Self> {
        let mss = match resource {
            Resource::File(path) => {
                let file = File::open(path)?;
                MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default())
            }
            Resource::Memory { data, .. } => {
                let cursor = Cursor::new(data.to_vec());
                MediaSourceStream::new(Box::new(cursor), MediaSourceStreamOptions::default())
            }
        };

        let mut hint = Hint::new();
        hint.with_extension(file_format.extensions()[0]);

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| Error::Decode(format!("Failed to probe format: {e}")))?;

        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
        #[allow(clippy::cast_possible_truncation)]
        let channels = track.codec_params.channels.map_or(2, |c| c.count() as u16);
        let frame_count = track.codec_params.n_frames;

        debug!(
            "Audio track: id={}, sample_rate={}, channels={}, frames={:?}",
            track_id, sample_rate, channels, frame_count
        );

        let decoder_opts = DecoderOptions::default();
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &decoder_opts)
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            spec: PcmSpec {
                sample_rate,
                channels,
                bits_per_sample: 16,
            },
            frame_count,
            pending: Vec::new(),
            pending_offset: 0,
            finished: false,
        })
    }

    /// Decode packets until at least one byte is pending or the stream ends.
    fn refill(&mut self) -> Result<()> {
        self.pending.clear();
        self.pending_offset = 0;

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(());
                }
                Err(e) => {
                    return Err(Error::Decode(format!("Failed to read packet: {e}")));
                }
            };

            // Skip packets for other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    audio_buffer_to_i16le(&decoded, &mut self.pending);
                    if !self.pending.is_empty() {
                        return Ok(());
                    }
                }
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    // Log and skip corrupt frames
                    error!("Decode error (skipping): {e}");
                }
                Err(e) => {
                    return Err(Error::Decode(format!("Decode failed: {e}")));
                }
            }
        }
    }
}

impl PcmSource for SymphoniaSource {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.spec.frame_size();
        if buf.len() < frame_size {
            return Ok(0);
        }

        if self.pending_offset >= self.pending.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
            if self.pending.is_empty() {
                return Ok(0);
            }
        }

        let available = self.pending.len() - self.pending_offset;
        // Whole frames only; decoded packets are always frame-aligned.
        let to_copy = (buf.len().min(available) / frame_size) * frame_size;
        buf[..to_copy]
            .copy_from_slice(&self.pending[self.pending_offset..self.pending_offset + to_copy]);
        self.pending_offset += to_copy;
        Ok(to_copy)
    }
}

/// Convert a decoded buffer to interleaved i16 little-endian bytes.
#[allow(clippy::cast_possible_truncation)]
fn audio_buffer_to_i16le(buffer: &AudioBufferRef<'_>, output: &mut Vec<u8>) {
    fn interleave<S, F>(planes: &[&[S]], output: &mut Vec<u8>, convert: F)
    where
        S: Copy,
        F: Fn(S) -> i16,
    {
        if planes.is_empty() {
            return;
        }
        let frames = planes[0].len();
        output.reserve(frames * planes.len() * 2);
        for frame in 0..frames {
            for plane in planes {
                output.extend_from_slice(&convert(plane[frame]).to_le_bytes());
            }
        }
    }

    match buffer {
        AudioBufferRef::S16(buf) => {
            interleave(buf.planes().planes(), output, |s| s);
        }
        AudioBufferRef::S32(buf) => {
            interleave(buf.planes().planes(), output, |s: i32| (s >> 16) as i16);
        }
        AudioBufferRef::U8(buf) => {
            interleave(buf.planes().planes(), output, |s: u8| {
                (i16::from(s) - 128) << 8
            });
        }
        AudioBufferRef::F32(buf) => {
            interleave(buf.planes().planes(), output, |s: f32| {
                (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
            });
        }
        AudioBufferRef::F64(buf) => {
            interleave(buf.planes().planes(), output, |s: f64| {
                (s.clamp(-1.0, 1.0) * f64::from(i16::MAX)) as i16
            });
        }
        _ => {
            // Remaining symphonia sample layouts are not produced by the
            // supported container formats.
        }
    }
}

/// PCM source over a fully decoded in-memory buffer.
///
/// Used by buffered playback: reopening is free and the frame count is
/// always known.
pub struct MemorySource {
    data: Arc<Vec<u8>>,
    spec: PcmSpec,
    position: usize,
}

impl MemorySource {
    /// Wrap a decoded PCM buffer. The buffer length must be a whole
    /// number of frames.
    pub fn new(data: Arc<Vec<u8>>, spec: PcmSpec) -> Self {
        Self {
            data,
            spec,
            position: 0,
        }
    }
}

impl PcmSource for MemorySource {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn frame_count(&self) -> Option<u64> {
        Some((self.data.len() / self.spec.frame_size()) as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.spec.frame_size();
        let available = self.data.len() - self.position;
        let to_copy = (buf.len().min(available) / frame_size) * frame_size;
        if to_copy == 0 {
            return Ok(0);
        }
        buf[..to_copy].copy_from_slice(&self.data[self.position..self.position + to_copy]);
        self.position += to_copy;
        Ok(to_copy)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn mono_spec() -> PcmSpec {
        PcmSpec {
            sample_rate: 8000,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    #[test]
    fn test_memory_source_reads_whole_frames() {
        let data: Vec<u8> = (0..10u8).collect();
        let mut source = MemorySource::new(Arc::new(data), mono_spec());
        assert_eq!(source.frame_count(), Some(5));

        let mut buf = [0u8; 3];
        // 3 bytes rounds down to one 2-byte frame
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[0, 1]);

        let mut rest = [0u8; 16];
        assert_eq!(source.read(&mut rest).unwrap(), 8);
        assert_eq!(source.read(&mut rest).unwrap(), 0);
    }

    #[test]
    fn test_memory_source_empty() {
        let mut source = MemorySource::new(Arc::new(Vec::new()), mono_spec());
        assert_eq!(source.frame_count(), Some(0));
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }
}
