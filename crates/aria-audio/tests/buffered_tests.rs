//! Fully-buffered playback: the decoder runs once, everything else is
//! served from memory.

mod common;

use std::sync::Arc;

use aria_audio::{Audio, AudioBackend, BufferedAudio};
use aria_core::{AudioEventKind, Resource};

use common::{sample_at, test_config, wait_until, EventLog, TestBackend};

fn buffered(backend: &Arc<TestBackend>) -> BufferedAudio {
    BufferedAudio::with_backend(
        Resource::file("effect.wav"),
        Arc::clone(backend) as Arc<dyn AudioBackend>,
        test_config(),
    )
    .unwrap()
}

#[test]
fn the_decoder_runs_exactly_once() {
    let backend = TestBackend::new(200);
    let audio = buffered(&backend);
    let log = EventLog::new();
    log.attach(&audio);

    audio.open().unwrap();
    assert_eq!(backend.opens(), 1);
    assert_eq!(audio.frame_length(), 200);

    // Backward seeks reopen the source, but from memory.
    audio.set_frame_position(150).unwrap();
    audio.set_frame_position(20).unwrap();
    assert_eq!(backend.opens(), 1);
    assert_eq!(audio.frame_position(), 20);

    // Loop restarts reopen the source too.
    audio.set_frame_position(0).unwrap();
    audio.loop_for(2).unwrap();
    wait_until("two passes", || {
        log.count(AudioEventKind::ReachedEnd) == 2
    });
    assert_eq!(backend.opens(), 1);

    let samples = backend.probe().samples();
    assert_eq!(samples.len(), 400);
    for (i, sample) in samples.iter().enumerate() {
        assert_eq!(*sample, sample_at(i as u64 % 200));
    }
}

#[test]
fn reopening_reuses_the_buffer() {
    let backend = TestBackend::new(100);
    let audio = buffered(&backend);

    audio.open().unwrap();
    audio.close().unwrap();
    audio.open().unwrap();
    assert_eq!(backend.opens(), 1);
    assert_eq!(audio.frame_length(), 100);
}
