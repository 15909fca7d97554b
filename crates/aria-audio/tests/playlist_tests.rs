//! Playlist sequencing against deterministic tracks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use aria_audio::{Audio, Playable, Playlist};

use common::{streamed, wait_until, TestBackend};

/// A playlist of `count` short tracks plus their backends.
fn build_playlist(count: usize, frames: u64) -> (Playlist, Vec<Arc<TestBackend>>) {
    let playlist = Playlist::new();
    let mut backends = Vec::new();
    for _ in 0..count {
        let backend = TestBackend::new(frames);
        playlist.add(Arc::new(streamed(&backend)));
        backends.push(backend);
    }
    (playlist, backends)
}

/// Long throttled tracks that will not end during the test.
fn build_slow_playlist(count: usize) -> (Playlist, Vec<Arc<TestBackend>>) {
    let playlist = Playlist::new();
    let mut backends = Vec::new();
    for _ in 0..count {
        let backend = TestBackend::throttled(1_000_000, Duration::from_millis(3));
        playlist.add(Arc::new(streamed(&backend)));
        backends.push(backend);
    }
    (playlist, backends)
}

#[test]
fn tracks_advance_on_their_end_event() {
    let (playlist, backends) = build_playlist(2, 50);

    playlist.play().unwrap();

    wait_until("both tracks to play through", || {
        !playlist.is_playing()
            && backends.iter().all(|backend| {
                backend
                    .try_probe()
                    .is_some_and(|probe| probe.frames_received() == 50)
            })
    });

    // The finished first track was closed during the advance.
    assert!(!playlist.track(0).unwrap().is_open());
    assert_eq!(playlist.current_track_index(), None);
}

#[test]
fn looping_playlist_wraps_to_the_first_track() {
    let (playlist, backends) = build_playlist(2, 50);
    playlist.set_loop(true);

    playlist.play().unwrap();

    // First open, rewind at the natural end, then a reopen after the
    // wrap: three source opens mean the first track came around again.
    wait_until("the playlist to wrap", || backends[0].opens() >= 3);

    playlist.stop().unwrap();
    assert!(!playlist.is_playing());
}

#[test]
fn next_and_previous_move_the_selection() {
    let (playlist, _backends) = build_slow_playlist(3);

    playlist.play().unwrap();
    assert_eq!(playlist.current_track_index(), Some(0));
    assert!(playlist.is_playing());

    playlist.next();
    assert_eq!(playlist.current_track_index(), Some(1));
    assert!(!playlist.track(0).unwrap().is_open());
    assert!(playlist.track(1).unwrap().is_playing());

    playlist.previous();
    assert_eq!(playlist.current_track_index(), Some(0));

    playlist.stop().unwrap();
}

#[test]
fn sequential_order_walks_the_list() {
    let (playlist, _backends) = build_slow_playlist(4);

    playlist.play().unwrap();
    let mut visited = vec![playlist.current_track_index().unwrap()];
    for _ in 0..3 {
        playlist.next();
        visited.push(playlist.current_track_index().unwrap());
    }
    playlist.next();
    assert_eq!(playlist.current_track_index(), None);
    assert!(!playlist.is_playing());

    assert_eq!(visited, vec![0, 1, 2, 3]);
}

#[test]
fn shuffle_visits_every_track_once_per_pass() {
    let (playlist, _backends) = build_slow_playlist(5);
    playlist.set_shuffle(true);
    assert!(playlist.is_shuffling());

    playlist.play().unwrap();
    let mut visited = vec![playlist.current_track_index().unwrap()];
    for _ in 0..4 {
        playlist.next();
        visited.push(playlist.current_track_index().unwrap());
    }
    playlist.next();
    assert_eq!(playlist.current_track_index(), None);

    visited.sort_unstable();
    assert_eq!(visited, vec![0, 1, 2, 3, 4]);
}

#[test]
fn pause_and_resume_are_forwarded_to_the_track() {
    let (playlist, _backends) = build_slow_playlist(1);

    playlist.play().unwrap();
    let track = playlist.track(0).unwrap();
    wait_until("the track to start", || track.frame_position() > 0);

    playlist.pause().unwrap();
    assert!(track.is_paused());
    assert!(!playlist.is_playing());

    playlist.resume().unwrap();
    assert!(!track.is_paused());
    assert!(playlist.is_playing());

    playlist.stop().unwrap();
}

#[test]
fn volume_and_mute_carry_over_to_opened_tracks() {
    let (playlist, backends) = build_slow_playlist(2);

    playlist.set_volume(-10.0);
    playlist.set_mute(true);
    playlist.play().unwrap();

    assert_eq!(backends[0].probe().gain.get(), -10.0);
    assert!(backends[0].probe().mute.get());

    playlist.next();
    assert_eq!(backends[1].probe().gain.get(), -10.0);
    assert!(backends[1].probe().mute.get());

    playlist.stop().unwrap();
}

#[test]
fn stopping_the_playlist_closes_the_current_track() {
    let (playlist, _backends) = build_slow_playlist(2);

    playlist.play().unwrap();
    let track = playlist.track(0).unwrap();
    assert!(track.is_open());

    playlist.stop().unwrap();
    assert!(!track.is_open());
    assert!(!playlist.is_playing());
    // Selection is kept so play() restarts the same track.
    assert_eq!(playlist.current_track_index(), Some(0));
}

#[test]
fn removing_the_current_track_starts_the_following_one() {
    let (playlist, _backends) = build_slow_playlist(3);

    playlist.play().unwrap();
    let removed = playlist.remove(0).unwrap();
    assert!(!removed.is_open());

    assert_eq!(playlist.track_count(), 2);
    assert_eq!(playlist.current_track_index(), Some(0));
    assert!(playlist.is_playing());
    assert!(playlist.track(0).unwrap().is_playing());
}

#[test]
fn remove_out_of_range_is_none() {
    let (playlist, _backends) = build_playlist(1, 10);
    assert!(playlist.remove(5).is_none());
    assert_eq!(playlist.track_count(), 1);
}

#[test]
fn empty_playlist_play_is_a_no_op() {
    let playlist = Playlist::new();
    playlist.play().unwrap();
    assert!(!playlist.is_playing());
}
