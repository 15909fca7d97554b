//! Track sequencing over multiple audio handles.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use aria_core::{AudioEvent, AudioEventKind, Result};
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::audio::{Audio, Playable};

struct PlaylistState {
    tracks: Vec<Arc<dyn Audio>>,
    /// Visit order over track indices; identity unless shuffling.
    shuffle_order: Vec<usize>,
    /// Index into `tracks` of the selected track.
    current: Option<usize>,
    shuffling: bool,
    looping: bool,
    muted: bool,
    playing: bool,
    volume: f32,
    /// Listener registered on the current track, for removal.
    listener_token: Option<(usize, uuid::Uuid)>,
    /// Bumped on every loop wrap so each pass reshuffles differently.
    pass: u64,
}

struct PlaylistInner {
    state: Mutex<PlaylistState>,
}

/// Plays a list of tracks back to back.
///
/// Tracks advance automatically on their end-of-stream event; the
/// dispatch happens on the finished track's worker thread, so the
/// following track starts without caller involvement. Volume and mute
/// set on the playlist are remembered and applied to every track it
/// opens.
pub struct Playlist {
    inner: Arc<PlaylistInner>,
}

impl Playlist {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PlaylistInner {
                state: Mutex::new(PlaylistState {
                    tracks: Vec::new(),
                    shuffle_order: Vec::new(),
                    current: None,
                    shuffling: false,
                    looping: false,
                    muted: false,
                    playing: false,
                    volume: 0.0,
                    listener_token: None,
                    pass: 0,
                }),
            }),
        }
    }

    /// Append a track.
    pub fn add(&self, track: Arc<dyn Audio>) {
        let mut state = self.inner.state.lock();
        state.tracks.push(track);
        rebuild_order(&mut state);
    }

    /// Remove a track by index, stopping and closing it if it is the
    /// one selected. Returns the removed track, or `None` if the index
    /// is out of range.
    pub fn remove(&self, index: usize) -> Option<Arc<dyn Audio>> {
        let mut state = self.inner.state.lock();
        if index >= state.tracks.len() {
            return None;
        }
        let was_current = state.current == Some(index);
        let was_playing = state.playing;
        if was_current {
            stop_current_locked(&mut state);
            state.current = None;
        }
        let removed = state.tracks.remove(index);
        if let Some(current) = state.current {
            if current > index {
                state.current = Some(current - 1);
            }
        }
        if let Some((listener_index, _)) = &mut state.listener_token {
            if *listener_index > index {
                *listener_index -= 1;
            }
        }
        rebuild_order(&mut state);

        if was_current && !state.tracks.is_empty() {
            let candidate = index.min(state.tracks.len() - 1);
            state.current = Some(candidate);
            if was_playing {
                if let Err(e) = start_locked(&self.inner, &mut state, candidate) {
                    error!("Failed to start track {candidate}: {e}");
                }
            }
        }
        Some(removed)
    }

    pub fn track_count(&self) -> usize {
        self.inner.state.lock().tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<Arc<dyn Audio>> {
        self.inner.state.lock().tracks.get(index).cloned()
    }

    /// Index of the selected track, if any.
    pub fn current_track_index(&self) -> Option<usize> {
        self.inner.state.lock().current
    }

    /// Pick following tracks in a shuffled order instead of list order.
    pub fn set_shuffle(&self, shuffle: bool) {
        let mut state = self.inner.state.lock();
        state.shuffling = shuffle;
        rebuild_order(&mut state);
    }

    pub fn is_shuffling(&self) -> bool {
        self.inner.state.lock().shuffling
    }

    /// Wrap around to the first track after the last one finishes.
    pub fn set_loop(&self, looping: bool) {
        self.inner.state.lock().looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.inner.state.lock().looping
    }

    /// Skip to the next track in the visit order.
    pub fn next(&self) {
        let mut state = self.inner.state.lock();
        next_locked(&self.inner, &mut state);
    }

    /// Go back to the previous track in the visit order.
    pub fn previous(&self) {
        let mut state = self.inner.state.lock();
        previous_locked(&self.inner, &mut state);
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}

impl Playable for Playlist {
    fn play(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.playing {
            stop_current_locked(&mut state);
        }
        let index = match state.current {
            Some(index) => index,
            None => match state.shuffle_order.first().copied() {
                Some(index) => index,
                None => return Ok(()),
            },
        };
        start_locked(&self.inner, &mut state, index)
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        stop_current_locked(&mut state);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if let Some(track) = current_track(&state) {
            if track.is_open() {
                track.pause()?;
                state.playing = false;
            }
        }
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if let Some(track) = current_track(&state) {
            if track.is_open() {
                track.resume()?;
                state.playing = true;
            }
        }
        Ok(())
    }

    fn set_volume(&self, decibels: f32) -> f32 {
        let mut state = self.inner.state.lock();
        let applied = match current_track(&state) {
            Some(track) if track.is_open() => track.set_volume(decibels),
            _ => decibels,
        };
        state.volume = applied;
        applied
    }

    fn volume(&self) -> f32 {
        self.inner.state.lock().volume
    }

    fn set_mute(&self, mute: bool) {
        let mut state = self.inner.state.lock();
        state.muted = mute;
        if let Some(track) = current_track(&state) {
            if track.is_open() {
                track.set_mute(mute);
            }
        }
    }

    fn is_muted(&self) -> bool {
        self.inner.state.lock().muted
    }

    fn is_playing(&self) -> bool {
        self.inner.state.lock().playing
    }
}

fn current_track(state: &PlaylistState) -> Option<Arc<dyn Audio>> {
    state
        .current
        .and_then(|index| state.tracks.get(index).cloned())
}

/// Advance triggered by a track's end-of-stream event. Runs on the
/// finished track's worker thread.
fn advance(inner: &Arc<PlaylistInner>) {
    let mut state = inner.state.lock();
    // A stop() racing the natural end wins: do not restart.
    if !state.playing {
        return;
    }
    next_locked(inner, &mut state);
}

fn next_locked(inner: &Arc<PlaylistInner>, state: &mut PlaylistState) {
    stop_current_locked(state);
    let next = match position_in_order(state) {
        None => state.shuffle_order.first().copied(),
        Some(position) => {
            if position + 1 < state.shuffle_order.len() {
                Some(state.shuffle_order[position + 1])
            } else if state.looping {
                state.pass = state.pass.wrapping_add(1);
                rebuild_order(state);
                state.shuffle_order.first().copied()
            } else {
                None
            }
        }
    };
    state.current = next;
    if let Some(index) = next {
        if let Err(e) = start_locked(inner, state, index) {
            error!("Failed to start track {index}: {e}");
        }
    }
}

fn previous_locked(inner: &Arc<PlaylistInner>, state: &mut PlaylistState) {
    stop_current_locked(state);
    let previous = match position_in_order(state) {
        None => state.shuffle_order.last().copied(),
        Some(position) => {
            if position > 0 {
                Some(state.shuffle_order[position - 1])
            } else if state.looping {
                state.shuffle_order.last().copied()
            } else {
                None
            }
        }
    };
    state.current = previous;
    if let Some(index) = previous {
        if let Err(e) = start_locked(inner, state, index) {
            error!("Failed to start track {index}: {e}");
        }
    }
}

fn position_in_order(state: &PlaylistState) -> Option<usize> {
    let current = state.current?;
    state.shuffle_order.iter().position(|&index| index == current)
}

/// Open the track if needed, carry playlist volume and mute over to it,
/// hook the advance listener and start it.
fn start_locked(
    inner: &Arc<PlaylistInner>,
    state: &mut PlaylistState,
    index: usize,
) -> Result<()> {
    let Some(track) = state.tracks.get(index).cloned() else {
        return Ok(());
    };
    if !track.is_open() {
        track.open()?;
    }
    track.set_mute(state.muted);
    track.set_volume(state.volume);

    let weak = Arc::downgrade(inner);
    let token = track.add_listener(Arc::new(move |event: &AudioEvent| {
        if event.kind == AudioEventKind::ReachedEnd {
            if let Some(inner) = weak.upgrade() {
                advance(&inner);
            }
        }
    }));
    state.listener_token = Some((index, token));
    state.current = Some(index);

    track.play()?;
    state.playing = true;
    Ok(())
}

/// Stop and close the selected track, detaching the advance listener.
/// The selection itself is kept so play() restarts the same track.
fn stop_current_locked(state: &mut PlaylistState) {
    if let Some((index, token)) = state.listener_token.take() {
        if let Some(track) = state.tracks.get(index) {
            track.remove_listener(token);
        }
    }
    if let Some(track) = current_track(state) {
        if track.is_open() {
            if let Err(e) = track.stop() {
                warn!("Failed to stop track: {e}");
            }
            if let Err(e) = track.close() {
                warn!("Failed to close track: {e}");
            }
        }
    }
    state.playing = false;
}

fn rebuild_order(state: &mut PlaylistState) {
    state.shuffle_order = (0..state.tracks.len()).collect();

    if state.shuffling && state.shuffle_order.len() > 1 {
        // Deterministic shuffle seeded from the track ids and pass
        // number.
        let mut hasher = DefaultHasher::new();
        for track in &state.tracks {
            track.id().hash(&mut hasher);
        }
        state.pass.hash(&mut hasher);
        let seed = hasher.finish();

        // Fisher-Yates with an LCG
        let mut rng_state = seed;
        for i in (1..state.shuffle_order.len()).rev() {
            rng_state = rng_state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1);
            #[allow(clippy::cast_possible_truncation)]
            let j = (rng_state as usize) % (i + 1);
            state.shuffle_order.swap(i, j);
        }
    }
}
