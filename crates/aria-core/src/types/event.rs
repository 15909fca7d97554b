//! Playback lifecycle events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a playback event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioEventKind {
    /// The audio was opened.
    Opened,
    /// The audio was closed.
    Closed,
    /// Playback was started.
    Started,
    /// Playback was stopped after being started.
    Stopped,
    /// Playback was paused after being started.
    Paused,
    /// Playback was resumed after being paused.
    Resumed,
    /// The decode stream was naturally exhausted. Fired exactly once per
    /// exhaustion, before any automatic reset performed for looping.
    ReachedEnd,
    /// The playback position was repositioned.
    PositionChanged,
    /// The volume changed.
    VolumeChanged,
    /// The mute flag changed.
    MuteChanged,
}

/// Old/new payload carried by value-change events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventValue {
    /// A frame position.
    Frames(u64),
    /// A gain in decibels.
    Gain(f32),
    /// A mute flag.
    Muted(bool),
}

/// An immutable playback event record.
///
/// Produced by the engine and handed synchronously to every registered
/// listener; listeners hold no ownership beyond the dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEvent {
    /// Id of the handle the event happened on.
    pub source: Uuid,
    /// What happened.
    pub kind: AudioEventKind,
    /// Value before the event, for value-change events.
    pub old_value: Option<EventValue>,
    /// Value after the event, for value-change events.
    pub new_value: Option<EventValue>,
}

impl AudioEvent {
    /// A plain lifecycle event without values.
    pub const fn new(source: Uuid, kind: AudioEventKind) -> Self {
        Self {
            source,
            kind,
            old_value: None,
            new_value: None,
        }
    }

    /// A value-change event carrying the old and new values.
    pub const fn with_values(
        source: Uuid,
        kind: AudioEventKind,
        old_value: EventValue,
        new_value: EventValue,
    ) -> Self {
        Self {
            source,
            kind,
            old_value: Some(old_value),
            new_value: Some(new_value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_event_has_no_values() {
        let event = AudioEvent::new(Uuid::nil(), AudioEventKind::Started);
        assert_eq!(event.kind, AudioEventKind::Started);
        assert!(event.old_value.is_none());
        assert!(event.new_value.is_none());
    }

    #[test]
    fn test_value_change_event() {
        let event = AudioEvent::with_values(
            Uuid::nil(),
            AudioEventKind::PositionChanged,
            EventValue::Frames(100),
            EventValue::Frames(0),
        );
        assert_eq!(event.old_value, Some(EventValue::Frames(100)));
        assert_eq!(event.new_value, Some(EventValue::Frames(0)));
    }
}
