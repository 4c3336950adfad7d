//! Domain event abstractions.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of event type tags for one aggregate type.
///
/// Implemented by a fieldless enum. The wire name is what gets persisted and
/// what dispatch resolves against on replay.
pub trait EventType: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every tag of the set.
    const ALL: &'static [Self];

    /// The persisted name of this tag.
    fn name(self) -> &'static str;

    /// Resolves a persisted name back to its tag.
    #[must_use]
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.name() == name)
    }
}

/// An immutable record of something that happened to an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    event_id: Uuid,
    event_type: String,
    aggregate_id: String,
    command_id: Option<String>,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
}

impl Event {
    /// Creates a new event with a fresh identifier.
    #[must_use]
    pub fn new<T: EventType>(
        aggregate_id: impl Into<String>,
        event_type: T,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.name().to_owned(),
            aggregate_id: aggregate_id.into(),
            command_id: None,
            payload,
            occurred_at,
        }
    }

    /// Reassembles an event read back from storage.
    #[must_use]
    pub fn from_stored(
        event_id: Uuid,
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        command_id: Option<String>,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            command_id,
            payload,
            occurred_at,
        }
    }

    /// Correlates the event with the command that produced it.
    #[must_use]
    pub fn with_command_id(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }

    /// Unique event identifier.
    #[must_use]
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Wire name of the event type tag.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Resolves the wire name against a tag set.
    #[must_use]
    pub fn tag<T: EventType>(&self) -> Option<T> {
        T::from_name(&self.event_type)
    }

    /// The aggregate this event belongs to.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// The originating command, if any.
    #[must_use]
    pub fn command_id(&self) -> Option<&str> {
        self.command_id.as_deref()
    }

    /// Opaque structured payload.
    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Timestamp of event creation.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum LampEvent {
        SwitchedOn,
        SwitchedOff,
    }

    impl EventType for LampEvent {
        const ALL: &'static [Self] = &[Self::SwitchedOn, Self::SwitchedOff];

        fn name(self) -> &'static str {
            match self {
                Self::SwitchedOn => "lamp.switched_on",
                Self::SwitchedOff => "lamp.switched_off",
            }
        }
    }

    #[test]
    fn test_from_name_resolves_known_tags_only() {
        assert_eq!(
            LampEvent::from_name("lamp.switched_off"),
            Some(LampEvent::SwitchedOff)
        );
        assert_eq!(LampEvent::from_name("lamp.exploded"), None);
    }

    #[test]
    fn test_new_event_carries_tag_name_and_no_command() {
        // Arrange
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();

        // Act
        let event = Event::new("lamp-1", LampEvent::SwitchedOn, json!({"watts": 40}), now);

        // Assert
        assert_eq!(event.event_type(), "lamp.switched_on");
        assert_eq!(event.tag::<LampEvent>(), Some(LampEvent::SwitchedOn));
        assert_eq!(event.aggregate_id(), "lamp-1");
        assert_eq!(event.command_id(), None);
        assert_eq!(event.payload(), &json!({"watts": 40}));
        assert_eq!(event.occurred_at(), now);
    }

    #[test]
    fn test_with_command_id_keeps_event_identity() {
        let event = Event::new("lamp-1", LampEvent::SwitchedOff, json!(null), Utc::now());
        let id = event.event_id();

        let event = event.with_command_id("cmd-7");

        assert_eq!(event.event_id(), id);
        assert_eq!(event.command_id(), Some("cmd-7"));
    }

    #[test]
    fn test_fresh_events_have_distinct_ids() {
        let a = Event::new("lamp-1", LampEvent::SwitchedOn, json!(null), Utc::now());
        let b = Event::new("lamp-1", LampEvent::SwitchedOn, json!(null), Utc::now());

        assert_ne!(a.event_id(), b.event_id());
    }
}
