//! Per-aggregate-type event handler registry.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::event::{Event, EventType};

type BoxedHandler<A> = Box<dyn Fn(&mut A, &Event) -> Result<(), DomainError> + Send + Sync>;

/// Maps each event type tag of an aggregate to the handler that folds it into
/// state.
///
/// Built once per aggregate type, usually inside a `static LazyLock`, and
/// consulted on every apply. Tags without a handler are refused at dispatch.
///
/// ```ignore
/// fn handlers() -> &'static HandlerTable<Self> {
///     static HANDLERS: LazyLock<HandlerTable<Account>> = LazyLock::new(|| {
///         HandlerTable::new()
///             .on(AccountEvent::Opened, Account::on_opened)
///             .on(AccountEvent::Deposited, Account::on_deposited)
///     });
///     &HANDLERS
/// }
/// ```
pub struct HandlerTable<A: Aggregate> {
    handlers: HashMap<A::EventType, BoxedHandler<A>>,
}

impl<A: Aggregate> HandlerTable<A> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler for `tag`, replacing any earlier registration.
    ///
    /// The event payload is decoded into `P` before the handler runs.
    #[must_use]
    pub fn on<P, F>(mut self, tag: A::EventType, handler: F) -> Self
    where
        P: DeserializeOwned,
        F: Fn(&mut A, P) + Send + Sync + 'static,
    {
        self.handlers.insert(
            tag,
            Box::new(move |state, event| {
                let payload: P = serde_json::from_value(event.payload().clone()).map_err(|e| {
                    DomainError::Infrastructure(format!(
                        "payload of `{}` event {} could not be decoded: {e}",
                        event.event_type(),
                        event.event_id()
                    ))
                })?;
                handler(state, payload);
                Ok(())
            }),
        );
        self
    }

    /// Whether `tag` has a registered handler.
    #[must_use]
    pub fn handles(&self, tag: A::EventType) -> bool {
        self.handlers.contains_key(&tag)
    }

    /// Tags of the closed set that have no handler.
    #[must_use]
    pub fn unhandled(&self) -> Vec<A::EventType> {
        A::EventType::ALL
            .iter()
            .copied()
            .filter(|tag| !self.handles(*tag))
            .collect()
    }

    /// Folds `event` into `state`.
    ///
    /// State is untouched when this returns an error.
    pub(crate) fn dispatch(&self, state: &mut A, event: &Event) -> Result<(), DomainError> {
        let handler = event
            .tag::<A::EventType>()
            .and_then(|tag| self.handlers.get(&tag))
            .ok_or_else(|| DomainError::UnhandledEventType {
                aggregate_kind: A::KIND,
                event_type: event.event_type().to_owned(),
            })?;
        handler(state, event)
    }
}

impl<A: Aggregate> Default for HandlerTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> fmt::Debug for HandlerTable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().map(|tag| tag.name()).collect();
        tags.sort_unstable();
        f.debug_struct("HandlerTable")
            .field("aggregate_kind", &A::KIND)
            .field("tags", &tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum MeterEvent {
        Reading,
        Reset,
        Tampered,
    }

    impl EventType for MeterEvent {
        const ALL: &'static [Self] = &[Self::Reading, Self::Reset, Self::Tampered];

        fn name(self) -> &'static str {
            match self {
                Self::Reading => "meter.reading",
                Self::Reset => "meter.reset",
                Self::Tampered => "meter.tampered",
            }
        }
    }

    #[derive(Debug, Deserialize)]
    struct Reading {
        value: u64,
    }

    #[derive(Debug, Default)]
    struct Meter {
        total: u64,
    }

    impl Meter {
        fn on_reading(&mut self, payload: Reading) {
            self.total += payload.value;
        }

        fn on_reset(&mut self, _payload: serde_json::Value) {
            self.total = 0;
        }
    }

    impl Aggregate for Meter {
        const KIND: &'static str = "meter";
        type EventType = MeterEvent;

        fn handlers() -> &'static HandlerTable<Self> {
            static HANDLERS: LazyLock<HandlerTable<Meter>> = LazyLock::new(|| {
                HandlerTable::new()
                    .on(MeterEvent::Reading, Meter::on_reading)
                    .on(MeterEvent::Reset, Meter::on_reset)
            });
            &HANDLERS
        }
    }

    fn event(tag: MeterEvent, payload: serde_json::Value) -> Event {
        Event::new("meter-1", tag, payload, Utc::now())
    }

    #[test]
    fn test_dispatch_routes_by_tag() {
        // Arrange
        let table = Meter::handlers();
        let mut meter = Meter::default();

        // Act
        table
            .dispatch(&mut meter, &event(MeterEvent::Reading, json!({"value": 5})))
            .unwrap();
        table
            .dispatch(&mut meter, &event(MeterEvent::Reading, json!({"value": 7})))
            .unwrap();

        // Assert
        assert_eq!(meter.total, 12);

        table
            .dispatch(&mut meter, &event(MeterEvent::Reset, json!({})))
            .unwrap();
        assert_eq!(meter.total, 0);
    }

    #[test]
    fn test_dispatch_refuses_tag_without_handler() {
        let mut meter = Meter { total: 3 };
        let tampered = event(MeterEvent::Tampered, json!({}));

        let result = Meter::handlers().dispatch(&mut meter, &tampered);

        match result.unwrap_err() {
            DomainError::UnhandledEventType {
                aggregate_kind,
                event_type,
            } => {
                assert_eq!(aggregate_kind, "meter");
                assert_eq!(event_type, "meter.tampered");
            }
            other => panic!("expected UnhandledEventType, got {other:?}"),
        }
        assert_eq!(meter.total, 3);
    }

    #[test]
    fn test_dispatch_refuses_unknown_wire_name() {
        let mut meter = Meter::default();
        let stray = Event::from_stored(
            uuid::Uuid::new_v4(),
            "meter.melted",
            "meter-1",
            None,
            json!({}),
            Utc::now(),
        );

        let result = Meter::handlers().dispatch(&mut meter, &stray);

        assert!(matches!(
            result,
            Err(DomainError::UnhandledEventType { .. })
        ));
    }

    #[test]
    fn test_dispatch_reports_undecodable_payload_without_mutating() {
        let mut meter = Meter { total: 9 };

        let result = Meter::handlers().dispatch(
            &mut meter,
            &event(MeterEvent::Reading, json!({"value": "lots"})),
        );

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert_eq!(meter.total, 9);
    }

    #[test]
    fn test_unhandled_lists_missing_tags() {
        assert_eq!(Meter::handlers().unhandled(), vec![MeterEvent::Tampered]);
        assert!(Meter::handlers().handles(MeterEvent::Reset));
    }
}
