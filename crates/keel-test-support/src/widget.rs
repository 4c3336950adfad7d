//! Reference aggregates for exercising the runtime in tests.
//!
//! `Widget` supports snapshots and has one deliberately unhandled event type.
//! `Ticker` is the smallest possible aggregate and does not support snapshots.

use std::sync::LazyLock;

use chrono::Utc;
use keel_core::aggregate::{Aggregate, AggregateRoot};
use keel_core::command::Command;
use keel_core::commit::{Commit, CommitMetadata};
use keel_core::error::DomainError;
use keel_core::event::{Event, EventType};
use keel_core::handler::HandlerTable;
use serde::{Deserialize, Serialize};

/// Event tags of the `Widget` aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetEvent {
    /// The widget was created with a name.
    Created,
    /// The widget was renamed.
    Renamed,
    /// A tag was attached.
    Tagged,
    /// The widget was scrapped. Has no handler.
    Scrapped,
}

impl EventType for WidgetEvent {
    const ALL: &'static [Self] = &[Self::Created, Self::Renamed, Self::Tagged, Self::Scrapped];

    fn name(self) -> &'static str {
        match self {
            Self::Created => "widget.created",
            Self::Renamed => "widget.renamed",
            Self::Tagged => "widget.tagged",
            Self::Scrapped => "widget.scrapped",
        }
    }
}

/// Payload of `widget.created` and `widget.renamed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetNamed {
    /// The widget's name.
    pub name: String,
}

/// Payload of `widget.tagged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetTagged {
    /// The attached tag.
    pub tag: String,
}

/// A named, taggable widget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    /// Current name; `None` until created.
    pub name: Option<String>,
    /// Tags in attachment order.
    pub tags: Vec<String>,
    /// Number of events folded in.
    pub revisions: u32,
}

impl Widget {
    fn on_created(&mut self, payload: WidgetNamed) {
        self.name = Some(payload.name);
        self.revisions += 1;
    }

    fn on_renamed(&mut self, payload: WidgetNamed) {
        self.name = Some(payload.name);
        self.revisions += 1;
    }

    fn on_tagged(&mut self, payload: WidgetTagged) {
        self.tags.push(payload.tag);
        self.revisions += 1;
    }
}

impl Aggregate for Widget {
    const KIND: &'static str = "widget";
    type EventType = WidgetEvent;

    fn handlers() -> &'static HandlerTable<Self> {
        static HANDLERS: LazyLock<HandlerTable<Widget>> = LazyLock::new(|| {
            HandlerTable::new()
                .on(WidgetEvent::Created, Widget::on_created)
                .on(WidgetEvent::Renamed, Widget::on_renamed)
                .on(WidgetEvent::Tagged, Widget::on_tagged)
        });
        &HANDLERS
    }

    fn capture_state(&self) -> Result<serde_json::Value, DomainError> {
        serde_json::to_value(self)
            .map_err(|e| DomainError::Infrastructure(format!("widget capture failed: {e}")))
    }

    fn restore_state(state: serde_json::Value) -> Result<Self, DomainError> {
        serde_json::from_value(state)
            .map_err(|e| DomainError::Infrastructure(format!("widget restore failed: {e}")))
    }
}

/// Command to create a widget.
#[derive(Debug, Clone)]
pub struct CreateWidget {
    /// Stable command id.
    pub command_id: String,
    /// The widget's name.
    pub name: String,
}

impl Command for CreateWidget {
    fn command_type(&self) -> &'static str {
        "widget.create"
    }

    fn command_id(&self) -> &str {
        &self.command_id
    }
}

/// Command to attach a tag.
#[derive(Debug, Clone)]
pub struct TagWidget {
    /// Stable command id.
    pub command_id: String,
    /// The tag to attach.
    pub tag: String,
}

impl Command for TagWidget {
    fn command_type(&self) -> &'static str {
        "widget.tag"
    }

    fn command_id(&self) -> &str {
        &self.command_id
    }
}

/// Creates the widget, or does nothing if it already has a name.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a blank name.
pub fn create_widget(
    root: &mut AggregateRoot<Widget>,
    command: &CreateWidget,
) -> Result<(), DomainError> {
    root.execute(command, |root, command| {
        if command.name.trim().is_empty() {
            return Err(DomainError::Validation("widget name must not be empty".into()));
        }
        if root.state().name.is_some() {
            return Ok(());
        }
        root.raise(WidgetEvent::Created, &WidgetNamed {
            name: command.name.clone(),
        })
    })
}

/// Attaches a tag.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the widget was never created.
pub fn tag_widget(
    root: &mut AggregateRoot<Widget>,
    command: &TagWidget,
) -> Result<(), DomainError> {
    root.execute(command, |root, command| {
        if root.state().name.is_none() {
            return Err(DomainError::Validation("widget does not exist".into()));
        }
        root.raise(WidgetEvent::Tagged, &WidgetTagged {
            tag: command.tag.clone(),
        })
    })
}

/// Builds a widget event with the given payload.
#[must_use]
pub fn widget_event(aggregate_id: &str, tag: WidgetEvent, payload: serde_json::Value) -> Event {
    Event::new(aggregate_id, tag, payload, Utc::now())
}

/// Builds a widget commit for a prepared history.
///
/// # Panics
///
/// Panics if the commit does not validate.
#[must_use]
pub fn widget_commit(
    aggregate_id: &str,
    expected_sequence_number: i64,
    events: Vec<Event>,
) -> Commit {
    Commit::new(
        aggregate_id,
        expected_sequence_number,
        events,
        CommitMetadata::new(),
    )
    .expect("test commit must validate")
}

/// Event tags of the `Ticker` aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickerEvent {
    /// The ticker advanced by one.
    Ticked,
}

impl EventType for TickerEvent {
    const ALL: &'static [Self] = &[Self::Ticked];

    fn name(self) -> &'static str {
        match self {
            Self::Ticked => "ticker.ticked",
        }
    }
}

/// A counter that cannot be snapshotted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ticker {
    /// Ticks folded in.
    pub ticks: u64,
}

impl Aggregate for Ticker {
    const KIND: &'static str = "ticker";
    type EventType = TickerEvent;

    fn handlers() -> &'static HandlerTable<Self> {
        static HANDLERS: LazyLock<HandlerTable<Ticker>> = LazyLock::new(|| {
            HandlerTable::new().on(
                TickerEvent::Ticked,
                |ticker: &mut Ticker, _: serde_json::Value| {
                    ticker.ticks += 1;
                },
            )
        });
        &HANDLERS
    }
}
