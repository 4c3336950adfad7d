//! Shared test mocks and utilities for the Keel runtime.

mod clock;
mod sink;
mod snapshotter;
mod stage;
mod widget;

pub use clock::FixedClock;
pub use sink::{
    ConflictingEventSink, FailingCommitSource, FailingEventSink, FixedCommitSource,
    RecordingEventSink,
};
pub use snapshotter::{FailingSnapshotter, RecordingSnapshotter};
pub use stage::{FailingStage, RecordingStage, StageLog, StageVisit, stage_log};
pub use widget::{
    CreateWidget, TagWidget, Ticker, TickerEvent, Widget, WidgetEvent, WidgetNamed, WidgetTagged,
    create_widget, tag_widget, widget_commit, widget_event,
};
