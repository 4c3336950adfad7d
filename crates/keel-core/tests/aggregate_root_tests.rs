//! Behaviour tests for `AggregateRoot`: staging, commit, replay, dedup and
//! snapshot capture.

use std::sync::Arc;

use keel_core::aggregate::AggregateRoot;
use keel_core::error::DomainError;
use keel_core::snapshot::SnapshotPolicy;
use keel_test_support::{
    ConflictingEventSink, CreateWidget, FailingEventSink, FailingSnapshotter, FixedClock,
    RecordingEventSink, RecordingSnapshotter, TagWidget, Ticker, TickerEvent, Widget, WidgetEvent,
    WidgetNamed, create_widget, tag_widget, widget_commit, widget_event,
};
use serde_json::json;

fn widget_root(sink: Arc<RecordingEventSink>) -> AggregateRoot<Widget> {
    AggregateRoot::new("widget-1", sink).with_clock(Arc::new(FixedClock::standard()))
}

fn create(command_id: &str, name: &str) -> CreateWidget {
    CreateWidget {
        command_id: command_id.to_owned(),
        name: name.to_owned(),
    }
}

fn tag(command_id: &str, tag: &str) -> TagWidget {
    TagWidget {
        command_id: command_id.to_owned(),
        tag: tag.to_owned(),
    }
}

// --- commit ---

#[tokio::test]
async fn test_commit_of_created_event_at_sequence_one() {
    // Arrange
    let sink = Arc::new(RecordingEventSink::new());
    let mut root = widget_root(sink.clone());
    assert_eq!(root.next_sequence_number(), 1);

    root.raise(WidgetEvent::Created, &WidgetNamed {
        name: "X".to_owned(),
    })
    .unwrap();

    // Act
    let receipt = root.commit().await.unwrap();

    // Assert
    assert!(receipt.is_some());
    assert_eq!(root.next_sequence_number(), 2);

    let commits = sink.commits();
    assert_eq!(commits.len(), 1);
    let commit = &commits[0];
    assert_eq!(commit.aggregate_id(), "widget-1");
    assert_eq!(commit.expected_sequence_number(), 1);
    assert_eq!(commit.events().len(), 1);

    let event = &commit.events()[0];
    assert_eq!(event.event_type(), "widget.created");
    assert_eq!(event.payload(), &json!({"name": "X"}));
    assert_eq!(event.occurred_at(), FixedClock::standard().0);
}

#[tokio::test]
async fn test_commit_advances_sequence_by_one_regardless_of_event_count() {
    for event_count in [1_usize, 2, 5, 17] {
        // Arrange
        let sink = Arc::new(RecordingEventSink::new());
        let mut root = widget_root(sink.clone());
        create_widget(&mut root, &create("cmd-create", "Sprocket")).unwrap();
        root.commit().await.unwrap();
        let before = root.next_sequence_number();

        for i in 0..event_count {
            root.raise(WidgetEvent::Tagged, &json!({"tag": format!("t{i}")}))
                .unwrap();
        }

        // Act
        let receipt = root.commit().await.unwrap().unwrap();

        // Assert
        assert_eq!(root.next_sequence_number(), before + 1);
        assert_eq!(receipt.event_count, event_count);
        assert_eq!(receipt.committed_sequence_number, before);
    }
}

#[tokio::test]
async fn test_commit_with_empty_buffer_never_calls_sink() {
    // Arrange
    let sink = Arc::new(FailingEventSink::new());
    let mut root: AggregateRoot<Widget> = AggregateRoot::new("widget-1", sink.clone());

    // Act
    let result = root.commit().await;

    // Assert
    assert!(matches!(result, Ok(None)));
    assert_eq!(sink.call_count(), 0);
    assert_eq!(root.next_sequence_number(), 1);
}

#[tokio::test]
async fn test_idempotent_noop_command_issues_no_write() {
    // Arrange
    let sink = Arc::new(RecordingEventSink::new());
    let mut root = widget_root(sink.clone());
    root.apply_commit(&widget_commit(
        "widget-1",
        1,
        vec![widget_event("widget-1", WidgetEvent::Created, json!({"name": "A"}))],
    ))
    .unwrap();

    // Act: a fresh command that finds the widget already created stages nothing.
    create_widget(&mut root, &create("cmd-again", "A")).unwrap();
    let receipt = root.commit().await.unwrap();

    // Assert
    assert!(receipt.is_none());
    assert_eq!(sink.call_count(), 0);
}

#[tokio::test]
async fn test_failed_commit_leaves_buffer_and_sequence_untouched() {
    // Arrange
    let sink = Arc::new(FailingEventSink::new());
    let mut root: AggregateRoot<Widget> = AggregateRoot::new("widget-1", sink.clone());
    create_widget(&mut root, &create("cmd-1", "Gear")).unwrap();
    let staged_before = root.staged_events().to_vec();

    // Act
    let result = root.commit().await;

    // Assert
    match result.unwrap_err() {
        DomainError::SinkFailure(msg) => assert_eq!(msg, "connection refused"),
        other => panic!("expected SinkFailure, got {other:?}"),
    }
    assert_eq!(sink.call_count(), 1);
    assert_eq!(root.staged_events(), staged_before.as_slice());
    assert_eq!(root.next_sequence_number(), 1);
    assert_eq!(root.state().name.as_deref(), Some("Gear"));
}

#[tokio::test]
async fn test_conflicting_commit_surfaces_conflict_and_keeps_state() {
    // Arrange
    let mut root: AggregateRoot<Widget> =
        AggregateRoot::new("widget-1", Arc::new(ConflictingEventSink));
    create_widget(&mut root, &create("cmd-1", "Gear")).unwrap();

    // Act
    let result = root.commit().await;

    // Assert
    match result.unwrap_err() {
        DomainError::ConcurrencyConflict {
            aggregate_id,
            expected,
            actual,
        } => {
            assert_eq!(aggregate_id, "widget-1");
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(root.staged_events().len(), 1);
    assert_eq!(root.next_sequence_number(), 1);
}

// --- dispatch ---

#[test]
fn test_unhandled_event_type_is_refused() {
    // Arrange
    let mut root = widget_root(Arc::new(RecordingEventSink::new()));

    // Act
    let result = root.raise(WidgetEvent::Scrapped, &json!({}));

    // Assert
    match result.unwrap_err() {
        DomainError::UnhandledEventType {
            aggregate_kind,
            event_type,
        } => {
            assert_eq!(aggregate_kind, "widget");
            assert_eq!(event_type, "widget.scrapped");
        }
        other => panic!("expected UnhandledEventType, got {other:?}"),
    }
    assert!(root.staged_events().is_empty());
}

#[test]
fn test_replaying_unhandled_event_aborts_replay() {
    let mut root = widget_root(Arc::new(RecordingEventSink::new()));
    let commit = widget_commit(
        "widget-1",
        1,
        vec![
            widget_event("widget-1", WidgetEvent::Created, json!({"name": "A"})),
            widget_event("widget-1", WidgetEvent::Scrapped, json!({})),
        ],
    );

    let result = root.apply_commit(&commit);

    assert!(matches!(
        result,
        Err(DomainError::UnhandledEventType { .. })
    ));
    assert_eq!(root.next_sequence_number(), 1);
}

// --- replay ---

#[test]
fn test_apply_commit_advances_once_per_commit() {
    // Arrange
    let mut root = widget_root(Arc::new(RecordingEventSink::new()));
    let first = widget_commit(
        "widget-1",
        1,
        vec![
            widget_event("widget-1", WidgetEvent::Created, json!({"name": "A"})),
            widget_event("widget-1", WidgetEvent::Tagged, json!({"tag": "red"})),
            widget_event("widget-1", WidgetEvent::Tagged, json!({"tag": "big"})),
        ],
    );
    let second = widget_commit("widget-1", 2, Vec::new());

    // Act
    root.apply_commit(&first).unwrap();
    root.apply_commit(&second).unwrap();

    // Assert
    assert_eq!(root.next_sequence_number(), 3);
    assert_eq!(root.state().tags, ["red", "big"]);
    assert_eq!(root.state().revisions, 3);
    assert!(root.staged_events().is_empty());
}

#[test]
fn test_replay_is_deterministic() {
    // Arrange
    let history = vec![
        widget_commit(
            "widget-1",
            1,
            vec![widget_event("widget-1", WidgetEvent::Created, json!({"name": "A"}))],
        ),
        widget_commit(
            "widget-1",
            2,
            vec![
                widget_event("widget-1", WidgetEvent::Renamed, json!({"name": "B"})),
                widget_event("widget-1", WidgetEvent::Tagged, json!({"tag": "blue"})),
            ],
        ),
    ];
    let mut left = widget_root(Arc::new(RecordingEventSink::new()));
    let mut right = widget_root(Arc::new(RecordingEventSink::new()));

    // Act
    for commit in &history {
        left.apply_commit(commit).unwrap();
        right.apply_commit(commit).unwrap();
    }

    // Assert
    assert_eq!(left.state(), right.state());
    assert_eq!(left.next_sequence_number(), right.next_sequence_number());
    assert_eq!(left.state().name.as_deref(), Some("B"));
}

#[test]
fn test_apply_commit_rejects_foreign_commit() {
    let mut root = widget_root(Arc::new(RecordingEventSink::new()));
    let foreign = widget_commit("widget-2", 1, Vec::new());

    let result = root.apply_commit(&foreign);

    assert!(matches!(result, Err(DomainError::Validation(_))));
}

// --- deduplication ---

#[test]
fn test_same_command_id_mutates_state_once() {
    // Arrange
    let mut root = widget_root(Arc::new(RecordingEventSink::new()));
    create_widget(&mut root, &create("cmd-create", "A")).unwrap();

    // Act
    tag_widget(&mut root, &tag("cmd-tag", "red")).unwrap();
    tag_widget(&mut root, &tag("cmd-tag", "red")).unwrap();

    // Assert
    assert_eq!(root.state().tags, ["red"]);
    assert_eq!(root.staged_events().len(), 2);
}

#[test]
fn test_command_replayed_from_history_is_skipped() {
    // Arrange
    let mut root = widget_root(Arc::new(RecordingEventSink::new()));
    let history = widget_commit(
        "widget-1",
        1,
        vec![
            widget_event("widget-1", WidgetEvent::Created, json!({"name": "A"}))
                .with_command_id("cmd-create"),
            widget_event("widget-1", WidgetEvent::Tagged, json!({"tag": "red"}))
                .with_command_id("cmd-tag"),
        ],
    );
    root.apply_commit(&history).unwrap();

    // Act
    tag_widget(&mut root, &tag("cmd-tag", "red")).unwrap();

    // Assert
    assert!(root.has_executed("cmd-tag"));
    assert!(root.staged_events().is_empty());
    assert_eq!(root.state().tags, ["red"]);
}

#[test]
fn test_failed_command_is_not_recorded_as_executed() {
    let mut root = widget_root(Arc::new(RecordingEventSink::new()));

    let result = tag_widget(&mut root, &tag("cmd-tag", "red"));

    assert!(matches!(result, Err(DomainError::Validation(_))));
    assert!(!root.has_executed("cmd-tag"));
}

// --- snapshots ---

#[tokio::test]
async fn test_save_snapshot_unsupported_type_performs_no_write() {
    // Arrange
    let snapshotter = Arc::new(RecordingSnapshotter::new());
    let mut root: AggregateRoot<Ticker> =
        AggregateRoot::new("ticker-1", Arc::new(RecordingEventSink::new()))
            .with_snapshotter(snapshotter.clone());
    root.raise(TickerEvent::Ticked, &json!({})).unwrap();
    root.commit().await.unwrap();

    // Act
    let result = root.save_snapshot().await;

    // Assert
    match result.unwrap_err() {
        DomainError::SnapshotUnsupported(reason) => {
            assert_eq!(reason, "aggregate kind `ticker` does not capture state");
        }
        other => panic!("expected SnapshotUnsupported, got {other:?}"),
    }
    assert!(snapshotter.saved().is_empty());
}

#[tokio::test]
async fn test_save_snapshot_records_last_committed_sequence() {
    // Arrange
    let snapshotter = Arc::new(RecordingSnapshotter::new());
    let mut root = widget_root(Arc::new(RecordingEventSink::new()))
        .with_snapshotter(snapshotter.clone());
    create_widget(&mut root, &create("cmd-1", "A")).unwrap();
    root.commit().await.unwrap();
    tag_widget(&mut root, &tag("cmd-2", "red")).unwrap();
    root.commit().await.unwrap();

    // Act
    root.save_snapshot().await.unwrap();

    // Assert
    let saved = snapshotter.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].aggregate_id, "widget-1");
    assert_eq!(saved[0].sequence_number, 2);
    assert_eq!(saved[0].state["tags"], json!(["red"]));
    let command_ids: Vec<_> = saved[0].executed_command_ids.iter().map(String::as_str).collect();
    assert_eq!(command_ids, ["cmd-1", "cmd-2"]);
    assert!(saved[0].is_well_formed());
}

#[tokio::test]
async fn test_save_snapshot_refuses_staged_state() {
    let snapshotter = Arc::new(RecordingSnapshotter::new());
    let mut root = widget_root(Arc::new(RecordingEventSink::new()))
        .with_snapshotter(snapshotter.clone());
    create_widget(&mut root, &create("cmd-1", "A")).unwrap();

    let result = root.save_snapshot().await;

    assert!(matches!(result, Err(DomainError::Validation(_))));
    assert!(snapshotter.saved().is_empty());
}

#[tokio::test]
async fn test_save_snapshot_without_snapshotter_is_unsupported() {
    let root = widget_root(Arc::new(RecordingEventSink::new()));

    let result = root.save_snapshot().await;

    assert!(matches!(result, Err(DomainError::SnapshotUnsupported(_))));
}

#[tokio::test]
async fn test_policy_snapshots_after_every_nth_commit() {
    // Arrange
    let snapshotter = Arc::new(RecordingSnapshotter::new());
    let mut root = widget_root(Arc::new(RecordingEventSink::new()))
        .with_snapshotter(snapshotter.clone())
        .with_snapshot_policy(SnapshotPolicy::EveryNCommits(2));
    create_widget(&mut root, &create("cmd-0", "A")).unwrap();
    root.commit().await.unwrap();

    // Act
    for i in 1..=4 {
        tag_widget(&mut root, &tag(&format!("cmd-{i}"), &format!("t{i}"))).unwrap();
        root.commit().await.unwrap();
    }

    // Assert
    let sequences: Vec<_> = snapshotter.saved().iter().map(|s| s.sequence_number).collect();
    assert_eq!(sequences, [2, 4]);
    assert_eq!(root.next_sequence_number(), 6);
}

#[tokio::test]
async fn test_policy_snapshot_failure_does_not_fail_commit() {
    // Arrange
    let sink = Arc::new(RecordingEventSink::new());
    let mut root = widget_root(sink.clone())
        .with_snapshotter(Arc::new(FailingSnapshotter))
        .with_snapshot_policy(SnapshotPolicy::EveryNCommits(1));
    create_widget(&mut root, &create("cmd-1", "A")).unwrap();

    // Act
    let result = root.commit().await;

    // Assert
    assert!(result.unwrap().is_some());
    assert_eq!(sink.call_count(), 1);
    assert_eq!(root.next_sequence_number(), 2);
}
