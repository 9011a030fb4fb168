use std::time::Duration;

use uuid::Uuid;

use super::*;
use crate::model::{BoardRole, NodePatch};
use crate::session::BoardSession;
use crate::store::Stores;
use crate::test_helpers::{FailingCanvas, FailingFeed, ScriptedCanvas, chart, context_for, owned_board, test_config};

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SyncNotice>) -> Vec<SyncNotice> {
    let mut out = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        out.push(notice);
    }
    out
}

// =============================================================================
// DEBOUNCE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn burst_of_mutations_produces_one_save() {
    let (store, board_id, owner) = owned_board();
    let session = BoardSession::open(board_id, owner, Stores::from_shared(store.clone()), test_config())
        .await
        .unwrap();

    session.add_node(chart("a")).unwrap();
    for i in 1..=20 {
        session.update_node("a", &NodePatch::position(f64::from(i), 0.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.canvas_save_count(), 0, "quiet period never elapsed during the burst");

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(store.canvas_save_count(), 1);
    let node_updates = store
        .events(board_id)
        .into_iter()
        .filter(|e| e.event_type == BoardEventType::NodeUpdate)
        .count();
    assert_eq!(node_updates, 1);
    assert_eq!(store.stored_nodes(board_id)[0].position.x, 20.0);

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn edit_after_save_schedules_another_save() {
    let (store, board_id, owner) = owned_board();
    let session = BoardSession::open(board_id, owner, Stores::from_shared(store.clone()), test_config())
        .await
        .unwrap();

    session.add_node(chart("a")).unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(store.canvas_save_count(), 1);

    session.update_node("a", &NodePatch::size(10.0, 10.0)).unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(store.canvas_save_count(), 2);

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn edit_during_in_flight_save_gets_its_own_save() {
    let (store, board_id, owner) = owned_board();
    let canvas = Arc::new(ScriptedCanvas::slow(store.clone(), Duration::from_millis(500)));
    let stores = Stores::from_shared(store.clone()).with_canvas(canvas.clone());
    let session = BoardSession::open(board_id, owner, stores, test_config()).await.unwrap();

    session.add_node(chart("a")).unwrap();
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(canvas.attempts(), 1, "first save is in flight");
    assert_eq!(store.canvas_save_count(), 0);

    session.update_node("a", &NodePatch::position(5.0, 5.0)).unwrap();
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    assert_eq!(canvas.attempts(), 2);
    assert_eq!(store.canvas_save_count(), 2);
    assert_eq!(store.stored_nodes(board_id)[0].position.x, 5.0);
    assert!(!session.context().canvas().has_unpersisted_changes());

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_cancels_pending_debounce() {
    let (store, board_id, owner) = owned_board();
    let session = BoardSession::open(board_id, owner, Stores::from_shared(store.clone()), test_config())
        .await
        .unwrap();

    session.add_node(chart("a")).unwrap();
    session.close().await;
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(store.canvas_save_count(), 0);
}

// =============================================================================
// SAVE STEPS
// =============================================================================

#[tokio::test]
async fn save_writes_canvas_widgets_and_event() {
    let (store, board_id, owner) = owned_board();
    let (ctx, _channels) = context_for(Stores::from_shared(store.clone()), board_id, owner, Vec::new()).await;
    let mut notices = ctx.subscribe();
    ctx.canvas().add_node(chart("a")).unwrap();

    let outcome = save_now(&ctx).await;

    let events = store.events(board_id);
    assert_eq!(events.len(), 1);
    assert_eq!(outcome, SaveOutcome::Saved { event_id: Some(events[0].id) });
    assert_eq!(events[0].actor_id, owner);
    assert_eq!(events[0].nodes(), Some(vec![chart("a")]));
    assert_eq!(store.stored_nodes(board_id), vec![chart("a")]);

    let board = store.board(board_id).unwrap();
    assert_eq!(board.widgets.len(), 1);
    assert_eq!(board.widgets[0].props.label, "a");
    assert!(board.last_activity_at.is_some());

    let canvas = ctx.canvas();
    assert!(!canvas.has_unpersisted_changes());
    assert_eq!(canvas.last_applied_event_id(), Some(events[0].id));
    drop(canvas);
    assert_eq!(drain(&mut notices), vec![SyncNotice::Saved { event_id: Some(events[0].id) }]);
}

#[tokio::test]
async fn unchanged_serialization_performs_zero_writes() {
    let (store, board_id, owner) = owned_board();
    let (ctx, _channels) = context_for(Stores::from_shared(store.clone()), board_id, owner, vec![chart("a")]).await;

    assert_eq!(save_now(&ctx).await, SaveOutcome::Skipped);

    // Edit and revert: byte-identical to what is persisted.
    ctx.canvas().update_node("a", &NodePatch::position(9.0, 9.0));
    ctx.canvas().update_node("a", &NodePatch::position(0.0, 0.0));
    assert_eq!(save_now(&ctx).await, SaveOutcome::Skipped);

    assert_eq!(store.canvas_save_count(), 0);
    assert!(store.events(board_id).is_empty());
}

#[tokio::test]
async fn second_save_of_same_state_is_skipped() {
    let (store, board_id, owner) = owned_board();
    let (ctx, _channels) = context_for(Stores::from_shared(store.clone()), board_id, owner, Vec::new()).await;
    ctx.canvas().add_node(chart("a")).unwrap();

    assert!(matches!(save_now(&ctx).await, SaveOutcome::Saved { .. }));
    assert_eq!(save_now(&ctx).await, SaveOutcome::Skipped);
    assert_eq!(store.canvas_save_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn event_append_failure_still_counts_as_saved() {
    let (store, board_id, owner) = owned_board();
    let stores = Stores::from_shared(store.clone()).with_events(Arc::new(FailingFeed::default()));
    let (ctx, _channels) = context_for(stores, board_id, owner, Vec::new()).await;
    ctx.canvas().add_node(chart("a")).unwrap();

    assert_eq!(save_now(&ctx).await, SaveOutcome::Saved { event_id: None });
    assert_eq!(store.canvas_save_count(), 1);
    assert!(!ctx.canvas().has_unpersisted_changes());
    assert_eq!(ctx.canvas().last_applied_event_id(), None);
}

// =============================================================================
// FAILURE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn exhausted_canvas_retries_keep_local_state_and_notify_once() {
    let (store, board_id, owner) = owned_board();
    let failing = Arc::new(FailingCanvas::default());
    let stores = Stores::from_shared(store.clone()).with_canvas(failing.clone());
    let (ctx, _channels) = context_for(stores, board_id, owner, Vec::new()).await;
    let mut notices = ctx.subscribe();
    ctx.canvas().add_node(chart("a")).unwrap();

    assert_eq!(save_now(&ctx).await, SaveOutcome::Failed);

    assert_eq!(failing.attempts(), 3);
    let canvas = ctx.canvas();
    assert_eq!(canvas.len(), 1);
    assert!(canvas.has_unpersisted_changes());
    drop(canvas);
    assert!(store.events(board_id).is_empty());

    let failures: Vec<_> = drain(&mut notices)
        .into_iter()
        .filter(|n| matches!(n, SyncNotice::PersistenceFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(&failures[0], SyncNotice::PersistenceFailed { code: "E_STORE_UNAVAILABLE", .. }));
}

#[tokio::test(start_paused = true)]
async fn failed_save_is_rescheduled_without_another_edit() {
    let (store, board_id, owner) = owned_board();
    let canvas = Arc::new(ScriptedCanvas::failing_first(store.clone(), 3));
    let stores = Stores::from_shared(store.clone()).with_canvas(canvas.clone());
    let session = BoardSession::open(board_id, owner, stores, test_config()).await.unwrap();

    session.add_node(chart("a")).unwrap();
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(canvas.attempts(), 3, "first save exhausted its retries");
    assert_eq!(store.canvas_save_count(), 0);

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(canvas.attempts(), 4);
    assert_eq!(store.stored_nodes(board_id), vec![chart("a")]);
    assert!(!session.context().canvas().has_unpersisted_changes());

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn persistent_outage_reschedules_only_once() {
    let (store, board_id, owner) = owned_board();
    let canvas = Arc::new(ScriptedCanvas::failing_first(store.clone(), usize::MAX));
    let stores = Stores::from_shared(store.clone()).with_canvas(canvas.clone());
    let session = BoardSession::open(board_id, owner, stores, test_config()).await.unwrap();

    session.add_node(chart("a")).unwrap();
    tokio::time::sleep(Duration::from_millis(20_000)).await;
    assert_eq!(canvas.attempts(), 6, "one save plus one rescheduled save");

    session.update_node("a", &NodePatch::position(1.0, 1.0)).unwrap();
    tokio::time::sleep(Duration::from_millis(10_000)).await;
    assert_eq!(canvas.attempts(), 12);
    assert!(session.context().canvas().has_unpersisted_changes());

    session.close().await;
}

// =============================================================================
// PERMISSIONS & LIFECYCLE
// =============================================================================

#[tokio::test]
async fn revoked_editor_never_reaches_storage() {
    let (store, board_id, _owner) = owned_board();
    let editor = Uuid::new_v4();
    store.grant(board_id, editor, BoardRole::Editor);
    let (ctx, _channels) = context_for(Stores::from_shared(store.clone()), board_id, editor, Vec::new()).await;
    ctx.canvas().add_node(chart("a")).unwrap();

    assert!(store.revoke(board_id, editor));
    assert_eq!(save_now(&ctx).await, SaveOutcome::Denied);
    assert_eq!(store.canvas_save_count(), 0);
    assert_eq!(ctx.gate.cached_role(), None);
}

#[tokio::test]
async fn closed_board_discards_save() {
    let (store, board_id, owner) = owned_board();
    let (ctx, _channels) = context_for(Stores::from_shared(store.clone()), board_id, owner, Vec::new()).await;
    ctx.canvas().add_node(chart("a")).unwrap();
    ctx.mark_closed();

    assert_eq!(save_now(&ctx).await, SaveOutcome::Discarded);
    assert_eq!(store.canvas_save_count(), 0);
}

// =============================================================================
// SNAPSHOT CADENCE
// =============================================================================

#[tokio::test]
async fn one_snapshot_per_twenty_five_saves() {
    let (store, board_id, owner) = owned_board();
    let (ctx, _channels) = context_for(Stores::from_shared(store.clone()), board_id, owner, vec![chart("a")]).await;

    let mut last_event = None;
    for i in 1..=50 {
        ctx.canvas().update_node("a", &NodePatch::position(f64::from(i), 0.0));
        let SaveOutcome::Saved { event_id } = save_now(&ctx).await else {
            panic!("save {i} did not persist");
        };
        last_event = event_id;
        tokio::time::sleep(Duration::from_millis(1)).await;

        match i {
            24 => assert!(store.snapshots(board_id).is_empty()),
            25 => {
                let snapshots = store.snapshots(board_id);
                assert_eq!(snapshots.len(), 1);
                assert_eq!(snapshots[0].source_event_id, last_event);
                assert_eq!(snapshots[0].nodes[0].position.x, 25.0);
                assert_eq!(ctx.changes_since_snapshot(), 0);
            }
            49 => assert_eq!(store.snapshots(board_id).len(), 1),
            _ => {}
        }
    }

    let snapshots = store.snapshots(board_id);
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[1].version > snapshots[0].version);
    assert_eq!(snapshots[1].source_event_id, last_event);
}
