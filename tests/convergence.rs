//! Multi-client scenarios against one shared in-memory backend.

use std::sync::Arc;

use boardsync::services::persistence::SaveOutcome;
use boardsync::services::sync::PollOutcome;
use boardsync::store::CanvasStore;
use boardsync::store::memory::MemoryStore;
use boardsync::{BoardEventType, BoardRole, BoardSession, MutationError, Node, NodeKind, NodePatch, Position, Size, Stores, SyncConfig};
use uuid::Uuid;

fn node(id: &str) -> Node {
    Node::new(id, NodeKind::LineChart, Position { x: 0.0, y: 0.0 }, Size { width: 300.0, height: 180.0 })
}

/// Timers far in the future: every save and poll in these scenarios is explicit.
fn manual_config() -> SyncConfig {
    SyncConfig { save_debounce_ms: 600_000, poll_interval_ms: 600_000, ..SyncConfig::default() }
}

async fn client(store: &Arc<MemoryStore>, board_id: Uuid, user_id: Uuid) -> BoardSession {
    BoardSession::open(board_id, user_id, Stores::from_shared(store.clone()), manual_config())
        .await
        .unwrap()
}

fn shared_board() -> (Arc<MemoryStore>, Uuid, Uuid, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let (board_id, alice, bob) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    store.create_board(board_id, alice);
    store.grant(board_id, bob, BoardRole::Editor);
    (store, board_id, alice, bob)
}

#[tokio::test]
async fn concurrent_overwrite_last_writer_wins() {
    let (store, board_id, alice, bob) = shared_board();
    store.save(board_id, &[node("x")]).await.unwrap();
    let a = client(&store, board_id, alice).await;
    let b = client(&store, board_id, bob).await;

    // A saves [X] with a moved X.
    a.update_node("x", &NodePatch::position(100.0, 100.0)).unwrap();
    assert!(matches!(a.flush().await, SaveOutcome::Saved { .. }));

    // B has not polled: it saves [X, Y] from its stale view.
    b.add_node(node("y")).unwrap();
    assert!(matches!(b.flush().await, SaveOutcome::Saved { .. }));

    // A keeps editing X, then polls before its next save.
    a.update_node("x", &NodePatch::position(200.0, 200.0)).unwrap();
    assert!(matches!(a.sync_now().await, PollOutcome::Applied { .. }));
    assert_eq!(b.sync_now().await, PollOutcome::Idle);

    let expected = vec![node("x"), node("y")];
    assert_eq!(a.nodes(), expected);
    assert_eq!(b.nodes(), expected);
    assert_eq!(store.stored_nodes(board_id), expected);

    // A's later move of X is gone, and nothing is left to save.
    assert_eq!(a.nodes()[0].position, Position { x: 0.0, y: 0.0 });
    assert_eq!(a.flush().await, SaveOutcome::Skipped);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn viewer_mutations_never_reach_storage() {
    let (store, board_id, alice, _bob) = shared_board();
    let viewer = Uuid::new_v4();
    store.grant(board_id, viewer, BoardRole::Viewer);
    let owner = client(&store, board_id, alice).await;
    owner.add_node(node("x")).unwrap();
    owner.flush().await;
    let saves = store.canvas_save_count();

    let v = client(&store, board_id, viewer).await;
    assert_eq!(v.nodes().len(), 1);
    assert!(matches!(
        v.add_node(node("y")),
        Err(MutationError::Denied { role: Some(BoardRole::Viewer), .. })
    ));
    assert_eq!(v.nodes().len(), 1);
    assert_eq!(v.flush().await, SaveOutcome::Denied);
    assert_eq!(store.canvas_save_count(), saves);

    owner.close().await;
    v.close().await;
}

#[tokio::test]
async fn restore_converges_other_clients() {
    let (store, board_id, alice, bob) = shared_board();
    let a = client(&store, board_id, alice).await;
    let b = client(&store, board_id, bob).await;

    a.add_node(node("x")).unwrap();
    a.flush().await;
    boardsync::services::snapshot::checkpoint(a.context(), None, a.nodes()).await.unwrap();

    a.add_node(node("y")).unwrap();
    a.flush().await;
    b.sync_now().await;
    assert_eq!(b.nodes().len(), 2);

    a.restore_latest_snapshot().await.unwrap();
    assert!(matches!(b.sync_now().await, PollOutcome::Restored { .. }));
    assert_eq!(b.nodes(), vec![node("x")]);

    // The restorer's follow-up save carries the same state: an echo for B.
    assert!(matches!(a.flush().await, SaveOutcome::Saved { .. }));
    assert!(matches!(b.sync_now().await, PollOutcome::SelfEcho { .. }));
    assert_eq!(b.nodes(), vec![node("x")]);
    assert_eq!(store.stored_nodes(board_id), vec![node("x")]);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn revoked_editor_loses_write_access_after_poll() {
    let (store, board_id, alice, bob) = shared_board();
    let a = client(&store, board_id, alice).await;
    let b = client(&store, board_id, bob).await;
    b.add_node(node("draft")).unwrap();

    assert!(store.revoke(board_id, bob));
    assert_eq!(b.role(), Some(BoardRole::Editor), "cached until the next tick");
    assert_eq!(b.sync_now().await, PollOutcome::Idle);
    assert_eq!(b.role(), None);
    assert!(b.add_node(node("late")).is_err());
    assert_eq!(b.flush().await, SaveOutcome::Denied);
    assert!(store.stored_nodes(board_id).is_empty());

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn revoked_editor_cannot_roll_back_peers() {
    let (store, board_id, alice, bob) = shared_board();
    let a = client(&store, board_id, alice).await;
    let b = client(&store, board_id, bob).await;

    a.add_node(node("x")).unwrap();
    a.flush().await;
    boardsync::services::snapshot::checkpoint(a.context(), None, a.nodes()).await.unwrap();
    a.add_node(node("y")).unwrap();
    a.flush().await;
    b.sync_now().await;
    assert_eq!(b.nodes().len(), 2);

    assert!(store.revoke(board_id, bob));
    assert!(b.restore_latest_snapshot().await.is_err());
    assert_eq!(b.nodes().len(), 2);

    let restores = store
        .events(board_id)
        .into_iter()
        .filter(|e| e.event_type == BoardEventType::RestoreVersion)
        .count();
    assert_eq!(restores, 0);
    assert_eq!(a.sync_now().await, PollOutcome::Idle);
    assert_eq!(a.nodes(), vec![node("x"), node("y")]);
    assert_eq!(store.stored_nodes(board_id), vec![node("x"), node("y")]);

    a.close().await;
    b.close().await;
}
