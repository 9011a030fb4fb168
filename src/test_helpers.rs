//! Shared fixtures and collaborator doubles for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use uuid::Uuid;

use crate::config::SyncConfig;
use crate::model::{BoardEvent, BoardEventType, EventId, Node, NodeKind, Position, Size, Snapshot, project_widgets};
use crate::services::canvas::CanvasState;
use crate::state::{SessionChannels, SessionContext};
use crate::store::memory::MemoryStore;
use crate::store::{CanvasStore, EventFeed, SnapshotStore, StoreError, Stores};

/// A bar chart node at the origin.
#[must_use]
pub fn chart(id: &str) -> Node {
    Node::new(id, NodeKind::BarChart, Position { x: 0.0, y: 0.0 }, Size { width: 320.0, height: 200.0 })
        .with_payload(serde_json::json!({ "label": id, "data": [{ "label": "q1", "value": 3 }] }))
}

#[must_use]
pub fn snapshot_at(board_id: Uuid, version: i64, nodes: Vec<Node>) -> Snapshot {
    Snapshot {
        id: Uuid::new_v4(),
        board_id,
        version,
        source_event_id: None,
        widgets: project_widgets(&nodes),
        nodes,
        created_by: Uuid::new_v4(),
        created_at: version,
    }
}

/// Defaults without jitter, so backoff delays are exact.
#[must_use]
pub fn test_config() -> SyncConfig {
    SyncConfig { persist_retry_jitter_ms: 0, ..SyncConfig::default() }
}

/// A memory store with one board owned by the returned user.
#[must_use]
pub fn owned_board() -> (Arc<MemoryStore>, Uuid, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let board_id = Uuid::new_v4();
    let owner_id = Uuid::new_v4();
    store.create_board(board_id, owner_id);
    (store, board_id, owner_id)
}

/// Session context with a resolved role and no background tasks.
pub async fn context_for(stores: Stores, board_id: Uuid, user_id: Uuid, nodes: Vec<Node>) -> (Arc<SessionContext>, SessionChannels) {
    let canvas = CanvasState::hydrated(board_id, nodes, None);
    let (ctx, channels) = SessionContext::new(board_id, user_id, stores, test_config(), canvas);
    ctx.gate.refresh().await;
    (ctx, channels)
}

// =============================================================================
// DOUBLES
// =============================================================================

/// Canvas store that always fails with a retryable error.
#[derive(Default)]
pub struct FailingCanvas {
    pub attempts: AtomicUsize,
}

impl FailingCanvas {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CanvasStore for FailingCanvas {
    async fn save(&self, _board_id: Uuid, _nodes: &[Node]) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("canvas store offline".into()))
    }

    async fn load(&self, _board_id: Uuid) -> Result<Vec<Node>, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("canvas store offline".into()))
    }
}

/// Canvas store backed by a memory store whose saves can be slowed down
/// and made to fail a fixed number of times. Loads always pass through.
pub struct ScriptedCanvas {
    inner: Arc<MemoryStore>,
    save_delay: Duration,
    failures_left: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl ScriptedCanvas {
    pub fn slow(inner: Arc<MemoryStore>, save_delay: Duration) -> Self {
        Self { inner, save_delay, failures_left: AtomicUsize::new(0), attempts: AtomicUsize::new(0) }
    }

    pub fn failing_first(inner: Arc<MemoryStore>, failures: usize) -> Self {
        Self { inner, save_delay: Duration::ZERO, failures_left: AtomicUsize::new(failures), attempts: AtomicUsize::new(0) }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CanvasStore for ScriptedCanvas {
    async fn save(&self, board_id: Uuid, nodes: &[Node]) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.save_delay.is_zero() {
            tokio::time::sleep(self.save_delay).await;
        }
        if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(StoreError::Unavailable("canvas store offline".into()));
        }
        self.inner.save(board_id, nodes).await
    }

    async fn load(&self, board_id: Uuid) -> Result<Vec<Node>, StoreError> {
        self.inner.load(board_id).await
    }
}

/// Event feed whose reads fail; appends are counted and rejected.
#[derive(Default)]
pub struct FailingFeed {
    pub reads: AtomicUsize,
}

#[async_trait::async_trait]
impl EventFeed for FailingFeed {
    async fn append(
        &self,
        _board_id: Uuid,
        _actor_id: Uuid,
        _event_type: BoardEventType,
        _payload: serde_json::Value,
    ) -> Result<EventId, StoreError> {
        Err(StoreError::Unavailable("event feed offline".into()))
    }

    async fn list_recent(&self, _board_id: Uuid, _limit: usize) -> Result<Vec<BoardEvent>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("event feed offline".into()))
    }
}

/// Snapshot store that rejects every write but lists nothing.
#[derive(Default)]
pub struct FailingSnapshots {
    pub creates: AtomicUsize,
}

#[async_trait::async_trait]
impl SnapshotStore for FailingSnapshots {
    async fn create(&self, _snapshot: Snapshot) -> Result<Snapshot, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("snapshot store offline".into()))
    }

    async fn list_by_version_desc(&self, _board_id: Uuid, _limit: usize) -> Result<Vec<Snapshot>, StoreError> {
        Ok(Vec::new())
    }
}
