//! In-process backend for every collaborator trait.
//!
//! DESIGN
//! ======
//! Used when no database is configured and as the shared "server" in tests.
//! The store is an explicit value: whoever opens a board session decides
//! which instance to inject, and the data lives exactly as long as that
//! instance. Several sessions sharing one `Arc<MemoryStore>` behave like
//! several clients talking to the same backend.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::{BoardStore, CanvasStore, EventFeed, PermissionService, PresenceStore, SnapshotStore, StoreError};
use crate::clock::now_ms;
use crate::model::{
    BoardEvent, BoardEventType, BoardMember, BoardRole, EventId, MemberStatus, Node, PresenceRecord, Snapshot, Widget,
};
use crate::services::permission::resolve_role_from;

#[derive(Debug, Clone, Default)]
pub struct BoardRecord {
    pub owner_id: Option<Uuid>,
    pub widgets: Vec<Widget>,
    pub last_activity_at: Option<i64>,
}

#[derive(Default)]
struct MemoryInner {
    boards: HashMap<Uuid, BoardRecord>,
    members: HashMap<Uuid, Vec<BoardMember>>,
    canvases: HashMap<Uuid, Vec<Node>>,
    events: HashMap<Uuid, Vec<BoardEvent>>,
    next_event_id: EventId,
    snapshots: HashMap<Uuid, Vec<Snapshot>>,
    presence: HashMap<Uuid, Vec<PresenceRecord>>,
    canvas_saves: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a board and its owner.
    pub fn create_board(&self, board_id: Uuid, owner_id: Uuid) {
        self.lock()
            .boards
            .insert(board_id, BoardRecord { owner_id: Some(owner_id), ..BoardRecord::default() });
    }

    /// Insert or replace a membership row for (board, user).
    pub fn upsert_member(&self, member: BoardMember) {
        let mut inner = self.lock();
        let members = inner.members.entry(member.board_id).or_default();
        match members.iter_mut().find(|m| m.user_id == member.user_id) {
            Some(existing) => *existing = member,
            None => members.push(member),
        }
    }

    /// Grant an active role to a user on a board.
    pub fn grant(&self, board_id: Uuid, user_id: Uuid, role: BoardRole) {
        self.upsert_member(BoardMember { board_id, user_id, role, status: MemberStatus::Active });
    }

    /// Mark a membership revoked. Returns false if no such member exists.
    pub fn revoke(&self, board_id: Uuid, user_id: Uuid) -> bool {
        let mut inner = self.lock();
        let Some(member) = inner
            .members
            .get_mut(&board_id)
            .and_then(|members| members.iter_mut().find(|m| m.user_id == user_id))
        else {
            return false;
        };
        member.status = MemberStatus::Revoked;
        true
    }

    #[must_use]
    pub fn board(&self, board_id: Uuid) -> Option<BoardRecord> {
        self.lock().boards.get(&board_id).cloned()
    }

    /// Number of successful canvas writes across all boards.
    #[must_use]
    pub fn canvas_save_count(&self) -> usize {
        self.lock().canvas_saves
    }

    /// Events for a board in append order (oldest first).
    #[must_use]
    pub fn events(&self, board_id: Uuid) -> Vec<BoardEvent> {
        self.lock().events.get(&board_id).cloned().unwrap_or_default()
    }

    /// Snapshots for a board in creation order.
    #[must_use]
    pub fn snapshots(&self, board_id: Uuid) -> Vec<Snapshot> {
        self.lock().snapshots.get(&board_id).cloned().unwrap_or_default()
    }

    /// Canvas nodes as last saved, without going through the async trait.
    #[must_use]
    pub fn stored_nodes(&self, board_id: Uuid) -> Vec<Node> {
        self.lock().canvases.get(&board_id).cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl CanvasStore for MemoryStore {
    async fn save(&self, board_id: Uuid, nodes: &[Node]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.canvases.insert(board_id, nodes.to_vec());
        inner.canvas_saves += 1;
        Ok(())
    }

    async fn load(&self, board_id: Uuid) -> Result<Vec<Node>, StoreError> {
        Ok(self.stored_nodes(board_id))
    }
}

#[async_trait::async_trait]
impl BoardStore for MemoryStore {
    async fn publish_widgets(&self, board_id: Uuid, widgets: &[Widget], touched_at: i64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let board = inner
            .boards
            .get_mut(&board_id)
            .ok_or(StoreError::BoardNotFound(board_id))?;
        board.widgets = widgets.to_vec();
        board.last_activity_at = Some(touched_at);
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventFeed for MemoryStore {
    async fn append(
        &self,
        board_id: Uuid,
        actor_id: Uuid,
        event_type: BoardEventType,
        payload: serde_json::Value,
    ) -> Result<EventId, StoreError> {
        let mut inner = self.lock();
        inner.next_event_id += 1;
        let id = inner.next_event_id;
        inner.events.entry(board_id).or_default().push(BoardEvent {
            id,
            board_id,
            actor_id,
            event_type,
            payload,
            created_at: now_ms(),
        });
        Ok(id)
    }

    async fn list_recent(&self, board_id: Uuid, limit: usize) -> Result<Vec<BoardEvent>, StoreError> {
        let inner = self.lock();
        let Some(events) = inner.events.get(&board_id) else {
            return Ok(Vec::new());
        };
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryStore {
    async fn create(&self, snapshot: Snapshot) -> Result<Snapshot, StoreError> {
        self.lock()
            .snapshots
            .entry(snapshot.board_id)
            .or_default()
            .push(snapshot.clone());
        Ok(snapshot)
    }

    async fn list_by_version_desc(&self, board_id: Uuid, limit: usize) -> Result<Vec<Snapshot>, StoreError> {
        let mut snapshots = self.snapshots(board_id);
        snapshots.sort_by(|a, b| b.version.cmp(&a.version));
        snapshots.truncate(limit);
        Ok(snapshots)
    }
}

#[async_trait::async_trait]
impl PermissionService for MemoryStore {
    async fn resolve_role(&self, board_id: Uuid, user_id: Uuid) -> Result<Option<BoardRole>, StoreError> {
        let inner = self.lock();
        let owner_id = inner.boards.get(&board_id).and_then(|b| b.owner_id);
        let members = inner.members.get(&board_id).map_or(&[][..], Vec::as_slice);
        Ok(resolve_role_from(owner_id, members, user_id))
    }
}

#[async_trait::async_trait]
impl PresenceStore for MemoryStore {
    async fn upsert(&self, record: PresenceRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let records = inner.presence.entry(record.board_id).or_default();
        match records.iter_mut().find(|r| r.user_id == record.user_id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn list_by_board(&self, board_id: Uuid, limit: usize) -> Result<Vec<PresenceRecord>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .presence
            .get(&board_id)
            .map(|records| records.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
