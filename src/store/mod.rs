//! Collaborator seams — storage, event feed, snapshots, permissions, presence.
//!
//! ARCHITECTURE
//! ============
//! The engine never talks to a database directly. Each remote concern is an
//! async trait; a session receives one [`Stores`] bundle when the board is
//! opened and drops it when the board is closed. [`memory::MemoryStore`]
//! and [`postgres::PgStore`] implement every trait.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use uuid::Uuid;

use crate::model::{BoardEvent, BoardEventType, BoardRole, EventId, Node, PresenceRecord, Snapshot, Widget};
use crate::notice::ErrorCode;

/// Default listing bound for events and snapshots.
pub const DEFAULT_LIST_LIMIT: usize = 200;
/// Default listing bound for presence records.
pub const DEFAULT_PRESENCE_LIMIT: usize = 100;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("board not found: {0}")]
    BoardNotFound(Uuid),
    #[error("malformed row: {0}")]
    Malformed(String),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
            Self::Database(_) => "E_DATABASE",
            Self::Serialization(_) => "E_SERIALIZATION",
            Self::BoardNotFound(_) => "E_BOARD_NOT_FOUND",
            Self::Malformed(_) => "E_MALFORMED_ROW",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Database(_))
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Durable home of a board's node collection.
#[async_trait::async_trait]
pub trait CanvasStore: Send + Sync {
    async fn save(&self, board_id: Uuid, nodes: &[Node]) -> Result<(), StoreError>;

    /// Nodes last saved for the board; empty if never saved.
    async fn load(&self, board_id: Uuid) -> Result<Vec<Node>, StoreError>;
}

/// Board metadata (widget projection, activity timestamp).
#[async_trait::async_trait]
pub trait BoardStore: Send + Sync {
    async fn publish_widgets(&self, board_id: Uuid, widgets: &[Widget], touched_at: i64) -> Result<(), StoreError>;
}

/// Shared append-only event log.
#[async_trait::async_trait]
pub trait EventFeed: Send + Sync {
    async fn append(
        &self,
        board_id: Uuid,
        actor_id: Uuid,
        event_type: BoardEventType,
        payload: serde_json::Value,
    ) -> Result<EventId, StoreError>;

    /// Most recent events first.
    async fn list_recent(&self, board_id: Uuid, limit: usize) -> Result<Vec<BoardEvent>, StoreError>;
}

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn create(&self, snapshot: Snapshot) -> Result<Snapshot, StoreError>;

    /// Highest version first.
    async fn list_by_version_desc(&self, board_id: Uuid, limit: usize) -> Result<Vec<Snapshot>, StoreError>;
}

#[async_trait::async_trait]
pub trait PermissionService: Send + Sync {
    /// `None` means the user has no access at all.
    async fn resolve_role(&self, board_id: Uuid, user_id: Uuid) -> Result<Option<BoardRole>, StoreError>;
}

#[async_trait::async_trait]
pub trait PresenceStore: Send + Sync {
    /// One record per (board, user); later writes replace earlier ones.
    async fn upsert(&self, record: PresenceRecord) -> Result<(), StoreError>;

    async fn list_by_board(&self, board_id: Uuid, limit: usize) -> Result<Vec<PresenceRecord>, StoreError>;
}

// =============================================================================
// BUNDLE
// =============================================================================

/// Collaborators injected into one board session.
#[derive(Clone)]
pub struct Stores {
    pub canvas: Arc<dyn CanvasStore>,
    pub boards: Arc<dyn BoardStore>,
    pub events: Arc<dyn EventFeed>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub permissions: Arc<dyn PermissionService>,
    pub presence: Arc<dyn PresenceStore>,
}

impl Stores {
    /// Use one backend for every collaborator.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: CanvasStore + BoardStore + EventFeed + SnapshotStore + PermissionService + PresenceStore + 'static,
    {
        Self {
            canvas: store.clone(),
            boards: store.clone(),
            events: store.clone(),
            snapshots: store.clone(),
            permissions: store.clone(),
            presence: store,
        }
    }

    #[must_use]
    pub fn with_canvas(mut self, canvas: Arc<dyn CanvasStore>) -> Self {
        self.canvas = canvas;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventFeed>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = snapshots;
        self
    }
}
