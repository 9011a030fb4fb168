//! Notices — the dirty/error stream a UI layer subscribes to.
//!
//! DESIGN
//! ======
//! Notices are fire-and-forget on a `broadcast` channel. A session with no
//! subscribers simply drops them; a lagging subscriber loses the oldest.
//! Persistence failures are published once per failed save, never per
//! attempt.

use serde::Serialize;
use uuid::Uuid;

use crate::model::{BoardRole, EventId};

/// Capacity of the per-session notice channel.
pub const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Grepable error code and retryable flag for notices and retry decisions.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncNotice {
    /// A local mutation was applied and a save is scheduled.
    Dirty,
    /// A save reached the canvas store. `event_id` is absent if the event
    /// append failed after the canvas write succeeded.
    Saved { event_id: Option<EventId> },
    /// The debounced save found nothing new to write.
    SaveSkipped,
    /// All attempts to persist the canvas failed. Local state is kept.
    PersistenceFailed { code: &'static str, message: String },
    /// Another client's update replaced the local canvas.
    RemoteApplied { event_id: EventId, actor_id: Uuid },
    /// The canvas was replaced with a snapshot.
    Restored { version: i64 },
    SnapshotCreated { version: i64 },
    /// The resolved role changed on refresh.
    RoleChanged { role: Option<BoardRole> },
}

impl SyncNotice {
    pub(crate) fn persistence_failed(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::PersistenceFailed { code: err.error_code(), message: err.to_string() }
    }
}
