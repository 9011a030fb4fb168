//! Shared session state.
//!
//! DESIGN
//! ======
//! `SessionContext` is shared (behind an `Arc`) by the session handle and
//! the three background tasks of one open board: the debounced persistence
//! gateway, the event-feed poll loop and the presence keep-alive. The canvas
//! sits behind a std `Mutex` that is only ever held for short, synchronous
//! sections and never across an `.await`.
//!
//! When the board is closed, `open` flips to false and the shutdown signal
//! fires. Tasks stop waiting on timers immediately; a save or poll already
//! in flight runs to completion but must check `is_open()` before touching
//! the canvas.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use crate::clock::VersionClock;
use crate::config::SyncConfig;
use crate::model::BoardRole;
use crate::notice::{NOTICE_CHANNEL_CAPACITY, SyncNotice};
use crate::services::canvas::CanvasState;
use crate::services::permission::PermissionGate;
use crate::services::retry::RetryPolicy;
use crate::services::sync::{LastWriterWins, MergePolicy};
use crate::store::Stores;

/// Capacity of the dirty-notification queue. One pending signal is enough
/// to guarantee a follow-up save, so a full queue is not an error.
pub const DIRTY_QUEUE_CAPACITY: usize = 16;

/// Last cursor reported by the local user, re-sent by the keep-alive.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCursor {
    pub x: f64,
    pub y: f64,
    pub active_node_id: Option<String>,
}

pub struct SessionContext {
    pub board_id: Uuid,
    pub user_id: Uuid,
    pub config: SyncConfig,
    pub stores: Stores,
    pub gate: PermissionGate,
    pub merge: Box<dyn MergePolicy>,
    pub versions: VersionClock,
    canvas: Mutex<CanvasState>,
    cursor: Mutex<Option<LocalCursor>>,
    /// Successful saves since the last checkpoint.
    changes_since_snapshot: AtomicU32,
    /// Held for the duration of a save: at most one save in flight.
    save_lock: tokio::sync::Mutex<()>,
    open: AtomicBool,
    dirty_tx: mpsc::Sender<()>,
    notices: broadcast::Sender<SyncNotice>,
    shutdown: watch::Receiver<bool>,
}

/// Receiving ends handed to the background tasks at spawn time.
pub struct SessionChannels {
    pub dirty_rx: mpsc::Receiver<()>,
    pub shutdown_tx: watch::Sender<bool>,
}

impl SessionContext {
    #[must_use]
    pub fn new(board_id: Uuid, user_id: Uuid, stores: Stores, config: SyncConfig, canvas: CanvasState) -> (Arc<Self>, SessionChannels) {
        let (dirty_tx, dirty_rx) = mpsc::channel(DIRTY_QUEUE_CAPACITY);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let gate = PermissionGate::new(stores.permissions.clone(), board_id, user_id);
        let ctx = Self {
            board_id,
            user_id,
            config,
            stores,
            gate,
            merge: Box::new(LastWriterWins),
            versions: VersionClock::new(),
            canvas: Mutex::new(canvas),
            cursor: Mutex::new(None),
            changes_since_snapshot: AtomicU32::new(0),
            save_lock: tokio::sync::Mutex::new(()),
            open: AtomicBool::new(true),
            dirty_tx,
            notices,
            shutdown,
        };
        (Arc::new(ctx), SessionChannels { dirty_rx, shutdown_tx })
    }

    pub fn canvas(&self) -> MutexGuard<'_, CanvasState> {
        self.canvas.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    /// Ask the gateway for a save. Never blocks.
    pub fn mark_dirty(&self) {
        match self.dirty_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!(board_id = %self.board_id, "persistence gateway stopped; dirty signal dropped");
            }
        }
        self.notify(SyncNotice::Dirty);
    }

    pub fn notify(&self, notice: SyncNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    /// Re-resolve the role, publishing [`SyncNotice::RoleChanged`] if it moved.
    pub async fn recheck_role(&self) -> Option<BoardRole> {
        let (role, changed) = self.gate.refresh().await;
        if changed {
            self.notify(SyncNotice::RoleChanged { role });
        }
        role
    }

    /// Count one successful save; true when a checkpoint is due (counter resets).
    pub(crate) fn count_successful_save(&self) -> bool {
        let every = self.config.snapshot_every;
        if every == 0 {
            return false;
        }
        let count = self.changes_since_snapshot.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= every {
            self.changes_since_snapshot.store(0, Ordering::Release);
            return true;
        }
        false
    }

    #[must_use]
    pub fn changes_since_snapshot(&self) -> u32 {
        self.changes_since_snapshot.load(Ordering::Acquire)
    }

    pub(crate) async fn lock_save(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.save_lock.lock().await
    }

    pub fn set_cursor(&self, cursor: LocalCursor) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = Some(cursor);
    }

    #[must_use]
    pub fn last_cursor(&self) -> Option<LocalCursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
