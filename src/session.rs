//! Board session — the UI-facing handle for one open board.
//!
//! ARCHITECTURE
//! ============
//! `BoardSession::open` hydrates the canvas from the canvas store, resolves
//! the caller's role and spawns three tasks sharing one [`SessionContext`]:
//!
//! ```text
//!   add/update/remove ──► CanvasState ──dirty──► persistence gateway ──► stores
//!                              ▲                                            │
//!                              └──────────── sync loop ◄── event feed ◄─────┘
//!   heartbeat ──► presence store ◄── keep-alive
//! ```
//!
//! Mutations are synchronous and check the cached role first. Closing (or
//! dropping) the session stops all timers; in-flight work completes but is
//! discarded.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::model::{BoardRole, Node, NodeChange, NodePatch, PresenceRecord};
use crate::notice::{ErrorCode, SyncNotice};
use crate::services::canvas::{CanvasState, MutationError, MutationOutcome};
use crate::services::persistence::{SaveOutcome, save_now, spawn_persistence_task};
use crate::services::presence::{list_active, report_cursor, spawn_presence_keepalive};
use crate::services::retry::{RetryPolicy, with_retry};
use crate::services::snapshot::{SnapshotError, restore_latest};
use crate::services::sync::{PollOutcome, poll_once, spawn_sync_loop};
use crate::state::{LocalCursor, SessionContext};
use crate::store::{StoreError, Stores};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to load canvas for board {board_id}: {source}")]
    Load {
        board_id: Uuid,
        #[source]
        source: StoreError,
    },
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Load { .. } => "E_CANVAS_LOAD",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Load { source, .. } => source.retryable(),
        }
    }
}

pub struct BoardSession {
    ctx: Arc<SessionContext>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BoardSession {
    /// Open a board for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Load`] if the canvas cannot be loaded after
    /// retries. A failed role lookup does not fail the open; the session
    /// starts read-only.
    pub async fn open(board_id: Uuid, user_id: Uuid, stores: Stores, config: SyncConfig) -> Result<Self, SessionError> {
        let canvas_store = stores.canvas.clone();
        let nodes = with_retry(RetryPolicy::from_config(&config), "canvas_load", || canvas_store.load(board_id))
            .await
            .map_err(|source| SessionError::Load { board_id, source })?;
        let count = nodes.len();

        // No cursor yet: the first poll compares the newest event against
        // the loaded state and applies it only if it differs.
        let canvas = CanvasState::hydrated(board_id, nodes, None);
        let (ctx, channels) = SessionContext::new(board_id, user_id, stores, config, canvas);
        let (role, _) = ctx.gate.refresh().await;

        let tasks = vec![
            spawn_persistence_task(ctx.clone(), channels.dirty_rx),
            spawn_sync_loop(ctx.clone()),
            spawn_presence_keepalive(ctx.clone()),
        ];
        info!(%board_id, %user_id, ?role, nodes = count, "board session opened");
        Ok(Self { ctx, shutdown_tx: channels.shutdown_tx, tasks })
    }

    #[must_use]
    pub fn board_id(&self) -> Uuid {
        self.ctx.board_id
    }

    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.ctx.user_id
    }

    /// Role as last resolved.
    #[must_use]
    pub fn role(&self) -> Option<BoardRole> {
        self.ctx.gate.cached_role()
    }

    #[must_use]
    pub fn nodes(&self) -> Vec<Node> {
        self.ctx.canvas().nodes().to_vec()
    }

    #[must_use]
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.ctx.subscribe()
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Add a node.
    ///
    /// # Errors
    ///
    /// [`MutationError::Denied`] for viewers and users without access,
    /// [`MutationError::DuplicateNode`] if the id exists.
    pub fn add_node(&self, node: Node) -> Result<MutationOutcome, MutationError> {
        self.mutate(|canvas| canvas.add_node(node))
    }

    /// Merge `patch` into an existing node.
    ///
    /// # Errors
    ///
    /// [`MutationError::Denied`] for viewers and users without access.
    pub fn update_node(&self, id: &str, patch: &NodePatch) -> Result<MutationOutcome, MutationError> {
        self.mutate(|canvas| Ok(canvas.update_node(id, patch)))
    }

    /// # Errors
    ///
    /// [`MutationError::Denied`] for viewers and users without access.
    pub fn remove_node(&self, id: &str) -> Result<MutationOutcome, MutationError> {
        self.mutate(|canvas| Ok(canvas.remove_node(id)))
    }

    /// # Errors
    ///
    /// [`MutationError::Denied`] for viewers and users without access.
    pub fn clear(&self) -> Result<MutationOutcome, MutationError> {
        self.mutate(|canvas| Ok(canvas.clear()))
    }

    /// Apply a burst of drag/resize changes as one mutation.
    ///
    /// # Errors
    ///
    /// [`MutationError::Denied`] for viewers and users without access.
    pub fn apply_changes(&self, changes: &[NodeChange]) -> Result<MutationOutcome, MutationError> {
        self.mutate(|canvas| Ok(canvas.apply_changes(changes)))
    }

    fn mutate<F>(&self, op: F) -> Result<MutationOutcome, MutationError>
    where
        F: FnOnce(&mut CanvasState) -> Result<MutationOutcome, MutationError>,
    {
        if let Err(e) = self.ctx.gate.check() {
            debug!(board_id = %self.ctx.board_id, user_id = %self.ctx.user_id, error = %e, "mutation denied");
            return Err(e);
        }
        let outcome = op(&mut self.ctx.canvas())?;
        if outcome == MutationOutcome::Applied {
            self.ctx.mark_dirty();
        }
        Ok(outcome)
    }

    // =========================================================================
    // SNAPSHOTS, PRESENCE, SYNC
    // =========================================================================

    /// Replace the canvas with the newest snapshot. Returns its version.
    ///
    /// # Errors
    ///
    /// See [`restore_latest`].
    pub async fn restore_latest_snapshot(&self) -> Result<i64, SnapshotError> {
        restore_latest(&self.ctx).await
    }

    /// Report the local cursor.
    ///
    /// # Errors
    ///
    /// Propagates presence store failures.
    pub async fn heartbeat(&self, x: f64, y: f64, active_node_id: Option<String>) -> Result<(), StoreError> {
        report_cursor(&self.ctx, LocalCursor { x, y, active_node_id }).await
    }

    /// Other users seen on this board within the staleness window.
    ///
    /// # Errors
    ///
    /// Propagates presence store failures.
    pub async fn active_peers(&self) -> Result<Vec<PresenceRecord>, StoreError> {
        list_active(&self.ctx).await
    }

    /// Save now instead of waiting for the debounce.
    pub async fn flush(&self) -> SaveOutcome {
        save_now(&self.ctx).await
    }

    /// Run one sync tick now: role re-check, then poll the event feed.
    pub async fn sync_now(&self) -> PollOutcome {
        if self.ctx.config.role_recheck {
            self.ctx.recheck_role().await;
        }
        poll_once(&self.ctx).await
    }

    /// Stop all timers and wait for the background tasks to exit.
    pub async fn close(mut self) {
        self.signal_shutdown();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(error = %e, board_id = %self.ctx.board_id, "session task ended abnormally");
            }
        }
        info!(board_id = %self.ctx.board_id, user_id = %self.ctx.user_id, "board session closed");
    }

    fn signal_shutdown(&self) {
        self.ctx.mark_closed();
        // Receivers gone means every task has already exited.
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for BoardSession {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
