//! Snapshot checkpointer — full-state checkpoints and restore.
//!
//! DESIGN
//! ======
//! Snapshots are immutable and versioned per board with a strictly
//! increasing version. The gateway checkpoints every `snapshot_every`
//! successful saves on a detached task; a failed checkpoint is logged and
//! never affects the save that triggered it.
//!
//! Restore takes the highest version, replaces the local canvas, appends a
//! `restore_version` event so other clients converge on their next poll,
//! and marks the canvas dirty so the restored state is saved like any
//! other edit.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::now_ms;
use crate::model::{BoardEventType, EventId, Node, Snapshot, project_widgets, restore_version_payload};
use crate::notice::{ErrorCode, SyncNotice};
use crate::services::canvas::MutationError;
use crate::services::permission::can_mutate;
use crate::services::retry::with_retry;
use crate::state::SessionContext;
use crate::store::{SnapshotStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("board {0} has no snapshots")]
    NoSnapshots(Uuid),
    #[error("snapshot version {version} is not greater than latest stored version {latest}")]
    StaleVersion { version: i64, latest: i64 },
    #[error("board {0} was closed before the restore ran")]
    Closed(Uuid),
    #[error(transparent)]
    Denied(#[from] MutationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for SnapshotError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NoSnapshots(_) => "E_NO_SNAPSHOTS",
            Self::StaleVersion { .. } => "E_STALE_SNAPSHOT_VERSION",
            Self::Closed(_) => "E_BOARD_CLOSED",
            Self::Denied(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

/// Highest stored version for a board, if any.
///
/// # Errors
///
/// Propagates snapshot store failures.
pub async fn latest_version(store: &dyn SnapshotStore, board_id: Uuid) -> Result<Option<i64>, SnapshotError> {
    let latest = store.list_by_version_desc(board_id, 1).await?;
    Ok(latest.first().map(|s| s.version))
}

/// Append an immutable snapshot.
///
/// # Errors
///
/// Returns [`SnapshotError::StaleVersion`] if `version` does not exceed the
/// latest stored version, or the store's error.
pub async fn create_snapshot(
    store: &dyn SnapshotStore,
    board_id: Uuid,
    version: i64,
    source_event_id: Option<EventId>,
    nodes: Vec<Node>,
    created_by: Uuid,
) -> Result<Snapshot, SnapshotError> {
    if let Some(latest) = latest_version(store, board_id).await?
        && version <= latest
    {
        return Err(SnapshotError::StaleVersion { version, latest });
    }
    let snapshot = Snapshot {
        id: Uuid::new_v4(),
        board_id,
        version,
        source_event_id,
        widgets: project_widgets(&nodes),
        nodes,
        created_by,
        created_at: now_ms(),
    };
    Ok(store.create(snapshot).await?)
}

/// Checkpoint `nodes` under the next version from the session clock.
///
/// # Errors
///
/// Propagates version lookup and store failures.
pub async fn checkpoint(ctx: &SessionContext, source_event_id: Option<EventId>, nodes: Vec<Node>) -> Result<Snapshot, SnapshotError> {
    let store = ctx.stores.snapshots.as_ref();
    let latest = latest_version(store, ctx.board_id).await?;
    let version = ctx.versions.next(latest);
    create_snapshot(store, ctx.board_id, version, source_event_id, nodes, ctx.user_id).await
}

/// Run [`checkpoint`] on its own task.
pub fn spawn_checkpoint(ctx: Arc<SessionContext>, source_event_id: Option<EventId>, nodes: Vec<Node>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match checkpoint(&ctx, source_event_id, nodes).await {
            Ok(snapshot) => {
                info!(board_id = %ctx.board_id, version = snapshot.version, ?source_event_id, "snapshot checkpoint created");
                ctx.notify(SyncNotice::SnapshotCreated { version: snapshot.version });
            }
            Err(e) => {
                warn!(error = %e, board_id = %ctx.board_id, "snapshot checkpoint failed");
            }
        }
    })
}

/// Replace the canvas with the highest-version snapshot. Returns the
/// restored version.
///
/// # Errors
///
/// - [`SnapshotError::Denied`] if the user may not edit the board. The role
///   is re-resolved under the save lock when `role_recheck` is set.
/// - [`SnapshotError::Closed`] if the session closed before the canvas was
///   replaced.
/// - [`SnapshotError::NoSnapshots`] if the board has none.
/// - [`SnapshotError::Store`] if the snapshot listing fails.
pub async fn restore_latest(ctx: &Arc<SessionContext>) -> Result<i64, SnapshotError> {
    ctx.gate.check()?;
    let _serialized = ctx.lock_save().await;
    if !ctx.is_open() {
        return Err(SnapshotError::Closed(ctx.board_id));
    }
    if ctx.config.role_recheck {
        let role = ctx.recheck_role().await;
        if !can_mutate(role) {
            warn!(board_id = %ctx.board_id, user_id = %ctx.user_id, ?role, "restore refused: user may not edit board");
            return Err(ctx.gate.denied(role).into());
        }
    }

    let snapshot = ctx
        .stores
        .snapshots
        .list_by_version_desc(ctx.board_id, 1)
        .await?
        .into_iter()
        .next()
        .ok_or(SnapshotError::NoSnapshots(ctx.board_id))?;
    let version = snapshot.version;

    if !ctx.is_open() {
        return Err(SnapshotError::Closed(ctx.board_id));
    }
    ctx.canvas().restore(snapshot.nodes);
    ctx.mark_dirty();

    let events = ctx.stores.events.clone();
    let (board_id, user_id) = (ctx.board_id, ctx.user_id);
    let payload = restore_version_payload(version);
    match with_retry(ctx.retry_policy(), "restore_event_append", || {
        events.append(board_id, user_id, BoardEventType::RestoreVersion, payload.clone())
    })
    .await
    {
        Ok(event_id) => {
            if ctx.is_open() {
                ctx.canvas().advance_cursor(event_id);
            }
        }
        Err(e) => {
            warn!(error = %e, board_id = %board_id, version, "restore_version append failed; peers converge on the next save");
        }
    }

    info!(board_id = %board_id, version, "restored snapshot");
    ctx.notify(SyncNotice::Restored { version });
    Ok(version)
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
