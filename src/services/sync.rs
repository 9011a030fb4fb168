//! Sync loop — poll the board's event feed and absorb foreign changes.
//!
//! DESIGN
//! ======
//! Cooperative polling on a fixed interval. Each tick reads only the newest
//! event. If its id equals the cursor nothing happens. Otherwise:
//! - `node_update` whose payload digest matches the last payload this client
//!   applied or authored is a self-echo and is not applied;
//! - any other `node_update` is merged through the session's [`MergePolicy`]
//!   (whole-collection last-writer-wins by default) and applied wholesale;
//! - `restore_version` from another client applies the named snapshot;
//! - every other event type is ignored.
//!
//! The cursor advances whether or not anything was applied.
//!
//! A poll holds the session's save lock, so a save scheduled before the
//! poll completes (event appended, cursor advanced) before the poll reads
//! the feed.
//!
//! ERROR HANDLING
//! ==============
//! Feed and snapshot read failures are logged and swallowed. The cursor does
//! not move, so the next tick retries.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::model::{BoardEvent, BoardEventType, EventId, Node};
use crate::notice::SyncNotice;
use crate::services::canvas::digest_nodes;
use crate::state::SessionContext;
use crate::store::DEFAULT_LIST_LIMIT;

// =============================================================================
// MERGE POLICY
// =============================================================================

/// How a foreign node collection is combined with the local one.
pub trait MergePolicy: Send + Sync {
    fn merge(&self, local: &[Node], remote: Vec<Node>) -> Vec<Node>;
}

/// The remote collection replaces the local one entirely. Concurrent edits
/// to different nodes are lost on the side that observes the other's write.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl MergePolicy for LastWriterWins {
    fn merge(&self, _local: &[Node], remote: Vec<Node>) -> Vec<Node> {
        remote
    }
}

// =============================================================================
// POLL
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Feed empty or newest event already seen.
    Idle,
    /// A foreign `node_update` replaced the canvas.
    Applied { event_id: EventId },
    /// The newest `node_update` carries what this client already holds.
    SelfEcho { event_id: EventId },
    /// A foreign `restore_version` replaced the canvas with a snapshot.
    Restored { event_id: EventId, version: i64 },
    /// Newest event does not affect the canvas; cursor advanced.
    Ignored { event_id: EventId },
    /// Read failed; cursor unchanged.
    Failed,
    /// The board was closed.
    Discarded,
}

/// Spawn the recurring poll task for one session.
pub fn spawn_sync_loop(ctx: Arc<SessionContext>) -> JoinHandle<()> {
    let period = ctx.config.poll_interval();
    info!(board_id = %ctx.board_id, poll_interval_ms = ctx.config.poll_interval_ms, "sync loop configured");
    tokio::spawn(async move {
        let mut shutdown = ctx.shutdown_signal();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if !ctx.is_open() {
                break;
            }
            if ctx.config.role_recheck {
                ctx.recheck_role().await;
            }
            poll_once(&ctx).await;
        }
        debug!(board_id = %ctx.board_id, "sync loop stopped");
    })
}

/// Read the newest event and apply it if it is new and foreign.
pub async fn poll_once(ctx: &Arc<SessionContext>) -> PollOutcome {
    let _serialized = ctx.lock_save().await;
    if !ctx.is_open() {
        return PollOutcome::Discarded;
    }

    let newest = match ctx.stores.events.list_recent(ctx.board_id, 1).await {
        Ok(mut events) if !events.is_empty() => events.swap_remove(0),
        Ok(_) => return PollOutcome::Idle,
        Err(e) => {
            warn!(error = %e, board_id = %ctx.board_id, "event feed poll failed");
            return PollOutcome::Failed;
        }
    };

    if ctx.canvas().last_applied_event_id() == Some(newest.id) {
        return PollOutcome::Idle;
    }

    match newest.event_type {
        BoardEventType::NodeUpdate => apply_node_update(ctx, &newest),
        BoardEventType::RestoreVersion => apply_foreign_restore(ctx, &newest).await,
        other => {
            debug!(board_id = %ctx.board_id, event_id = newest.id, event_type = %other, "newest event does not touch the canvas");
            advance(ctx, newest.id)
        }
    }
}

fn apply_node_update(ctx: &SessionContext, event: &BoardEvent) -> PollOutcome {
    let Some(remote) = event.nodes() else {
        warn!(board_id = %ctx.board_id, event_id = event.id, "node_update payload malformed; skipping");
        return advance(ctx, event.id);
    };
    let digest = digest_nodes(&remote);

    if !ctx.is_open() {
        return PollOutcome::Discarded;
    }
    let mut canvas = ctx.canvas();
    if canvas.applied_digest() == Some(digest.as_str()) {
        canvas.advance_cursor(event.id);
        debug!(board_id = %ctx.board_id, event_id = event.id, "self-echo; not applied");
        return PollOutcome::SelfEcho { event_id: event.id };
    }
    let merged = ctx.merge.merge(canvas.nodes(), remote);
    canvas.apply_remote(merged, event.id);
    drop(canvas);

    info!(board_id = %ctx.board_id, event_id = event.id, actor_id = %event.actor_id, "applied remote canvas update");
    ctx.notify(SyncNotice::RemoteApplied { event_id: event.id, actor_id: event.actor_id });
    PollOutcome::Applied { event_id: event.id }
}

async fn apply_foreign_restore(ctx: &SessionContext, event: &BoardEvent) -> PollOutcome {
    let Some(version) = event.restored_version() else {
        warn!(board_id = %ctx.board_id, event_id = event.id, "restore_version payload malformed; skipping");
        return advance(ctx, event.id);
    };

    let snapshots = match ctx.stores.snapshots.list_by_version_desc(ctx.board_id, DEFAULT_LIST_LIMIT).await {
        Ok(snapshots) => snapshots,
        Err(e) => {
            warn!(error = %e, board_id = %ctx.board_id, version, "snapshot lookup for foreign restore failed");
            return PollOutcome::Failed;
        }
    };
    let Some(snapshot) = snapshots.into_iter().find(|s| s.version == version) else {
        warn!(board_id = %ctx.board_id, event_id = event.id, version, "restored snapshot not found; skipping");
        return advance(ctx, event.id);
    };

    if !ctx.is_open() {
        return PollOutcome::Discarded;
    }
    {
        let mut canvas = ctx.canvas();
        let merged = ctx.merge.merge(canvas.nodes(), snapshot.nodes);
        canvas.apply_remote(merged, event.id);
    }

    info!(board_id = %ctx.board_id, event_id = event.id, version, actor_id = %event.actor_id, "applied foreign snapshot restore");
    ctx.notify(SyncNotice::Restored { version });
    PollOutcome::Restored { event_id: event.id, version }
}

fn advance(ctx: &SessionContext, event_id: EventId) -> PollOutcome {
    if !ctx.is_open() {
        return PollOutcome::Discarded;
    }
    ctx.canvas().advance_cursor(event_id);
    PollOutcome::Ignored { event_id }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
