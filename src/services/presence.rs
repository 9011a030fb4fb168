//! Presence tracker — who is on a board and where their cursor is.
//!
//! DESIGN
//! ======
//! One record per (board, user), upserted on every heartbeat. Nothing is
//! ever deleted: staleness is decided at read time by [`active_peers`], so
//! the write path stays a single upsert. A keep-alive task re-sends the
//! last known cursor so an idle user does not drop out of peer lists.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::now_ms;
use crate::model::PresenceRecord;
use crate::state::{LocalCursor, SessionContext};
use crate::store::{DEFAULT_PRESENCE_LIMIT, PresenceStore, StoreError};

/// Upsert the caller's presence record.
///
/// # Errors
///
/// Propagates presence store failures.
pub async fn heartbeat(
    store: &dyn PresenceStore,
    board_id: Uuid,
    user_id: Uuid,
    cursor_x: f64,
    cursor_y: f64,
    active_node_id: Option<String>,
) -> Result<(), StoreError> {
    store
        .upsert(PresenceRecord { board_id, user_id, cursor_x, cursor_y, active_node_id, last_seen_at: now_ms() })
        .await
}

/// Records seen within `stale_ms` of `now`, excluding `self_user`.
#[must_use]
pub fn active_peers(records: Vec<PresenceRecord>, self_user: Uuid, now: i64, stale_ms: i64) -> Vec<PresenceRecord> {
    records
        .into_iter()
        .filter(|r| r.user_id != self_user && now.saturating_sub(r.last_seen_at) <= stale_ms)
        .collect()
}

/// Record the local cursor and send a heartbeat for it.
///
/// # Errors
///
/// Propagates presence store failures. The cursor is remembered either way.
pub async fn report_cursor(ctx: &SessionContext, cursor: LocalCursor) -> Result<(), StoreError> {
    ctx.set_cursor(cursor.clone());
    heartbeat(ctx.stores.presence.as_ref(), ctx.board_id, ctx.user_id, cursor.x, cursor.y, cursor.active_node_id).await
}

/// Active peers for the session's board.
///
/// # Errors
///
/// Propagates presence store failures.
pub async fn list_active(ctx: &SessionContext) -> Result<Vec<PresenceRecord>, StoreError> {
    let records = ctx.stores.presence.list_by_board(ctx.board_id, DEFAULT_PRESENCE_LIMIT).await?;
    Ok(active_peers(records, ctx.user_id, now_ms(), ctx.config.presence_stale_ms))
}

/// Spawn the keep-alive that re-sends the last reported cursor.
pub fn spawn_presence_keepalive(ctx: Arc<SessionContext>) -> JoinHandle<()> {
    let period = ctx.config.presence_heartbeat();
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
            let Some(cursor) = ctx.last_cursor() else {
                continue;
            };
            if let Err(e) = heartbeat(
                ctx.stores.presence.as_ref(),
                ctx.board_id,
                ctx.user_id,
                cursor.x,
                cursor.y,
                cursor.active_node_id,
            )
            .await
            {
                warn!(error = %e, board_id = %ctx.board_id, "presence keep-alive failed");
            }
        }
        debug!(board_id = %ctx.board_id, "presence keep-alive stopped");
    })
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
