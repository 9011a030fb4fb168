//! Persistence gateway — debounced saves of the local canvas.
//!
//! DESIGN
//! ======
//! A background task waits for dirty signals and runs a trailing debounce:
//! every signal restarts the quiet-period timer, and only an uninterrupted
//! timer triggers a save. Signals arriving while a save is in flight queue
//! up and start the next debounce cycle once it completes. A save that
//! fails outright is rescheduled once without a new signal, so unsaved
//! edits are not left waiting for the next keystroke.
//!
//! A save runs four ordered steps:
//! 1. persist the node collection to the canvas store;
//! 2. publish the widget projection and touch board activity;
//! 3. append a `node_update` event carrying the full collection;
//! 4. count the save and, every `snapshot_every` saves, checkpoint.
//!
//! ERROR HANDLING
//! ==============
//! Each remote step is retried with backoff. Only a failure of step 1
//! fails the save: it is published once as a notice and local state is
//! left untouched. Steps 2 and 3 are logged and skipped. Checkpoints run
//! on their own task and never affect the save that triggered them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::now_ms;
use crate::model::{BoardEventType, EventId, node_update_payload, project_widgets};
use crate::notice::SyncNotice;
use crate::services::permission::can_mutate;
use crate::services::retry::with_retry;
use crate::services::snapshot;
use crate::state::SessionContext;

/// What one save attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Canvas persisted. `event_id` is `None` if the event append failed.
    Saved { event_id: Option<EventId> },
    /// Serialization matched the last persisted one; nothing written.
    Skipped,
    /// Canvas persist exhausted its retries.
    Failed,
    /// The user may no longer edit; nothing written.
    Denied,
    /// The board was closed before the save could run or finish.
    Discarded,
}

/// Spawn the debounced persistence task for one session.
pub fn spawn_persistence_task(ctx: Arc<SessionContext>, mut dirty_rx: mpsc::Receiver<()>) -> JoinHandle<()> {
    let debounce = ctx.config.save_debounce();
    info!(board_id = %ctx.board_id, debounce_ms = ctx.config.save_debounce_ms, "persistence gateway configured");
    tokio::spawn(async move {
        let mut shutdown = ctx.shutdown_signal();
        let mut rearmed = false;
        loop {
            if !rearmed {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    signal = dirty_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                    }
                }
            }

            // Trailing debounce: restart the quiet period on every signal.
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    signal = dirty_rx.recv() => {
                        if signal.is_none() {
                            return;
                        }
                    }
                    () = tokio::time::sleep(debounce) => break,
                }
            }

            // One unprompted retry per failure streak; after that the next
            // edit schedules the save.
            let outcome = save_now(&ctx).await;
            rearmed = outcome == SaveOutcome::Failed && !rearmed;
            if rearmed {
                debug!(board_id = %ctx.board_id, "save failed; rescheduling once");
            }
        }
        debug!(board_id = %ctx.board_id, "persistence gateway stopped");
    })
}

/// Run one save immediately, serialized with any other save of this session.
pub async fn save_now(ctx: &Arc<SessionContext>) -> SaveOutcome {
    let _in_flight = ctx.lock_save().await;
    if !ctx.is_open() {
        return SaveOutcome::Discarded;
    }

    if ctx.config.role_recheck {
        let role = ctx.recheck_role().await;
        if !can_mutate(role) {
            warn!(board_id = %ctx.board_id, user_id = %ctx.user_id, ?role, "save refused: user may not edit board");
            return SaveOutcome::Denied;
        }
    }

    // PHASE: SNAPSHOT LOCAL STATE
    // Clone under the lock, then do all I/O lock-free.
    let (nodes, digest) = {
        let canvas = ctx.canvas();
        if !canvas.has_unpersisted_changes() {
            debug!(board_id = %ctx.board_id, "canvas unchanged since last save; skipping");
            ctx.notify(SyncNotice::SaveSkipped);
            return SaveOutcome::Skipped;
        }
        (canvas.nodes().to_vec(), canvas.digest().to_owned())
    };
    let policy = ctx.retry_policy();
    let board_id = ctx.board_id;

    // PHASE: CANVAS
    let canvas_store = ctx.stores.canvas.clone();
    if let Err(e) = with_retry(policy, "canvas_save", || canvas_store.save(board_id, &nodes)).await {
        warn!(error = %e, board_id = %board_id, count = nodes.len(), "canvas persist failed after retries; local edits kept");
        ctx.notify(SyncNotice::persistence_failed(&e));
        return SaveOutcome::Failed;
    }
    if !ctx.is_open() {
        return SaveOutcome::Discarded;
    }
    ctx.canvas().mark_persisted(digest.clone());

    // PHASE: BOARD METADATA
    let widgets = project_widgets(&nodes);
    let boards = ctx.stores.boards.clone();
    if let Err(e) = with_retry(policy, "publish_widgets", || boards.publish_widgets(board_id, &widgets, now_ms())).await {
        warn!(error = %e, board_id = %board_id, "widget publish failed after retries");
    }

    // PHASE: EVENT
    let payload = node_update_payload(&nodes);
    let events = ctx.stores.events.clone();
    let user_id = ctx.user_id;
    let event_id = match with_retry(policy, "event_append", || {
        events.append(board_id, user_id, BoardEventType::NodeUpdate, payload.clone())
    })
    .await
    {
        Ok(id) => {
            if ctx.is_open() {
                ctx.canvas().record_own_event(id, digest);
            }
            Some(id)
        }
        Err(e) => {
            warn!(error = %e, board_id = %board_id, "node_update append failed after retries");
            None
        }
    };

    // PHASE: CHECKPOINT CADENCE
    if ctx.count_successful_save() {
        snapshot::spawn_checkpoint(ctx.clone(), event_id, nodes);
    }

    debug!(board_id = %board_id, ?event_id, "canvas saved");
    ctx.notify(SyncNotice::Saved { event_id });
    SaveOutcome::Saved { event_id }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
