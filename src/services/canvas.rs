//! Canvas state — the in-memory node collection for one open board.
//!
//! DESIGN
//! ======
//! Every operation is synchronous and visible to the caller immediately.
//! Nothing here touches the network: the session decides whether the actor
//! may mutate, and the persistence gateway decides when to write.
//!
//! Three digests of the canonical node serialization are tracked:
//! - `digest`: the current local state.
//! - `persisted_digest`: what is known to be in the canvas store. A save
//!   whose digest matches it is skipped.
//! - `applied_digest`: the payload this client last applied or authored.
//!   A polled `node_update` whose payload matches it is a self-echo.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::{BoardRole, EventId, Node, NodeChange, NodePatch};
use crate::notice::ErrorCode;

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of a permitted mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// State changed; a save is scheduled.
    Applied,
    /// Nothing to change (unknown id, identical values, already empty).
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    #[error("user {user_id} may not edit board {board_id} (role: {})", .role.map_or("none", BoardRole::as_str))]
    Denied { board_id: Uuid, user_id: Uuid, role: Option<BoardRole> },
    #[error("node already exists: {0}")]
    DuplicateNode(String),
}

impl ErrorCode for MutationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Denied { .. } => "E_PERMISSION_DENIED",
            Self::DuplicateNode(_) => "E_DUPLICATE_NODE",
        }
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

/// Canonical serialization of a node collection.
#[must_use]
pub fn serialize_nodes(nodes: &[Node]) -> String {
    serde_json::to_string(nodes).unwrap_or_else(|_| "[]".to_owned())
}

/// SHA-256 hex digest of the canonical serialization.
#[must_use]
pub fn digest_nodes(nodes: &[Node]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serialize_nodes(nodes).as_bytes());
    let bytes = hasher.finalize();
    bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
}

// =============================================================================
// CANVAS STATE
// =============================================================================

#[derive(Debug, Clone)]
pub struct CanvasState {
    board_id: Uuid,
    nodes: Vec<Node>,
    digest: String,
    persisted_digest: Option<String>,
    applied_digest: Option<String>,
    last_applied_event_id: Option<EventId>,
}

impl CanvasState {
    /// Empty canvas for a board with nothing persisted yet.
    #[must_use]
    pub fn new(board_id: Uuid) -> Self {
        let nodes = Vec::new();
        let digest = digest_nodes(&nodes);
        Self {
            board_id,
            nodes,
            digest,
            persisted_digest: None,
            applied_digest: None,
            last_applied_event_id: None,
        }
    }

    /// Canvas hydrated from the canvas store. The loaded nodes count as both
    /// persisted and applied; `cursor` is the newest event at load time.
    #[must_use]
    pub fn hydrated(board_id: Uuid, nodes: Vec<Node>, cursor: Option<EventId>) -> Self {
        let digest = digest_nodes(&nodes);
        Self {
            board_id,
            nodes,
            persisted_digest: Some(digest.clone()),
            applied_digest: Some(digest.clone()),
            digest,
            last_applied_event_id: cursor,
        }
    }

    #[must_use]
    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    #[must_use]
    pub fn persisted_digest(&self) -> Option<&str> {
        self.persisted_digest.as_deref()
    }

    #[must_use]
    pub fn applied_digest(&self) -> Option<&str> {
        self.applied_digest.as_deref()
    }

    #[must_use]
    pub fn last_applied_event_id(&self) -> Option<EventId> {
        self.last_applied_event_id
    }

    /// True when the local state differs from what the canvas store holds.
    #[must_use]
    pub fn has_unpersisted_changes(&self) -> bool {
        self.persisted_digest.as_deref() != Some(self.digest.as_str())
    }

    // -------------------------------------------------------------------------
    // LOCAL MUTATIONS
    // -------------------------------------------------------------------------

    /// Append a node.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::DuplicateNode`] if the id is already present.
    pub fn add_node(&mut self, node: Node) -> Result<MutationOutcome, MutationError> {
        if self.node(&node.id).is_some() {
            return Err(MutationError::DuplicateNode(node.id));
        }
        self.nodes.push(node);
        Ok(self.touched(true))
    }

    /// Merge `patch` into the node with `id`. Unknown ids are a no-op.
    pub fn update_node(&mut self, id: &str, patch: &NodePatch) -> MutationOutcome {
        let changed = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .is_some_and(|node| node.apply_patch(patch));
        self.touched(changed)
    }

    pub fn remove_node(&mut self, id: &str) -> MutationOutcome {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        let changed = self.nodes.len() != before;
        self.touched(changed)
    }

    pub fn clear(&mut self) -> MutationOutcome {
        let changed = !self.nodes.is_empty();
        self.nodes.clear();
        self.touched(changed)
    }

    /// Absorb a burst of drag/resize deltas in one pass.
    ///
    /// Changes targeting unknown ids are skipped; an `add` whose id already
    /// exists replaces nothing and is skipped as well.
    pub fn apply_changes(&mut self, changes: &[NodeChange]) -> MutationOutcome {
        let mut changed = false;
        for change in changes {
            changed |= match change {
                NodeChange::Position { id, position } => self
                    .nodes
                    .iter_mut()
                    .find(|n| n.id == *id)
                    .is_some_and(|node| node.apply_patch(&NodePatch { position: Some(*position), ..NodePatch::default() })),
                NodeChange::Dimensions { id, size } => self
                    .nodes
                    .iter_mut()
                    .find(|n| n.id == *id)
                    .is_some_and(|node| node.apply_patch(&NodePatch { size: Some(*size), ..NodePatch::default() })),
                NodeChange::Add { node } => {
                    if self.node(&node.id).is_some() {
                        false
                    } else {
                        self.nodes.push(node.clone());
                        true
                    }
                }
                NodeChange::Remove { id } => {
                    let before = self.nodes.len();
                    self.nodes.retain(|n| n.id != *id);
                    self.nodes.len() != before
                }
            };
        }
        self.touched(changed)
    }

    /// Replace the whole collection with a restored snapshot. The result is
    /// local (not yet persisted) but counts as applied, so polling the
    /// restore does not re-apply it.
    pub fn restore(&mut self, nodes: Vec<Node>) -> MutationOutcome {
        if nodes == self.nodes {
            self.applied_digest = Some(self.digest.clone());
            return MutationOutcome::NoOp;
        }
        self.nodes = nodes;
        self.digest = digest_nodes(&self.nodes);
        self.applied_digest = Some(self.digest.clone());
        MutationOutcome::Applied
    }

    // -------------------------------------------------------------------------
    // SYNC BOOKKEEPING
    // -------------------------------------------------------------------------

    /// Replace the collection wholesale with state another client persisted.
    pub fn apply_remote(&mut self, nodes: Vec<Node>, event_id: EventId) {
        self.nodes = nodes;
        self.digest = digest_nodes(&self.nodes);
        self.persisted_digest = Some(self.digest.clone());
        self.applied_digest = Some(self.digest.clone());
        self.advance_cursor(event_id);
    }

    /// Record that `digest` reached the canvas store.
    pub fn mark_persisted(&mut self, digest: String) {
        self.persisted_digest = Some(digest);
    }

    /// Record an event this client appended carrying `digest`.
    pub fn record_own_event(&mut self, event_id: EventId, digest: String) {
        self.applied_digest = Some(digest);
        if self.last_applied_event_id.is_none_or(|current| event_id > current) {
            self.last_applied_event_id = Some(event_id);
        }
    }

    /// Mark an event as seen without applying it.
    pub fn advance_cursor(&mut self, event_id: EventId) {
        self.last_applied_event_id = Some(event_id);
    }

    fn touched(&mut self, changed: bool) -> MutationOutcome {
        if !changed {
            return MutationOutcome::NoOp;
        }
        self.digest = digest_nodes(&self.nodes);
        MutationOutcome::Applied
    }
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
