//! Board data model shared by the engine and its collaborators.
//!
//! DESIGN
//! ======
//! Nodes are owned by the canvas of whichever session has the board open.
//! Events and snapshots are immutable facts produced by the engine and
//! stored by collaborators. Presence records are ephemeral; roles are
//! derived from ownership plus active membership and never stored per node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sequence number assigned by the event feed. Newest event has the largest id.
pub type EventId = i64;

// =============================================================================
// NODES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    BarChart,
    LineChart,
    PieChart,
    Note,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BarChart => "bar_chart",
            Self::LineChart => "line_chart",
            Self::PieChart => "pie_chart",
            Self::Note => "note",
        }
    }
}

/// A positioned visual element on a board canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within a board.
    pub id: String,
    pub kind: NodeKind,
    pub position: Position,
    pub size: Size,
    /// Kind-specific data. `label` and `data` feed the widget projection.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: NodeKind, position: Position, size: Size) -> Self {
        Self { id: id.into(), kind, position, size, payload: serde_json::Value::Null }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Apply the fields present in `patch`. Returns true if anything changed.
    pub fn apply_patch(&mut self, patch: &NodePatch) -> bool {
        let before = self.clone();
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(size) = patch.size {
            self.size = size;
        }
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(payload) = &patch.payload {
            self.payload = payload.clone();
        }
        *self != before
    }
}

/// Partial update for `update_node`. `id` is never patchable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl NodePatch {
    #[must_use]
    pub fn position(x: f64, y: f64) -> Self {
        Self { position: Some(Position { x, y }), ..Self::default() }
    }

    #[must_use]
    pub fn size(width: f64, height: f64) -> Self {
        Self { size: Some(Size { width, height }), ..Self::default() }
    }
}

/// One change emitted by the UI layer during drag/resize gestures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeChange {
    Position { id: String, position: Position },
    Dimensions { id: String, size: Size },
    Add { node: Node },
    Remove { id: String },
}

// =============================================================================
// WIDGETS
// =============================================================================

/// Board-metadata projection of a node, published after each save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub kind: NodeKind,
    pub position: Position,
    pub props: WidgetProps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetProps {
    pub label: String,
    pub data: serde_json::Value,
    pub width: f64,
    pub height: f64,
}

impl From<&Node> for Widget {
    fn from(node: &Node) -> Self {
        let label = node
            .payload
            .get("label")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(node.kind.as_str())
            .to_owned();
        let data = node
            .payload
            .get("data")
            .filter(|v| v.is_array())
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));
        Self {
            id: node.id.clone(),
            kind: node.kind,
            position: node.position,
            props: WidgetProps { label, data, width: node.size.width, height: node.size.height },
        }
    }
}

#[must_use]
pub fn project_widgets(nodes: &[Node]) -> Vec<Widget> {
    nodes.iter().map(Widget::from).collect()
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardEventType {
    NodeAdd,
    NodeUpdate,
    NodeDelete,
    ShareInvite,
    ShareAccept,
    ShareRevoke,
    CommentAdd,
    CommentResolve,
    RestoreVersion,
    /// A type this build does not know. Never touches the canvas.
    #[serde(other)]
    Unknown,
}

impl BoardEventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeAdd => "node_add",
            Self::NodeUpdate => "node_update",
            Self::NodeDelete => "node_delete",
            Self::ShareInvite => "share_invite",
            Self::ShareAccept => "share_accept",
            Self::ShareRevoke => "share_revoke",
            Self::CommentAdd => "comment_add",
            Self::CommentResolve => "comment_resolve",
            Self::RestoreVersion => "restore_version",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse used for stored feed rows: unrecognized types read as
    /// [`BoardEventType::Unknown`].
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for BoardEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown board event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for BoardEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "node_add" => Self::NodeAdd,
            "node_update" => Self::NodeUpdate,
            "node_delete" => Self::NodeDelete,
            "share_invite" => Self::ShareInvite,
            "share_accept" => Self::ShareAccept,
            "share_revoke" => Self::ShareRevoke,
            "comment_add" => Self::CommentAdd,
            "comment_resolve" => Self::CommentResolve,
            "restore_version" => Self::RestoreVersion,
            other => return Err(UnknownEventType(other.to_owned())),
        })
    }
}

/// Immutable, append-only fact on a board's event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEvent {
    pub id: EventId,
    pub board_id: Uuid,
    pub actor_id: Uuid,
    pub event_type: BoardEventType,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

impl BoardEvent {
    /// Nodes carried by a `node_update` payload. `None` for any other event
    /// or a malformed payload.
    #[must_use]
    pub fn nodes(&self) -> Option<Vec<Node>> {
        if self.event_type != BoardEventType::NodeUpdate {
            return None;
        }
        let nodes = self.payload.get("nodes")?.clone();
        serde_json::from_value(nodes).ok()
    }

    /// Version carried by a `restore_version` payload.
    #[must_use]
    pub fn restored_version(&self) -> Option<i64> {
        if self.event_type != BoardEventType::RestoreVersion {
            return None;
        }
        self.payload.get("restoredVersion")?.as_i64()
    }
}

/// Payload for a `node_update` event: the full node collection.
#[must_use]
pub fn node_update_payload(nodes: &[Node]) -> serde_json::Value {
    serde_json::json!({ "nodes": nodes })
}

/// Payload for a `restore_version` event.
#[must_use]
pub fn restore_version_payload(version: i64) -> serde_json::Value {
    serde_json::json!({ "restoredVersion": version })
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Full-state checkpoint of a board. Only read on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub board_id: Uuid,
    /// Strictly increasing per board.
    pub version: i64,
    pub source_event_id: Option<EventId>,
    pub nodes: Vec<Node>,
    pub widgets: Vec<Widget>,
    pub created_by: Uuid,
    pub created_at: i64,
}

// =============================================================================
// PRESENCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub board_id: Uuid,
    pub user_id: Uuid,
    pub cursor_x: f64,
    pub cursor_y: f64,
    pub active_node_id: Option<String>,
    pub last_seen_at: i64,
}

// =============================================================================
// ROLES & MEMBERSHIP
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardRole {
    Owner,
    Editor,
    Viewer,
}

impl BoardRole {
    #[must_use]
    pub fn can_mutate(self) -> bool {
        matches!(self, Self::Owner | Self::Editor)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }

    /// Lenient parse used for stored membership rows: unknown roles read as viewer.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw {
            "owner" => Self::Owner,
            "editor" => Self::Editor,
            _ => Self::Viewer,
        }
    }
}

impl fmt::Display for BoardRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Pending,
    Active,
    Revoked,
    Declined,
}

impl MemberStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Declined => "declined",
        }
    }

    /// Missing or unknown status reads as active.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw {
            "pending" => Self::Pending,
            "revoked" => Self::Revoked,
            "declined" => Self::Declined,
            _ => Self::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardMember {
    pub board_id: Uuid,
    pub user_id: Uuid,
    pub role: BoardRole,
    pub status: MemberStatus,
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
