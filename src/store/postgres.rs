//! Postgres backend for every collaborator trait.
//!
//! DESIGN
//! ======
//! Node collections, widget projections and event payloads are stored as
//! JSONB. Event ids come from a `BIGSERIAL`, so feed order is append order.
//! Presence is an upsert keyed by (board, user); stale rows are never
//! deleted here.

use sqlx::PgPool;
use uuid::Uuid;

use super::{BoardStore, CanvasStore, EventFeed, PermissionService, PresenceStore, SnapshotStore, StoreError};
use crate::clock::now_ms;
use crate::model::{
    BoardEvent, BoardEventType, BoardMember, BoardRole, EventId, MemberStatus, Node, PresenceRecord, Snapshot, Widget,
};
use crate::services::permission::resolve_role_from;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl CanvasStore for PgStore {
    async fn save(&self, board_id: Uuid, nodes: &[Node]) -> Result<(), StoreError> {
        let nodes = serde_json::to_value(nodes)?;
        sqlx::query(
            "INSERT INTO board_canvas (board_id, nodes, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (board_id) DO UPDATE SET nodes = EXCLUDED.nodes, updated_at = EXCLUDED.updated_at",
        )
        .bind(board_id)
        .bind(&nodes)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, board_id: Uuid) -> Result<Vec<Node>, StoreError> {
        let nodes: Option<serde_json::Value> = sqlx::query_scalar("SELECT nodes FROM board_canvas WHERE board_id = $1")
            .bind(board_id)
            .fetch_optional(&self.pool)
            .await?;
        match nodes {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl BoardStore for PgStore {
    async fn publish_widgets(&self, board_id: Uuid, widgets: &[Widget], touched_at: i64) -> Result<(), StoreError> {
        let widgets = serde_json::to_value(widgets)?;
        let result = sqlx::query("UPDATE boards SET widgets = $2, last_activity_at = $3 WHERE id = $1")
            .bind(board_id)
            .bind(&widgets)
            .bind(touched_at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::BoardNotFound(board_id));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventFeed for PgStore {
    async fn append(
        &self,
        board_id: Uuid,
        actor_id: Uuid,
        event_type: BoardEventType,
        payload: serde_json::Value,
    ) -> Result<EventId, StoreError> {
        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO board_events (board_id, actor_id, event_type, payload, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING seq",
        )
        .bind(board_id)
        .bind(actor_id)
        .bind(event_type.as_str())
        .bind(&payload)
        .bind(now_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(seq)
    }

    async fn list_recent(&self, board_id: Uuid, limit: usize) -> Result<Vec<BoardEvent>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, Uuid, Uuid, String, serde_json::Value, i64)>(
            "SELECT seq, board_id, actor_id, event_type, payload, created_at
             FROM board_events
             WHERE board_id = $1
             ORDER BY seq DESC
             LIMIT $2",
        )
        .bind(board_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, board_id, actor_id, event_type, payload, created_at)| BoardEvent {
                id,
                board_id,
                actor_id,
                event_type: BoardEventType::parse_lenient(&event_type),
                payload,
                created_at,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PgStore {
    async fn create(&self, snapshot: Snapshot) -> Result<Snapshot, StoreError> {
        let nodes = serde_json::to_value(&snapshot.nodes)?;
        let widgets = serde_json::to_value(&snapshot.widgets)?;
        sqlx::query(
            "INSERT INTO board_snapshots (id, board_id, version, source_event_id, nodes, widgets, created_by, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(snapshot.id)
        .bind(snapshot.board_id)
        .bind(snapshot.version)
        .bind(snapshot.source_event_id)
        .bind(&nodes)
        .bind(&widgets)
        .bind(snapshot.created_by)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(snapshot)
    }

    async fn list_by_version_desc(&self, board_id: Uuid, limit: usize) -> Result<Vec<Snapshot>, StoreError> {
        let rows = sqlx::query_as::<
            _,
            (Uuid, Uuid, i64, Option<i64>, serde_json::Value, serde_json::Value, Uuid, i64),
        >(
            "SELECT id, board_id, version, source_event_id, nodes, widgets, created_by, created_at
             FROM board_snapshots
             WHERE board_id = $1
             ORDER BY version DESC
             LIMIT $2",
        )
        .bind(board_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, board_id, version, source_event_id, nodes, widgets, created_by, created_at)| -> Result<Snapshot, StoreError> {
                Ok(Snapshot {
                    id,
                    board_id,
                    version,
                    source_event_id,
                    nodes: serde_json::from_value(nodes)?,
                    widgets: serde_json::from_value(widgets)?,
                    created_by,
                    created_at,
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl PermissionService for PgStore {
    async fn resolve_role(&self, board_id: Uuid, user_id: Uuid) -> Result<Option<BoardRole>, StoreError> {
        let owner_id: Option<Option<Uuid>> = sqlx::query_scalar("SELECT owner_id FROM boards WHERE id = $1")
            .bind(board_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(owner_id) = owner_id else {
            return Err(StoreError::BoardNotFound(board_id));
        };

        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT role, status FROM board_members WHERE board_id = $1 AND user_id = $2",
        )
        .bind(board_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let members: Vec<BoardMember> = rows
            .into_iter()
            .map(|(role, status)| BoardMember {
                board_id,
                user_id,
                role: BoardRole::parse_lenient(&role),
                status: MemberStatus::parse_lenient(&status),
            })
            .collect();
        Ok(resolve_role_from(owner_id, &members, user_id))
    }
}

#[async_trait::async_trait]
impl PresenceStore for PgStore {
    async fn upsert(&self, record: PresenceRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO board_presence (board_id, user_id, cursor_x, cursor_y, active_node_id, last_seen_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (board_id, user_id) DO UPDATE SET
                cursor_x = EXCLUDED.cursor_x,
                cursor_y = EXCLUDED.cursor_y,
                active_node_id = EXCLUDED.active_node_id,
                last_seen_at = EXCLUDED.last_seen_at",
        )
        .bind(record.board_id)
        .bind(record.user_id)
        .bind(record.cursor_x)
        .bind(record.cursor_y)
        .bind(&record.active_node_id)
        .bind(record.last_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_board(&self, board_id: Uuid, limit: usize) -> Result<Vec<PresenceRecord>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, f64, f64, Option<String>, i64)>(
            "SELECT board_id, user_id, cursor_x, cursor_y, active_node_id, last_seen_at
             FROM board_presence
             WHERE board_id = $1
             ORDER BY last_seen_at DESC
             LIMIT $2",
        )
        .bind(board_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(board_id, user_id, cursor_x, cursor_y, active_node_id, last_seen_at)| PresenceRecord {
                board_id,
                user_id,
                cursor_x,
                cursor_y,
                active_node_id,
                last_seen_at,
            })
            .collect())
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
