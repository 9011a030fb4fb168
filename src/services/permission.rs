//! Permission gate — "can this user mutate this board right now?".
//!
//! DESIGN
//! ======
//! The owner of a board always resolves to `owner`; everyone else needs an
//! active membership row. The gate caches the resolved role so canvas
//! mutations can be checked synchronously, and the session refreshes the
//! cache on open, on every poll tick, and before every save when role
//! re-checking is enabled. A failed refresh keeps the previous role.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{BoardMember, BoardRole, MemberStatus};
use crate::services::canvas::MutationError;
use crate::store::{PermissionService, StoreError};

/// Resolve a role from board ownership plus membership rows.
#[must_use]
pub fn resolve_role_from(owner_id: Option<Uuid>, members: &[BoardMember], user_id: Uuid) -> Option<BoardRole> {
    if owner_id == Some(user_id) {
        return Some(BoardRole::Owner);
    }
    members
        .iter()
        .find(|m| m.user_id == user_id && m.status == MemberStatus::Active)
        .map(|m| m.role)
}

#[must_use]
pub fn can_mutate(role: Option<BoardRole>) -> bool {
    role.is_some_and(BoardRole::can_mutate)
}

pub struct PermissionGate {
    service: Arc<dyn PermissionService>,
    board_id: Uuid,
    user_id: Uuid,
    cached: Mutex<Option<BoardRole>>,
}

impl PermissionGate {
    #[must_use]
    pub fn new(service: Arc<dyn PermissionService>, board_id: Uuid, user_id: Uuid) -> Self {
        Self { service, board_id, user_id, cached: Mutex::new(None) }
    }

    /// Ask the permission service, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns the service's error if the lookup fails.
    pub async fn resolve_role(&self) -> Result<Option<BoardRole>, StoreError> {
        self.service.resolve_role(self.board_id, self.user_id).await
    }

    /// Re-resolve and update the cache. Returns the new role and whether it
    /// changed; on lookup failure the cached role is kept.
    pub async fn refresh(&self) -> (Option<BoardRole>, bool) {
        match self.resolve_role().await {
            Ok(role) => {
                let previous = self.set_cached(role);
                if previous != role {
                    info!(board_id = %self.board_id, user_id = %self.user_id, ?previous, ?role, "board role changed");
                }
                (role, previous != role)
            }
            Err(e) => {
                warn!(error = %e, board_id = %self.board_id, user_id = %self.user_id, "role refresh failed; keeping cached role");
                (self.cached_role(), false)
            }
        }
    }

    #[must_use]
    pub fn cached_role(&self) -> Option<BoardRole> {
        *self.cached.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_cached(&self, role: Option<BoardRole>) -> Option<BoardRole> {
        let mut cached = self.cached.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::replace(&mut *cached, role)
    }

    #[must_use]
    pub fn can_mutate(&self) -> bool {
        can_mutate(self.cached_role())
    }

    /// Require owner or editor on the cached role.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Denied`] for viewers and users with no access.
    pub fn check(&self) -> Result<BoardRole, MutationError> {
        match self.cached_role() {
            Some(role) if role.can_mutate() => Ok(role),
            role => Err(self.denied(role)),
        }
    }

    #[must_use]
    pub fn denied(&self, role: Option<BoardRole>) -> MutationError {
        MutationError::Denied { board_id: self.board_id, user_id: self.user_id, role }
    }
}

#[cfg(test)]
#[path = "permission_test.rs"]
mod tests;
