//! Boardsync — collaborative canvas synchronization engine.
//!
//! ARCHITECTURE
//! ============
//! One `BoardSession` per open board. Local edits mutate the in-memory
//! canvas immediately, a debounced gateway persists them and appends a
//! `node_update` event, and a polling loop absorbs events authored by other
//! clients (whole-collection last-writer-wins). Every 25th successful save
//! checkpoints a snapshot. All remote I/O goes through the collaborator
//! traits in [`store`], injected per session.

pub mod clock;
pub mod config;
pub mod db;
pub mod model;
pub mod notice;
pub mod services;
pub mod session;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::SyncConfig;
pub use model::{BoardEvent, BoardEventType, BoardRole, Node, NodeChange, NodeKind, NodePatch, Position, Size};
pub use notice::SyncNotice;
pub use services::canvas::{MutationError, MutationOutcome};
pub use session::{BoardSession, SessionError};
pub use store::{StoreError, Stores};
