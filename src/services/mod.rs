pub mod canvas;
pub mod permission;
pub mod persistence;
pub mod presence;
pub mod retry;
pub mod snapshot;
pub mod sync;
