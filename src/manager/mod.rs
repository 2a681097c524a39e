//! Session manager
//!
//! The [`SessionManager`] is what a media engine integrates with: it turns
//! publish, unpublish and frame callbacks into relay sessions, and exposes
//! the control plane (destination toggles, session stop, snapshots, events).

pub mod store;

pub use store::SessionManager;
