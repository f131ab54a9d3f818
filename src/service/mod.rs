//! Service layer: live-state synchronization.
//!
//! [`SnapshotBuilder`] assembles the fleet state from the store,
//! [`Broadcaster`] fans it out through the [`crate::domain::Hub`], and
//! [`ChangeListener`] ties both to the store's change notifications.

pub mod broadcaster;
pub mod change_listener;
pub mod snapshot_builder;

pub use broadcaster::{BroadcastReport, Broadcaster};
pub use change_listener::{ChangeListener, ListenerState};
pub use snapshot_builder::SnapshotBuilder;
