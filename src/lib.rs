//! # fleet-gateway
//!
//! Live fleet-state gateway. Tracks battery, lock, signal, and GPS state
//! of remote devices and pushes a full fleet snapshot to every connected
//! WebSocket viewer as soon as the store commits a new location sample.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Connection Handler (ws/)
//!     │
//!     ├── ChangeListener ─▶ SnapshotBuilder ─▶ Broadcaster (service/)
//!     │
//!     ├── Hub, Subscriber, FleetSnapshot (domain/)
//!     │
//!     └── SnapshotStore: PostgreSQL LISTEN/NOTIFY or in-memory (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod server;
pub mod service;
pub mod ws;
