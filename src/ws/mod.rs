//! WebSocket layer: upgrade handling and per-connection lifecycle.
//!
//! The endpoint at `/ws` is push-only: the server sends a catch-up
//! snapshot on connect and every broadcast afterwards. Inbound frames
//! are read only to notice when the client goes away.

pub mod connection;
pub mod handler;
