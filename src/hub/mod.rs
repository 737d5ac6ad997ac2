//! Client hub (C6): REST session/queue/workspace endpoints, WebSocket
//! fan-out, and sync-on-reconnect.

pub mod connection;
pub mod listener;
pub mod rest;
pub mod server;

pub use server::HubState;
