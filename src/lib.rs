//! EventEase realtime chat.
//!
//! ARCHITECTURE
//! ============
//! - `client`: reconnecting WebSocket chat client with typed listeners.
//! - `routes`, `services`, `state`: the Axum relay server and message history.
//! - `protocol`: JSON frames shared by both sides.

pub mod client;
pub mod config;
pub mod db;
pub mod protocol;
pub mod routes;
pub mod services;
pub mod state;
