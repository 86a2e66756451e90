//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own persistence and room bookkeeping so route handlers
//! stay focused on protocol translation.

pub mod message;
pub mod room;
