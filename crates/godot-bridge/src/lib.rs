//! WebSocket bridge between the Godot process and automation callers
//!
//! This crate provides:
//! - The upstream WebSocket connection to the game's AI server
//! - Request/response correlation over the asynchronous message stream
//! - Fan-out of unsolicited game events to subscribed callers
//! - The append-only session log of all inbound messages

pub mod bridge;
pub mod session_log;

pub use bridge::{BridgeConfig, GodotBridge};
pub use session_log::SessionLog;
