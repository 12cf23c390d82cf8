//! # gateway-core
//!
//! Core types for the Godot AI gateway.
//!
//! This crate provides the foundational types shared by the supervisor,
//! bridge and server crates:
//! - Error taxonomy
//! - Crash records produced by the process supervisor
//! - Message envelope helpers (event discriminator, narrative annotation)
//! - Structured result constructors for downstream callers

pub mod error;
pub mod message;

pub use error::{GatewayError, Result};
pub use message::{ActionRequest, CrashDetail, crash_event, error_event, event_name, narrative};
