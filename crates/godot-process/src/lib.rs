//! Godot process supervision for the AI gateway
//!
//! This crate owns the lifecycle of the Godot child process:
//! - launching it headless or windowed with the gateway port wired in
//! - monitoring its merged stdout/stderr line by line
//! - classifying crashes from free-text signatures (SCRIPT ERROR etc.)
//! - escalating termination from SIGTERM to SIGKILL

pub mod patterns;
pub mod supervisor;

pub use patterns::{DEFAULT_READY_MARKER, is_crash_line};
pub use supervisor::{GodotProcess, LaunchSpec};
