//! Error types for the gateway

use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Godot process could not be spawned
    #[error("Launch failed: {0}")]
    Launch(String),

    /// Process started but never printed the ready marker
    #[error("Timed out waiting for Godot to become ready")]
    ReadinessTimeout,

    /// Process exited before signaling readiness
    #[error("Godot exited before becoming ready")]
    ProcessExited,

    /// Upstream connection absent when a request arrived
    #[error("Upstream WebSocket not connected")]
    NotConnected,

    /// No reply within the request timeout and no fallback snapshot
    #[error("Timed out waiting for game state")]
    RequestTimeout,

    /// Socket-level failure on either side of the bridge
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}
