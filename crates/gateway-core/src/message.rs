//! Message envelope helpers
//!
//! Godot payloads are opaque JSON objects. The gateway only interprets two
//! fields: `event` (discriminator, used for crash classification and log
//! noise reduction) and `narrative` (optional human-readable annotation,
//! used only by the session log). Everything else passes through unmodified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Crash record built by the supervisor the instant a signature line is
/// observed. Never mutated afterwards; every caller that asks later gets
/// the same classification and trace.
#[derive(Debug, Clone, PartialEq)]
pub struct CrashDetail {
    /// The matched signature line, e.g. `SCRIPT ERROR: ...`
    pub classification: String,
    /// Output window starting at the signature line
    pub trace: String,
    /// When the signature was observed
    pub detected_at: DateTime<Utc>,
}

impl CrashDetail {
    pub fn new(classification: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            classification: classification.into(),
            trace: trace.into(),
            detected_at: Utc::now(),
        }
    }
}

/// Request body accepted by both downstream surfaces and forwarded to Godot
/// as-is: `{"actions": [ ... ]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub actions: Vec<Value>,
}

/// Extract the `event` discriminator from an inbound message
pub fn event_name(msg: &Value) -> Option<&str> {
    msg.get("event").and_then(Value::as_str)
}

/// Extract the optional `narrative` annotation from an inbound message
pub fn narrative(msg: &Value) -> Option<&str> {
    msg.get("narrative").and_then(Value::as_str)
}

/// Build the structured crash result returned to callers after a crash
pub fn crash_event(detail: &CrashDetail) -> Value {
    json!({
        "event": "SystemCrash",
        "error_type": detail.classification,
        "stack_trace": detail.trace,
    })
}

/// Build a structured error result (connectivity, timeout, send failure).
/// Per-request errors are returned as results, never thrown across the
/// transport boundary.
pub fn error_event(message: impl AsRef<str>) -> Value {
    json!({
        "event": "Error",
        "error_message": message.as_ref(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let msg = json!({"event": "WaveStarted", "wave": 3});
        assert_eq!(event_name(&msg), Some("WaveStarted"));

        let no_event = json!({"wave": 3});
        assert_eq!(event_name(&no_event), None);

        let non_string = json!({"event": 7});
        assert_eq!(event_name(&non_string), None);
    }

    #[test]
    fn test_narrative_extraction() {
        let msg = json!({"event": "ShopPhase", "narrative": "[Shop] Gold: 150"});
        assert_eq!(narrative(&msg), Some("[Shop] Gold: 150"));

        let plain = json!({"event": "Ping"});
        assert_eq!(narrative(&plain), None);
    }

    #[test]
    fn test_crash_event_shape() {
        let detail = CrashDetail::new("SCRIPT ERROR: Invalid call", "SCRIPT ERROR: Invalid call\n   at: _ready");
        let ev = crash_event(&detail);

        assert_eq!(event_name(&ev), Some("SystemCrash"));
        assert_eq!(ev["error_type"], "SCRIPT ERROR: Invalid call");
        assert!(ev["stack_trace"].as_str().unwrap().contains("_ready"));
    }

    #[test]
    fn test_action_request_roundtrip() {
        let body = r#"{"actions": [{"type": "start_wave"}]}"#;
        let req: ActionRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.actions.len(), 1);
        assert_eq!(req.actions[0]["type"], "start_wave");

        let encoded = serde_json::to_value(&req).unwrap();
        assert!(encoded["actions"].is_array());
    }

    #[test]
    fn test_error_event_shape() {
        let ev = error_event("WebSocket not connected");
        assert_eq!(event_name(&ev), Some("Error"));
        assert_eq!(ev["error_message"], "WebSocket not connected");
    }
}
