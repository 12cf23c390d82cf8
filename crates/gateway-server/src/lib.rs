//! HTTP and WebSocket front door for the Godot gateway
//!
//! Wires the process supervisor and the message bridge behind an axum
//! router: `POST /action` for synchronous request/response callers,
//! `GET /ws` for subscriber callers, plus status, health and event
//! polling endpoints.

pub mod http;
pub mod ws;

use axum::Router;
use axum::routing::{any, get, post};
use godot_bridge::GodotBridge;
use godot_process::GodotProcess;
use std::sync::Arc;

/// Shared handler state
pub struct AppState {
    pub bridge: GodotBridge,
    pub process: GodotProcess,
    pub http_port: u16,
    pub godot_ws_port: u16,
    pub visual_mode: bool,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/action", post(http::handle_action))
        .route("/status", get(http::handle_status))
        .route("/health", get(http::handle_health))
        .route("/events", get(http::handle_events))
        .route("/ws", any(ws::handle_upgrade))
        .with_state(state)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use godot_bridge::BridgeConfig;
    use godot_bridge::SessionLog;
    use godot_process::LaunchSpec;
    use serde_json::{Value, json};
    use std::future::IntoFuture;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::Message;

    /// Everything a gateway test needs: a live game stand-in on both the
    /// process and WebSocket side, and the HTTP API bound to a free port.
    struct Gateway {
        base: String,
        ws_url: String,
        push: mpsc::Sender<String>,
        _dir: TempDir,
    }

    async fn spawn_gateway() -> Gateway {
        let dir = TempDir::new().unwrap();

        // Fake Godot binary: announces readiness, then idles
        let script = dir.path().join("godot");
        std::fs::write(&script, "#!/bin/sh\necho STATE_OPEN\nsleep 60\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Fake Godot AI WebSocket server: echoes a WaveStarted state for
        // every request and forwards test-injected frames
        let game = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let game_port = game.local_addr().unwrap().port();
        let (push_tx, mut push_rx) = mpsc::channel::<String>(16);
        tokio::spawn(async move {
            let (stream, _) = game.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut sink, mut source) = ws.split();
            loop {
                tokio::select! {
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(_))) => {
                            let reply = r#"{"event":"WaveStarted","wave":1}"#;
                            if sink.send(Message::text(reply)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    pushed = push_rx.recv() => match pushed {
                        Some(text) => {
                            if sink.send(Message::text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let mut spec = LaunchSpec::new(dir.path().to_path_buf(), "res://main.tscn", game_port);
        spec.godot_binary = script.to_string_lossy().into_owned();
        let (process, crash_rx) = GodotProcess::launch(spec).unwrap();
        process.wait_for_ready(Duration::from_secs(5)).await.unwrap();

        let bridge = GodotBridge::new(
            BridgeConfig {
                request_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            SessionLog::new(dir.path().join("logs")),
        );
        bridge.connect(&format!("ws://127.0.0.1:{game_port}")).await.unwrap();
        bridge.watch_crashes(crash_rx);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_port = listener.local_addr().unwrap().port();
        let state = Arc::new(AppState {
            bridge,
            process,
            http_port,
            godot_ws_port: game_port,
            visual_mode: false,
        });
        tokio::spawn(axum::serve(listener, build_router(state)).into_future());

        Gateway {
            base: format!("http://127.0.0.1:{http_port}"),
            ws_url: format!("ws://127.0.0.1:{http_port}/ws"),
            push: push_tx,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let gw = spawn_gateway().await;
        let body: Value = reqwest::get(format!("{}/health", gw.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_reflects_running_gateway() {
        let gw = spawn_gateway().await;
        let body: Value = reqwest::get(format!("{}/status", gw.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["godot_running"], true);
        assert_eq!(body["ws_connected"], true);
        assert_eq!(body["crashed"], false);
        assert_eq!(body["visual_mode"], false);
        assert!(body["http_port"].as_u64().unwrap() > 0);
        assert!(body["godot_ws_port"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_action_round_trip() {
        let gw = spawn_gateway().await;
        let body: Value = reqwest::Client::new()
            .post(format!("{}/action", gw.base))
            .json(&json!({"actions": [{"type": "start_wave"}]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["event"], "WaveStarted");
        assert_eq!(body["wave"], 1);
    }

    #[tokio::test]
    async fn test_action_rejects_malformed_body() {
        let gw = spawn_gateway().await;
        let response = reqwest::Client::new()
            .post(format!("{}/action", gw.base))
            .header("content-type", "application/json")
            .body("{\"wrong\": true}")
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_events_drains_unsolicited_queue() {
        let gw = spawn_gateway().await;
        gw.push.send(r#"{"event":"BossSpawned"}"#.into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let body: Value = reqwest::get(format!("{}/events", gw.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["events"][0]["event"], "BossSpawned");

        // Drained: a second poll comes back empty
        let body: Value = reqwest::get(format!("{}/events", gw.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["events"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_relayed_events() {
        let gw = spawn_gateway().await;
        let (mut client, _) = tokio_tungstenite::connect_async(gw.ws_url.as_str()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        gw.push.send(r#"{"event":"BossSpawned"}"#.into()).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = frame else {
            panic!("expected a text frame");
        };
        let event: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(event["event"], "BossSpawned");
    }

    #[tokio::test]
    async fn test_subscriber_sends_pass_through_to_game() {
        let gw = spawn_gateway().await;
        let (mut client, _) = tokio_tungstenite::connect_async(gw.ws_url.as_str()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The fake game replies WaveStarted to anything it receives; with
        // no request armed, the reply lands in the event stream
        client
            .send(Message::text(r#"{"actions":[{"type":"refresh_shop"}]}"#))
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = frame else {
            panic!("expected a text frame");
        };
        let event: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(event["event"], "WaveStarted");
    }
}
