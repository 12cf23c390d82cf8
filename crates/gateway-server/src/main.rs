//! godot-gateway: supervised Godot game behind an HTTP/WebSocket gateway
//!
//! Launches the game as a child process, waits for its AI server to come
//! up, bridges its WebSocket to an HTTP API plus a subscriber WebSocket,
//! and turns crash output into structured events. Exits non-zero when the
//! game crashes or dies.

use anyhow::{Context, Result, bail};
use gateway_server::{AppState, build_router};
use godot_bridge::{BridgeConfig, GodotBridge, SessionLog};
use godot_process::{GodotProcess, LaunchSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const READY_TIMEOUT: Duration = Duration::from_secs(30);
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SCENE: &str = "res://src/Scenes/UI/CoreSelection.tscn";

struct Args {
    project: PathBuf,
    scene: String,
    visual: bool,
    http_port: u16,
    godot_port: u16,
    log_dir: PathBuf,
}

fn usage() -> ! {
    eprintln!(
        "Usage: godot-gateway --project <path> [--scene <res-path>] [--visual] \
         [--http-port <port>] [--godot-port <port>] [--log-dir <path>]"
    );
    std::process::exit(2);
}

fn parse_args() -> Result<Args> {
    let mut project = None;
    let mut scene = DEFAULT_SCENE.to_string();
    let mut visual = false;
    // Port 0 means pick a free one
    let mut http_port = 0u16;
    let mut godot_port = 0u16;
    let mut log_dir = PathBuf::from("logs");

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--project" | "-p" => project = Some(PathBuf::from(args.next().unwrap_or_else(|| usage()))),
            "--scene" | "-s" => scene = args.next().unwrap_or_else(|| usage()),
            "--visual" | "--gui" => visual = true,
            "--http-port" => {
                http_port = args
                    .next()
                    .unwrap_or_else(|| usage())
                    .parse()
                    .context("invalid --http-port")?;
            }
            "--godot-port" => {
                godot_port = args
                    .next()
                    .unwrap_or_else(|| usage())
                    .parse()
                    .context("invalid --godot-port")?;
            }
            "--log-dir" => log_dir = PathBuf::from(args.next().unwrap_or_else(|| usage())),
            "--help" | "-h" => usage(),
            other => {
                eprintln!("Unknown argument: {other}");
                usage();
            }
        }
    }

    let Some(project) = project else {
        eprintln!("Missing required --project");
        usage();
    };
    Ok(Args {
        project,
        scene,
        visual,
        http_port,
        godot_port,
        log_dir,
    })
}

/// Ask the OS for a free TCP port
fn free_port() -> Result<u16> {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").context("failed to probe for a free port")?;
    Ok(listener.local_addr()?.port())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut args = parse_args()?;
    if args.godot_port == 0 {
        args.godot_port = free_port()?;
    }

    // Launch and wait for the game's AI server
    let mut spec = LaunchSpec::new(args.project.clone(), args.scene.clone(), args.godot_port);
    spec.visual_mode = args.visual;
    let (process, crash_rx) = GodotProcess::launch(spec)?;
    info!(
        "Godot launched (pid {:?}), waiting for readiness",
        process.pid()
    );

    if let Err(e) = process.wait_for_ready(READY_TIMEOUT).await {
        error!("Godot never became ready: {}", e);
        for line in process.recent_output(20) {
            error!("  godot: {}", line);
        }
        process.terminate().await;
        bail!("Godot failed to start: {e}");
    }
    info!("Godot AI server is ready on port {}", args.godot_port);

    // Bridge to the game
    let session_log = SessionLog::new(&args.log_dir);
    info!("Session log: {:?}", session_log.path());
    let bridge = GodotBridge::new(BridgeConfig::default(), session_log);
    if let Err(e) = bridge.connect(&format!("ws://127.0.0.1:{}", args.godot_port)).await {
        process.terminate().await;
        bail!("Failed to connect to Godot: {e}");
    }
    bridge.watch_crashes(crash_rx);

    // Serve the HTTP API
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.http_port))
        .await
        .with_context(|| format!("failed to bind HTTP port {}", args.http_port))?;
    let http_port = listener.local_addr()?.port();
    info!("HTTP API listening on http://127.0.0.1:{}", http_port);

    let state = Arc::new(AppState {
        bridge: bridge.clone(),
        process: process.clone(),
        http_port,
        godot_ws_port: args.godot_port,
        visual_mode: args.visual,
    });
    let router = build_router(state);

    // Run until Ctrl-C, a detected crash, or the game dying on its own
    let abnormal = Arc::new(AtomicBool::new(false));
    let shutdown = {
        let abnormal = abnormal.clone();
        let process = process.clone();
        let mut crash_signal = bridge.shutdown_signal();
        async move {
            let liveness = async {
                loop {
                    tokio::time::sleep(LIVENESS_INTERVAL).await;
                    if !process.is_running().await {
                        break;
                    }
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
                _ = crash_signal.changed() => {
                    warn!("Crash detected, shutting down");
                    abnormal.store(true, Ordering::SeqCst);
                }
                _ = liveness => {
                    warn!("Godot process exited, shutting down");
                    abnormal.store(true, Ordering::SeqCst);
                }
            }
        }
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    process.terminate().await;
    if abnormal.load(Ordering::SeqCst) {
        if let Some(detail) = bridge.crash_detail() {
            error!("Crash record: {}", detail.classification);
        }
        std::process::exit(1);
    }
    info!("Shutdown complete");
    Ok(())
}
