//! Godot child process lifecycle
//!
//! Spawns Godot with stdout and stderr piped, merges both streams into one
//! line channel, and drives a monitor task that captures output and fires
//! crash detection. Crash detection is one-shot per process lifetime: the
//! first matching line seals a `CrashDetail`, later matches only land in
//! the capture buffer.

use crate::patterns::{self, DEFAULT_READY_MARKER};
use gateway_core::{CrashDetail, GatewayError, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// Captured output lines kept for readiness polling and crash traces
const CAPTURE_BUFFER_LINES: usize = 1000;

/// Trace window collected from the signature line onward
const TRACE_CONTEXT_LINES: usize = 20;

/// How long to wait for each follow-up trace line after a signature hits.
/// Godot prints the stack immediately after the error, so a short grace
/// per line is enough before sealing the crash record.
const TRACE_LINE_GRACE: Duration = Duration::from_millis(250);

/// Grace window between SIGTERM and SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(2);

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How to launch the Godot project
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Godot executable (default: `godot` from PATH)
    pub godot_binary: String,
    /// Project directory passed to `--path`
    pub project_path: PathBuf,
    /// Entry scene, e.g. `res://src/Scenes/UI/CoreSelection.tscn`
    pub scene: String,
    /// WebSocket port the game's AI server should listen on
    pub port: u16,
    /// Show the game window instead of running `--headless`
    pub visual_mode: bool,
    /// Substring that marks the internal server as up
    pub ready_marker: String,
}

impl LaunchSpec {
    pub fn new(project_path: impl Into<PathBuf>, scene: impl Into<String>, port: u16) -> Self {
        Self {
            godot_binary: "godot".into(),
            project_path: project_path.into(),
            scene: scene.into(),
            port,
            visual_mode: false,
            ready_marker: DEFAULT_READY_MARKER.into(),
        }
    }
}

/// Bounded append-only ring of recent output lines
struct CaptureBuffer {
    lines: VecDeque<String>,
}

impl CaptureBuffer {
    fn new() -> Self {
        Self {
            lines: VecDeque::with_capacity(CAPTURE_BUFFER_LINES),
        }
    }

    fn push(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > CAPTURE_BUFFER_LINES {
            self.lines.pop_front();
        }
    }

    fn contains(&self, marker: &str) -> bool {
        self.lines.iter().any(|l| l.contains(marker))
    }

    fn tail(&self, n: usize) -> Vec<String> {
        let start = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(start).cloned().collect()
    }
}

struct Inner {
    pid: Option<u32>,
    child: tokio::sync::Mutex<Child>,
    // Touched by the monitor task and polling callers concurrently; plain
    // mutual exclusion, never held across an await.
    output: Mutex<CaptureBuffer>,
    crashed: AtomicBool,
    crash: Mutex<Option<CrashDetail>>,
    ready_marker: String,
}

/// Handle to a live Godot process
///
/// Cloneable; all clones share the same child, capture buffer and crash
/// state. The monitor task runs for the lifetime of the process.
#[derive(Clone)]
pub struct GodotProcess {
    inner: Arc<Inner>,
}

impl GodotProcess {
    /// Spawn Godot and start monitoring its output.
    ///
    /// Returns the process handle and a channel that delivers the
    /// `CrashDetail` exactly once if a crash signature is ever observed.
    /// Fails with `Launch` if the executable cannot be spawned; no process
    /// is created in that case.
    pub fn launch(spec: LaunchSpec) -> Result<(Self, mpsc::Receiver<CrashDetail>)> {
        let mut cmd = Command::new(&spec.godot_binary);
        cmd.arg("--path")
            .arg(&spec.project_path)
            .arg(format!("--ai-port={}", spec.port))
            .arg(&spec.scene)
            .arg("--ai-mode");
        if !spec.visual_mode {
            cmd.arg("--headless");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GatewayError::Launch(format!("failed to spawn {}: {}", spec.godot_binary, e))
        })?;

        let pid = child.id();
        info!("Godot spawned, pid={:?}, port={}", pid, spec.port);

        // Merge stdout and stderr into one ordered line channel
        let (line_tx, line_rx) = mpsc::channel::<String>(256);
        if let Some(out) = child.stdout.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(err) = child.stderr.take() {
            let tx = line_tx;
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }

        let inner = Arc::new(Inner {
            pid,
            child: tokio::sync::Mutex::new(child),
            output: Mutex::new(CaptureBuffer::new()),
            crashed: AtomicBool::new(false),
            crash: Mutex::new(None),
            ready_marker: spec.ready_marker,
        });

        let (crash_tx, crash_rx) = mpsc::channel(1);
        let process = Self {
            inner: inner.clone(),
        };
        tokio::spawn(monitor_output(inner, line_rx, crash_tx));

        Ok((process, crash_rx))
    }

    /// OS process id, if the child was still alive at spawn
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Whether the child process is still running
    pub async fn is_running(&self) -> bool {
        let mut child = self.inner.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    /// Whether a crash signature has been observed
    pub fn has_crashed(&self) -> bool {
        self.inner.crashed.load(Ordering::SeqCst)
    }

    /// The crash record, once detection has fired
    pub fn crash_detail(&self) -> Option<CrashDetail> {
        self.inner.crash.lock().expect("crash lock poisoned").clone()
    }

    /// Most recent captured output lines
    pub fn recent_output(&self, n: usize) -> Vec<String> {
        self.inner.output.lock().expect("output lock poisoned").tail(n)
    }

    /// Poll the capture buffer for the ready marker.
    ///
    /// Returns `ProcessExited` if the child dies first, `ReadinessTimeout`
    /// if the deadline elapses without the marker appearing.
    pub async fn wait_for_ready(&self, ready_timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + ready_timeout;
        loop {
            if !self.is_running().await {
                return Err(GatewayError::ProcessExited);
            }
            {
                let output = self.inner.output.lock().expect("output lock poisoned");
                if output.contains(&self.inner.ready_marker) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(GatewayError::ReadinessTimeout);
            }
            sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Request shutdown, escalating from SIGTERM to SIGKILL after a grace
    /// window. Idempotent; safe to call after the process already exited.
    pub async fn terminate(&self) {
        if !self.is_running().await {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.inner.pid {
            // SAFETY: plain signal send to our own child's pid
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        let deadline = Instant::now() + KILL_GRACE;
        while Instant::now() < deadline {
            if !self.is_running().await {
                debug!("Godot exited within the grace window");
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }

        warn!("Godot did not exit after SIGTERM, killing");
        let mut child = self.inner.child.lock().await;
        let _ = child.kill().await;
    }
}

/// Monitor task: consumes the merged output stream for the process's
/// entire lifetime.
async fn monitor_output(
    inner: Arc<Inner>,
    mut line_rx: mpsc::Receiver<String>,
    crash_tx: mpsc::Sender<CrashDetail>,
) {
    while let Some(line) = line_rx.recv().await {
        debug!("[Godot] {}", line);
        inner
            .output
            .lock()
            .expect("output lock poisoned")
            .push(line.clone());

        if inner.crashed.load(Ordering::SeqCst) || !patterns::is_crash_line(&line) {
            continue;
        }
        inner.crashed.store(true, Ordering::SeqCst);

        // The matched line classifies the crash; the trace is the window
        // of output starting at the signature. Follow-up lines get a short
        // grace each, fewer if the stream ends first.
        let mut trace = vec![line.clone()];
        while trace.len() < TRACE_CONTEXT_LINES {
            match timeout(TRACE_LINE_GRACE, line_rx.recv()).await {
                Ok(Some(next)) => {
                    inner
                        .output
                        .lock()
                        .expect("output lock poisoned")
                        .push(next.clone());
                    trace.push(next);
                }
                _ => break,
            }
        }

        let detail = CrashDetail::new(line, trace.join("\n"));
        warn!("Crash detected: {}", detail.classification);
        *inner.crash.lock().expect("crash lock poisoned") = Some(detail.clone());

        // Deliver exactly once, then take the process down
        let _ = crash_tx.send(detail).await;
        force_kill(&inner).await;
    }
}

async fn force_kill(inner: &Inner) {
    let mut child = inner.child.lock().await;
    if matches!(child.try_wait(), Ok(None)) {
        let _ = child.kill().await;
    }
}
