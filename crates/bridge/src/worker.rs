//! Lifecycle and command dispatch for one compositor worker process.
//!
//! A [`CompositorWorker`] owns the spawned process and the two reader tasks
//! that drain its streams: stdout is framed (see [`crate::frame`]) and
//! demultiplexed into pending command continuations by nonce; stderr is an
//! unstructured diagnostic channel that is logged and captured, never
//! parsed for control flow.
//!
//! Commands may be issued concurrently without external locking. Stdin
//! writes are serialized internally and responses are matched strictly by
//! nonce, so completion order follows the worker's own scheduling. There
//! is no internal timeout and no mid-command cancellation: once written, a
//! command resolves only with its response or with the worker's exit.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use renderweld_common::{WeldError, WeldResult};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};

use crate::command::{CommandEnvelope, NonceCounter, LOG_CHANNEL_NONCE, SHUTDOWN_SENTINEL};
use crate::frame::FrameDecoder;

/// Known-noisy worker stderr line that carries no signal.
const BENIGN_STDERR_WARNING: &str = "No accelerated colorspace conversion";

/// Read buffer size for the worker's output stream.
const READ_BUF_SIZE: usize = 64 * 1024;

/// How a compositor worker process is started.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Path to the compositor worker binary.
    pub bin: PathBuf,

    /// Startup payload, passed JSON-serialized as the sole argument.
    pub init: Value,
}

#[derive(Debug, Clone)]
struct ExitOutcome {
    success: bool,
    status: String,
    stderr: String,
}

type PendingMap = HashMap<u64, oneshot::Sender<WeldResult<Vec<u8>>>>;

/// State shared between the handle and the reader tasks.
#[derive(Debug)]
struct Shared {
    pending: Mutex<PendingMap>,
    stderr_tail: Mutex<String>,
    quit: AtomicBool,
}

/// Handle to one running compositor worker.
#[derive(Debug)]
pub struct CompositorWorker {
    stdin: AsyncMutex<ChildStdin>,
    nonces: NonceCounter,
    finishing: AtomicBool,
    shared: Arc<Shared>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
}

impl CompositorWorker {
    /// Spawn the worker process and start its stream readers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &WorkerConfig) -> WeldResult<Arc<Self>> {
        let init_arg = serde_json::to_string(&config.init)?;

        let mut command = Command::new(&config.bin);
        command
            .arg(init_arg)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = config.bin.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.env(DYLIB_PATH_VAR, prepend_library_path(dir));
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WeldError::FileNotFound {
                path: config.bin.clone(),
            },
            _ => WeldError::Io(e),
        })?;

        tracing::info!(
            bin = %config.bin.display(),
            pid = child.id().unwrap_or_default(),
            "Compositor worker started"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WeldError::bridge("failed to capture worker stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WeldError::bridge("failed to capture worker stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WeldError::bridge("failed to capture worker stderr"))?;

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            stderr_tail: Mutex::new(String::new()),
            quit: AtomicBool::new(false),
        });
        let (exit_tx, exit_rx) = watch::channel(None);

        let stderr_shared = shared.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.contains(BENIGN_STDERR_WARNING) {
                    continue;
                }
                tracing::info!(target: "compositor", "{line}");
                let mut tail = stderr_shared.stderr_tail.lock();
                tail.push_str(&line);
                tail.push('\n');
            }
        });

        let supervisor_shared = shared.clone();
        tokio::spawn(supervise(
            child,
            stdout,
            stderr_task,
            supervisor_shared,
            exit_tx,
        ));

        Ok(Arc::new(Self {
            stdin: AsyncMutex::new(stdin),
            nonces: NonceCounter::new(),
            finishing: AtomicBool::new(false),
            shared,
            exit_rx,
        }))
    }

    /// Send one command and await its response payload.
    ///
    /// Concurrent calls are safe; each carries a fresh nonce and resolves
    /// with its own payload regardless of the order the worker answers in.
    /// Fails immediately once [`finish_commands`](Self::finish_commands)
    /// has been called or the process has exited.
    pub async fn execute(&self, kind: &str, params: Map<String, Value>) -> WeldResult<Vec<u8>> {
        if self.finishing.load(Ordering::SeqCst) || self.has_quit() {
            return Err(WeldError::misuse("compositor already finished"));
        }

        let nonce = self.nonces.next();
        let line = CommandEnvelope::new(kind, params, nonce).to_line()?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(nonce, tx);

        if self.has_quit() {
            // Exit raced the registration; the batch-reject may have drained
            // the map before our entry landed.
            if self.shared.pending.lock().remove(&nonce).is_some() {
                return Err(self.exit_error());
            }
        } else {
            let mut stdin = self.stdin.lock().await;
            let written = match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            drop(stdin);
            if let Err(e) = written {
                self.shared.pending.lock().remove(&nonce);
                return Err(WeldError::Io(e));
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.exit_error()),
        }
    }

    /// Signal that no further commands will be sent.
    ///
    /// Writes the shutdown sentinel and flips the finishing flag. Does not
    /// wait for in-flight responses; the worker drains them and exits on
    /// its own. Calling this twice, or after the process has quit, is an
    /// immediate error.
    pub async fn finish_commands(&self) -> WeldResult<()> {
        if self.has_quit() {
            return Err(WeldError::misuse("compositor already quit"));
        }
        if self.finishing.swap(true, Ordering::SeqCst) {
            return Err(WeldError::misuse("compositor already finished"));
        }

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(format!("{SHUTDOWN_SENTINEL}\n").as_bytes())
            .await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Wait for the worker process to exit.
    ///
    /// Resolves `Ok` on a zero exit status, otherwise carries the captured
    /// stderr transcript. By the time this returns, every continuation that
    /// was pending at exit has been rejected — no response is ever
    /// delivered after process exit.
    pub async fn wait_for_done(&self) -> WeldResult<()> {
        let mut rx = self.exit_rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(guard) => guard.clone(),
            Err(_) => {
                return Err(WeldError::bridge(
                    "compositor supervisor ended without reporting an exit",
                ))
            }
        };
        match outcome {
            Some(outcome) if outcome.success => Ok(()),
            Some(outcome) => Err(WeldError::worker_exit(outcome.status, outcome.stderr)),
            None => Err(WeldError::bridge("compositor exit state unavailable")),
        }
    }

    /// Whether the worker process has exited.
    pub fn has_quit(&self) -> bool {
        self.shared.quit.load(Ordering::SeqCst)
    }

    fn exit_error(&self) -> WeldError {
        match self.exit_rx.borrow().clone() {
            Some(outcome) => WeldError::worker_exit(
                format!("{} before responding", outcome.status),
                outcome.stderr,
            ),
            None => WeldError::misuse("compositor already finished"),
        }
    }
}

/// Owns the child process: frames stdout, reaps the exit status, and
/// settles every outstanding continuation exactly once.
async fn supervise(
    mut child: Child,
    mut stdout: ChildStdout,
    stderr_task: tokio::task::JoinHandle<()>,
    shared: Arc<Shared>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let frames = match decoder.feed(&buf[..n]) {
                    Ok(frames) => frames,
                    Err(e) => {
                        abort_connection(&mut child, &shared, e.to_string()).await;
                        break;
                    }
                };

                let mut violation = None;
                for frame in frames {
                    if frame.nonce == LOG_CHANNEL_NONCE {
                        tracing::info!(
                            target: "compositor",
                            "{}",
                            String::from_utf8_lossy(&frame.payload)
                        );
                        continue;
                    }
                    let sender = shared.pending.lock().remove(&frame.nonce);
                    match sender {
                        Some(tx) => {
                            // Receiver may have been dropped; nothing to do.
                            let _ = tx.send(Ok(frame.payload));
                        }
                        None => {
                            violation = Some(format!(
                                "message for unknown nonce {}",
                                frame.nonce
                            ));
                            break;
                        }
                    }
                }
                if let Some(message) = violation {
                    abort_connection(&mut child, &shared, message).await;
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed reading compositor output stream");
                break;
            }
        }
    }

    let status = child.wait().await;
    let _ = stderr_task.await;

    let (success, status_text) = match status {
        Ok(s) => (s.success(), s.to_string()),
        Err(e) => (false, format!("wait failed: {e}")),
    };
    let stderr_text = shared.stderr_tail.lock().trim().to_string();

    shared.quit.store(true, Ordering::SeqCst);
    reject_all(&shared, || {
        WeldError::worker_exit(
            format!("{status_text} before responding"),
            stderr_text.clone(),
        )
    });

    if success {
        tracing::debug!("Compositor worker exited cleanly");
    } else {
        tracing::warn!(status = %status_text, "Compositor worker exited with failure");
    }

    let _ = exit_tx.send(Some(ExitOutcome {
        success,
        status: status_text,
        stderr: stderr_text,
    }));
}

/// Protocol violations are fatal for the connection: fail every pending
/// command and take the worker down.
async fn abort_connection(child: &mut Child, shared: &Shared, message: String) {
    tracing::error!("Protocol violation: {message}");
    reject_all(shared, || WeldError::protocol(message.clone()));
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill compositor after protocol violation");
    }
}

fn reject_all(shared: &Shared, make_err: impl Fn() -> WeldError) {
    let drained: Vec<_> = {
        let mut pending = shared.pending.lock();
        pending.drain().collect()
    };
    for (_, tx) in drained {
        let _ = tx.send(Err(make_err()));
    }
}

/// Environment variable consulted by the dynamic linker on this platform.
const DYLIB_PATH_VAR: &str = if cfg!(target_os = "macos") {
    "DYLD_LIBRARY_PATH"
} else if cfg!(windows) {
    "PATH"
} else {
    "LD_LIBRARY_PATH"
};

/// Prepend `dir` to the dynamic-library search path so the worker binary
/// finds shared libraries shipped next to it.
fn prepend_library_path(dir: &Path) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os(DYLIB_PATH_VAR) {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}
