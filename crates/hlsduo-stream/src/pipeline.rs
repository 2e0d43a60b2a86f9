//! One named streaming output and the transcoder process behind it.
//!
//! A pipeline moves through `Idle -> Starting -> Active -> Stopping -> Idle`.
//! Start and stop are serialized by an async transition lock; the state
//! itself sits behind a short-lived sync lock so the monitor task can post
//! an exit without ever waiting on a start or stop in progress.
//!
//! Each run gets a monitor task that owns the child process. It tails the
//! output directory into the [`SegmentIndex`], kills the child when `stop`
//! asks it to, and, if the child exits on its own, flips the pipeline back
//! to `Idle` and records a [`Fault`].

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hlsduo_av::{TranscodeJob, Transcoder};
use hlsduo_common::{Error, Result, StreamName};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Level;

use crate::segment::SegmentIndex;
use crate::tail::SegmentTailer;

/// Lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// An unexpected exit of the transcoder after `start` had returned.
#[derive(Debug, Clone, Serialize)]
pub struct Fault {
    pub pid: Option<u32>,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a pipeline for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub name: StreamName,
    pub state: PipelineState,
    pub active: bool,
    pub pid: Option<u32>,
    pub media_sequence: u64,
    pub segments: usize,
    pub last_fault: Option<Fault>,
}

struct RunHandle {
    run: u64,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    monitor: JoinHandle<()>,
}

struct Inner {
    state: PipelineState,
    current: Option<RunHandle>,
    runs: u64,
    last_fault: Option<Fault>,
}

/// A single named LL-HLS output ("play" or "push").
pub struct Pipeline {
    name: StreamName,
    output_dir: PathBuf,
    working_dir: PathBuf,
    transcoder: Arc<dyn Transcoder>,
    tail_interval: Duration,
    transition: tokio::sync::Mutex<()>,
    inner: Arc<Mutex<Inner>>,
    index: Arc<RwLock<SegmentIndex>>,
}

impl Pipeline {
    pub fn new(
        name: StreamName,
        output_dir: PathBuf,
        working_dir: PathBuf,
        transcoder: Arc<dyn Transcoder>,
        tail_interval: Duration,
    ) -> Self {
        Self {
            name,
            output_dir,
            working_dir,
            transcoder,
            tail_interval,
            transition: tokio::sync::Mutex::new(()),
            inner: Arc::new(Mutex::new(Inner {
                state: PipelineState::Idle,
                current: None,
                runs: 0,
                last_fault: None,
            })),
            index: Arc::new(RwLock::new(SegmentIndex::new())),
        }
    }

    pub fn name(&self) -> StreamName {
        self.name
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Launch the transcoder for `source`.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyActive`] if the pipeline is not idle; the running
    ///   process is left untouched.
    /// - [`Error::NotFound`] if `source` does not exist.
    /// - [`Error::Io`] if the output directory cannot be prepared.
    /// - [`Error::ProcessLaunch`] if the process cannot be spawned.
    ///
    /// On any error the pipeline is left `Idle`.
    pub async fn start(&self, source: &Path) -> Result<()> {
        let _transition = self.transition.lock().await;

        {
            let mut inner = self.inner.lock();
            if inner.state != PipelineState::Idle {
                return Err(Error::AlreadyActive(self.name));
            }
            inner.state = PipelineState::Starting;
        }
        // Reverts to Idle on error and when this future is dropped mid-launch.
        let _guard = TransitionGuard::new(&self.inner, PipelineState::Starting);

        match self.launch(source).await {
            Ok(pid) => {
                tracing::info!(stream = %self.name, pid, "Stream started");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(stream = %self.name, error = %e, "Stream failed to start");
                Err(e)
            }
        }
    }

    async fn launch(&self, source: &Path) -> Result<Option<u32>> {
        let input = absolute_path(source)?;
        match tokio::fs::metadata(&input).await {
            Ok(meta) => {
                tracing::debug!(
                    stream = %self.name,
                    path = %input.display(),
                    bytes = meta.len(),
                    "Source file found"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(input));
            }
            Err(e) => {
                return Err(Error::io(format!("error checking {}", input.display()), e));
            }
        }

        prepare_output_dir(&self.output_dir).await?;
        self.index.write().reset();

        let job = TranscodeJob {
            input,
            output_dir: self.output_dir.clone(),
            working_dir: self.working_dir.clone(),
        };
        let mut child = self
            .transcoder
            .command(&job)
            .spawn()
            .map_err(|e| Error::process_launch(self.transcoder.name(), e.to_string()))?;
        let pid = child.id();
        let stderr = child.stderr.take().map(|s| spawn_stderr_logger(self.name, s));

        let (kill_tx, kill_rx) = oneshot::channel();
        let tailer = SegmentTailer::new(&self.output_dir, Arc::clone(&self.index));

        // The monitor is spawned while the state lock is held so that an
        // instant exit cannot be observed before the run is registered.
        let mut inner = self.inner.lock();
        inner.runs += 1;
        let run = inner.runs;
        let monitor = tokio::spawn(monitor(
            Monitor {
                name: self.name,
                run,
                pid,
                inner: Arc::clone(&self.inner),
                tail_interval: self.tail_interval,
            },
            child,
            stderr,
            tailer,
            kill_rx,
        ));
        inner.current = Some(RunHandle {
            run,
            pid,
            kill_tx: Some(kill_tx),
            monitor,
        });
        inner.state = PipelineState::Active;
        inner.last_fault = None;

        Ok(pid)
    }

    /// Kill the transcoder and wait for it to be reaped.
    ///
    /// Stopping an idle pipeline succeeds without doing anything.
    pub async fn stop(&self) -> Result<()> {
        let _transition = self.transition.lock().await;

        let handle = {
            let mut inner = self.inner.lock();
            if inner.state == PipelineState::Idle {
                return Ok(());
            }
            inner.state = PipelineState::Stopping;
            inner.current.take()
        };
        // A dropped stop still ends Idle; the detached monitor finishes the kill.
        let _guard = TransitionGuard::new(&self.inner, PipelineState::Stopping);

        let mut result = Ok(());
        if let Some(mut handle) = handle {
            if let Some(kill_tx) = handle.kill_tx.take() {
                // The monitor is already gone if the process exited first.
                let _ = kill_tx.send(());
            }
            if let Err(e) = (&mut handle.monitor).await {
                tracing::error!(stream = %self.name, run = handle.run, "Monitor task failed: {e}");
                result = Err(Error::internal(format!(
                    "monitor for stream {} failed: {e}",
                    self.name
                )));
            }
            tracing::info!(stream = %self.name, pid = handle.pid, "Stream stopped");
        }

        result
    }

    /// True while a process is running and has not been observed to exit.
    pub fn is_active(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == PipelineState::Active && inner.current.is_some()
    }

    pub fn state(&self) -> PipelineState {
        self.inner.lock().state
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: PipelineState) {
        self.inner.lock().state = state;
    }

    /// Process id of the current run.
    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().current.as_ref().and_then(|h| h.pid)
    }

    /// The most recent unexpected exit, cleared by the next successful start.
    pub fn last_fault(&self) -> Option<Fault> {
        self.inner.lock().last_fault.clone()
    }

    /// Playlist rendered from the segment index.
    pub fn playlist(&self) -> String {
        self.index.read().render_playlist()
    }

    /// Run `f` against the segment index under its read lock.
    pub fn with_index<R>(&self, f: impl FnOnce(&SegmentIndex) -> R) -> R {
        f(&self.index.read())
    }

    pub fn status(&self) -> PipelineStatus {
        let (state, active, pid, last_fault) = {
            let inner = self.inner.lock();
            (
                inner.state,
                inner.state == PipelineState::Active && inner.current.is_some(),
                inner.current.as_ref().and_then(|h| h.pid),
                inner.last_fault.clone(),
            )
        };
        let index = self.index.read();
        PipelineStatus {
            name: self.name,
            state,
            active,
            pid,
            media_sequence: index.media_sequence(),
            segments: index.len(),
            last_fault,
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

/// Puts the pipeline back to `Idle` if it is still in `during` when dropped.
///
/// `start` and `stop` run inside request futures that can be cancelled at
/// any await point; the transitional state must not outlive them.
struct TransitionGuard<'a> {
    inner: &'a Mutex<Inner>,
    during: PipelineState,
}

impl<'a> TransitionGuard<'a> {
    fn new(inner: &'a Mutex<Inner>, during: PipelineState) -> Self {
        Self { inner, during }
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if inner.state == self.during {
            inner.state = PipelineState::Idle;
        }
    }
}

struct Monitor {
    name: StreamName,
    run: u64,
    pid: Option<u32>,
    inner: Arc<Mutex<Inner>>,
    tail_interval: Duration,
}

async fn monitor(
    ctx: Monitor,
    mut child: Child,
    stderr: Option<JoinHandle<Option<String>>>,
    mut tailer: SegmentTailer,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(ctx.tail_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            // A dropped sender means the handle is gone; treat it as a kill.
            _ = &mut kill_rx => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(stream = %ctx.name, "Kill failed, process already gone: {e}");
                }
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = tailer.poll().await {
                    tracing::debug!(
                        stream = %ctx.name,
                        dir = %tailer.dir().display(),
                        "Segment tail failed: {e}"
                    );
                }
            }
        }
    };

    // Pick up whatever the process managed to write before it went away.
    let _ = tailer.poll().await;
    let last_line = match stderr {
        Some(handle) => handle.await.ok().flatten(),
        None => None,
    };

    let fault = exit_fault(ctx.pid, status, last_line);
    let mut inner = ctx.inner.lock();
    let is_current = inner.state == PipelineState::Active
        && inner.current.as_ref().map(|h| h.run) == Some(ctx.run);
    if !is_current {
        tracing::debug!(stream = %ctx.name, run = ctx.run, "Process exited during stop");
        return;
    }

    tracing::error!(
        stream = %ctx.name,
        pid = ctx.pid,
        exit_code = fault.exit_code,
        "Transcoder exited: {}",
        fault.message
    );
    inner.current = None;
    inner.state = PipelineState::Idle;
    inner.last_fault = Some(fault);
}

fn exit_fault(
    pid: Option<u32>,
    status: std::io::Result<ExitStatus>,
    last_line: Option<String>,
) -> Fault {
    let (exit_code, mut message) = match status {
        Ok(status) => (status.code(), format!("process exited with {status}")),
        Err(e) => (None, format!("failed to wait for process: {e}")),
    };
    if let Some(line) = last_line {
        message.push_str(": ");
        message.push_str(&line);
    }
    Fault {
        pid,
        exit_code,
        message,
        at: Utc::now(),
    }
}

/// Forward transcoder stderr to the log; yields the last non-empty line.
/// Transcoder chatter is debug output; lines reporting an error are raised.
fn stderr_level(line: &str) -> Level {
    if line.to_ascii_lowercase().contains("error") {
        Level::WARN
    } else {
        Level::DEBUG
    }
}

fn spawn_stderr_logger(name: StreamName, stderr: ChildStderr) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut last = None;
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if stderr_level(&line) == Level::WARN {
                tracing::warn!(stream = %name, "{line}");
            } else {
                tracing::debug!(stream = %name, "{line}");
            }
            last = Some(line);
        }
        last
    })
}

pub(crate) fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| Error::io("failed to get working directory", e))?;
    Ok(cwd.join(path))
}

/// Create `dir` if needed and remove everything inside it.
///
/// Stale segments must go too, not only the playlist: the next run reuses
/// the same file names.
pub(crate) async fn prepare_output_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io(format!("failed to read {}", dir.display()), e))?;
    let mut removed = 0usize;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io(format!("failed to read {}", dir.display()), e))?
    {
        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let result = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.map_err(|e| Error::io(format!("failed to remove {}", path.display()), e))?;
        removed += 1;
    }

    if removed > 0 {
        tracing::debug!(dir = %dir.display(), removed, "Cleaned output directory");
    }
    Ok(())
}
