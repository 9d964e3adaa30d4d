//! Export session state shared between the coordinator and cancel callers.
//!
//! At most one export is in flight per [`ExportSession`]. Starting one
//! returns a [`SessionGuard`] that owns the scratch directory; dropping the
//! guard is the single cleanup path for every outcome.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use montage_common::{MontageError, MontageResult};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::process::ProcessObserver;

/// Prefix of per-export scratch directories.
pub const SCRATCH_PREFIX: &str = "export-build-";

/// Pipeline position of the current (or last) export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ExportState {
    #[default]
    Idle,
    Planning,
    AudioRendering,
    VideoRendering {
        index: usize,
    },
    Muxing,
    Complete,
    Cancelled,
    Failed,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }
}

/// The process currently doing work for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveProcess {
    pub label: String,
    pub pid: Option<u32>,
}

/// Single-export session: in-flight flag, cancel signal, active process.
#[derive(Debug)]
pub struct ExportSession {
    in_flight: AtomicBool,
    cancelled: AtomicBool,
    cancel_tx: watch::Sender<bool>,
    active: Mutex<Option<ActiveProcess>>,
    state: Mutex<ExportState>,
}

impl Default for ExportSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportSession {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            in_flight: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            cancel_tx,
            active: Mutex::new(None),
            state: Mutex::new(ExportState::Idle),
        }
    }

    /// Accept a new export and create its scratch directory under
    /// `scratch_parent`. Refused while another export is in flight.
    pub fn begin(self: &Arc<Self>, scratch_parent: &Path) -> MontageResult<SessionGuard> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(MontageError::invalid_request(
                "an export is already in progress",
            ));
        }
        self.cancelled.store(false, Ordering::SeqCst);
        self.cancel_tx.send_replace(false);
        *lock(&self.state) = ExportState::Idle;

        let scratch = std::fs::create_dir_all(scratch_parent).and_then(|_| {
            tempfile::Builder::new()
                .prefix(SCRATCH_PREFIX)
                .tempdir_in(scratch_parent)
        });
        let scratch = match scratch {
            Ok(dir) => dir,
            Err(err) => {
                self.in_flight.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };

        let scratch_path = scratch.path().to_path_buf();
        debug!(scratch = %scratch_path.display(), "Export session started");
        Ok(SessionGuard {
            session: Arc::clone(self),
            scratch: Some(scratch),
            scratch_path,
        })
    }

    /// Request cancellation of the in-flight export.
    ///
    /// Idempotent and non-blocking: the running process is killed by its
    /// runner, and the coordinator unwinds through cleanup.
    pub fn cancel(&self) {
        if !self.in_flight.load(Ordering::SeqCst) {
            debug!("Cancel requested with no export in flight");
            return;
        }
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_tx.send_replace(true);
        info!(active = ?self.active_process(), "Export cancellation requested");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check_cancelled(&self) -> MontageResult<()> {
        if self.is_cancelled() {
            Err(MontageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Receiver that flips to `true` on cancellation.
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    pub fn active_process(&self) -> Option<ActiveProcess> {
        lock(&self.active).clone()
    }

    pub fn state(&self) -> ExportState {
        *lock(&self.state)
    }

    pub(crate) fn transition(&self, next: ExportState) {
        let mut state = lock(&self.state);
        let previous = *state;
        *state = next;
        info!(from = ?previous, to = ?next, "Export state changed");
    }

    fn set_active(&self, label: &str, pid: Option<u32>) {
        *lock(&self.active) = Some(ActiveProcess {
            label: label.to_string(),
            pid,
        });
    }

    fn clear_active(&self) {
        lock(&self.active).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live export. Dropping it removes the scratch directory and resets the
/// session so a new export can start.
#[derive(Debug)]
pub struct SessionGuard {
    session: Arc<ExportSession>,
    scratch: Option<TempDir>,
    scratch_path: PathBuf,
}

impl SessionGuard {
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_path
    }

    pub fn session(&self) -> &ExportSession {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.scratch.take() {
            match dir.close() {
                Ok(()) => debug!(scratch = %self.scratch_path.display(), "Removed scratch directory"),
                Err(err) => warn!(
                    scratch = %self.scratch_path.display(),
                    error = %err,
                    "Failed to remove scratch directory"
                ),
            }
        }
        let session = &self.session;
        session.clear_active();
        session.cancelled.store(false, Ordering::SeqCst);
        session.cancel_tx.send_replace(false);
        session.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Records the running process on the session around an inner observer.
pub struct SessionObserver<'a> {
    session: &'a ExportSession,
    inner: &'a mut dyn ProcessObserver,
}

impl<'a> SessionObserver<'a> {
    pub fn new(session: &'a ExportSession, inner: &'a mut dyn ProcessObserver) -> Self {
        Self { session, inner }
    }
}

impl ProcessObserver for SessionObserver<'_> {
    fn spawned(&mut self, label: &str, pid: Option<u32>) {
        self.session.set_active(label, pid);
        self.inner.spawned(label, pid);
    }

    fn stderr_line(&mut self, line: &str) {
        self.inner.stderr_line(line);
    }

    fn exited(&mut self, label: &str) {
        self.session.clear_active();
        self.inner.exited(label);
    }
}
