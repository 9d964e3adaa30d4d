//! Export coordination.
//!
//! [`ExportCoordinator::start_export`] drives one request through
//! planning, the master-audio render, one chunk render per video clip and
//! the final mux, reporting progress and the outcome as [`ExportEvent`]s.
//! [`ExportCoordinator::cancel`] may be called from anywhere at any time.

use std::path::PathBuf;
use std::sync::Arc;

use montage_common::{AppConfig, MontageError, MontageResult};
use montage_timeline_model::ExportRequest;
use tracing::{error, info};

use crate::budget::plan_export;
use crate::compositor::compose_chunks;
use crate::events::{EventCallback, EventSink, ExportEvent};
use crate::media::ensure_encoder;
use crate::process::ProcessRunner;
use crate::progress::{ExportPhase, ProgressTracker};
use crate::session::{ExportSession, ExportState, SessionGuard};
use crate::stages::{audio, mux, video, StageContext};

/// Cloneable handle that cancels the coordinator's in-flight export.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    session: Arc<ExportSession>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.session.cancel();
    }
}

/// Runs exports one at a time.
#[derive(Debug)]
pub struct ExportCoordinator {
    config: AppConfig,
    session: Arc<ExportSession>,
}

impl ExportCoordinator {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            session: Arc::new(ExportSession::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<ExportSession> {
        &self.session
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            session: Arc::clone(&self.session),
        }
    }

    /// Fire-and-forget cancellation of the in-flight export.
    pub fn cancel(&self) {
        self.session.cancel();
    }

    /// Run `request` to completion.
    ///
    /// Resolves with the output path, or with the error that ended the
    /// export. Exactly one terminal event (`Complete`, `Error` or
    /// `Cancelled`) is emitted, after the scratch directory is gone.
    pub async fn start_export(
        &self,
        request: ExportRequest,
        events: Option<EventCallback>,
    ) -> MontageResult<PathBuf> {
        let sink = EventSink::new(events);
        info!(
            output = %request.out_path.display(),
            clips = request.clips.len(),
            preset = request.preset.as_str(),
            "Starting export"
        );

        let guard = match self.session.begin(&self.config.scratch_parent()) {
            Ok(guard) => guard,
            Err(err) => {
                sink.emit(ExportEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let result = self.run_pipeline(&request, &guard, &sink).await;
        let result = match result {
            Err(err) if !err.is_cancelled() && self.session.is_cancelled() => {
                Err(MontageError::Cancelled)
            }
            other => other,
        };

        match &result {
            Ok(path) => {
                self.session.transition(ExportState::Complete);
                drop(guard);
                info!(output = %path.display(), "Export finished");
                sink.emit(ExportEvent::Complete {
                    out_path: path.clone(),
                });
            }
            Err(MontageError::Cancelled) => {
                self.session.transition(ExportState::Cancelled);
                drop(guard);
                info!("Export cancelled");
                sink.emit(ExportEvent::Cancelled);
            }
            Err(err) => {
                self.session.transition(ExportState::Failed);
                drop(guard);
                error!(
                    code = err.code(),
                    error = %err,
                    diagnostics = err.diagnostics().unwrap_or(""),
                    "Export failed"
                );
                sink.emit(ExportEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
            }
        }
        result
    }

    async fn run_pipeline(
        &self,
        request: &ExportRequest,
        guard: &SessionGuard,
        sink: &EventSink,
    ) -> MontageResult<PathBuf> {
        let session = guard.session();
        session.transition(ExportState::Planning);

        request
            .validate()
            .map_err(|e| MontageError::invalid_request(e.to_string()))?;
        let chunks = compose_chunks(request);
        if chunks.is_empty() {
            return Err(MontageError::invalid_request(
                "timeline has no video clips to render",
            ));
        }

        let encoder = ensure_encoder(&self.config.encoder).await?;
        session.check_cancelled()?;

        let total_duration = request.total_duration();
        let plan = plan_export(request);
        info!(
            total_duration,
            chunks = chunks.len(),
            video = ?plan.video,
            audio_bitrate = plan.audio_bitrate_bits,
            encoder_preset = plan.encoder_preset.as_str(),
            target_size_bytes = plan.target_size_bytes,
            "Export planned"
        );

        let ctx = StageContext {
            session,
            encoder: &encoder,
            scratch_dir: guard.scratch_dir(),
            plan: &plan,
            runner: ProcessRunner::new()
                .with_cancel(session.cancel_receiver())
                .with_optional_timeout(self.config.encoder.export_timeout()),
            events: sink,
        };
        let mut tracker = ProgressTracker::new(total_duration, request.fps);

        session.transition(ExportState::AudioRendering);
        sink.progress(tracker.boundary(ExportPhase::Audio));
        let master_audio = audio::render_master_audio(&ctx, &request.clips, total_duration).await?;

        sink.progress(tracker.boundary(ExportPhase::Video));
        for chunk in &chunks {
            session.transition(ExportState::VideoRendering { index: chunk.index });
            video::render_chunk(&ctx, chunk, &mut tracker).await?;
        }

        session.transition(ExportState::Muxing);
        sink.progress(tracker.boundary(ExportPhase::Muxing));
        let out_path = mux::mux(&ctx, &chunks, &master_audio, &request.out_path).await?;

        sink.progress(tracker.boundary(ExportPhase::Complete));
        Ok(out_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use montage_timeline_model::{Clip, Preset};
    use std::sync::Mutex;

    fn recording_callback() -> (EventCallback, Arc<Mutex<Vec<ExportEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let cb: EventCallback = Arc::new(move |event| seen_cb.lock().unwrap().push(event));
        (cb, seen)
    }

    fn config_in(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            scratch_root: Some(dir.to_path_buf()),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_any_work() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = ExportCoordinator::new(config_in(root.path()));
        let (cb, seen) = recording_callback();

        let request = ExportRequest::new(vec![], root.path().join("out.mp4"), Preset::Normal);
        let err = coordinator.start_export(request, Some(cb)).await.unwrap_err();
        assert_eq!(err.code(), "invalid_request");

        let seen = seen.lock().unwrap();
        assert!(matches!(
            seen.last(),
            Some(ExportEvent::Error { code, .. }) if code == "invalid_request"
        ));
        assert_eq!(coordinator.session().state(), ExportState::Failed);
        assert!(!coordinator.session().is_in_flight());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_audio_only_timeline_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = ExportCoordinator::new(config_in(root.path()));
        let request = ExportRequest::new(
            vec![Clip::audio("m", "m.wav", 0.0, 0.0, 3.0)],
            root.path().join("out.mp4"),
            Preset::Normal,
        );
        let err = coordinator.start_export(request, None).await.unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_missing_encoder_is_tool_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config_in(root.path());
        config.encoder.ffmpeg_path = PathBuf::from("/nonexistent/montage-ffmpeg");
        let coordinator = ExportCoordinator::new(config);

        let request = ExportRequest::new(
            vec![Clip::video("a", "a.mp4", 0.0, 0.0, 2.0)],
            root.path().join("out.mp4"),
            Preset::Normal,
        );
        let err = coordinator.start_export(request, None).await.unwrap_err();
        assert_eq!(err.code(), "tool_unavailable");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cancel_without_export_is_noop() {
        let coordinator = ExportCoordinator::new(AppConfig::default());
        coordinator.cancel();
        coordinator.cancel_handle().cancel();
        assert!(!coordinator.session().is_cancelled());
        assert_eq!(coordinator.session().state(), ExportState::Idle);
    }
}
