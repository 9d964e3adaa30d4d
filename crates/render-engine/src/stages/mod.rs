//! Pipeline stages: master audio, video chunks, final mux.
//!
//! Stages share a [`StageContext`] and run strictly one after another; each
//! external invocation is checked against the session's cancel flag first.

pub mod audio;
pub mod mux;
pub mod video;

use std::path::Path;

use montage_common::MontageResult;

use crate::budget::RenderPlan;
use crate::events::EventSink;
use crate::process::{EncoderCommand, ProcessObserver, ProcessOutput, ProcessRunner};
use crate::session::{ExportSession, SessionObserver};

/// Everything a stage needs for one export.
pub struct StageContext<'a> {
    pub session: &'a ExportSession,
    /// Resolved encoder executable.
    pub encoder: &'a Path,
    pub scratch_dir: &'a Path,
    pub plan: &'a RenderPlan,
    pub runner: ProcessRunner,
    pub events: &'a EventSink,
}

impl StageContext<'_> {
    /// Run `cmd` unless cancelled, tracking it as the session's active process.
    pub async fn run(
        &self,
        cmd: &EncoderCommand,
        observer: &mut dyn ProcessObserver,
    ) -> MontageResult<ProcessOutput> {
        self.session.check_cancelled()?;
        let mut tracked = SessionObserver::new(self.session, observer);
        self.runner.run_observed(cmd, &mut tracked).await
    }
}
