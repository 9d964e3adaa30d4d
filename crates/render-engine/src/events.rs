//! Events reported to whoever started an export.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::progress::ExportProgress;

/// Outcome and progress notifications for one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExportEvent {
    Progress(ExportProgress),
    Complete {
        #[serde(rename = "outPath")]
        out_path: PathBuf,
    },
    /// Terminal failure. `code` is [`MontageError::code`](montage_common::MontageError::code).
    Error { code: String, message: String },
    /// The export was cancelled on request; not an error.
    Cancelled,
}

/// Event callback. Invoked inline from the pipeline, so it must not block.
pub type EventCallback = Arc<dyn Fn(ExportEvent) + Send + Sync>;

/// Fire-and-forget event delivery; a missing callback drops events.
#[derive(Clone, Default)]
pub struct EventSink {
    callback: Option<EventCallback>,
}

impl EventSink {
    pub fn new(callback: Option<EventCallback>) -> Self {
        Self { callback }
    }

    pub fn emit(&self, event: ExportEvent) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    pub fn progress(&self, progress: ExportProgress) {
        self.emit(ExportEvent::Progress(progress));
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
