//! Error types shared across Montage crates.

use std::path::PathBuf;

/// Top-level error type for Montage operations.
///
/// The export-facing variants mirror the failure taxonomy reported to the
/// editor: every one of them has a stable [`code`](MontageError::code).
#[derive(Debug, thiserror::Error)]
pub enum MontageError {
    #[error("{tool} is not available: {message}")]
    ToolUnavailable { tool: String, message: String },

    #[error("Invalid export request: {message}")]
    InvalidRequest { message: String },

    #[error("Audio render failed: {message}")]
    AudioRenderFailed {
        message: String,
        diagnostics: Option<String>,
    },

    #[error("Video chunk {index} failed to render: {message}")]
    ChunkRenderFailed {
        index: usize,
        message: String,
        diagnostics: Option<String>,
    },

    #[error("Mux failed: {message}")]
    MuxFailed {
        message: String,
        diagnostics: Option<String>,
    },

    #[error("Export cancelled")]
    Cancelled,

    #[error("{program} timed out after {secs:.1}s and was killed")]
    Timeout { program: String, secs: f64 },

    #[error("{message}")]
    Unknown {
        message: String,
        exit_code: Option<i32>,
        diagnostics: Option<String>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias using MontageError.
pub type MontageResult<T> = Result<T, MontageError>;

impl MontageError {
    pub fn tool_unavailable(tool: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown {
            message: msg.into(),
            exit_code: None,
            diagnostics: None,
        }
    }

    /// Stable machine-readable code for the error event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolUnavailable { .. } => "tool_unavailable",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::AudioRenderFailed { .. } => "audio_render_failed",
            Self::ChunkRenderFailed { .. } => "chunk_render_failed",
            Self::MuxFailed { .. } => "mux_failed",
            Self::Cancelled => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::Config { .. } => "config",
            Self::Unknown { .. }
            | Self::FileNotFound { .. }
            | Self::Io(_)
            | Self::Json(_) => "unknown",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Diagnostic text captured from the failed process, if any.
    ///
    /// This is meant for logs; user-facing messages use `Display`.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::AudioRenderFailed { diagnostics, .. }
            | Self::ChunkRenderFailed { diagnostics, .. }
            | Self::MuxFailed { diagnostics, .. }
            | Self::Unknown { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }

    /// Re-label a generic process failure as a failure of a specific
    /// pipeline stage. Cancellation, timeouts and missing tools pass through.
    pub fn into_stage_failure(self, stage: impl FnOnce(String, Option<String>) -> Self) -> Self {
        match self {
            Self::Unknown {
                message,
                diagnostics,
                ..
            } => stage(message, diagnostics),
            Self::Io(err) => stage(err.to_string(), None),
            other => other,
        }
    }
}
