//! Montage Render Engine
//!
//! Offline export pipeline that turns a frozen timeline into one finished
//! video file by driving an external encoder through a fixed sequence of
//! invocations.
//!
//! # Pipeline Architecture
//!
//! ```text
//! ExportRequest ──► Budget (RenderPlan)
//!                          │
//! clips ──► Audio graph ───┼──► master_audio.wav ─────────────┐
//!                          │                                   │
//! video clips ──► Chunks ──┴──► vchunk_0.mov ... vchunk_N.mov ─┤
//!   (by start time)                                            ▼
//!                                                   Concat + AAC mux
//!                                                              │
//!                                                              ▼
//!                                                         output.mp4
//! ```
//!
//! One encoder process runs at a time. Its stderr feeds the progress
//! tracker; a cancel kills it and the session guard removes the scratch
//! directory on every exit path.

pub mod audio_graph;
pub mod budget;
pub mod compositor;
pub mod events;
pub mod export;
pub mod filter;
pub mod media;
pub mod process;
pub mod progress;
pub mod session;
pub mod stages;

pub use budget::{plan_export, EncoderPreset, RenderPlan, VideoRateControl};
pub use events::{EventCallback, ExportEvent};
pub use export::{CancelHandle, ExportCoordinator};
pub use media::{
    check_tools, extract_audio_stream, generate_thumbnail, probe_media, MediaInfo, ToolReport,
    ToolStatus,
};
pub use progress::{ExportPhase, ExportProgress};
pub use session::ExportState;
