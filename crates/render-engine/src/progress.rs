//! Encoder progress parsing and export-wide progress tracking.
//!
//! The encoder prints stats lines such as
//! `frame=  240 fps= 60 q=28.0 size=    1024kB time=00:00:04.00 bitrate=...`
//! on stderr. [`parse_progress_line`] turns one line into a
//! [`ProgressSample`]; [`ProgressTracker`] maps per-chunk samples onto the
//! whole export.
//!
//! Phase bands: audio `[0, 10%)`, video `[10%, 90%)`, mux `[90%, 100%]`.

use montage_common::ExportClock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::compositor::frames_for;

/// Start of the video band.
pub const VIDEO_PHASE_START: f64 = 0.1;

/// Width of the video band.
pub const VIDEO_PHASE_SPAN: f64 = 0.8;

/// Start of the mux band.
pub const MUX_PHASE_START: f64 = VIDEO_PHASE_START + VIDEO_PHASE_SPAN;

/// Minimum video-band progress before an ETA is reported.
pub const ETA_MIN_RENDER_PROGRESS: f64 = 0.01;

/// One reading from an encoder stats line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Output time reached within the current invocation.
    pub seconds: f64,
    /// Frames emitted within the current invocation, when reported.
    pub frame: Option<u64>,
}

/// Parse a stats line. Lines without a `time=HH:MM:SS(.ff)` token yield `None`.
pub fn parse_progress_line(line: &str) -> Option<ProgressSample> {
    let seconds = parse_time_token(line)?;
    Some(ProgressSample {
        seconds,
        frame: parse_frame_token(line),
    })
}

fn parse_time_token(line: &str) -> Option<f64> {
    line.match_indices("time=")
        .find_map(|(pos, key)| parse_clock(&line[pos + key.len()..]))
}

/// `HH:MM:SS` or `HH:MM:SS.ff` at the start of `text`.
fn parse_clock(text: &str) -> Option<f64> {
    let (hours, rest) = take_digits(text)?;
    let rest = rest.strip_prefix(':')?;
    let (minutes, rest) = take_digits(rest)?;
    let rest = rest.strip_prefix(':')?;
    let (whole, rest) = take_digits(rest)?;

    let mut seconds_text = whole.to_string();
    if let Some(fraction) = rest.strip_prefix('.') {
        if let Some((digits, _)) = take_digits(fraction) {
            seconds_text.push('.');
            seconds_text.push_str(digits);
        }
    }

    let hours: f64 = hours.parse().ok()?;
    let minutes: f64 = minutes.parse().ok()?;
    let seconds: f64 = seconds_text.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn parse_frame_token(line: &str) -> Option<u64> {
    line.match_indices("frame=").find_map(|(pos, key)| {
        let rest = line[pos + key.len()..].trim_start();
        take_digits(rest).and_then(|(digits, _)| digits.parse().ok())
    })
}

/// Split a non-empty run of ASCII digits off the front of `text`.
fn take_digits(text: &str) -> Option<(&str, &str)> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if end == 0 {
        None
    } else {
        Some(text.split_at(end))
    }
}

/// Which part of the pipeline a progress report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    Audio,
    Video,
    Muxing,
    Complete,
}

impl ExportPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Muxing => "muxing",
            Self::Complete => "complete",
        }
    }
}

/// Export-wide progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    /// Overall progress in `[0, 1]`.
    pub percent: f64,
    pub current_seconds: f64,
    pub total_seconds: f64,
    pub current_frame: u64,
    pub total_frames: u64,
    /// Remaining seconds, once the estimate is meaningful.
    #[serde(rename = "etaSeconds")]
    pub eta_secs: Option<u64>,
    pub phase: ExportPhase,
}

/// Accumulates chunk progress into export-wide reports.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_seconds: f64,
    fps: f64,
    total_frames: u64,
    processed_seconds: f64,
    processed_frames: u64,
    chunk_duration: f64,
    video_clock: Option<ExportClock>,
}

impl ProgressTracker {
    pub fn new(total_seconds: f64, fps: f64) -> Self {
        Self {
            total_seconds,
            fps,
            total_frames: frames_for(total_seconds, fps),
            processed_seconds: 0.0,
            processed_frames: 0,
            chunk_duration: 0.0,
            video_clock: None,
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn processed_seconds(&self) -> f64 {
        self.processed_seconds
    }

    pub fn processed_frames(&self) -> u64 {
        self.processed_frames
    }

    /// Start the ETA clock. Called once, when the first chunk starts.
    pub fn begin_video(&mut self) {
        if self.video_clock.is_none() {
            let clock = ExportClock::start();
            info!(
                started_at = clock.epoch_wall(),
                total_seconds = self.total_seconds,
                total_frames = self.total_frames,
                "Video rendering started"
            );
            self.video_clock = Some(clock);
        }
    }

    /// Wall-clock time (RFC 3339) the video phase started, once it has.
    pub fn video_started_at(&self) -> Option<&str> {
        self.video_clock.as_ref().map(ExportClock::epoch_wall)
    }

    pub fn begin_chunk(&mut self, duration: f64) {
        self.begin_video();
        self.chunk_duration = duration;
    }

    /// Account a finished chunk.
    pub fn finish_chunk(&mut self) {
        self.processed_seconds += self.chunk_duration;
        self.processed_frames += frames_for(self.chunk_duration, self.fps);
        self.chunk_duration = 0.0;
    }

    /// Report for a sample of the running chunk.
    pub fn observe(&self, sample: ProgressSample) -> ExportProgress {
        let elapsed = self
            .video_clock
            .as_ref()
            .map_or(0.0, ExportClock::elapsed_secs);
        self.observe_with_elapsed(sample, elapsed)
    }

    /// Same as [`observe`](Self::observe) with an explicit elapsed video time.
    pub fn observe_with_elapsed(&self, sample: ProgressSample, elapsed_secs: f64) -> ExportProgress {
        let done = self.processed_seconds + sample.seconds.min(self.chunk_duration);
        let percent = VIDEO_PHASE_START + (done / self.total_seconds) * VIDEO_PHASE_SPAN;
        let current_frame = match sample.frame {
            Some(frame) => {
                self.processed_frames + frame.min(frames_for(self.chunk_duration, self.fps))
            }
            None => {
                let estimate = (done * self.fps).floor();
                if estimate > 0.0 {
                    estimate as u64
                } else {
                    0
                }
            }
        };

        ExportProgress {
            percent,
            current_seconds: done,
            total_seconds: self.total_seconds,
            current_frame,
            total_frames: self.total_frames,
            eta_secs: estimate_eta(percent, elapsed_secs),
            phase: ExportPhase::Video,
        }
    }

    /// Report at a phase boundary.
    pub fn boundary(&self, phase: ExportPhase) -> ExportProgress {
        let (percent, current_seconds, current_frame) = match phase {
            ExportPhase::Audio => (0.0, 0.0, 0),
            ExportPhase::Video => (VIDEO_PHASE_START, 0.0, 0),
            ExportPhase::Muxing => (MUX_PHASE_START, self.total_seconds, self.total_frames),
            ExportPhase::Complete => (1.0, self.total_seconds, self.total_frames),
        };
        ExportProgress {
            percent,
            current_seconds,
            total_seconds: self.total_seconds,
            current_frame,
            total_frames: self.total_frames,
            eta_secs: None,
            phase,
        }
    }
}

/// Linear remaining-time estimate from progress within the video band.
pub fn estimate_eta(percent: f64, elapsed_secs: f64) -> Option<u64> {
    if !(percent > VIDEO_PHASE_START && percent < 1.0) {
        return None;
    }
    let render_progress = (percent - VIDEO_PHASE_START) / VIDEO_PHASE_SPAN;
    if render_progress <= ETA_MIN_RENDER_PROGRESS {
        return None;
    }
    let remaining = (elapsed_secs / render_progress - elapsed_secs).ceil();
    Some(if remaining > 0.0 { remaining as u64 } else { 0 })
}
