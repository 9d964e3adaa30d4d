//! Clip and audio-track records.
//!
//! A clip is one placed segment of a source file on the timeline. Field
//! names follow the editor's camelCase snapshot format so a timeline can be
//! handed over without translation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Slack allowed when comparing second-valued fields that were produced by
/// floating-point editing operations (trim, split, snap).
const TIME_EPSILON: f64 = 1e-6;

/// Upper bound of the linear gain domain.
pub const MAX_TRACK_VOLUME: f64 = 2.0;

/// What a clip contributes to the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipKind {
    /// Contributes audio tracks only.
    Audio,
    /// Contributes a video chunk and its audio tracks. Any type the
    /// editor sends other than `audio` lands here.
    #[default]
    #[serde(other)]
    Video,
}

/// One mixable audio stream belonging to a clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    /// Audio stream index within the source file (`a:N` selector).
    #[serde(default)]
    pub audio_order: u32,

    /// Whether the track takes part in the mix.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Linear gain in `[0, 2]`.
    #[serde(default = "default_volume")]
    pub volume: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_volume() -> f64 {
    1.0
}

impl AudioTrack {
    /// An enabled track at unity gain.
    pub fn new(audio_order: u32) -> Self {
        Self {
            audio_order,
            enabled: true,
            volume: 1.0,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A placed media segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    /// Opaque unique token assigned by the editor.
    pub id: String,

    /// Video or audio clip.
    #[serde(rename = "type", alias = "kind", default)]
    pub kind: ClipKind,

    /// Source media location.
    pub file_path: PathBuf,

    /// Position on the timeline (seconds).
    pub start_time: f64,

    /// Offset into the source where the clip begins (seconds).
    #[serde(default)]
    pub in_point: f64,

    /// Length on the timeline (seconds).
    pub duration: f64,

    /// Full length of the source (seconds). `0` means unknown.
    #[serde(default)]
    pub source_duration: f64,

    /// Source frame rate, video clips only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,

    /// Linear fade-in length (seconds).
    #[serde(default)]
    pub fade_in: f64,

    /// Linear fade-out length (seconds).
    #[serde(default)]
    pub fade_out: f64,

    /// Ordered audio streams mixed from this clip.
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,
}

impl Clip {
    /// A video clip covering `[in_point, in_point + duration)` of its source,
    /// placed at `start_time`, with a single enabled audio track.
    pub fn video(
        id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        start_time: f64,
        in_point: f64,
        duration: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ClipKind::Video,
            file_path: file_path.into(),
            start_time,
            in_point,
            duration,
            source_duration: in_point + duration,
            fps: Some(30.0),
            fade_in: 0.0,
            fade_out: 0.0,
            audio_tracks: vec![AudioTrack::new(0)],
        }
    }

    /// An audio-only clip with a single enabled track.
    pub fn audio(
        id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        start_time: f64,
        in_point: f64,
        duration: f64,
    ) -> Self {
        Self {
            kind: ClipKind::Audio,
            fps: None,
            ..Self::video(id, file_path, start_time, in_point, duration)
        }
    }

    pub fn with_fades(mut self, fade_in: f64, fade_out: f64) -> Self {
        self.fade_in = fade_in;
        self.fade_out = fade_out;
        self
    }

    pub fn with_audio_tracks(mut self, tracks: Vec<AudioTrack>) -> Self {
        self.audio_tracks = tracks;
        self
    }

    pub fn is_video(&self) -> bool {
        self.kind == ClipKind::Video
    }

    /// Timeline position where the clip ends.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Source position where the clip ends.
    pub fn out_point(&self) -> f64 {
        self.in_point + self.duration
    }

    /// Audio tracks that take part in the mix, in list order.
    pub fn enabled_tracks(&self) -> impl Iterator<Item = &AudioTrack> {
        self.audio_tracks.iter().filter(|t| t.enabled)
    }

    /// Check the clip's data-model invariants.
    pub fn validate(&self) -> Result<(), ClipError> {
        let err = |reason: String| ClipError {
            id: self.id.clone(),
            reason,
        };

        let finite = [
            self.start_time,
            self.in_point,
            self.duration,
            self.source_duration,
            self.fade_in,
            self.fade_out,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(err("timing fields must be finite numbers".to_string()));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(err("file path is empty".to_string()));
        }
        if self.duration <= 0.0 {
            return Err(err(format!("duration must be > 0 (got {})", self.duration)));
        }
        if self.start_time < 0.0 || self.in_point < 0.0 {
            return Err(err("start time and in point must be >= 0".to_string()));
        }
        if self.source_duration > 0.0 && self.out_point() > self.source_duration + TIME_EPSILON {
            return Err(err(format!(
                "in point {} + duration {} exceeds source duration {}",
                self.in_point, self.duration, self.source_duration
            )));
        }
        if self.fade_in < 0.0 || self.fade_out < 0.0 {
            return Err(err("fades must be >= 0".to_string()));
        }
        if self.fade_in + self.fade_out > self.duration + TIME_EPSILON {
            return Err(err(format!(
                "fade in {} + fade out {} exceeds duration {}",
                self.fade_in, self.fade_out, self.duration
            )));
        }
        if let Some(fps) = self.fps {
            if self.is_video() && !(fps.is_finite() && fps > 0.0) {
                return Err(err(format!("fps must be > 0 (got {fps})")));
            }
        }
        for (idx, track) in self.audio_tracks.iter().enumerate() {
            if !(0.0..=MAX_TRACK_VOLUME).contains(&track.volume) {
                return Err(err(format!(
                    "audio track {idx} volume {} is outside [0, {MAX_TRACK_VOLUME}]",
                    track.volume
                )));
            }
        }
        Ok(())
    }
}

/// A clip that violates the data model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("clip {id}: {reason}")]
pub struct ClipError {
    pub id: String,
    pub reason: String,
}
