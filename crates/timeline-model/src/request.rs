//! Export requests: what to render and at which quality/size.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::clip::{Clip, ClipError};
use crate::timeline::{total_duration, video_clips_sorted};

/// Highest CRF value the H.264 encoder accepts.
pub const MAX_CRF: u8 = 51;

/// Named quality presets offered by the export dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Normal,
    Smooth,
    Hq,
    Discord,
    #[default]
    Custom,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Smooth => "smooth",
            Self::Hq => "hq",
            Self::Discord => "discord",
            Self::Custom => "custom",
        }
    }

    /// Output geometry the dialog pairs with each preset.
    pub fn default_geometry(self) -> OutputGeometry {
        match self {
            Self::Normal | Self::Custom => OutputGeometry::new(1920, 1080, 60.0),
            Self::Smooth => OutputGeometry::new(1920, 1080, 120.0),
            Self::Hq => OutputGeometry::new(2560, 1440, 120.0),
            Self::Discord => OutputGeometry::new(1280, 720, 30.0),
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "smooth" => Ok(Self::Smooth),
            "hq" => Ok(Self::Hq),
            "discord" => Ok(Self::Discord),
            "custom" => Ok(Self::Custom),
            other => Err(format!(
                "unknown preset '{other}' (expected normal, smooth, hq, discord, custom)"
            )),
        }
    }
}

/// Output frame geometry. The frame rate may be fractional (`29.97`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputGeometry {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl OutputGeometry {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self { width, height, fps }
    }
}

/// Immutable input to one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    /// Timeline snapshot, in clip-list order.
    pub clips: Vec<Clip>,

    /// Final output file.
    pub out_path: PathBuf,

    pub width: u32,
    pub height: u32,
    pub fps: f64,

    #[serde(default)]
    pub preset: Preset,

    /// Target output size; `> 0` activates size-budget mode. The dialog
    /// derives it from a free-form MB field, so fractional byte counts are
    /// accepted and floored.
    #[serde(
        default,
        deserialize_with = "deserialize_byte_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_size_bytes: Option<u64>,

    /// Constant-quality factor; ignored when size-budget mode is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<u8>,
}

impl ExportRequest {
    /// A request using the preset's default geometry.
    pub fn new(clips: Vec<Clip>, out_path: impl Into<PathBuf>, preset: Preset) -> Self {
        let geometry = preset.default_geometry();
        Self {
            clips,
            out_path: out_path.into(),
            width: geometry.width,
            height: geometry.height,
            fps: geometry.fps,
            preset,
            target_size_bytes: None,
            crf: None,
        }
    }

    pub fn with_geometry(mut self, geometry: OutputGeometry) -> Self {
        self.width = geometry.width;
        self.height = geometry.height;
        self.fps = geometry.fps;
        self
    }

    pub fn with_target_size(mut self, bytes: u64) -> Self {
        self.target_size_bytes = Some(bytes);
        self
    }

    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = Some(crf);
        self
    }

    pub fn geometry(&self) -> OutputGeometry {
        OutputGeometry::new(self.width, self.height, self.fps)
    }

    pub fn total_duration(&self) -> f64 {
        total_duration(&self.clips)
    }

    pub fn video_clips(&self) -> Vec<&Clip> {
        video_clips_sorted(&self.clips)
    }

    /// Check the request before any work is scheduled.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.clips.is_empty() {
            return Err(RequestError::NoClips);
        }
        if self.out_path.as_os_str().is_empty() {
            return Err(RequestError::NoOutput);
        }
        if self.width == 0 || self.height == 0 || !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(RequestError::BadGeometry {
                width: self.width,
                height: self.height,
                fps: self.fps,
            });
        }
        if let Some(crf) = self.crf {
            if crf > MAX_CRF {
                return Err(RequestError::BadCrf(crf));
            }
        }
        for clip in &self.clips {
            clip.validate()?;
        }
        Ok(())
    }
}

fn deserialize_byte_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let bytes = Option::<f64>::deserialize(deserializer)?;
    Ok(bytes
        .filter(|b| b.is_finite() && *b >= 1.0)
        .map(|b| b.floor() as u64))
}

/// Reasons an export request is refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("no clips to export")]
    NoClips,

    #[error("no output path")]
    NoOutput,

    #[error("output geometry {width}x{height}@{fps} must be non-zero")]
    BadGeometry { width: u32, height: u32, fps: f64 },

    #[error("crf {0} is outside 0..={MAX_CRF}")]
    BadCrf(u8),

    #[error(transparent)]
    InvalidClip(#[from] ClipError),
}
