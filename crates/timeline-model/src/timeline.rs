//! Frozen timeline snapshots handed over by the editor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clip::{Clip, ClipError};

/// An ordered list of clips. Clip-list order is the mix folding order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub clips: Vec<Clip>,
}

impl Timeline {
    pub fn new(clips: Vec<Clip>) -> Self {
        Self { clips }
    }

    /// Load a timeline snapshot from a JSON file.
    ///
    /// Accepts either `{"clips": [...]}` or a bare array of clips.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TimelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TimelineError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| TimelineError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;

        let parsed = if value.is_array() {
            serde_json::from_value(value).map(Timeline::new)
        } else {
            serde_json::from_value(value)
        };

        parsed.map_err(|e| TimelineError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Total timeline duration used for budgeting and progress.
    ///
    /// Video chunks are concatenated back to back, so the export length is
    /// the sum of video clip durations. Audio-only timelines fall back to
    /// the furthest clip end, and an empty timeline to one second.
    pub fn total_duration(&self) -> f64 {
        total_duration(&self.clips)
    }

    /// Video clips in ascending `start_time` order (stable for ties).
    pub fn video_clips(&self) -> Vec<&Clip> {
        video_clips_sorted(&self.clips)
    }

    /// Validate every clip.
    pub fn validate(&self) -> Result<(), ClipError> {
        self.clips.iter().try_for_each(Clip::validate)
    }
}

/// See [`Timeline::total_duration`].
pub fn total_duration(clips: &[Clip]) -> f64 {
    let video_sum: f64 = clips
        .iter()
        .filter(|c| c.is_video())
        .map(|c| c.duration.max(0.0))
        .sum();
    if video_sum > 0.0 {
        return video_sum;
    }

    let furthest_end = clips.iter().map(Clip::end_time).fold(0.0_f64, f64::max);
    if furthest_end > 0.0 {
        furthest_end
    } else {
        1.0
    }
}

/// Video clips sorted by `start_time`, preserving list order for ties.
pub fn video_clips_sorted(clips: &[Clip]) -> Vec<&Clip> {
    let mut video: Vec<&Clip> = clips.iter().filter(|c| c.is_video()).collect();
    video.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    video
}

/// Errors that can occur when loading a timeline snapshot.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_duration_sums_video_clips() {
        let timeline = Timeline::new(vec![
            Clip::video("a", "a.mp4", 0.0, 0.0, 4.0),
            Clip::audio("m", "m.wav", 0.0, 0.0, 30.0),
            Clip::video("b", "b.mp4", 10.0, 2.0, 6.0),
        ]);
        assert!((timeline.total_duration() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_total_duration_audio_only_uses_furthest_end() {
        let timeline = Timeline::new(vec![
            Clip::audio("a", "a.wav", 2.0, 0.0, 3.0),
            Clip::audio("b", "b.wav", 1.0, 0.0, 7.5),
        ]);
        assert!((timeline.total_duration() - 8.5).abs() < 1e-9);
    }

    #[test]
    fn test_total_duration_empty_is_one_second() {
        assert!((Timeline::default().total_duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_video_clips_sorted_by_start_time() {
        let timeline = Timeline::new(vec![
            Clip::video("late", "a.mp4", 20.0, 0.0, 1.0),
            Clip::audio("music", "m.wav", 0.0, 0.0, 30.0),
            Clip::video("early", "b.mp4", 0.0, 0.0, 1.0),
            Clip::video("tie", "c.mp4", 20.0, 0.0, 1.0),
        ]);
        let ids: Vec<&str> = timeline
            .video_clips()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["early", "late", "tie"]);
    }

    #[test]
    fn test_load_accepts_bare_array_and_object() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();

        let clip = r#"{"id":"a","type":"video","filePath":"a.mp4","startTime":0,"duration":2}"#;
        let bare = dir.join("bare.json");
        std::fs::write(&bare, format!("[{clip}]")).unwrap();
        let object = dir.join("object.json");
        std::fs::write(&object, format!("{{\"clips\":[{clip}]}}")).unwrap();

        assert_eq!(Timeline::load(&bare).unwrap().clips.len(), 1);
        assert_eq!(Timeline::load(&object).unwrap().clips.len(), 1);

        let missing = Timeline::load(dir.join("missing.json"));
        assert!(matches!(missing, Err(TimelineError::IoError { .. })));
    }
}
