//! Per-clip video chunk composition.
//!
//! Each video clip is rendered on its own into a chunk of exactly the
//! output geometry and frame rate: the clip is fitted inside the frame
//! (letterboxed or pillarboxed on black) and faded like its audio. Chunks
//! share codec parameters so they can be concatenated without re-encoding.

use std::path::PathBuf;

use montage_timeline_model::{Clip, ExportRequest, OutputGeometry};

use crate::filter::{Filter, FilterChain, FilterGraph};

/// How far before the in point the input seek lands, so decoding starts on
/// a keyframe ahead of the first kept frame.
pub const SEEK_PREROLL_SECS: f64 = 1.0;

/// Extra source read past the trimmed range.
pub const READ_TAIL_SECS: f64 = 5.0;

/// Output pad of a chunk graph.
pub const CHUNK_OUTPUT_LABEL: &str = "vOut";

/// Render instructions for one video chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkComposition {
    /// Position in timeline order.
    pub index: usize,
    pub clip_id: String,
    pub source: PathBuf,
    /// Input seek applied before decoding.
    pub seek_start: f64,
    /// In-point relative to the seek position.
    pub trim_start: f64,
    /// Chunk length (the clip duration).
    pub duration: f64,
    /// Amount of source read after seeking.
    pub read_duration: f64,
    pub fade_in: f64,
    pub fade_out: f64,
    pub geometry: OutputGeometry,
}

impl ChunkComposition {
    pub fn from_clip(index: usize, clip: &Clip, geometry: OutputGeometry) -> Self {
        let seek_start = (clip.in_point - SEEK_PREROLL_SECS).max(0.0);
        let trim_start = clip.in_point - seek_start;
        Self {
            index,
            clip_id: clip.id.clone(),
            source: clip.file_path.clone(),
            seek_start,
            trim_start,
            duration: clip.duration,
            read_duration: clip.duration + trim_start + READ_TAIL_SECS,
            fade_in: clip.fade_in,
            fade_out: clip.fade_out,
            geometry,
        }
    }

    /// Chunk file name inside the scratch directory.
    pub fn file_name(&self) -> String {
        format!("vchunk_{}.mov", self.index)
    }

    /// Frames this chunk contributes at the output frame rate.
    pub fn frame_count(&self) -> u64 {
        frames_for(self.duration, self.geometry.fps)
    }

    /// Trim, fit, pad and fade graph producing `[vOut]`.
    pub fn filter_graph(&self) -> FilterGraph {
        let OutputGeometry { width, height, fps } = self.geometry;
        let duration = self.duration;

        let mut graph = FilterGraph::new();
        graph.push(
            FilterChain::new()
                .input("0:v")
                .filter(
                    Filter::new("trim")
                        .arg("start", self.trim_start)
                        .arg("end", self.trim_start + duration),
                )
                .filter(Filter::new("setpts").positional("PTS-STARTPTS"))
                .filter(
                    Filter::new("scale")
                        .positional(width)
                        .positional(height)
                        .arg("force_original_aspect_ratio", "decrease"),
                )
                .filter(Filter::new("setsar").positional(1))
                .filter(Filter::new("format").positional("yuv420p"))
                .filter(Filter::new("fps").positional(fps))
                .output("vSrc"),
        );
        graph.push(
            FilterChain::new()
                .filter(
                    Filter::new("color")
                        .arg("c", "black")
                        .arg("s", format!("{width}x{height}"))
                        .arg("r", fps)
                        .arg("d", duration),
                )
                .output("vBg"),
        );
        graph.push(
            FilterChain::new()
                .input("vBg")
                .input("vSrc")
                .filter(
                    Filter::new("overlay")
                        .positional("(W-w)/2")
                        .positional("(H-h)/2")
                        .arg("shortest", 0)
                        .arg("eof_action", "repeat"),
                )
                .filter_if(self.fade_in > 0.0, || {
                    Filter::new("fade")
                        .arg("t", "in")
                        .arg("st", 0)
                        .arg("d", self.fade_in)
                })
                .filter_if(self.fade_out > 0.0, || {
                    Filter::new("fade")
                        .arg("t", "out")
                        .arg("st", duration - self.fade_out)
                        .arg("d", self.fade_out)
                })
                .output(CHUNK_OUTPUT_LABEL),
        );
        graph
    }
}

/// One composition per video clip, in ascending start-time order.
pub fn compose_chunks(request: &ExportRequest) -> Vec<ChunkComposition> {
    let geometry = request.geometry();
    request
        .video_clips()
        .into_iter()
        .enumerate()
        .map(|(index, clip)| ChunkComposition::from_clip(index, clip, geometry))
        .collect()
}

/// `ceil(seconds * fps)`, never negative.
pub fn frames_for(seconds: f64, fps: f64) -> u64 {
    let frames = (seconds * fps).ceil();
    if frames.is_finite() && frames > 0.0 {
        frames as u64
    } else {
        0
    }
}
