//! Video chunks: one silent, normalized H.264 chunk per video clip.

use std::path::{Path, PathBuf};

use montage_common::{MontageError, MontageResult};
use tracing::info;

use super::StageContext;
use crate::budget::RenderPlan;
use crate::compositor::{ChunkComposition, CHUNK_OUTPUT_LABEL};
use crate::events::EventSink;
use crate::process::{EncoderCommand, ProcessObserver};
use crate::progress::{parse_progress_line, ProgressTracker};

pub const VIDEO_CODEC: &str = "libx264";
pub const PIXEL_FORMAT: &str = "yuv420p";

/// Encoder invocation for one chunk.
pub fn chunk_command(
    encoder: &Path,
    chunk: &ChunkComposition,
    plan: &RenderPlan,
    out_path: &Path,
) -> EncoderCommand {
    EncoderCommand::new(encoder, format!("chunk {}", chunk.index))
        .arg("-y")
        .arg("-ss")
        .arg(chunk.seek_start.to_string())
        .arg("-i")
        .arg(&chunk.source)
        .arg("-t")
        .arg(chunk.read_duration.to_string())
        .arg("-filter_complex")
        .arg(chunk.filter_graph().render())
        .arg("-map")
        .arg(format!("[{CHUNK_OUTPUT_LABEL}]"))
        .arg("-an")
        .args(["-c:v", VIDEO_CODEC, "-pix_fmt", PIXEL_FORMAT, "-preset"])
        .arg(plan.encoder_preset.as_str())
        .args(plan.video_rate_args())
        .arg(out_path)
}

/// Turns chunk stderr into export-wide progress events.
struct ChunkProgress<'a> {
    tracker: &'a ProgressTracker,
    events: &'a EventSink,
}

impl ProcessObserver for ChunkProgress<'_> {
    fn stderr_line(&mut self, line: &str) {
        if let Some(sample) = parse_progress_line(line) {
            self.events.progress(self.tracker.observe(sample));
        }
    }
}

/// Render `chunk` into the scratch directory.
pub async fn render_chunk(
    ctx: &StageContext<'_>,
    chunk: &ChunkComposition,
    tracker: &mut ProgressTracker,
) -> MontageResult<PathBuf> {
    let out_path = ctx.scratch_dir.join(chunk.file_name());
    let cmd = chunk_command(ctx.encoder, chunk, ctx.plan, &out_path);
    info!(
        index = chunk.index,
        clip = %chunk.clip_id,
        source = %chunk.source.display(),
        duration = chunk.duration,
        "Rendering video chunk"
    );

    tracker.begin_chunk(chunk.duration);
    let mut observer = ChunkProgress {
        tracker: &*tracker,
        events: ctx.events,
    };
    let index = chunk.index;
    ctx.run(&cmd, &mut observer).await.map_err(|err| {
        err.into_stage_failure(|message, diagnostics| MontageError::ChunkRenderFailed {
            index,
            message,
            diagnostics,
        })
    })?;
    tracker.finish_chunk();

    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::plan_export;
    use montage_timeline_model::{Clip, ExportRequest, OutputGeometry, Preset};

    fn chunk() -> ChunkComposition {
        let clip = Clip::video("a", "/m/a.mp4", 0.0, 2.5, 3.0);
        ChunkComposition::from_clip(1, &clip, OutputGeometry::new(1280, 720, 30.0))
    }

    #[test]
    fn test_chunk_command_bitrate_mode() {
        let request = ExportRequest::new(
            vec![Clip::video("a", "/m/a.mp4", 0.0, 2.5, 3.0)],
            "out.mp4",
            Preset::Normal,
        );
        let plan = plan_export(&request);
        let args = chunk_command(Path::new("ffmpeg"), &chunk(), &plan, Path::new("/s/vchunk_1.mov"))
            .args_lossy();

        assert_eq!(&args[..8], &["-y", "-ss", "1.5", "-i", "/m/a.mp4", "-t", "9", "-filter_complex"]);
        assert!(args[8].starts_with("[0:v]trim=start=1:end=4,"));
        assert_eq!(
            &args[9..],
            &[
                "-map", "[vOut]", "-an", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset",
                "medium", "-b:v", "6000000", "-maxrate", "6000000", "-bufsize", "12000000",
                "/s/vchunk_1.mov",
            ]
        );
    }

    #[test]
    fn test_chunk_command_crf_mode() {
        let request = ExportRequest::new(
            vec![Clip::video("a", "/m/a.mp4", 0.0, 2.5, 3.0)],
            "out.mp4",
            Preset::Custom,
        )
        .with_crf(20);
        let plan = plan_export(&request);
        let cmd = chunk_command(Path::new("ffmpeg"), &chunk(), &plan, Path::new("/s/vchunk_1.mov"));
        let args = cmd.args_lossy();
        let tail: Vec<&str> = args[args.len() - 3..].iter().map(String::as_str).collect();
        assert_eq!(tail, vec!["-crf", "20", "/s/vchunk_1.mov"]);
        assert!(!args.iter().any(|a| a == "-b:v"));
        assert_eq!(cmd.label(), "chunk 1");
    }
}
