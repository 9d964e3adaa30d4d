//! Master audio: mix every enabled track into one lossless stereo file.

use std::path::{Path, PathBuf};

use montage_common::{MontageError, MontageResult};
use montage_timeline_model::Clip;
use tracing::info;

use super::StageContext;
use crate::audio_graph::{AudioGraph, OUTPUT_LABEL};
use crate::process::EncoderCommand;

pub const AUDIO_FILTER_FILE: &str = "audio_filter.txt";
pub const MASTER_AUDIO_FILE: &str = "master_audio.wav";

/// Encoder invocation for the master mix. The graph is read from
/// `script_path` so large timelines stay clear of command-line limits.
pub fn audio_command(
    encoder: &Path,
    graph: &AudioGraph,
    total_duration: f64,
    script_path: &Path,
    out_path: &Path,
) -> EncoderCommand {
    EncoderCommand::new(encoder, "audio")
        .arg("-y")
        .args(graph.input_args(total_duration))
        .arg("-filter_complex_script")
        .arg(script_path)
        .arg("-map")
        .arg(format!("[{OUTPUT_LABEL}]"))
        .args(["-c:a", "pcm_s16le"])
        .arg(out_path)
}

/// Render `master_audio.wav` into the scratch directory.
pub async fn render_master_audio(
    ctx: &StageContext<'_>,
    clips: &[Clip],
    total_duration: f64,
) -> MontageResult<PathBuf> {
    let graph = AudioGraph::build(clips);
    let script_path = ctx.scratch_dir.join(AUDIO_FILTER_FILE);
    let out_path = ctx.scratch_dir.join(MASTER_AUDIO_FILE);

    tokio::fs::write(&script_path, graph.render()).await?;
    info!(
        inputs = graph.inputs().len(),
        branches = graph.branches().len(),
        total_duration,
        "Rendering master audio"
    );

    let cmd = audio_command(ctx.encoder, &graph, total_duration, &script_path, &out_path);
    ctx.run(&cmd, &mut ()).await.map_err(|err| {
        err.into_stage_failure(|message, diagnostics| MontageError::AudioRenderFailed {
            message,
            diagnostics,
        })
    })?;

    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use montage_timeline_model::AudioTrack;

    #[test]
    fn test_audio_command_args() {
        let clips = vec![
            Clip::video("a", "/m/a.mp4", 0.0, 0.0, 5.0),
            Clip::audio("m", "/m/song.wav", 1.0, 0.0, 4.0)
                .with_audio_tracks(vec![AudioTrack::new(0).with_volume(0.5)]),
        ];
        let graph = AudioGraph::build(&clips);
        let cmd = audio_command(
            Path::new("ffmpeg"),
            &graph,
            5.0,
            Path::new("/s/audio_filter.txt"),
            Path::new("/s/master_audio.wav"),
        );
        assert_eq!(
            cmd.args_lossy(),
            vec![
                "-y",
                "-f",
                "lavfi",
                "-t",
                "5",
                "-i",
                "anullsrc=channel_layout=stereo:sample_rate=48000",
                "-i",
                "/m/a.mp4",
                "-i",
                "/m/song.wav",
                "-filter_complex_script",
                "/s/audio_filter.txt",
                "-map",
                "[aout]",
                "-c:a",
                "pcm_s16le",
                "/s/master_audio.wav",
            ]
        );
    }
}
