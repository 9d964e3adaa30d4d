//! Final mux: concatenate chunks, attach the master audio, place the file.

use std::path::{Path, PathBuf};

use montage_common::{MontageError, MontageResult};
use tokio::fs;
use tracing::{debug, info, warn};

use super::StageContext;
use crate::budget::RenderPlan;
use crate::compositor::ChunkComposition;
use crate::process::EncoderCommand;

pub const CONCAT_LIST_FILE: &str = "list.txt";

/// Base name of the muxed file inside the scratch directory.
const STAGED_OUTPUT_STEM: &str = "muxed";

/// Concat-demuxer manifest, one chunk per line in timeline order.
///
/// Entries are relative; the demuxer resolves them against the list file.
pub fn concat_list(chunks: &[ChunkComposition]) -> String {
    chunks
        .iter()
        .map(|c| format!("file '{}'", c.file_name()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scratch file the mux writes before it is moved onto `out_path`.
/// Keeps the output's extension so the container format matches.
pub fn staged_output_path(scratch_dir: &Path, out_path: &Path) -> PathBuf {
    let ext = out_path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("mp4");
    scratch_dir.join(format!("{STAGED_OUTPUT_STEM}.{ext}"))
}

pub fn mux_command(
    encoder: &Path,
    list_path: &Path,
    audio_path: &Path,
    plan: &RenderPlan,
    out_path: &Path,
) -> EncoderCommand {
    EncoderCommand::new(encoder, "mux")
        .args(["-y", "-f", "concat", "-safe", "0", "-i"])
        .arg(list_path)
        .arg("-i")
        .arg(audio_path)
        .args(["-map", "0:v", "-map", "1:a", "-c:v", "copy", "-c:a", "aac", "-b:a"])
        .arg(plan.audio_bitrate_arg())
        .args(["-shortest", "-movflags", "+faststart"])
        .arg(out_path)
}

/// Mux `chunks` with `audio_path` and move the result onto `out_path`.
pub async fn mux(
    ctx: &StageContext<'_>,
    chunks: &[ChunkComposition],
    audio_path: &Path,
    out_path: &Path,
) -> MontageResult<PathBuf> {
    let list_path = ctx.scratch_dir.join(CONCAT_LIST_FILE);
    fs::write(&list_path, concat_list(chunks)).await?;

    let staged = staged_output_path(ctx.scratch_dir, out_path);
    let cmd = mux_command(ctx.encoder, &list_path, audio_path, ctx.plan, &staged);
    info!(chunks = chunks.len(), output = %out_path.display(), "Muxing export");

    ctx.run(&cmd, &mut ()).await.map_err(|err| {
        err.into_stage_failure(|message, diagnostics| MontageError::MuxFailed {
            message,
            diagnostics,
        })
    })?;

    ctx.session.check_cancelled()?;
    place_output(&staged, out_path)
        .await
        .map_err(|err| MontageError::MuxFailed {
            message: format!("failed to move output into place: {err}"),
            diagnostics: None,
        })?;
    Ok(out_path.to_path_buf())
}

/// Move `src` onto `dst`, creating the parent directory. Falls back to
/// copy and delete when the two live on different filesystems.
pub async fn place_output(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device(&err) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device rename, copying instead"
            );
            copy_then_remove(src, dst).await
        }
        Err(err) => Err(err),
    }
}

/// EXDEV on Linux and macOS.
fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(18)
}

async fn copy_then_remove(src: &Path, dst: &Path) -> std::io::Result<()> {
    let partial = dst.with_extension("partial");
    if let Err(err) = fs::copy(src, &partial).await {
        let _ = fs::remove_file(&partial).await;
        return Err(err);
    }
    if let Err(err) = fs::rename(&partial, dst).await {
        let _ = fs::remove_file(&partial).await;
        return Err(err);
    }
    if let Err(err) = fs::remove_file(src).await {
        warn!(path = %src.display(), error = %err, "Failed to remove staged output");
    }
    Ok(())
}
