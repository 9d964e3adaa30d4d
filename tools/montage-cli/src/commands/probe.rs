//! Show what the prober reports about a media file.

use std::path::PathBuf;

use montage_common::config::AppConfig;
use montage_common::format_clock;
use montage_render_engine::probe_media;

pub async fn run(config: &AppConfig, file: PathBuf, json: bool) -> anyhow::Result<()> {
    let info = probe_media(&config.encoder, &file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to probe {}: {e}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("  Duration: {} ({:.3}s)", format_clock(info.duration), info.duration);

    match &info.video {
        Some(v) => {
            let fps = v
                .fps()
                .map(|f| format!("{f:.3}"))
                .unwrap_or_else(|| "unknown".to_string());
            println!("  Video: {}x{} @ {fps}fps ({})", v.width, v.height, v.frame_rate);
        }
        None => println!("  Video: none"),
    }

    if info.audio_streams.is_empty() {
        println!("  Audio: none");
    }
    for stream in &info.audio_streams {
        println!(
            "  Audio a:{} (stream {}): {} channels",
            stream.order, stream.index, stream.channels
        );
    }

    Ok(())
}
