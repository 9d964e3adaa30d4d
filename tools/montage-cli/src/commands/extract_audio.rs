//! Extract one audio stream to PCM.

use std::path::PathBuf;

use montage_common::config::AppConfig;
use montage_render_engine::extract_audio_stream;

pub async fn run(
    config: &AppConfig,
    file: PathBuf,
    stream: u32,
    output_dir: PathBuf,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(&output_dir)?;
    let wav = extract_audio_stream(&config.encoder, &file, stream, &output_dir)
        .await
        .map_err(|e| anyhow::anyhow!("Audio extraction failed: {e}"))?;
    println!("{}", wav.display());
    Ok(())
}
