//! Extract a first-frame thumbnail.

use std::path::PathBuf;

use montage_common::config::AppConfig;
use montage_render_engine::generate_thumbnail;

pub async fn run(config: &AppConfig, file: PathBuf, output_dir: PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(&output_dir)?;
    let thumb = generate_thumbnail(&config.encoder, &file, &output_dir)
        .await
        .map_err(|e| anyhow::anyhow!("Thumbnail failed: {e}"))?;
    println!("{}", thumb.display());
    Ok(())
}
