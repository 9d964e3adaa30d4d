//! Check that the external media tools are usable.

use montage_common::config::AppConfig;
use montage_render_engine::{check_tools, ToolStatus};

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Montage Tool Check");
    println!("{}", "=".repeat(50));

    let report = check_tools(&config.encoder).await;
    print_status("Encoder", &report.encoder);
    print_status("Prober", &report.prober);

    println!();
    if let Some(root) = &config.scratch_root {
        println!("Scratch root: {}", root.display());
    } else {
        println!("Scratch root: {} (system temp)", config.scratch_parent().display());
    }

    println!();
    if report.all_available() {
        println!("All tools are available. Montage is ready to export.");
        Ok(())
    } else {
        println!("Some tools are missing. Install ffmpeg or set the paths in the config file.");
        anyhow::bail!("required tools unavailable")
    }
}

fn print_status(name: &str, status: &ToolStatus) {
    if status.is_available() {
        println!(
            "[OK]   {name}: {}",
            status.version.as_deref().unwrap_or(&status.tool)
        );
        if let Some(path) = &status.path {
            println!("       {}", path.display());
        }
    } else {
        println!(
            "[FAIL] {name} ({}): {}",
            status.tool,
            status.error.as_deref().unwrap_or("not found")
        );
    }
}
