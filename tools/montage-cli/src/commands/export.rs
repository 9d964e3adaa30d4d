//! Export a timeline snapshot to video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use montage_common::config::AppConfig;
use montage_common::format_clock;
use montage_render_engine::{EventCallback, ExportCoordinator, ExportEvent};
use montage_timeline_model::{ExportRequest, OutputGeometry, Preset, Timeline};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

pub struct ExportArgs {
    pub timeline: PathBuf,
    pub output: PathBuf,
    pub preset: Preset,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub target_mb: Option<f64>,
    pub crf: Option<u8>,
    pub json: bool,
}

impl ExportArgs {
    fn into_request(self, timeline: Timeline) -> anyhow::Result<ExportRequest> {
        let defaults = self.preset.default_geometry();
        let geometry = OutputGeometry::new(
            self.width.unwrap_or(defaults.width),
            self.height.unwrap_or(defaults.height),
            self.fps.unwrap_or(defaults.fps),
        );

        let mut request =
            ExportRequest::new(timeline.clips, self.output, self.preset).with_geometry(geometry);
        if let Some(mb) = self.target_mb {
            if !(mb.is_finite() && mb > 0.0) {
                anyhow::bail!("--target-mb must be a positive number (got {mb})");
            }
            request = request.with_target_size((mb * BYTES_PER_MIB).floor() as u64);
        }
        if let Some(crf) = self.crf {
            request = request.with_crf(crf);
        }
        Ok(request)
    }
}

pub async fn run(config: AppConfig, args: ExportArgs) -> anyhow::Result<()> {
    let timeline = Timeline::load(&args.timeline)
        .map_err(|e| anyhow::anyhow!("Failed to load timeline: {e}"))?;
    let json = args.json;
    let request = args.into_request(timeline)?;

    if !json {
        println!("Exporting {} clips", request.clips.len());
        println!("  Output: {}", request.out_path.display());
        println!("  Preset: {}", request.preset.as_str());
        println!(
            "  Resolution: {}x{} @ {}fps",
            request.width, request.height, request.fps
        );
        println!("  Duration: {}", format_clock(request.total_duration()));
    }

    let coordinator = ExportCoordinator::new(config);
    let cancel = coordinator.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling export");
            cancel.cancel();
        }
    });

    let result = coordinator
        .start_export(request, Some(event_printer(json)))
        .await;
    ctrl_c.abort();

    match result {
        Ok(path) => {
            if !json {
                println!("\nExport complete: {}", path.display());
            }
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            if !json {
                println!("\nExport cancelled");
            }
            Ok(())
        }
        Err(e) => {
            if let Some(diagnostics) = e.diagnostics() {
                eprintln!("\nEncoder output:\n{diagnostics}");
            }
            Err(anyhow::anyhow!("Export failed: {e}"))
        }
    }
}

fn event_printer(json: bool) -> EventCallback {
    Arc::new(move |event| {
        if json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
            return;
        }
        if let ExportEvent::Progress(p) = event {
            let eta = p
                .eta_secs
                .map(|s| format_clock(s as f64))
                .unwrap_or_else(|| "--:--".to_string());
            print!(
                "\r  [{:<7}] {:5.1}%  {} / {}  frame {}/{}  ETA {}  ",
                p.phase.as_str(),
                p.percent * 100.0,
                format_clock(p.current_seconds),
                format_clock(p.total_seconds),
                p.current_frame,
                p.total_frames,
                eta,
            );
            std::io::stdout().flush().ok();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use montage_timeline_model::Clip;

    fn args() -> ExportArgs {
        ExportArgs {
            timeline: PathBuf::from("timeline.json"),
            output: PathBuf::from("out.mp4"),
            preset: Preset::Discord,
            width: None,
            height: Some(480),
            fps: None,
            target_mb: None,
            crf: None,
            json: false,
        }
    }

    fn timeline() -> Timeline {
        Timeline::new(vec![Clip::video("a", "a.mp4", 0.0, 0.0, 2.0)])
    }

    #[test]
    fn test_request_uses_preset_geometry_with_overrides() {
        let request = args().into_request(timeline()).unwrap();
        assert_eq!((request.width, request.height, request.fps), (1280, 480, 30.0));
        assert_eq!(request.target_size_bytes, None);
    }

    #[test]
    fn test_target_mb_converts_to_bytes() {
        let request = ExportArgs {
            target_mb: Some(8.0),
            crf: Some(18),
            ..args()
        }
        .into_request(timeline())
        .unwrap();
        assert_eq!(request.target_size_bytes, Some(8 * 1024 * 1024));
        assert_eq!(request.crf, Some(18));
    }

    #[test]
    fn test_fractional_target_and_rate_are_kept() {
        let request = ExportArgs {
            preset: Preset::Custom,
            fps: Some(29.97),
            target_mb: Some(7.3),
            ..args()
        }
        .into_request(timeline())
        .unwrap();
        assert_eq!(request.fps, 29.97);
        assert_eq!(request.target_size_bytes, Some(7_654_604));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_non_positive_target_is_rejected() {
        let err = ExportArgs {
            target_mb: Some(0.0),
            ..args()
        }
        .into_request(timeline());
        assert!(err.is_err());
    }
}
