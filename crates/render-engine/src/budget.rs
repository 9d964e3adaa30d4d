//! Bitrate and size budgeting.
//!
//! Maps an [`ExportRequest`] to a [`RenderPlan`]: which rate control the
//! video encoder uses, the delivery audio bitrate, and the encoder speed
//! preset. Pure and deterministic; nothing here touches the filesystem.

use montage_timeline_model::{ExportRequest, Preset};
use serde::{Deserialize, Serialize};

/// Share of the size budget left for payload after container overhead.
pub const SIZE_BUDGET_PAYLOAD_RATIO: f64 = 0.95;

/// Floor for size-budgeted video bitrates (bits/s).
pub const MIN_VIDEO_BITRATE_BITS: u64 = 100_000;

/// Bitrate used when neither a size, a CRF, nor a preset table entry applies.
pub const FALLBACK_VIDEO_BITRATE_BITS: u64 = 4_000_000;

/// Size cap the `discord` preset always targets.
pub const DISCORD_TARGET_SIZE_BYTES: u64 = 9 * 1024 * 1024;

pub const DEFAULT_AUDIO_BITRATE_BITS: u64 = 192_000;
pub const DISCORD_AUDIO_BITRATE_BITS: u64 = 128_000;
pub const HQ_AUDIO_BITRATE_BITS: u64 = 320_000;

/// How the video encoder spends bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoRateControl {
    /// Target bitrate in bits/s, capped at the same peak rate.
    Bitrate(u64),
    /// Constant rate factor.
    Crf(u8),
}

/// Encoder speed/quality trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    Veryfast,
    Medium,
}

impl EncoderPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Veryfast => "veryfast",
            Self::Medium => "medium",
        }
    }
}

/// Derived encoding parameters for one export. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPlan {
    pub video: VideoRateControl,
    pub audio_bitrate_bits: u64,
    pub encoder_preset: EncoderPreset,
    /// Effective size budget, after preset overrides.
    pub target_size_bytes: Option<u64>,
    /// Timeline length the budget was spread over.
    pub total_duration_secs: f64,
}

impl RenderPlan {
    pub fn video_bitrate_bits(&self) -> Option<u64> {
        match self.video {
            VideoRateControl::Bitrate(bits) => Some(bits),
            VideoRateControl::Crf(_) => None,
        }
    }

    pub fn video_crf(&self) -> Option<u8> {
        match self.video {
            VideoRateControl::Crf(crf) => Some(crf),
            VideoRateControl::Bitrate(_) => None,
        }
    }

    /// Encoder arguments selecting the video rate control.
    ///
    /// Bitrate mode pins the peak rate to the target and sizes the rate
    /// buffer at twice the target.
    pub fn video_rate_args(&self) -> Vec<String> {
        match self.video {
            VideoRateControl::Crf(crf) => vec!["-crf".to_string(), crf.to_string()],
            VideoRateControl::Bitrate(bits) => vec![
                "-b:v".to_string(),
                bits.to_string(),
                "-maxrate".to_string(),
                bits.to_string(),
                "-bufsize".to_string(),
                (bits * 2).to_string(),
            ],
        }
    }

    /// Audio bitrate as an encoder argument, e.g. `192k`.
    pub fn audio_bitrate_arg(&self) -> String {
        if self.audio_bitrate_bits % 1000 == 0 {
            format!("{}k", self.audio_bitrate_bits / 1000)
        } else {
            self.audio_bitrate_bits.to_string()
        }
    }
}

/// Fixed video bitrate for presets that have a table entry.
pub fn preset_video_bitrate(preset: Preset) -> Option<u64> {
    match preset {
        Preset::Normal => Some(6_000_000),
        Preset::Smooth => Some(10_000_000),
        Preset::Hq => Some(18_000_000),
        Preset::Discord | Preset::Custom => None,
    }
}

/// Plan an export over the request's own timeline duration.
pub fn plan_export(request: &ExportRequest) -> RenderPlan {
    plan_for_duration(request, request.total_duration())
}

/// Plan an export spreading the budget over `total_duration_secs`.
///
/// Priority: size budget (the `discord` preset always has one), then CRF,
/// then the preset table, then the fallback bitrate. Size budget wins over
/// CRF when a request carries both.
pub fn plan_for_duration(request: &ExportRequest, total_duration_secs: f64) -> RenderPlan {
    let preset = request.preset;
    let encoder_preset = if preset == Preset::Discord {
        EncoderPreset::Veryfast
    } else {
        EncoderPreset::Medium
    };

    let target_size_bytes = if preset == Preset::Discord {
        Some(DISCORD_TARGET_SIZE_BYTES)
    } else {
        request.target_size_bytes.filter(|bytes| *bytes > 0)
    };

    if let Some(target_bytes) = target_size_bytes {
        let audio_bitrate_bits = if preset == Preset::Discord {
            DISCORD_AUDIO_BITRATE_BITS
        } else {
            DEFAULT_AUDIO_BITRATE_BITS
        };
        return RenderPlan {
            video: VideoRateControl::Bitrate(size_budget_video_bitrate(
                target_bytes,
                total_duration_secs,
                audio_bitrate_bits,
            )),
            audio_bitrate_bits,
            encoder_preset,
            target_size_bytes: Some(target_bytes),
            total_duration_secs,
        };
    }

    if let Some(crf) = request.crf {
        return RenderPlan {
            video: VideoRateControl::Crf(crf),
            audio_bitrate_bits: DEFAULT_AUDIO_BITRATE_BITS,
            encoder_preset,
            target_size_bytes: None,
            total_duration_secs,
        };
    }

    let (video_bits, audio_bitrate_bits) = match preset_video_bitrate(preset) {
        Some(bits) if preset == Preset::Hq => (bits, HQ_AUDIO_BITRATE_BITS),
        Some(bits) => (bits, DEFAULT_AUDIO_BITRATE_BITS),
        None => (FALLBACK_VIDEO_BITRATE_BITS, DEFAULT_AUDIO_BITRATE_BITS),
    };

    RenderPlan {
        video: VideoRateControl::Bitrate(video_bits),
        audio_bitrate_bits,
        encoder_preset,
        target_size_bytes: None,
        total_duration_secs,
    }
}

/// Video bitrate that fits `target_bytes` over `duration_secs` next to the
/// audio stream, keeping 5% for container overhead.
pub fn size_budget_video_bitrate(target_bytes: u64, duration_secs: f64, audio_bits: u64) -> u64 {
    let duration = if duration_secs.is_finite() && duration_secs > 0.0 {
        duration_secs
    } else {
        1.0
    };
    let target_bits = target_bytes as f64 * 8.0 * SIZE_BUDGET_PAYLOAD_RATIO;
    let video_bits = (target_bits / duration - audio_bits as f64).floor();
    if video_bits.is_finite() && video_bits > MIN_VIDEO_BITRATE_BITS as f64 {
        video_bits as u64
    } else {
        MIN_VIDEO_BITRATE_BITS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use montage_timeline_model::Clip;
    use proptest::prelude::*;

    fn request(preset: Preset, duration: f64) -> ExportRequest {
        ExportRequest::new(
            vec![Clip::video("a", "a.mp4", 0.0, 0.0, duration)],
            "out.mp4",
            preset,
        )
    }

    #[test]
    fn test_size_budget_scenario() {
        let req = request(Preset::Custom, 60.0).with_target_size(5 * 1024 * 1024);
        let plan = plan_export(&req);
        assert_eq!(plan.video, VideoRateControl::Bitrate(472_098));
        assert_eq!(plan.audio_bitrate_bits, 192_000);
        assert_eq!(plan.video_crf(), None);
        assert_eq!(plan.encoder_preset, EncoderPreset::Medium);
    }

    #[test]
    fn test_discord_forces_size_budget() {
        let plan = plan_export(&request(Preset::Discord, 20.0));
        assert_eq!(plan.target_size_bytes, Some(9 * 1024 * 1024));
        assert_eq!(plan.audio_bitrate_bits, 128_000);
        assert_eq!(plan.encoder_preset, EncoderPreset::Veryfast);
        assert_eq!(plan.video_crf(), None);
        // floor(9 MiB * 8 * 0.95 / 20 - 128000)
        assert_eq!(plan.video_bitrate_bits(), Some(3_458_129));
    }

    #[test]
    fn test_discord_ignores_crf() {
        let plan = plan_export(&request(Preset::Discord, 20.0).with_crf(18));
        assert!(plan.video_bitrate_bits().is_some());
        assert_eq!(plan.video_crf(), None);
    }

    #[test]
    fn test_crf_mode() {
        let plan = plan_export(&request(Preset::Custom, 30.0).with_crf(18));
        assert_eq!(plan.video, VideoRateControl::Crf(18));
        assert_eq!(plan.video_bitrate_bits(), None);
        assert_eq!(plan.audio_bitrate_bits, 192_000);
        assert_eq!(plan.video_rate_args(), vec!["-crf", "18"]);
    }

    #[test]
    fn test_size_budget_wins_over_crf() {
        let req = request(Preset::Custom, 60.0)
            .with_target_size(5 * 1024 * 1024)
            .with_crf(18);
        let plan = plan_export(&req);
        assert_eq!(plan.video_bitrate_bits(), Some(472_098));
        assert_eq!(plan.video_crf(), None);
    }

    #[test]
    fn test_zero_target_size_is_ignored() {
        let plan = plan_export(&request(Preset::Normal, 60.0).with_target_size(0));
        assert_eq!(plan.video_bitrate_bits(), Some(6_000_000));
        assert_eq!(plan.target_size_bytes, None);
    }

    #[test]
    fn test_preset_table() {
        assert_eq!(
            plan_export(&request(Preset::Normal, 10.0)).video_bitrate_bits(),
            Some(6_000_000)
        );
        assert_eq!(
            plan_export(&request(Preset::Smooth, 10.0)).video_bitrate_bits(),
            Some(10_000_000)
        );
        let hq = plan_export(&request(Preset::Hq, 10.0));
        assert_eq!(hq.video_bitrate_bits(), Some(18_000_000));
        assert_eq!(hq.audio_bitrate_bits, 320_000);
        assert_eq!(hq.audio_bitrate_arg(), "320k");
    }

    #[test]
    fn test_custom_fallback() {
        let plan = plan_export(&request(Preset::Custom, 10.0));
        assert_eq!(plan.video_bitrate_bits(), Some(4_000_000));
        assert_eq!(plan.audio_bitrate_bits, 192_000);
    }

    #[test]
    fn test_tiny_budget_clamps_to_floor() {
        let req = request(Preset::Custom, 600.0).with_target_size(1024 * 1024);
        assert_eq!(plan_export(&req).video_bitrate_bits(), Some(100_000));
    }

    #[test]
    fn test_bitrate_args_double_buffer() {
        let plan = plan_export(&request(Preset::Normal, 10.0));
        assert_eq!(
            plan.video_rate_args(),
            vec!["-b:v", "6000000", "-maxrate", "6000000", "-bufsize", "12000000"]
        );
    }

    proptest! {
        #[test]
        fn prop_size_budget_fills_target(
            target_mib in 1u64..2000,
            duration in 1.0f64..7200.0,
        ) {
            let target_bytes = target_mib * 1024 * 1024;
            let req = request(Preset::Custom, duration).with_target_size(target_bytes);
            let plan = plan_export(&req);
            let video = plan.video_bitrate_bits().unwrap();
            prop_assert!(video >= MIN_VIDEO_BITRATE_BITS);

            if video > MIN_VIDEO_BITRATE_BITS {
                let spent = (video + plan.audio_bitrate_bits) as f64 * duration;
                let budget = target_bytes as f64 * 8.0 * SIZE_BUDGET_PAYLOAD_RATIO;
                let slack = budget * 1e-9;
                prop_assert!(spent <= budget + slack);
                prop_assert!(budget - spent <= duration + slack);
            }
        }

        #[test]
        fn prop_exactly_one_rate_control(
            preset_idx in 0usize..5,
            target in proptest::option::of(0u64..50_000_000),
            crf in proptest::option::of(0u8..=51),
            duration in 0.1f64..600.0,
        ) {
            let preset = [Preset::Normal, Preset::Smooth, Preset::Hq, Preset::Discord, Preset::Custom][preset_idx];
            let mut req = request(preset, duration);
            req.target_size_bytes = target;
            req.crf = crf;
            let plan = plan_export(&req);
            prop_assert!(plan.video_bitrate_bits().is_some() != plan.video_crf().is_some());
            prop_assert_eq!(&plan, &plan_export(&req));
        }
    }
}
