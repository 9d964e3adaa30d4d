//! Media tool helpers used outside the export pipeline: tool status,
//! probing, thumbnails and single-stream audio extraction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use montage_common::{EncoderConfig, MontageError, MontageResult};
use serde::{Deserialize, Serialize};

use crate::process::{EncoderCommand, ProcessRunner};

/// Budget for a `-version` check.
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Height of generated thumbnails in pixels.
pub const THUMBNAIL_HEIGHT: u32 = 60;

/// Availability of one external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStatus {
    pub tool: String,
    /// Resolved executable, when found.
    pub path: Option<PathBuf>,
    /// First line of the `-version` banner.
    pub version: Option<String>,
    pub error: Option<String>,
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        self.path.is_some() && self.error.is_none()
    }
}

/// Status of the encoder and the prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReport {
    pub encoder: ToolStatus,
    pub prober: ToolStatus,
}

impl ToolReport {
    pub fn all_available(&self) -> bool {
        self.encoder.is_available() && self.prober.is_available()
    }
}

/// Resolve `program` on `PATH` (or check an explicit path is executable).
pub fn resolve_tool(program: &Path) -> MontageResult<PathBuf> {
    which::which(program).map_err(|e| {
        MontageError::tool_unavailable(program.display().to_string(), e.to_string())
    })
}

/// Resolve `program` and confirm it runs `-version` successfully.
pub async fn check_tool(program: &Path) -> ToolStatus {
    let tool = program.display().to_string();
    let path = match resolve_tool(program) {
        Ok(path) => path,
        Err(err) => {
            return ToolStatus {
                tool,
                path: None,
                version: None,
                error: Some(err.to_string()),
            }
        }
    };

    let cmd = EncoderCommand::new(&path, format!("{tool} -version")).arg("-version");
    let result = ProcessRunner::new()
        .with_timeout(VERSION_CHECK_TIMEOUT)
        .run(&cmd)
        .await;

    match result {
        Ok(output) => ToolStatus {
            tool,
            path: Some(path),
            version: String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            error: None,
        },
        Err(err) => ToolStatus {
            tool,
            path: Some(path),
            version: None,
            error: Some(err.to_string()),
        },
    }
}

pub async fn check_tools(config: &EncoderConfig) -> ToolReport {
    let (encoder, prober) = tokio::join!(
        check_tool(&config.ffmpeg_path),
        check_tool(&config.ffprobe_path)
    );
    ToolReport { encoder, prober }
}

/// Fail with `ToolUnavailable` unless the encoder runs.
pub async fn ensure_encoder(config: &EncoderConfig) -> MontageResult<PathBuf> {
    let status = check_tool(&config.ffmpeg_path).await;
    match (status.path, status.error) {
        (Some(path), None) => Ok(path),
        (_, error) => Err(MontageError::tool_unavailable(
            status.tool,
            error.unwrap_or_else(|| "not found".to_string()),
        )),
    }
}

/// What a probe reports about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Container duration in seconds, `0` when unknown.
    pub duration: f64,
    /// First video stream, if any.
    pub video: Option<VideoStreamInfo>,
    pub audio_streams: Vec<AudioStreamInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    /// Raw rate as reported, e.g. `30000/1001`.
    pub frame_rate: String,
}

impl VideoStreamInfo {
    pub fn fps(&self) -> Option<f64> {
        parse_frame_rate(&self.frame_rate)
    }
}

/// An audio stream, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    /// Position among audio streams (the `a:N` selector).
    pub order: u32,
    /// Absolute stream index in the container (the `0:N` selector).
    pub index: u32,
    pub channels: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    index: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    r_frame_rate: Option<String>,
}

/// Probe `path` with the configured prober.
pub async fn probe_media(config: &EncoderConfig, path: &Path) -> MontageResult<MediaInfo> {
    if !path.exists() {
        return Err(MontageError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let prober = resolve_tool(&config.ffprobe_path)?;

    let cmd = EncoderCommand::new(prober, "probe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path);
    let output = ProcessRunner::new()
        .with_timeout(config.probe_timeout())
        .run(&cmd)
        .await?;

    let info = parse_probe_output(&output.stdout)?;
    tracing::debug!(
        path = %path.display(),
        duration = info.duration,
        audio_streams = info.audio_streams.len(),
        has_video = info.video.is_some(),
        "Probed media"
    );
    Ok(info)
}

/// Interpret the prober's JSON output.
pub fn parse_probe_output(stdout: &[u8]) -> MontageResult<MediaInfo> {
    let probe: ProbeOutput = if stdout.iter().all(u8::is_ascii_whitespace) {
        ProbeOutput::default()
    } else {
        serde_json::from_slice(stdout)?
    };

    let duration = match probe.format.duration {
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    };

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(|s| VideoStreamInfo {
            width: s.width.unwrap_or(0),
            height: s.height.unwrap_or(0),
            frame_rate: s.r_frame_rate.clone().unwrap_or_default(),
        });

    let audio_streams = probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .enumerate()
        .map(|(order, s)| AudioStreamInfo {
            order: order as u32,
            index: s.index.unwrap_or(0),
            channels: s.channels.unwrap_or(0),
        })
        .collect();

    Ok(MediaInfo {
        duration: if duration.is_finite() { duration } else { 0.0 },
        video,
        audio_streams,
    })
}

/// Parse a frame rate string (`30/1`, `30000/1001`, `29.97`).
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Extract the first frame of `path` as a 60px-high JPEG in `out_dir`.
pub async fn generate_thumbnail(
    config: &EncoderConfig,
    path: &Path,
    out_dir: &Path,
) -> MontageResult<PathBuf> {
    if !path.exists() {
        return Err(MontageError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let encoder = resolve_tool(&config.ffmpeg_path)?;
    let out_path = reserve_output(out_dir, "thumb_", ".jpg")?;

    let cmd = EncoderCommand::new(encoder, "thumbnail")
        .args(["-y", "-ss", "00:00:00", "-i"])
        .arg(path)
        .args(["-vframes", "1", "-vf"])
        .arg(format!("scale=-1:{THUMBNAIL_HEIGHT}"))
        .arg(&out_path);

    run_into(&cmd, config.thumbnail_timeout(), &out_path).await?;
    Ok(out_path)
}

/// Extract stream `stream_index` (container index) of `path` to 48 kHz
/// stereo PCM in `out_dir`.
pub async fn extract_audio_stream(
    config: &EncoderConfig,
    path: &Path,
    stream_index: u32,
    out_dir: &Path,
) -> MontageResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(MontageError::invalid_request("no input file given"));
    }
    if !path.exists() {
        return Err(MontageError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let encoder = resolve_tool(&config.ffmpeg_path)?;
    let out_path = reserve_output(out_dir, "audio_", &format!("_s{stream_index}.wav"))?;

    let cmd = EncoderCommand::new(encoder, "extract-audio")
        .args(["-y", "-i"])
        .arg(path)
        .arg("-map")
        .arg(format!("0:{stream_index}"))
        .args(["-vn", "-ac", "2", "-ar", "48000", "-c:a", "pcm_s16le"])
        .arg(&out_path);

    run_into(&cmd, config.extract_timeout(), &out_path).await?;
    tracing::info!(
        source = %path.display(),
        stream = stream_index,
        output = %out_path.display(),
        "Extracted audio stream"
    );
    Ok(out_path)
}

/// Claim a unique file name in `dir`; the encoder overwrites it.
fn reserve_output(dir: &Path, prefix: &str, suffix: &str) -> MontageResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)?;
    file.into_temp_path()
        .keep()
        .map_err(|e| MontageError::Io(e.error))
}

async fn run_into(cmd: &EncoderCommand, timeout: Duration, out_path: &Path) -> MontageResult<()> {
    let result = ProcessRunner::new().with_timeout(timeout).run(cmd).await;
    if let Err(err) = result {
        if let Err(rm) = std::fs::remove_file(out_path) {
            tracing::warn!(path = %out_path.display(), error = %rm, "Failed to remove partial output");
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 1e-9);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 1e-9);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate(""), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [
                {"index": 0, "codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "60000/1001"},
                {"index": 1, "codec_type": "audio", "channels": 2},
                {"index": 2, "codec_type": "subtitle"},
                {"index": 3, "codec_type": "audio", "channels": 1}
            ],
            "format": {"duration": "12.480000"}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!((info.duration - 12.48).abs() < 1e-9);
        let video = info.video.unwrap();
        assert_eq!((video.width, video.height), (1920, 1080));
        assert!((video.fps().unwrap() - 59.94).abs() < 0.01);
        assert_eq!(
            info.audio_streams,
            vec![
                AudioStreamInfo { order: 0, index: 1, channels: 2 },
                AudioStreamInfo { order: 1, index: 3, channels: 1 },
            ]
        );
    }

    #[test]
    fn test_parse_probe_output_audio_only_and_empty() {
        let info = parse_probe_output(br#"{"streams":[{"index":0,"codec_type":"audio"}],"format":{}}"#)
            .unwrap();
        assert!(info.video.is_none());
        assert_eq!(info.duration, 0.0);
        assert_eq!(info.audio_streams[0].channels, 0);

        let empty = parse_probe_output(b"  ").unwrap();
        assert!(empty.audio_streams.is_empty());
        assert!(parse_probe_output(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let status = check_tool(Path::new("/nonexistent/montage-ffmpeg")).await;
        assert!(!status.is_available());
        assert!(status.error.is_some());

        let config = EncoderConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/montage-ffmpeg"),
            ..EncoderConfig::default()
        };
        let err = ensure_encoder(&config).await.unwrap_err();
        assert_eq!(err.code(), "tool_unavailable");
    }

    #[tokio::test]
    async fn test_extract_rejects_empty_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_audio_stream(&EncoderConfig::default(), Path::new(""), 1, dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_media(&EncoderConfig::default(), Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MontageError::FileNotFound { .. }));
    }
}
