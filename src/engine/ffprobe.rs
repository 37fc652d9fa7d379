//! FFprobe-based quick metadata. Gives a rough first look at a clip before
//! the engine probe replaces it with exact values.

use crate::error::AppError;
use crate::probe::snap_frame_rate;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use super::discovery::get_ffprobe_path;

/// Frame rate assumed when nothing better is known.
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

/// Rough, pre-probe clip metadata.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickMetadata {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Default for QuickMetadata {
    fn default() -> Self {
        Self {
            duration: 0.0,
            width: 0,
            height: 0,
            fps: FALLBACK_FRAME_RATE,
        }
    }
}

impl QuickMetadata {
    pub fn total_frames(&self) -> u64 {
        (self.duration * self.fps).round().max(0.0) as u64
    }
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// Parse ffprobe JSON output into quick metadata. Missing fields fall back to defaults.
pub fn parse_ffprobe_json(json: &str) -> Result<QuickMetadata, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::from(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let duration = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    let video_stream = output
        .streams
        .as_ref()
        .and_then(|streams| streams.iter().find(|s| s.codec_type.as_deref() == Some("video")));
    let width = video_stream.and_then(|s| s.width).unwrap_or(0);
    let height = video_stream.and_then(|s| s.height).unwrap_or(0);
    let fps = video_stream
        .and_then(|s| {
            s.avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate))
        })
        .map(snap_frame_rate)
        .unwrap_or(FALLBACK_FRAME_RATE);

    Ok(QuickMetadata {
        duration,
        width,
        height,
        fps,
    })
}

fn run_ffprobe(path: &Path) -> Result<QuickMetadata, AppError> {
    let ffprobe = get_ffprobe_path()?;
    let path_str = path.to_string_lossy();

    log::debug!(
        target: "scute::engine::ffprobe",
        "quick metadata: path={}",
        path_str
    );

    let mut cmd = Command::new(&ffprobe);
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        &path_str,
    ]);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let output = cmd
        .output()
        .map_err(|e| AppError::from(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::from(format!("ffprobe failed: {}", stderr.trim())));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::from("ffprobe output was not valid UTF-8".to_string()))?;

    parse_ffprobe_json(&json)
}

/// Quick metadata for a file. Never fails: anything unreadable yields the defaults.
pub fn quick_metadata(path: &Path) -> QuickMetadata {
    match run_ffprobe(path) {
        Ok(meta) => meta,
        Err(e) => {
            log::warn!(
                target: "scute::engine::ffprobe",
                "quick metadata unavailable for {}: {}",
                path.display(),
                e
            );
            QuickMetadata::default()
        }
    }
}
