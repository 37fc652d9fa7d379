//! Metadata from engine log text.
//!
//! The engine only reports what it prints, so frame rate, frame count,
//! resolution and audio presence are all scraped from its log. Anything not
//! found comes back as 0 / false, which callers treat as unknown.

use std::sync::LazyLock;

use regex::Regex;

static FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*fps").expect("invalid fps regex"));
static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").expect("invalid frame regex"));
static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2,5})x(\d{2,5})").expect("invalid resolution regex"));
static VIDEO_STREAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Stream.*Video").expect("invalid video stream regex"));
static AUDIO_STREAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Stream.*Audio").expect("invalid audio stream regex"));

/// Frame rates clips are snapped to.
pub const STANDARD_FRAME_RATES: [f64; 8] = [23.976, 24.0, 25.0, 29.97, 30.0, 50.0, 59.94, 60.0];

/// How far a probed rate may sit from a standard one and still be snapped.
const PROBED_SNAP_TOLERANCE: f64 = 0.05;

/// Probed rates above this are likely frame-interpolated.
pub const INTERPOLATION_WARNING_FPS: f64 = 60.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub frame_rate: f64,
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
    pub has_audio_stream: bool,
}

/// Probe command: stream-copy the first video stream into the null muxer.
/// Nothing is decoded; the engine still counts every frame it passes through.
pub fn probe_args(input_name: &str) -> Vec<String> {
    [
        "-i", input_name, "-map", "0:v:0", "-c", "copy", "-f", "null", "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Nearest standard frame rate.
pub fn snap_frame_rate(raw: f64) -> f64 {
    let mut best = 30.0;
    let mut best_diff = f64::INFINITY;
    for rate in STANDARD_FRAME_RATES {
        let diff = (raw - rate).abs();
        if diff < best_diff {
            best_diff = diff;
            best = rate;
        }
    }
    best
}

/// Snap a probed rate only when it is already close to a standard one, so
/// genuinely unusual rates (e.g. 120) survive for the interpolation warning.
pub fn standardize_probed_rate(raw: f64) -> f64 {
    if raw <= 0.0 {
        return 0.0;
    }
    let snapped = snap_frame_rate(raw);
    if (snapped - raw).abs() <= PROBED_SNAP_TOLERANCE {
        snapped
    } else {
        raw
    }
}

fn first_in_lines<'a>(log: &'a str, line_filter: &Regex, re: &Regex) -> Option<regex::Captures<'a>> {
    log.lines()
        .filter(|l| line_filter.is_match(l))
        .find_map(|l| re.captures(l))
}

/// Frame rate from the first video stream description.
pub fn parse_frame_rate(log: &str) -> f64 {
    first_in_lines(log, &VIDEO_STREAM_RE, &FPS_RE)
        .and_then(|c| c[1].parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Frame count from the last `frame=` progress token; earlier ones are partial.
pub fn last_frame_count(log: &str) -> Option<u64> {
    FRAME_RE
        .captures_iter(log)
        .last()
        .and_then(|c| c[1].parse().ok())
}

/// First `WxH` token, preferring the video stream description over the rest of the log.
pub fn parse_resolution(log: &str) -> (u32, u32) {
    first_in_lines(log, &VIDEO_STREAM_RE, &RESOLUTION_RE)
        .or_else(|| RESOLUTION_RE.captures(log))
        .and_then(|c| Some((c[1].parse().ok()?, c[2].parse().ok()?)))
        .unwrap_or((0, 0))
}

/// Any audio stream description anywhere in the log.
pub fn has_audio_stream(log: &str) -> bool {
    log.lines().any(|l| AUDIO_STREAM_RE.is_match(l))
}

/// Audio in the encoded output. Only the `Output #` section counts when the
/// log has one, since input streams are described too.
pub fn output_has_audio(log: &str) -> bool {
    match log.find("Output #") {
        Some(start) => has_audio_stream(&log[start..]),
        None => has_audio_stream(log),
    }
}

/// Full probe analysis of one log.
pub fn analyze_probe_log(log: &str) -> ProbeReport {
    let (width, height) = parse_resolution(log);
    ProbeReport {
        frame_rate: standardize_probed_rate(parse_frame_rate(log)),
        total_frames: last_frame_count(log).unwrap_or(0),
        width,
        height,
        has_audio_stream: has_audio_stream(log),
    }
}
