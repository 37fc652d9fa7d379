//! In-memory engine for tests and integration test targets.
//!
//! `ScriptedEngine` understands the command vocabulary the pipeline issues
//! (probe, trim, normalize, concat) and answers with FFmpeg-shaped log text.
//! Media payloads are `FakeMedia` JSON, so outputs carry the stream
//! properties a real encode would produce. Clones share state, which lets a
//! test keep a handle after moving the engine into a session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{Engine, LogCallback};
use crate::error::AppError;

/// Stand-in media file: stream properties only.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FakeMedia {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub frames: u64,
    pub audio: bool,
}

impl FakeMedia {
    pub fn new(fps: f64, width: u32, height: u32, frames: u64, audio: bool) -> Self {
        Self {
            fps,
            width,
            height,
            frames,
            audio,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.frames as f64 / self.fps
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct ScriptState {
    loaded: bool,
    files: HashMap<String, Vec<u8>>,
    logger: Option<LogCallback>,
    load_count: usize,
    exit_count: usize,
    run_count: usize,
    fail_loads_from: Option<usize>,
    fail_runs: Vec<usize>,
    omit_stats: bool,
    commands: Vec<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load attempts that actually tried to initialize (no-op loads excluded).
    pub fn load_count(&self) -> usize {
        self.state.lock().load_count
    }

    pub fn exit_count(&self) -> usize {
        self.state.lock().exit_count
    }

    pub fn run_count(&self) -> usize {
        self.state.lock().run_count
    }

    /// The `n`-th and every later load attempt fail (1-based).
    pub fn fail_loads_from(&self, n: usize) {
        self.state.lock().fail_loads_from = Some(n);
    }

    pub fn allow_loads(&self) {
        self.state.lock().fail_loads_from = None;
    }

    /// The `n`-th run call fails (1-based, counting every run so far).
    pub fn fail_run_at(&self, n: usize) {
        self.state.lock().fail_runs.push(n);
    }

    /// Fail the next run after the ones already issued.
    pub fn fail_next_run(&self) {
        let mut state = self.state.lock();
        let next = state.run_count + 1;
        state.fail_runs.push(next);
    }

    /// Stop emitting `frame=` stats lines, like a build that logs no progress.
    pub fn omit_progress_stats(&self) {
        self.state.lock().omit_stats = true;
    }

    /// Every argument list passed to `run`, in order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().commands.clone()
    }
}

fn hms(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let hours = (seconds / 3600.0).floor();
    let minutes = ((seconds - hours * 3600.0) / 60.0).floor();
    let rest = seconds - hours * 3600.0 - minutes * 60.0;
    format!("{:02}:{:02}:{:05.2}", hours as u64, minutes as u64, rest)
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn filter_param<'a>(filter: &'a str, key: &str) -> Option<&'a str> {
    let start = filter.find(key)? + key.len();
    let rest = &filter[start..];
    let end = rest.find([':', ',', '[']).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn stream_lines(index: usize, media: &FakeMedia, include_audio: bool) -> Vec<String> {
    let mut lines = vec![format!(
        "  Stream #{}:0[0x1](und): Video: h264 (High) (avc1 / 0x31637661), yuv420p(progressive), {}x{} [SAR 1:1 DAR 16:9], 1024 kb/s, {} fps, {} tbr, 15360 tbn (default)",
        index, media.width, media.height, media.fps, media.fps
    )];
    if include_audio && media.audio {
        lines.push(format!(
            "  Stream #{}:1[0x2](und): Audio: aac (LC) (mp4a / 0x6134706D), 48000 Hz, stereo, fltp, 128 kb/s (default)",
            index
        ));
    }
    lines
}

/// What the command would produce from `inputs`.
fn plan_output(args: &[String], inputs: &[FakeMedia]) -> FakeMedia {
    let first = inputs[0].clone();
    let strip_audio = args.iter().any(|a| a == "-an");

    if let Some(graph) = value_after(args, "-filter_complex")
        && graph.contains("concat=n=")
    {
        let with_audio = filter_param(graph, ":a=") == Some("1");
        return FakeMedia {
            frames: inputs.iter().map(|m| m.frames).sum(),
            audio: with_audio && inputs.iter().all(|m| m.audio),
            ..first
        };
    }

    let mut out = first.clone();
    out.audio = first.audio && !strip_audio;
    if value_after(args, "-map") == Some("0:v:0") {
        out.audio = false;
    }

    if let Some(vf) = value_after(args, "-vf") {
        if vf.contains("trim=") {
            let start: u64 = filter_param(vf, "start_frame=")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let end: u64 = filter_param(vf, "end_frame=")
                .and_then(|v| v.parse().ok())
                .unwrap_or(first.frames);
            out.frames = end.min(first.frames).saturating_sub(start);
        }
        if let Some((_, rest)) = vf.split_once("scale=") {
            let dims = rest.split(',').next().unwrap_or(rest);
            if let Some((w, h)) = dims.split_once(':') {
                out.width = w.parse().unwrap_or(first.width);
                out.height = h.parse().unwrap_or(first.height);
            }
        }
    }

    if let Some(rate) = value_after(args, "-r").and_then(|r| r.parse::<f64>().ok())
        && rate > 0.0
    {
        out.frames = (first.duration() * rate).round() as u64;
        out.fps = rate;
    }
    out
}

impl Engine for ScriptedEngine {
    fn load(&mut self) -> Result<(), AppError> {
        let mut state = self.state.lock();
        if state.loaded {
            return Ok(());
        }
        state.load_count += 1;
        if let Some(from) = state.fail_loads_from
            && state.load_count >= from
        {
            return Err(AppError::FfmpegNotFound(
                "scripted engine failed to initialize".to_string(),
            ));
        }
        state.loaded = true;
        Ok(())
    }

    fn run(&mut self, args: &[String]) -> Result<(), AppError> {
        let (logger, inputs, fail, omit_stats) = {
            let mut state = self.state.lock();
            if !state.loaded {
                return Err(AppError::NotLoaded);
            }
            state.run_count += 1;
            state.commands.push(args.to_vec());
            let fail = state.fail_runs.contains(&state.run_count);
            let names: Vec<String> = args
                .iter()
                .enumerate()
                .filter(|(i, a)| *i > 0 && args[i - 1] == "-i" && !a.is_empty())
                .map(|(_, a)| a.clone())
                .collect();
            let inputs: Vec<(String, Option<Vec<u8>>)> = names
                .into_iter()
                .map(|n| {
                    let data = state.files.get(&n).cloned();
                    (n, data)
                })
                .collect();
            (state.logger.clone(), inputs, fail, state.omit_stats)
        };
        let emit = |line: &str| {
            if let Some(ref logger) = logger {
                logger(line);
            }
        };

        emit("ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers");
        if inputs.is_empty() {
            emit("At least one output file must be specified");
            return Err(AppError::ffmpeg_failed(1, "At least one output file must be specified"));
        }

        let mut media = Vec::with_capacity(inputs.len());
        for (index, (name, data)) in inputs.iter().enumerate() {
            let Some(data) = data else {
                let message = format!("{}: No such file or directory", name);
                emit(&message);
                return Err(AppError::ffmpeg_failed(1, message));
            };
            let Some(m) = FakeMedia::from_bytes(data) else {
                let message = format!("{}: Invalid data found when processing input", name);
                emit(&message);
                return Err(AppError::ffmpeg_failed(1, message));
            };
            emit(&format!(
                "Input #{}, mov,mp4,m4a,3gp,3g2,mj2, from '{}':",
                index, name
            ));
            emit(&format!(
                "  Duration: {}, start: 0.000000, bitrate: 1100 kb/s",
                hms(m.duration())
            ));
            for line in stream_lines(index, &m, true) {
                emit(&line);
            }
            media.push(m);
        }

        if fail {
            emit("Error while decoding stream #0:0: Invalid data found when processing input");
            emit("Conversion failed!");
            return Err(AppError::ffmpeg_failed(1, "Conversion failed!"));
        }

        let out = plan_output(args, &media);
        let output_name = args.last().cloned().unwrap_or_default();
        if output_name == "-" {
            emit("Output #0, null, to 'pipe:':");
        } else {
            emit(&format!("Output #0, mp4, to '{}':", output_name));
        }
        for line in stream_lines(0, &out, true) {
            emit(&line);
        }
        if !omit_stats {
            let half = out.frames / 2;
            emit(&format!(
                "frame={:>5} fps=0.0 q=-1.0 size=N/A time={} bitrate=N/A speed=20x",
                half,
                hms(half as f64 / out.fps.max(1.0))
            ));
            emit(&format!(
                "frame={:>5} fps=0.0 q=-1.0 Lsize=N/A time={} bitrate=N/A speed=20x",
                out.frames,
                hms(out.duration())
            ));
        }

        if output_name != "-" {
            self.state.lock().files.insert(output_name, out.to_bytes());
        }
        Ok(())
    }

    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<(), AppError> {
        let mut state = self.state.lock();
        if !state.loaded {
            return Err(AppError::NotLoaded);
        }
        state.files.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn read_file(&mut self, name: &str) -> Result<Vec<u8>, AppError> {
        let state = self.state.lock();
        if !state.loaded {
            return Err(AppError::NotLoaded);
        }
        state
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::MissingFile(name.to_string()))
    }

    fn set_logger(&mut self, logger: Option<LogCallback>) {
        self.state.lock().logger = logger;
    }

    fn exit(&mut self) {
        let mut state = self.state.lock();
        state.loaded = false;
        state.files.clear();
        state.exit_count += 1;
    }

    fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }
}
