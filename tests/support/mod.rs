#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use scute_core::config::PipelineOptions;
use scute_core::engine::ffprobe::QuickMetadata;
use scute_core::pipeline::Pipeline;
use scute_core::test_support::{FakeMedia, ScriptedEngine};

fn no_quick_metadata(_: &Path) -> QuickMetadata {
    QuickMetadata::default()
}

/// Scratch directory plus a pipeline driven by the scripted engine.
pub struct ScriptedEnv {
    dir: tempfile::TempDir,
    pub engine: ScriptedEngine,
    pub pipeline: Pipeline<ScriptedEngine>,
}

impl ScriptedEnv {
    pub fn new() -> Self {
        Self::with_options(PipelineOptions::default())
    }

    pub fn with_options(options: PipelineOptions) -> Self {
        let engine = ScriptedEngine::new();
        let mut pipeline =
            Pipeline::new(engine.clone(), options).with_quick_metadata(no_quick_metadata);
        pipeline.start().expect("engine load");
        let dir = tempfile::tempdir().expect("tempdir");
        Self {
            dir,
            engine,
            pipeline,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn with_clip(&self, name: &str, media: FakeMedia) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, media.to_bytes()).expect("write clip");
        path
    }

    /// Add and probe clips in one go.
    pub fn load_clips(&mut self, clips: &[(&str, FakeMedia)]) {
        let paths: Vec<PathBuf> = clips
            .iter()
            .map(|(name, media)| self.with_clip(name, media.clone()))
            .collect();
        let report = self.pipeline.add_files(&paths).expect("add files");
        assert_eq!(report.added.len(), clips.len(), "intake: {:?}", report);
        self.pipeline.probe_pending().expect("probe");
    }

    /// Commands issued since `from` (an earlier `engine.run_count()`).
    pub fn commands_since(&self, from: usize) -> Vec<String> {
        self.engine
            .commands()
            .into_iter()
            .skip(from)
            .map(|args| args.join(" "))
            .collect()
    }
}

/// Real FFmpeg environment, or `None` when no binary can be found.
pub struct FfmpegEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

impl FfmpegEnv {
    pub fn try_new() -> Option<Self> {
        let ffmpeg = match scute_core::engine::discovery::get_ffmpeg_path() {
            Ok(path) => path.to_path_buf(),
            Err(e) => {
                eprintln!("skipping: {}", e);
                return None;
            }
        };
        let dir = tempfile::tempdir().expect("tempdir");
        Some(Self { ffmpeg, dir })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn with_test_video(&self, name: &str, frames: u32, size: &str, rate: u32, audio: bool) -> PathBuf {
        let output_path = self.path(name);
        let status = create_test_video(&self.ffmpeg, &output_path, frames, size, rate, audio)
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}

pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    frames: u32,
    size: &str,
    rate: u32,
    audio: bool,
) -> std::io::Result<ExitStatus> {
    let duration = frames as f64 / rate as f64;
    let mut args: Vec<String> = vec![
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        format!("testsrc=duration={}:size={}:rate={}", duration, size, rate),
    ];
    if audio {
        args.extend([
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!("sine=frequency=440:duration={}", duration),
            "-c:a".into(),
            "aac".into(),
            "-shortest".into(),
        ]);
    }
    args.extend([
        "-frames:v".into(),
        frames.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        output_path.to_string_lossy().to_string(),
    ]);
    Command::new(ffmpeg)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}
