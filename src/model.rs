//! Clips tracked by the pipeline.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::engine::ffprobe::QuickMetadata;
use crate::probe::{INTERPOLATION_WARNING_FPS, ProbeReport};

const HEAVY_FILE_BYTES: u64 = 10 * 1024 * 1024;
const HEAVY_FRAME_RATE: f64 = 30.0;

/// One uploaded source file and what is known about it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceClip {
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub total_frames: u64,
    pub duration_seconds: f64,
    pub has_audio_stream: bool,
    /// Metadata came from the engine probe rather than the quick estimate.
    pub probed: bool,
    /// A cut was produced or permanently given up on.
    pub cut: bool,
    pub fps_warning: bool,
}

impl SourceClip {
    pub fn new(path: impl Into<PathBuf>, byte_size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self {
            name,
            path,
            byte_size,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            total_frames: 0,
            duration_seconds: 0.0,
            has_audio_stream: false,
            probed: false,
            cut: false,
            fps_warning: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn apply_quick_metadata(&mut self, meta: &QuickMetadata) {
        self.width = meta.width;
        self.height = meta.height;
        self.duration_seconds = meta.duration;
        self.frame_rate = meta.fps;
        self.total_frames = meta.total_frames();
    }

    /// Overlay engine-probed values.
    ///
    /// The probed rate always replaces the estimate, even when it is 0
    /// (unknown), so a clip is never cut at a guessed rate. With a known rate,
    /// frames and duration are kept consistent: duration follows probed
    /// frames, or frames follow the estimated duration when no count was found.
    pub fn apply_probe(&mut self, report: &ProbeReport) {
        self.probed = true;
        self.frame_rate = report.frame_rate;
        if report.total_frames > 0 {
            self.total_frames = report.total_frames;
        }
        if report.width > 0 && report.height > 0 {
            self.width = report.width;
            self.height = report.height;
        }
        if self.frame_rate > 0.0 {
            if report.total_frames > 0 {
                self.duration_seconds = report.total_frames as f64 / self.frame_rate;
            } else {
                self.total_frames = (self.duration_seconds * self.frame_rate).round() as u64;
            }
        }
        self.has_audio_stream = report.has_audio_stream;
        self.fps_warning = self.frame_rate > INTERPOLATION_WARNING_FPS;
    }

    /// Large or high-rate files take noticeably longer to cut.
    pub fn is_heavy(&self) -> bool {
        self.byte_size > HEAVY_FILE_BYTES || self.frame_rate > HEAVY_FRAME_RATE
    }

    /// Same file already tracked: equal name and byte size.
    pub fn is_same_file(&self, name: &str, byte_size: u64) -> bool {
        self.name == name && self.byte_size == byte_size
    }

    /// File name with the extension replaced by `_cut.mp4`.
    pub fn cut_name(&self) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone());
        format!("{}_cut.mp4", stem)
    }
}

/// Encoded output of one successful cut. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CutResult {
    name: String,
    #[serde(skip)]
    data: Vec<u8>,
    byte_size: u64,
    width: u32,
    height: u32,
    frame_rate: f64,
    frame_count: u64,
    has_audio: bool,
}

impl CutResult {
    pub fn new(
        name: impl Into<String>,
        data: Vec<u8>,
        width: u32,
        height: u32,
        frame_rate: f64,
        frame_count: u64,
        has_audio: bool,
    ) -> Self {
        Self {
            name: name.into(),
            byte_size: data.len() as u64,
            data,
            width,
            height,
            frame_rate,
            frame_count,
            has_audio,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    pub fn spec(&self) -> ClipSpec {
        ClipSpec {
            frame_rate: self.frame_rate,
            width: self.width,
            height: self.height,
        }
    }
}

/// Stream properties clips must share to be concatenated without normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipSpec {
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
}

impl ClipSpec {
    pub fn rounded_rate(&self) -> u32 {
        self.frame_rate.round().max(0.0) as u32
    }

    /// Needs re-encoding to match `target`: rounded rate or resolution differ.
    pub fn needs_normalization_to(&self, target: &ClipSpec) -> bool {
        self.rounded_rate() != target.rounded_rate()
            || self.width != target.width
            || self.height != target.height
    }
}
