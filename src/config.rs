use serde::Deserialize;

use crate::memory::DEFAULT_MEMORY_CEILING_BYTES;

/// Maximum number of clips tracked at once.
pub const DEFAULT_MAX_FILES: usize = 50;

const DEFAULT_CRF: u32 = 23;
const DEFAULT_PRESET: &str = "ultrafast";
const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 128;
const MIN_AUDIO_BITRATE_KBPS: u32 = 64;
const MAX_AUDIO_BITRATE_KBPS: u32 = 320;

/// Caller-tunable pipeline settings. Every field is optional; the
/// `effective_*` accessors supply defaults.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOptions {
    /// Keep (trimmed) audio in cuts when the source has it. Default true.
    pub include_audio: Option<bool>,
    pub max_files: Option<usize>,
    pub memory_ceiling_bytes: Option<u64>,
    pub crf: Option<u32>,
    pub preset: Option<String>,
    /// AAC bitrate for normalized and merged audio, in kbps. Default 128.
    pub audio_bitrate_kbps: Option<u32>,
    pub pixel_format: Option<String>,
}

impl PipelineOptions {
    pub fn effective_include_audio(&self) -> bool {
        self.include_audio.unwrap_or(true)
    }

    pub fn effective_max_files(&self) -> usize {
        self.max_files.unwrap_or(DEFAULT_MAX_FILES).max(1)
    }

    pub fn effective_memory_ceiling_bytes(&self) -> u64 {
        self.memory_ceiling_bytes
            .unwrap_or(DEFAULT_MEMORY_CEILING_BYTES)
    }

    pub fn effective_crf(&self) -> u32 {
        self.crf.unwrap_or(DEFAULT_CRF).min(51)
    }

    pub fn effective_preset(&self) -> &str {
        self.preset.as_deref().unwrap_or(DEFAULT_PRESET)
    }

    pub fn effective_audio_bitrate_kbps(&self) -> u32 {
        self.audio_bitrate_kbps
            .unwrap_or(DEFAULT_AUDIO_BITRATE_KBPS)
            .clamp(MIN_AUDIO_BITRATE_KBPS, MAX_AUDIO_BITRATE_KBPS)
    }

    pub fn effective_pixel_format(&self) -> &str {
        self.pixel_format.as_deref().unwrap_or(DEFAULT_PIXEL_FORMAT)
    }

    pub fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            crf: self.effective_crf(),
            preset: self.effective_preset().to_string(),
            pixel_format: self.effective_pixel_format().to_string(),
            audio_bitrate_kbps: self.effective_audio_bitrate_kbps(),
        }
    }
}

/// Fixed encoder parameters shared by cut, normalize and concat commands so
/// every output stays concat-compatible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub crf: u32,
    pub preset: String,
    pub pixel_format: String,
    pub audio_bitrate_kbps: u32,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        PipelineOptions::default().encode_settings()
    }
}

impl EncodeSettings {
    /// `-c:v libx264 -preset P -crf C`
    pub fn video_codec_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
        ]
    }

    /// `-pix_fmt F -movflags +faststart`
    pub fn container_args(&self) -> Vec<String> {
        vec![
            "-pix_fmt".to_string(),
            self.pixel_format.clone(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]
    }

    pub fn aac_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", self.audio_bitrate_kbps),
        ]
    }
}
