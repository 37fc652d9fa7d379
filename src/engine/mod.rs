//! Transcoding engine collaborator and the session that owns it.
//!
//! The engine is a black box driven with argument lists and a private
//! filesystem. Everything the pipeline learns about media comes back as
//! free-form log text, which `crate::probe` turns into structured data.

pub mod discovery;
mod error;
pub mod ffprobe;
mod process;
mod progress;
mod session;

use std::sync::Arc;

use crate::error::AppError;

pub use error::{FfmpegErrorPayload, log_tail, parse_ffmpeg_error};
pub use process::ProcessEngine;
pub use progress::{ProgressTracker, parse_ffmpeg_progress};
pub use session::{EngineSession, Invocation, SessionState};

/// Receives every log line the engine emits during one invocation.
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives normalized progress in [0,1] for the running invocation.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Receives batch-level progress with a human-readable step.
pub type ProgressEmitter = Arc<dyn Fn(FfmpegProgressPayload) + Send + Sync>;

/// Progress payload for job-progress events.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegProgressPayload {
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// The transcoding engine contract. Implementations keep their own virtual
/// filesystem, which is only valid between `load` and `exit`.
pub trait Engine: Send {
    /// Initialize the engine. Calling it on a loaded engine is a no-op.
    fn load(&mut self) -> Result<(), AppError>;

    /// Execute one command. Blocks until the engine finishes.
    fn run(&mut self, args: &[String]) -> Result<(), AppError>;

    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<(), AppError>;

    fn read_file(&mut self, name: &str) -> Result<Vec<u8>, AppError>;

    /// Replace the log subscriber. `None` detaches it.
    fn set_logger(&mut self, logger: Option<LogCallback>);

    /// Tear down the engine and its filesystem.
    fn exit(&mut self);

    fn is_loaded(&self) -> bool;
}

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
