//! App error type for the pipeline and sidecar commands. Implements Display and Serialize for the frontend.

use crate::engine::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Engine is not loaded")]
    NotLoaded,

    #[error("Engine session faulted; restart the session to continue")]
    SessionFaulted,

    #[error("Another operation is already running")]
    Busy,

    #[error("{name}: {reason}")]
    Unprocessable { name: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File not found in engine filesystem: {0}")]
    MissingFile(String),

    /// A non-engine failure inside a multi-step operation, with the log tail.
    #[error("{stage} failed: {source}\n{log_tail}")]
    StageFailed {
        stage: String,
        source: Box<AppError>,
        log_tail: String,
    },
}

impl AppError {
    pub fn ffmpeg_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            code,
            stderr: stderr.into(),
        }
    }

    pub fn unprocessable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unprocessable {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for failures that leave the engine session unusable until restarted.
    pub fn is_session_fault(&self) -> bool {
        matches!(self, AppError::SessionFaulted | AppError::NotLoaded)
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::FfmpegFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::FfmpegFailed {
            code: -1,
            stderr: s,
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_string_is_spawn_failure() {
        let e = AppError::from("some error message");
        match &e {
            AppError::FfmpegFailed { code, stderr } => {
                assert_eq!(*code, -1);
                assert_eq!(stderr, "some error message");
            }
            _ => panic!("expected FfmpegFailed"),
        }
    }

    #[test]
    fn unprocessable_display_names_clip() {
        let e = AppError::unprocessable("a.mp4", "only 2 frames");
        assert_eq!(e.to_string(), "a.mp4: only 2 frames");
    }

    #[test]
    fn session_fault_classification() {
        assert!(AppError::SessionFaulted.is_session_fault());
        assert!(AppError::NotLoaded.is_session_fault());
        assert!(!AppError::Busy.is_session_fault());
        assert!(!AppError::ffmpeg_failed(1, "x").is_session_fault());
    }

    #[test]
    fn ffmpeg_failure_serializes_summary_and_detail() {
        let e = AppError::ffmpeg_failed(1, "Invalid data found when processing input");
        let json = serde_json::to_string(&e).expect("serialize");
        assert!(json.contains("summary"), "unexpected: {}", json);
        assert!(json.contains("Invalid data found"), "unexpected: {}", json);
    }
}
