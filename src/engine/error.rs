//! Short, user-facing summaries of engine failures.
//!
//! FFmpeg's exit status says little beyond "failed"; the useful part is the
//! last diagnostic line before the generic `Conversion failed!` trailer.

use serde::Serialize;

/// Exit code used when the binary could not be started at all.
pub const SPAWN_FAILURE_CODE: i32 = -1;

const SUMMARY_MAX_CHARS: usize = 120;
const GENERIC_TRAILER: &str = "Conversion failed!";
const ELLIPSIS: &str = "…";

/// Payload for job-error events. Frontend shows summary; detail is expandable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

/// Summarize a failure from its log text. The full log stays in `detail`.
pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(SPAWN_FAILURE_CODE) => "FFmpeg not found or failed to start.".to_string(),
        code => match diagnostic_line(stderr) {
            Some(line) => truncate(line, SUMMARY_MAX_CHARS),
            None => match code {
                Some(code) => format!("FFmpeg failed (exit code {}).", code),
                None => "FFmpeg failed.".to_string(),
            },
        },
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

/// Last line that says what went wrong: not a stats line, not a trailer.
fn diagnostic_line(log: &str) -> Option<&str> {
    log.lines()
        .rev()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .find(|l| !l.starts_with("frame=") && *l != GENERIC_TRAILER)
}

fn truncate(line: &str, max_len: usize) -> String {
    if line.len() <= max_len {
        return line.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &line[..cut], ELLIPSIS)
}

/// Last `max_lines` non-empty lines of an engine log, oldest first.
pub fn log_tail(log: &str, max_lines: usize) -> String {
    let mut tail: Vec<&str> = log
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(max_lines)
        .collect();
    tail.reverse();
    tail.join("\n")
}
