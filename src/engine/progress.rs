use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

use super::ProgressCallback;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+):(\d+):([\d.]+)").expect("invalid time regex"));

/// Minimum interval between progress emits.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);

fn hms_to_seconds(h: &str, m: &str, s: &str) -> f64 {
    let hours: f64 = h.parse().unwrap_or(0.0);
    let minutes: f64 = m.parse().unwrap_or(0.0);
    let seconds: f64 = s.parse().unwrap_or(0.0);
    hours * 3600.0 + minutes * 60.0 + seconds
}

/// Parse one engine log line. Returns (progress 0.0-1.0 or None, input duration announced on this line or None).
///
/// `total_duration` is the summed duration of every input seen so far; a
/// concat run announces one `Duration:` per input.
pub fn parse_ffmpeg_progress(line: &str, total_duration: Option<f64>) -> (Option<f64>, Option<f64>) {
    if let Some(caps) = DURATION_RE.captures(line) {
        return (None, Some(hms_to_seconds(&caps[1], &caps[2], &caps[3])));
    }

    if let Some(caps) = TIME_RE.captures(line)
        && let Some(dur) = total_duration
        && dur > 0.0
    {
        let current = hms_to_seconds(&caps[1], &caps[2], &caps[3]);
        return (Some((current / dur).clamp(0.0, 1.0)), None);
    }

    (None, None)
}

/// Turns a stream of log lines into throttled progress callbacks.
pub struct ProgressTracker {
    total_duration: Option<f64>,
    last_emit: Instant,
    last_progress: f64,
    callback: ProgressCallback,
}

impl ProgressTracker {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            total_duration: None,
            last_emit: Instant::now(),
            last_progress: 0.0,
            callback,
        }
    }

    pub fn observe(&mut self, line: &str) {
        let (progress, duration) = parse_ffmpeg_progress(line, self.total_duration);
        if let Some(d) = duration {
            self.total_duration = Some(self.total_duration.unwrap_or(0.0) + d);
        }
        let Some(p) = progress else { return };
        let now = Instant::now();
        let should_emit = now.duration_since(self.last_emit) >= PROGRESS_EMIT_INTERVAL
            || (p - self.last_progress).abs() >= 0.01
            || p >= 1.0;
        if should_emit {
            self.last_emit = now;
            self.last_progress = p;
            (self.callback)(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn duration_parsed() {
        let (prog, dur) = parse_ffmpeg_progress("  Duration: 00:01:30.50, start: 0.000000", None);
        assert_eq!(prog, None);
        assert_eq!(dur, Some(90.5));
    }

    #[test]
    fn stats_line_progress() {
        let line = "frame=  150 fps=0.0 q=-1.0 size=N/A time=00:00:05.00 bitrate=N/A speed=10x";
        let (prog, dur) = parse_ffmpeg_progress(line, Some(10.0));
        assert_eq!(prog, Some(0.5));
        assert_eq!(dur, None);
    }

    #[test]
    fn stats_line_without_duration_is_ignored() {
        let line = "frame=  150 time=00:00:05.00";
        assert_eq!(parse_ffmpeg_progress(line, None), (None, None));
    }

    #[test]
    fn progress_is_capped_at_one() {
        let (prog, _) = parse_ffmpeg_progress("time=00:00:12.00", Some(10.0));
        assert_eq!(prog, Some(1.0));
    }

    #[test]
    fn tracker_sums_input_durations() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut tracker = ProgressTracker::new(Arc::new(move |p| sink.lock().push(p)));
        tracker.observe("  Duration: 00:00:04.00, start: 0.000000");
        tracker.observe("  Duration: 00:00:06.00, start: 0.000000");
        tracker.observe("frame=   10 time=00:00:05.00 speed=1x");
        tracker.observe("frame=   20 time=00:00:10.00 speed=1x");
        assert_eq!(*seen.lock(), vec![0.5, 1.0]);
    }
}
