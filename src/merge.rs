//! Concatenation of cut results in merge order.
//!
//! The first entry fixes the target spec (rounded frame rate, resolution).
//! Entries that differ get re-encoded to it first, one engine invocation
//! each, then everything goes through a single `concat` filter run. Audio is
//! all-or-nothing: one silent entry makes the whole output silent.

use std::sync::Arc;

use serde::Serialize;

use crate::config::EncodeSettings;
use crate::engine::{Engine, EngineSession, FfmpegProgressPayload, ProgressCallback, ProgressEmitter};
use crate::error::AppError;
use crate::model::{ClipSpec, CutResult};
use crate::probe::last_frame_count;

pub const MIN_MERGE_ENTRIES: usize = 2;
pub const MERGED_FILE_NAME: &str = "merged.mp4";

const NORMALIZE_INPUT: &str = "norm_in.mp4";
const NORMALIZE_OUTPUT: &str = "norm_out.mp4";
/// Share of merge progress spent on normalization; concat takes the rest.
const NORMALIZE_PROGRESS_SHARE: f64 = 0.4;
const CONCAT_PROGRESS_START: f64 = 0.5;
const MERGE_LOG_TAIL_LINES: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePlan {
    /// Frame rate here is the first entry's, rounded.
    pub target: ClipSpec,
    pub with_audio: bool,
    /// Per entry, in merge order.
    pub normalize: Vec<bool>,
    /// Sum of the entries' reported frame counts.
    pub declared_frames: u64,
    pub warnings: Vec<String>,
}

impl MergePlan {
    pub fn normalize_count(&self) -> usize {
        self.normalize.iter().filter(|&&n| n).count()
    }
}

/// Non-fatal spec differences against the first entry, one line per issue.
pub fn validate_merge(entries: &[&CutResult]) -> Vec<String> {
    let Some((first, rest)) = entries.split_first() else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    for entry in rest {
        if entry.width() != first.width() || entry.height() != first.height() {
            issues.push(format!(
                "{}: {}x{} (expected {}x{})",
                entry.name(),
                entry.width(),
                entry.height(),
                first.width(),
                first.height()
            ));
        }
        if entry.frame_rate() != first.frame_rate() {
            issues.push(format!(
                "{}: {}fps (expected {}fps)",
                entry.name(),
                entry.frame_rate(),
                first.frame_rate()
            ));
        }
    }
    issues
}

pub fn plan_merge(entries: &[&CutResult]) -> Result<MergePlan, AppError> {
    if entries.len() < MIN_MERGE_ENTRIES {
        return Err(AppError::InvalidInput(format!(
            "merge needs at least {} clips, got {}",
            MIN_MERGE_ENTRIES,
            entries.len()
        )));
    }
    let first = entries[0].spec();
    let target = ClipSpec {
        frame_rate: first.rounded_rate() as f64,
        ..first
    };
    Ok(MergePlan {
        target,
        with_audio: entries.iter().all(|e| e.has_audio()),
        normalize: entries
            .iter()
            .map(|e| e.spec().needs_normalization_to(&target))
            .collect(),
        declared_frames: entries.iter().map(|e| e.frame_count()).sum(),
        warnings: validate_merge(entries),
    })
}

pub fn build_normalize_args(target: &ClipSpec, with_audio: bool, settings: &EncodeSettings) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        NORMALIZE_INPUT.to_string(),
        "-vf".to_string(),
        format!(
            "scale={}:{},format={}",
            target.width, target.height, settings.pixel_format
        ),
    ];
    args.extend(settings.video_codec_args());
    args.push("-r".to_string());
    args.push(target.rounded_rate().to_string());
    args.push("-pix_fmt".to_string());
    args.push(settings.pixel_format.clone());
    if with_audio {
        args.extend(settings.aac_args());
    } else {
        args.push("-an".to_string());
    }
    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.push(NORMALIZE_OUTPUT.to_string());
    args
}

/// `[0:v][0:a][1:v][1:a]...concat=n=N:v=1:a=1[outv][outa]`, or video-only.
pub fn build_concat_filter(count: usize, with_audio: bool) -> String {
    let streams: String = (0..count)
        .map(|i| {
            if with_audio {
                format!("[{i}:v][{i}:a]")
            } else {
                format!("[{i}:v]")
            }
        })
        .collect();
    if with_audio {
        format!("{streams}concat=n={count}:v=1:a=1[outv][outa]")
    } else {
        format!("{streams}concat=n={count}:v=1:a=0[outv]")
    }
}

pub fn concat_input_name(index: usize) -> String {
    format!("merge_{}.mp4", index)
}

pub fn build_concat_args(count: usize, with_audio: bool, settings: &EncodeSettings) -> Vec<String> {
    let mut args = Vec::with_capacity(count * 2 + 20);
    for i in 0..count {
        args.push("-i".to_string());
        args.push(concat_input_name(i));
    }
    args.push("-filter_complex".to_string());
    args.push(build_concat_filter(count, with_audio));
    args.push("-map".to_string());
    args.push("[outv]".to_string());
    if with_audio {
        args.push("-map".to_string());
        args.push("[outa]".to_string());
        args.extend(settings.aac_args());
    }
    args.extend(settings.video_codec_args());
    args.extend(settings.container_args());
    args.push(MERGED_FILE_NAME.to_string());
    args
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutput {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub plan: MergePlan,
    /// Frame count the concat run reported, when parseable.
    pub reported_frames: Option<u64>,
    pub summary: MergeSummary,
}

fn emit(progress: Option<&ProgressEmitter>, value: f64, step: &str) {
    if let Some(emitter) = progress {
        emitter(FfmpegProgressPayload {
            progress: value,
            step: Some(step.to_string()),
        });
    }
}

fn scaled_callback(progress: Option<&ProgressEmitter>, start: f64, span: f64, step: String) -> Option<ProgressCallback> {
    progress.cloned().map(|emitter| {
        Arc::new(move |p: f64| {
            emitter(FfmpegProgressPayload {
                progress: start + p * span,
                step: Some(step.clone()),
            })
        }) as ProgressCallback
    })
}

fn with_log_tail<E: Engine>(session: &EngineSession<E>, stage: &str, err: AppError) -> AppError {
    log::error!(target: "scute::merge", "{} failed: {}", stage, err);
    attach_log_tail(stage, err, &session.last_log_tail(MERGE_LOG_TAIL_LINES))
}

/// Append the engine's log tail to a failure without changing its kind.
fn attach_log_tail(stage: &str, err: AppError, tail: &str) -> AppError {
    if tail.is_empty() {
        return err;
    }
    match err {
        AppError::FfmpegFailed { code, stderr } => {
            AppError::ffmpeg_failed(code, format!("{}\n{}", stderr, tail))
        }
        other if other.is_session_fault() => other,
        other => AppError::StageFailed {
            stage: stage.to_string(),
            source: Box::new(other),
            log_tail: tail.to_string(),
        },
    }
}

/// Run the whole merge. Any failure aborts it; there is no partial output.
pub fn execute_merge<E: Engine>(
    session: &mut EngineSession<E>,
    entries: &[&CutResult],
    settings: &EncodeSettings,
    progress: Option<ProgressEmitter>,
) -> Result<MergeOutput, AppError> {
    let plan = plan_merge(entries)?;
    for warning in &plan.warnings {
        log::warn!(target: "scute::merge", "spec mismatch: {}", warning);
    }
    let count = entries.len();
    let mut inputs: Vec<Vec<u8>> = Vec::with_capacity(count);

    for (i, entry) in entries.iter().enumerate() {
        let step = format!("Preparing {}/{}...", i + 1, count);
        let base = i as f64 / count as f64 * NORMALIZE_PROGRESS_SHARE;
        emit(progress.as_ref(), base, &step);
        if !plan.normalize[i] {
            inputs.push(entry.data().to_vec());
            continue;
        }

        log::info!(
            target: "scute::merge",
            "Normalizing clip {}: {}fps {}x{} -> {}fps {}x{}",
            i,
            entry.frame_rate(),
            entry.width(),
            entry.height(),
            plan.target.rounded_rate(),
            plan.target.width,
            plan.target.height
        );
        let args = build_normalize_args(&plan.target, plan.with_audio, settings);
        log::debug!(target: "scute::merge", "normalize args: {}", args.join(" "));
        session.set_progress_callback(scaled_callback(
            progress.as_ref(),
            base,
            NORMALIZE_PROGRESS_SHARE / count as f64,
            step,
        ));
        let normalized = session.invoke(|inv| {
            inv.write_file(NORMALIZE_INPUT, entry.data())?;
            inv.run(&args)?;
            inv.read_file(NORMALIZE_OUTPUT)
        });
        session.set_progress_callback(None);
        let normalized = normalized.map_err(|e| with_log_tail(session, "Normalization", e))?;
        log::info!(target: "scute::merge", "Normalized clip {}: {} bytes", i, normalized.len());
        inputs.push(normalized);
    }

    let args = build_concat_args(count, plan.with_audio, settings);
    log::debug!(target: "scute::merge", "concat args: {}", args.join(" "));
    emit(progress.as_ref(), CONCAT_PROGRESS_START, "Merging...");
    session.set_progress_callback(scaled_callback(
        progress.as_ref(),
        CONCAT_PROGRESS_START,
        1.0 - CONCAT_PROGRESS_START,
        "Merging...".to_string(),
    ));
    let merged = session.invoke(|inv| {
        for (i, data) in inputs.iter().enumerate() {
            inv.write_file(&concat_input_name(i), data)?;
        }
        inv.run(&args)?;
        let log = inv.log();
        let data = inv.read_file(MERGED_FILE_NAME)?;
        Ok((data, log))
    });
    session.set_progress_callback(None);
    let (data, log) = merged.map_err(|e| with_log_tail(session, "Merge", e))?;

    let reported_frames = last_frame_count(&log);
    let summary = MergeSummary::new(count, plan.declared_frames, entries[0].frame_rate());
    log::info!(
        target: "scute::merge",
        "Merged {} clips: {} bytes, {} declared frames",
        count,
        data.len(),
        plan.declared_frames
    );
    emit(progress.as_ref(), 1.0, "Merge complete");
    Ok(MergeOutput {
        data,
        plan,
        reported_frames,
        summary,
    })
}

/// Human-facing totals for a merge order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub clips: usize,
    pub total_frames: u64,
    pub duration_seconds: f64,
    pub duration_text: String,
}

impl MergeSummary {
    /// Duration is total frames at the first entry's frame rate.
    pub fn new(clips: usize, total_frames: u64, first_frame_rate: f64) -> Self {
        let duration_seconds = if first_frame_rate > 0.0 {
            total_frames as f64 / first_frame_rate
        } else {
            0.0
        };
        Self {
            clips,
            total_frames,
            duration_seconds,
            duration_text: format_duration(duration_seconds),
        }
    }

    pub fn for_entries(entries: &[&CutResult]) -> Self {
        let first_rate = entries.first().map(|e| e.frame_rate()).unwrap_or(0.0);
        Self::new(
            entries.len(),
            entries.iter().map(|e| e.frame_count()).sum(),
            first_rate,
        )
    }
}

/// `Xm Y.Ys` from one minute up, else `Y.Ys`.
pub fn format_duration(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor();
    let rest = seconds - minutes * 60.0;
    if minutes > 0.0 {
        format!("{}m {:.1}s", minutes as u64, rest)
    } else {
        format!("{:.1}s", rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, fps: f64, w: u32, h: u32, frames: u64, audio: bool) -> CutResult {
        CutResult::new(name, vec![1, 2, 3], w, h, fps, frames, audio)
    }

    #[test]
    fn log_tail_keeps_the_failure_kind() {
        let tail = "Output #0, mp4, to 'merged.mp4':\nframe=   10 fps=0.0";
        let missing = attach_log_tail(
            "Merge",
            AppError::MissingFile(MERGED_FILE_NAME.to_string()),
            tail,
        );
        match &missing {
            AppError::StageFailed { stage, source, log_tail } => {
                assert_eq!(stage, "Merge");
                assert!(matches!(**source, AppError::MissingFile(_)));
                assert_eq!(log_tail, tail);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let json = serde_json::to_string(&missing).expect("serialize");
        assert!(json.contains("merged.mp4"), "unexpected: {}", json);
        assert!(!json.contains("not found or failed to start"), "unexpected: {}", json);

        let engine = attach_log_tail("Merge", AppError::ffmpeg_failed(1, "Conversion failed!"), tail);
        assert!(matches!(engine, AppError::FfmpegFailed { code: 1, .. }));
        assert!(matches!(
            attach_log_tail("Merge", AppError::SessionFaulted, tail),
            AppError::SessionFaulted
        ));
    }

    #[test]
    fn needs_two_entries() {
        let a = result("a", 30.0, 640, 360, 10, false);
        assert!(matches!(plan_merge(&[&a]), Err(AppError::InvalidInput(_))));
        assert!(matches!(plan_merge(&[]), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn mismatched_entry_is_flagged_and_normalized() {
        let a = result("A_cut.mp4", 30.0, 1920, 1080, 98, true);
        let b = result("B_cut.mp4", 30.0, 1920, 1080, 48, true);
        let c = result("C_cut.mp4", 60.0, 1280, 720, 48, true);
        let plan = plan_merge(&[&a, &b, &c]).expect("plan");
        assert_eq!(plan.normalize, vec![false, false, true]);
        assert_eq!(plan.declared_frames, 194);
        assert!(plan.with_audio);
        assert_eq!(
            plan.warnings,
            vec![
                "C_cut.mp4: 1280x720 (expected 1920x1080)".to_string(),
                "C_cut.mp4: 60fps (expected 30fps)".to_string(),
            ]
        );
    }

    #[test]
    fn near_rate_warns_but_does_not_normalize() {
        let a = result("a", 30.0, 640, 360, 10, false);
        let b = result("b", 29.97, 640, 360, 10, false);
        let plan = plan_merge(&[&a, &b]).expect("plan");
        assert_eq!(plan.normalize, vec![false, false]);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn one_silent_entry_silences_the_merge() {
        let a = result("a", 30.0, 640, 360, 10, true);
        let b = result("b", 30.0, 640, 360, 10, false);
        assert!(!plan_merge(&[&a, &b]).expect("plan").with_audio);
    }

    #[test]
    fn concat_filter_interleaves_audio() {
        assert_eq!(
            build_concat_filter(3, true),
            "[0:v][0:a][1:v][1:a][2:v][2:a]concat=n=3:v=1:a=1[outv][outa]"
        );
        assert_eq!(
            build_concat_filter(2, false),
            "[0:v][1:v]concat=n=2:v=1:a=0[outv]"
        );
    }

    #[test]
    fn concat_args() {
        let args = build_concat_args(2, true, &EncodeSettings::default());
        assert_eq!(
            args.join(" "),
            "-i merge_0.mp4 -i merge_1.mp4 -filter_complex [0:v][0:a][1:v][1:a]concat=n=2:v=1:a=1[outv][outa] \
             -map [outv] -map [outa] -c:a aac -b:a 128k -c:v libx264 -preset ultrafast -crf 23 \
             -pix_fmt yuv420p -movflags +faststart merged.mp4"
        );
    }

    #[test]
    fn normalize_args() {
        let target = ClipSpec { frame_rate: 30.0, width: 1920, height: 1080 };
        let args = build_normalize_args(&target, false, &EncodeSettings::default());
        assert_eq!(
            args.join(" "),
            "-i norm_in.mp4 -vf scale=1920:1080,format=yuv420p -c:v libx264 -preset ultrafast -crf 23 \
             -r 30 -pix_fmt yuv420p -an -movflags +faststart norm_out.mp4"
        );
    }

    #[test]
    fn summary_formatting() {
        assert_eq!(format_duration(3.34), "3.3s");
        assert_eq!(format_duration(75.5), "1m 15.5s");
        let summary = MergeSummary::new(3, 194, 30.0);
        assert_eq!(summary.duration_text, "6.5s");
    }
}
