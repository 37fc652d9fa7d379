//! Frame-accurate trim: drop exactly the first and last frame of each clip.
//!
//! Video keeps frames `[1, N-2]` via `trim=start_frame=1:end_frame=N-1`
//! (end is exclusive). Audio, when kept, is clipped to the same wall-clock
//! span: `[1/fps, N/fps - 1/fps]`.

use std::sync::Arc;

use serde::Serialize;

use crate::config::{EncodeSettings, PipelineOptions};
use crate::engine::{Engine, EngineSession, FfmpegProgressPayload, ProgressEmitter, SessionState};
use crate::error::AppError;
use crate::memory::{estimate_peak_bytes, format_gib, is_at_risk};
use crate::model::{CutResult, SourceClip};
use crate::probe::{last_frame_count, output_has_audio};

/// Fewer frames than this leave nothing after trimming both ends.
pub const MIN_CUTTABLE_FRAMES: u64 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct CutPlan {
    pub input_name: String,
    pub output_name: String,
    /// Exclusive end frame for the trim filter.
    pub end_frame: u64,
    pub retained_frames: u64,
    /// `(start, end)` seconds, present only when audio is kept.
    pub audio_window: Option<(f64, f64)>,
}

/// Refuse clips whose metadata cannot support a trim.
pub fn check_cuttable(clip: &SourceClip) -> Result<(), AppError> {
    if !clip.probed {
        return Err(AppError::unprocessable(&clip.name, "not probed"));
    }
    if clip.total_frames < MIN_CUTTABLE_FRAMES {
        return Err(AppError::unprocessable(
            &clip.name,
            format!("only {} frames, need at least {}", clip.total_frames, MIN_CUTTABLE_FRAMES),
        ));
    }
    if clip.frame_rate <= 0.0 {
        return Err(AppError::unprocessable(&clip.name, "unknown frame rate"));
    }
    Ok(())
}

/// Audio span matching the retained video frames.
pub fn audio_window(total_frames: u64, frame_rate: f64) -> (f64, f64) {
    let frame_duration = 1.0 / frame_rate;
    let duration = total_frames as f64 / frame_rate;
    (frame_duration, duration - frame_duration)
}

pub fn plan_cut(clip: &SourceClip, position: usize, include_audio: bool) -> Result<CutPlan, AppError> {
    check_cuttable(clip)?;
    let keep_audio = include_audio && clip.has_audio_stream;
    Ok(CutPlan {
        input_name: format!("input_{}.mp4", position),
        output_name: format!("output_{}.mp4", position),
        end_frame: clip.total_frames - 1,
        retained_frames: clip.total_frames - 2,
        audio_window: keep_audio.then(|| audio_window(clip.total_frames, clip.frame_rate)),
    })
}

pub fn build_cut_args(plan: &CutPlan, settings: &EncodeSettings) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        plan.input_name.clone(),
        "-vf".to_string(),
        format!(
            "trim=start_frame=1:end_frame={},setpts=PTS-STARTPTS",
            plan.end_frame
        ),
    ];
    match plan.audio_window {
        Some((start, end)) => {
            args.push("-af".to_string());
            args.push(format!(
                "atrim=start={:.6}:end={:.6},asetpts=PTS-STARTPTS",
                start, end
            ));
        }
        None => args.push("-an".to_string()),
    }
    args.extend(settings.video_codec_args());
    args.extend(settings.container_args());
    args.push(plan.output_name.clone());
    args
}

/// Execute one planned cut in its own engine invocation.
pub fn run_cut<E: Engine>(
    session: &mut EngineSession<E>,
    clip: &SourceClip,
    source: &[u8],
    plan: &CutPlan,
    settings: &EncodeSettings,
) -> Result<CutResult, AppError> {
    let args = build_cut_args(plan, settings);
    log::debug!(target: "scute::cut", "cut args: {}", args.join(" "));

    let (data, log) = session.invoke(|inv| {
        inv.write_file(&plan.input_name, source)?;
        inv.run(&args)?;
        let log = inv.log();
        let data = inv.read_file(&plan.output_name)?;
        Ok((data, log))
    })?;

    let frame_count = last_frame_count(&log).unwrap_or(plan.retained_frames);
    let has_audio = plan.audio_window.is_some() && output_has_audio(&log);
    log::info!(
        target: "scute::cut",
        "{}: {} -> {} frames ({}fps){}",
        clip.name,
        clip.total_frames,
        frame_count,
        clip.frame_rate,
        if has_audio { " +audio" } else { "" }
    );

    Ok(CutResult::new(
        clip.cut_name(),
        data,
        clip.width,
        clip.height,
        clip.frame_rate,
        frame_count,
        has_audio,
    ))
}

/// Per-clip result of a batch cut.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CutOutcome {
    Cut {
        name: String,
        frames: u64,
        #[serde(rename = "hasAudio")]
        has_audio: bool,
    },
    /// Precondition failed; the clip is marked cut and never retried.
    Rejected { name: String, error: String },
    /// Likely to exceed the engine memory ceiling; left uncut for a later retry.
    Skipped { name: String, reason: String },
    /// The engine invocation failed; the clip stays uncut.
    Failed { name: String, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CutBatchReport {
    pub outcomes: Vec<CutOutcome>,
    /// The session faulted and the remaining clips were not attempted.
    pub aborted: bool,
}

impl CutBatchReport {
    pub fn cut_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, CutOutcome::Cut { .. }))
            .count()
    }
}

fn emit(progress: Option<&ProgressEmitter>, value: f64, step: &str) {
    if let Some(emitter) = progress {
        emitter(FfmpegProgressPayload {
            progress: value,
            step: Some(step.to_string()),
        });
    }
}

/// Cut every clip not yet marked cut, in order, one engine invocation each.
///
/// A failing clip is reported and the batch moves on; only a session fault
/// stops it. New results are appended to `results`.
pub fn cut_batch<E: Engine>(
    session: &mut EngineSession<E>,
    clips: &mut [SourceClip],
    results: &mut Vec<CutResult>,
    options: &PipelineOptions,
    progress: Option<ProgressEmitter>,
) -> CutBatchReport {
    let settings = options.encode_settings();
    let include_audio = options.effective_include_audio();
    let ceiling = options.effective_memory_ceiling_bytes();
    let pending: Vec<usize> = (0..clips.len()).filter(|&i| !clips[i].cut).collect();
    let total = pending.len();
    let mut report = CutBatchReport::default();

    for (position, &clip_index) in pending.iter().enumerate() {
        let clip = &mut clips[clip_index];
        let base = position as f64 / total as f64;

        if let Err(e) = check_cuttable(clip) {
            log::warn!(target: "scute::cut", "Skipping {}: {}", clip.name, e);
            emit(progress.as_ref(), base, &format!("Cut error: {}", clip.name));
            clip.cut = true;
            report.outcomes.push(CutOutcome::Rejected {
                name: clip.name.clone(),
                error: e.to_string(),
            });
            continue;
        }

        if is_at_risk(clip.width, clip.height, clip.byte_size, ceiling) {
            let estimate = estimate_peak_bytes(clip.width, clip.height, clip.byte_size);
            let reason = format!(
                "memory risk ({}x{}@{}fps, est {})",
                clip.width,
                clip.height,
                clip.frame_rate,
                format_gib(estimate)
            );
            log::warn!(target: "scute::cut", "Skipping {}: {}", clip.name, reason);
            emit(progress.as_ref(), base, &format!("Skipped (out of memory): {}", clip.name));
            report.outcomes.push(CutOutcome::Skipped {
                name: clip.name.clone(),
                reason,
            });
            continue;
        }

        let step = format!("Cutting {}/{}: {}", position + 1, total, clip.name);
        emit(progress.as_ref(), base, &step);
        session.set_progress_callback(progress.clone().map(|emitter| {
            let step = step.clone();
            Arc::new(move |p: f64| {
                emitter(FfmpegProgressPayload {
                    progress: (position as f64 + p) / total as f64,
                    step: Some(step.clone()),
                })
            }) as crate::engine::ProgressCallback
        }));

        let attempt = std::fs::read(clip.path())
            .map_err(AppError::from)
            .and_then(|source| {
                let plan = plan_cut(clip, position, include_audio)?;
                run_cut(session, clip, &source, &plan, &settings)
            });
        session.set_progress_callback(None);

        match attempt {
            Ok(result) => {
                clip.cut = true;
                report.outcomes.push(CutOutcome::Cut {
                    name: result.name().to_string(),
                    frames: result.frame_count(),
                    has_audio: result.has_audio(),
                });
                results.push(result);
            }
            Err(e) => {
                log::error!(target: "scute::cut", "Cut failed for {}: {}", clip.name, e);
                emit(progress.as_ref(), base, &format!("Cut error: {}", clip.name));
                report.outcomes.push(CutOutcome::Failed {
                    name: clip.name.clone(),
                    error: e.to_string(),
                });
            }
        }

        if session.state() == SessionState::Faulted {
            log::error!(
                target: "scute::cut",
                "Engine recovery failed; abandoning the remaining {} clip(s)",
                total - position - 1
            );
            report.aborted = true;
            break;
        }
    }

    emit(
        progress.as_ref(),
        1.0,
        &format!("Cut done - {} files", results.len()),
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeReport;
    use crate::test_support::{FakeMedia, ScriptedEngine};

    fn probed_clip(frames: u64, fps: f64, audio: bool) -> SourceClip {
        let mut clip = SourceClip::new("/tmp/clip.mp4", 1024);
        clip.apply_probe(&ProbeReport {
            frame_rate: fps,
            total_frames: frames,
            width: 1920,
            height: 1080,
            has_audio_stream: audio,
        });
        clip
    }

    #[test]
    fn plan_keeps_n_minus_two_frames() {
        for n in [3u64, 4, 100, 12_345] {
            let plan = plan_cut(&probed_clip(n, 30.0, false), 0, true).expect("plan");
            assert_eq!(plan.retained_frames, n - 2);
            assert_eq!(plan.end_frame - 1, n - 2);
        }
    }

    #[test]
    fn audio_window_spans_duration_minus_two_frames() {
        for (frames, fps) in [(100u64, 30.0), (48, 59.94), (3, 23.976)] {
            let (start, end) = audio_window(frames, fps);
            let duration = frames as f64 / fps;
            assert!(end < start + duration);
            assert!(((end - start) - (duration - 2.0 / fps)).abs() < 1e-9);
        }
    }

    #[test]
    fn args_with_audio() {
        let plan = plan_cut(&probed_clip(100, 25.0, true), 2, true).expect("plan");
        let args = build_cut_args(&plan, &EncodeSettings::default());
        assert_eq!(
            args.join(" "),
            "-i input_2.mp4 -vf trim=start_frame=1:end_frame=99,setpts=PTS-STARTPTS \
             -af atrim=start=0.040000:end=3.960000,asetpts=PTS-STARTPTS \
             -c:v libx264 -preset ultrafast -crf 23 -pix_fmt yuv420p -movflags +faststart output_2.mp4"
        );
    }

    #[test]
    fn audio_is_stripped_when_not_requested_or_absent() {
        let settings = EncodeSettings::default();
        let no_request = plan_cut(&probed_clip(100, 25.0, true), 0, false).expect("plan");
        let no_stream = plan_cut(&probed_clip(100, 25.0, false), 0, true).expect("plan");
        for plan in [no_request, no_stream] {
            let args = build_cut_args(&plan, &settings);
            assert!(args.contains(&"-an".to_string()));
            assert!(!args.contains(&"-af".to_string()));
        }
    }

    #[test]
    fn frame_count_falls_back_to_plan_without_stats_lines() {
        let engine = ScriptedEngine::new();
        engine.omit_progress_stats();
        let mut session = EngineSession::new(engine.clone());
        session.load().expect("load");

        let clip = probed_clip(100, 30.0, true);
        let source = FakeMedia::new(30.0, 1920, 1080, 100, true).to_bytes();
        let plan = plan_cut(&clip, 0, true).expect("plan");
        let result =
            run_cut(&mut session, &clip, &source, &plan, &EncodeSettings::default()).expect("cut");

        assert_eq!(result.frame_count(), 98);
        assert!(result.has_audio());
        assert_eq!(engine.run_count(), 1);
        assert_eq!(session.state(), SessionState::Loaded);
    }

    #[test]
    fn preconditions() {
        let mut unprobed = SourceClip::new("a.mp4", 1);
        unprobed.total_frames = 100;
        unprobed.frame_rate = 30.0;
        assert!(matches!(
            check_cuttable(&unprobed),
            Err(AppError::Unprocessable { .. })
        ));
        assert!(check_cuttable(&probed_clip(2, 30.0, false)).is_err());
        assert!(check_cuttable(&probed_clip(3, 30.0, false)).is_ok());

        let mut no_rate = probed_clip(10, 30.0, false);
        no_rate.frame_rate = 0.0;
        assert!(check_cuttable(&no_rate).is_err());
    }
}
