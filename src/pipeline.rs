//! Owned pipeline state: source clips, cut results, merge order and the
//! engine session, plus the single `processing` gate that keeps engine work
//! strictly sequential.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::config::PipelineOptions;
use crate::cut::{CutBatchReport, cut_batch};
use crate::engine::ffprobe::{self, QuickMetadata};
use crate::engine::{Engine, EngineSession, ProgressEmitter, SessionState};
use crate::error::AppError;
use crate::memory::is_at_risk;
use crate::merge::{self, MergeOutput, MergeSummary, execute_merge};
use crate::model::{CutResult, SourceClip};
use crate::order::MergeOrder;
use crate::probe::{analyze_probe_log, probe_args};

/// Rough metadata source consulted once per new clip.
pub type QuickMetadataSource = fn(&Path) -> QuickMetadata;

const ACCEPTED_EXTENSION: &str = "mp4";

/// Set while a cut, merge or probe owns the engine.
#[derive(Clone, Default)]
pub struct ProcessingGate {
    busy: Arc<AtomicBool>,
}

impl ProcessingGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the gate. Fails with `Busy` when another operation holds it.
    pub fn begin(&self) -> Result<ProcessingGuard, AppError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::Busy)?;
        Ok(ProcessingGuard {
            busy: Arc::clone(&self.busy),
        })
    }
}

/// Releases the gate on drop.
pub struct ProcessingGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// What happened to each path offered to [`Pipeline::add_files`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeReport {
    pub added: Vec<String>,
    pub duplicates: Vec<String>,
    pub rejected: Vec<String>,
    /// Paths dropped because the clip limit was reached.
    pub over_limit: Vec<String>,
}

/// Clip listing entry with advisories computed on demand.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipView {
    #[serde(flatten)]
    pub clip: SourceClip,
    pub heavy: bool,
    pub memory_risk: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeValidation {
    pub can_merge: bool,
    pub warnings: Vec<String>,
    pub summary: MergeSummary,
}

pub struct Pipeline<E: Engine> {
    clips: Vec<SourceClip>,
    results: Vec<CutResult>,
    order: MergeOrder,
    session: EngineSession<E>,
    options: PipelineOptions,
    gate: ProcessingGate,
    quick_metadata: QuickMetadataSource,
}

impl<E: Engine> Pipeline<E> {
    pub fn new(engine: E, options: PipelineOptions) -> Self {
        Self {
            clips: Vec::new(),
            results: Vec::new(),
            order: MergeOrder::new(),
            session: EngineSession::new(engine),
            options,
            gate: ProcessingGate::new(),
            quick_metadata: ffprobe::quick_metadata,
        }
    }

    pub fn with_quick_metadata(mut self, source: QuickMetadataSource) -> Self {
        self.quick_metadata = source;
        self
    }

    /// Initial engine load.
    pub fn start(&mut self) -> Result<(), AppError> {
        self.session.load()
    }

    pub fn restart_session(&mut self) -> Result<(), AppError> {
        let _guard = self.gate.begin()?;
        self.session.restart()
    }

    pub fn clips(&self) -> &[SourceClip] {
        &self.clips
    }

    pub fn results(&self) -> &[CutResult] {
        &self.results
    }

    pub fn order(&self) -> &MergeOrder {
        &self.order
    }

    pub fn session(&self) -> &EngineSession<E> {
        &self.session
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Shared handle to the processing gate.
    pub fn gate(&self) -> ProcessingGate {
        self.gate.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.gate.is_busy()
    }

    fn ensure_idle(&self) -> Result<(), AppError> {
        if self.gate.is_busy() {
            return Err(AppError::Busy);
        }
        Ok(())
    }

    fn ensure_engine_ready(&self) -> Result<(), AppError> {
        match self.session.state() {
            SessionState::Loaded => Ok(()),
            SessionState::Unloaded => Err(AppError::NotLoaded),
            SessionState::Running => Err(AppError::Busy),
            SessionState::Faulted => Err(AppError::SessionFaulted),
        }
    }

    pub fn clip_views(&self) -> Vec<ClipView> {
        let ceiling = self.options.effective_memory_ceiling_bytes();
        self.clips
            .iter()
            .map(|clip| ClipView {
                heavy: clip.is_heavy(),
                memory_risk: !clip.cut
                    && is_at_risk(clip.width, clip.height, clip.byte_size, ceiling),
                clip: clip.clone(),
            })
            .collect()
    }

    /// Accept `.mp4` files, skipping duplicates (same name and size) and
    /// anything past the clip limit. New clips get quick metadata.
    pub fn add_files(&mut self, paths: &[PathBuf]) -> Result<IntakeReport, AppError> {
        self.ensure_idle()?;
        let max_files = self.options.effective_max_files();
        let mut report = IntakeReport::default();

        for path in paths {
            let shown = path.to_string_lossy().to_string();
            let is_mp4 = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ACCEPTED_EXTENSION));
            if !is_mp4 {
                report.rejected.push(shown);
                continue;
            }
            if self.clips.len() >= max_files {
                report.over_limit.push(shown);
                continue;
            }
            let byte_size = match fs::metadata(path) {
                Ok(meta) if meta.is_file() => meta.len(),
                Ok(_) => {
                    report.rejected.push(shown);
                    continue;
                }
                Err(e) => {
                    log::warn!(target: "scute::pipeline", "Cannot read {}: {}", shown, e);
                    report.rejected.push(shown);
                    continue;
                }
            };
            let mut clip = SourceClip::new(path.clone(), byte_size);
            if self.clips.iter().any(|c| c.is_same_file(&clip.name, byte_size)) {
                report.duplicates.push(clip.name);
                continue;
            }
            clip.apply_quick_metadata(&(self.quick_metadata)(path));
            log::info!(
                target: "scute::pipeline",
                "Added {} ({} bytes, ~{}x{} @ {}fps)",
                clip.name,
                byte_size,
                clip.width,
                clip.height,
                clip.frame_rate
            );
            report.added.push(clip.name.clone());
            self.clips.push(clip);
        }
        Ok(report)
    }

    /// Remove a clip that has not been cut.
    pub fn remove_clip(&mut self, index: usize) -> Result<SourceClip, AppError> {
        self.ensure_idle()?;
        match self.clips.get(index) {
            None => Err(AppError::InvalidInput(format!("no clip at index {}", index))),
            Some(clip) if clip.cut => Err(AppError::InvalidInput(format!(
                "{} is already cut",
                clip.name
            ))),
            Some(_) => Ok(self.clips.remove(index)),
        }
    }

    /// Probe every clip not yet probed, one engine invocation each.
    ///
    /// A failed probe still marks the clip probed so it is not retried; its
    /// metadata stays the rough estimate. Returns how many probes succeeded.
    pub fn probe_pending(&mut self) -> Result<usize, AppError> {
        let _guard = self.gate.begin()?;
        self.ensure_engine_ready()?;
        let pending: Vec<usize> = (0..self.clips.len())
            .filter(|&i| !self.clips[i].probed)
            .collect();
        let mut succeeded = 0;

        for (position, &index) in pending.iter().enumerate() {
            let clip = &mut self.clips[index];
            let input_name = format!("probe_{}.mp4", position);
            let args = probe_args(&input_name);
            let attempt = fs::read(clip.path())
                .map_err(AppError::from)
                .and_then(|data| {
                    self.session.invoke(|inv| {
                        inv.write_file(&input_name, &data)?;
                        inv.run(&args)?;
                        Ok(inv.log())
                    })
                });

            match attempt {
                Ok(log) => {
                    let report = analyze_probe_log(&log);
                    clip.apply_probe(&report);
                    succeeded += 1;
                    log::info!(
                        target: "scute::pipeline",
                        "[probe] {}: {}fps, {} frames, {}x{}{}",
                        clip.name,
                        report.frame_rate,
                        report.total_frames,
                        report.width,
                        report.height,
                        if report.has_audio_stream { " +audio" } else { " no-audio" }
                    );
                    if clip.fps_warning {
                        log::warn!(
                            target: "scute::pipeline",
                            "[probe] {}: {}fps - likely frame-interpolated",
                            clip.name,
                            clip.frame_rate
                        );
                    }
                }
                Err(e) => {
                    log::error!(target: "scute::pipeline", "Probe failed for {}: {}", clip.name, e);
                    clip.probed = true;
                }
            }

            if self.session.state() == SessionState::Faulted {
                return Err(AppError::SessionFaulted);
            }
        }
        Ok(succeeded)
    }

    /// Cut every uncut clip. New results join the end of the merge order.
    pub fn cut(
        &mut self,
        options: &PipelineOptions,
        progress: Option<ProgressEmitter>,
    ) -> Result<CutBatchReport, AppError> {
        let _guard = self.gate.begin()?;
        self.ensure_engine_ready()?;
        let report = cut_batch(
            &mut self.session,
            &mut self.clips,
            &mut self.results,
            options,
            progress,
        );
        if !self.results.is_empty() {
            self.order.append_missing(self.results.len());
        }
        log::info!(
            target: "scute::pipeline",
            "Cut batch finished: {} new, {} total results",
            report.cut_count(),
            self.results.len()
        );
        Ok(report)
    }

    fn ordered_results(&self) -> Vec<&CutResult> {
        self.order
            .iter()
            .filter_map(|i| self.results.get(i))
            .collect()
    }

    pub fn validate_merge(&self) -> MergeValidation {
        let entries = self.ordered_results();
        MergeValidation {
            can_merge: entries.len() >= merge::MIN_MERGE_ENTRIES,
            warnings: merge::validate_merge(&entries),
            summary: MergeSummary::for_entries(&entries),
        }
    }

    /// Merge the results in the current order into one output.
    pub fn merge(
        &mut self,
        options: &PipelineOptions,
        progress: Option<ProgressEmitter>,
    ) -> Result<MergeOutput, AppError> {
        let _guard = self.gate.begin()?;
        self.ensure_engine_ready()?;
        let entries: Vec<&CutResult> = self
            .order
            .iter()
            .filter_map(|i| self.results.get(i))
            .collect();
        execute_merge(
            &mut self.session,
            &entries,
            &options.encode_settings(),
            progress,
        )
    }

    pub fn duplicate_in_order(&mut self, pos: usize) -> Result<(), AppError> {
        self.ensure_idle()?;
        self.order.duplicate_at(pos);
        Ok(())
    }

    pub fn remove_from_order(&mut self, pos: usize) -> Result<(), AppError> {
        self.ensure_idle()?;
        self.order.remove_at(pos);
        Ok(())
    }

    pub fn move_in_order(&mut self, from: usize, to: usize) -> Result<(), AppError> {
        self.ensure_idle()?;
        self.order.move_to(from, to);
        Ok(())
    }

    /// Forget every cut: clips become uncut, results and order are cleared.
    pub fn reset(&mut self) -> Result<(), AppError> {
        self.ensure_idle()?;
        for clip in &mut self.clips {
            clip.cut = false;
        }
        self.results.clear();
        self.order.clear();
        log::info!(target: "scute::pipeline", "Pipeline reset");
        Ok(())
    }

    /// Write one cut result into `dir` under its own name.
    pub fn save_result(&self, index: usize, dir: &Path) -> Result<PathBuf, AppError> {
        let result = self
            .results
            .get(index)
            .ok_or_else(|| AppError::InvalidInput(format!("no cut result at index {}", index)))?;
        write_artifact(dir, result.name(), result.data())
    }

    pub fn save_results(&self, dir: &Path) -> Result<Vec<PathBuf>, AppError> {
        (0..self.results.len())
            .map(|i| self.save_result(i, dir))
            .collect()
    }
}

/// Write `data` to `dir/name`, creating `dir` when missing.
pub fn write_artifact(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf, AppError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, data)?;
    log::info!(
        target: "scute::pipeline",
        "Saved {} ({} bytes)",
        path.display(),
        data.len()
    );
    Ok(path)
}

/// `M:SS` from one minute up, else `Ns`.
pub fn format_elapsed(seconds: u64) -> String {
    let minutes = seconds / 60;
    let rest = seconds % 60;
    if minutes > 0 {
        format!("{}:{:02}", minutes, rest)
    } else {
        format!("{}s", rest)
    }
}
