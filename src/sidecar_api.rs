use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::config::PipelineOptions;
use crate::cut::CutBatchReport;
use crate::engine::{Engine, ProgressEmitter, SessionState};
use crate::error::AppError;
use crate::merge::{MERGED_FILE_NAME, MergePlan, MergeSummary};
use crate::model::CutResult;
use crate::pipeline::{
    ClipView, IntakeReport, MergeValidation, Pipeline, ProcessingGate, ProcessingGuard,
    format_elapsed, write_artifact,
};

pub type SidecarProgressEmitter = ProgressEmitter;

const PROTOCOL_VERSION: u8 = 1;
const ELAPSED_TICK: Duration = Duration::from_secs(1);

fn block_on_async<T>(future: impl Future<Output = Result<T, AppError>>) -> Result<T, AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::from(format!("Failed to initialize async runtime: {}", e)))?;
    runtime.block_on(future)
}

/// Run blocking `work` off the calling task, reporting the elapsed wall-clock
/// time through `on_tick` once per second until it finishes.
pub fn run_with_elapsed<T: Send + 'static>(
    work: impl FnOnce() -> Result<T, AppError> + Send + 'static,
    on_tick: impl Fn(String),
) -> Result<T, AppError> {
    block_on_async(async move {
        let started = Instant::now();
        let mut task = tokio::task::spawn_blocking(work);
        let mut ticker = tokio::time::interval(ELAPSED_TICK);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                joined = &mut task => {
                    return joined.map_err(|e| AppError::from(format!("Worker task failed: {}", e)))?;
                }
                _ = ticker.tick() => on_tick(format_elapsed(started.elapsed().as_secs())),
            }
        }
    })
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusResult {
    pub protocol_version: u8,
    pub processing: bool,
    /// Absent while a job holds the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_state: Option<SessionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_count: Option<usize>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddClipsResult {
    pub intake: IntakeReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,
    pub clips: Vec<ClipView>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeClipsResult {
    pub probed: usize,
    pub clips: Vec<ClipView>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CutRunResult {
    pub report: CutBatchReport,
    pub results: Vec<CutResult>,
    pub order: Vec<usize>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRunResult {
    pub saved_path: String,
    pub plan: MergePlan,
    pub summary: MergeSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_frames: Option<u64>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFilesResult {
    pub saved_paths: Vec<String>,
}

/// Request facade over one shared pipeline.
///
/// Quick requests never wait for a running job: they fail with `Busy`
/// instead. Cut and merge block the calling thread, so callers run them on
/// a worker. A cut or merge requested while another job or a probe is in
/// flight is refused, never queued.
pub struct Sidecar<E: Engine + 'static> {
    pipeline: Arc<Mutex<Pipeline<E>>>,
    gate: ProcessingGate,
    /// Held from the moment a cut or merge is accepted until it returns.
    jobs: ProcessingGate,
}

impl<E: Engine + 'static> Clone for Sidecar<E> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            gate: self.gate.clone(),
            jobs: self.jobs.clone(),
        }
    }
}

impl<E: Engine + 'static> Sidecar<E> {
    pub fn new(pipeline: Pipeline<E>) -> Self {
        let gate = pipeline.gate();
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            gate,
            jobs: ProcessingGate::new(),
        }
    }

    /// Load the engine. Failure is logged, not fatal: requests that need the
    /// engine report it until `session.restart` succeeds.
    pub fn start(&self) {
        if let Err(e) = self.pipeline.lock().start() {
            log::error!(target: "scute::sidecar", "Engine failed to load: {}", e);
        }
    }

    pub fn is_processing(&self) -> bool {
        self.gate.is_busy() || self.jobs.is_busy()
    }

    fn idle_pipeline(&self) -> Result<MutexGuard<'_, Pipeline<E>>, AppError> {
        if self.is_processing() {
            return Err(AppError::Busy);
        }
        self.pipeline.try_lock().ok_or(AppError::Busy)
    }

    /// Accept a cut or merge, or refuse it while anything else is processing.
    fn begin_job(&self) -> Result<ProcessingGuard, AppError> {
        let job = self.jobs.begin()?;
        if self.gate.is_busy() {
            return Err(AppError::Busy);
        }
        Ok(job)
    }

    pub fn app_status(&self) -> AppStatusResult {
        let pipeline = self.pipeline.try_lock();
        AppStatusResult {
            protocol_version: PROTOCOL_VERSION,
            processing: self.is_processing() || pipeline.is_none(),
            session_state: pipeline.as_ref().map(|p| p.session_state()),
            clip_count: pipeline.as_ref().map(|p| p.clips().len()),
            result_count: pipeline.as_ref().map(|p| p.results().len()),
        }
    }

    /// Take in new files, then probe whatever is still unprobed.
    pub fn add_clips(&self, paths: Vec<PathBuf>) -> Result<AddClipsResult, AppError> {
        let mut pipeline = self.idle_pipeline()?;
        let intake = pipeline.add_files(&paths)?;
        let probe_error = match pipeline.probe_pending() {
            Ok(_) => None,
            Err(e) => {
                log::warn!(target: "scute::sidecar", "Probe skipped: {}", e);
                Some(e.to_string())
            }
        };
        Ok(AddClipsResult {
            intake,
            probe_error,
            clips: pipeline.clip_views(),
        })
    }

    pub fn list_clips(&self) -> Result<Vec<ClipView>, AppError> {
        Ok(self.idle_pipeline()?.clip_views())
    }

    pub fn remove_clip(&self, index: usize) -> Result<Vec<ClipView>, AppError> {
        let mut pipeline = self.idle_pipeline()?;
        pipeline.remove_clip(index)?;
        Ok(pipeline.clip_views())
    }

    pub fn probe_clips(&self) -> Result<ProbeClipsResult, AppError> {
        let mut pipeline = self.idle_pipeline()?;
        let probed = pipeline.probe_pending()?;
        Ok(ProbeClipsResult {
            probed,
            clips: pipeline.clip_views(),
        })
    }

    pub fn list_results(&self) -> Result<Vec<CutResult>, AppError> {
        Ok(self.idle_pipeline()?.results().to_vec())
    }

    /// Export one result, or all of them when `index` is `None`.
    pub fn save_results(
        &self,
        output_dir: PathBuf,
        index: Option<usize>,
    ) -> Result<SavedFilesResult, AppError> {
        let pipeline = self.idle_pipeline()?;
        let saved = match index {
            Some(i) => vec![pipeline.save_result(i, &output_dir)?],
            None => pipeline.save_results(&output_dir)?,
        };
        Ok(SavedFilesResult {
            saved_paths: saved.iter().map(|p| p.to_string_lossy().to_string()).collect(),
        })
    }

    pub fn merge_order(&self) -> Result<Vec<usize>, AppError> {
        Ok(self.idle_pipeline()?.order().as_slice().to_vec())
    }

    pub fn merge_duplicate(&self, pos: usize) -> Result<Vec<usize>, AppError> {
        let mut pipeline = self.idle_pipeline()?;
        pipeline.duplicate_in_order(pos)?;
        Ok(pipeline.order().as_slice().to_vec())
    }

    pub fn merge_remove(&self, pos: usize) -> Result<Vec<usize>, AppError> {
        let mut pipeline = self.idle_pipeline()?;
        pipeline.remove_from_order(pos)?;
        Ok(pipeline.order().as_slice().to_vec())
    }

    pub fn merge_move(&self, from: usize, to: usize) -> Result<Vec<usize>, AppError> {
        let mut pipeline = self.idle_pipeline()?;
        pipeline.move_in_order(from, to)?;
        Ok(pipeline.order().as_slice().to_vec())
    }

    pub fn merge_validate(&self) -> Result<MergeValidation, AppError> {
        Ok(self.idle_pipeline()?.validate_merge())
    }

    pub fn reset(&self) -> Result<(), AppError> {
        self.idle_pipeline()?.reset()
    }

    pub fn restart_session(&self) -> Result<SessionState, AppError> {
        let mut pipeline = self.idle_pipeline()?;
        pipeline.restart_session()?;
        Ok(pipeline.session_state())
    }

    /// Cut every uncut clip. Blocks until the batch finishes.
    pub fn run_cut(
        &self,
        options: PipelineOptions,
        progress: Option<SidecarProgressEmitter>,
        on_elapsed: impl Fn(String),
    ) -> Result<CutRunResult, AppError> {
        let job = self.begin_job()?;
        let pipeline = Arc::clone(&self.pipeline);
        run_with_elapsed(
            move || {
                let _job = job;
                let mut pipeline = pipeline.lock();
                let report = pipeline.cut(&options, progress)?;
                Ok(CutRunResult {
                    report,
                    results: pipeline.results().to_vec(),
                    order: pipeline.order().as_slice().to_vec(),
                })
            },
            on_elapsed,
        )
    }

    /// Merge in the current order and write `merged.mp4` into `output_dir`.
    pub fn run_merge(
        &self,
        options: PipelineOptions,
        output_dir: PathBuf,
        progress: Option<SidecarProgressEmitter>,
        on_elapsed: impl Fn(String),
    ) -> Result<MergeRunResult, AppError> {
        let job = self.begin_job()?;
        let pipeline = Arc::clone(&self.pipeline);
        run_with_elapsed(
            move || {
                let _job = job;
                let output = pipeline.lock().merge(&options, progress)?;
                let saved = write_artifact(&output_dir, MERGED_FILE_NAME, &output.data)?;
                Ok(MergeRunResult {
                    saved_path: saved.to_string_lossy().to_string(),
                    plan: output.plan,
                    summary: output.summary,
                    reported_frames: output.reported_frames,
                })
            },
            on_elapsed,
        )
    }
}
