use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use scute_core::config::PipelineOptions;
use scute_core::engine::{FfmpegProgressPayload, ProcessEngine, parse_ffmpeg_error};
use scute_core::error::AppError;
use scute_core::pipeline::Pipeline;
use scute_core::sidecar_api::{self, Sidecar};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum JobKind {
    Cut,
    Merge,
}

#[derive(Debug, Clone, Copy)]
struct ActiveJob {
    job_id: u64,
    kind: JobKind,
}

#[derive(Clone)]
struct JobState {
    active_job: Arc<Mutex<Option<ActiveJob>>>,
    next_job_id: Arc<AtomicU64>,
}

impl JobState {
    fn new() -> Self {
        Self {
            active_job: Arc::new(Mutex::new(None)),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin_job(&self, kind: JobKind) -> Result<ActiveJob, AppError> {
        let mut guard = self.active_job.lock();
        if let Some(existing) = *guard {
            log::warn!(
                target: "scute::sidecar",
                "Rejected {:?} job: job {} ({:?}) is running",
                kind,
                existing.job_id,
                existing.kind
            );
            return Err(AppError::Busy);
        }
        let job = ActiveJob {
            job_id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
            kind,
        };
        *guard = Some(job);
        Ok(job)
    }

    fn finish_job(&self, job_id: u64) {
        let mut guard = self.active_job.lock();
        if let Some(active) = *guard
            && active.job_id == job_id
        {
            *guard = None;
        }
    }
}

struct ActiveJobGuard {
    state: JobState,
    job_id: u64,
}

impl ActiveJobGuard {
    fn new(state: JobState, job_id: u64) -> Self {
        Self { state, job_id }
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.state.finish_job(self.job_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClipsAddParams {
    paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexParams {
    index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PosParams {
    pos: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveParams {
    from: usize,
    to: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultsSaveParams {
    output_dir: PathBuf,
    index: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CutRunParams {
    #[serde(default)]
    options: PipelineOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeRunParams {
    #[serde(default)]
    options: PipelineOptions,
    output_dir: PathBuf,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;
type AppSidecar = Sidecar<ProcessEngine>;

fn init_logging() {
    let default_filter = if cfg!(debug_assertions) {
        "info,scute=debug,scute_core=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
                % 86_400;
            let target = record
                .target()
                .strip_prefix("scute::")
                .unwrap_or(record.target());
            writeln!(
                buf,
                "{:02}:{:02}:{:02}  {:5}  {}  {}",
                secs / 3600,
                secs / 60 % 60,
                secs % 60,
                record.level(),
                target,
                record.args()
            )
        })
        .init();
}

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn emit_job_progress(writer: &SharedWriter, job: ActiveJob, payload: FfmpegProgressPayload) {
    emit_rpc_event(
        writer,
        "job.progress",
        json!({
            "jobId": job.job_id,
            "kind": job.kind,
            "progress": payload.progress,
            "step": payload.step,
        }),
    );
}

fn emit_job_elapsed(writer: &SharedWriter, job: ActiveJob, text: String) {
    emit_rpc_event(
        writer,
        "job.elapsed",
        json!({
            "jobId": job.job_id,
            "kind": job.kind,
            "text": text,
        }),
    );
}

fn emit_job_error(writer: &SharedWriter, job: ActiveJob, error: &RpcErrorPayload) {
    emit_rpc_event(
        writer,
        "job.error",
        json!({
            "jobId": job.job_id,
            "kind": job.kind,
            "summary": error.summary,
            "detail": error.detail,
        }),
    );
}

fn emit_job_complete(writer: &SharedWriter, job: ActiveJob) {
    emit_rpc_event(
        writer,
        "job.complete",
        json!({
            "jobId": job.job_id,
            "kind": job.kind,
        }),
    );
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::FfmpegFailed { code, stderr } if *code == -1 => RpcErrorPayload {
            summary: stderr.lines().next().unwrap_or_default().to_string(),
            detail: stderr.clone(),
        },
        AppError::FfmpegFailed { code, stderr } => {
            let parsed = parse_ffmpeg_error(stderr, Some(*code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::InvalidInput(format!("Invalid params payload: {}", e)))
}

fn to_value<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn job_kind(method: &str) -> Option<JobKind> {
    match method {
        "cut.run" => Some(JobKind::Cut),
        "merge.run" => Some(JobKind::Merge),
        _ => None,
    }
}

fn dispatch_sync(method: &str, params: Value, sidecar: &AppSidecar) -> Result<Value, AppError> {
    match method {
        "app.status" => to_value(sidecar.app_status(), "app status"),
        "clips.add" => {
            let parsed: ClipsAddParams = params_from_value(params)?;
            to_value(sidecar.add_clips(parsed.paths)?, "clips")
        }
        "clips.list" => to_value(sidecar.list_clips()?, "clips"),
        "clips.remove" => {
            let parsed: IndexParams = params_from_value(params)?;
            to_value(sidecar.remove_clip(parsed.index)?, "clips")
        }
        "clips.probe" => to_value(sidecar.probe_clips()?, "probe result"),
        "results.list" => to_value(sidecar.list_results()?, "cut results"),
        "results.save" => {
            let parsed: ResultsSaveParams = params_from_value(params)?;
            to_value(
                sidecar.save_results(parsed.output_dir, parsed.index)?,
                "saved files",
            )
        }
        "merge.order" => to_value(sidecar.merge_order()?, "merge order"),
        "merge.duplicate" => {
            let parsed: PosParams = params_from_value(params)?;
            to_value(sidecar.merge_duplicate(parsed.pos)?, "merge order")
        }
        "merge.remove" => {
            let parsed: PosParams = params_from_value(params)?;
            to_value(sidecar.merge_remove(parsed.pos)?, "merge order")
        }
        "merge.move" => {
            let parsed: MoveParams = params_from_value(params)?;
            to_value(sidecar.merge_move(parsed.from, parsed.to)?, "merge order")
        }
        "merge.validate" => to_value(sidecar.merge_validate()?, "merge validation"),
        "pipeline.reset" => {
            sidecar.reset()?;
            Ok(json!({ "reset": true }))
        }
        "session.restart" => {
            let state = sidecar.restart_session()?;
            Ok(json!({ "sessionState": state }))
        }
        _ => Err(AppError::InvalidInput(format!("Unknown method: {}", method))),
    }
}

fn write_response(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let response = match result {
        Ok(result) => serde_json::to_value(RpcSuccess { id, result })
            .map_err(|e| io::Error::other(format!("serialize success: {}", e))),
        Err(err) => serde_json::to_value(RpcFailure {
            id,
            error: parse_error_payload(&err),
        })
        .map_err(|e| io::Error::other(format!("serialize failure: {}", e))),
    };

    match response {
        Ok(value) => {
            let _ = write_json_line_shared(writer, &value);
        }
        Err(err) => {
            let failure = RpcFailure {
                id,
                error: RpcErrorPayload {
                    summary: "Serialization error".to_string(),
                    detail: err.to_string(),
                },
            };
            let _ = write_json_line_shared(writer, &failure);
        }
    }
}

fn run_job(
    request: RpcRequest,
    kind: JobKind,
    active_job: ActiveJob,
    writer: &SharedWriter,
    sidecar: &AppSidecar,
) {
    let writer_for_progress = Arc::clone(writer);
    let progress_emitter: sidecar_api::SidecarProgressEmitter =
        Arc::new(move |payload| emit_job_progress(&writer_for_progress, active_job, payload));
    let on_elapsed = |text: String| emit_job_elapsed(writer, active_job, text);

    let result = match kind {
        JobKind::Cut => params_from_value::<CutRunParams>(request.params).and_then(|parsed| {
            to_value(
                sidecar.run_cut(parsed.options, Some(progress_emitter), on_elapsed)?,
                "cut result",
            )
        }),
        JobKind::Merge => params_from_value::<MergeRunParams>(request.params).and_then(|parsed| {
            to_value(
                sidecar.run_merge(
                    parsed.options,
                    parsed.output_dir,
                    Some(progress_emitter),
                    on_elapsed,
                )?,
                "merge result",
            )
        }),
    };

    match result {
        Ok(mut value) => {
            emit_job_complete(writer, active_job);
            if let Some(obj) = value.as_object_mut() {
                obj.insert("jobId".to_string(), json!(active_job.job_id));
            }
            write_response(writer, request.id, Ok(value));
        }
        Err(err) => {
            emit_job_error(writer, active_job, &parse_error_payload(&err));
            write_response(writer, request.id, Err(err));
        }
    }
}

fn main() -> io::Result<()> {
    init_logging();

    let sidecar: AppSidecar = Sidecar::new(Pipeline::new(
        ProcessEngine::new(),
        PipelineOptions::default(),
    ));
    sidecar.start();

    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let jobs = JobState::new();
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        let Some(kind) = job_kind(&request.method) else {
            let result = dispatch_sync(&request.method, request.params, &sidecar);
            write_response(&stdout, request.id, result);
            continue;
        };

        let active_job = match jobs.begin_job(kind) {
            Ok(job) => job,
            Err(err) => {
                write_response(&stdout, request.id, Err(err));
                continue;
            }
        };
        let job_guard = ActiveJobGuard::new(jobs.clone(), active_job.job_id);
        let writer = Arc::clone(&stdout);
        let sidecar = sidecar.clone();
        workers.retain(|w| !w.is_finished());
        workers.push(thread::spawn(move || {
            let _job_guard = job_guard;
            run_job(request, kind, active_job, &writer, &sidecar);
        }));
    }

    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}
