//! Engine backed by a local FFmpeg binary.
//!
//! Each `load` creates a private scratch directory that plays the role of the
//! engine's virtual filesystem; FFmpeg runs with it as working directory so
//! commands only ever name bare files. `exit` deletes the directory. Log text
//! is read from stderr, where FFmpeg terminates stats lines with `\r` and
//! everything else with `\n`, so both count as line breaks.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use tempfile::TempDir;

use super::discovery::get_ffmpeg_path;
use super::{Engine, LogCallback};
use crate::error::AppError;

/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

#[derive(Default)]
pub struct ProcessEngine {
    ffmpeg_path: Option<PathBuf>,
    workdir: Option<TempDir>,
    logger: Option<LogCallback>,
}

impl ProcessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit binary instead of discovery.
    pub fn with_ffmpeg_path(path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: Some(path.into()),
            workdir: None,
            logger: None,
        }
    }

    fn workdir(&self) -> Result<&Path, AppError> {
        self.workdir
            .as_ref()
            .map(|d| d.path())
            .ok_or(AppError::NotLoaded)
    }

    fn file_path(&self, name: &str) -> Result<PathBuf, AppError> {
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !plain {
            return Err(AppError::InvalidInput(format!(
                "engine file names must be bare file names, got {:?}",
                name
            )));
        }
        Ok(self.workdir()?.join(name))
    }

    fn emit(&self, line: &str) {
        if let Some(ref logger) = self.logger {
            logger(line);
        }
    }
}

fn push_tail(tail: &mut Vec<u8>, line: &str) {
    tail.extend_from_slice(line.as_bytes());
    tail.push(b'\n');
    if tail.len() > MAX_STDERR_BYTES {
        let excess = tail.len() - MAX_STDERR_BYTES;
        tail.drain(..excess);
    }
}

impl Engine for ProcessEngine {
    fn load(&mut self) -> Result<(), AppError> {
        if self.workdir.is_some() {
            return Ok(());
        }
        if self.ffmpeg_path.is_none() {
            self.ffmpeg_path = Some(get_ffmpeg_path()?.to_path_buf());
        }
        let dir = tempfile::Builder::new().prefix("scute-engine-").tempdir()?;
        log::debug!(
            target: "scute::engine::process",
            "Engine loaded, filesystem at {}",
            dir.path().display()
        );
        self.workdir = Some(dir);
        Ok(())
    }

    fn run(&mut self, args: &[String]) -> Result<(), AppError> {
        let workdir = self.workdir()?.to_path_buf();
        let ffmpeg = self.ffmpeg_path.clone().ok_or(AppError::NotLoaded)?;

        log::debug!(
            target: "scute::engine::process",
            "Spawning FFmpeg: path={}, args={:?}",
            ffmpeg.display(),
            args
        );

        let mut cmd = Command::new(&ffmpeg);
        cmd.arg("-nostdin")
            .arg("-y")
            .args(args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Failed to spawn FFmpeg: {}", e))?;

        let Some(stderr) = child.stderr.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::from("Failed to capture stderr"));
        };

        let mut tail = Vec::new();
        for chunk in BufReader::new(stderr).split(b'\r') {
            let Ok(chunk) = chunk else { break };
            for raw in chunk.split(|b| *b == b'\n') {
                let text = String::from_utf8_lossy(raw);
                let line = text.trim_end();
                if line.is_empty() {
                    continue;
                }
                push_tail(&mut tail, line);
                self.emit(line);
            }
        }

        let status = child.wait()?;
        if status.success() {
            log::debug!(target: "scute::engine::process", "FFmpeg completed successfully");
            return Ok(());
        }

        let stderr_str = String::from_utf8_lossy(&tail).to_string();
        let code = status.code().unwrap_or(-1);
        let err_preview = stderr_str
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .join("; ");
        log::error!(
            target: "scute::engine::process",
            "FFmpeg failed (code={}): {}",
            code,
            err_preview
        );
        Err(AppError::FfmpegFailed {
            code,
            stderr: stderr_str,
        })
    }

    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<(), AppError> {
        let path = self.file_path(name)?;
        fs::write(path, data)?;
        Ok(())
    }

    fn read_file(&mut self, name: &str) -> Result<Vec<u8>, AppError> {
        let path = self.file_path(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::MissingFile(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_logger(&mut self, logger: Option<LogCallback>) {
        self.logger = logger;
    }

    fn exit(&mut self) {
        self.logger = None;
        if let Some(dir) = self.workdir.take()
            && let Err(e) = dir.close()
        {
            log::warn!(
                target: "scute::engine::process",
                "Failed to remove engine filesystem: {}",
                e
            );
        }
    }

    fn is_loaded(&self) -> bool {
        self.workdir.is_some()
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        self.exit();
    }
}
