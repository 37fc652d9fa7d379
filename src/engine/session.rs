//! Owned engine session with an explicit lifecycle.
//!
//! `Unloaded -> Loaded -> Running -> Loaded`, or `-> Faulted` when the reload
//! that follows an invocation fails. Every engine call goes through
//! [`EngineSession::invoke`], which always ends with logger detach, exit and
//! reload, whatever the operation returned: the engine's filesystem and memory
//! are not trustworthy across unrelated commands.

use std::sync::Arc;

use parking_lot::Mutex;

use super::progress::ProgressTracker;
use super::{Engine, LogCallback, ProgressCallback, log_tail};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Unloaded,
    Loaded,
    Running,
    Faulted,
}

pub struct EngineSession<E: Engine> {
    engine: E,
    state: SessionState,
    log: Arc<Mutex<String>>,
    progress: Option<ProgressCallback>,
}

/// Engine access scoped to one invocation.
pub struct Invocation<'a, E: Engine> {
    engine: &'a mut E,
    log: Arc<Mutex<String>>,
}

impl<E: Engine> Invocation<'_, E> {
    pub fn write_file(&mut self, name: &str, data: &[u8]) -> Result<(), AppError> {
        self.engine.write_file(name, data)
    }

    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>, AppError> {
        self.engine.read_file(name)
    }

    pub fn run(&mut self, args: &[String]) -> Result<(), AppError> {
        self.engine.run(args)
    }

    /// Everything logged since this invocation began.
    pub fn log(&self) -> String {
        self.log.lock().clone()
    }
}

impl<E: Engine> EngineSession<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            state: SessionState::Unloaded,
            log: Arc::new(Mutex::new(String::new())),
            progress: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Loaded
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Log of the most recent invocation. Kept until the next one starts.
    pub fn last_log(&self) -> String {
        self.log.lock().clone()
    }

    pub fn last_log_tail(&self, max_lines: usize) -> String {
        log_tail(&self.log.lock(), max_lines)
    }

    pub fn set_progress_callback(&mut self, callback: Option<ProgressCallback>) {
        self.progress = callback;
    }

    /// Initial load. A faulted session must go through [`restart`](Self::restart).
    pub fn load(&mut self) -> Result<(), AppError> {
        match self.state {
            SessionState::Loaded => Ok(()),
            SessionState::Running => Err(AppError::Busy),
            SessionState::Faulted => Err(AppError::SessionFaulted),
            SessionState::Unloaded => {
                self.engine.load()?;
                self.state = SessionState::Loaded;
                log::info!(target: "scute::engine::session", "Engine loaded");
                Ok(())
            }
        }
    }

    /// Tear down and reload from any idle state, clearing a fault.
    pub fn restart(&mut self) -> Result<(), AppError> {
        if self.state == SessionState::Running {
            return Err(AppError::Busy);
        }
        self.engine.set_logger(None);
        self.engine.exit();
        self.state = SessionState::Unloaded;
        self.load()
    }

    /// Run one engine operation, then reset the engine unconditionally.
    ///
    /// The operation's own error wins over a reset failure; a reset failure
    /// after a successful operation still returns the result but leaves the
    /// session `Faulted`, so the next invocation is refused.
    pub fn invoke<T>(
        &mut self,
        op: impl FnOnce(&mut Invocation<'_, E>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        match self.state {
            SessionState::Loaded => {}
            SessionState::Unloaded => return Err(AppError::NotLoaded),
            SessionState::Running => return Err(AppError::Busy),
            SessionState::Faulted => return Err(AppError::SessionFaulted),
        }
        self.state = SessionState::Running;
        self.log.lock().clear();
        let logger = self.make_logger();
        self.engine.set_logger(Some(logger));

        let outcome = {
            let mut invocation = Invocation {
                engine: &mut self.engine,
                log: Arc::clone(&self.log),
            };
            op(&mut invocation)
        };

        if let Err(ref e) = outcome {
            log::error!(
                target: "scute::engine::session",
                "Engine invocation failed: {}",
                e
            );
        }
        self.reset();
        outcome
    }

    fn make_logger(&self) -> LogCallback {
        let sink = Arc::clone(&self.log);
        let tracker = self
            .progress
            .clone()
            .map(|cb| Mutex::new(ProgressTracker::new(cb)));
        Arc::new(move |line: &str| {
            {
                let mut log = sink.lock();
                log.push_str(line);
                log.push('\n');
            }
            if let Some(ref tracker) = tracker {
                tracker.lock().observe(line);
            }
        })
    }

    fn reset(&mut self) {
        self.engine.set_logger(None);
        self.engine.exit();
        match self.engine.load() {
            Ok(()) => self.state = SessionState::Loaded,
            Err(e) => {
                log::error!(
                    target: "scute::engine::session",
                    "Engine reload failed, session faulted: {}",
                    e
                );
                self.state = SessionState::Faulted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeMedia, ScriptedEngine};

    fn loaded_session() -> EngineSession<ScriptedEngine> {
        let mut session = EngineSession::new(ScriptedEngine::new());
        session.load().expect("load");
        session
    }

    #[test]
    fn invoke_requires_loaded_session() {
        let mut session = EngineSession::new(ScriptedEngine::new());
        let result = session.invoke(|_| Ok(()));
        assert!(matches!(result, Err(AppError::NotLoaded)));
        assert_eq!(session.state(), SessionState::Unloaded);
    }

    #[test]
    fn every_invocation_resets_the_engine() {
        let mut session = loaded_session();
        session
            .invoke(|inv| inv.write_file("a.mp4", b"x"))
            .expect("write");
        assert_eq!(session.engine().exit_count(), 1);
        assert_eq!(session.engine().load_count(), 2);
        assert_eq!(session.state(), SessionState::Loaded);

        let read = session.invoke(|inv| inv.read_file("a.mp4"));
        assert!(matches!(read, Err(AppError::MissingFile(_))));
        assert_eq!(session.engine().exit_count(), 2);
        assert_eq!(session.state(), SessionState::Loaded);
    }

    #[test]
    fn log_is_captured_per_invocation() {
        let mut session = loaded_session();
        let media = FakeMedia::new(30.0, 640, 360, 10, false);
        let log = session
            .invoke(|inv| {
                inv.write_file("probe_0.mp4", &media.to_bytes())?;
                inv.run(&crate::probe::probe_args("probe_0.mp4"))?;
                Ok(inv.log())
            })
            .expect("probe");
        assert!(log.contains("640x360"));
        assert_eq!(session.last_log(), log);

        session.invoke(|_| Ok(())).expect("empty");
        assert!(session.last_log().is_empty());
    }

    #[test]
    fn failed_reload_faults_the_session() {
        let mut session = loaded_session();
        session.engine_mut_for_test().fail_loads_from(2);
        let result = session.invoke(|_| Ok(7));
        assert_eq!(result.expect("op result survives"), 7);
        assert_eq!(session.state(), SessionState::Faulted);
        assert!(matches!(
            session.invoke(|_| Ok(())),
            Err(AppError::SessionFaulted)
        ));
        assert!(matches!(session.load(), Err(AppError::SessionFaulted)));
    }

    #[test]
    fn restart_clears_a_fault() {
        let mut session = loaded_session();
        session.engine_mut_for_test().fail_loads_from(2);
        let _ = session.invoke(|_| Ok(()));
        assert_eq!(session.state(), SessionState::Faulted);
        session.engine_mut_for_test().allow_loads();
        session.restart().expect("restart");
        assert!(session.is_ready());
    }

    #[test]
    fn progress_callback_sees_engine_progress() {
        let mut session = loaded_session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.set_progress_callback(Some(Arc::new(move |p| sink.lock().push(p))));
        let media = FakeMedia::new(30.0, 640, 360, 60, false);
        session
            .invoke(|inv| {
                inv.write_file("probe_0.mp4", &media.to_bytes())?;
                inv.run(&crate::probe::probe_args("probe_0.mp4"))
            })
            .expect("probe");
        let seen = seen.lock();
        assert_eq!(seen.last().copied(), Some(1.0));
    }
}

#[cfg(test)]
impl<E: Engine> EngineSession<E> {
    pub(crate) fn engine_mut_for_test(&mut self) -> &mut E {
        &mut self.engine
    }
}
