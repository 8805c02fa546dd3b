//! Run orchestration: `Idle -> SequentialRun | ParallelRun -> Done`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use crate::dashboard::{header_text, Dashboard, TITLE};
use crate::demux::spawn_reader;
use crate::interrupt::InterruptSource;
use crate::invocation::EncoderInvocation;
use crate::report::{JobOutcome, JobStatus, RunMode, RunReport};
use crate::supervisor::{run_attached, ProcessHandle};

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    SequentialRun,
    ParallelRun,
    Done,
}

pub struct RunController {
    invocations: Vec<EncoderInvocation>,
    tick: Duration,
    state: RunState,
}

impl RunController {
    pub fn new(invocations: Vec<EncoderInvocation>, tick: Duration) -> Self {
        Self {
            invocations,
            tick,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) -> Result<()> {
        let allowed = matches!(
            (self.state, next),
            (RunState::Idle, RunState::SequentialRun)
                | (RunState::Idle, RunState::ParallelRun)
                | (RunState::SequentialRun, RunState::Done)
                | (RunState::ParallelRun, RunState::Done)
        );
        if !allowed {
            bail!("invalid run transition {:?} -> {:?}", self.state, next);
        }
        tracing::debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
        Ok(())
    }

    /// Runs the jobs one after another with the console attached. A failing job does not
    /// stop the ones after it.
    pub fn run_sequential(&mut self, console: &mut dyn Write) -> Result<RunReport> {
        self.transition(RunState::SequentialRun)?;
        let mut report = RunReport::new(RunMode::Sequential, Utc::now());

        writeln!(console, "{TITLE}")?;
        for invocation in &self.invocations {
            writeln!(console, "\n{}", header_text(invocation.output()))?;
            console.flush()?;

            let outcome = match run_attached(invocation) {
                Ok(status) => JobOutcome::from_exit(invocation.index(), invocation.output(), status),
                Err(error) => {
                    writeln!(console, "{error:#}")?;
                    JobOutcome::not_started(invocation.index(), invocation.output(), &error)
                }
            };
            if outcome.status != JobStatus::Succeeded {
                tracing::warn!(
                    index = outcome.index,
                    exit_code = ?outcome.exit_code,
                    "slice failed; continuing with the next one"
                );
            }
            report.jobs.push(outcome);
        }
        writeln!(console)?;
        console.flush()?;

        report.finished_at = Utc::now();
        self.transition(RunState::Done)?;
        Ok(report)
    }

    /// Launches every job at once and drives the dashboard until all of them exit or the
    /// interrupt source fires. The dashboard is torn down on every path.
    ///
    /// An error while launching or waiting does not abandon the run: the remaining encoders
    /// are stopped, unreached slices are marked failed and the reason lands in
    /// [`RunReport::aborted`].
    pub fn run_parallel(
        &mut self,
        dashboard: Dashboard,
        interrupts: &mut dyn InterruptSource,
    ) -> Result<RunReport> {
        self.transition(RunState::ParallelRun)?;
        let mut report = RunReport::new(RunMode::Parallel, Utc::now());
        let mut jobs = ParallelJobs::default();

        let mut interrupted = false;
        let mut failure = self.launch_all(&dashboard, &mut jobs).err();
        if failure.is_none() {
            match self.wait_all(&mut jobs, interrupts) {
                Ok(fired) => interrupted = fired,
                Err(error) => failure = Some(error),
            }
        }

        let aborted = failure.map(|error| format!("{error:#}"));
        if interrupted || aborted.is_some() {
            if let Some(reason) = &aborted {
                tracing::warn!(remaining = jobs.running.len(), %reason, "parallel run aborted");
            } else {
                tracing::info!(remaining = jobs.running.len(), "interrupted; stopping encoders");
            }
            jobs.stop_remaining(aborted.as_deref());
            if let Some(reason) = &aborted {
                for invocation in &self.invocations {
                    jobs.outcomes.entry(invocation.index()).or_insert_with(|| {
                        JobOutcome::aborted(invocation.index(), invocation.output(), None, reason)
                    });
                }
            }
        } else {
            // Children are gone, so every reader sees EOF and every consumer a hang-up.
            for worker in jobs.workers.drain(..) {
                if worker.join().is_err() {
                    tracing::warn!("dashboard worker thread panicked");
                }
            }
        }

        report.captured = dashboard
            .teardown()
            .context("failed to tear down the dashboard")?;
        report.interrupted = interrupted;
        report.aborted = aborted;
        report.jobs = jobs.outcomes.into_values().collect();
        report.finished_at = Utc::now();
        self.transition(RunState::Done)?;
        Ok(report)
    }

    fn launch_all(&self, dashboard: &Dashboard, jobs: &mut ParallelJobs) -> Result<()> {
        for invocation in &self.invocations {
            let index = invocation.index();
            match ProcessHandle::launch(invocation) {
                Ok(mut handle) => {
                    let stream = handle.take_progress();
                    jobs.running.push((handle, invocation.output().to_path_buf()));
                    let (sender, receiver) = mpsc::channel();
                    if let Some(stream) = stream {
                        jobs.workers.push(spawn_reader(index, stream, sender)?);
                    }
                    let consumer = dashboard.spawn_consumer(index, receiver, self.tick)?;
                    jobs.workers.push(consumer);
                }
                Err(error) => {
                    tracing::warn!(index, error = %format!("{error:#}"), "encoder failed to start");
                    dashboard.paint_progress(index, &format!("failed to start: {error:#}"))?;
                    jobs.outcomes.insert(
                        index,
                        JobOutcome::not_started(index, invocation.output(), &error),
                    );
                }
            }
        }
        Ok(())
    }

    /// Polls the children once per tick. Returns `true` when the interrupt source fired.
    fn wait_all(
        &self,
        jobs: &mut ParallelJobs,
        interrupts: &mut dyn InterruptSource,
    ) -> Result<bool> {
        while !jobs.running.is_empty() {
            let mut slot = 0;
            while slot < jobs.running.len() {
                let Some(status) = jobs.running[slot].0.try_wait()? else {
                    slot += 1;
                    continue;
                };
                let (handle, output) = jobs.running.remove(slot);
                tracing::debug!(index = handle.index(), %status, "encoder exited");
                jobs.outcomes.insert(
                    handle.index(),
                    JobOutcome::from_exit(handle.index(), &output, status),
                );
            }
            if jobs.running.is_empty() {
                break;
            }
            if interrupts.poll_interrupt(self.tick)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Bookkeeping for one parallel run.
#[derive(Default)]
struct ParallelJobs {
    running: Vec<(ProcessHandle, PathBuf)>,
    outcomes: BTreeMap<usize, JobOutcome>,
    workers: Vec<JoinHandle<()>>,
}

impl ParallelJobs {
    /// Kills whatever is still running. With an abort reason the slices count as failed,
    /// otherwise as interrupted.
    fn stop_remaining(&mut self, aborted: Option<&str>) {
        for (handle, output) in self.running.drain(..) {
            let index = handle.index();
            let pid = handle.id();
            let exit_code = match handle.kill() {
                Ok(status) => status.code(),
                Err(error) => {
                    tracing::warn!(index, pid, error = %format!("{error:#}"), "failed to stop encoder");
                    None
                }
            };
            tracing::debug!(index, pid, "encoder stopped");
            let outcome = match aborted {
                Some(reason) => JobOutcome::aborted(index, &output, exit_code, reason),
                None => JobOutcome::interrupted(index, &output, exit_code),
            };
            self.outcomes.insert(index, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::encoder::EncoderProgram;
    use crate::interrupt::NoInterrupt;
    use crate::logging::LogGate;
    use crate::paths::SliceNaming;
    use crate::slices::plan_slices;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn controller_runs_once() {
        let mut controller = RunController::new(Vec::new(), Duration::from_millis(1));
        assert_eq!(controller.state(), RunState::Idle);

        let mut console = Vec::new();
        let report = controller.run_sequential(&mut console).unwrap();
        assert_eq!(controller.state(), RunState::Done);
        assert!(report.jobs.is_empty());
        assert_eq!(String::from_utf8(console).unwrap(), "Starting...\n\n");

        let error = controller.run_sequential(&mut Vec::new()).unwrap_err();
        assert!(error.to_string().contains("invalid run transition"));
    }

    #[test]
    fn empty_parallel_run_still_tears_down() {
        let dashboard = Dashboard::open(
            &[],
            crate::dashboard::Surface::Detached,
            Box::new(std::io::sink()),
        )
        .unwrap();
        let mut controller = RunController::new(Vec::new(), Duration::from_millis(1));
        let report = controller
            .run_parallel(dashboard, &mut NoInterrupt)
            .unwrap();
        assert_eq!(report.captured, vec![TITLE]);
        assert!(!report.interrupted);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn launch_warnings_wait_until_the_terminal_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let program = EncoderProgram {
            path: dir.path().join("no-such-ffmpeg"),
            mode_label: "explicit",
        };
        let naming = SliceNaming::new(dir.path(), ".mkv");
        let invocations: Vec<_> = plan_slices(&["1", "2"], &naming)
            .unwrap()
            .iter()
            .map(|job| {
                EncoderInvocation::for_job(&program, Path::new("talk.mp4"), job, &[]).unwrap()
            })
            .collect();
        let outputs: Vec<_> = invocations
            .iter()
            .map(|invocation| invocation.output().to_path_buf())
            .collect();

        let tty = SharedBuffer::default();
        let gate = LogGate::new(Box::new(tty.clone()));
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(gate.clone())
            .finish();

        let report = tracing::subscriber::with_default(subscriber, || {
            let dashboard = Dashboard::emulated_terminal(
                &outputs,
                Box::new(tty.clone()),
                (200, 24),
                Some(gate.clone()),
            )
            .unwrap();
            RunController::new(invocations, Duration::from_millis(1))
                .run_parallel(dashboard, &mut NoInterrupt)
                .unwrap()
        });
        assert_eq!(report.jobs[0].status, JobStatus::Failed);

        let written = String::from_utf8_lossy(&tty.0.lock().unwrap()).into_owned();
        let left = written
            .find("\u{1b}[?1049l")
            .expect("alternate screen should be left");
        let warning = written
            .find("encoder failed to start")
            .expect("warning should be written after teardown");
        assert!(warning > left, "{written:?}");
        assert!(written[..left].contains("failed to start: "));
    }
}
