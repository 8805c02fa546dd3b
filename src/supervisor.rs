use std::process::{Child, ChildStderr, ChildStdin, Command, ExitStatus, Stdio};

use anyhow::{anyhow, Context, Result};

use crate::encoder::spawn_error;
use crate::invocation::EncoderInvocation;

/// A running encoder child for one slice job.
///
/// Stdin stays piped and open for the lifetime of the child: leaving it attached to the
/// terminal lets ffmpeg grab keystrokes and mangle the tty settings under the dashboard.
pub struct ProcessHandle {
    index: usize,
    child: Child,
    stdin: Option<ChildStdin>,
    progress: Option<ChildStderr>,
    reaped: bool,
}

impl ProcessHandle {
    /// Spawns the encoder without blocking on its output.
    pub fn launch(invocation: &EncoderInvocation) -> Result<Self> {
        let program = invocation.program();
        let mut child = Command::new(&program.path)
            .args(invocation.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| spawn_error(program, invocation.args(), error))?;

        let stdin = child.stdin.take();
        let progress = child.stderr.take();
        tracing::debug!(
            index = invocation.index(),
            pid = child.id(),
            command = %invocation.command_line(),
            "launched encoder"
        );

        Ok(Self {
            index: invocation.index(),
            child,
            stdin,
            progress,
            reaped: false,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Hands the progress stream (the child's stderr) to a reader. Only the first call
    /// returns it.
    pub fn take_progress(&mut self) -> Option<ChildStderr> {
        self.progress.take()
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let status = self
            .child
            .try_wait()
            .with_context(|| format!("failed polling encoder for slice {}", self.index))?;
        if status.is_some() {
            self.stdin.take();
            self.reaped = true;
        }
        Ok(status)
    }

    /// Blocks until the child exits.
    pub fn wait(mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .wait()
            .with_context(|| format!("failed waiting for encoder for slice {}", self.index))?;
        self.stdin.take();
        self.reaped = true;
        Ok(status)
    }

    /// Terminates the child and reaps it.
    pub fn kill(mut self) -> Result<ExitStatus> {
        self.stdin.take();
        if let Err(error) = self.child.kill() {
            // The child may have exited between the last poll and now.
            if self.child.try_wait().ok().flatten().is_none() {
                return Err(anyhow!(
                    "failed to kill encoder for slice {}: {error}",
                    self.index
                ));
            }
        }
        let status = self
            .child
            .wait()
            .with_context(|| format!("failed reaping encoder for slice {}", self.index))?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.reaped {
            tracing::warn!(index = self.index, "dropping live encoder; killing it");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Runs an invocation with the console attached and blocks until it exits.
pub fn run_attached(invocation: &EncoderInvocation) -> Result<ExitStatus> {
    let program = invocation.program();
    tracing::debug!(
        index = invocation.index(),
        command = %invocation.command_line(),
        "running encoder attached"
    );
    let status = Command::new(&program.path)
        .args(invocation.args())
        .status()
        .map_err(|error| spawn_error(program, invocation.args(), error))?;
    tracing::debug!(index = invocation.index(), %status, "encoder exited");
    Ok(status)
}
