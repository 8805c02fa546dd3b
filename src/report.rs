use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SliceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub index: usize,
    pub output: PathBuf,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn from_exit(index: usize, output: &Path, status: ExitStatus) -> Self {
        Self {
            index,
            output: output.to_path_buf(),
            status: if status.success() {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            },
            exit_code: status.code(),
            error: None,
        }
    }

    pub fn not_started(index: usize, output: &Path, error: &anyhow::Error) -> Self {
        Self {
            index,
            output: output.to_path_buf(),
            status: JobStatus::Failed,
            exit_code: None,
            error: Some(format!("{error:#}")),
        }
    }

    pub fn interrupted(index: usize, output: &Path, exit_code: Option<i32>) -> Self {
        Self {
            index,
            output: output.to_path_buf(),
            status: JobStatus::Interrupted,
            exit_code,
            error: None,
        }
    }

    /// A slice stopped or never reached because the run itself failed.
    pub fn aborted(index: usize, output: &Path, exit_code: Option<i32>, reason: &str) -> Self {
        Self {
            index,
            output: output.to_path_buf(),
            status: JobStatus::Failed,
            exit_code,
            error: Some(format!("run aborted: {reason}")),
        }
    }

    pub fn failure(&self) -> Option<SliceError> {
        (self.status == JobStatus::Failed).then_some(SliceError::JobExecutionFailed {
            index: self.index,
            code: self.exit_code,
        })
    }
}

/// What a finished (or interrupted) run did, job by job.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub interrupted: bool,
    /// Why a parallel run stopped early on an internal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub jobs: Vec<JobOutcome>,
    /// Dashboard rows captured at teardown; empty in sequential mode.
    pub captured: Vec<String>,
}

impl RunReport {
    pub fn new(mode: RunMode, started_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            started_at,
            finished_at: started_at,
            interrupted: false,
            aborted: None,
            jobs: Vec::new(),
            captured: Vec::new(),
        }
    }

    pub fn failures(&self) -> Vec<SliceError> {
        self.jobs.iter().filter_map(JobOutcome::failure).collect()
    }

    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            SliceError::Interrupted.exit_code()
        } else if self.aborted.is_some() || self.jobs.iter().any(|job| job.status != JobStatus::Succeeded) {
            1
        } else {
            0
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize run report")?;
        fs::write(path, json + "\n")
            .with_context(|| format!("failed to write run report {}", path.display()))
    }
}
