use anyhow::Error;
use serde::Serialize;

use crate::timecode::TimeMark;

/// Exit status used when the user interrupts a parallel run (128 + SIGINT).
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SliceError {
    #[error("invalid time format '{input}': {reason}")]
    InvalidTimeFormat { input: String, reason: &'static str },

    #[error(
        "odd number of slice marks ({count}); marks must come in pairs of START TIME and STOP TIME"
    )]
    OddSliceMarkCount { count: usize },

    #[error("slice {index} stops at {stop} which is not after its start {start}")]
    EmptySlice {
        index: usize,
        start: TimeMark,
        stop: TimeMark,
    },

    #[error("encoder rejected the arguments during the trial run (exit code {code})")]
    ValidationFailed { code: i32 },

    #[error("slice {index} failed: encoder {}", describe_exit(.code))]
    JobExecutionFailed { index: usize, code: Option<i32> },

    #[error("interrupted")]
    Interrupted,
}

impl SliceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTimeFormat { .. } => "invalid_time_format",
            Self::OddSliceMarkCount { .. } => "odd_slice_mark_count",
            Self::EmptySlice { .. } => "empty_slice",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::JobExecutionFailed { .. } => "job_execution_failed",
            Self::Interrupted => "interrupted",
        }
    }

    /// Process exit status the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ValidationFailed { code } if *code != 0 => *code,
            Self::Interrupted => INTERRUPTED_EXIT_CODE,
            _ => 1,
        }
    }

    /// Input-shape errors are detected before any encoder process is spawned.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTimeFormat { .. } | Self::OddSliceMarkCount { .. } | Self::EmptySlice { .. }
        )
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code().to_owned(),
                message: self.to_string(),
            },
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal or could not be started".to_owned(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
}

pub fn find_slice_error(error: &Error) -> Option<&SliceError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<SliceError>())
}
