use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

use crate::encoder::EncoderProgram;
use crate::error::SliceError;
use crate::invocation::EncoderInvocation;
use crate::supervisor::run_attached;
use crate::timecode::TimeMark;

pub const DEFAULT_TRIAL_DURATION: TimeMark = TimeMark::from_millis(100);

/// Runs the encoder for a fraction of a second against the real output target to catch bad
/// arguments before any full-length slice starts. The produced file is removed afterwards.
pub fn run_trial(
    program: &EncoderProgram,
    input: &Path,
    duration: TimeMark,
    passthrough: &[OsString],
    output: &Path,
) -> Result<()> {
    let invocation = EncoderInvocation::for_trial(program, input, duration, passthrough, output)?;
    tracing::info!(command = %invocation.command_line(), "trial run");

    let status = run_attached(&invocation)?;
    if !status.success() {
        // Killed by a signal: no code to forward, report a generic failure.
        let code = status.code().unwrap_or(1);
        return Err(SliceError::ValidationFailed { code }.into());
    }

    match fs::remove_file(output) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error)
            .with_context(|| format!("failed to remove trial output {}", output.display())),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::tempdir;

    use super::*;
    use crate::error::find_slice_error;

    fn script(dir: &Path, body: &str) -> EncoderProgram {
        let path = dir.join("fake-ffmpeg");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        EncoderProgram {
            path,
            mode_label: "explicit",
        }
    }

    #[test]
    fn successful_trial_removes_its_output() {
        let dir = tempdir().unwrap();
        // Writes its last argument, like ffmpeg would.
        let program = script(dir.path(), r#"for last; do :; done; : > "$last""#);
        let output = dir.path().join("cut.mp4");

        run_trial(&program, Path::new("in.mp4"), DEFAULT_TRIAL_DURATION, &[], &output).unwrap();
        assert!(!output.exists());
    }

    #[test]
    fn missing_trial_output_is_not_an_error() {
        let dir = tempdir().unwrap();
        let program = script(dir.path(), "exit 0");
        let output = dir.path().join("never-written.mp4");
        run_trial(&program, Path::new("in.mp4"), DEFAULT_TRIAL_DURATION, &[], &output).unwrap();
    }

    #[test]
    fn rejected_trial_carries_encoder_exit_code() {
        let dir = tempdir().unwrap();
        let program = script(dir.path(), "exit 7");
        let output = dir.path().join("cut.mp4");

        let error = run_trial(&program, Path::new("in.mp4"), DEFAULT_TRIAL_DURATION, &[], &output)
            .unwrap_err();
        assert_eq!(
            find_slice_error(&error),
            Some(&SliceError::ValidationFailed { code: 7 })
        );
    }
}
