use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::encoder::{validate_output_path, EncoderProgram};
use crate::slices::SliceJob;
use crate::timecode::{self, TimeMark};

/// The argument vector for one encoder run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInvocation {
    index: usize,
    program: EncoderProgram,
    args: Vec<OsString>,
    output: PathBuf,
}

impl EncoderInvocation {
    /// Seek and input go before the passthrough options; the output path is always last.
    pub fn for_job(
        program: &EncoderProgram,
        input: &Path,
        job: &SliceJob,
        passthrough: &[OsString],
    ) -> Result<Self> {
        validate_output_path(&job.output)?;

        let mut args: Vec<OsString> = vec![
            "-ss".into(),
            timecode::format(job.start).into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-hide_banner".into(),
            "-t".into(),
            timecode::format(job.duration()).into(),
            "-loglevel".into(),
            "error".into(),
            "-stats".into(),
        ];
        args.extend(passthrough.iter().cloned());
        args.push("-y".into());
        args.push(job.output.as_os_str().to_owned());

        Ok(Self {
            index: job.index,
            program: program.clone(),
            args,
            output: job.output.clone(),
        })
    }

    /// Short pre-flight run that writes to the real output target.
    pub fn for_trial(
        program: &EncoderProgram,
        input: &Path,
        duration: TimeMark,
        passthrough: &[OsString],
        output: &Path,
    ) -> Result<Self> {
        validate_output_path(output)?;

        let mut args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-t".into(),
            trial_duration_arg(duration).into(),
            "-y".into(),
            "-hide_banner".into(),
        ];
        args.extend(passthrough.iter().cloned());
        args.push(output.as_os_str().to_owned());

        Ok(Self {
            index: 0,
            program: program.clone(),
            args,
            output: output.to_path_buf(),
        })
    }

    /// 1-based slice index; `0` for the trial run.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn program(&self) -> &EncoderProgram {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Lossy rendering for logs and error messages; the spawned argv is never rebuilt from it.
    pub fn command_line(&self) -> String {
        let mut line = self.program.path.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Seconds with millisecond precision, e.g. `0.1` stays `0.100`.
fn trial_duration_arg(duration: TimeMark) -> String {
    format!(
        "{}.{:03}",
        duration.as_millis() / 1_000,
        duration.subsec_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::SliceNaming;
    use crate::slices::plan_slices;

    fn program() -> EncoderProgram {
        EncoderProgram {
            path: PathBuf::from("ffmpeg"),
            mode_label: "system",
        }
    }

    #[test]
    fn job_arguments_follow_fixed_order() {
        let naming = SliceNaming::new("out/ffslices_in.mp4", ".mkv");
        let jobs = plan_slices(&["1:02:03.5", "1:02:09"], &naming).unwrap();
        let passthrough = vec![OsString::from("-preset"), OsString::from("superfast")];
        let invocation =
            EncoderInvocation::for_job(&program(), Path::new("in.mp4"), &jobs[0], &passthrough)
                .unwrap();

        assert_eq!(invocation.index(), 1);
        assert_eq!(
            invocation.args(),
            [
                "-ss",
                "01:02:03.500",
                "-i",
                "in.mp4",
                "-hide_banner",
                "-t",
                "00:00:05.500",
                "-loglevel",
                "error",
                "-stats",
                "-preset",
                "superfast",
                "-y",
                "out/ffslices_in.mp4/1) 1-02-03.5__1-02-09.mkv",
            ]
        );
        assert_eq!(
            invocation.args().last().map(OsString::as_os_str),
            Some(invocation.output().as_os_str())
        );
    }

    #[test]
    fn trial_arguments_end_with_real_output() {
        let passthrough = vec![OsString::from("-qp"), OsString::from("4")];
        let invocation = EncoderInvocation::for_trial(
            &program(),
            Path::new("in.mp4"),
            TimeMark::from_millis(100),
            &passthrough,
            Path::new("out/cut.mkv"),
        )
        .unwrap();

        assert_eq!(invocation.index(), 0);
        assert_eq!(
            invocation.args(),
            [
                "-v",
                "error",
                "-i",
                "in.mp4",
                "-t",
                "0.100",
                "-y",
                "-hide_banner",
                "-qp",
                "4",
                "out/cut.mkv",
            ]
        );
        assert_eq!(
            invocation.command_line(),
            "ffmpeg -v error -i in.mp4 -t 0.100 -y -hide_banner -qp 4 out/cut.mkv"
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_reach_the_encoder_unchanged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let raw_input = OsStr::from_bytes(b"caf\xe9.mp4");
        let raw_dir = OsStr::from_bytes(b"out/\xff");
        let naming = SliceNaming::new(Path::new(raw_dir), ".mkv");
        let jobs = plan_slices(&["0", "1"], &naming).unwrap();
        let invocation =
            EncoderInvocation::for_job(&program(), Path::new(raw_input), &jobs[0], &[]).unwrap();

        assert_eq!(invocation.args()[3].as_os_str(), raw_input);
        let last = invocation.args().last().unwrap();
        assert_eq!(last.as_os_str(), jobs[0].output.as_os_str());
        assert!(last.as_bytes().starts_with(b"out/\xff/"));
    }
}
