use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};

use ffslice::cli::{self, Invocation, Parsed};
use ffslice::config::{load_config, SlicerConfig};
use ffslice::dashboard::{Dashboard, Surface};
use ffslice::encoder::resolve_encoder_program;
use ffslice::error::{find_slice_error, SliceError};
use ffslice::interrupt::{
    install_signal_handlers, InterruptSource, NoInterrupt, TerminalKeys, WithSignals,
};
use ffslice::invocation::EncoderInvocation;
use ffslice::logging::init_logging;
use ffslice::paths::SliceNaming;
use ffslice::report::RunReport;
use ffslice::runner::RunController;
use ffslice::slices::{plan_slices, split_marks};
use ffslice::trial::run_trial;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            let slice_error = find_slice_error(&error);
            if slice_error.is_some_and(SliceError::is_input_error) {
                eprintln!("hint: marks are HH:MM:SS.mmm, MM:SS or seconds in start/stop pairs");
            }
            exit_code(slice_error.map_or(1, |error| error.exit_code()))
        }
    }
}

fn run() -> Result<ExitCode> {
    let invocation = match cli::parse_args(std::env::args_os())? {
        Parsed::Help => {
            cli::print_help()?;
            return Ok(ExitCode::SUCCESS);
        }
        Parsed::Run(invocation) => invocation,
    };

    match execute(&invocation) {
        Ok(report) => {
            finish(&invocation, &report)?;
            Ok(exit_code(report.exit_code()))
        }
        Err(error) => {
            let slice_error = find_slice_error(&error);
            if let (Some(path), Some(slice_error)) = (&invocation.report, slice_error) {
                write_envelope(path, slice_error)?;
            }
            Err(error)
        }
    }
}

fn execute(invocation: &Invocation) -> Result<RunReport> {
    let mut config = load_config(invocation.config.as_deref())?;
    apply_overrides(&mut config, invocation);
    init_logging(&config.log)?;

    let marks = split_marks(&invocation.slices);
    let naming = SliceNaming::for_output(
        &invocation.input,
        &invocation.output,
        &config.container_prefix,
    )?;
    let jobs = plan_slices(&marks, &naming).context("invalid --slices")?;
    tracing::info!(
        slices = jobs.len(),
        parallel = invocation.multiprocess,
        container = %naming.container_dir().display(),
        "planned slices"
    );

    let program = resolve_encoder_program(&config.encoder)?;
    if config.trial_run {
        run_trial(
            &program,
            &invocation.input,
            config.trial_duration()?,
            &invocation.passthrough,
            &invocation.output,
        )
        .context("trial run rejected the encoder arguments")?;
    }

    naming.ensure_container_dir()?;
    let invocations = jobs
        .iter()
        .map(|job| {
            EncoderInvocation::for_job(&program, &invocation.input, job, &invocation.passthrough)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut controller = RunController::new(invocations, config.poll_interval());
    if invocation.multiprocess {
        let outputs: Vec<PathBuf> = jobs.iter().map(|job| job.output.clone()).collect();
        let attached = io::stdout().is_terminal();
        install_signal_handlers()?;
        let (surface, mut interrupts): (Surface, Box<dyn InterruptSource>) = if attached {
            (Surface::Terminal, Box::new(WithSignals::new(TerminalKeys)))
        } else {
            (Surface::Detached, Box::new(WithSignals::new(NoInterrupt)))
        };
        let dashboard = Dashboard::open(&outputs, surface, Box::new(io::stdout()))?;
        controller.run_parallel(dashboard, interrupts.as_mut())
    } else {
        controller.run_sequential(&mut io::stdout().lock())
    }
}

fn apply_overrides(config: &mut SlicerConfig, invocation: &Invocation) {
    if let Some(path) = &invocation.encoder {
        config.encoder.path = Some(path.clone());
    }
    if invocation.no_trial {
        config.trial_run = false;
    }
}

fn finish(invocation: &Invocation, report: &RunReport) -> Result<()> {
    let mut stdout = io::stdout().lock();
    for line in &report.captured {
        writeln!(stdout, "{line}")?;
    }
    if report.interrupted {
        writeln!(stdout, "\nKeyboard interrupt.")?;
    }
    stdout.flush()?;

    for failure in report.failures() {
        eprintln!("error: {failure}");
    }
    if let Some(reason) = &report.aborted {
        eprintln!("error: parallel run aborted: {reason}");
    }

    if let Some(path) = &invocation.report {
        report.write_json(path)?;
    }
    Ok(())
}

fn write_envelope(path: &Path, error: &SliceError) -> Result<()> {
    let json = serde_json::to_string_pretty(&error.envelope())
        .context("failed to serialize error report")?;
    fs::write(path, json + "\n")
        .with_context(|| format!("failed to write run report {}", path.display()))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
