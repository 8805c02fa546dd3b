use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser};

use crate::argfile::{expand_arg_files, normalize_legacy_flags};
use crate::timecode;

const AFTER_HELP: &str = "\
Everything ffslice does not recognise is handed to ffmpeg unchanged; the last argument is the
output path. Each slice is written to '<output dir>/ffslices_<input name>/<n>) <start>__<stop><ext>'.
The marks after --slices end at the first argument that starts with '-'.

Arguments can be read from a file with @FILE, one argument per line:

    ffslice -i talk.mp4 @slices.txt talk.mkv

    slices.txt:
        --slices
        5.325 7.34 8.325 9.34
        15.23 18.49
        -preset
        superfast

The single-dash spellings -sls, -mp and -ss are accepted; -ss is ignored because every slice
defines its own seek.";

#[derive(Debug, Parser)]
#[command(name = "ffslice")]
#[command(version = env!("FFSLICE_BUILD_VERSION"))]
#[command(about = "Cut time-bounded excerpts out of one media file with ffmpeg")]
#[command(after_help = AFTER_HELP)]
pub struct Cli {
    /// Input media file.
    #[arg(short = 'i', long = "input", value_name = "INPUT")]
    pub input: PathBuf,

    /// Start and stop marks (HH:MM:SS.mmm, MM:SS or seconds), in pairs.
    #[arg(long = "slices", num_args = 1.., required = true, value_name = "START STOP")]
    pub slices: Vec<String>,

    /// Run one encoder per slice in parallel with a live dashboard.
    #[arg(long = "multiprocess", visible_alias = "parallel", default_value_t = false)]
    pub multiprocess: bool,

    #[arg(long = "ss", hide = true, allow_hyphen_values = true)]
    pub ignored_seek: Option<String>,

    /// YAML config file.
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Encoder executable; overrides the config.
    #[arg(long = "encoder", value_name = "PATH")]
    pub encoder: Option<PathBuf>,

    /// Skip the short validation run before slicing.
    #[arg(long = "no-trial", default_value_t = false)]
    pub no_trial: bool,

    /// Write a JSON run report here.
    #[arg(long = "report", value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Encoder options followed by the output path.
    #[arg(
        value_name = "ENCODER_ARGS... OUTPUT",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 0..
    )]
    pub encoder_args: Vec<OsString>,
}

/// Parsed command line with the output split off the passthrough arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub input: PathBuf,
    pub slices: Vec<String>,
    pub multiprocess: bool,
    pub config: Option<PathBuf>,
    pub encoder: Option<PathBuf>,
    pub no_trial: bool,
    pub report: Option<PathBuf>,
    pub passthrough: Vec<OsString>,
    pub output: PathBuf,
}

pub enum Parsed {
    /// No arguments at all.
    Help,
    Run(Invocation),
}

pub fn print_help() -> Result<()> {
    Cli::command().print_help()?;
    println!();
    Ok(())
}

/// Expands argument files, rewrites legacy flags and parses. Clap handles `--help`,
/// `--version` and usage errors itself by exiting.
pub fn parse_args<I>(args: I) -> Result<Parsed>
where
    I: IntoIterator<Item = OsString>,
{
    let args = normalize_legacy_flags(expand_arg_files(args)?);
    if args.len() <= 1 {
        return Ok(Parsed::Help);
    }
    let cli = Cli::parse_from(partition_known_args(args));
    cli.into_invocation().map(Parsed::Run)
}

enum Takes {
    Nothing,
    Value,
    Marks,
}

fn known_option(arg: &str) -> Option<Takes> {
    match arg {
        "-h" | "--help" | "-V" | "--version" | "--multiprocess" | "--parallel" | "--no-trial" => {
            Some(Takes::Nothing)
        }
        "-i" | "--input" | "--ss" | "--config" | "--encoder" | "--report" => Some(Takes::Value),
        "--slices" => Some(Takes::Marks),
        _ => match arg.split_once('=') {
            Some((name, _)) if matches!(known_option(name), Some(Takes::Value)) => {
                Some(Takes::Nothing)
            }
            _ => None,
        },
    }
}

fn ends_marks(arg: &OsString) -> bool {
    arg.to_str()
        .map_or(true, |text| text.len() > 1 && text.starts_with('-'))
}

/// Moves every argument ffslice does not own behind a `--`, wherever it appeared.
///
/// Marks after `--slices` run up to the first argument starting with `-`, so encoder options
/// can follow them directly, and ffslice flags may come after the encoder options.
pub fn partition_known_args(args: Vec<OsString>) -> Vec<OsString> {
    let mut args = args.into_iter().peekable();
    let mut known: Vec<OsString> = args.next().into_iter().collect();
    let mut passthrough = Vec::new();

    while let Some(arg) = args.next() {
        let Some(text) = arg.to_str() else {
            passthrough.push(arg);
            continue;
        };
        if text == "--" {
            passthrough.extend(args.by_ref());
            break;
        }
        match known_option(text) {
            Some(Takes::Nothing) => known.push(arg),
            Some(Takes::Value) => {
                known.push(arg);
                known.extend(args.next());
            }
            Some(Takes::Marks) => {
                known.push(arg);
                while let Some(mark) = args.next_if(|next| !ends_marks(next)) {
                    known.push(mark);
                }
            }
            None => passthrough.push(arg),
        }
    }

    if !passthrough.is_empty() {
        known.push(OsString::from("--"));
        known.extend(passthrough);
    }
    known
}

impl Cli {
    pub fn into_invocation(self) -> Result<Invocation> {
        let Self {
            input,
            mut slices,
            multiprocess,
            ignored_seek,
            config,
            encoder,
            no_trial,
            report,
            mut encoder_args,
        } = self;

        if let Some(seek) = ignored_seek {
            tracing::debug!(%seek, "ignoring -ss; slices define the seek");
        }

        // `--slices 5 7 out.mkv` with no encoder options: the output lands in the mark list.
        if encoder_args.is_empty() {
            if let Some(last) = slices.last() {
                if slices.len() > 1 && timecode::parse(last).is_err() {
                    encoder_args.extend(slices.pop().map(OsString::from));
                }
            }
        }

        let Some(output) = encoder_args.pop() else {
            bail!("missing output path; it must be the last argument");
        };

        Ok(Invocation {
            input,
            slices,
            multiprocess,
            config,
            encoder,
            no_trial,
            report,
            passthrough: encoder_args,
            output: PathBuf::from(output),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    fn parse(args: &[&str]) -> Invocation {
        let mut argv = os(&["ffslice"]);
        argv.extend(os(args));
        let args = partition_known_args(normalize_legacy_flags(argv));
        Cli::try_parse_from(args)
            .unwrap()
            .into_invocation()
            .unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn passthrough_and_output_follow_slices() {
        let invocation = parse(&[
            "-i", "in.mp4", "--slices", "5.325", "7.34", "--multiprocess", "-preset", "fast",
            "out.mkv",
        ]);
        assert_eq!(invocation.input, PathBuf::from("in.mp4"));
        assert_eq!(invocation.slices, vec!["5.325", "7.34"]);
        assert!(invocation.multiprocess);
        assert_eq!(invocation.passthrough, os(&["-preset", "fast"]));
        assert_eq!(invocation.output, PathBuf::from("out.mkv"));
    }

    #[test]
    fn encoder_options_directly_after_marks() {
        let invocation = parse(&[
            "-i",
            "in.mp4",
            "--slices",
            "5.325 7.34",
            "8.325",
            "9.34",
            "-preset",
            "superfast",
            "out.mkv",
        ]);
        assert_eq!(invocation.slices, vec!["5.325 7.34", "8.325", "9.34"]);
        assert_eq!(invocation.passthrough, os(&["-preset", "superfast"]));
        assert_eq!(invocation.output, PathBuf::from("out.mkv"));
        assert!(!invocation.multiprocess);
    }

    #[test]
    fn legacy_spellings_parse() {
        let invocation = parse(&[
            "-i", "in.mp4", "-ss", "3", "-mp", "-sls", "1:05", "1:10", "-c:v", "libx264",
            "-crf", "18", "out.mp4",
        ]);
        assert!(invocation.multiprocess);
        assert_eq!(invocation.slices, vec!["1:05", "1:10"]);
        assert_eq!(invocation.passthrough, os(&["-c:v", "libx264", "-crf", "18"]));
        assert_eq!(invocation.output, PathBuf::from("out.mp4"));
    }

    #[test]
    fn own_flags_may_follow_encoder_options() {
        let invocation = parse(&[
            "-i", "in.mp4", "-sls", "5", "7", "-preset", "fast", "-mp", "--report=run.json",
            "out.mkv",
        ]);
        assert!(invocation.multiprocess);
        assert_eq!(invocation.report, Some(PathBuf::from("run.json")));
        assert_eq!(invocation.passthrough, os(&["-preset", "fast"]));
        assert_eq!(invocation.output, PathBuf::from("out.mkv"));
    }

    #[test]
    fn help_text_argument_file_parses() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("slices.txt");
        fs::write(
            &file,
            "--slices\n5.325 7.34 8.325 9.34\n15.23 18.49\n-preset\nsuperfast\n",
        )
        .unwrap();

        let parsed = parse_args(os(&[
            "ffslice",
            "-i",
            "talk.mp4",
            &format!("@{}", file.display()),
            "talk.mkv",
        ]))
        .unwrap();
        let Parsed::Run(invocation) = parsed else {
            panic!("expected a run");
        };
        assert_eq!(
            invocation.slices,
            vec!["5.325 7.34 8.325 9.34", "15.23 18.49"]
        );
        assert_eq!(invocation.passthrough, os(&["-preset", "superfast"]));
        assert_eq!(invocation.output, PathBuf::from("talk.mkv"));
    }

    #[test]
    fn output_directly_after_marks() {
        let invocation = parse(&["-i", "in.mp4", "--parallel", "--slices", "5", "7", "out.mkv"]);
        assert!(invocation.multiprocess);
        assert_eq!(invocation.slices, vec!["5", "7"]);
        assert!(invocation.passthrough.is_empty());
        assert_eq!(invocation.output, PathBuf::from("out.mkv"));
    }

    #[test]
    fn partition_keeps_known_flags_and_fences_the_rest() {
        let partitioned = partition_known_args(os(&[
            "ffslice", "-vf", "scale=640:-1", "-i", "in.mp4", "--slices", "1", "2", "-an",
            "out.mkv",
        ]));
        assert_eq!(
            partitioned,
            os(&[
                "ffslice", "-i", "in.mp4", "--slices", "1", "2", "--", "-vf", "scale=640:-1",
                "-an", "out.mkv",
            ])
        );
    }

    #[test]
    fn missing_output_is_reported() {
        let args = ["ffslice", "-i", "in.mp4", "--slices", "5", "7"];
        let error = Cli::try_parse_from(args)
            .unwrap()
            .into_invocation()
            .unwrap_err();
        assert!(error.to_string().contains("missing output path"));
    }

    #[test]
    fn slices_are_required() {
        assert!(Cli::try_parse_from(["ffslice", "-i", "in.mp4", "out.mkv"]).is_err());
    }

    #[test]
    fn bare_invocation_asks_for_help() {
        let parsed = parse_args([OsString::from("ffslice")]).unwrap();
        assert!(matches!(parsed, Parsed::Help));
    }
}
