//! Command-line preprocessing that runs before clap sees the arguments.
//!
//! `@path` arguments are replaced by the lines of that file (one argument per line, blank
//! lines dropped, nested `@file`s expanded too), which keeps long slice lists and encoder
//! options out of the shell. The historical single-dash spellings `-sls`, `-mp` and `-ss`
//! are rewritten to their long forms.

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

const ARG_FILE_PREFIX: char = '@';
const MAX_NESTING: usize = 8;

pub fn expand_arg_files<I>(args: I) -> Result<Vec<OsString>>
where
    I: IntoIterator<Item = OsString>,
{
    let mut expanded = Vec::new();
    for arg in args {
        expand_one(arg, 0, &mut expanded)?;
    }
    Ok(expanded)
}

fn expand_one(arg: OsString, depth: usize, expanded: &mut Vec<OsString>) -> Result<()> {
    let Some(path) = arg
        .to_str()
        .and_then(|text| text.strip_prefix(ARG_FILE_PREFIX))
        .filter(|path| !path.is_empty())
    else {
        expanded.push(arg);
        return Ok(());
    };

    if depth >= MAX_NESTING {
        bail!("argument files nested deeper than {MAX_NESTING} levels at '@{path}'");
    }
    let contents = fs::read_to_string(Path::new(path))
        .with_context(|| format!("failed to read argument file {path}"))?;
    for line in contents.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        expand_one(OsString::from(line), depth + 1, expanded)?;
    }
    Ok(())
}

/// Rewrites legacy single-dash flags. The program name (first item) is left alone.
pub fn normalize_legacy_flags(args: Vec<OsString>) -> Vec<OsString> {
    args.into_iter()
        .enumerate()
        .map(|(position, arg)| {
            if position == 0 {
                return arg;
            }
            match arg.to_str() {
                Some("-sls") => OsString::from("--slices"),
                Some("-mp") => OsString::from("--multiprocess"),
                Some("-ss") => OsString::from("--ss"),
                _ => arg,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn expands_one_argument_per_line() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("args.txt");
        fs::write(
            &file,
            "--slices\n5.325 7.34 8.325 9.34\n15.23 18.49\n\n-preset\nsuperfast\r\n-qp\n4\n",
        )
        .unwrap();

        let at_file = format!("@{}", file.display());
        let expanded =
            expand_arg_files(os(&["ffslice", "-i", "in.mp4", &at_file, "out.mkv"])).unwrap();
        assert_eq!(
            expanded,
            os(&[
                "ffslice",
                "-i",
                "in.mp4",
                "--slices",
                "5.325 7.34 8.325 9.34",
                "15.23 18.49",
                "-preset",
                "superfast",
                "-qp",
                "4",
                "out.mkv",
            ])
        );
    }

    #[test]
    fn nested_files_expand_and_cycles_stop() {
        let dir = tempdir().unwrap();
        let inner = dir.path().join("inner.txt");
        let outer = dir.path().join("outer.txt");
        fs::write(&inner, "-crf\n18\n").unwrap();
        fs::write(&outer, format!("-preset\nfast\n@{}\n", inner.display())).unwrap();

        let expanded = expand_arg_files(os(&[&format!("@{}", outer.display())])).unwrap();
        assert_eq!(expanded, os(&["-preset", "fast", "-crf", "18"]));

        let looping = dir.path().join("loop.txt");
        fs::write(&looping, format!("@{}\n", looping.display())).unwrap();
        let error = expand_arg_files(os(&[&format!("@{}", looping.display())])).unwrap_err();
        assert!(error.to_string().contains("nested deeper"));
    }

    #[test]
    fn missing_file_and_bare_at_sign() {
        assert!(expand_arg_files(os(&["@/nonexistent/args.txt"])).is_err());
        assert_eq!(expand_arg_files(os(&["@"])).unwrap(), os(&["@"]));
    }

    #[test]
    fn legacy_flags_are_rewritten() {
        let normalized = normalize_legacy_flags(os(&[
            "-mp", "-sls", "5", "7", "-ss", "3", "-mp", "-preset", "fast", "out.mkv",
        ]));
        assert_eq!(
            normalized,
            os(&[
                "-mp",
                "--slices",
                "5",
                "7",
                "--ss",
                "3",
                "--multiprocess",
                "-preset",
                "fast",
                "out.mkv",
            ])
        );
    }
}
