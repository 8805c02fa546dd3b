use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

pub const DEFAULT_CONTAINER_PREFIX: &str = "ffslices_";

/// Where slice outputs go: a per-input container directory next to the requested output,
/// with one file per slice carrying the output's extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceNaming {
    container_dir: PathBuf,
    suffix: OsString,
}

impl SliceNaming {
    pub fn new(container_dir: impl Into<PathBuf>, suffix: impl Into<OsString>) -> Self {
        Self {
            container_dir: container_dir.into(),
            suffix: suffix.into(),
        }
    }

    pub fn for_output(input: &Path, output: &Path, prefix: &str) -> Result<Self> {
        let input_name = input
            .file_name()
            .with_context(|| format!("input path has no file name: {}", input.display()))?;
        let dest_dir = output
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let mut container = OsString::from(prefix);
        container.push(input_name);

        let mut suffix = OsString::new();
        if let Some(ext) = output.extension() {
            suffix.push(".");
            suffix.push(ext);
        }

        Ok(Self::new(dest_dir.join(container), suffix))
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }

    pub fn suffix(&self) -> &OsStr {
        &self.suffix
    }

    /// `<index>) <start>__<stop><suffix>` with colons in the labels replaced by dashes.
    pub fn path_for(&self, index: usize, start_label: &str, stop_label: &str) -> PathBuf {
        let mut name = OsString::from(format!(
            "{index}) {}__{}",
            file_safe_label(start_label),
            file_safe_label(stop_label)
        ));
        name.push(&self.suffix);
        self.container_dir.join(name)
    }

    /// Creates the container directory. An existing directory is left alone.
    pub fn ensure_container_dir(&self) -> Result<()> {
        match fs::create_dir(&self.container_dir) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                if !self.container_dir.is_dir() {
                    bail!(
                        "slice container path exists but is not a directory: {}",
                        self.container_dir.display()
                    );
                }
                Ok(())
            }
            Err(error) => Err(error).with_context(|| {
                format!(
                    "failed to create slice container directory {}",
                    self.container_dir.display()
                )
            }),
        }
    }
}

fn file_safe_label(label: &str) -> String {
    label.trim().replace(':', "-")
}
