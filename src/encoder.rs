use std::ffi::OsString;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;

/// Where the ffmpeg binary comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderMode {
    #[default]
    Auto,
    System,
    Sidecar,
}

impl EncoderMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::System => "system",
            Self::Sidecar => "sidecar",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EncoderConfig {
    pub mode: EncoderMode,
    /// Explicit binary; wins over `mode`.
    pub path: Option<PathBuf>,
}

/// The resolved encoder program and how it was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProgram {
    pub path: PathBuf,
    pub mode_label: &'static str,
}

pub fn resolve_encoder_program(config: &EncoderConfig) -> Result<EncoderProgram> {
    if let Some(path) = &config.path {
        return Ok(EncoderProgram {
            path: path.clone(),
            mode_label: "explicit",
        });
    }

    match config.mode {
        EncoderMode::Auto | EncoderMode::System => Ok(EncoderProgram {
            path: PathBuf::from("ffmpeg"),
            mode_label: config.mode.label(),
        }),
        EncoderMode::Sidecar => {
            #[cfg(feature = "sidecar_ffmpeg")]
            {
                use anyhow::Context;

                let path = ffmpeg_sidecar::paths::ffmpeg_path();
                if !path.exists() {
                    ffmpeg_sidecar::download::auto_download()
                        .context("failed to auto-download ffmpeg sidecar binary")?;
                }
                Ok(EncoderProgram {
                    path,
                    mode_label: config.mode.label(),
                })
            }
            #[cfg(not(feature = "sidecar_ffmpeg"))]
            {
                Err(anyhow!(
                    "ffmpeg sidecar mode requested but ffslice was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`."
                ))
            }
        }
    }
}

/// Maps a spawn failure to an actionable message.
pub fn spawn_error(program: &EncoderProgram, args: &[OsString], error: io::Error) -> anyhow::Error {
    if error.kind() == ErrorKind::NotFound {
        anyhow!(
            "encoder executable not found (mode={}, resolved_path={}). Install ffmpeg, set `encoder.path` in the config, or pass --encoder.",
            program.mode_label,
            program.path.display()
        )
    } else {
        anyhow!(
            "failed to spawn encoder process (mode={}, resolved_path={}, args='{}'): {error}",
            program.mode_label,
            program.path.display(),
            args.iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        )
    }
}

/// Basic sanity check on an encoder output path.
pub fn validate_output_path(output_path: &Path) -> Result<()> {
    let path_str = output_path.to_string_lossy();
    if path_str.is_empty() {
        bail!("Output path is empty");
    }
    if path_str.len() > 1024 {
        bail!("Output path is suspiciously long");
    }
    if path_str.chars().any(|c| c.is_control()) {
        bail!("Output path contains invalid control characters");
    }
    Ok(())
}
