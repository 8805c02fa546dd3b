use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::encoder::EncoderConfig;
use crate::paths::DEFAULT_CONTAINER_PREFIX;
use crate::runner::DEFAULT_TICK;
use crate::timecode::{self, TimeMark};
use crate::trial::DEFAULT_TRIAL_DURATION;

const MAX_POLL_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SlicerConfig {
    pub encoder: EncoderConfig,
    /// Dashboard consumer tick and parallel wait-loop tick.
    pub poll_interval_ms: u64,
    pub trial_run: bool,
    pub trial_duration: String,
    pub container_prefix: String,
    pub log: LogConfig,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            poll_interval_ms: u64::try_from(DEFAULT_TICK.as_millis()).unwrap_or(100),
            trial_run: true,
            trial_duration: timecode::format(DEFAULT_TRIAL_DURATION),
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_owned(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive; `FFSLICE_LOG` overrides it.
    pub filter: String,
    /// Append logs here instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_owned(),
            file: None,
        }
    }
}

impl SlicerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            bail!(
                "poll_interval_ms must be between 1 and {MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            );
        }

        let trial = self.trial_duration()?;
        if trial.is_zero() {
            bail!("trial_duration must be > 0");
        }

        if self.container_prefix.trim().is_empty() {
            bail!("container_prefix cannot be empty");
        }
        if self
            .container_prefix
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            bail!(
                "container_prefix must be a plain name, got '{}'",
                self.container_prefix
            );
        }

        if self.log.filter.trim().is_empty() {
            bail!("log.filter cannot be empty");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn trial_duration(&self) -> Result<TimeMark> {
        timecode::parse(&self.trial_duration)
            .map_err(|error| anyhow!("trial_duration: {error}"))
    }
}

/// Reads and validates a YAML config; no path means built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<SlicerConfig> {
    let config = match path {
        Some(path) => parse_config(path)?,
        None => SlicerConfig::default(),
    };
    config.validate().with_context(|| match path {
        Some(path) => format!("invalid config {}", path.display()),
        None => "invalid default config".to_owned(),
    })?;
    Ok(config)
}

fn parse_config(path: &Path) -> Result<SlicerConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(SlicerConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(
            "failed to parse yaml in {} at {}: {}",
            path.display(),
            location,
            error
        )
    })
}
