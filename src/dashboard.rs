//! Live per-slice status view for parallel runs.
//!
//! Row 0 holds a title; slice `i` owns a header row (`3i - 1`) and a progress row (`3i`).
//! Every paint goes through one mutex, and the in-memory copy of the rows is what teardown
//! captures, so the final summary does not depend on reading the terminal back.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{execute, queue, style::Print};

use crate::demux::ProgressLine;
use crate::logging::LogGate;

pub const TITLE: &str = "Starting...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Raw mode, alternate screen, hidden cursor.
    Terminal,
    /// Model only; nothing is written. For non-TTY output.
    Detached,
}

pub fn header_row(index: usize) -> usize {
    index * 3 - 1
}

pub fn progress_row(index: usize) -> usize {
    index * 3
}

pub fn header_text(output: &Path) -> String {
    format!("Output path '{}':", output.display())
}

struct Screen {
    out: Box<dyn Write + Send>,
    rows: Vec<String>,
    width: usize,
    height: usize,
    surface: Surface,
    open: bool,
    raw_mode: bool,
    /// Held while the dashboard is up so log lines do not land on top of it.
    log_gate: Option<LogGate>,
}

impl Screen {
    fn paint(&mut self, row: usize, text: &str) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        let text = visible_text(text, self.width);
        let Some(slot) = self.rows.get_mut(row) else {
            return Ok(());
        };
        slot.clone_from(&text);

        if self.surface == Surface::Terminal && row < self.height {
            let row = u16::try_from(row).unwrap_or(u16::MAX);
            queue!(
                self.out,
                MoveTo(0, row),
                Clear(ClearType::CurrentLine),
                Print(text)
            )?;
            self.out.flush()?;
        }
        Ok(())
    }

    fn capture(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| row.trim())
            .filter(|row| !row.is_empty())
            .map(str::to_owned)
            .collect()
    }

    fn enter(&mut self) -> io::Result<()> {
        if self.surface != Surface::Terminal {
            return Ok(());
        }
        if let Some(gate) = &self.log_gate {
            gate.hold();
        }
        if self.raw_mode {
            enable_raw_mode()?;
        }
        execute!(self.out, EnterAlternateScreen, Hide, Clear(ClearType::All))
    }

    fn restore(&mut self) -> io::Result<()> {
        let was_open = std::mem::replace(&mut self.open, false);
        if self.surface != Surface::Terminal || !was_open {
            return Ok(());
        }
        let screen = execute!(self.out, Show, LeaveAlternateScreen);
        let mode = if self.raw_mode {
            disable_raw_mode()
        } else {
            Ok(())
        };
        let logs = self.log_gate.as_ref().map_or(Ok(()), LogGate::release);
        screen.and(mode).and(logs)
    }
}

/// Drops control characters and clips to the usable width.
fn visible_text(text: &str, width: usize) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .take(width)
        .collect()
}

fn lock(screen: &Mutex<Screen>) -> MutexGuard<'_, Screen> {
    screen.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the terminal for the duration of a parallel run.
///
/// Teardown runs on every exit path: explicitly via [`Dashboard::teardown`], or from `Drop`.
pub struct Dashboard {
    screen: Arc<Mutex<Screen>>,
    restored: bool,
}

impl Dashboard {
    /// Takes over the terminal and paints the title and one header per slice output, in
    /// slice order (index 1 first).
    ///
    /// On a terminal, stderr logging is held until teardown.
    pub fn open(outputs: &[PathBuf], surface: Surface, out: Box<dyn Write + Send>) -> Result<Self> {
        let (width, height, log_gate) = match surface {
            Surface::Terminal => {
                let (cols, rows) = terminal::size().context("failed to query terminal size")?;
                (
                    usize::from(cols).saturating_sub(1).max(1),
                    usize::from(rows),
                    Some(LogGate::stderr().clone()),
                )
            }
            Surface::Detached => (usize::MAX, 0, None),
        };
        let screen = Screen {
            out,
            rows: Vec::new(),
            width,
            height,
            surface,
            open: true,
            raw_mode: surface == Surface::Terminal,
            log_gate,
        };
        Self::start(outputs, screen)
    }

    /// A terminal dashboard that writes its escape sequences to `out` without touching the
    /// real tty's mode.
    #[cfg(test)]
    pub(crate) fn emulated_terminal(
        outputs: &[PathBuf],
        out: Box<dyn Write + Send>,
        (width, height): (usize, usize),
        log_gate: Option<LogGate>,
    ) -> Result<Self> {
        let screen = Screen {
            out,
            rows: Vec::new(),
            width,
            height,
            surface: Surface::Terminal,
            open: true,
            raw_mode: false,
            log_gate,
        };
        Self::start(outputs, screen)
    }

    fn start(outputs: &[PathBuf], mut screen: Screen) -> Result<Self> {
        let surface = screen.surface;
        screen.rows = vec![String::new(); outputs.len() * 3 + 1];
        // Built before entering so a failure halfway through still restores via Drop.
        let dashboard = Self {
            screen: Arc::new(Mutex::new(screen)),
            restored: false,
        };

        {
            let mut screen = lock(&dashboard.screen);
            screen
                .enter()
                .context("failed to switch the terminal into dashboard mode")?;
            screen.paint(0, TITLE)?;
            for (offset, output) in outputs.iter().enumerate() {
                screen.paint(header_row(offset + 1), &header_text(output))?;
            }
        }
        tracing::debug!(rows = outputs.len(), ?surface, "dashboard opened");
        Ok(dashboard)
    }

    /// Replaces the progress row of slice `index`.
    pub fn paint_progress(&self, index: usize, text: &str) -> Result<()> {
        lock(&self.screen)
            .paint(progress_row(index), text)
            .with_context(|| format!("failed to paint dashboard row for slice {index}"))
    }

    /// Starts the consumer loop for one slice: each received line repaints that slice's
    /// row. Ends when the reader hangs up or the dashboard is torn down.
    pub fn spawn_consumer(
        &self,
        index: usize,
        lines: Receiver<ProgressLine>,
        tick: Duration,
    ) -> Result<JoinHandle<()>> {
        let screen = Arc::clone(&self.screen);
        thread::Builder::new()
            .name(format!("ffslice-dashboard-{index}"))
            .spawn(move || loop {
                match lines.recv_timeout(tick) {
                    Ok(line) => {
                        if let Err(error) = lock(&screen).paint(progress_row(index), &line.text) {
                            tracing::debug!(index, %error, "dashboard paint failed");
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if !lock(&screen).open {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .with_context(|| format!("failed to spawn dashboard consumer for slice {index}"))
    }

    /// Captures the visible rows, then gives the terminal back in normal mode.
    pub fn teardown(mut self) -> Result<Vec<String>> {
        let mut screen = lock(&self.screen);
        let captured = screen.capture();
        self.restored = true;
        screen
            .restore()
            .context("failed to restore the terminal after the dashboard")?;
        tracing::debug!(lines = captured.len(), "dashboard torn down");
        Ok(captured)
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        if !self.restored {
            let _ = lock(&self.screen).restore();
        }
    }
}
