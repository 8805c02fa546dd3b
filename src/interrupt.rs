use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Tells the parallel wait loop whether the user asked to stop.
pub trait InterruptSource {
    /// Waits up to `timeout` for an interruption. This is also the wait loop's tick.
    fn poll_interrupt(&mut self, timeout: Duration) -> Result<bool>;
}

/// Ctrl-C / Ctrl-\ read as key events.
///
/// In raw mode the terminal no longer turns Ctrl-C into SIGINT, so the keypress has to be
/// picked up from the input queue instead.
#[derive(Debug, Default)]
pub struct TerminalKeys;

impl InterruptSource for TerminalKeys {
    fn poll_interrupt(&mut self, timeout: Duration) -> Result<bool> {
        if !event::poll(timeout).context("failed polling terminal input")? {
            return Ok(false);
        }
        let event = event::read().context("failed reading terminal input")?;
        Ok(is_interrupt_key(&event))
    }
}

pub fn is_interrupt_key(event: &Event) -> bool {
    match event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) => {
            *kind != KeyEventKind::Release
                && modifiers.contains(KeyModifiers::CONTROL)
                && matches!(code, KeyCode::Char('c') | KeyCode::Char('\\'))
        }
        _ => false,
    }
}

/// Never interrupts; just sleeps for the tick. Used when no terminal is attached.
#[derive(Debug, Default)]
pub struct NoInterrupt;

impl InterruptSource for NoInterrupt {
    fn poll_interrupt(&mut self, timeout: Duration) -> Result<bool> {
        thread::sleep(timeout);
        Ok(false)
    }
}

/// A shared cancellation flag that other threads can raise.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

impl InterruptSource for InterruptFlag {
    fn poll_interrupt(&mut self, timeout: Duration) -> Result<bool> {
        if self.is_raised() {
            return Ok(true);
        }
        thread::sleep(timeout);
        Ok(self.is_raised())
    }
}

static SIGNALLED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn record_signal(_: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Routes SIGINT and SIGTERM into a process-wide flag instead of killing ffslice outright,
/// so a signalled parallel run still stops its encoders and restores the terminal.
#[cfg(unix)]
pub fn install_signal_handlers() -> Result<()> {
    for (signal, name) in [(libc::SIGINT, "SIGINT"), (libc::SIGTERM, "SIGTERM")] {
        unsafe {
            // SAFETY: record_signal is an extern "C" handler that only stores to an atomic,
            // which is async-signal-safe.
            let handler = record_signal as *const () as libc::sighandler_t;
            if libc::signal(signal, handler) == libc::SIG_ERR {
                anyhow::bail!("failed to install {name} handler");
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers() -> Result<()> {
    Ok(())
}

/// Whether SIGINT or SIGTERM arrived since the handlers were installed.
pub fn signal_received() -> bool {
    SIGNALLED.load(Ordering::SeqCst)
}

/// Wraps another source so that a received signal also counts as an interruption.
#[derive(Debug, Default)]
pub struct WithSignals<S> {
    inner: S,
}

impl<S: InterruptSource> WithSignals<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: InterruptSource> InterruptSource for WithSignals<S> {
    fn poll_interrupt(&mut self, timeout: Duration) -> Result<bool> {
        if signal_received() {
            return Ok(true);
        }
        match self.inner.poll_interrupt(timeout) {
            Ok(fired) => Ok(fired || signal_received()),
            // A signal landing mid-poll can surface as an input error.
            Err(_) if signal_received() => Ok(true),
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_c_and_ctrl_backslash_interrupt() {
        let ctrl_c = Event::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        let ctrl_backslash =
            Event::Key(KeyEvent::new(KeyCode::Char('\\'), KeyModifiers::CONTROL));
        let plain_c = Event::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE));
        assert!(is_interrupt_key(&ctrl_c));
        assert!(is_interrupt_key(&ctrl_backslash));
        assert!(!is_interrupt_key(&plain_c));
        assert!(!is_interrupt_key(&Event::Resize(80, 24)));
    }

    #[test]
    fn flag_interrupts_once_raised() {
        let mut flag = InterruptFlag::new();
        assert!(!flag.poll_interrupt(Duration::from_millis(1)).unwrap());
        flag.clone().raise();
        assert!(flag.poll_interrupt(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn no_interrupt_never_fires() {
        let mut source = NoInterrupt;
        assert!(!source.poll_interrupt(Duration::from_millis(1)).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn sigterm_interrupts_a_quiet_source() {
        install_signal_handlers().unwrap();
        let result = unsafe { libc::raise(libc::SIGTERM) };
        assert_eq!(result, 0);
        assert!(signal_received());

        let mut source = WithSignals::new(NoInterrupt);
        assert!(source.poll_interrupt(Duration::from_millis(1)).unwrap());
    }
}
