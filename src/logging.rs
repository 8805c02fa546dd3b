use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use anyhow::{Context, Result};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub const LOG_ENV_VAR: &str = "FFSLICE_LOG";

/// Log output kept while held; anything past this is counted and dropped.
const MAX_HELD_BYTES: usize = 1 << 20;

/// A log writer that can be held back while something else owns the terminal.
///
/// While held, events are buffered; [`LogGate::release`] writes them out in order.
#[derive(Clone)]
pub struct LogGate {
    state: Arc<Mutex<GateState>>,
}

struct GateState {
    held: bool,
    pending: Vec<u8>,
    dropped: usize,
    sink: Box<dyn Write + Send>,
}

impl LogGate {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                held: false,
                pending: Vec::new(),
                dropped: 0,
                sink,
            })),
        }
    }

    /// The process-wide gate in front of stderr.
    pub fn stderr() -> &'static LogGate {
        static STDERR: OnceLock<LogGate> = OnceLock::new();
        STDERR.get_or_init(|| LogGate::new(Box::new(io::stderr())))
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hold(&self) {
        self.lock().held = true;
    }

    /// Writes everything buffered while held and lets later events through.
    pub fn release(&self) -> io::Result<()> {
        let mut state = self.lock();
        state.held = false;
        let pending = std::mem::take(&mut state.pending);
        let dropped = std::mem::take(&mut state.dropped);
        state.sink.write_all(&pending)?;
        if dropped > 0 {
            writeln!(state.sink, "({dropped} bytes of log output dropped)")?;
        }
        state.sink.flush()
    }
}

impl Write for LogGate {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if !state.held {
            return state.sink.write(buf);
        }
        let room = MAX_HELD_BYTES.saturating_sub(state.pending.len());
        let kept = buf.len().min(room);
        state.pending.extend_from_slice(&buf[..kept]);
        state.dropped += buf.len() - kept;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if state.held {
            return Ok(());
        }
        state.sink.flush()
    }
}

impl<'a> MakeWriter<'a> for LogGate {
    type Writer = LogGate;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs the global subscriber. `FFSLICE_LOG` wins over the configured filter.
///
/// Calling it again is a no-op; the first subscriber stays.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .with_context(|| format!("invalid log filter '{}'", config.filter))?;

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(LogGate::stderr().clone())
                .try_init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn held_gate_defers_events_until_release() {
        let sink = SharedBuffer::default();
        let gate = LogGate::new(Box::new(sink.clone()));
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(gate.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("before hold");
            gate.hold();
            tracing::warn!("while held");
            assert!(!sink.text().contains("while held"));
            gate.release().unwrap();
            tracing::warn!("after release");
        });

        let text = sink.text();
        let order: Vec<_> = ["before hold", "while held", "after release"]
            .iter()
            .map(|message| text.find(message).unwrap())
            .collect();
        assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{text}");
    }

    #[test]
    fn held_output_past_the_cap_is_counted() {
        let sink = SharedBuffer::default();
        let mut gate = LogGate::new(Box::new(sink.clone()));
        gate.hold();
        gate.write_all(&vec![b'x'; MAX_HELD_BYTES + 10]).unwrap();
        assert!(sink.text().is_empty());
        gate.release().unwrap();
        assert!(sink.text().ends_with("(10 bytes of log output dropped)\n"));
    }

    #[test]
    fn rejects_unparseable_filter() {
        if std::env::var_os(LOG_ENV_VAR).is_some() {
            return;
        }
        let config = LogConfig {
            filter: "ffslice=loud".to_owned(),
            file: None,
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn unopenable_log_file_is_reported() {
        let config = LogConfig {
            filter: "info".to_owned(),
            file: Some(PathBuf::from("/nonexistent-dir/ffslice.log")),
        };
        let error = init_logging(&config).unwrap_err();
        assert!(error.to_string().contains("failed to open log file"));
    }
}
