//! Progress-line reconstruction for encoder stderr.
//!
//! ffmpeg's `-stats` output rewrites one console line in place: every update ends with a
//! carriage return and only the closing summary ends with a newline. Line-buffered reads
//! would stall until the very end, so the stream is consumed byte by byte.

use std::io::{self, BufReader, Read};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
/// A line this long is emitted as live even without a terminator.
pub const MAX_LINE_BYTES: usize = 1023;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Ended in `\r`; supersedes the previous live line of the same job.
    Live,
    /// Whatever was left when the stream ended.
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressLine {
    pub index: usize,
    pub text: String,
    pub kind: LineKind,
}

/// Lazily splits one child's progress stream into [`ProgressLine`]s.
///
/// The sequence ends at the first newline or at end of stream and cannot be restarted.
pub struct LineDemux<R: Read> {
    index: usize,
    reader: BufReader<R>,
    buffer: Vec<u8>,
    finished: bool,
}

impl<R: Read> LineDemux<R> {
    pub fn new(index: usize, stream: R) -> Self {
        Self {
            index,
            reader: BufReader::new(stream),
            buffer: Vec::with_capacity(MAX_LINE_BYTES),
            finished: false,
        }
    }

    /// The unread rest of the stream, once iteration has finished.
    pub fn into_remainder(self) -> BufReader<R> {
        self.reader
    }

    fn read_byte(&mut self) -> Option<io::Result<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return None,
                Ok(_) => return Some(Ok(byte[0])),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Some(Err(error)),
            }
        }
    }

    fn emit(&mut self, kind: LineKind) -> ProgressLine {
        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        ProgressLine {
            index: self.index,
            text,
            kind,
        }
    }

    fn finish(&mut self) -> Option<ProgressLine> {
        self.finished = true;
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.emit(LineKind::Final))
        }
    }
}

impl<R: Read> Iterator for LineDemux<R> {
    type Item = ProgressLine;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.read_byte() {
                Some(Ok(CR)) => return Some(self.emit(LineKind::Live)),
                Some(Ok(LF)) | None => return self.finish(),
                Some(Ok(byte)) => {
                    self.buffer.push(byte);
                    if self.buffer.len() >= MAX_LINE_BYTES {
                        return Some(self.emit(LineKind::Live));
                    }
                }
                Some(Err(error)) => {
                    tracing::debug!(index = self.index, %error, "progress stream read failed");
                    return self.finish();
                }
            }
        }
    }
}

/// Starts the reader thread for one job: demultiplexes `stream` into `sender`, then drains
/// anything the child writes after its final line so it never blocks on a full pipe.
pub fn spawn_reader<R>(
    index: usize,
    stream: R,
    sender: Sender<ProgressLine>,
) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("ffslice-reader-{index}"))
        .spawn(move || {
            let mut lines = LineDemux::new(index, stream);
            let mut receiver_alive = true;
            for line in lines.by_ref() {
                if receiver_alive && sender.send(line).is_err() {
                    receiver_alive = false;
                }
            }
            drop(sender);

            let mut rest = lines.into_remainder();
            if let Err(error) = io::copy(&mut rest, &mut io::sink()) {
                tracing::debug!(index, %error, "failed draining progress stream");
            }
            tracing::debug!(index, "progress stream closed");
        })
        .with_context(|| format!("failed to spawn progress reader for slice {index}"))
}
