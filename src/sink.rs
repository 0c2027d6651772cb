//! Display sinks for execution output.

use bytes::Bytes;
use crossterm::{
    cursor::MoveTo,
    style::Stylize,
    terminal::{Clear, ClearType},
    QueueableCommand,
};
use std::io::Write;
use tokio::sync::mpsc;
use tracing::warn;

/// Receiver of a run's output. Chunks must be appended in the order given.
pub trait DisplaySink: Send {
    /// Clear all prior content.
    fn reset(&mut self);

    /// Append primary output.
    fn write(&mut self, bytes: &[u8]);

    /// Append error output. Kept apart from [`DisplaySink::write`]; sinks
    /// without a separate error channel drop it.
    fn write_stderr(&mut self, _bytes: &[u8]) {}
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn write(&mut self, bytes: &[u8]) {
        (**self).write(bytes)
    }

    fn write_stderr(&mut self, bytes: &[u8]) {
        (**self).write_stderr(bytes)
    }
}

/// Output routing for the terminal writer.
enum TerminalLine {
    Reset,
    Stdout(Bytes),
    Stderr(Bytes),
    Note(String),
}

/// Cloneable handle feeding a dedicated blocking writer for stdout/stderr, so
/// async tasks never block on the terminal.
#[derive(Clone)]
pub struct TerminalSink {
    tx: mpsc::UnboundedSender<TerminalLine>,
}

impl TerminalSink {
    /// Spawn the writer. `clear_on_reset` clears the screen on every reset;
    /// otherwise a reset only flushes.
    pub fn spawn(clear_on_reset: bool) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<TerminalLine>();
        let handle = tokio::task::spawn_blocking(move || {
            // Unlocked handles: log lines on stderr must still get through.
            let mut out = std::io::stdout();
            let mut err = std::io::stderr();

            while let Some(line) = rx.blocking_recv() {
                let res = match line {
                    TerminalLine::Reset => {
                        if clear_on_reset {
                            out.queue(Clear(ClearType::All))
                                .and_then(|o| o.queue(MoveTo(0, 0)))
                                .and_then(|o| o.flush())
                        } else {
                            out.flush()
                        }
                    }
                    TerminalLine::Stdout(bytes) => out.write_all(&bytes).and_then(|_| out.flush()),
                    TerminalLine::Stderr(bytes) => {
                        // Keep stdout ahead of stderr so the two stay interleaved as received.
                        out.flush()
                            .and_then(|_| err.write_all(&bytes))
                            .and_then(|_| err.flush())
                    }
                    TerminalLine::Note(msg) => out
                        .flush()
                        .and_then(|_| writeln!(err, "{}", msg.dark_grey()))
                        .and_then(|_| err.flush()),
                };
                if let Err(e) = res {
                    warn!(error = %e, "terminal write failed");
                }
            }

            let _ = out.flush();
            let _ = err.flush();
        });
        (Self { tx }, handle)
    }

    /// Print an annotation line after whatever output is already queued.
    pub fn note(&self, msg: impl Into<String>) {
        let _ = self.tx.send(TerminalLine::Note(msg.into()));
    }
}

impl DisplaySink for TerminalSink {
    fn reset(&mut self) {
        let _ = self.tx.send(TerminalLine::Reset);
    }

    fn write(&mut self, bytes: &[u8]) {
        let _ = self.tx.send(TerminalLine::Stdout(Bytes::copy_from_slice(bytes)));
    }

    fn write_stderr(&mut self, bytes: &[u8]) {
        let _ = self.tx.send(TerminalLine::Stderr(Bytes::copy_from_slice(bytes)));
    }
}

/// One call observed by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Reset,
    Write(Vec<u8>),
    WriteStderr(Vec<u8>),
}

/// In-memory sink that records every call, shared between clones. Used by
/// embedders that render from a buffer, and by tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: std::sync::Arc<std::sync::Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Primary output written since the last reset.
    pub fn screen(&self) -> Vec<u8> {
        let calls = self.calls();
        let start = calls
            .iter()
            .rposition(|c| *c == SinkCall::Reset)
            .map_or(0, |i| i + 1);
        calls[start..]
            .iter()
            .filter_map(|c| match c {
                SinkCall::Write(b) => Some(b.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    fn record(&self, call: SinkCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl DisplaySink for RecordingSink {
    fn reset(&mut self) {
        self.record(SinkCall::Reset);
    }

    fn write(&mut self, bytes: &[u8]) {
        self.record(SinkCall::Write(bytes.to_vec()));
    }

    fn write_stderr(&mut self, bytes: &[u8]) {
        self.record(SinkCall::WriteStderr(bytes.to_vec()));
    }
}
