//! Render sinks and the shared render target.
//!
//! A [`RenderTarget`] owns exactly one sink. Every write goes through its lock,
//! and the interactive gate is checked under that same lock, so the output
//! pump and the one-shot executor can never interleave on screen.

use std::io::{self, Write};
use std::sync::Arc;

use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use parking_lot::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_BACKLOG_LIMIT: usize = 64 * 1024;

/// The terminal surface characters are rendered to.
pub trait RenderSink: Send {
    fn write(&mut self, data: &[u8]);
    fn write_line(&mut self, data: &[u8]);
    fn clear(&mut self);
    fn set_exit_code(&mut self, code: Option<i32>);
}

/// Outcome of handing an interactive chunk to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Written,
    /// Held in the backlog until the executor releases the sink.
    Buffered,
    /// Backlog full; this many bytes were discarded.
    Dropped(usize),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResumeReport {
    pub flushed: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct GateState {
    suspended: bool,
    backlog: Vec<u8>,
    dropped: usize,
}

struct TargetState {
    sink: Box<dyn RenderSink>,
    gate: GateState,
}

#[derive(Clone)]
pub struct RenderTarget {
    inner: Arc<Mutex<TargetState>>,
    backlog_limit: usize,
}

impl RenderTarget {
    pub fn new(sink: impl RenderSink + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TargetState {
                sink: Box::new(sink),
                gate: GateState::default(),
            })),
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
        }
    }

    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }

    /// Interactive output path. Written straight through unless an execution
    /// has suspended forwarding.
    pub fn forward_interactive(&self, data: &[u8]) -> Forwarded {
        let mut state = self.inner.lock();
        if !state.gate.suspended {
            state.sink.write(data);
            return Forwarded::Written;
        }
        let available = self.backlog_limit.saturating_sub(state.gate.backlog.len());
        let to_copy = available.min(data.len());
        state.gate.backlog.extend_from_slice(&data[..to_copy]);
        let dropped = data.len() - to_copy;
        if dropped > 0 {
            state.gate.dropped += dropped;
            Forwarded::Dropped(dropped)
        } else {
            Forwarded::Buffered
        }
    }

    /// Stops interactive forwarding. Returns false if it was already suspended.
    pub fn suspend_interactive(&self) -> bool {
        let mut state = self.inner.lock();
        if state.gate.suspended {
            return false;
        }
        state.gate.suspended = true;
        true
    }

    /// Re-opens interactive forwarding, flushing the backlog first so
    /// buffered chunks keep their arrival order.
    pub fn resume_interactive(&self) -> ResumeReport {
        let mut state = self.inner.lock();
        if !state.gate.suspended {
            return ResumeReport::default();
        }
        let backlog = std::mem::take(&mut state.gate.backlog);
        let dropped = std::mem::take(&mut state.gate.dropped);
        if !backlog.is_empty() {
            state.sink.write(&backlog);
        }
        state.gate.suspended = false;
        let report = ResumeReport {
            flushed: backlog.len(),
            dropped,
        };
        if dropped > 0 {
            warn!(
                target: "kernel_term::sink",
                dropped_bytes = dropped,
                "interactive backlog overflowed while the sink was held"
            );
        } else {
            debug!(target: "kernel_term::sink", flushed_bytes = report.flushed, "interactive forwarding resumed");
        }
        report
    }

    /// Drops parked interactive output without resuming. Returns the number
    /// of bytes discarded.
    pub fn discard_interactive_backlog(&self) -> usize {
        let mut state = self.inner.lock();
        let discarded = state.gate.backlog.len();
        state.gate.backlog.clear();
        state.gate.dropped = 0;
        discarded
    }

    pub fn is_interactive_suspended(&self) -> bool {
        self.inner.lock().gate.suspended
    }

    /// Write that bypasses the gate; used by the holder of the sink.
    pub fn write_exclusive(&self, data: &[u8]) {
        self.inner.lock().sink.write(data);
    }

    pub fn write_line(&self, data: &[u8]) {
        self.inner.lock().sink.write_line(data);
    }

    pub fn clear(&self) {
        self.inner.lock().sink.clear();
    }

    pub fn set_exit_code(&self, code: Option<i32>) {
        self.inner.lock().sink.set_exit_code(code);
    }

}

/// Renders to the process's stdout. Expects raw mode, so line endings are
/// written as `\r\n`.
pub struct StdoutSink {
    out: io::Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }

    fn emit(&mut self, data: &[u8]) {
        let result = self
            .out
            .write_all(data)
            .and_then(|_| self.out.flush());
        if let Err(err) = result {
            warn!(target: "kernel_term::sink", error = %err, "failed to write to stdout");
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSink for StdoutSink {
    fn write(&mut self, data: &[u8]) {
        let converted = convert_eol(data);
        self.emit(&converted);
    }

    fn write_line(&mut self, data: &[u8]) {
        self.emit(data);
        self.emit(b"\r\n");
    }

    fn clear(&mut self) {
        if let Err(err) = execute!(self.out, Clear(ClearType::All), MoveTo(0, 0)) {
            warn!(target: "kernel_term::sink", error = %err, "failed to clear terminal");
        }
    }

    fn set_exit_code(&mut self, code: Option<i32>) {
        if let Some(code) = code {
            self.emit(format!("\r\n[exit code: {code}]\r\n").as_bytes());
        }
    }
}

/// Expands bare `\n` to `\r\n`; raw mode does not return the carriage.
fn convert_eol(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    let mut previous = 0u8;
    for &byte in data {
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        previous = byte;
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Write(Vec<u8>),
    WriteLine(Vec<u8>),
    Clear,
    ExitCode(Option<i32>),
}

/// Sink that records every call. Clones share the same log.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Everything written since the last clear, with `write_line` rendered
    /// as a trailing `\n`.
    pub fn screen(&self) -> String {
        let events = self.events.lock();
        let start = events
            .iter()
            .rposition(|event| matches!(event, SinkEvent::Clear))
            .map(|idx| idx + 1)
            .unwrap_or(0);
        let mut screen = String::new();
        for event in &events[start..] {
            match event {
                SinkEvent::Write(data) => screen.push_str(&String::from_utf8_lossy(data)),
                SinkEvent::WriteLine(data) => {
                    screen.push_str(&String::from_utf8_lossy(data));
                    screen.push('\n');
                }
                SinkEvent::Clear | SinkEvent::ExitCode(_) => {}
            }
        }
        screen
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.events.lock().iter().rev().find_map(|event| match event {
            SinkEvent::ExitCode(code) => Some(*code),
            _ => None,
        })?
    }

    pub fn clear_log(&self) {
        self.events.lock().clear();
    }
}

impl RenderSink for MemorySink {
    fn write(&mut self, data: &[u8]) {
        self.events.lock().push(SinkEvent::Write(data.to_vec()));
    }

    fn write_line(&mut self, data: &[u8]) {
        self.events.lock().push(SinkEvent::WriteLine(data.to_vec()));
    }

    fn clear(&mut self) {
        self.events.lock().push(SinkEvent::Clear);
    }

    fn set_exit_code(&mut self, code: Option<i32>) {
        self.events.lock().push(SinkEvent::ExitCode(code));
    }
}
