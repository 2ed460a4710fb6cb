//! Line-buffered output pipeline with framework-aware formatting.
//!
//! Remote commands stream bytes; the pipeline turns them into lines, hands
//! each line to the active formatter, keeps a bounded copy of stderr for
//! later diagnosis, and renders a summary once the exit code is known.
//! ANSI escape sequences pass through verbatim.

mod formatters;
mod registry;

pub use formatters::{
    GenericFormatter, GoTestFormatter, JestFormatter, PassthroughFormatter, PytestFormatter,
    is_error_line,
};
pub use registry::{DETECT_THRESHOLD, FormatterRegistry};

use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Test outcome counts reported by framework formatters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TestCounts {
    /// Tests that passed.
    pub passed: u32,
    /// Tests that failed.
    pub failed: u32,
    /// Tests that were skipped.
    pub skipped: u32,
    /// Tests that errored before producing a verdict.
    pub errors: u32,
}

/// Optional capability of formatters that understand test frameworks.
pub trait TestReport {
    /// Returns the identifiers of failed tests seen so far.
    fn test_failures(&self) -> Vec<String>;
    /// Returns aggregate outcome counts.
    fn test_counts(&self) -> TestCounts;
}

/// Transforms raw output lines into display lines.
pub trait Formatter: Send {
    /// Short identifier shown in diagnostics.
    fn name(&self) -> &'static str;
    /// Transforms one line for display.
    fn process_line(&mut self, line: &str) -> String;
    /// Renders a one-line summary for the finished command.
    fn summary(&self, exit_code: i32) -> String;
    /// Returns the test-report capability when the formatter tracks tests.
    fn test_report(&self) -> Option<&dyn TestReport> {
        None
    }
}

/// Bounded byte buffer used for stderr capture.
///
/// Writes past the cap are accepted and silently dropped so the producer
/// never blocks or fails; diagnosis only ever needs the head of the stream.
#[derive(Debug)]
pub struct CappedBuffer {
    buffer: Vec<u8>,
    cap: usize,
}

impl CappedBuffer {
    /// Creates a buffer that retains at most `cap` bytes.
    #[must_use]
    pub const fn new(cap: usize) -> Self {
        Self {
            buffer: Vec::new(),
            cap,
        }
    }

    /// Returns the captured bytes as lossy UTF-8.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Returns `true` when nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Write for CappedBuffer {
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        let remaining = self.cap.saturating_sub(self.buffer.len());
        let take = remaining.min(chunk.len());
        if take > 0 {
            self.buffer.extend_from_slice(chunk.get(..take).unwrap_or(&[]));
        }
        Ok(chunk.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Bytes of stderr retained for post-exit diagnosis.
pub const STDERR_CAPTURE_CAP: usize = 4096;

struct PipelineState {
    formatter: Box<dyn Formatter>,
    target: Box<dyn Write + Send>,
}

/// Owns the line buffers and formatter for one command's output.
pub struct OutputPipeline {
    state: Mutex<PipelineState>,
    stderr_capture: Mutex<CappedBuffer>,
}

impl OutputPipeline {
    /// Creates a pipeline writing formatted lines to `target`.
    #[must_use]
    pub fn new(formatter: Box<dyn Formatter>, target: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(PipelineState { formatter, target }),
            stderr_capture: Mutex::new(CappedBuffer::new(STDERR_CAPTURE_CAP)),
        }
    }

    /// Returns a line-buffering writer for the command's stdout.
    #[must_use]
    pub fn stdout_writer(&self) -> LineWriter<'_> {
        LineWriter {
            pipeline: self,
            capture_stderr: false,
            buffer: Vec::new(),
        }
    }

    /// Returns a line-buffering writer for the command's stderr; bytes are
    /// also teed into the bounded capture buffer.
    #[must_use]
    pub fn stderr_writer(&self) -> LineWriter<'_> {
        LineWriter {
            pipeline: self,
            capture_stderr: true,
            buffer: Vec::new(),
        }
    }

    /// Returns the captured stderr head.
    #[must_use]
    pub fn captured_stderr(&self) -> String {
        self.stderr_capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contents()
    }

    /// Emits the formatter's summary for `exit_code`, if any.
    pub fn finish(&self, exit_code: i32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let summary = state.formatter.summary(exit_code);
        if !summary.is_empty() {
            writeln!(state.target, "{summary}").ok();
        }
    }

    /// Returns the failures and counts when the formatter tracks tests.
    #[must_use]
    pub fn test_results(&self) -> Option<(Vec<String>, TestCounts)> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .formatter
            .test_report()
            .map(|report| (report.test_failures(), report.test_counts()))
    }

    fn handle_line(&self, line: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let rendered = state.formatter.process_line(line);
        writeln!(state.target, "{rendered}").ok();
    }

    fn capture(&self, chunk: &[u8]) {
        let mut capture = self
            .stderr_capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        capture.write(chunk).ok();
    }
}

/// Line-buffering writer handed to streaming executors.
///
/// Accepts arbitrary byte slices, emits each `\n`-terminated line through
/// the pipeline, and flushes any residual bytes as a final line.
pub struct LineWriter<'a> {
    pipeline: &'a OutputPipeline,
    capture_stderr: bool,
    buffer: Vec<u8>,
}

impl Write for LineWriter<'_> {
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        if self.capture_stderr {
            self.pipeline.capture(chunk);
        }
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let mut line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            line_bytes.pop();
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.pop();
            }
            let line = String::from_utf8_lossy(&line_bytes).into_owned();
            self.pipeline.handle_line(&line);
        }
        Ok(chunk.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.pipeline.handle_line(&line);
        }
        Ok(())
    }
}
