//! Rsync progress parsing and line splitting.
//!
//! Rsync redraws its `--info=progress2` line with carriage returns, so the
//! stream splitter treats both `\n` and `\r` as terminators. Parsed
//! progress keeps the rate verbatim (it is display text, not a number) and
//! reconstructs the numeric fields exactly on render.

use std::io::Write;

/// Receives each non-empty output line from a transfer.
pub trait ProgressSink: Send {
    /// Called once per complete line.
    fn on_line(&mut self, line: &str);
}

/// Blanket implementation so closures can act as sinks.
impl<F: FnMut(&str) + Send> ProgressSink for F {
    fn on_line(&mut self, line: &str) {
        self(line);
    }
}

/// Numeric fields of one `--info=progress2` line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RsyncProgress {
    /// Bytes transferred so far.
    pub bytes: u64,
    /// Whole-number completion percentage.
    pub percent: u8,
    /// Transfer rate exactly as rsync printed it (for example `1.23MB/s`).
    pub rate: String,
    /// Files transferred so far (`xfr#N`), when present.
    pub transferred: Option<u64>,
    /// Remaining/total check counts (`to-chk=a/b`), when present.
    pub to_check: Option<(u64, u64)>,
}

impl RsyncProgress {
    /// Renders the progress in rsync's own format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut line = format!(
            "{:>15} {:>3}%  {}",
            group_thousands(self.bytes),
            self.percent,
            self.rate
        );
        match (self.transferred, self.to_check) {
            (Some(xfr), Some((remaining, total))) => {
                line.push_str(&format!(" (xfr#{xfr}, to-chk={remaining}/{total})"));
            }
            (Some(xfr), None) => line.push_str(&format!(" (xfr#{xfr})")),
            _ => {}
        }
        line
    }
}

/// Parses one rsync progress line, returning `None` for anything else.
#[must_use]
pub fn parse_progress(line: &str) -> Option<RsyncProgress> {
    let mut tokens = line.split_whitespace();
    let bytes = parse_grouped(tokens.next()?)?;
    let percent: u8 = tokens.next()?.strip_suffix('%')?.parse().ok()?;
    let rate = tokens.next()?.to_owned();
    if !rate.contains("/s") {
        return None;
    }

    let mut transferred = None;
    let mut to_check = None;
    for token in tokens {
        let cleaned = token.trim_matches(|ch| matches!(ch, '(' | ')' | ','));
        if let Some(value) = cleaned.strip_prefix("xfr#") {
            transferred = value.parse().ok();
        } else if let Some(value) = cleaned.strip_prefix("to-chk=")
            && let Some((remaining, total)) = value.split_once('/')
        {
            to_check = remaining.parse().ok().zip(total.parse().ok());
        }
    }

    Some(RsyncProgress {
        bytes,
        percent,
        rate,
        transferred,
        to_check,
    })
}

fn parse_grouped(token: &str) -> Option<u64> {
    let digits: String = token.chars().filter(|ch| *ch != ',').collect();
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + 6);
    let mut seen = 0_usize;
    for ch in digits.chars().rev() {
        if seen > 0 && seen.is_multiple_of(3) {
            grouped.push(',');
        }
        grouped.push(ch);
        seen += 1;
    }
    grouped.chars().rev().collect()
}

/// Splits a byte stream into lines on `\n` and `\r`, feeding a sink.
///
/// Used as the stdout writer for rsync children; residual bytes are
/// emitted as a final line when the stream is flushed.
pub(crate) struct LineSplitter<'a> {
    sink: &'a mut dyn ProgressSink,
    buffer: Vec<u8>,
}

impl<'a> LineSplitter<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self {
            sink,
            buffer: Vec::new(),
        }
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self
            .buffer
            .iter()
            .position(|&byte| byte == b'\n' || byte == b'\r')
        {
            let mut line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            line_bytes.pop();
            let line = String::from_utf8_lossy(&line_bytes);
            let trimmed = line.trim_end();
            if !trimmed.is_empty() {
                self.sink.on_line(trimmed);
            }
        }
    }
}

impl Write for LineSplitter<'_> {
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines();
        Ok(chunk.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            let trimmed = line.trim_end();
            if !trimmed.is_empty() {
                self.sink.on_line(trimmed);
            }
        }
        Ok(())
    }
}

/// Writer that discards everything, used when no sink is attached.
#[derive(Debug, Default)]
pub(crate) struct DiscardWriter;

impl Write for DiscardWriter {
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        Ok(chunk.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
