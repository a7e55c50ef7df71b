//! External process execution with a bounded stderr tail.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Maximum number of stderr lines kept for a failed invocation.
pub const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// Exit status and the last lines of stderr of a failed external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub exit_code: Option<i32>,
    pub tail: Vec<String>,
}

impl Diagnostic {
    /// Builds a diagnostic from complete stderr output, keeping only the
    /// last [`DIAGNOSTIC_TAIL_LINES`] non-empty lines.
    pub fn from_stderr(exit_code: Option<i32>, stderr: &[u8]) -> Self {
        let mut tail = TailBuffer::new(DIAGNOSTIC_TAIL_LINES);
        for line in String::from_utf8_lossy(stderr).lines() {
            tail.push(line);
        }
        Diagnostic {
            exit_code,
            tail: tail.into_lines(),
        }
    }

    pub fn text(&self) -> String {
        self.tail.join("\n")
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "exit code {}", code)?,
            None => write!(f, "terminated by signal")?,
        }
        if !self.tail.is_empty() {
            write!(f, ":\n{}", self.text())?;
        }
        Ok(())
    }
}

/// Ring buffer of the most recent non-empty lines.
struct TailBuffer {
    capacity: usize,
    lines: VecDeque<String>,
}

impl TailBuffer {
    fn new(capacity: usize) -> Self {
        TailBuffer {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, line: &str) {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Runs `command` to completion, streaming its stderr through a bounded
/// tail buffer. Returns `Ok(Ok(()))` on exit status 0 and `Ok(Err(_))` with
/// the diagnostic otherwise; spawn and pipe errors are `Err`.
pub async fn run_captured(mut command: Command) -> std::io::Result<Result<(), Diagnostic>> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut tail = TailBuffer::new(DIAGNOSTIC_TAIL_LINES);
    if let Some(stderr) = child.stderr.take() {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            // ffmpeg redraws progress with carriage returns
            for line in String::from_utf8_lossy(&buf).split('\r') {
                tail.push(line);
            }
        }
    }

    let status = child.wait().await?;
    if status.success() {
        Ok(Ok(()))
    } else {
        Ok(Err(Diagnostic {
            exit_code: status.code(),
            tail: tail.into_lines(),
        }))
    }
}
