//! Progress reporting.
//!
//! Everything is written and flushed line by line so partial progress stays
//! visible when a run fails half way.

use crate::error::RunnerError;
use crate::runner::ExecutionResult;
use std::io::{self, Write};
use std::path::Path;

/// How much of each stream is shown after a command finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TailLimits {
    pub stdout: usize,
    pub stderr: usize,
}

impl TailLimits {
    pub const DEFAULT: Self = Self {
        stdout: 2000,
        stderr: 1000,
    };

    /// Shorter tails for the recovery loop, which may print many attempts.
    pub const RECOVERY: Self = Self {
        stdout: 800,
        stderr: 400,
    };
}

impl Default for TailLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((start, _)) => &text[start..],
        None => "",
    }
}

/// Writes run progress to a stream.
pub struct Reporter<W: Write> {
    out: W,
    limits: TailLimits,
    /// Print an empty line before each command header.
    spaced: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, limits: TailLimits) -> Self {
        Self {
            out,
            limits,
            spaced: true,
        }
    }

    /// Headers without the separating blank line, for the recovery log.
    pub fn compact(mut self) -> Self {
        self.spaced = false;
        self
    }

    pub fn connect_failed(&mut self, attempt: u32, err: &RunnerError) -> io::Result<()> {
        self.line(format_args!(
            "[connect] attempt {} failed: {}: {}",
            attempt,
            err.kind(),
            err
        ))
    }

    pub fn uploaded(&mut self, local: &Path, remote: &str) -> io::Result<()> {
        self.line(format_args!("uploaded {} -> {}", local.display(), remote))
    }

    /// Header, exit code, then the tails of non-blank output.
    pub fn command_finished(
        &mut self,
        command: &str,
        result: &ExecutionResult,
    ) -> io::Result<()> {
        if self.spaced {
            writeln!(self.out)?;
        }
        writeln!(self.out, ">>> {}", command)?;
        writeln!(self.out, "exit={}", result.exit_code)?;
        if !result.stdout.trim().is_empty() {
            writeln!(self.out, "{}", tail_chars(&result.stdout, self.limits.stdout))?;
        }
        if !result.stderr.trim().is_empty() {
            writeln!(self.out, "[stderr]")?;
            writeln!(self.out, "{}", tail_chars(&result.stderr, self.limits.stderr))?;
        }
        self.out.flush()
    }

    pub fn line(&mut self, args: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.out.write_fmt(args)?;
        writeln!(self.out)?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
