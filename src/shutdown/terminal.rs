//! Terminal plumbing for immediate keypress input.

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, is_raw_mode_enabled};
use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use tracing::debug;

/// Raw mode for as long as the guard lives. Dropping it (including
/// during a panic unwind) restores the normal input mode.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Enter raw mode, or `None` when stdin is not an interactive terminal.
    pub fn enter() -> Option<Self> {
        if !io::stdin().is_terminal() {
            debug!("stdin is not a terminal; keyboard shutdown falls back to SIGINT");
            return None;
        }
        match enable_raw_mode() {
            Ok(()) => Some(Self { _private: () }),
            Err(e) => {
                debug!("Could not enable raw mode: {}", e);
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Writer that expands `\n` into `\r\n` while the terminal is in raw
/// mode, so lines start at column zero. Otherwise bytes pass through.
pub struct CrlfWriter<W> {
    inner: W,
    expand: bool,
}

impl<W> CrlfWriter<W> {
    /// Expand newlines only if raw mode is on right now.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            expand: is_raw_mode_enabled().unwrap_or(false),
        }
    }

    #[cfg(test)]
    fn with_expansion(inner: W, expand: bool) -> Self {
        Self { inner, expand }
    }
}

impl<W: Write> Write for CrlfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.expand {
            return self.inner.write(buf);
        }

        let mut start = 0;
        for (i, byte) in buf.iter().enumerate() {
            if *byte == b'\n' {
                self.inner.write_all(&buf[start..i])?;
                self.inner.write_all(b"\r\n")?;
                start = i + 1;
            }
        }
        self.inner.write_all(&buf[start..])?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Print one line of user-facing output to stdout.
pub fn say(message: impl Display) {
    let mut out = CrlfWriter::new(io::stdout().lock());
    let _ = writeln!(out, "{}", message);
    let _ = out.flush();
}
