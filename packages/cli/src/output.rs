//! Host output for the terminal.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use wasmbox_runtime::HostOutput;

/// Prints host output a line at a time.
///
/// Text without a trailing newline is held until the rest of its line
/// arrives or the buffer is flushed.
pub struct LineBuffer<W: Write + Send> {
    state: Mutex<State<W>>,
}

struct State<W> {
    out: W,
    partial: String,
}

impl LineBuffer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> LineBuffer<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(State {
                out,
                partial: String::new(),
            }),
        }
    }

    /// Print whatever is left of an unfinished line.
    pub fn flush(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let partial = std::mem::take(&mut state.partial);
        state.out.write_all(partial.as_bytes())?;
        state.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .out
    }

    fn push(&self, text: &str) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.partial.push_str(text);
        if let Some(end) = state.partial.rfind('\n') {
            let lines: String = state.partial.drain(..=end).collect();
            state.out.write_all(lines.as_bytes())?;
            state.out.flush()?;
        }
        Ok(())
    }
}

impl<W: Write + Send> HostOutput for LineBuffer<W> {
    fn write(&self, text: &str) {
        if let Err(err) = self.push(text) {
            tracing::warn!(error = %err, "failed to write host output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_complete_lines_are_printed() {
        let buffer = LineBuffer::new(Vec::new());
        buffer.write("> clang");
        buffer.write(" -cc1\nmain:");
        assert_eq!(buffer.state.lock().unwrap().out, b"> clang -cc1\n");

        buffer.write("\n\tret\n");
        buffer.write("tail");
        buffer.flush().unwrap();
        assert_eq!(buffer.into_inner(), b"> clang -cc1\nmain:\n\tret\ntail");
    }
}
