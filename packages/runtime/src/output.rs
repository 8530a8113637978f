//! Host-output sink and the styling used for text sent to it.

use std::sync::{Arc, Mutex, PoisonError};

use nu_ansi_term::{Color, Style};

/// Where diagnostic text from the pipeline and from running programs goes.
///
/// Text may contain ANSI color escapes; rendering them is up to the
/// embedder.
pub trait HostOutput: Send + Sync {
    fn write(&self, text: &str);
}

impl<F> HostOutput for F
where
    F: Fn(&str) + Send + Sync,
{
    fn write(&self, text: &str) {
        self(text)
    }
}

/// Collects everything written into a shared string.
#[derive(Debug, Clone, Default)]
pub struct BufferedOutput {
    buffer: Arc<Mutex<String>>,
}

impl BufferedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take everything written so far, leaving the buffer empty.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl HostOutput for BufferedOutput {
    fn write(&self, text: &str) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }
}

/// Prefix for a logged invocation: a bold bright-yellow arrow.
pub(crate) fn log_prefix() -> String {
    format!("{} ", Style::new().bold().fg(Color::LightYellow).paint(">"))
}

pub(crate) fn timing(text: &str) -> String {
    Color::LightGreen.paint(text).to_string()
}

/// Format an error (and optional backtrace) for host output.
pub(crate) fn error_message(message: &str, stack: Option<&str>) -> String {
    let mut text = format!("Error: {message}");
    if let Some(stack) = stack {
        text.push('\n');
        text.push_str(stack);
    }
    format!("{}\n", Color::LightRed.paint(text))
}
