//! Output sinks for text the channel echoes while framing or relaying.

use crate::lock_or_recover;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Narrow display capability: show a text fragment verbatim.
pub trait Reporter: Send {
    fn display(&mut self, text: &str);
}

/// Writes fragments straight to stdout and flushes so prompts without newlines appear.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn display(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut stdout = io::stdout().lock();
        if let Err(err) = stdout
            .write_all(text.as_bytes())
            .and_then(|()| stdout.flush())
        {
            tracing::debug!(error = %err, "stdout reporter write failed");
        }
    }
}

/// Captures displayed text in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferReporter {
    captured: Arc<Mutex<String>>,
}

impl BufferReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything displayed so far.
    #[must_use]
    pub fn contents(&self) -> String {
        lock_or_recover(&self.captured, "BufferReporter::contents").clone()
    }

    /// Return and clear the captured text.
    pub fn take(&self) -> String {
        std::mem::take(&mut *lock_or_recover(&self.captured, "BufferReporter::take"))
    }
}

impl Reporter for BufferReporter {
    fn display(&mut self, text: &str) {
        lock_or_recover(&self.captured, "BufferReporter::display").push_str(text);
    }
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn display(&mut self, text: &str) {
        (**self).display(text);
    }
}
