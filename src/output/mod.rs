//! Output and status sinks.
//!
//! Workflows narrate what they do to an [`OutputSink`] and show a one-line
//! state on a [`StatusSink`]. The console, an in-memory buffer and the
//! transcript log are concrete sinks; [`UiOutput`] marshals another sink onto
//! the UI thread.

use crate::logging::strip_ansi;
use crate::ui::UiThread;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Abstract text sink
pub trait OutputSink: Send + Sync {
    fn write(&self, text: &str);

    fn write_line(&self, text: &str) {
        self.write(&format!("{}\n", text));
    }

    /// Bring the sink to the user's attention (e.g. focus an output pane)
    fn activate(&self) {}
}

/// Single-line status surface
pub trait StatusSink: Send + Sync {
    fn set_text(&self, text: &str);
}

/// Writes to standard output, stripping terminal escape sequences
#[derive(Default)]
pub struct ConsoleOutput;

impl OutputSink for ConsoleOutput {
    fn write(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(strip_ansi(text).as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects everything written, for tests and for capturing command output
#[derive(Default)]
pub struct MemoryOutput {
    buffer: Mutex<String>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.buffer.lock().lines().map(str::to_string).collect()
    }
}

impl OutputSink for MemoryOutput {
    fn write(&self, text: &str) {
        self.buffer.lock().push_str(text);
    }
}

/// Forwards to an inner sink on the UI thread
pub struct UiOutput {
    inner: Arc<dyn OutputSink>,
    ui: UiThread,
}

impl UiOutput {
    pub fn new(inner: Arc<dyn OutputSink>, ui: UiThread) -> Self {
        Self { inner, ui }
    }
}

impl OutputSink for UiOutput {
    fn write(&self, text: &str) {
        let inner = self.inner.clone();
        let text = text.to_string();
        self.ui.post(move || inner.write(&text));
    }

    fn activate(&self) {
        let inner = self.inner.clone();
        self.ui.post(move || inner.activate());
    }
}

/// Status line on standard error
#[derive(Default)]
pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn set_text(&self, text: &str) {
        eprintln!("[status] {}", text);
    }
}

/// Remembers the last status text
#[derive(Default)]
pub struct MemoryStatus {
    text: Mutex<String>,
}

impl MemoryStatus {
    pub fn text(&self) -> String {
        self.text.lock().clone()
    }
}

impl StatusSink for MemoryStatus {
    fn set_text(&self, text: &str) {
        *self.text.lock() = text.to_string();
    }
}

/// Discards status updates
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn set_text(&self, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_output_lines() {
        let out = MemoryOutput::new();
        out.write("Connecting...");
        out.write_line(" done");
        out.write_line("second");
        assert_eq!(out.lines(), vec!["Connecting... done", "second"]);
    }

    #[test]
    fn test_ui_output_marshals_to_ui_thread() {
        let (ui, _guard) = UiThread::spawn("ui-output").unwrap();
        let memory = Arc::new(MemoryOutput::new());
        let sink = UiOutput::new(memory.clone(), ui.clone());
        sink.write_line("hello");
        ui.invoke_blocking(|| ()).unwrap();
        assert_eq!(memory.contents(), "hello\n");
    }
}
