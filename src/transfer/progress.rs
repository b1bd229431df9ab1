use crate::output::OutputSink;
use crate::ui::UiThread;
use serde::Serialize;
use std::sync::Arc;

/// Transfer progress for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress { file: String, percent: u8 },
    Done { file: String },
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Throttles raw byte counts into at most one event per 10% bucket and
/// exactly one `Done` per file.
pub struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    file: Option<String>,
    last_bucket: Option<u8>,
    done: bool,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            file: None,
            last_bucket: None,
            done: false,
        }
    }

    /// Record `transferred` of `total` bytes for `file`
    pub fn observe(&mut self, file: &str, transferred: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            (transferred.min(total) * 100 / total) as u8
        };
        self.observe_percent(file, percent);
    }

    /// Record a percentage for `file`; 100 or more completes it
    pub fn observe_percent(&mut self, file: &str, percent: u8) {
        if self.file.as_deref() != Some(file) {
            self.file = Some(file.to_string());
            self.last_bucket = None;
            self.done = false;
        }
        if self.done {
            return;
        }

        if percent >= 100 {
            self.done = true;
            self.sink.report(ProgressEvent::Done {
                file: file.to_string(),
            });
            return;
        }

        let bucket = percent / 10;
        if self.last_bucket.map_or(true, |last| bucket > last) {
            self.last_bucket = Some(bucket);
            self.sink.report(ProgressEvent::Progress {
                file: file.to_string(),
                percent: bucket * 10,
            });
        }
    }

    /// Complete the current file if it has not reported `Done` yet
    pub fn finish(&mut self) {
        if let Some(file) = self.file.clone() {
            self.observe_percent(&file, 100);
        }
    }
}

/// Renders progress to an output sink, on the UI thread when one is given
pub struct OutputProgress {
    output: Arc<dyn OutputSink>,
    ui: Option<UiThread>,
}

impl OutputProgress {
    pub fn new(output: Arc<dyn OutputSink>, ui: Option<UiThread>) -> Self {
        Self { output, ui }
    }

    fn render(event: &ProgressEvent) -> String {
        match event {
            ProgressEvent::Progress { file, percent } => format!("  {} {:>3}%", file, percent),
            ProgressEvent::Done { file } => format!("  {} done", file),
        }
    }
}

impl ProgressSink for OutputProgress {
    fn report(&self, event: ProgressEvent) {
        let line = Self::render(&event);
        match &self.ui {
            Some(ui) => {
                let output = self.output.clone();
                ui.post(move || output.write_line(&line));
            }
            None => self.output.write_line(&line),
        }
    }
}
