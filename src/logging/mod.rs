use crate::output::OutputSink;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Maximum lines to keep in memory ring buffer
const MAX_RING_BUFFER_LINES: usize = 10_000;

/// Maximum line length before truncation
const MAX_LINE_LENGTH: usize = 2048;

/// Maximum transcript file size before rotation (5 MB)
const MAX_LOG_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Sensitive patterns to redact
static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // SSH Private key blocks
        Regex::new(r"(?s)-----BEGIN[^-]*PRIVATE KEY-----.*?-----END[^-]*PRIVATE KEY-----").unwrap(),
        // Password arguments on command lines (dev-certs import/export)
        Regex::new(r#"(?i)--password\s+("[^"]*"|'[^']*'|\S+)"#).unwrap(),
        // Generic secrets by key name (key=value patterns)
        Regex::new(r#"(?i)(password|passwd|pwd|secret|token|passphrase)\s*[:=]\s*["']?[^\s"']+["']?"#).unwrap(),
    ]
});

/// Sanitize a string by removing sensitive information
pub fn sanitize(input: &str) -> String {
    let mut result = input.to_string();

    for pattern in SENSITIVE_PATTERNS.iter() {
        result = pattern.replace_all(&result, "[REDACTED]").to_string();
    }

    if result.len() > MAX_LINE_LENGTH {
        let mut cut = MAX_LINE_LENGTH;
        while !result.is_char_boundary(cut) {
            cut -= 1;
        }
        result = format!("{}... [truncated]", &result[..cut]);
    }

    result
}

/// Remove ANSI/VT escape sequences (CSI, OSC, ...) from remote output.
///
/// An OSC sequence that is never terminated swallows the rest of the input.
pub fn strip_ansi(input: &str) -> String {
    strip_ansi_escapes::strip_str(input)
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A single transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: i64,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub message: String,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            level,
            target: None,
            message: sanitize(&strip_ansi(&message.into())),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Output sink that keeps a transcript of every workflow narrative.
///
/// Lines are sanitized, kept in a ring buffer and appended as JSON to the
/// transcript file, which is rotated once it grows past 5 MB. Text is also
/// forwarded unchanged to the wrapped sink, if any.
pub struct Transcript {
    ring_buffer: RwLock<VecDeque<LogLine>>,
    partial: Mutex<String>,
    log_file_path: PathBuf,
    target: Option<String>,
    inner: Option<Arc<dyn OutputSink>>,
}

impl Transcript {
    pub fn new(
        logs_dir: PathBuf,
        target: Option<String>,
        inner: Option<Arc<dyn OutputSink>>,
    ) -> std::io::Result<Arc<Self>> {
        fs::create_dir_all(&logs_dir)?;

        let transcript = Arc::new(Self {
            ring_buffer: RwLock::new(VecDeque::with_capacity(1024)),
            partial: Mutex::new(String::new()),
            log_file_path: logs_dir.join("transcript.log"),
            target,
            inner,
        });

        transcript.load_existing_lines();
        Ok(transcript)
    }

    fn load_existing_lines(&self) {
        if !self.log_file_path.exists() {
            return;
        }

        if let Ok(file) = File::open(&self.log_file_path) {
            let reader = BufReader::new(file);
            let mut buffer = self.ring_buffer.write();

            for line in reader.lines().map_while(Result::ok) {
                if let Ok(log_line) = serde_json::from_str::<LogLine>(&line) {
                    if buffer.len() >= MAX_RING_BUFFER_LINES {
                        buffer.pop_front();
                    }
                    buffer.push_back(log_line);
                }
            }
        }
    }

    /// Add a transcript entry
    pub fn log(&self, entry: LogLine) {
        {
            let mut buffer = self.ring_buffer.write();
            if buffer.len() >= MAX_RING_BUFFER_LINES {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());
        }

        self.write_to_file(&entry);
    }

    fn write_to_file(&self, entry: &LogLine) {
        if let Ok(metadata) = fs::metadata(&self.log_file_path) {
            if metadata.len() > MAX_LOG_FILE_SIZE {
                self.rotate_log_file();
            }
        }

        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
        {
            if let Ok(json) = serde_json::to_string(entry) {
                let _ = writeln!(file, "{}", json);
            }
        }
    }

    fn rotate_log_file(&self) {
        let rotated_path = self.log_file_path.with_extension("log.1");
        let _ = fs::remove_file(&rotated_path);
        let _ = fs::rename(&self.log_file_path, &rotated_path);
    }

    /// Most recent entries, oldest first
    pub fn recent(&self, max_lines: usize) -> Vec<LogLine> {
        let buffer = self.ring_buffer.read();
        let skip = buffer.len().saturating_sub(max_lines);
        buffer.iter().skip(skip).cloned().collect()
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_file_path
    }

    fn level_for(line: &str) -> LogLevel {
        let lower = line.to_lowercase();
        if lower.contains("failed") || lower.contains("error") {
            LogLevel::Error
        } else if lower.contains("warning") {
            LogLevel::Warn
        } else {
            LogLevel::Info
        }
    }
}

impl OutputSink for Transcript {
    fn write(&self, text: &str) {
        if let Some(inner) = &self.inner {
            inner.write(text);
        }

        let complete: Vec<String> = {
            let mut partial = self.partial.lock();
            partial.push_str(text);
            let mut lines = Vec::new();
            while let Some(pos) = partial.find('\n') {
                let line: String = partial.drain(..=pos).collect();
                lines.push(line.trim_end_matches(['\r', '\n']).to_string());
            }
            lines
        };

        for line in complete {
            let entry = LogLine::new(Self::level_for(&line), line);
            self.log(match &self.target {
                Some(target) => entry.with_target(target.clone()),
                None => entry,
            });
        }
    }

    fn activate(&self) {
        if let Some(inner) = &self.inner {
            inner.activate();
        }
    }
}
