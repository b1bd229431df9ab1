//! High-level remote workflows.
//!
//! [`RemoteOperations`] composes the bulk copy transport, command sessions and
//! the local downloader into provisioning and deployment workflows. Every
//! workflow narrates its progress to the output sink, whatever the outcome.

pub mod arch;
pub mod certs;
pub mod debugger;
pub mod deploy;
pub mod download;
pub mod dotnet;
pub mod permissions;
pub mod process;

#[cfg(test)]
mod tests;

pub use arch::RuntimeId;
pub use certs::{export_local_certificate, CertificateMode};
pub use deploy::clean_command;
pub use download::{Downloader, HttpDownloader};
pub use permissions::convert_permissions;
pub use process::validate_process_name;

use crate::config::{AppSettings, DebuggerSettings, DotnetSettings};
use crate::error::{AppError, AppResult};
use crate::logging::strip_ansi;
use crate::output::{OutputSink, StatusSink};
use crate::ssh::{CommandResult, SessionSettings};
use crate::transfer::{BulkCopy, ProgressSink};
use std::path::PathBuf;
use std::sync::Arc;

/// Folders and installer parameters used by the workflows
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub app_folder: String,
    pub dotnet: DotnetSettings,
    pub debugger: DebuggerSettings,
    /// Local download cache for installer scripts and offline payloads
    pub cache_dir: PathBuf,
}

impl RemoteOptions {
    pub fn from_settings(settings: &AppSettings, app_folder: Option<String>, cache_dir: PathBuf) -> Self {
        Self {
            app_folder: app_folder.unwrap_or_else(|| settings.deploy.app_folder.clone()),
            dotnet: settings.dotnet.clone(),
            debugger: settings.debugger.clone(),
            cache_dir,
        }
    }
}

pub struct RemoteOperations {
    copier: Arc<dyn BulkCopy>,
    output: Arc<dyn OutputSink>,
    status: Arc<dyn StatusSink>,
    downloader: Arc<dyn Downloader>,
    options: RemoteOptions,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl RemoteOperations {
    pub fn new(
        copier: Arc<dyn BulkCopy>,
        output: Arc<dyn OutputSink>,
        status: Arc<dyn StatusSink>,
        downloader: Arc<dyn Downloader>,
        options: RemoteOptions,
    ) -> Self {
        Self {
            copier,
            output,
            status,
            downloader,
            options,
            progress: None,
        }
    }

    /// Report per-file upload progress to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn settings(&self) -> &Arc<SessionSettings> {
        self.copier.settings()
    }

    pub fn options(&self) -> &RemoteOptions {
        &self.options
    }

    /// Pre-flight gate for every other workflow
    pub async fn check_connection(&self) -> AppResult<()> {
        let settings = self.settings().clone();
        let target = settings.display_target();
        self.output.write(&format!("Connecting to {} ... ", target));
        self.status.set_text(&format!("Connecting to {}", target));

        match self.copier.execute_single_command("true").await {
            Ok(_) => {
                self.output.write_line("OK");
                self.status.set_text(&format!("Connected to {}", target));
                Ok(())
            }
            Err(AppError::Cancelled) => {
                self.output.write_line("cancelled");
                Err(AppError::Cancelled)
            }
            Err(e) => {
                self.output.write_line(&format!("failed: {}", e));
                self.status.set_text(&format!("Cannot connect to {}", target));
                tracing::warn!("Connectivity check for {} failed: {}", target, e);
                Err(AppError::RemoteUnreachable {
                    host: settings.host().to_string(),
                    user: settings.username().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// `uname -m` mapped to a runtime id
    pub async fn detect_architecture(&self) -> AppResult<RuntimeId> {
        let machine = self.copier.execute_single_command("uname -m").await?;
        let rid = RuntimeId::from_uname(&machine);
        match &rid {
            Ok(rid) => self.narrate(&format!("Remote architecture: {} ({})", machine.trim(), rid)),
            Err(e) => self.narrate(&format!("Architecture detection failed: {}", e)),
        }
        rid
    }

    /// Fail with `ToolMissing` unless `command -v <tool>` succeeds remotely
    pub async fn require_tool(&self, tool: &str) -> AppResult<()> {
        let result = self
            .copier
            .try_execute_single_command(&format!("command -v {}", tool))
            .await?;
        if result.success() {
            Ok(())
        } else {
            self.narrate(&format!("'{}' is not installed on the remote device", tool));
            Err(AppError::ToolMissing(tool.to_string()))
        }
    }

    fn narrate(&self, text: &str) {
        self.output.write_line(text);
    }

    /// Remote command output, verbatim apart from escape sequences
    fn write_remote_output(&self, result: &CommandResult) {
        for text in [&result.stdout, &result.stderr] {
            let clean = strip_ansi(text);
            if clean.trim().is_empty() {
                continue;
            }
            self.output.write(&clean);
            if !clean.ends_with('\n') {
                self.output.write("\n");
            }
        }
    }

    /// Narrate the outcome of a workflow step and pass the result through
    fn report<T>(&self, action: &str, result: AppResult<T>) -> AppResult<T> {
        match &result {
            Ok(_) => {
                self.narrate(&format!("{} succeeded", action));
                self.status.set_text(&format!("{} succeeded", action));
            }
            Err(e) => {
                self.narrate(&format!("{} failed: {}", action, e));
                self.status.set_text(&format!("{} failed", action));
            }
        }
        result
    }

    fn progress(&self) -> Option<Arc<dyn ProgressSink>> {
        self.progress.clone()
    }
}
