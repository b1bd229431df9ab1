use super::progress::ProgressSink;
use super::BulkCopy;
use crate::error::AppResult;
use crate::ssh::{CommandChannel, CommandResult, SecureShellSession, SessionSettings};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Full copy over SCP; the whole tree is sent every time
pub struct ScpCopy {
    shell: Arc<SecureShellSession>,
}

impl ScpCopy {
    pub fn new(shell: Arc<SecureShellSession>) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl BulkCopy for ScpCopy {
    fn name(&self) -> &'static str {
        "scp"
    }

    fn settings(&self) -> &Arc<SessionSettings> {
        self.shell.settings()
    }

    async fn upload_folder_recursive(
        &self,
        local: &Path,
        remote: &str,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> AppResult<()> {
        self.shell.upload_folder_recursive(local, remote, progress).await
    }

    async fn upload_file(
        &self,
        local: &Path,
        remote: &str,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> AppResult<()> {
        self.shell.upload_file(local, remote, progress).await
    }

    async fn upload_bytes(&self, bytes: Vec<u8>, remote: &str) -> AppResult<()> {
        self.shell.upload_bytes(bytes, remote).await
    }

    async fn try_execute_single_command(&self, command: &str) -> AppResult<CommandResult> {
        self.shell.try_execute_single_command(command).await
    }

    async fn create_command_session(&self) -> AppResult<Box<dyn CommandChannel>> {
        Ok(Box::new(self.shell.create_command_session().await?))
    }
}
