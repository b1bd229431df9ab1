//! Bulk file transfer to the remote device.
//!
//! Two strategies share the [`BulkCopy`] contract: a full SCP copy of the tree
//! on every call, and a delta copy through the local `rsync` binary.

pub mod progress;
pub mod rsync;
pub mod scp;

pub use progress::*;
pub use rsync::RsyncCopy;
pub use scp::ScpCopy;

use crate::error::AppResult;
use crate::ssh::{CommandChannel, CommandResult, SecureShellSession, SessionSettings};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How build output reaches the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStrategy {
    #[default]
    Scp,
    Rsync,
}

impl std::fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStrategy::Scp => write!(f, "scp"),
            TransferStrategy::Rsync => write!(f, "rsync"),
        }
    }
}

impl std::str::FromStr for TransferStrategy {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scp" => Ok(TransferStrategy::Scp),
            "rsync" => Ok(TransferStrategy::Rsync),
            other => Err(crate::error::AppError::ConfigurationFormat(format!(
                "unknown transfer strategy '{}'",
                other
            ))),
        }
    }
}

/// Transport bound to one set of session settings
#[async_trait]
pub trait BulkCopy: Send + Sync {
    fn name(&self) -> &'static str;

    fn settings(&self) -> &Arc<SessionSettings>;

    /// Copy the contents of `local` into the remote directory `remote`
    async fn upload_folder_recursive(
        &self,
        local: &Path,
        remote: &str,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> AppResult<()>;

    async fn upload_file(
        &self,
        local: &Path,
        remote: &str,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> AppResult<()>;

    async fn upload_bytes(&self, bytes: Vec<u8>, remote: &str) -> AppResult<()>;

    async fn execute_single_command(&self, command: &str) -> AppResult<String> {
        self.try_execute_single_command(command)
            .await?
            .into_stdout(command)
    }

    async fn try_execute_single_command(&self, command: &str) -> AppResult<CommandResult>;

    async fn create_command_session(&self) -> AppResult<Box<dyn CommandChannel>>;
}

/// Build the transport selected in the settings
pub fn create_bulk_copy(
    strategy: TransferStrategy,
    shell: Arc<SecureShellSession>,
    tools_dir: PathBuf,
) -> Arc<dyn BulkCopy> {
    match strategy {
        TransferStrategy::Scp => Arc::new(ScpCopy::new(shell)),
        TransferStrategy::Rsync => Arc::new(RsyncCopy::new(shell, tools_dir)),
    }
}
