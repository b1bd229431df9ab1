pub mod auth;
pub mod command;
pub mod key;
pub mod known_hosts;
pub mod session;
pub mod settings;

pub use auth::*;
pub use command::*;
pub use known_hosts::{default_known_hosts, HostKeyCheck};
pub use session::*;
pub use settings::*;

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of one remote command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a session error
    pub fn into_stdout(self, command: &str) -> AppResult<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(AppError::command_failed(command, self.exit_code, &self.stderr))
        }
    }
}

/// Sequential command issuance over one authenticated channel.
///
/// Implemented by [`CommandSession`]; the orchestrator only depends on this
/// trait.
#[async_trait]
pub trait CommandChannel: Send {
    /// Run a command; a non-zero exit status is an error
    async fn execute_command(&mut self, command: &str) -> AppResult<String> {
        self.try_execute_command(command).await?.into_stdout(command)
    }

    /// Run a command; the caller inspects the exit status
    async fn try_execute_command(&mut self, command: &str) -> AppResult<CommandResult>;
}

/// Timeouts and cancellation shared by every session derived from one
/// operation
#[derive(Clone)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    /// Per blocking libssh2 call on an established session; zero disables it
    pub command_timeout: Duration,
    pub cancel: CancellationToken,
    /// Host keys are checked against this file on every connect
    pub known_hosts: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(600),
            cancel: CancellationToken::new(),
            known_hosts: default_known_hosts(),
        }
    }
}

/// Run blocking ssh2 work on the blocking pool, giving up when the token is
/// cancelled. The blocking call itself is bounded by the session timeout.
pub(crate) async fn run_blocking<T, F>(cancel: &CancellationToken, f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    let task = tokio::task::spawn_blocking(f);
    tokio::select! {
        joined = task => joined.map_err(|e| AppError::Unknown(format!("Task join error: {}", e)))?,
        _ = cancel.cancelled() => Err(AppError::Cancelled),
    }
}

/// Quote a string for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quote a remote path, leaving a leading `~` outside the quotes so the
/// remote shell still expands it.
pub fn quote_path(path: &str) -> String {
    if path == "~" {
        return path.to_string();
    }
    match path.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "~/".to_string(),
        Some(rest) => format!("~/{}", shell_quote(rest)),
        None => shell_quote(path),
    }
}

/// Join a remote directory and a relative path with `/`
pub fn remote_join(base: &str, relative: &str) -> String {
    let relative = relative.replace('\\', "/");
    let relative = relative.trim_start_matches("./").trim_start_matches('/');
    if relative.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), relative)
}
