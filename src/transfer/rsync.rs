use super::progress::{ProgressSink, ProgressTracker};
use super::BulkCopy;
use crate::error::{AppError, AppResult};
use crate::remote::arch::RuntimeId;
use crate::ssh::{shell_quote, CommandChannel, CommandResult, SecureShellSession, SessionSettings};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Where a bootstrapped helper binary is installed on the device
const REMOTE_HELPER_PATH: &str = "~/.local/bin/rsync";

static PROGRESS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[\d,.]+[KMG]?\s+(\d{1,3})%").unwrap());

/// Delta copy through the local `rsync` binary over ssh.
///
/// Uses `BatchMode`, so the private key must be usable without a prompt
/// (unencrypted or loaded into an agent). Single files, byte payloads and
/// commands go over the SSH session.
pub struct RsyncCopy {
    shell: Arc<SecureShellSession>,
    tools_dir: PathBuf,
    remote_rsync: OnceCell<Option<String>>,
}

impl RsyncCopy {
    pub fn new(shell: Arc<SecureShellSession>, tools_dir: PathBuf) -> Self {
        Self {
            shell,
            tools_dir,
            remote_rsync: OnceCell::new(),
        }
    }

    /// Local helper binary for a runtime id
    pub fn helper_path(&self, rid: RuntimeId) -> PathBuf {
        helper_path(&self.tools_dir, rid)
    }

    async fn check_local_rsync(&self) -> AppResult<()> {
        let status = Command::new("rsync")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        match status {
            Ok(s) if s.success() => Ok(()),
            Ok(_) | Err(_) => Err(AppError::ToolMissing("rsync".to_string())),
        }
    }

    /// `None` when the device has rsync on its PATH, otherwise the path of the
    /// helper that was copied over
    async fn remote_rsync_path(&self) -> AppResult<Option<String>> {
        self.remote_rsync
            .get_or_try_init(|| self.bootstrap_remote_rsync())
            .await
            .cloned()
    }

    async fn bootstrap_remote_rsync(&self) -> AppResult<Option<String>> {
        let mut channel = self.shell.create_command_session().await?;
        let located = locate_remote_rsync(&mut channel, &self.tools_dir).await?;
        channel.close();

        let (helper, rid) = match located {
            RemoteRsync::OnPath => return Ok(None),
            RemoteRsync::Helper { local, rid } => (local, rid),
        };
        tracing::info!("Installing rsync helper for {} on the device", rid);
        self.shell.upload_file(&helper, REMOTE_HELPER_PATH, None).await?;
        self.shell
            .execute_single_command(&format!("chmod +x {}", REMOTE_HELPER_PATH))
            .await?;
        Ok(Some(REMOTE_HELPER_PATH.to_string()))
    }

    async fn run_rsync(
        &self,
        args: Vec<String>,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> AppResult<()> {
        tracing::debug!("rsync {}", args.join(" "));

        let mut child = Command::new("rsync")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Process(format!("Failed to start rsync: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(read_all(stderr));
        let cancel = self.shell.options().cancel.clone();

        let progress_task = async move {
            let Some(mut stdout) = stdout else { return };
            let mut tracker = progress.map(ProgressTracker::new);
            let mut parser = RsyncProgressParser::default();
            let mut buf = [0u8; 4096];
            while let Ok(n) = stdout.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                for update in parser.feed(&buf[..n]) {
                    if let Some(t) = tracker.as_mut() {
                        match update {
                            RsyncUpdate::File(_) => {}
                            RsyncUpdate::Percent(file, percent) => t.observe_percent(&file, percent),
                        }
                    }
                }
            }
            if let Some(t) = tracker.as_mut() {
                t.finish();
            }
        };

        let waited = tokio::select! {
            (status, _) = async { tokio::join!(child.wait(), progress_task) } => Some(status),
            _ = cancel.cancelled() => None,
        };
        let status = match waited {
            Some(status) => status.map_err(|e| AppError::Process(format!("rsync failed: {}", e)))?,
            None => {
                let _ = child.kill().await;
                return Err(AppError::Cancelled);
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Err(AppError::command_failed("rsync", status.code().unwrap_or(-1), &stderr))
        }
    }
}

#[async_trait]
impl BulkCopy for RsyncCopy {
    fn name(&self) -> &'static str {
        "rsync"
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
        self.check_local_rsync().await?;
        let rsync_path = self.remote_rsync_path().await?;

        let remote = self.shell.expand_remote_path(remote).await?;
        self.shell
            .execute_single_command(&format!("mkdir -p {}", shell_quote(&remote)))
            .await?;

        let args = rsync_args(
            self.settings(),
            &self.shell.options().known_hosts,
            local,
            &remote,
            rsync_path.as_deref(),
        );
        self.run_rsync(args, progress).await
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

/// Local helper binary for a runtime id below `tools_dir`
pub fn helper_path(tools_dir: &Path, rid: RuntimeId) -> PathBuf {
    tools_dir.join("rsync").join(rid.as_str()).join("rsync")
}

/// How the device gets an rsync binary
#[derive(Debug, PartialEq)]
enum RemoteRsync {
    OnPath,
    Helper { local: PathBuf, rid: RuntimeId },
}

/// Look for rsync on the device; without it, pick the staged helper for the
/// device architecture or fail with `ToolMissing`
async fn locate_remote_rsync<C>(channel: &mut C, tools_dir: &Path) -> AppResult<RemoteRsync>
where
    C: CommandChannel + ?Sized,
{
    if channel.try_execute_command("command -v rsync").await?.success() {
        return Ok(RemoteRsync::OnPath);
    }

    let machine = channel.execute_command("uname -m").await?;
    let rid = RuntimeId::from_uname(&machine)?;
    let local = helper_path(tools_dir, rid);
    if !local.is_file() {
        tracing::warn!("rsync missing on device and no helper at {}", local.display());
        return Err(AppError::ToolMissing("rsync".to_string()));
    }
    Ok(RemoteRsync::Helper { local, rid })
}

/// Command line for copying the contents of `local` into `remote`
fn rsync_args(
    settings: &SessionSettings,
    known_hosts: &Path,
    local: &Path,
    remote: &str,
    rsync_path: Option<&str>,
) -> Vec<String> {
    let mut ssh = vec![
        "ssh".to_string(),
        "-p".to_string(),
        settings.port().to_string(),
        "-i".to_string(),
        shell_quote(&settings.private_key_file().to_string_lossy()),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        shell_quote(&format!("UserKnownHostsFile={}", known_hosts.display())),
    ];
    if settings.force_ipv4() {
        ssh.push("-4".to_string());
    }

    let mut args = vec![
        "-rlptz".to_string(),
        "--progress".to_string(),
        "-e".to_string(),
        ssh.join(" "),
    ];
    if let Some(path) = rsync_path {
        args.push(format!("--rsync-path={}", path));
    }

    let mut source = local.to_string_lossy().into_owned();
    if !source.ends_with('/') {
        source.push('/');
    }
    args.push(source);
    args.push(format!(
        "{}@{}:{}/",
        settings.username(),
        settings.host(),
        remote.trim_end_matches('/')
    ));
    args
}

#[derive(Debug, PartialEq)]
enum RsyncUpdate {
    File(String),
    Percent(String, u8),
}

/// Splits `--progress` output on `\r` and `\n` and tracks the current file
#[derive(Default)]
struct RsyncProgressParser {
    pending: Vec<u8>,
    current: Option<String>,
}

impl RsyncProgressParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<RsyncUpdate> {
        self.pending.extend_from_slice(bytes);
        let mut updates = Vec::new();
        // Only complete lines are decoded so multibyte names survive chunking
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\r' || *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..pos]);
            if let Some(update) = self.parse_line(&line) {
                updates.push(update);
            }
        }
        updates
    }

    fn parse_line(&mut self, line: &str) -> Option<RsyncUpdate> {
        if let Some(caps) = PROGRESS_LINE.captures(line) {
            let percent: u8 = caps[1].parse().ok()?;
            let file = self.current.clone()?;
            return Some(RsyncUpdate::Percent(file, percent.min(100)));
        }

        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.ends_with('/')
            || trimmed.starts_with("sending incremental file list")
            || trimmed.starts_with("sent ")
            || trimmed.starts_with("total size")
            || trimmed.starts_with("created directory")
        {
            return None;
        }
        self.current = Some(trimmed.to_string());
        Some(RsyncUpdate::File(trimmed.to_string()))
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut text = String::new();
    if let Some(mut reader) = reader {
        let mut bytes = Vec::new();
        let _ = reader.read_to_end(&mut bytes).await;
        text = String::from_utf8_lossy(&bytes).into_owned();
    }
    text
}
