use super::arch::RuntimeId;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

static PAYLOAD_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"URL #\d+ - [a-z]+: (https?://\S+)").unwrap());

/// Local side of the offline install workflows
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` to `dest`, replacing it atomically once complete
    async fn fetch(&self, url: &str, dest: &Path) -> AppResult<()>;

    /// Run the .NET install script in dry-run mode and return the primary
    /// payload URL it would download
    async fn resolve_payload_url(
        &self,
        script: &Path,
        channel: &str,
        runtime: &str,
        rid: RuntimeId,
    ) -> AppResult<String>;
}

/// Downloads over HTTPS and runs the install script with the local `bash`
pub struct HttpDownloader {
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl HttpDownloader {
    pub fn new(cancel: CancellationToken) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("dotnet-remote/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, cancel })
    }

    async fn download(&self, url: &str, partial: &Path) -> AppResult<()> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> AppResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(dest);
        tracing::info!("Downloading {} to {}", url, dest.display());

        let result = tokio::select! {
            result = self.download(url, &partial) => result,
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
        };
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, dest).await?;
        Ok(())
    }

    async fn resolve_payload_url(
        &self,
        script: &Path,
        channel: &str,
        runtime: &str,
        rid: RuntimeId,
    ) -> AppResult<String> {
        let mut command = Command::new("bash");
        command
            .arg(script)
            .args(["--dry-run", "--os", "linux"])
            .args(["--channel", channel])
            .args(["--architecture", rid.dotnet_arch()]);
        if !runtime.is_empty() {
            command.args(["--runtime", runtime]);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            output = command.output() => output,
            _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
        };
        let output = output.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::ToolMissing("bash".to_string()),
            _ => AppError::Process(format!("Failed to run install script: {}", e)),
        })?;

        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if !output.status.success() {
            let tail = text
                .char_indices()
                .rev()
                .nth(499)
                .map_or(text.as_str(), |(i, _)| &text[i..]);
            return Err(AppError::Process(format!("Install script dry run failed: {}", tail.trim())));
        }

        parse_payload_url(&text)
            .ok_or_else(|| AppError::Download("Install script did not report a payload URL".to_string()))
    }
}

/// First payload URL listed by a dry run
pub fn parse_payload_url(output: &str) -> Option<String> {
    PAYLOAD_URL
        .captures(output)
        .map(|caps| caps[1].to_string())
}

/// Last path segment of a URL, without query or fragment
pub fn url_file_name(url: &str) -> AppResult<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Download(format!("Cannot derive a file name from {}", url)))
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
