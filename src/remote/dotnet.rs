use super::download::url_file_name;
use super::RemoteOperations;
use crate::error::{AppError, AppResult};
use crate::ssh::{quote_path, shell_quote};

const INSTALL_SCRIPT_NAME: &str = "dotnet-install.sh";

impl RemoteOperations {
    /// Run the official installer on the device through `curl | bash`.
    ///
    /// Returns `false` when the installer or the transport failed, so the
    /// caller can fall back to the offline path. A missing `curl` is
    /// `ToolMissing`.
    pub async fn install_dotnet_online(&self) -> AppResult<bool> {
        let dotnet = &self.options.dotnet;
        self.narrate(&format!(
            "Installing .NET (channel {}) into {} with the online installer",
            dotnet.channel, dotnet.install_folder
        ));
        self.status.set_text("Installing .NET");

        let mut command = format!(
            "curl -sSL {} | bash /dev/stdin --channel {}",
            shell_quote(&dotnet.install_script_url),
            shell_quote(&dotnet.channel)
        );
        if !dotnet.runtime.is_empty() {
            command.push_str(&format!(" --runtime {}", shell_quote(&dotnet.runtime)));
        }
        command.push_str(&format!(" --install-dir {}", quote_path(&dotnet.install_folder)));

        self.run_online_installer(".NET installation", &command).await
    }

    /// Download the payload locally and unpack it on the device
    pub async fn install_dotnet_offline(&self) -> AppResult<()> {
        self.narrate("Installing .NET with the offline installer");
        self.status.set_text("Installing .NET (offline)");
        let result = self.install_dotnet_offline_steps().await;
        self.report("Offline .NET installation", result)
    }

    /// Online installer first, offline installer if that fails or `curl` is
    /// missing on the device
    pub async fn install_dotnet(&self) -> AppResult<()> {
        match self.install_dotnet_online().await {
            Ok(true) => Ok(()),
            Ok(false) | Err(AppError::ToolMissing(_)) => {
                tracing::warn!("Online .NET installation failed, falling back to offline installation");
                self.narrate("Falling back to the offline installer");
                self.install_dotnet_offline().await
            }
            Err(e) => Err(e),
        }
    }

    async fn install_dotnet_offline_steps(&self) -> AppResult<()> {
        let dotnet = &self.options.dotnet;
        let rid = self.detect_architecture().await?;

        let script = self.options.cache_dir.join(INSTALL_SCRIPT_NAME);
        if let Err(e) = self.downloader.fetch(&dotnet.install_script_url, &script).await {
            if !script.is_file() {
                return Err(e);
            }
            tracing::warn!("Using cached install script, download failed: {}", e);
        }

        let payload_url = self
            .downloader
            .resolve_payload_url(&script, &dotnet.channel, &dotnet.runtime, rid)
            .await?;
        let file_name = url_file_name(&payload_url)?;
        let payload = self.options.cache_dir.join(&file_name);

        if payload.is_file() {
            self.narrate(&format!("Using cached {}", file_name));
        } else {
            self.narrate(&format!("Downloading {}", payload_url));
            self.downloader.fetch(&payload_url, &payload).await?;
        }

        let remote_tmp = format!("/tmp/{}", file_name);
        self.narrate(&format!("Uploading {} to {}", file_name, remote_tmp));
        self.copier
            .upload_file(&payload, &remote_tmp, self.progress())
            .await?;

        let dir = quote_path(&dotnet.install_folder);
        let tmp = shell_quote(&remote_tmp);
        self.narrate(&format!("Extracting into {}", dotnet.install_folder));
        let extracted = self
            .copier
            .execute_single_command(&format!("mkdir -p {dir} && tar -xzf {tmp} -C {dir}"))
            .await;
        let cleanup = self
            .copier
            .execute_single_command(&format!("rm -f {}", tmp))
            .await;

        extracted?;
        if let Err(e) = cleanup {
            tracing::warn!("Failed to remove {}: {}", remote_tmp, e);
        }
        Ok(())
    }

    /// Shared by the .NET and debugger online installers
    pub(crate) async fn run_online_installer(&self, action: &str, command: &str) -> AppResult<bool> {
        let outcome = async {
            self.require_tool("curl").await?;
            self.copier.try_execute_single_command(command).await
        }
        .await;

        match outcome {
            Ok(result) => {
                self.write_remote_output(&result);
                if result.success() {
                    self.narrate(&format!("{} succeeded", action));
                    self.status.set_text(&format!("{} succeeded", action));
                    Ok(true)
                } else {
                    self.narrate(&format!(
                        "{} failed: installer exited with status {}",
                        action, result.exit_code
                    ));
                    self.status.set_text(&format!("{} failed", action));
                    Ok(false)
                }
            }
            Err(e) if e.is_session() => {
                self.narrate(&format!("{} failed: {}", action, e));
                self.status.set_text(&format!("{} failed", action));
                Ok(false)
            }
            Err(e) => {
                self.narrate(&format!("{} failed: {}", action, e));
                Err(e)
            }
        }
    }
}
