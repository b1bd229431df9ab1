use super::RemoteOperations;
use crate::error::{AppError, AppResult};
use crate::ssh::{quote_path, remote_join, shell_quote};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

/// When to replace the HTTPS development certificate on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateMode {
    /// Only when `dev-certs https --check` reports no valid certificate
    #[default]
    UpdateIfInvalid,
    Always,
}

impl RemoteOperations {
    fn remote_dotnet(&self) -> String {
        quote_path(&remote_join(&self.options.dotnet.install_folder, "dotnet"))
    }

    /// Import `pfx` as the device's HTTPS development certificate
    pub async fn setup_https_certificate(
        &self,
        pfx: Vec<u8>,
        password: &str,
        mode: CertificateMode,
    ) -> AppResult<()> {
        self.narrate("Checking the HTTPS development certificate");
        self.status.set_text("Checking HTTPS certificate");

        let dotnet = self.remote_dotnet();
        let check = self
            .copier
            .try_execute_single_command(&format!("{} dev-certs https --check", dotnet))
            .await;
        let check = match check {
            Ok(check) => check,
            Err(e) => return self.report("HTTPS certificate setup", Err(e)),
        };

        if check.success() && mode == CertificateMode::UpdateIfInvalid {
            self.narrate("A valid HTTPS development certificate is already installed");
            return Ok(());
        }

        let remote_tmp = format!("/tmp/{}.pfx", uuid::Uuid::new_v4());
        let result = async {
            self.copier.upload_bytes(pfx, &remote_tmp).await?;
            let import = self
                .copier
                .try_execute_single_command(&format!(
                    "{} dev-certs https --clean --import {} --password {}",
                    dotnet,
                    remote_tmp,
                    shell_quote(password)
                ))
                .await;
            let _ = self
                .copier
                .try_execute_single_command(&format!("rm -f {}", remote_tmp))
                .await;

            let import = import?;
            self.write_remote_output(&import);
            if import.success() {
                Ok(())
            } else {
                Err(AppError::command_failed(
                    "dotnet dev-certs https --import",
                    import.exit_code,
                    &import.stderr,
                ))
            }
        }
        .await;

        self.report("HTTPS certificate setup", result)
    }
}

/// Export the local development certificate as PFX bytes using the local
/// `dotnet` SDK
pub async fn export_local_certificate(password: &str) -> AppResult<Vec<u8>> {
    let path = std::env::temp_dir().join(format!("{}.pfx", uuid::Uuid::new_v4()));

    let output = Command::new("dotnet")
        .args(["dev-certs", "https", "-ep"])
        .arg(&path)
        .args(["-p", password])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::ToolMissing("dotnet".to_string()),
            _ => AppError::Process(format!("Failed to run dotnet dev-certs: {}", e)),
        })?;

    if !output.status.success() {
        let _ = tokio::fs::remove_file(&path).await;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        let truncated: String = detail.chars().take(500).collect();
        return Err(AppError::Process(format!(
            "Certificate export failed: {}",
            truncated.trim()
        )));
    }

    let bytes = tokio::fs::read(&path).await;
    let _ = tokio::fs::remove_file(&path).await;
    Ok(bytes?)
}
