use super::arch::RuntimeId;
use super::download::url_file_name;
use super::RemoteOperations;
use crate::error::{AppError, AppResult};
use crate::ssh::{quote_path, remote_join, shell_quote};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

impl RemoteOperations {
    /// Install the debugger through the vendor script on the device
    pub async fn install_debugger_online(&self) -> AppResult<bool> {
        let debugger = &self.options.debugger;
        self.narrate(&format!(
            "Installing the debugger ({}) into {} with the online installer",
            debugger.version, debugger.install_folder
        ));
        self.status.set_text("Installing debugger");

        let rid = match self.detect_architecture().await {
            Ok(rid) => rid,
            Err(e) if e.is_session() => {
                self.narrate(&format!("Debugger installation failed: {}", e));
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let command = format!(
            "curl -sSL {} | bash /dev/stdin -v {} -r {} -l {}",
            shell_quote(&debugger.install_script_url),
            shell_quote(&debugger.version),
            rid,
            quote_path(&debugger.install_folder)
        );
        self.run_online_installer("Debugger installation", &command).await
    }

    /// Download the debugger package locally, unpack it and upload the tree
    pub async fn install_debugger_offline(&self) -> AppResult<()> {
        self.narrate("Installing the debugger with the offline package");
        self.status.set_text("Installing debugger (offline)");
        let result = self.install_debugger_offline_steps().await;
        self.report("Offline debugger installation", result)
    }

    /// Online first, offline on failure or when `curl` is missing
    pub async fn install_debugger(&self) -> AppResult<()> {
        match self.install_debugger_online().await {
            Ok(true) => Ok(()),
            Ok(false) | Err(AppError::ToolMissing(_)) => {
                tracing::warn!("Online debugger installation failed, falling back to offline package");
                self.narrate("Falling back to the offline debugger package");
                self.install_debugger_offline().await
            }
            Err(e) => Err(e),
        }
    }

    async fn install_debugger_offline_steps(&self) -> AppResult<()> {
        let debugger = &self.options.debugger;
        let rid = self.detect_architecture().await?;

        let url = debugger_package_url(&debugger.offline_package_url, &debugger.version, rid);
        let file_name = url_file_name(&url)?;
        let cache = self.options.cache_dir.join(format!("vsdbg-{}", debugger.version));
        let archive = cache.join(&file_name);

        if archive.is_file() {
            self.narrate(&format!("Using cached {}", file_name));
        } else {
            self.narrate(&format!("Downloading {}", url));
            self.downloader.fetch(&url, &archive).await?;
        }

        let unpacked = cache.join(rid.as_str());
        self.narrate(&format!("Unpacking {}", file_name));
        let (src, dest) = (archive.clone(), unpacked.clone());
        tokio::task::spawn_blocking(move || extract_archive(&src, &dest))
            .await
            .map_err(|e| AppError::Unknown(format!("Task join error: {}", e)))??;

        self.clean_folder(&debugger.install_folder).await?;
        self.copier
            .upload_folder_recursive(&unpacked, &debugger.install_folder, self.progress())
            .await?;

        let binary = remote_join(&debugger.install_folder, "vsdbg");
        self.copier
            .execute_single_command(&format!("chmod +x {}", quote_path(&binary)))
            .await?;
        Ok(())
    }
}

/// Substitute `{version}` and `{rid}` in the package URL template
pub fn debugger_package_url(template: &str, version: &str, rid: RuntimeId) -> String {
    template
        .replace("{version}", version)
        .replace("{rid}", rid.as_str())
}

/// Unpack a `.zip` or `.tar.gz` into a fresh `dest`
pub fn extract_archive(archive: &Path, dest: &Path) -> AppResult<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if name.ends_with(".zip") {
        let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            let Some(relative) = entry.enclosed_name().map(PathBuf::from) else {
                tracing::warn!("Skipping unsafe archive entry {}", entry.name());
                continue;
            };
            let out_path = dest.join(relative);
            if entry.is_dir() {
                fs::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
            }
        }
        Ok(())
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
        tar.unpack(dest)?;
        Ok(())
    } else {
        Err(AppError::ConfigurationFormat(format!(
            "unsupported debugger package {}",
            archive.display()
        )))
    }
}
