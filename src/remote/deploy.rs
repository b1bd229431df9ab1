use super::RemoteOperations;
use crate::config::DeploymentEntry;
use crate::error::{AppError, AppResult};
use crate::ssh::{quote_path, remote_join};
use std::path::Path;

/// Empty `path` if it exists and make sure it exists afterwards. Succeeds
/// whether or not the directory was there.
pub fn clean_command(path: &str) -> String {
    let quoted = quote_path(path.trim_end_matches('/'));
    format!("[ -d {p} ] && rm -rf {p}/*; mkdir -p {p}", p = quoted)
}

impl RemoteOperations {
    /// Clean-and-recreate a remote directory
    pub async fn clean_folder(&self, path: &str) -> AppResult<()> {
        let normalized = path.trim().trim_end_matches('/');
        if normalized.is_empty() || normalized == "~" {
            return Err(AppError::ConfigurationFormat(format!(
                "refusing to clean '{}'",
                path
            )));
        }
        self.narrate(&format!("Cleaning {}", path));
        let result = self
            .copier
            .execute_single_command(&clean_command(path))
            .await
            .map(|_| ());
        if let Err(e) = &result {
            self.narrate(&format!("Cleaning {} failed: {}", path, e));
        }
        result
    }

    /// Copy build output into the app folder, optionally cleaning it first.
    /// The transport receives the configured folder unchanged.
    pub async fn deploy(&self, local_output: &Path, clean: bool) -> AppResult<()> {
        let target = self.options.app_folder.clone();
        self.narrate(&format!(
            "Deploying {} to {} via {}",
            local_output.display(),
            target,
            self.copier.name()
        ));
        self.status.set_text("Deploying");

        let result = async {
            if clean {
                self.clean_folder(&target).await?;
            }
            self.copier
                .upload_folder_recursive(local_output, &target, self.progress())
                .await
        }
        .await;

        self.report("Deployment", result)
    }

    /// Copy each additional entry (file or folder) below the app folder
    pub async fn deploy_additional(&self, project_dir: &Path, entries: &[DeploymentEntry]) -> AppResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let result = async {
            for entry in entries {
                let source = project_dir.join(&entry.source);
                let target = remote_join(&self.options.app_folder, &entry.target);
                self.narrate(&format!("Copying {} to {}", entry.source, target));

                if source.is_dir() {
                    self.copier
                        .upload_folder_recursive(&source, &target, self.progress())
                        .await?;
                } else if source.is_file() {
                    self.copier.upload_file(&source, &target, self.progress()).await?;
                } else {
                    return Err(AppError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("{} does not exist", source.display()),
                    )));
                }
            }
            Ok(())
        }
        .await;

        self.report("Additional deployment", result)
    }
}
