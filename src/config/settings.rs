use crate::error::AppResult;
use crate::remote::CertificateMode;
use crate::transfer::TransferStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tool options: the middle configuration layer between launch profiles and
/// built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub deploy: DeploySettings,
    #[serde(default)]
    pub dotnet: DotnetSettings,
    #[serde(default)]
    pub debugger: DebuggerSettings,
    #[serde(default)]
    pub certificates: CertificateSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
    #[serde(default)]
    pub force_ipv4: bool,
    /// Applies to TCP connect, handshake and authentication
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Applies to each blocking read/write on an established session, 0 disables
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Defaults to `~/.ssh/known_hosts`
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_command_timeout() -> u64 {
    600
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            username: None,
            private_key_file: None,
            force_ipv4: false,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            known_hosts_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    #[serde(default = "default_app_folder")]
    pub app_folder: String,
    #[serde(default = "default_true")]
    pub clean_before_deploy: bool,
    #[serde(default)]
    pub transfer: TransferStrategy,
    /// `source|target;source|target`, see [`crate::config::parse_deployment_entries`]
    #[serde(default)]
    pub additional_entries: String,
}

fn default_app_folder() -> String {
    "~/apps".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            app_folder: default_app_folder(),
            clean_before_deploy: true,
            transfer: TransferStrategy::default(),
            additional_entries: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotnetSettings {
    #[serde(default = "default_dotnet_folder")]
    pub install_folder: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    /// `dotnet`, `aspnetcore` or empty for the SDK
    #[serde(default)]
    pub runtime: String,
    #[serde(default = "default_install_script_url")]
    pub install_script_url: String,
}

fn default_dotnet_folder() -> String {
    "~/.dotnet".to_string()
}

fn default_channel() -> String {
    "LTS".to_string()
}

fn default_install_script_url() -> String {
    "https://dot.net/v1/dotnet-install.sh".to_string()
}

impl Default for DotnetSettings {
    fn default() -> Self {
        Self {
            install_folder: default_dotnet_folder(),
            channel: default_channel(),
            runtime: String::new(),
            install_script_url: default_install_script_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebuggerSettings {
    #[serde(default = "default_debugger_folder")]
    pub install_folder: String,
    #[serde(default = "default_debugger_version")]
    pub version: String,
    #[serde(default = "default_debugger_script_url")]
    pub install_script_url: String,
    /// `{version}` and `{rid}` are substituted
    #[serde(default = "default_debugger_package_url")]
    pub offline_package_url: String,
}

fn default_debugger_folder() -> String {
    "~/.vsdbg".to_string()
}

fn default_debugger_version() -> String {
    "latest".to_string()
}

fn default_debugger_script_url() -> String {
    "https://aka.ms/getvsdbgsh".to_string()
}

fn default_debugger_package_url() -> String {
    "https://vsdebugger.azureedge.net/vsdbg-{version}/vsdbg-{rid}.tar.gz".to_string()
}

impl Default for DebuggerSettings {
    fn default() -> Self {
        Self {
            install_folder: default_debugger_folder(),
            version: default_debugger_version(),
            install_script_url: default_debugger_script_url(),
            offline_package_url: default_debugger_package_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSettings {
    #[serde(default)]
    pub mode: CertificateMode,
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            mode: CertificateMode::UpdateIfInvalid,
        }
    }
}

impl AppSettings {
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: AppSettings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            let settings = AppSettings::default();
            settings.save(config_dir)?;
            Ok(settings)
        }
    }

    pub fn save(&self, config_dir: &Path) -> AppResult<()> {
        std::fs::create_dir_all(config_dir)?;
        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: AppSettings = toml::from_str(
            r#"
            [ssh]
            host = "raspberrypi.local"
            username = "pi"

            [deploy]
            transfer = "rsync"
            "#,
        )
        .unwrap();

        assert_eq!(settings.ssh.port, 22);
        assert_eq!(settings.ssh.connect_timeout_secs, 5);
        assert_eq!(settings.deploy.transfer, TransferStrategy::Rsync);
        assert!(settings.deploy.clean_before_deploy);
        assert_eq!(settings.dotnet.install_folder, "~/.dotnet");
        assert_eq!(settings.certificates.mode, CertificateMode::UpdateIfInvalid);
    }

    #[test]
    fn test_load_writes_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::load(dir.path()).unwrap();
        assert!(dir.path().join("config.toml").exists());
        assert_eq!(settings.debugger.version, "latest");

        let reloaded = AppSettings::load(dir.path()).unwrap();
        assert_eq!(reloaded.deploy.app_folder, settings.deploy.app_folder);
    }
}
