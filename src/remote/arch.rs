use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// .NET runtime identifier of a supported Linux device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeId {
    #[serde(rename = "linux-arm")]
    LinuxArm,
    #[serde(rename = "linux-arm64")]
    LinuxArm64,
    #[serde(rename = "linux-x64")]
    LinuxX64,
}

impl RuntimeId {
    /// Map `uname -m` output to a runtime id
    pub fn from_uname(machine: &str) -> AppResult<Self> {
        match machine.trim() {
            "armv7l" => Ok(RuntimeId::LinuxArm),
            "aarch64" => Ok(RuntimeId::LinuxArm64),
            "x86_64" => Ok(RuntimeId::LinuxX64),
            other => Err(AppError::UnsupportedArchitecture(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeId::LinuxArm => "linux-arm",
            RuntimeId::LinuxArm64 => "linux-arm64",
            RuntimeId::LinuxX64 => "linux-x64",
        }
    }

    /// Value for the install script's `--architecture`
    pub fn dotnet_arch(&self) -> &'static str {
        match self {
            RuntimeId::LinuxArm => "arm",
            RuntimeId::LinuxArm64 => "arm64",
            RuntimeId::LinuxX64 => "x64",
        }
    }
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
