use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// SSH/SCP transport failure or a remote command that exited non-zero
    #[error("SSH error: {message}")]
    Session {
        message: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("Cannot connect to {user}@{host}: {message}")]
    RemoteUnreachable {
        host: String,
        user: String,
        message: String,
    },

    #[error("Required tool is not available: {0}")]
    ToolMissing(String),

    #[error("Unsupported remote architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("Passphrase required for private key {0}")]
    PassphraseRequired(String),

    #[error("Invalid format: {0}")]
    ConfigurationFormat(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// Transport level failure without a remote exit status
    pub fn session(message: impl Into<String>) -> Self {
        AppError::Session {
            message: message.into(),
            exit_code: None,
            stderr: None,
        }
    }

    /// Remote command finished with a non-zero exit status
    pub fn command_failed(command: &str, exit_code: i32, stderr: &str) -> Self {
        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            format!("Command '{}' exited with status {}", command, exit_code)
        } else {
            format!("Command '{}' exited with status {}: {}", command, exit_code, stderr)
        };
        AppError::Session {
            message,
            exit_code: Some(exit_code),
            stderr: Some(stderr.to_string()),
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            AppError::Session { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, AppError::Session { .. })
    }
}

/// Serializable error for machine-readable output
#[derive(Serialize)]
pub struct SerializableError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&AppError> for SerializableError {
    fn from(err: &AppError) -> Self {
        let (code, message, details) = match err {
            AppError::Session { message, stderr, .. } => {
                ("SESSION_ERROR", message.clone(), stderr.clone().filter(|s| !s.is_empty()))
            }
            AppError::RemoteUnreachable { host, user, message } => (
                "REMOTE_UNREACHABLE",
                format!("Cannot connect to {}@{}", user, host),
                Some(message.clone()),
            ),
            AppError::ToolMissing(tool) => ("TOOL_MISSING", tool.clone(), None),
            AppError::UnsupportedArchitecture(arch) => ("UNSUPPORTED_ARCHITECTURE", arch.clone(), None),
            AppError::PassphraseRequired(path) => ("PASSPHRASE_REQUIRED", path.clone(), None),
            AppError::ConfigurationFormat(msg) => ("CONFIGURATION_FORMAT", msg.clone(), None),
            AppError::Config(msg) => ("CONFIG_ERROR", msg.clone(), None),
            AppError::Keychain(msg) => ("KEYCHAIN_ERROR", msg.clone(), None),
            AppError::Download(msg) => ("DOWNLOAD_ERROR", msg.clone(), None),
            AppError::Process(msg) => ("PROCESS_ERROR", msg.clone(), None),
            AppError::Cancelled => ("CANCELLED", err.to_string(), None),
            AppError::Io(e) => ("IO_ERROR", e.to_string(), None),
            AppError::Serialization(msg) => ("SERIALIZATION_ERROR", msg.clone(), None),
            AppError::Unknown(msg) => ("UNKNOWN_ERROR", msg.clone(), None),
        };

        SerializableError {
            code: code.to_string(),
            message,
            details,
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        SerializableError::from(self).serialize(serializer)
    }
}

impl From<ssh2::Error> for AppError {
    fn from(err: ssh2::Error) -> Self {
        AppError::session(err.message().to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Download(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Unknown(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("ZIP error: {}", err),
        ))
    }
}

pub type AppResult<T> = Result<T, AppError>;
