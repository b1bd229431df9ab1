//! Host key verification against an OpenSSH `known_hosts` file.
//!
//! Every transport checks the server key before authenticating. Unknown hosts
//! are added (the `accept-new` policy of OpenSSH); a changed key is refused.

use super::key::compute_sha256_fingerprint;
use super::settings::{SessionSettings, DEFAULT_SSH_PORT};
use crate::error::{AppError, AppResult};
use ssh2::{CheckResult, HostKeyType, KnownHostFileKind, KnownHostKeyFormat, Session as Ssh2Session};
use std::path::{Path, PathBuf};

/// `~/.ssh/known_hosts` of the local user
pub fn default_known_hosts() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ssh").join("known_hosts"))
        .unwrap_or_else(|| PathBuf::from("known_hosts"))
}

/// Host name as written to `known_hosts`
pub fn known_hosts_name(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Result of a successful host key check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyCheck {
    pub fingerprint: String,
    /// The key was unknown and has been written to the file
    pub added: bool,
}

/// Check the host key presented during the handshake of `session`
pub fn verify_host_key(
    session: &Ssh2Session,
    settings: &SessionSettings,
    known_hosts_path: &Path,
) -> AppResult<HostKeyCheck> {
    let (key, key_type) = session
        .host_key()
        .ok_or_else(|| AppError::session("No host key received"))?;
    check_host_key(
        session,
        settings.host(),
        settings.port(),
        key,
        key_format(key_type),
        known_hosts_path,
    )
}

/// Compare `key` with the entries for `host:port`, adding it when unknown
pub fn check_host_key(
    session: &Ssh2Session,
    host: &str,
    port: u16,
    key: &[u8],
    format: KnownHostKeyFormat,
    known_hosts_path: &Path,
) -> AppResult<HostKeyCheck> {
    let fingerprint = compute_sha256_fingerprint(key);

    let mut known_hosts = session.known_hosts()?;
    if known_hosts_path.exists() {
        if let Err(e) = known_hosts.read_file(known_hosts_path, KnownHostFileKind::OpenSSH) {
            tracing::warn!("Failed to read {}: {}", known_hosts_path.display(), e);
        }
    }

    match known_hosts.check_port(host, port, key) {
        CheckResult::Match => {
            tracing::debug!("Host key matched for {}:{}", host, port);
            Ok(HostKeyCheck {
                fingerprint,
                added: false,
            })
        }
        CheckResult::NotFound => {
            let name = known_hosts_name(host, port);
            known_hosts.add(&name, key, "added by dotnet-remote", format)?;
            if let Some(parent) = known_hosts_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            known_hosts.write_file(known_hosts_path, KnownHostFileKind::OpenSSH)?;
            tracing::warn!(
                "Permanently added host key {} for {} to {}",
                fingerprint,
                name,
                known_hosts_path.display()
            );
            Ok(HostKeyCheck {
                fingerprint,
                added: true,
            })
        }
        CheckResult::Mismatch => {
            tracing::error!("HOST KEY MISMATCH for {}:{}! Possible MITM attack!", host, port);
            Err(AppError::session(format!(
                "Host key for {} has changed (now {}). Remove the old entry from {} if the change is expected.",
                known_hosts_name(host, port),
                fingerprint,
                known_hosts_path.display()
            )))
        }
        CheckResult::Failure => Err(AppError::session("Failed to check known hosts")),
    }
}

fn key_format(key_type: HostKeyType) -> KnownHostKeyFormat {
    match key_type {
        HostKeyType::Rsa => KnownHostKeyFormat::SshRsa,
        HostKeyType::Dss => KnownHostKeyFormat::SshDss,
        HostKeyType::Ecdsa256 => KnownHostKeyFormat::Ecdsa256,
        HostKeyType::Ecdsa384 => KnownHostKeyFormat::Ecdsa384,
        HostKeyType::Ecdsa521 => KnownHostKeyFormat::Ecdsa521,
        HostKeyType::Ed25519 => KnownHostKeyFormat::Ed25519,
        HostKeyType::Unknown => KnownHostKeyFormat::Unknown,
    }
}
