use crate::config::{default_private_key, Profile, SshSettings};
use crate::error::{AppError, AppResult};
use once_cell::sync::OnceCell;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// One configuration source for connection parameters. Unset fields defer to
/// the next layer.
#[derive(Debug, Clone, Default)]
pub struct SettingsLayer {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub private_key_file: Option<PathBuf>,
    pub force_ipv4: Option<bool>,
}

impl From<&Profile> for SettingsLayer {
    fn from(profile: &Profile) -> Self {
        Self {
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
            private_key_file: profile.private_key_file.clone(),
            force_ipv4: profile.force_ipv4,
        }
    }
}

impl From<&SshSettings> for SettingsLayer {
    fn from(options: &SshSettings) -> Self {
        Self {
            host: options.host.clone(),
            port: Some(options.port),
            username: options.username.clone(),
            private_key_file: options.private_key_file.clone(),
            force_ipv4: Some(options.force_ipv4),
        }
    }
}

/// Effective connection parameters for one logical operation.
///
/// Immutable once built; share it through `Arc`.
#[derive(Debug)]
pub struct SessionSettings {
    host: String,
    port: u16,
    username: String,
    private_key_file: PathBuf,
    force_ipv4: bool,
    resolved_ipv4: OnceCell<Ipv4Addr>,
}

impl SessionSettings {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        private_key_file: impl Into<PathBuf>,
        force_ipv4: bool,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            private_key_file: private_key_file.into(),
            force_ipv4,
            resolved_ipv4: OnceCell::new(),
        }
    }

    /// Resolve from layers ordered most specific first; the first layer that
    /// sets a field wins, built-in defaults fill the rest.
    pub fn resolve(layers: &[SettingsLayer]) -> AppResult<Self> {
        fn pick<T: Clone>(layers: &[SettingsLayer], f: impl Fn(&SettingsLayer) -> Option<T>) -> Option<T> {
            layers.iter().find_map(f)
        }

        let host = pick(layers, |l| l.host.clone().filter(|h| !h.trim().is_empty()))
            .ok_or_else(|| AppError::Config("No remote host configured".to_string()))?;
        let port = pick(layers, |l| l.port).unwrap_or(DEFAULT_SSH_PORT);
        let username = pick(layers, |l| l.username.clone().filter(|u| !u.trim().is_empty()))
            .unwrap_or_default();
        let private_key_file = pick(layers, |l| l.private_key_file.clone())
            .unwrap_or_else(default_private_key);
        let force_ipv4 = pick(layers, |l| l.force_ipv4).unwrap_or(false);

        Ok(Self::new(host.trim(), port, username.trim(), private_key_file, force_ipv4))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn private_key_file(&self) -> &PathBuf {
        &self.private_key_file
    }

    pub fn force_ipv4(&self) -> bool {
        self.force_ipv4
    }

    pub fn is_default_port(&self) -> bool {
        self.port == DEFAULT_SSH_PORT
    }

    /// `user@host` or `user@host:port` for messages
    pub fn display_target(&self) -> String {
        if self.is_default_port() {
            format!("{}@{}", self.username, self.host)
        } else {
            format!("{}@{}:{}", self.username, self.host, self.port)
        }
    }

    /// IPv4 address of the host. Looked up on first use and remembered.
    pub fn resolved_ipv4(&self) -> AppResult<Ipv4Addr> {
        self.resolved_ipv4
            .get_or_try_init(|| {
                if let Ok(ip) = self.host.parse::<Ipv4Addr>() {
                    return Ok(ip);
                }
                (self.host.as_str(), self.port)
                    .to_socket_addrs()
                    .map_err(|e| AppError::session(format!("Failed to resolve {}: {}", self.host, e)))?
                    .find_map(|addr| match addr.ip() {
                        IpAddr::V4(v4) => Some(v4),
                        IpAddr::V6(_) => None,
                    })
                    .ok_or_else(|| AppError::session(format!("No IPv4 address found for {}", self.host)))
            })
            .copied()
    }

    /// Socket address to connect to. DNS is only consulted here, and only the
    /// IPv4 lookup is cached.
    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        if self.force_ipv4 {
            return Ok(SocketAddr::new(IpAddr::V4(self.resolved_ipv4()?), self.port));
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| AppError::session(format!("Failed to resolve {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| AppError::session(format!("No address found for {}", self.host)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_overrides_options() {
        let explicit = SettingsLayer {
            username: Some("admin".into()),
            ..Default::default()
        };
        let profile = SettingsLayer {
            host: Some("10.0.0.5".into()),
            port: Some(2222),
            username: Some("pi".into()),
            ..Default::default()
        };
        let options = SettingsLayer {
            host: Some("fallback".into()),
            port: Some(22),
            private_key_file: Some(PathBuf::from("/keys/id_ed25519")),
            force_ipv4: Some(true),
            ..Default::default()
        };

        let settings = SessionSettings::resolve(&[explicit, profile, options]).unwrap();
        assert_eq!(settings.host(), "10.0.0.5");
        assert_eq!(settings.port(), 2222);
        assert_eq!(settings.username(), "admin");
        assert_eq!(settings.private_key_file(), &PathBuf::from("/keys/id_ed25519"));
        assert!(settings.force_ipv4());
        assert!(!settings.is_default_port());
        assert_eq!(settings.display_target(), "admin@10.0.0.5:2222");
    }

    #[test]
    fn test_built_in_defaults() {
        let only_host = SettingsLayer {
            host: Some("device".into()),
            ..Default::default()
        };
        let settings = SessionSettings::resolve(&[only_host]).unwrap();
        assert_eq!(settings.port(), 22);
        assert!(settings.is_default_port());
        assert!(!settings.force_ipv4());
        assert_eq!(settings.username(), "");
        assert!(settings.private_key_file().ends_with("id_rsa"));
    }

    #[test]
    fn test_blank_host_is_config_error() {
        let blank = SettingsLayer {
            host: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(SessionSettings::resolve(&[blank]), Err(AppError::Config(_))));
    }

    #[test]
    fn test_ipv4_literal_resolves_without_dns() {
        let settings = SessionSettings::new("192.168.1.7", 22, "pi", "/k", true);
        assert_eq!(settings.resolved_ipv4().unwrap(), Ipv4Addr::new(192, 168, 1, 7));
        assert_eq!(
            settings.socket_addr().unwrap(),
            "192.168.1.7:22".parse::<SocketAddr>().unwrap()
        );
    }
}
