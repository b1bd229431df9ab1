//! Trust bootstrap between this machine and a device that has never seen our
//! key: generate a key pair, record the server's host key and append the
//! public key to the device's `authorized_keys`.

use crate::error::{AppError, AppResult};
use crate::output::OutputSink;
use crate::ssh::key::read_public_key;
use crate::ssh::known_hosts::{known_hosts_name, verify_host_key};
use crate::ssh::{
    handshake, open_authenticated, open_with_password, run_blocking, session::disconnect, session::exec,
    Authenticator, HostKeyCheck, SessionOptions, SessionSettings,
};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// Remote shell command appending `public_key` to `authorized_keys`
pub fn authorize_command(public_key: &str) -> String {
    format!(
        "mkdir -p ~/.ssh && chmod 700 ~/.ssh && echo '{}' >> ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys",
        public_key.trim()
    )
}

pub struct KeySetupService {
    settings: Arc<SessionSettings>,
    auth: Arc<Authenticator>,
    options: SessionOptions,
    output: Arc<dyn OutputSink>,
}

impl KeySetupService {
    pub fn new(
        settings: Arc<SessionSettings>,
        auth: Arc<Authenticator>,
        options: SessionOptions,
        output: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            settings,
            auth,
            options,
            output,
        }
    }

    pub fn with_known_hosts(mut self, path: PathBuf) -> Self {
        self.options.known_hosts = path;
        self
    }

    /// Create the configured key pair with `ssh-keygen` unless it exists.
    /// Returns whether a key was generated.
    pub async fn generate_key_pair(&self) -> AppResult<bool> {
        let key = self.settings.private_key_file().clone();
        if key.exists() {
            self.output
                .write_line(&format!("Using existing key {}", key.display()));
            return Ok(false);
        }
        if let Some(parent) = key.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.output
            .write_line(&format!("Generating RSA key pair {}", key.display()));
        let output = Command::new("ssh-keygen")
            .args(["-t", "rsa", "-b", "4096", "-N", ""])
            .arg("-f")
            .arg(&key)
            .args(["-C", &format!("dotnet-remote@{}", self.settings.host())])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AppError::ToolMissing("ssh-keygen".to_string()),
                _ => AppError::Process(format!("Failed to run ssh-keygen: {}", e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            self.output
                .write_line(&format!("Key generation failed: {}", stderr.trim()));
            return Err(AppError::Process(format!("ssh-keygen failed: {}", stderr.trim())));
        }
        self.output.write_line("Key pair generated");
        Ok(true)
    }

    /// Record the server's host key in `known_hosts` and return its SHA256
    /// fingerprint. A changed host key is refused.
    pub async fn register_server_fingerprint(&self) -> AppResult<String> {
        let settings = self.settings.clone();
        let options = self.options.clone();

        self.output.write_line(&format!(
            "Registering host key of {}",
            known_hosts_name(settings.host(), settings.port())
        ));
        let result = run_blocking(&self.options.cancel, move || {
            let session = handshake(&settings, &options)?;
            let outcome = verify_host_key(&session, &settings, &options.known_hosts);
            disconnect(&session);
            outcome
        })
        .await;

        match &result {
            Ok(HostKeyCheck {
                fingerprint,
                added: true,
            }) => self.output.write_line(&format!(
                "Added host key {} to {}",
                fingerprint,
                self.options.known_hosts.display()
            )),
            Ok(HostKeyCheck { fingerprint, .. }) => self
                .output
                .write_line(&format!("Host key {} is already known", fingerprint)),
            Err(e) => self
                .output
                .write_line(&format!("Host key registration failed: {}", e)),
        }
        result.map(|check| check.fingerprint)
    }

    /// Authorize the configured key on the device using the account password.
    ///
    /// Each phase narrates its own outcome so a failure points at the step
    /// that broke.
    pub async fn authorize_key(&self, password: &str) -> AppResult<()> {
        let target = self.settings.display_target();

        self.output
            .write(&format!("Checking whether the key is accepted by {} ... ", target));
        match self.try_key_login().await {
            Ok(()) => {
                self.output.write_line("yes, nothing to do");
                return Ok(());
            }
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => self.output.write_line(&format!("no ({})", e)),
        }

        let public_key = match read_public_key(self.settings.private_key_file()) {
            Ok(key) => key,
            Err(e) => {
                self.output.write_line(&format!("Reading the public key failed: {}", e));
                return Err(e);
            }
        };

        self.output
            .write(&format!("Connecting to {} with password ... ", target));
        let settings = self.settings.clone();
        let options = self.options.clone();
        let password = zeroize::Zeroizing::new(password.to_string());
        let command = authorize_command(&public_key);

        let connected = run_blocking(&self.options.cancel, move || {
            let session = open_with_password(&settings, &options, &password)?;
            Ok(session)
        })
        .await;
        let session = match connected {
            Ok(session) => {
                self.output.write_line("OK");
                session
            }
            Err(e) => {
                self.output.write_line(&format!("failed: {}", e));
                return Err(e);
            }
        };

        self.output.write("Adding the public key to ~/.ssh/authorized_keys ... ");
        let appended = run_blocking(&self.options.cancel, move || {
            let result = exec(&session, &command).and_then(|r| r.into_stdout("authorize key"));
            disconnect(&session);
            result
        })
        .await;
        match appended {
            Ok(_) => self.output.write_line("OK"),
            Err(e) => {
                self.output.write_line(&format!("failed: {}", e));
                return Err(e);
            }
        }

        self.output.write("Verifying key authentication ... ");
        match self.try_key_login().await {
            Ok(()) => {
                self.output.write_line("OK");
                Ok(())
            }
            Err(e) => {
                self.output.write_line(&format!("failed: {}", e));
                Err(e)
            }
        }
    }

    /// Generate (if needed), register the host key, authorize the key
    pub async fn setup(&self, password: &str) -> AppResult<()> {
        self.generate_key_pair().await?;
        self.register_server_fingerprint().await?;
        self.authorize_key(password).await
    }

    async fn try_key_login(&self) -> AppResult<()> {
        let (settings, auth, options) = (self.settings.clone(), self.auth.clone(), self.options.clone());
        run_blocking(&self.options.cancel, move || {
            let session = open_authenticated(&settings, &options, &auth)?;
            disconnect(&session);
            Ok(())
        })
        .await
    }
}
