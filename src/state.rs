use crate::config::{self, AppSettings, Profile, ProfileManager};
use crate::error::AppResult;
use crate::keychain::{PassphraseCache, PassphrasePrompt};
use crate::keysetup::KeySetupService;
use crate::output::{OutputSink, StatusSink};
use crate::remote::{HttpDownloader, RemoteOperations, RemoteOptions};
use crate::ssh::{
    default_known_hosts, Authenticator, SecureShellSession, SessionOptions, SessionSettings, SettingsLayer,
};
use crate::transfer::{create_bulk_copy, OutputProgress};
use crate::ui::UiThread;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Global application state.
///
/// Owns the configuration and the passphrase cache for the lifetime of the
/// host process and builds the per-operation services.
pub struct AppState {
    pub config_dir: PathBuf,
    pub settings: Arc<RwLock<AppSettings>>,
    pub profiles: Arc<RwLock<ProfileManager>>,
    pub passphrases: Arc<PassphraseCache>,
    prompt: Option<Arc<dyn PassphrasePrompt>>,
    ui: Option<UiThread>,
}

impl AppState {
    pub fn new(config_dir: PathBuf) -> AppResult<Self> {
        std::fs::create_dir_all(&config_dir)?;

        let settings = AppSettings::load(&config_dir)?;
        let profiles = ProfileManager::load(&config_dir)?;

        Ok(Self {
            config_dir,
            settings: Arc::new(RwLock::new(settings)),
            profiles: Arc::new(RwLock::new(profiles)),
            passphrases: Arc::new(PassphraseCache::new()),
            prompt: None,
            ui: None,
        })
    }

    /// Ask `prompt` for key passphrases, on `ui` when given
    pub fn with_prompt(mut self, prompt: Arc<dyn PassphrasePrompt>, ui: Option<UiThread>) -> Self {
        self.prompt = Some(prompt);
        self.ui = ui;
        self
    }

    pub fn ui(&self) -> Option<&UiThread> {
        self.ui.as_ref()
    }

    /// Look a launch profile up by id or name
    pub fn profile(&self, id_or_name: &str) -> AppResult<Profile> {
        self.profiles.read().find(id_or_name)
    }

    /// Effective connection settings: explicit values, then the launch
    /// profile, then the tool options
    pub fn session_settings(
        &self,
        explicit: SettingsLayer,
        profile: Option<&Profile>,
    ) -> AppResult<Arc<SessionSettings>> {
        let mut layers = vec![explicit];
        if let Some(profile) = profile {
            layers.push(SettingsLayer::from(profile));
        }
        layers.push(SettingsLayer::from(&self.settings.read().ssh));
        Ok(Arc::new(SessionSettings::resolve(&layers)?))
    }

    pub fn session_options(&self, cancel: CancellationToken) -> SessionOptions {
        let settings = self.settings.read();
        SessionOptions {
            connect_timeout: Duration::from_secs(settings.ssh.connect_timeout_secs),
            command_timeout: Duration::from_secs(settings.ssh.command_timeout_secs),
            cancel,
            known_hosts: settings
                .ssh
                .known_hosts_file
                .clone()
                .unwrap_or_else(default_known_hosts),
        }
    }

    pub fn authenticator(&self) -> Arc<Authenticator> {
        Arc::new(Authenticator::new(
            self.passphrases.clone(),
            self.prompt.clone(),
            self.ui.clone(),
        ))
    }

    pub fn secure_shell(&self, settings: Arc<SessionSettings>, options: SessionOptions) -> Arc<SecureShellSession> {
        Arc::new(SecureShellSession::new(settings, self.authenticator(), options))
    }

    /// Workflow orchestrator over the transfer strategy from the settings
    pub fn remote_operations(
        &self,
        settings: Arc<SessionSettings>,
        options: SessionOptions,
        profile: Option<&Profile>,
        output: Arc<dyn OutputSink>,
        status: Arc<dyn StatusSink>,
    ) -> AppResult<RemoteOperations> {
        let app_settings = self.settings.read().clone();
        let downloader = Arc::new(HttpDownloader::new(options.cancel.clone())?);
        let shell = self.secure_shell(settings, options);
        let copier = create_bulk_copy(app_settings.deploy.transfer, shell, config::get_tools_dir()?);

        let remote_options = RemoteOptions::from_settings(
            &app_settings,
            profile.and_then(|p| p.app_folder.clone()),
            config::get_cache_dir()?,
        );
        let progress = Arc::new(OutputProgress::new(output.clone(), self.ui.clone()));

        Ok(RemoteOperations::new(copier, output, status, downloader, remote_options).with_progress(progress))
    }

    pub fn key_setup(
        &self,
        settings: Arc<SessionSettings>,
        options: SessionOptions,
        output: Arc<dyn OutputSink>,
    ) -> KeySetupService {
        KeySetupService::new(settings, self.authenticator(), options, output)
    }

    /// Forget every cached passphrase
    pub fn logout(&self) {
        let count = self.passphrases.len();
        self.passphrases.clear();
        tracing::info!("Cleared {} cached passphrase(s)", count);
    }
}
