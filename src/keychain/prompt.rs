use super::Passphrase;
use std::path::Path;
use zeroize::Zeroizing;

/// Interactive source of passphrases for encrypted private keys.
///
/// Implementations talk to the user and therefore must be invoked on the UI
/// thread; the session layer takes care of that through [`crate::ui::UiThread`].
/// Returning `None` means the user cancelled.
pub trait PassphrasePrompt: Send + Sync {
    fn prompt_passphrase(&self, key_path: &Path) -> Option<Passphrase>;
}

/// Reads the passphrase from the controlling terminal without echo
pub struct TerminalPrompt;

impl PassphrasePrompt for TerminalPrompt {
    fn prompt_passphrase(&self, key_path: &Path) -> Option<Passphrase> {
        match rpassword::prompt_password(format!(
            "Enter passphrase for key '{}': ",
            key_path.display()
        )) {
            Ok(pass) => Some(Zeroizing::new(pass)),
            Err(e) => {
                tracing::warn!("Failed to read passphrase: {}", e);
                None
            }
        }
    }
}

/// Non-interactive prompt answering with a fixed passphrase, or cancelling
/// when none is configured. Used for unattended runs.
pub struct FixedPrompt {
    passphrase: Option<Passphrase>,
}

impl FixedPrompt {
    pub fn new(passphrase: Option<String>) -> Self {
        Self {
            passphrase: passphrase.map(Zeroizing::new),
        }
    }

    /// Take the passphrase from an environment variable, if set
    pub fn from_env(var: &str) -> Self {
        Self::new(std::env::var(var).ok())
    }
}

impl PassphrasePrompt for FixedPrompt {
    fn prompt_passphrase(&self, _key_path: &Path) -> Option<Passphrase> {
        self.passphrase.clone()
    }
}
