//! Session-scoped passphrase cache.
//!
//! Passphrases for encrypted private keys are kept only in memory, encrypted
//! with AES-256-GCM under a random key generated when the cache is created.
//! Nothing here ever touches the disk.

pub mod prompt;

pub use prompt::*;

use crate::error::{AppError, AppResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

/// Passphrase in plaintext, wiped when dropped
pub type Passphrase = Zeroizing<String>;

/// One cached passphrase, encrypted at rest
struct CachedPassphrase {
    generation: u64,
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

impl Drop for CachedPassphrase {
    fn drop(&mut self) {
        self.ciphertext.zeroize();
        self.nonce.zeroize();
    }
}

/// A passphrase handed out by the cache, tagged with the generation of the
/// entry it came from so a failed attempt evicts only that entry.
pub struct CachedSecret {
    pub passphrase: Passphrase,
    pub generation: u64,
}

pub struct PassphraseCache {
    cipher: Aes256Gcm,
    entries: DashMap<PathBuf, CachedPassphrase>,
    prompt_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    next_generation: AtomicU64,
}

impl PassphraseCache {
    pub fn new() -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(key.as_mut());
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));

        Self {
            cipher,
            entries: DashMap::new(),
            prompt_locks: DashMap::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Look up the passphrase for a key file
    pub fn try_get(&self, key_path: &Path) -> Option<CachedSecret> {
        let key = normalize_key_path(key_path);
        let entry = self.entries.get(&key)?;
        match self.decrypt(&entry) {
            Ok(passphrase) => Some(CachedSecret {
                passphrase,
                generation: entry.generation,
            }),
            Err(e) => {
                tracing::warn!("Dropping unreadable cached passphrase: {}", e);
                let generation = entry.generation;
                drop(entry);
                self.clear_generation(key_path, generation);
                None
            }
        }
    }

    /// Store a passphrase, replacing any previous entry for the key
    pub fn insert(&self, key_path: &Path, passphrase: &str) -> AppResult<u64> {
        let key = normalize_key_path(key_path);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let entry = self.encrypt(passphrase, generation)?;
        self.entries.insert(key, entry);
        tracing::debug!("Cached passphrase for {}", key_path.display());
        Ok(generation)
    }

    /// Forget the passphrase for one key
    pub fn clear_key(&self, key_path: &Path) {
        let key = normalize_key_path(key_path);
        if self.entries.remove(&key).is_some() {
            tracing::debug!("Cleared cached passphrase for {}", key_path.display());
        }
    }

    /// Forget the passphrase for one key, but only if it is still the entry
    /// identified by `generation`. Returns whether an entry was removed.
    pub fn clear_generation(&self, key_path: &Path, generation: u64) -> bool {
        let key = normalize_key_path(key_path);
        self.entries
            .remove_if(&key, |_, entry| entry.generation == generation)
            .is_some()
    }

    /// Forget everything (logout)
    pub fn clear(&self) {
        self.entries.clear();
        tracing::debug!("Cleared all cached passphrases");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached passphrase, or run `prompt` to obtain one.
    ///
    /// Concurrent callers for the same key are serialized so the user is
    /// asked at most once; the ones that waited pick up the cached answer.
    /// `prompt` returning `None` yields `PassphraseRequired`.
    pub fn get_or_prompt<F>(&self, key_path: &Path, prompt: F) -> AppResult<CachedSecret>
    where
        F: FnOnce() -> Option<Passphrase>,
    {
        let key = normalize_key_path(key_path);
        let lock = self
            .prompt_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        if let Some(secret) = self.try_get(key_path) {
            return Ok(secret);
        }

        let passphrase = prompt()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::PassphraseRequired(key_path.display().to_string()))?;
        let generation = self.insert(key_path, &passphrase)?;

        Ok(CachedSecret {
            passphrase,
            generation,
        })
    }

    fn encrypt(&self, passphrase: &str, generation: u64) -> AppResult<CachedPassphrase> {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), passphrase.as_bytes())
            .map_err(|e| AppError::Keychain(format!("Failed to encrypt passphrase: {}", e)))?;

        Ok(CachedPassphrase {
            generation,
            nonce,
            ciphertext,
        })
    }

    fn decrypt(&self, entry: &CachedPassphrase) -> AppResult<Passphrase> {
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(&entry.nonce), entry.ciphertext.as_slice())
                .map_err(|e| AppError::Keychain(format!("Failed to decrypt passphrase: {}", e)))?,
        );
        let text = std::str::from_utf8(&plaintext)
            .map_err(|e| AppError::Keychain(format!("Invalid UTF-8 in passphrase: {}", e)))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}

impl Default for PassphraseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache key for a private key file: canonical path when the file exists,
/// otherwise the absolute path.
pub fn normalize_key_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn secret(s: &str) -> Option<Passphrase> {
        Some(Zeroizing::new(s.to_string()))
    }

    #[test]
    fn test_prompt_then_get_returns_same_passphrase() {
        let cache = PassphraseCache::new();
        let key = Path::new("/keys/id_rsa");
        let first = cache.get_or_prompt(key, || secret("hunter2")).unwrap();
        assert_eq!(first.passphrase.as_str(), "hunter2");

        let again = cache.try_get(key).unwrap();
        assert_eq!(again.passphrase.as_str(), "hunter2");
        assert_eq!(again.generation, first.generation);
    }

    #[test]
    fn test_clear_key_and_clear_all() {
        let cache = PassphraseCache::new();
        cache.insert(Path::new("/keys/a"), "a").unwrap();
        cache.insert(Path::new("/keys/b"), "b").unwrap();

        cache.clear_key(Path::new("/keys/a"));
        assert!(cache.try_get(Path::new("/keys/a")).is_none());
        assert!(cache.try_get(Path::new("/keys/b")).is_some());

        cache.clear();
        assert!(cache.try_get(Path::new("/keys/b")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cancelled_prompt_is_passphrase_required() {
        let cache = PassphraseCache::new();
        let err = cache.get_or_prompt(Path::new("/keys/c"), || None).err().unwrap();
        assert!(matches!(err, AppError::PassphraseRequired(_)));
        let err = cache.get_or_prompt(Path::new("/keys/c"), || secret("")).err().unwrap();
        assert!(matches!(err, AppError::PassphraseRequired(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_eviction_keeps_fresh_entry() {
        let cache = PassphraseCache::new();
        let key = Path::new("/keys/d");
        let old = cache.insert(key, "old").unwrap();
        let fresh = cache.insert(key, "fresh").unwrap();

        assert!(!cache.clear_generation(key, old));
        assert_eq!(cache.try_get(key).unwrap().passphrase.as_str(), "fresh");
        assert!(cache.clear_generation(key, fresh));
        assert!(cache.try_get(key).is_none());
    }

    #[test]
    fn test_concurrent_callers_prompt_once() {
        let cache = Arc::new(PassphraseCache::new());
        let prompts = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let prompts = prompts.clone();
                thread::spawn(move || {
                    cache
                        .get_or_prompt(Path::new("/keys/shared"), || {
                            prompts.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(20));
                            secret("s3cret")
                        })
                        .unwrap()
                        .passphrase
                        .to_string()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "s3cret");
        }
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_relative_paths_normalize_to_absolute() {
        let normalized = normalize_key_path(Path::new("does-not-exist/id_ed25519"));
        assert!(normalized.is_absolute());
    }
}
