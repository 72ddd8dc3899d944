//! Credential vault.
//!
//! Per-account credentials are serialized to JSON, sealed with AES-256-GCM
//! under a fresh 96-bit nonce, and stored base64-encoded in a single JSON
//! file (mode 0600 on Unix). The key comes from a 64-hex-char environment
//! variable, is read once at startup, and is wiped when the vault drops.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use feedcaster_core::error::{FeedcasterError, Result};
use feedcaster_core::traits::CredentialSource;
use feedcaster_core::types::Credentials;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const NONCE_LEN: usize = 12;

/// AES-256 key material. Never printed, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; 32]);

impl VaultKey {
    /// Parse a 64-character hex key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(hex_key.trim())
                .map_err(|e| FeedcasterError::Security(format!("Vault key is not hex: {e}")))?,
        );
        if bytes.len() != 32 {
            return Err(FeedcasterError::Security(format!(
                "Vault key must be 64 hex characters (32 bytes), got {} bytes",
                bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Read the key from an environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        let value = Zeroizing::new(std::env::var(var).map_err(|_| {
            FeedcasterError::Security(format!("Vault key env var {var} is not set"))
        })?);
        Self::from_hex(&value)
    }

    /// Fresh random key, hex-encoded, for `vault gen-key`.
    pub fn generate_hex() -> String {
        let mut key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut key[..]);
        hex::encode(&key[..])
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| FeedcasterError::Security(format!("Failed to create cipher: {e}")))
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

/// Encrypted credential storage backed by a JSON file.
pub struct CredentialVault {
    path: PathBuf,
    key: VaultKey,
    /// account id -> base64(nonce || ciphertext || tag)
    entries: RwLock<BTreeMap<String, String>>,
}

impl CredentialVault {
    /// Open the vault at `path`. A missing file is an empty vault.
    pub fn open(path: &Path, key: VaultKey) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| FeedcasterError::Security(format!("Failed to parse vault: {e}")))?
        } else {
            BTreeMap::new()
        };
        tracing::debug!("🔐 Vault opened: {} entries from {}", entries.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            key,
            entries: RwLock::new(entries),
        })
    }

    /// Encrypt and store credentials for an account (in memory until `save`).
    pub fn set(&self, account_id: &str, credentials: &Credentials) -> Result<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(credentials)?);
        let sealed = seal(&self.key, &plaintext)?;
        self.write_entries()?.insert(account_id.to_string(), sealed);
        tracing::info!("🔐 Credentials stored for account '{account_id}'");
        Ok(())
    }

    /// Remove an account's credentials. Returns whether anything was removed.
    pub fn remove(&self, account_id: &str) -> Result<bool> {
        Ok(self.write_entries()?.remove(account_id).is_some())
    }

    /// Account ids with stored credentials. Values are never exposed.
    pub fn list(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Persist to disk with restrictive permissions.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = {
            let entries = self
                .entries
                .read()
                .map_err(|_| FeedcasterError::Security("Vault lock poisoned".into()))?;
            serde_json::to_string_pretty(&*entries)?
        };

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)?;
            file.write_all(content.as_bytes())?;
        }

        #[cfg(not(unix))]
        std::fs::write(&self.path, content)?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_entries(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .write()
            .map_err(|_| FeedcasterError::Security("Vault lock poisoned".into()))
    }
}

impl CredentialSource for CredentialVault {
    fn get(&self, account_id: &str) -> Result<Credentials> {
        let sealed = {
            let entries = self
                .entries
                .read()
                .map_err(|_| FeedcasterError::Security("Vault lock poisoned".into()))?;
            entries.get(account_id).cloned().ok_or_else(|| {
                FeedcasterError::Credential(format!("No credentials for account '{account_id}'"))
            })?
        };
        let plaintext = open_sealed(&self.key, &sealed).map_err(|e| {
            FeedcasterError::Credential(format!("Cannot decrypt credentials for '{account_id}': {e}"))
        })?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            FeedcasterError::Credential(format!("Corrupt credentials for '{account_id}': {e}"))
        })
    }
}

fn seal(key: &VaultKey, plaintext: &[u8]) -> Result<String> {
    let cipher = key.cipher()?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| FeedcasterError::Security(format!("Encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

fn open_sealed(key: &VaultKey, sealed: &str) -> Result<Zeroizing<Vec<u8>>> {
    let blob = BASE64
        .decode(sealed.trim())
        .map_err(|e| FeedcasterError::Security(format!("Base64 decode failed: {e}")))?;
    if blob.len() <= NONCE_LEN {
        return Err(FeedcasterError::Security("Sealed entry too short".into()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let plaintext = key
        .cipher()?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| FeedcasterError::Security("Authentication failed".into()))?;
    Ok(Zeroizing::new(plaintext))
}
