//! Signing identity: a single long-lived keypair per gateway, loaded once at
//! startup and never rotated at runtime (spec.md §3 "Identity").
//!
//! Grounded on the teacher's `tollgate::wallet::WalletSecrets` (mnemonic ->
//! seed -> derived nostr `Keys`, persisted to a project-local secrets file),
//! generalized from a per-platform `ProjectDirs` path into a plain file path
//! the daemon is told about on the CLI/config.

use crate::error::AppError;
use nostr::Keys;
use std::fs;
use std::path::{Path, PathBuf};

/// The gateway's signing identity. Cheap to clone (wraps an `Arc` inside
/// `nostr::Keys`).
#[derive(Clone)]
pub struct Identity {
    keys: Keys,
    path: PathBuf,
}

impl Identity {
    /// Load an existing identity file, or generate and persist a new keypair
    /// if none exists yet. This is the only place a keypair is minted; there
    /// is no runtime rotation path.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            let hex = fs::read_to_string(&path)
                .map_err(|e| AppError::Identity(format!("reading {}: {e}", path.display())))?;
            let keys = Keys::parse(hex.trim())
                .map_err(|e| AppError::Identity(format!("invalid secret key: {e}")))?;
            return Ok(Self { keys, path });
        }

        let keys = Keys::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, keys.secret_key().to_secret_hex())?;
        Ok(Self { keys, path })
    }

    /// An identity with a freshly generated keypair that is never written
    /// to disk. Used by tests and by `--fake-wallet` development mode,
    /// never by the production startup path.
    pub fn generate_ephemeral() -> Self {
        Self {
            keys: Keys::generate(),
            path: PathBuf::new(),
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn pubkey_hex(&self) -> String {
        self.keys.public_key().to_hex()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
