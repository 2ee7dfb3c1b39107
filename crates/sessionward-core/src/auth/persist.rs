//! Durable storage for the session record.
//!
//! The store reads the record once at startup and rewrites it on every
//! mutation. Two backends: a JSON file in the cache directory and the OS
//! keychain.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyring::Entry;

use super::PersistedSession;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Keychain service and entry name
const SERVICE_NAME: &str = "sessionward";
const ENTRY_NAME: &str = "session";

pub trait SessionPersistence: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>>;
    fn save(&self, record: &PersistedSession) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// File backend
// ============================================================================

pub struct FileSessionPersistence {
    cache_dir: PathBuf,
}

impl FileSessionPersistence {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl SessionPersistence for FileSessionPersistence {
    fn load(&self) -> Result<Option<PersistedSession>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let record: PersistedSession =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(record))
    }

    fn save(&self, record: &PersistedSession) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(record)?;
        write_private(&path, &contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

// ============================================================================
// Keychain backend
// ============================================================================

pub struct KeyringSessionPersistence {
    service: String,
}

impl KeyringSessionPersistence {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, ENTRY_NAME).context("Failed to create keyring entry")
    }
}

impl Default for KeyringSessionPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPersistence for KeyringSessionPersistence {
    fn load(&self) -> Result<Option<PersistedSession>> {
        match self.entry()?.get_password() {
            Ok(contents) => {
                let record = serde_json::from_str(&contents)
                    .context("Failed to parse session from keychain")?;
                Ok(Some(record))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn save(&self, record: &PersistedSession) -> Result<()> {
        let contents = serde_json::to_string(record)?;
        self.entry()?
            .set_password(&contents)
            .context("Failed to store session in keychain")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}
