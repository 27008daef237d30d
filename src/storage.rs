//! Persistence port for the active address.
//!
//! The orchestrator only sees [`AddressStore`]; the CLI plugs in a
//! [`FileStore`], tests use a [`MemoryStore`].

use crate::{Address, Error, Result};
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Well-known key the address record is stored under.
pub const STORAGE_KEY: &str = "mailbucket_address";

/// Get/set/clear access to the single persisted address record.
pub trait AddressStore: Send + Sync {
    /// Load the stored address.
    ///
    /// Returns `Ok(None)` when nothing is stored and
    /// [`Error::CorruptState`] when the record cannot be decoded.
    fn get(&self) -> Result<Option<Address>>;

    /// Overwrite the stored record.
    fn set(&self, address: &Address) -> Result<()>;

    /// Remove the stored record. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

fn decode(raw: &str) -> Result<Address> {
    serde_json::from_str(raw).map_err(Error::CorruptState)
}

/// Stores the record as a JSON file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/mailbucket/mailbucket_address.json`, falling back to the
    /// working directory when the platform has no data dir.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailbucket")
            .join(format!("{STORAGE_KEY}.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AddressStore for FileStore {
    fn get(&self) -> Result<Option<Address>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => decode(&raw).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, address: &Address) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(address)?;
        // Write then rename so a crash never leaves a half-written record.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        debug!("saved address to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store holding the raw JSON record.
#[derive(Debug, Default)]
pub struct MemoryStore {
    raw: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an arbitrary raw record, decodable or not.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    pub fn with_address(address: &Address) -> Result<Self> {
        Ok(Self::with_raw(serde_json::to_string(address)?))
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.raw.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AddressStore for MemoryStore {
    fn get(&self) -> Result<Option<Address>> {
        self.slot().as_deref().map(decode).transpose()
    }

    fn set(&self, address: &Address) -> Result<()> {
        *self.slot() = Some(serde_json::to_string(address)?);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}
