//! NVS (Non-Volatile Storage) adapter.
//!
//! [`NvsStorage`] implements [`StoragePort`]: ESP-IDF NVS on device, an
//! in-memory map on host.  [`NvsCredentialStore`] layers the
//! [`CredentialStore`] port on top of any `StoragePort` by persisting a
//! versioned postcard blob in the `prov` namespace.
//!
//! On device the `prov` namespace sits on the default NVS partition, which
//! is encrypted when `CONFIG_NVS_ENCRYPTION` is set.  `EspNvs::set_blob`
//! commits before returning, so a blob is either fully written or absent.
//! The host backend keeps everything in memory.

use log::{info, warn};

use crate::app::ports::{CredentialStore, StorageError, StoragePort, StoredCredentials};

#[cfg(not(target_os = "espidf"))]
use std::collections::BTreeMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::{ESP_ERR_NVS_NOT_ENOUGH_SPACE, ESP_ERR_NVS_NOT_FOUND, EspError};

pub const CRED_NAMESPACE: &str = "prov";
const CRED_KEY: &str = "creds";
/// Leading byte of the stored blob; bump when `StoredCredentials` changes.
const BLOB_VERSION: u8 = 1;
const MAX_BLOB_SIZE: usize = 256;

// ═══════════════════════════════════════════════════════════════════════════
//  Key-value backend
// ═══════════════════════════════════════════════════════════════════════════

pub struct NvsStorage {
    #[cfg(target_os = "espidf")]
    partition: EspDefaultNvsPartition,
    /// `(namespace, key) -> blob`
    #[cfg(not(target_os = "espidf"))]
    entries: BTreeMap<(String, String), Vec<u8>>,
}

impl NvsStorage {
    /// Take the default NVS partition.  ESP-IDF erases and re-initialises
    /// it when the layout is full or from an older IDF.
    #[cfg(target_os = "espidf")]
    pub fn new() -> Result<Self, StorageError> {
        let partition = EspDefaultNvsPartition::take().map_err(|e| {
            warn!("NvsStorage: default partition unavailable ({e})");
            StorageError::IoError
        })?;
        info!("NvsStorage: default NVS partition ready");
        Ok(Self { partition })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Result<Self, StorageError> {
        info!("NvsStorage: in-memory backend");
        Ok(Self {
            entries: BTreeMap::new(),
        })
    }

    #[cfg(target_os = "espidf")]
    fn open(&self, namespace: &str, read_write: bool) -> Result<EspNvs<NvsDefault>, EspError> {
        EspNvs::new(self.partition.clone(), namespace, read_write)
    }

    #[cfg(not(target_os = "espidf"))]
    fn entry_key(namespace: &str, key: &str) -> (String, String) {
        (namespace.to_owned(), key.to_owned())
    }
}

#[cfg(target_os = "espidf")]
fn map_esp_error(op: &str, namespace: &str, key: &str, e: EspError) -> StorageError {
    match e.code() {
        code if code == ESP_ERR_NVS_NOT_FOUND as i32 => StorageError::NotFound,
        code if code == ESP_ERR_NVS_NOT_ENOUGH_SPACE as i32 => StorageError::Full,
        _ => {
            warn!("NvsStorage: {op} {namespace}/{key} failed ({e})");
            StorageError::IoError
        }
    }
}

#[cfg(target_os = "espidf")]
impl StoragePort for NvsStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let nvs = self
            .open(namespace, false)
            .map_err(|e| map_esp_error("open", namespace, key, e))?;
        match nvs.get_blob(key, buf) {
            Ok(Some(blob)) => Ok(blob.len()),
            Ok(None) => Err(StorageError::NotFound),
            Err(e) => Err(map_esp_error("read", namespace, key, e)),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut nvs = self
            .open(namespace, true)
            .map_err(|e| map_esp_error("open", namespace, key, e))?;
        nvs.set_blob(key, data)
            .map_err(|e| map_esp_error("write", namespace, key, e))
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let mut nvs = match self.open(namespace, true) {
            Ok(nvs) => nvs,
            // Namespace never written: nothing to delete.
            Err(e) if e.code() == ESP_ERR_NVS_NOT_FOUND as i32 => return Ok(()),
            Err(e) => return Err(map_esp_error("open", namespace, key, e)),
        };
        nvs.remove(key)
            .map(|_| ())
            .map_err(|e| map_esp_error("delete", namespace, key, e))
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.open(namespace, false)
            .and_then(|nvs| nvs.contains(key))
            .unwrap_or(false)
    }
}

#[cfg(not(target_os = "espidf"))]
impl StoragePort for NvsStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let blob = self
            .entries
            .get(&Self::entry_key(namespace, key))
            .ok_or(StorageError::NotFound)?;
        // Same contract as NVS: the caller's buffer must hold the whole blob.
        let dst = buf.get_mut(..blob.len()).ok_or(StorageError::IoError)?;
        dst.copy_from_slice(blob);
        Ok(blob.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.entries
            .insert(Self::entry_key(namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.entries.remove(&Self::entry_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.entries.contains_key(&Self::entry_key(namespace, key))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Credential store
// ═══════════════════════════════════════════════════════════════════════════

/// [`CredentialStore`] over any [`StoragePort`].
pub struct NvsCredentialStore<S: StoragePort> {
    storage: S,
}

impl<S: StoragePort> NvsCredentialStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }
}

impl<S: StoragePort> CredentialStore for NvsCredentialStore<S> {
    fn save(&mut self, credentials: &StoredCredentials) -> Result<(), StorageError> {
        let mut blob = postcard::to_allocvec(credentials).map_err(|_| StorageError::IoError)?;
        blob.insert(0, BLOB_VERSION);
        if blob.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }
        self.storage.write(CRED_NAMESPACE, CRED_KEY, &blob)?;
        info!(
            "NvsCredentialStore: saved credentials for '{}' ({} bytes)",
            credentials.ssid,
            blob.len()
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<StoredCredentials>, StorageError> {
        let mut buf = [0u8; MAX_BLOB_SIZE];
        let len = match self.storage.read(CRED_NAMESPACE, CRED_KEY, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some((&version, body)) = buf[..len].split_first() else {
            return Err(StorageError::Corrupted);
        };
        if version != BLOB_VERSION {
            warn!("NvsCredentialStore: unknown blob version {}", version);
            return Err(StorageError::Corrupted);
        }
        postcard::from_bytes(body)
            .map(Some)
            .map_err(|_| StorageError::Corrupted)
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.storage.delete(CRED_NAMESPACE, CRED_KEY)?;
        info!("NvsCredentialStore: credentials cleared");
        Ok(())
    }
}
