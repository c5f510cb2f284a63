//! Persistent key/value storage for session tokens
//!
//! The client only ever touches two keys, [`ACCESS_TOKEN_KEY`] and
//! [`REFRESH_TOKEN_KEY`]. Platforms plug in their secure storage by
//! implementing [`TokenStore`].

use crate::error::{ClientError, Result};
use crate::types::Credentials;
use async_trait::async_trait;
use papaya::HashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read both tokens. `None` when no access token is stored.
pub async fn load_credentials(store: &dyn TokenStore) -> Result<Option<Credentials>> {
    let Some(access_token) = store.get(ACCESS_TOKEN_KEY).await? else {
        return Ok(None);
    };
    let refresh_token = store.get(REFRESH_TOKEN_KEY).await?;
    Ok(Some(Credentials {
        access_token,
        refresh_token,
    }))
}

/// Write the access token, and the refresh token when one is given.
pub async fn save_credentials(
    store: &dyn TokenStore,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<()> {
    store.set(ACCESS_TOKEN_KEY, access_token).await?;
    if let Some(refresh_token) = refresh_token {
        store.set(REFRESH_TOKEN_KEY, refresh_token).await?;
    }
    Ok(())
}

pub async fn clear_credentials(store: &dyn TokenStore) -> Result<()> {
    store.remove(ACCESS_TOKEN_KEY).await?;
    store.remove(REFRESH_TOKEN_KEY).await
}

/// Thread-safe in-memory store using Papaya HashMap
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    entries: Arc<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.pin().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.pin().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.pin().remove(key);
        Ok(())
    }
}

/// JSON file on disk, rewritten atomically on every change
///
/// Writes within one process are serialized, so concurrent saves land in
/// call order instead of interleaving.
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(storage_error("read", &self.path, e)),
        }
    }

    async fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create directory for", &self.path, e))?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)
            .await
            .map_err(|e| storage_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_error("replace", &self.path, e))
    }
}

fn storage_error(action: &str, path: &Path, err: std::io::Error) -> ClientError {
    ClientError::Storage(format!("failed to {action} {}: {err}", path.display()))
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove(key).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }
}
