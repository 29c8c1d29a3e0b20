//! Persistence for the paired-device identity.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

/// The local device and, once paired, the account it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub created_at: u64,
}

impl DeviceIdentity {
    pub fn generate() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            account: None,
            created_at: now_ms(),
        }
    }

    pub fn is_paired(&self) -> bool {
        self.account.is_some()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the device identity, creating and persisting a fresh one if none exists.
    async fn get_or_create(&self) -> Result<DeviceIdentity>;

    async fn get(&self) -> Result<Option<DeviceIdentity>>;

    async fn save(&self, identity: &DeviceIdentity) -> Result<()>;

    /// Remove the identity. Deleting a missing identity succeeds.
    async fn delete(&self) -> Result<()>;

    /// Release the underlying handle on shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// JSON file store, readable only by the owner on Unix.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, identity: &DeviceIdentity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(identity)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_or_create(&self) -> Result<DeviceIdentity> {
        if let Some(identity) = self.get().await? {
            return Ok(identity);
        }
        let identity = DeviceIdentity::generate();
        self.write(&identity).await?;
        debug!(path = %self.path.display(), device_id = %identity.device_id, "created device identity");
        Ok(identity)
    }

    async fn get(&self) -> Result<Option<DeviceIdentity>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => {
                let identity = serde_json::from_str(&data)
                    .with_context(|| format!("corrupt device identity at {}", self.path.display()))?;
                Ok(Some(identity))
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    async fn save(&self, identity: &DeviceIdentity) -> Result<()> {
        self.write(identity).await
    }

    async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "deleted device identity");
                Ok(())
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", self.path.display())),
        }
    }
}

/// In-memory store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    identity: Mutex<Option<DeviceIdentity>>,
    closed: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds a device paired to `account`.
    pub fn paired(account: &str) -> Self {
        let mut identity = DeviceIdentity::generate();
        identity.account = Some(account.to_string());
        Self {
            identity: Mutex::new(Some(identity)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> Option<DeviceIdentity> {
        self.identity.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_or_create(&self) -> Result<DeviceIdentity> {
        let mut slot = self.identity.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.get_or_insert_with(DeviceIdentity::generate).clone())
    }

    async fn get(&self) -> Result<Option<DeviceIdentity>> {
        Ok(self.snapshot())
    }

    async fn save(&self, identity: &DeviceIdentity) -> Result<()> {
        *self.identity.lock().unwrap_or_else(|e| e.into_inner()) = Some(identity.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.identity.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_creates_once_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("whatsapp").join("device.json"));

        assert!(store.get().await.unwrap().is_none());
        let created = store.get_or_create().await.unwrap();
        assert!(!created.is_paired());
        assert_eq!(store.get_or_create().await.unwrap(), created);
    }

    #[tokio::test]
    async fn file_store_persists_pairing_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        let store = FileCredentialStore::new(path.clone());

        let mut identity = store.get_or_create().await.unwrap();
        identity.account = Some("56911112222".into());
        store.save(&identity).await.unwrap();

        let reopened = FileCredentialStore::new(path);
        assert_eq!(
            reopened.get().await.unwrap().unwrap().account.as_deref(),
            Some("56911112222")
        );

        reopened.delete().await.unwrap();
        assert!(reopened.get().await.unwrap().is_none());
        // Deleting twice is fine.
        reopened.delete().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("device.json"));
        store.get_or_create().await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(FileCredentialStore::new(path).get().await.is_err());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryCredentialStore::paired("123");
        assert!(store.get().await.unwrap().unwrap().is_paired());
        store.delete().await.unwrap();
        assert!(store.get().await.unwrap().is_none());
        store.close().await.unwrap();
        assert!(store.is_closed());
    }
}
