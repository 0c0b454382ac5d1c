//! Persistence and remote collaborators.
//!
//! [`PersistenceStore`] is the local key/row store; [`RemoteStore`] is the
//! server the core submits sealed items to. [`FileStore`] keeps everything in
//! a single JSON document on disk and [`LocalRemote`] plays the server role
//! on top of it, so the CLI works without a network.

use crate::error::{Result, VaultError};
use crate::models::{Item, ParsedMetadataKey, SealedPayload};
use crate::session_keys::SessionKeysBundle;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Typed failure of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("MFA required ({})", .providers.join(", "))]
    MfaRequired { providers: Vec<String> },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Rejected by server: {0}")]
    Validation(String),
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },
}

/// Local key/row store.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Item>>;

    async fn put(&self, item: Item) -> Result<()>;

    async fn list(&self) -> Result<Vec<Item>>;

    /// Shared metadata keys held by the signed-in user.
    async fn list_shared_keys(&self) -> Result<Vec<ParsedMetadataKey>>;

    /// Locked private key of `user_id`, if stored locally.
    async fn private_key(&self, user_id: &str) -> Result<Option<String>>;

    async fn public_key(&self, user_id: &str) -> Result<Option<String>>;
}

/// Server side of item submission.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_item(&self, payload: &SealedPayload) -> std::result::Result<Item, RemoteError>;

    async fn update_item(
        &self,
        id: &str,
        payload: &SealedPayload,
    ) -> std::result::Result<Item, RemoteError>;
}

/// A user known to the store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub public_key: String,
    /// Locked private key; only present for local accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("user_id", &self.user_id)
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

const STORE_FORMAT_VERSION: u32 = 1;

/// On-disk layout of a [`FileStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDocument {
    pub version: u32,
    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
    #[serde(default)]
    pub items: BTreeMap<String, Item>,
    #[serde(default)]
    pub metadata_keys: Vec<ParsedMetadataKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_keys: Option<SessionKeysBundle>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            users: BTreeMap::new(),
            items: BTreeMap::new(),
            metadata_keys: Vec::new(),
            session_keys: None,
        }
    }
}

/// JSON file backed [`PersistenceStore`].
pub struct FileStore {
    path: PathBuf,
    state: RwLock<StoreDocument>,
}

impl FileStore {
    /// Create a new, empty store file. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(VaultError::Other(format!(
                "Store already exists: {}",
                path.display()
            )));
        }
        let doc = StoreDocument::default();
        write_document(path, &doc)?;
        info!(path = %path.display(), "created store");
        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(doc),
        })
    }

    /// Load an existing store file.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VaultError::StoreNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(VaultError::Io)?;
        let doc: StoreDocument = serde_json::from_str(&content)?;
        if doc.version > STORE_FORMAT_VERSION {
            return Err(VaultError::Other(format!(
                "Store format version {} is newer than supported {}",
                doc.version, STORE_FORMAT_VERSION
            )));
        }
        debug!(path = %path.display(), items = doc.items.len(), "loaded store");
        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the store file next to itself with a timestamp suffix.
    pub fn create_backup(&self) -> Result<PathBuf> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| VaultError::Other("Invalid file name".to_string()))?
            .to_string_lossy();
        let backup_path = self
            .path
            .with_file_name(format!("{file_name}.backup.{timestamp}"));

        if backup_path.exists() {
            return Err(VaultError::Other(format!(
                "Backup {} already exists",
                backup_path.display()
            )));
        }

        std::fs::copy(&self.path, &backup_path).map_err(VaultError::Io)?;
        restrict_permissions(&backup_path)?;
        info!(backup = %backup_path.display(), "created backup");
        Ok(backup_path)
    }

    pub async fn add_user(&self, user: UserRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.users.insert(user.user_id.clone(), user);
        write_document(&self.path, &state)
    }

    pub async fn users(&self) -> Vec<UserRecord> {
        self.state.read().await.users.values().cloned().collect()
    }

    pub async fn add_metadata_key(&self, key: ParsedMetadataKey) -> Result<()> {
        let mut state = self.state.write().await;
        state.metadata_keys.retain(|k| k.id != key.id);
        state.metadata_keys.push(key);
        write_document(&self.path, &state)
    }

    pub async fn session_keys(&self) -> Option<SessionKeysBundle> {
        self.state.read().await.session_keys.clone()
    }

    pub async fn save_session_keys(&self, bundle: SessionKeysBundle) -> Result<()> {
        let mut state = self.state.write().await;
        state.session_keys = Some(bundle);
        write_document(&self.path, &state)
    }
}

#[async_trait]
impl PersistenceStore for FileStore {
    async fn get(&self, id: &str) -> Result<Option<Item>> {
        Ok(self.state.read().await.items.get(id).cloned())
    }

    async fn put(&self, item: Item) -> Result<()> {
        let mut state = self.state.write().await;
        debug!(id = %item.id, resource_type = %item.resource_type, "storing item");
        state.items.insert(item.id.clone(), item);
        write_document(&self.path, &state)
    }

    async fn list(&self) -> Result<Vec<Item>> {
        Ok(self.state.read().await.items.values().cloned().collect())
    }

    async fn list_shared_keys(&self) -> Result<Vec<ParsedMetadataKey>> {
        Ok(self.state.read().await.metadata_keys.clone())
    }

    async fn private_key(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .get(user_id)
            .and_then(|u| u.private_key.clone()))
    }

    async fn public_key(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .get(user_id)
            .map(|u| u.public_key.clone()))
    }
}

fn write_document(path: &Path, doc: &StoreDocument) -> Result<()> {
    let content = serde_json::to_string_pretty(doc)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, content).map_err(VaultError::Io)?;
    restrict_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path).map_err(VaultError::Io)?;
    Ok(())
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(VaultError::Io)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// [`RemoteStore`] that acts as the server for a local store: it assigns
/// ids and timestamps but leaves persisting to the caller.
pub struct LocalRemote {
    store: Arc<dyn PersistenceStore>,
}

impl LocalRemote {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }
}

fn item_from_payload(id: String, payload: &SealedPayload, created: chrono::DateTime<Utc>) -> Item {
    Item {
        id,
        resource_type: payload.resource_type.clone(),
        folder_parent_id: payload.folder_parent_id.clone(),
        metadata: payload.metadata.clone(),
        metadata_key_id: payload.metadata_key_id.clone(),
        metadata_key_type: payload.metadata_key_type,
        secrets: payload.secrets.clone(),
        permissions: payload.secrets.iter().map(|s| s.user_id.clone()).collect(),
        created,
        modified: Utc::now(),
        expiry: payload.expiry,
    }
}

#[async_trait]
impl RemoteStore for LocalRemote {
    async fn create_item(&self, payload: &SealedPayload) -> std::result::Result<Item, RemoteError> {
        if payload.secrets.is_empty() {
            return Err(RemoteError::Validation("item has no secrets".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        Ok(item_from_payload(id, payload, Utc::now()))
    }

    async fn update_item(
        &self,
        id: &str,
        payload: &SealedPayload,
    ) -> std::result::Result<Item, RemoteError> {
        let existing = self
            .store
            .get(id)
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?
            .ok_or_else(|| RemoteError::Validation(format!("unknown item {id}")))?;
        Ok(item_from_payload(id.to_string(), payload, existing.created))
    }
}
