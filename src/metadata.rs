//! Metadata encryption and decryption.
//!
//! Metadata is sealed either with the acting user's personal key pair or with
//! a shared metadata key distributed to every user of a shared vault.
//! Decryption first tries a cached session key and only falls back to the
//! asymmetric path when there is none or it no longer works.

use crate::crypto::CryptoEngine;
use crate::error::{Result, VaultError};
use crate::models::{Account, Item, MetadataDocument, MetadataKeyType};
use crate::passphrase::{Passphrase, PassphraseProvider};
use crate::session_keys::{SessionKeyCache, SessionKeyIdentifier};
use crate::store::PersistenceStore;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Private key and passphrase used to open one item's metadata.
struct KeyMaterial {
    private_key: String,
    passphrase: Zeroizing<Vec<u8>>,
}

pub struct MetadataCrypto {
    account: Account,
    engine: Arc<dyn CryptoEngine>,
    store: Arc<dyn PersistenceStore>,
    passphrases: Arc<dyn PassphraseProvider>,
    cache: Arc<SessionKeyCache>,
}

impl MetadataCrypto {
    pub fn new(
        account: Account,
        engine: Arc<dyn CryptoEngine>,
        store: Arc<dyn PersistenceStore>,
        passphrases: Arc<dyn PassphraseProvider>,
        cache: Arc<SessionKeyCache>,
    ) -> Self {
        Self {
            account,
            engine,
            store,
            passphrases,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<SessionKeyCache> {
        &self.cache
    }

    fn passphrase(&self) -> Result<Passphrase> {
        self.passphrases
            .get()
            .ok_or(VaultError::PassphraseNotPresent)
    }

    async fn user_private_key(&self) -> Result<String> {
        self.store
            .private_key(&self.account.user_id)
            .await?
            .ok_or_else(|| VaultError::PrivateKeyNotFound(self.account.user_id.clone()))
    }

    async fn key_material(&self, item: &Item) -> Result<KeyMaterial> {
        match item.metadata_key_type {
            MetadataKeyType::Shared => {
                let key_id = item
                    .metadata_key_id
                    .as_deref()
                    .ok_or_else(|| VaultError::MetadataKeyNotFound(String::new()))?;
                let keys = self.store.list_shared_keys().await?;
                let record = keys
                    .iter()
                    .find(|k| k.id == key_id)
                    .and_then(|k| k.private_keys.first())
                    .ok_or_else(|| VaultError::MetadataKeyNotFound(key_id.to_string()))?;
                Ok(KeyMaterial {
                    private_key: record.key_material.clone(),
                    passphrase: Zeroizing::new(record.passphrase.as_bytes().to_vec()),
                })
            }
            MetadataKeyType::Personal => {
                let private_key = self.user_private_key().await?;
                let passphrase = self.passphrase()?;
                Ok(KeyMaterial {
                    private_key,
                    passphrase: Zeroizing::new(passphrase.as_bytes().to_vec()),
                })
            }
        }
    }

    /// Decrypt an item's metadata.
    pub async fn decrypt(&self, item: &Item) -> Result<MetadataDocument> {
        let material = self.key_material(item).await?;
        let id = SessionKeyIdentifier::resource(item.id.clone());

        if let Some(session_key) = self.cache.get(&id) {
            match self
                .engine
                .decrypt_with_session_key(&session_key, &item.metadata)
                .await
            {
                Ok(json) => {
                    debug!(id = %item.id, "metadata opened with cached session key");
                    return MetadataDocument::from_json(&json);
                }
                Err(err) => {
                    debug!(id = %item.id, error = %err, "cached session key rejected");
                    self.cache.invalidate_key(&id);
                }
            }
        }

        let session_key = self
            .engine
            .derive_session_key(&item.metadata, &material.private_key, &material.passphrase)
            .await
            .map_err(|err| {
                warn!(id = %item.id, error = %err, "session key derivation failed");
                VaultError::SessionKeyDerivation {
                    kind: "resource".to_string(),
                    id: item.id.clone(),
                }
            })?;
        self.cache.put(id, session_key.clone(), item.modified);

        let json = self
            .engine
            .decrypt_with_session_key(&session_key, &item.metadata)
            .await
            .map_err(|err| {
                warn!(id = %item.id, error = %err, "metadata decryption failed");
                VaultError::MetadataDecryption(item.id.clone())
            })?;
        MetadataDocument::from_json(&json)
    }

    /// Decrypt many items concurrently; each result stands on its own.
    pub async fn decrypt_all<'a>(
        &self,
        items: &'a [Item],
    ) -> Vec<(&'a Item, Result<MetadataDocument>)> {
        let results = join_all(items.iter().map(|item| self.decrypt(item))).await;
        items.iter().zip(results).collect()
    }

    /// Seal a metadata document with the selected key.
    ///
    /// Shared metadata is encrypted to the shared key's public half, personal
    /// metadata to the acting user. Both are signed by the acting user.
    pub async fn encrypt(
        &self,
        key_type: MetadataKeyType,
        key_id: Option<&str>,
        json: &str,
    ) -> Result<String> {
        let recipient_public_key = match key_type {
            MetadataKeyType::Shared => {
                let key_id = key_id.ok_or_else(|| VaultError::MetadataKeyNotFound(String::new()))?;
                self.store
                    .list_shared_keys()
                    .await?
                    .into_iter()
                    .find(|k| k.id == key_id)
                    .map(|k| k.public_key.clone())
                    .ok_or_else(|| VaultError::MetadataKeyNotFound(key_id.to_string()))?
            }
            MetadataKeyType::Personal => self
                .store
                .public_key(&self.account.user_id)
                .await?
                .ok_or_else(|| VaultError::RecipientKeyMissing(self.account.user_id.clone()))?,
        };

        let private_key = self.user_private_key().await?;
        let passphrase = self.passphrase()?;
        self.engine
            .sign_encrypt(json, &recipient_public_key, &private_key, passphrase.as_bytes())
            .await
            .map_err(VaultError::MetadataSeal)
    }
}
