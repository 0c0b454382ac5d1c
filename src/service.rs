//! Service layer wiring the collaborators together.

use crate::codec::SecretCodec;
use crate::crypto::CryptoEngine;
use crate::error::{Result, VaultError};
use crate::handler::{HandlerConfig, ModelState, ResourceModelHandler};
use crate::metadata::MetadataCrypto;
use crate::models::{Account, Item, MetadataDocument, SecretDocument};
use crate::passphrase::PassphraseProvider;
use crate::policy::DefaultContentTypePolicy;
use crate::session_keys::SessionKeyCache;
use crate::store::{PersistenceStore, RemoteError, RemoteStore};
use crate::validation::FieldValidator;
use std::sync::Arc;
use tracing::{info, warn};

/// An item whose metadata could be decrypted.
#[derive(Debug, Clone)]
pub struct ListedItem {
    pub item: Item,
    pub metadata: MetadataDocument,
}

/// An item left out of a listing, with the reason.
#[derive(Debug)]
pub struct SkippedItem {
    pub id: String,
    pub error: VaultError,
}

#[derive(Debug, Default)]
pub struct Listing {
    pub items: Vec<ListedItem>,
    pub skipped: Vec<SkippedItem>,
}

/// Collaborators shared by every operation.
pub struct ServiceContext {
    pub account: Account,
    pub engine: Arc<dyn CryptoEngine>,
    pub store: Arc<dyn PersistenceStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub passphrases: Arc<dyn PassphraseProvider>,
    pub cache: Arc<SessionKeyCache>,
    pub policy: Arc<dyn DefaultContentTypePolicy>,
    pub validator: Arc<dyn FieldValidator>,
    pub config: HandlerConfig,
}

/// Entry point for creating, updating, listing and revealing items.
pub struct ResourceService {
    ctx: ServiceContext,
    codec: Arc<SecretCodec>,
    metadata: Arc<MetadataCrypto>,
}

impl ResourceService {
    pub fn new(ctx: ServiceContext) -> Self {
        let codec = Arc::new(SecretCodec::new(
            Arc::clone(&ctx.engine),
            Arc::clone(&ctx.passphrases),
        ));
        let metadata = Arc::new(MetadataCrypto::new(
            ctx.account.clone(),
            Arc::clone(&ctx.engine),
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.passphrases),
            Arc::clone(&ctx.cache),
        ));
        Self {
            ctx,
            codec,
            metadata,
        }
    }

    pub fn account(&self) -> &Account {
        &self.ctx.account
    }

    pub fn cache(&self) -> &Arc<SessionKeyCache> {
        &self.ctx.cache
    }

    pub fn metadata_crypto(&self) -> &MetadataCrypto {
        &self.metadata
    }

    /// A fresh handler for one create or edit session.
    pub fn handler(&self) -> ResourceModelHandler {
        ResourceModelHandler::new(
            self.ctx.account.clone(),
            Arc::clone(&self.ctx.policy),
            Arc::clone(&self.ctx.validator),
            Arc::clone(&self.codec),
            Arc::clone(&self.metadata),
            Arc::clone(&self.ctx.store),
            self.ctx.config.clone(),
        )
    }

    /// Submit a handler in the creating state and store the result.
    pub async fn create(&self, handler: &mut ResourceModelHandler) -> Result<Item> {
        if handler.state() != ModelState::Creating {
            return Err(VaultError::InvalidState {
                expected: "creating",
                actual: handler.state().name(),
            });
        }
        let payload = handler.submit().await?;
        let item = match self.ctx.remote.create_item(&payload).await {
            Ok(item) => item,
            Err(err) => return Err(Self::rejected(handler, err)),
        };
        self.ctx.store.put(item.clone()).await?;
        info!(id = %item.id, resource_type = %item.resource_type, "item created");
        Ok(item)
    }

    /// Submit a handler in the editing state and store the result.
    pub async fn update(&self, handler: &mut ResourceModelHandler) -> Result<Item> {
        if handler.state() != ModelState::Editing {
            return Err(VaultError::InvalidState {
                expected: "editing",
                actual: handler.state().name(),
            });
        }
        let id = handler
            .item_id()
            .map(str::to_string)
            .ok_or_else(|| VaultError::Other("item under edit has no id".to_string()))?;
        let payload = handler.submit().await?;
        let item = match self.ctx.remote.update_item(&id, &payload).await {
            Ok(item) => item,
            Err(err) => return Err(Self::rejected(handler, err)),
        };
        self.ctx.cache.invalidate(&id);
        self.ctx.store.put(item.clone()).await?;
        info!(id = %item.id, resource_type = %item.resource_type, "item updated");
        Ok(item)
    }

    fn rejected(handler: &mut ResourceModelHandler, err: RemoteError) -> VaultError {
        let err = VaultError::from(err);
        warn!(error = %err, "remote rejected submit");
        if let Err(state_err) = handler.reopen() {
            warn!(error = %state_err, "handler not reopened");
        }
        err
    }

    /// Every stored item with its metadata. Items that fail are skipped.
    pub async fn list(&self) -> Result<Listing> {
        let items = self.ctx.store.list().await?;
        let mut listing = Listing::default();
        for (item, result) in self.metadata.decrypt_all(&items).await {
            match result.and_then(|metadata| item.content_type().map(|_| metadata)) {
                Ok(metadata) => listing.items.push(ListedItem {
                    item: item.clone(),
                    metadata,
                }),
                Err(error) => {
                    warn!(id = %item.id, error = %error, "skipping item");
                    listing.skipped.push(SkippedItem {
                        id: item.id.clone(),
                        error,
                    });
                }
            }
        }
        Ok(listing)
    }

    /// Decrypt the acting user's copy of an item's secret.
    pub async fn reveal_secret(&self, id: &str) -> Result<SecretDocument> {
        let item = self
            .ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| VaultError::ItemNotFound(id.to_string()))?;
        let content_type = item.content_type()?;
        let user_id = &self.ctx.account.user_id;
        let entry = item
            .secret_for(user_id)
            .ok_or_else(|| VaultError::SecretNotShared {
                item_id: item.id.clone(),
                user_id: user_id.clone(),
            })?;
        let private_key = self
            .ctx
            .store
            .private_key(user_id)
            .await?
            .ok_or_else(|| VaultError::PrivateKeyNotFound(user_id.clone()))?;
        match self.codec.open(&entry.data, content_type, &private_key).await {
            Err(VaultError::Crypto(_)) | Err(VaultError::Json(_)) => {
                Err(VaultError::SecretDecryption(item.id.clone()))
            }
            other => other,
        }
    }
}
