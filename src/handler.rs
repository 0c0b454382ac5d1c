//! Create and edit flow for a single item.
//!
//! A [`ResourceModelHandler`] owns the in-memory secret and metadata documents
//! of the item being edited. Every shape-changing edit goes through the
//! transition graph, and documents are only replaced once an edit has been
//! accepted.

use crate::codec::SecretCodec;
use crate::content_type::{ContentType, LeadingContentType, SecretField};
use crate::error::{Result, VaultError};
use crate::graph::{merge_action, TransitionGraph, UpdateAction};
use crate::metadata::MetadataCrypto;
use crate::models::{
    Account, FieldLookup, MetadataDocument, MetadataKeyType, Recipient, SealedPayload,
    SecretDocument,
};
use crate::policy::{DefaultContentTypePolicy, TotpDefaults};
use crate::store::PersistenceStore;
use crate::validation::{
    FieldValidator, RequiredField, FIELD_NAME, FIELD_PASSWORD, FIELD_TOTP_SECRET, FIELD_URI,
    FIELD_USERNAME,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Handler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Name given to items submitted with a blank name.
    #[serde(default)]
    pub default_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Uninitialized,
    Creating,
    Editing,
    ReadyToSubmit,
}

impl ModelState {
    pub fn name(&self) -> &'static str {
        match self {
            ModelState::Uninitialized => "uninitialized",
            ModelState::Creating => "creating",
            ModelState::Editing => "editing",
            ModelState::ReadyToSubmit => "ready to submit",
        }
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Folder a new item is created in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentFolder {
    pub id: String,
    /// Whether other users have access to the folder.
    pub shared: bool,
}

/// What the edit form may offer for the current shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub content_type: ContentType,
    /// Secrets that can be added, moving the item to a larger shape.
    pub addable_secrets: Vec<SecretField>,
    /// Secrets that can be removed, moving the item to a smaller shape.
    pub removable_secrets: Vec<SecretField>,
    /// Password and note can only be dropped together.
    pub can_remove_password_and_note: bool,
    pub metadata_description: bool,
    pub supports_expiry: bool,
}

fn add_action(field: SecretField) -> UpdateAction {
    match field {
        SecretField::Password => UpdateAction::AddPassword,
        SecretField::Note => UpdateAction::AddNote,
        SecretField::OneTimeCode => UpdateAction::AddOneTimeCode,
    }
}

fn remove_action(field: SecretField) -> UpdateAction {
    match field {
        SecretField::Password => UpdateAction::RemovePassword,
        SecretField::Note => UpdateAction::RemoveNote,
        SecretField::OneTimeCode => UpdateAction::RemoveOneTimeCode,
    }
}

impl Capabilities {
    pub fn for_content_type(graph: &TransitionGraph, content_type: ContentType) -> Self {
        let fields = [
            SecretField::Password,
            SecretField::Note,
            SecretField::OneTimeCode,
        ];
        let addable_secrets = fields
            .into_iter()
            .filter(|f| !content_type.requires(*f))
            .filter(|f| graph.allows(content_type, add_action(*f)))
            .collect();
        let removable_secrets = fields
            .into_iter()
            .filter(|f| content_type.requires(*f))
            .filter(|f| {
                graph
                    .target(content_type, remove_action(*f))
                    .map_or(false, |target| !target.requires(*f))
            })
            .collect();

        Self {
            content_type,
            addable_secrets,
            removable_secrets,
            can_remove_password_and_note: graph
                .allows(content_type, UpdateAction::RemovePasswordAndNote),
            metadata_description: graph
                .allows(content_type, UpdateAction::AddMetadataDescription)
                || graph.allows(content_type, UpdateAction::RemoveMetadataDescription),
            supports_expiry: content_type.supports_expiry(),
        }
    }
}

/// The item under edit.
#[derive(Debug, Clone)]
struct ResourceModel {
    item_id: Option<String>,
    content_type: ContentType,
    secret: SecretDocument,
    metadata: MetadataDocument,
    metadata_key_type: MetadataKeyType,
    metadata_key_id: Option<String>,
    recipients: Vec<String>,
    folder_parent_id: Option<String>,
    expiry: Option<DateTime<Utc>>,
}

/// Drives one create or edit session.
pub struct ResourceModelHandler {
    account: Account,
    graph: &'static TransitionGraph,
    policy: Arc<dyn DefaultContentTypePolicy>,
    validator: Arc<dyn FieldValidator>,
    codec: Arc<SecretCodec>,
    metadata: Arc<MetadataCrypto>,
    store: Arc<dyn PersistenceStore>,
    config: HandlerConfig,
    state: ModelState,
    submitted_from: Option<ModelState>,
    parent_folder: Option<ParentFolder>,
    model: Option<ResourceModel>,
}

impl ResourceModelHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: Account,
        policy: Arc<dyn DefaultContentTypePolicy>,
        validator: Arc<dyn FieldValidator>,
        codec: Arc<SecretCodec>,
        metadata: Arc<MetadataCrypto>,
        store: Arc<dyn PersistenceStore>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            account,
            graph: TransitionGraph::standard(),
            policy,
            validator,
            codec,
            metadata,
            store,
            config,
            state: ModelState::Uninitialized,
            submitted_from: None,
            parent_folder: None,
            model: None,
        }
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.model.as_ref().map(|m| m.content_type)
    }

    pub fn item_id(&self) -> Option<&str> {
        self.model.as_ref().and_then(|m| m.item_id.as_deref())
    }

    pub fn secret(&self) -> Option<&SecretDocument> {
        self.model.as_ref().map(|m| &m.secret)
    }

    pub fn metadata(&self) -> Option<&MetadataDocument> {
        self.model.as_ref().map(|m| &m.metadata)
    }

    pub fn metadata_key_type(&self) -> Option<MetadataKeyType> {
        self.model.as_ref().map(|m| m.metadata_key_type)
    }

    pub fn recipients(&self) -> &[String] {
        self.model
            .as_ref()
            .map(|m| m.recipients.as_slice())
            .unwrap_or(&[])
    }

    pub fn totp_defaults(&self) -> TotpDefaults {
        self.policy.totp_defaults()
    }

    /// Folder used by the next [`initialize_for_creation`](Self::initialize_for_creation).
    pub fn set_parent_folder(&mut self, folder: Option<ParentFolder>) {
        self.parent_folder = folder;
    }

    fn model(&self) -> Result<&ResourceModel> {
        self.model.as_ref().ok_or(VaultError::InvalidState {
            expected: "initialized",
            actual: self.state.name(),
        })
    }

    fn editable_model(&mut self) -> Result<&mut ResourceModel> {
        let actual = self.state.name();
        match (self.state, self.model.as_mut()) {
            (ModelState::Creating | ModelState::Editing, Some(model)) => Ok(model),
            _ => Err(VaultError::InvalidState {
                expected: "creating or editing",
                actual,
            }),
        }
    }

    /// Start a new item led by `leading`.
    pub fn initialize_for_creation(&mut self, leading: LeadingContentType) -> Result<()> {
        let (content_type, schema) = self.policy.default_for(leading);
        let defaults = self.policy.totp_defaults();

        let mut secret = match leading {
            LeadingContentType::Password => SecretDocument::empty_password(),
            LeadingContentType::OneTimeCode => SecretDocument::empty_totp(&defaults),
        };
        secret.normalize(content_type, &defaults);

        let folder_shared = self
            .parent_folder
            .as_ref()
            .map_or(false, |folder| folder.shared);
        let (metadata_key_type, metadata_key_id) = self.policy.metadata_key(folder_shared);

        debug!(%content_type, %schema, key_type = %metadata_key_type, "initialized for creation");
        self.model = Some(ResourceModel {
            item_id: None,
            content_type,
            secret,
            metadata: MetadataDocument::default(),
            metadata_key_type,
            metadata_key_id,
            recipients: vec![self.account.user_id.clone()],
            folder_parent_id: self.parent_folder.as_ref().map(|f| f.id.clone()),
            expiry: None,
        });
        self.state = ModelState::Creating;
        self.submitted_from = None;
        Ok(())
    }

    /// Load an existing item for editing.
    ///
    /// On failure the handler is left uninitialized.
    pub async fn initialize_for_edition(&mut self, id: &str) -> Result<()> {
        self.state = ModelState::Uninitialized;
        self.submitted_from = None;
        self.model = None;

        let model = self.load_model(id).await?;
        debug!(id, content_type = %model.content_type, "initialized for edition");
        self.model = Some(model);
        self.state = ModelState::Editing;
        Ok(())
    }

    async fn load_model(&self, id: &str) -> Result<ResourceModel> {
        let item = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| VaultError::ItemNotFound(id.to_string()))?;
        let content_type = item.content_type()?;

        let metadata = self.metadata.decrypt(&item).await?;

        let user_id = &self.account.user_id;
        let entry = item
            .secret_for(user_id)
            .ok_or_else(|| VaultError::SecretNotShared {
                item_id: item.id.clone(),
                user_id: user_id.clone(),
            })?;
        let private_key = self
            .store
            .private_key(user_id)
            .await?
            .ok_or_else(|| VaultError::PrivateKeyNotFound(user_id.clone()))?;
        let mut secret = match self.codec.open(&entry.data, content_type, &private_key).await {
            Err(VaultError::Crypto(_)) | Err(VaultError::Json(_)) => {
                return Err(VaultError::SecretDecryption(item.id.clone()))
            }
            other => other?,
        };
        secret.normalize(content_type, &self.policy.totp_defaults());

        Ok(ResourceModel {
            item_id: Some(item.id.clone()),
            content_type,
            secret,
            metadata,
            metadata_key_type: item.metadata_key_type,
            metadata_key_id: item.metadata_key_id.clone(),
            recipients: item.permissions.clone(),
            folder_parent_id: item.folder_parent_id.clone(),
            expiry: item.expiry,
        })
    }

    /// Apply one edit.
    ///
    /// `mutate` runs on copies of the documents. The copies only replace the
    /// current documents if `action` (after the password-and-note merge) is
    /// legal for the current shape. Returns the resulting content type.
    pub fn apply_edit<F>(&mut self, action: UpdateAction, mutate: F) -> Result<ContentType>
    where
        F: FnOnce(&mut SecretDocument, &mut MetadataDocument),
    {
        let graph = self.graph;
        let defaults = self.policy.totp_defaults();
        let model = self.editable_model()?;

        let mut secret = model.secret.clone();
        let mut metadata = model.metadata.clone();
        mutate(&mut secret, &mut metadata);

        let current = model.content_type;
        let action = merge_action(
            graph,
            current,
            action,
            secret.password_is_blank(),
            secret.note_is_blank(),
        );
        let target = graph.transition(current, action)?;

        if action == UpdateAction::RemoveMetadataDescription {
            metadata.description = None;
        }
        secret.normalize(target, &defaults);

        debug!(from = %current, to = %target, %action, "edit applied");
        model.secret = secret;
        model.metadata = metadata;
        model.content_type = target;
        Ok(target)
    }

    /// Look up a secret sub-field of the item under edit.
    pub fn secret_field(&self, field: SecretField) -> Result<FieldLookup> {
        Ok(self.model()?.secret.lookup(field))
    }

    pub fn capabilities(&self) -> Result<Capabilities> {
        Ok(Capabilities::for_content_type(
            self.graph,
            self.model()?.content_type,
        ))
    }

    /// Add a user who will receive a sealed copy of the secret.
    pub fn share_with(&mut self, user_id: &str) -> Result<()> {
        let model = self.editable_model()?;
        if !model.recipients.iter().any(|r| r == user_id) {
            model.recipients.push(user_id.to_string());
        }
        Ok(())
    }

    pub fn set_expiry(&mut self, expiry: Option<DateTime<Utc>>) -> Result<()> {
        let model = self.editable_model()?;
        if expiry.is_some() && !model.content_type.supports_expiry() {
            return Err(VaultError::Other(format!(
                "{} items cannot expire",
                model.content_type
            )));
        }
        model.expiry = expiry;
        Ok(())
    }

    fn validate(&self, model: &ResourceModel) -> Result<()> {
        let metadata = &model.metadata;
        let secret = &model.secret;
        let totp_key = secret.totp.as_ref().map(|t| t.secret_key.as_str());

        let mut fields = vec![
            RequiredField::required(FIELD_NAME, Some(metadata.name.as_str())),
            RequiredField::optional(FIELD_USERNAME, metadata.username.as_deref()),
            RequiredField::optional(FIELD_PASSWORD, secret.password.as_deref()),
        ];
        fields.extend(
            metadata
                .uris
                .iter()
                .map(|uri| RequiredField::optional(FIELD_URI, Some(uri.as_str()))),
        );
        if model.content_type.has_one_time_code() {
            fields.push(RequiredField::required(FIELD_TOTP_SECRET, totp_key));
        }

        self.validator
            .validate_required(&fields)
            .map_err(VaultError::Validation)
    }

    async fn resolve_recipients(&self, user_ids: &[String]) -> Result<Vec<Recipient>> {
        let mut recipients = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let public_key = self
                .store
                .public_key(user_id)
                .await?
                .ok_or_else(|| VaultError::RecipientKeyMissing(user_id.clone()))?;
            recipients.push(Recipient {
                user_id: user_id.clone(),
                public_key,
            });
        }
        Ok(recipients)
    }

    /// Validate, then seal the secret for every recipient and the metadata once.
    pub async fn submit(&mut self) -> Result<SealedPayload> {
        let creating = match self.state {
            ModelState::Creating => true,
            ModelState::Editing => false,
            other => {
                return Err(VaultError::InvalidState {
                    expected: "creating or editing",
                    actual: other.name(),
                })
            }
        };

        let mut model = self.model()?.clone();
        if model.metadata.name.trim().is_empty() {
            if let Some(name) = &self.config.default_name {
                model.metadata.name = name.clone();
            }
        }
        self.validate(&model)?;

        let user_id = &self.account.user_id;
        let private_key = self
            .store
            .private_key(user_id)
            .await?
            .ok_or_else(|| VaultError::PrivateKeyNotFound(user_id.clone()))?;
        let recipients = self.resolve_recipients(&model.recipients).await?;

        let secrets = self
            .codec
            .seal_for_recipients(&model.secret, model.content_type, &recipients, &private_key)
            .await?;
        let metadata = self
            .metadata
            .encrypt(
                model.metadata_key_type,
                model.metadata_key_id.as_deref(),
                &model.metadata.to_json()?,
            )
            .await?;

        let expiry = if creating {
            model
                .expiry
                .or_else(|| self.policy.expiry_for(model.content_type, Utc::now()))
        } else {
            model.expiry
        };

        info!(
            id = model.item_id.as_deref().unwrap_or("new"),
            content_type = %model.content_type,
            recipients = secrets.len(),
            "item sealed"
        );

        let payload = SealedPayload {
            resource_type: model.content_type.slug().to_string(),
            folder_parent_id: model.folder_parent_id.clone(),
            metadata,
            metadata_key_id: model.metadata_key_id.clone(),
            metadata_key_type: model.metadata_key_type,
            secrets,
            expiry,
        };
        model.expiry = expiry;
        self.model = Some(model);
        self.submitted_from = Some(self.state);
        self.state = ModelState::ReadyToSubmit;
        Ok(payload)
    }

    /// Return a submitted handler to the state it was submitted from.
    ///
    /// Used when the remote rejects the payload, so the same create or update
    /// can be re-invoked with the retained model.
    pub fn reopen(&mut self) -> Result<()> {
        match (self.state, self.submitted_from.take()) {
            (ModelState::ReadyToSubmit, Some(previous)) => {
                debug!(state = %previous, "reopened after failed submit");
                self.state = previous;
                Ok(())
            }
            (state, _) => Err(VaultError::InvalidState {
                expected: "ready to submit",
                actual: state.name(),
            }),
        }
    }
}
