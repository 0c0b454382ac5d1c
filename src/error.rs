//! Error types for passvault.

use crate::graph::UpdateAction;
use crate::validation::ValidationErrors;
use std::path::PathBuf;
use thiserror::Error;

/// How a caller is expected to react to a [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Re-authenticate (passphrase, session, MFA) and invoke the same operation again.
    Recoverable,
    /// The affected item is skipped; sibling items keep being processed.
    ItemLevel,
    /// The edit was refused and the in-memory documents are unchanged.
    EditRejected,
    /// The whole submit was abandoned; nothing was persisted.
    SubmitAborted,
    /// Storage, serialization or programming errors.
    Internal,
}

/// Main error type for vault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Passphrase not present in memory cache")]
    PassphraseNotPresent,

    #[error("Session expired")]
    SessionExpired,

    #[error("Multi-factor authentication required")]
    MfaRequired { providers: Vec<String> },

    #[error("Private key not found for user {0}")]
    PrivateKeyNotFound(String),

    #[error("Metadata key not found: {0}")]
    MetadataKeyNotFound(String),

    #[error("Failed to decrypt session key for {kind} {id}, skipping item")]
    SessionKeyDerivation { kind: String, id: String },

    #[error("Failed to decrypt metadata for item {0}")]
    MetadataDecryption(String),

    #[error("Failed to decrypt secret for item {0}")]
    SecretDecryption(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Item {item_id} has no secret for user {user_id}")]
    SecretNotShared { item_id: String, user_id: String },

    #[error("Action {action} is not allowed for content type {content_type}")]
    IllegalTransition {
        content_type: String,
        action: UpdateAction,
    },

    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("Resource model is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("No public key known for recipient {0}")]
    RecipientKeyMissing(String),

    #[error("Sealing secret for recipient {user_id} failed: {source}")]
    RecipientSeal {
        user_id: String,
        #[source]
        source: crate::crypto::CryptoError,
    },

    #[error("Sealing metadata failed: {0}")]
    MetadataSeal(#[source] crate::crypto::CryptoError),

    #[error("Remote request failed: {0}")]
    Remote(crate::store::RemoteError),

    #[error("Store file not found: {0}")]
    StoreNotFound(PathBuf),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("Transition graph error: {0}")]
    Graph(#[from] crate::graph::GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl VaultError {
    /// Classify the error for the caller's recovery path.
    pub fn class(&self) -> ErrorClass {
        match self {
            VaultError::PassphraseNotPresent
            | VaultError::SessionExpired
            | VaultError::MfaRequired { .. } => ErrorClass::Recoverable,
            VaultError::PrivateKeyNotFound(_)
            | VaultError::MetadataKeyNotFound(_)
            | VaultError::SessionKeyDerivation { .. }
            | VaultError::MetadataDecryption(_)
            | VaultError::SecretDecryption(_)
            | VaultError::UnsupportedContentType(_)
            | VaultError::ItemNotFound(_)
            | VaultError::SecretNotShared { .. } => ErrorClass::ItemLevel,
            VaultError::IllegalTransition { .. } | VaultError::Validation(_) => {
                ErrorClass::EditRejected
            }
            VaultError::RecipientKeyMissing(_)
            | VaultError::RecipientSeal { .. }
            | VaultError::MetadataSeal(_)
            | VaultError::Remote(_) => ErrorClass::SubmitAborted,
            _ => ErrorClass::Internal,
        }
    }
}

impl From<crate::store::RemoteError> for VaultError {
    fn from(err: crate::store::RemoteError) -> Self {
        use crate::store::RemoteError;
        match err {
            RemoteError::Unauthorized => VaultError::SessionExpired,
            RemoteError::MfaRequired { providers } => VaultError::MfaRequired { providers },
            other => VaultError::Remote(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
