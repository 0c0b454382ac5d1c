//! Data models for items, secrets and metadata.

use crate::content_type::{ContentType, SecretField};
use crate::error::{Result, VaultError};
use crate::policy::TotpDefaults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use zeroize::Zeroize;

/// One-time-code parameters stored inside the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpSecret {
    pub algorithm: String,
    pub secret_key: String,
    pub digits: u32,
    pub period: u64,
}

impl TotpSecret {
    /// Default parameters with empty key material.
    pub fn empty(defaults: &TotpDefaults) -> Self {
        Self {
            algorithm: defaults.algorithm.clone(),
            secret_key: String::new(),
            digits: defaults.digits,
            period: defaults.period,
        }
    }
}

impl fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpSecret")
            .field("algorithm", &self.algorithm)
            .field("secret_key", &"<redacted>")
            .field("digits", &self.digits)
            .field("period", &self.period)
            .finish()
    }
}

/// Outcome of looking up a secret sub-field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLookup {
    /// Present and usable.
    Found(String),
    /// Present but unusable (e.g. a one-time code without key material).
    Invalid(String),
    /// Absent from the document.
    Missing,
}

/// Decrypted secret of an item.
///
/// Unknown keys are kept verbatim so a round trip through an older client
/// does not drop data it does not understand.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp: Option<TotpSecret>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SecretDocument {
    /// Secret for a new password-led item.
    pub fn empty_password() -> Self {
        let mut doc = Self::default();
        doc.password = Some(String::new());
        doc
    }

    /// Secret for a new one-time-code-led item.
    pub fn empty_totp(defaults: &TotpDefaults) -> Self {
        let mut doc = Self::default();
        doc.totp = Some(TotpSecret::empty(defaults));
        doc
    }

    pub fn has_field(&self, field: SecretField) -> bool {
        match field {
            SecretField::Password => self.password.is_some(),
            SecretField::Note => self.description.is_some(),
            SecretField::OneTimeCode => self.totp.is_some(),
        }
    }

    /// Secret fields currently present.
    pub fn present_fields(&self) -> BTreeSet<SecretField> {
        [
            SecretField::Password,
            SecretField::Note,
            SecretField::OneTimeCode,
        ]
        .into_iter()
        .filter(|f| self.has_field(*f))
        .collect()
    }

    pub fn password_is_blank(&self) -> bool {
        self.password.as_deref().map_or(true, |p| p.trim().is_empty())
    }

    pub fn note_is_blank(&self) -> bool {
        self.description
            .as_deref()
            .map_or(true, |d| d.trim().is_empty())
    }

    /// Look up a sub-field without failing.
    pub fn lookup(&self, field: SecretField) -> FieldLookup {
        match field {
            SecretField::Password => self
                .password
                .clone()
                .map_or(FieldLookup::Missing, FieldLookup::Found),
            SecretField::Note => self
                .description
                .clone()
                .map_or(FieldLookup::Missing, FieldLookup::Found),
            SecretField::OneTimeCode => match &self.totp {
                None => FieldLookup::Missing,
                Some(totp) if totp.secret_key.trim().is_empty() => {
                    FieldLookup::Invalid("one-time code has no key".to_string())
                }
                Some(totp) if totp.digits == 0 || totp.period == 0 => {
                    FieldLookup::Invalid("one-time code parameters are zero".to_string())
                }
                Some(totp) => FieldLookup::Found(totp.secret_key.clone()),
            },
        }
    }

    /// Make the present secret fields match `content_type` exactly.
    ///
    /// Missing required fields get empty defaults; fields the type does not
    /// require are removed.
    pub fn normalize(&mut self, content_type: ContentType, defaults: &TotpDefaults) {
        if content_type.has_one_time_code() {
            if self.totp.is_none() {
                self.totp = Some(TotpSecret::empty(defaults));
            }
        } else if let Some(mut totp) = self.totp.take() {
            totp.secret_key.zeroize();
        }

        if content_type.has_note() {
            if self.description.is_none() {
                self.description = Some(String::new());
            }
        } else if let Some(mut note) = self.description.take() {
            note.zeroize();
        }

        if content_type.has_password() {
            if self.password.is_none() {
                self.password = Some(String::new());
            }
        } else if let Some(mut password) = self.password.take() {
            password.zeroize();
        }
    }

    /// Serialize to the plaintext that gets sealed.
    pub fn to_plaintext(&self, content_type: ContentType) -> Result<String> {
        if content_type.is_simple_password() {
            return Ok(self.password.clone().unwrap_or_default());
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an opened secret for `content_type`.
    pub fn from_plaintext(content_type: ContentType, plaintext: &str) -> Result<Self> {
        if content_type.is_simple_password() {
            let mut doc = Self::default();
            doc.password = Some(plaintext.to_string());
            return Ok(doc);
        }
        serde_json::from_str(plaintext).map_err(VaultError::Json)
    }
}

impl Drop for SecretDocument {
    fn drop(&mut self) {
        if let Some(password) = self.password.as_mut() {
            password.zeroize();
        }
        if let Some(note) = self.description.as_mut() {
            note.zeroize();
        }
        if let Some(totp) = self.totp.as_mut() {
            totp.secret_key.zeroize();
        }
    }
}

impl fmt::Debug for SecretDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretDocument")
            .field("fields", &self.present_fields())
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Decrypted, non-secret descriptive data of an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetadataDocument {
    pub fn main_uri(&self) -> Option<&str> {
        self.uris.first().map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Secret sealed for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub user_id: String,
    pub data: String,
}

/// Which key pair protects an item's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataKeyType {
    #[serde(rename = "user_key")]
    Personal,
    #[serde(rename = "shared_key")]
    Shared,
}

impl fmt::Display for MetadataKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataKeyType::Personal => write!(f, "personal"),
            MetadataKeyType::Shared => write!(f, "shared"),
        }
    }
}

/// A user's copy of a shared metadata private key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMetadataPrivateKey {
    pub user_id: Option<String>,
    pub key_material: String,
    pub passphrase: String,
}

impl fmt::Debug for ParsedMetadataPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedMetadataPrivateKey")
            .field("user_id", &self.user_id)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl Drop for ParsedMetadataPrivateKey {
    fn drop(&mut self) {
        self.passphrase.zeroize();
    }
}

/// A shared metadata key pair with its per-user private halves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMetadataKey {
    pub id: String,
    pub public_key: String,
    #[serde(default)]
    pub private_keys: Vec<ParsedMetadataPrivateKey>,
}

/// A user who receives a sealed copy of an item's secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: String,
    pub public_key: String,
}

/// The signed-in user the core acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
}

impl Account {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// A persisted item with sealed metadata and per-recipient secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    /// Content type slug.
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_parent_id: Option<String>,
    /// Sealed metadata document.
    pub metadata: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_key_id: Option<String>,
    pub metadata_key_type: MetadataKeyType,
    pub secrets: Vec<EncryptedSecret>,
    /// Users with access, each holding one entry in `secrets`.
    pub permissions: Vec<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Item {
    pub fn content_type(&self) -> Result<ContentType> {
        ContentType::from_slug(&self.resource_type)
    }

    pub fn secret_for(&self, user_id: &str) -> Option<&EncryptedSecret> {
        self.secrets.iter().find(|s| s.user_id == user_id)
    }
}

/// Fully sealed item ready for persistence or network submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_parent_id: Option<String>,
    pub metadata: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_key_id: Option<String>,
    pub metadata_key_type: MetadataKeyType,
    pub secrets: Vec<EncryptedSecret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> TotpDefaults {
        TotpDefaults::default()
    }

    #[test]
    fn test_normalize_adds_and_removes_fields() {
        let mut doc = SecretDocument::empty_password();
        doc.normalize(ContentType::V5DefaultWithTotp, &defaults());
        assert_eq!(
            doc.present_fields(),
            ContentType::V5DefaultWithTotp
                .secret_fields()
                .iter()
                .copied()
                .collect()
        );
        assert_eq!(doc.description.as_deref(), Some(""));
        assert_eq!(doc.totp.as_ref().unwrap().digits, 6);

        doc.normalize(ContentType::V5TotpStandalone, &defaults());
        assert!(doc.password.is_none());
        assert!(doc.description.is_none());
        assert!(doc.totp.is_some());
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for ct in ContentType::ALL {
            let mut doc = SecretDocument::empty_totp(&defaults());
            doc.description = Some("note".to_string());
            doc.normalize(ct, &defaults());
            let once = doc.clone();
            doc.normalize(ct, &defaults());
            assert_eq!(doc, once, "normalize not idempotent for {ct}");
            assert_eq!(
                doc.present_fields(),
                ct.secret_fields().iter().copied().collect()
            );
        }
    }

    #[test]
    fn test_simple_password_plaintext_is_bare_string() {
        let mut doc = SecretDocument::default();
        doc.password = Some("hunter2".to_string());
        let plain = doc.to_plaintext(ContentType::PasswordString).unwrap();
        assert_eq!(plain, "hunter2");

        let parsed = SecretDocument::from_plaintext(ContentType::PasswordString, &plain).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_json_plaintext_keeps_unknown_keys() {
        let json = r#"{"password":"p","description":"d","custom_fields":[1,2]}"#;
        let doc = SecretDocument::from_plaintext(ContentType::V5Default, json).unwrap();
        assert_eq!(doc.password.as_deref(), Some("p"));
        assert!(doc.extra.contains_key("custom_fields"));

        let back = doc.to_plaintext(ContentType::V5Default).unwrap();
        let value: Value = serde_json::from_str(&back).unwrap();
        assert_eq!(value["custom_fields"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_totp_lookup() {
        let mut doc = SecretDocument::empty_totp(&defaults());
        assert!(matches!(
            doc.lookup(SecretField::OneTimeCode),
            FieldLookup::Invalid(_)
        ));
        doc.totp.as_mut().unwrap().secret_key = "JBSWY3DPEHPK3PXP".to_string();
        assert_eq!(
            doc.lookup(SecretField::OneTimeCode),
            FieldLookup::Found("JBSWY3DPEHPK3PXP".to_string())
        );
        assert_eq!(doc.lookup(SecretField::Password), FieldLookup::Missing);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut doc = SecretDocument::empty_password();
        doc.password = Some("very-secret".to_string());
        assert!(!format!("{doc:?}").contains("very-secret"));
    }

    #[test]
    fn test_metadata_key_type_serde() {
        assert_eq!(
            serde_json::to_string(&MetadataKeyType::Shared).unwrap(),
            "\"shared_key\""
        );
    }
}
