//! Catalog of supported item shapes.
//!
//! Every item declares one content type by slug. A content type fixes which
//! secret fields the encrypted secret must carry, which metadata fields the
//! form exposes, and which schema major version the item belongs to.

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schema major version of a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaVersion {
    #[serde(rename = "v4")]
    Legacy,
    #[serde(rename = "v5")]
    Current,
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersion::Legacy => write!(f, "v4"),
            SchemaVersion::Current => write!(f, "v5"),
        }
    }
}

/// A sub-field of the encrypted secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretField {
    Password,
    Note,
    OneTimeCode,
}

impl SecretField {
    /// Key used for the field in the secret JSON document.
    pub fn json_key(&self) -> &'static str {
        match self {
            SecretField::Password => "password",
            SecretField::Note => "description",
            SecretField::OneTimeCode => "totp",
        }
    }
}

/// A field of the (separately encrypted) metadata document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    Name,
    Username,
    Uris,
    Description,
}

/// Which secret leads the creation form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadingContentType {
    Password,
    OneTimeCode,
}

/// Supported item shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentType {
    PasswordString,
    PasswordAndDescription,
    Totp,
    PasswordDescriptionTotp,
    V5PasswordString,
    V5Default,
    V5TotpStandalone,
    V5DefaultWithTotp,
}

const PASSWORD_ONLY: &[SecretField] = &[SecretField::Password];
const PASSWORD_NOTE: &[SecretField] = &[SecretField::Password, SecretField::Note];
const TOTP_ONLY: &[SecretField] = &[SecretField::OneTimeCode];
const PASSWORD_NOTE_TOTP: &[SecretField] = &[
    SecretField::Password,
    SecretField::Note,
    SecretField::OneTimeCode,
];

const META_WITH_DESCRIPTION: &[MetadataField] = &[
    MetadataField::Name,
    MetadataField::Username,
    MetadataField::Uris,
    MetadataField::Description,
];
const META_DEFAULT: &[MetadataField] = &[
    MetadataField::Name,
    MetadataField::Username,
    MetadataField::Uris,
];
const META_TOTP: &[MetadataField] = &[MetadataField::Name, MetadataField::Uris];
const META_TOTP_WITH_DESCRIPTION: &[MetadataField] = &[
    MetadataField::Name,
    MetadataField::Uris,
    MetadataField::Description,
];

impl ContentType {
    /// Every content type in the catalog.
    pub const ALL: [ContentType; 8] = [
        ContentType::PasswordString,
        ContentType::PasswordAndDescription,
        ContentType::Totp,
        ContentType::PasswordDescriptionTotp,
        ContentType::V5PasswordString,
        ContentType::V5Default,
        ContentType::V5TotpStandalone,
        ContentType::V5DefaultWithTotp,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            ContentType::PasswordString => "password-string",
            ContentType::PasswordAndDescription => "password-and-description",
            ContentType::Totp => "totp",
            ContentType::PasswordDescriptionTotp => "password-description-totp",
            ContentType::V5PasswordString => "v5-password-string",
            ContentType::V5Default => "v5-default",
            ContentType::V5TotpStandalone => "v5-totp-standalone",
            ContentType::V5DefaultWithTotp => "v5-default-with-totp",
        }
    }

    /// Look up a content type by slug.
    pub fn from_slug(slug: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|ct| ct.slug() == slug)
            .ok_or_else(|| VaultError::UnsupportedContentType(slug.to_string()))
    }

    pub fn schema_version(&self) -> SchemaVersion {
        match self {
            ContentType::PasswordString
            | ContentType::PasswordAndDescription
            | ContentType::Totp
            | ContentType::PasswordDescriptionTotp => SchemaVersion::Legacy,
            _ => SchemaVersion::Current,
        }
    }

    /// Secret fields an item of this type must carry, no more and no less.
    pub fn secret_fields(&self) -> &'static [SecretField] {
        match self {
            ContentType::PasswordString | ContentType::V5PasswordString => PASSWORD_ONLY,
            ContentType::PasswordAndDescription | ContentType::V5Default => PASSWORD_NOTE,
            ContentType::Totp | ContentType::V5TotpStandalone => TOTP_ONLY,
            ContentType::PasswordDescriptionTotp | ContentType::V5DefaultWithTotp => {
                PASSWORD_NOTE_TOTP
            }
        }
    }

    pub fn metadata_fields(&self) -> &'static [MetadataField] {
        match self {
            ContentType::PasswordString
            | ContentType::V5PasswordString
            | ContentType::V5Default
            | ContentType::V5DefaultWithTotp => META_WITH_DESCRIPTION,
            ContentType::V5TotpStandalone => META_TOTP_WITH_DESCRIPTION,
            ContentType::Totp => META_TOTP,
            ContentType::PasswordAndDescription | ContentType::PasswordDescriptionTotp => {
                META_DEFAULT
            }
        }
    }

    pub fn requires(&self, field: SecretField) -> bool {
        self.secret_fields().contains(&field)
    }

    pub fn has_password(&self) -> bool {
        self.requires(SecretField::Password)
    }

    /// Whether the description lives encrypted inside the secret.
    pub fn has_note(&self) -> bool {
        self.requires(SecretField::Note)
    }

    pub fn has_one_time_code(&self) -> bool {
        self.requires(SecretField::OneTimeCode)
    }

    /// Simple-password secrets are a bare string rather than a JSON object.
    pub fn is_simple_password(&self) -> bool {
        matches!(
            self,
            ContentType::PasswordString | ContentType::V5PasswordString
        )
    }

    pub fn supports_expiry(&self) -> bool {
        self.has_password()
    }

    pub fn leading_kind(&self) -> LeadingContentType {
        if self.has_password() {
            LeadingContentType::Password
        } else {
            LeadingContentType::OneTimeCode
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ContentType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_slug(s)
    }
}

impl Serialize for ContentType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.slug())
    }
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentType::from_slug(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_round_trip() {
        for ct in ContentType::ALL {
            assert_eq!(ContentType::from_slug(ct.slug()).unwrap(), ct);
        }
    }

    #[test]
    fn test_unknown_slug_is_unsupported() {
        let err = ContentType::from_slug("password-with-custom-fields").unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedContentType(_)));
    }

    #[test]
    fn test_predicates() {
        assert!(ContentType::V5DefaultWithTotp.has_password());
        assert!(ContentType::V5DefaultWithTotp.has_note());
        assert!(ContentType::V5DefaultWithTotp.has_one_time_code());

        assert!(!ContentType::PasswordString.has_note());
        assert!(ContentType::PasswordString.is_simple_password());
        assert!(ContentType::PasswordString
            .metadata_fields()
            .contains(&MetadataField::Description));
        assert!(ContentType::V5TotpStandalone
            .metadata_fields()
            .contains(&MetadataField::Description));
        assert!(!ContentType::PasswordAndDescription
            .metadata_fields()
            .contains(&MetadataField::Description));

        assert!(!ContentType::Totp.has_password());
        assert_eq!(
            ContentType::V5TotpStandalone.leading_kind(),
            LeadingContentType::OneTimeCode
        );
        assert!(!ContentType::Totp.supports_expiry());
    }

    #[test]
    fn test_schema_versions() {
        let legacy: Vec<_> = ContentType::ALL
            .iter()
            .filter(|ct| ct.schema_version() == SchemaVersion::Legacy)
            .collect();
        assert_eq!(legacy.len(), 4);
        assert_eq!(ContentType::V5Default.schema_version(), SchemaVersion::Current);
    }

    #[test]
    fn test_serde_uses_slug() {
        let json = serde_json::to_string(&ContentType::V5Default).unwrap();
        assert_eq!(json, "\"v5-default\"");
        let back: ContentType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ContentType::V5Default);
    }
}
