//! Organisation settings deciding how new items are shaped.

use crate::content_type::{ContentType, LeadingContentType, SchemaVersion};
use crate::models::MetadataKeyType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Parameters given to a new one-time code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpDefaults {
    pub algorithm: String,
    pub digits: u32,
    pub period: u64,
}

impl Default for TotpDefaults {
    fn default() -> Self {
        Self {
            algorithm: "SHA1".to_string(),
            digits: 6,
            period: 30,
        }
    }
}

/// Which schema version new items use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTypesSettings {
    pub default_resource_types: SchemaVersion,
    #[serde(default = "enabled")]
    pub allow_creation_of_v5_resources: bool,
    #[serde(default = "enabled")]
    pub allow_creation_of_v4_resources: bool,
}

fn enabled() -> bool {
    true
}

impl Default for MetadataTypesSettings {
    fn default() -> Self {
        Self {
            default_resource_types: SchemaVersion::Current,
            allow_creation_of_v5_resources: true,
            allow_creation_of_v4_resources: true,
        }
    }
}

/// Which key new items' metadata is sealed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataKeysSettings {
    pub allow_usage_of_personal_keys: bool,
    /// Shared metadata key used when personal keys are not allowed.
    #[serde(default)]
    pub shared_key_id: Option<String>,
}

impl Default for MetadataKeysSettings {
    fn default() -> Self {
        Self {
            allow_usage_of_personal_keys: true,
            shared_key_id: None,
        }
    }
}

/// Password expiry settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirySettings {
    pub automatic_expiry: bool,
    #[serde(default)]
    pub default_expiry_period_days: Option<i64>,
}

/// Decides the shape, one-time-code defaults, metadata key and expiry of new items.
pub trait DefaultContentTypePolicy: Send + Sync {
    fn default_for(&self, leading: LeadingContentType) -> (ContentType, SchemaVersion);

    fn totp_defaults(&self) -> TotpDefaults {
        TotpDefaults::default()
    }

    /// Key type and shared key id for a new item's metadata.
    ///
    /// `parent_folder_shared` reports whether the target folder is shared with
    /// other users, which rules out a personal key.
    fn metadata_key(&self, _parent_folder_shared: bool) -> (MetadataKeyType, Option<String>) {
        (MetadataKeyType::Personal, None)
    }

    fn expiry_for(&self, _content_type: ContentType, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        None
    }
}

/// Policy driven by organisation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPolicy {
    #[serde(default)]
    pub metadata_types: MetadataTypesSettings,
    #[serde(default)]
    pub metadata_keys: MetadataKeysSettings,
    #[serde(default)]
    pub expiry: ExpirySettings,
    #[serde(default)]
    pub totp: TotpDefaults,
}

impl SettingsPolicy {
    fn schema(&self) -> SchemaVersion {
        let types = &self.metadata_types;
        match types.default_resource_types {
            SchemaVersion::Current if !types.allow_creation_of_v5_resources => SchemaVersion::Legacy,
            SchemaVersion::Legacy if !types.allow_creation_of_v4_resources => {
                SchemaVersion::Current
            }
            version => version,
        }
    }
}

impl DefaultContentTypePolicy for SettingsPolicy {
    fn default_for(&self, leading: LeadingContentType) -> (ContentType, SchemaVersion) {
        let schema = self.schema();
        let content_type = match (schema, leading) {
            (SchemaVersion::Current, LeadingContentType::Password) => ContentType::V5Default,
            (SchemaVersion::Current, LeadingContentType::OneTimeCode) => {
                ContentType::V5TotpStandalone
            }
            (SchemaVersion::Legacy, LeadingContentType::Password) => {
                ContentType::PasswordAndDescription
            }
            (SchemaVersion::Legacy, LeadingContentType::OneTimeCode) => ContentType::Totp,
        };
        (content_type, schema)
    }

    fn totp_defaults(&self) -> TotpDefaults {
        self.totp.clone()
    }

    fn metadata_key(&self, parent_folder_shared: bool) -> (MetadataKeyType, Option<String>) {
        let keys = &self.metadata_keys;
        if keys.allow_usage_of_personal_keys && !parent_folder_shared {
            (MetadataKeyType::Personal, None)
        } else {
            (MetadataKeyType::Shared, keys.shared_key_id.clone())
        }
    }

    fn expiry_for(&self, content_type: ContentType, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.expiry.automatic_expiry || !content_type.supports_expiry() {
            return None;
        }
        self.expiry
            .default_expiry_period_days
            .map(|days| now + Duration::days(days))
    }
}
