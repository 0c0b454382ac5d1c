//! Field validation run before an item is sealed.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Field names checked on submit.
pub const FIELD_NAME: &str = "name";
pub const FIELD_TOTP_SECRET: &str = "totp.secret_key";
pub const FIELD_PASSWORD: &str = "password";
pub const FIELD_URI: &str = "uri";
pub const FIELD_USERNAME: &str = "username";

/// A field submitted for validation.
#[derive(Debug, Clone, Copy)]
pub struct RequiredField<'a> {
    pub name: &'static str,
    pub value: Option<&'a str>,
    /// Whether a blank value is an error.
    pub required: bool,
}

impl<'a> RequiredField<'a> {
    pub fn required(name: &'static str, value: Option<&'a str>) -> Self {
        Self {
            name,
            value,
            required: true,
        }
    }

    pub fn optional(name: &'static str, value: Option<&'a str>) -> Self {
        Self {
            name,
            value,
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldErrorKind {
    #[error("is required")]
    Missing,
    #[error("must not be blank")]
    Blank,
    #[error("is too long ({len} > {max} characters)")]
    TooLong { max: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.kind)
    }
}

/// Every failed field of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|e| e.field.as_str())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed")?;
        for error in &self.0 {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

/// Validates the fields an item needs before it can be submitted.
pub trait FieldValidator: Send + Sync {
    fn validate_required(&self, fields: &[RequiredField<'_>]) -> Result<(), ValidationErrors>;
}

/// Blank and length checks with per-field limits.
#[derive(Debug, Clone)]
pub struct RequiredFieldsValidator {
    max_lengths: HashMap<&'static str, usize>,
}

impl Default for RequiredFieldsValidator {
    fn default() -> Self {
        let max_lengths = HashMap::from([
            (FIELD_NAME, 255),
            (FIELD_USERNAME, 255),
            (FIELD_URI, 1024),
            (FIELD_PASSWORD, 4096),
            (FIELD_TOTP_SECRET, 1024),
        ]);
        Self { max_lengths }
    }
}

impl RequiredFieldsValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_length(mut self, field: &'static str, max: usize) -> Self {
        self.max_lengths.insert(field, max);
        self
    }

    fn check(&self, field: &RequiredField<'_>) -> Option<FieldErrorKind> {
        match field.value {
            None if field.required => Some(FieldErrorKind::Missing),
            None => None,
            Some(value) if field.required && value.trim().is_empty() => {
                Some(FieldErrorKind::Blank)
            }
            Some(value) => {
                let len = value.chars().count();
                self.max_lengths
                    .get(field.name)
                    .filter(|max| len > **max)
                    .map(|max| FieldErrorKind::TooLong { max: *max, len })
            }
        }
    }
}

impl FieldValidator for RequiredFieldsValidator {
    fn validate_required(&self, fields: &[RequiredField<'_>]) -> Result<(), ValidationErrors> {
        let errors: Vec<FieldError> = fields
            .iter()
            .filter_map(|field| {
                self.check(field).map(|kind| FieldError {
                    field: field.name.to_string(),
                    kind,
                })
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }
}
