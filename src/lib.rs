//! passvault: password manager client core.
//!
//! Items carry a content type that fixes the shape of their encrypted secret.
//! Secrets are sealed once per recipient, metadata once per item under a
//! personal or shared key, and shape changes during an edit are checked
//! against a fixed transition graph.

pub mod cli;
pub mod codec;
pub mod content_type;
pub mod crypto;
pub mod error;
pub mod graph;
pub mod handler;
pub mod metadata;
pub mod models;
pub mod passphrase;
pub mod policy;
pub mod service;
pub mod session_keys;
pub mod store;
pub mod utils;
pub mod validation;

// Re-export commonly used types
pub use content_type::{ContentType, LeadingContentType, SchemaVersion, SecretField};
pub use error::{ErrorClass, Result, VaultError};
pub use graph::{TransitionGraph, UpdateAction};
pub use handler::{ModelState, ResourceModelHandler};
pub use models::{Item, MetadataDocument, SecretDocument};
pub use service::ResourceService;
