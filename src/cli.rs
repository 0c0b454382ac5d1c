//! Command-line interface implementation.

use crate::content_type::{ContentType, LeadingContentType, SchemaVersion, SecretField};
use crate::crypto::{HybridEngine, KdfParams};
use crate::error::{Result, VaultError};
use crate::graph::{TransitionGraph, UpdateAction};
use crate::handler::{HandlerConfig, ResourceModelHandler};
use crate::models::{
    Account, FieldLookup, ParsedMetadataKey, ParsedMetadataPrivateKey, TotpSecret,
};
use crate::passphrase::{Passphrase, PassphraseMemoryCache};
use crate::policy::SettingsPolicy;
use crate::service::{ResourceService, ServiceContext};
use crate::session_keys::SessionKeyCache;
use crate::store::{FileStore, LocalRemote, PersistenceStore, UserRecord};
use crate::utils::{self, success, warning};
use crate::validation::RequiredFieldsValidator;
use clap::{Parser, Subcommand};
use colored::*;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Password manager with shareable, individually sealed items.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to store file
    #[arg(
        short = 'f',
        long,
        global = true,
        env = "PASSVAULT_FILE",
        help = "Path to store file (default: searches for passvault.json)"
    )]
    pub file: Option<PathBuf>,

    /// Acting user id
    #[arg(short = 'u', long, global = true, env = "PASSVAULT_USER", default_value = "me")]
    pub user: String,

    /// Argon2id memory cost (KiB) for newly generated keys
    #[arg(long, global = true, env = "PASSVAULT_KDF_MEMORY_KIB", default_value_t = 65536)]
    pub kdf_memory: u32,

    /// Passphrase; prompted for when not set
    #[arg(long, global = true, env = "PASSVAULT_PASSPHRASE", hide = true, hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Output format
    #[arg(
        short = 'o',
        long,
        global = true,
        value_enum,
        default_value = "text",
        help = "Output format"
    )]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new store and a key pair for the acting user
    Init,

    /// Register another user who items can be shared with
    AddUser {
        user_id: String,

        /// Public key of the user; a local key pair is generated when omitted
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Create a shared metadata key
    MetadataKey {
        id: String,
    },

    /// Add a new item
    Add {
        /// Item name
        #[arg(short, long)]
        name: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long = "uri")]
        uris: Vec<String>,

        /// Read the password from stdin
        #[arg(short = 'i', long)]
        password_stdin: bool,

        /// Encrypted note
        #[arg(long)]
        note: Option<String>,

        /// One-time code secret key (base32)
        #[arg(long)]
        totp_secret: Option<String>,

        /// Create a one-time-code item without a password
        #[arg(long)]
        totp_only: bool,

        /// Use v4 content types
        #[arg(long)]
        legacy: bool,

        /// Seal metadata with this shared metadata key
        #[arg(long)]
        shared_key: Option<String>,

        /// Share with these users
        #[arg(long = "share")]
        share: Vec<String>,
    },

    /// Edit an existing item
    Edit {
        id: String,

        #[arg(short, long)]
        name: Option<String>,

        /// Read a new password from stdin
        #[arg(short = 'i', long)]
        password_stdin: bool,

        #[arg(long)]
        note: Option<String>,

        #[arg(long)]
        totp_secret: Option<String>,

        #[arg(long)]
        remove_password: bool,

        #[arg(long)]
        remove_note: bool,

        #[arg(long)]
        remove_totp: bool,

        #[arg(long = "share")]
        share: Vec<String>,
    },

    /// List items
    List,

    /// Show one item
    Show {
        id: String,

        /// Print secret values instead of masking them
        #[arg(short, long)]
        reveal: bool,
    },

    /// Print the content type catalog and its legal transitions
    Types,

    /// Back up the store file
    Backup,
}

impl Cli {
    /// Get the store file path.
    pub fn get_store_file(&self) -> Result<PathBuf> {
        if let Some(path) = &self.file {
            Ok(path.clone())
        } else if let Some(path) = utils::find_store_file() {
            Ok(path)
        } else {
            Err(VaultError::Other(
                "No store file found. Use 'passvault init' to create one.".to_string(),
            ))
        }
    }

    /// Execute the CLI command.
    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Init => self.init_store().await,
            Commands::AddUser {
                user_id,
                public_key,
            } => self.add_user(user_id, public_key.clone()).await,
            Commands::MetadataKey { id } => self.create_metadata_key(id).await,
            Commands::Add {
                name,
                username,
                uris,
                password_stdin,
                note,
                totp_secret,
                totp_only,
                legacy,
                shared_key,
                share,
            } => {
                let request = AddRequest {
                    name,
                    username: username.as_deref(),
                    uris,
                    password_stdin: *password_stdin,
                    note: note.as_deref(),
                    totp_secret: totp_secret.as_deref(),
                    totp_only: *totp_only,
                    legacy: *legacy,
                    shared_key: shared_key.as_deref(),
                    share,
                };
                self.add_item(request).await
            }
            Commands::Edit {
                id,
                name,
                password_stdin,
                note,
                totp_secret,
                remove_password,
                remove_note,
                remove_totp,
                share,
            } => {
                let request = EditRequest {
                    name: name.as_deref(),
                    password_stdin: *password_stdin,
                    note: note.as_deref(),
                    totp_secret: totp_secret.as_deref(),
                    remove_password: *remove_password,
                    remove_note: *remove_note,
                    remove_totp: *remove_totp,
                    share,
                };
                self.edit_item(id, request).await
            }
            Commands::List => self.list_items().await,
            Commands::Show { id, reveal } => self.show_item(id, *reveal).await,
            Commands::Types => self.print_types(),
            Commands::Backup => {
                let store = FileStore::open(&self.get_store_file()?)?;
                let backup = store.create_backup()?;
                success(&format!("Created backup: {}", backup.display()));
                Ok(())
            }
        }
    }

    fn passphrase(&self, confirm: bool) -> Result<Passphrase> {
        match &self.passphrase {
            Some(value) => Ok(Passphrase::from(value.as_str())),
            None => utils::prompt_passphrase("Passphrase", confirm),
        }
    }

    fn engine(&self) -> HybridEngine {
        HybridEngine::new(KdfParams {
            memory_kib: self.kdf_memory,
            ..KdfParams::default()
        })
    }

    /// Initialize a new store.
    async fn init_store(&self) -> Result<()> {
        let path = self
            .file
            .clone()
            .unwrap_or_else(|| PathBuf::from(utils::STORE_FILE_NAMES[0]));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let passphrase = self.passphrase(true)?;
        let pair = self.engine().generate_key_pair(passphrase.as_bytes())?;

        let store = FileStore::create(&path)?;
        store
            .add_user(UserRecord {
                user_id: self.user.clone(),
                public_key: pair.public_key.clone(),
                private_key: Some(pair.private_key.clone()),
            })
            .await?;

        success(&format!(
            "Store initialized at {} for user {}",
            path.display(),
            self.user
        ));
        for warn in utils::check_file_permissions(&path) {
            warning(&warn);
        }
        Ok(())
    }

    async fn add_user(&self, user_id: &str, public_key: Option<String>) -> Result<()> {
        let store = FileStore::open(&self.get_store_file()?)?;
        let record = match public_key {
            Some(public_key) => {
                HybridEngine::check_public_key(&public_key)?;
                UserRecord {
                    user_id: user_id.to_string(),
                    public_key,
                    private_key: None,
                }
            }
            None => {
                let passphrase = self.passphrase(true)?;
                let pair = self.engine().generate_key_pair(passphrase.as_bytes())?;
                UserRecord {
                    user_id: user_id.to_string(),
                    public_key: pair.public_key.clone(),
                    private_key: Some(pair.private_key.clone()),
                }
            }
        };
        store.add_user(record).await?;
        success(&format!("Added user {user_id}"));
        Ok(())
    }

    async fn create_metadata_key(&self, id: &str) -> Result<()> {
        let store = FileStore::open(&self.get_store_file()?)?;
        let key_passphrase = Zeroizing::new(uuid::Uuid::new_v4().simple().to_string());
        let pair = self.engine().generate_key_pair(key_passphrase.as_bytes())?;
        store
            .add_metadata_key(ParsedMetadataKey {
                id: id.to_string(),
                public_key: pair.public_key.clone(),
                private_keys: vec![ParsedMetadataPrivateKey {
                    user_id: Some(self.user.clone()),
                    key_material: pair.private_key.clone(),
                    passphrase: key_passphrase.to_string(),
                }],
            })
            .await?;
        success(&format!("Created shared metadata key {id}"));
        Ok(())
    }

    /// Open the store and wire up the service.
    async fn open_service(&self, policy: SettingsPolicy) -> Result<(Arc<FileStore>, ResourceService)> {
        let store = Arc::new(FileStore::open(&self.get_store_file()?)?);
        for warn in utils::check_file_permissions(store.path()) {
            warning(&warn);
        }

        let cache = Arc::new(SessionKeyCache::new());
        if let Some(bundle) = store.session_keys().await {
            let loaded = cache.seed(&[bundle]);
            debug!(loaded, "seeded session key cache");
        }

        let passphrases = Arc::new(PassphraseMemoryCache::holding(self.passphrase(false)?));
        let persistence: Arc<dyn PersistenceStore> = store.clone();
        let ctx = ServiceContext {
            account: Account::new(self.user.clone()),
            engine: Arc::new(HybridEngine::default()),
            store: Arc::clone(&persistence),
            remote: Arc::new(LocalRemote::new(persistence)),
            passphrases,
            cache,
            policy: Arc::new(policy),
            validator: Arc::new(RequiredFieldsValidator::new()),
            config: HandlerConfig::default(),
        };
        Ok((store, ResourceService::new(ctx)))
    }

    async fn save_session_keys(&self, store: &FileStore, service: &ResourceService) -> Result<()> {
        store.save_session_keys(service.cache().export()).await
    }

    async fn add_item(&self, request: AddRequest<'_>) -> Result<()> {
        let mut policy = SettingsPolicy::default();
        if request.legacy {
            policy.metadata_types.default_resource_types = SchemaVersion::Legacy;
        }
        if let Some(key_id) = request.shared_key {
            policy.metadata_keys.allow_usage_of_personal_keys = false;
            policy.metadata_keys.shared_key_id = Some(key_id.to_string());
        }

        let password = if request.password_stdin {
            Some(read_stdin_secret()?)
        } else {
            None
        };

        let (store, service) = self.open_service(policy).await?;
        let mut handler = service.handler();
        let leading = if request.totp_only {
            LeadingContentType::OneTimeCode
        } else {
            LeadingContentType::Password
        };
        handler.initialize_for_creation(leading)?;

        handler.apply_edit(UpdateAction::EditMetadata, |_, metadata| {
            metadata.name = request.name.to_string();
            metadata.username = request.username.map(str::to_string);
            metadata.uris = request.uris.to_vec();
        })?;
        if let Some(password) = password {
            handler.apply_edit(UpdateAction::AddPassword, |secret, _| {
                secret.password = Some(password.to_string());
            })?;
        }
        if let Some(note) = request.note {
            handler.apply_edit(UpdateAction::AddNote, |secret, _| {
                secret.description = Some(note.to_string());
            })?;
        }
        if let Some(key) = request.totp_secret {
            set_totp_secret(&mut handler, key)?;
        }
        for user in request.share {
            handler.share_with(user)?;
        }

        let item = service.create(&mut handler).await?;
        self.save_session_keys(&store, &service).await?;

        match self.output {
            OutputFormat::Text => success(&format!(
                "Added {} ({})",
                item.id.bold(),
                item.resource_type
            )),
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "id": item.id,
                    "resource_type": item.resource_type,
                }))?
            ),
        }
        Ok(())
    }

    async fn edit_item(&self, id: &str, request: EditRequest<'_>) -> Result<()> {
        let password = if request.password_stdin {
            Some(read_stdin_secret()?)
        } else {
            None
        };

        let (store, service) = self.open_service(SettingsPolicy::default()).await?;
        let mut handler = service.handler();
        handler.initialize_for_edition(id).await?;

        if let Some(name) = request.name {
            handler.apply_edit(UpdateAction::EditMetadata, |_, metadata| {
                metadata.name = name.to_string();
            })?;
        }
        if let Some(password) = password {
            handler.apply_edit(UpdateAction::AddPassword, |secret, _| {
                secret.password = Some(password.to_string());
            })?;
        }
        if let Some(note) = request.note {
            handler.apply_edit(UpdateAction::AddNote, |secret, _| {
                secret.description = Some(note.to_string());
            })?;
        }
        if let Some(key) = request.totp_secret {
            set_totp_secret(&mut handler, key)?;
        }
        if request.remove_totp {
            handler.apply_edit(UpdateAction::RemoveOneTimeCode, |secret, _| {
                secret.totp = None;
            })?;
        }
        if request.remove_password && request.remove_note {
            handler.apply_edit(UpdateAction::RemovePassword, |secret, _| {
                secret.password = None;
                secret.description = None;
            })?;
        } else if request.remove_password {
            handler.apply_edit(UpdateAction::RemovePassword, |secret, _| {
                secret.password = None;
            })?;
        } else if request.remove_note {
            handler.apply_edit(UpdateAction::RemoveNote, |secret, _| {
                secret.description = None;
            })?;
        }
        for user in request.share {
            handler.share_with(user)?;
        }

        let item = service.update(&mut handler).await?;
        self.save_session_keys(&store, &service).await?;
        success(&format!("Updated {} ({})", item.id.bold(), item.resource_type));
        Ok(())
    }

    async fn list_items(&self) -> Result<()> {
        let (store, service) = self.open_service(SettingsPolicy::default()).await?;
        let listing = service.list().await?;
        self.save_session_keys(&store, &service).await?;

        for skipped in &listing.skipped {
            warning(&format!("Skipped {}: {}", skipped.id, skipped.error));
        }

        match self.output {
            OutputFormat::Text => {
                if listing.items.is_empty() {
                    println!("No items found");
                    return Ok(());
                }
                for entry in &listing.items {
                    println!(
                        "{}  {:<24} {:<22} {}",
                        entry.item.id.dimmed(),
                        entry.metadata.name.bold(),
                        entry.item.resource_type,
                        entry.metadata.username.as_deref().unwrap_or("")
                    );
                }
            }
            OutputFormat::Json => {
                let entries: Vec<serde_json::Value> = listing
                    .items
                    .iter()
                    .map(|entry| {
                        serde_json::json!({
                            "id": entry.item.id,
                            "resource_type": entry.item.resource_type,
                            "name": entry.metadata.name,
                            "username": entry.metadata.username,
                            "uris": entry.metadata.uris,
                        })
                    })
                    .collect();
                let skipped: Vec<&str> = listing.skipped.iter().map(|s| s.id.as_str()).collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "items": entries,
                        "skipped": skipped,
                    }))?
                );
            }
        }
        Ok(())
    }

    async fn show_item(&self, id: &str, reveal: bool) -> Result<()> {
        let (store, service) = self.open_service(SettingsPolicy::default()).await?;
        let item = store
            .get(id)
            .await?
            .ok_or_else(|| VaultError::ItemNotFound(id.to_string()))?;
        let metadata = service.metadata_crypto().decrypt(&item).await?;
        let secret = service.reveal_secret(id).await?;
        self.save_session_keys(&store, &service).await?;

        let show = |value: &str| {
            if reveal {
                value.to_string()
            } else {
                utils::mask(value)
            }
        };

        match self.output {
            OutputFormat::Text => {
                println!("{} {}", "Name:".bold(), metadata.name);
                println!("{} {}", "Type:".bold(), item.resource_type);
                if let Some(username) = &metadata.username {
                    println!("{} {}", "Username:".bold(), username);
                }
                for uri in &metadata.uris {
                    println!("{} {}", "URI:".bold(), uri);
                }
                if let Some(description) = &metadata.description {
                    println!("{} {}", "Description:".bold(), description);
                }
                if let Some(password) = &secret.password {
                    println!("{} {}", "Password:".bold(), show(password));
                }
                if let Some(note) = &secret.description {
                    println!("{} {}", "Note:".bold(), show(note));
                }
                match secret.lookup(SecretField::OneTimeCode) {
                    FieldLookup::Found(key) => {
                        let totp = secret.totp.as_ref();
                        println!(
                            "{} {} ({} digits, {}s, {})",
                            "TOTP:".bold(),
                            show(&key),
                            totp.map_or(0, |t| t.digits),
                            totp.map_or(0, |t| t.period),
                            totp.map_or("", |t| t.algorithm.as_str())
                        );
                    }
                    FieldLookup::Invalid(reason) => {
                        println!("{} {}", "TOTP:".bold(), reason.yellow())
                    }
                    FieldLookup::Missing => {}
                }
                if let Some(expiry) = item.expiry {
                    println!("{} {}", "Expires:".bold(), expiry.format("%Y-%m-%d"));
                }
                println!("{} {}", "Shared with:".bold(), item.permissions.join(", "));
            }
            OutputFormat::Json => {
                let mut value = serde_json::json!({
                    "id": item.id,
                    "resource_type": item.resource_type,
                    "metadata": metadata,
                    "permissions": item.permissions,
                });
                if reveal {
                    value["secret"] = serde_json::to_value(&secret)?;
                }
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
        }
        Ok(())
    }

    fn print_types(&self) -> Result<()> {
        let graph = TransitionGraph::standard();
        match self.output {
            OutputFormat::Text => {
                for content_type in ContentType::ALL {
                    let fields: Vec<&str> = content_type
                        .secret_fields()
                        .iter()
                        .map(SecretField::json_key)
                        .collect();
                    println!(
                        "{} [{}] secret: {}",
                        content_type.slug().bold(),
                        content_type.schema_version(),
                        fields.join(", ")
                    );
                    for (action, target) in graph.edges(content_type) {
                        if target != content_type {
                            println!("    {action} -> {target}");
                        }
                    }
                }
            }
            OutputFormat::Json => {
                let types: Vec<serde_json::Value> = ContentType::ALL
                    .iter()
                    .map(|ct| {
                        let transitions: serde_json::Map<String, serde_json::Value> = graph
                            .edges(*ct)
                            .into_iter()
                            .map(|(action, target)| (action.to_string(), target.slug().into()))
                            .collect();
                        serde_json::json!({
                            "slug": ct.slug(),
                            "schema": ct.schema_version(),
                            "secret_fields": ct.secret_fields(),
                            "metadata_fields": ct.metadata_fields(),
                            "transitions": transitions,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&types)?);
            }
        }
        Ok(())
    }
}

struct AddRequest<'a> {
    name: &'a str,
    username: Option<&'a str>,
    uris: &'a [String],
    password_stdin: bool,
    note: Option<&'a str>,
    totp_secret: Option<&'a str>,
    totp_only: bool,
    legacy: bool,
    shared_key: Option<&'a str>,
    share: &'a [String],
}

struct EditRequest<'a> {
    name: Option<&'a str>,
    password_stdin: bool,
    note: Option<&'a str>,
    totp_secret: Option<&'a str>,
    remove_password: bool,
    remove_note: bool,
    remove_totp: bool,
    share: &'a [String],
}

fn set_totp_secret(handler: &mut ResourceModelHandler, key: &str) -> Result<()> {
    let defaults = handler.totp_defaults();
    handler.apply_edit(UpdateAction::AddOneTimeCode, |secret, _| {
        secret
            .totp
            .get_or_insert_with(|| TotpSecret::empty(&defaults))
            .secret_key = key.to_string();
    })?;
    Ok(())
}

fn read_stdin_secret() -> Result<Zeroizing<String>> {
    let mut buffer = Zeroizing::new(String::new());
    std::io::stdin().read_to_string(&mut buffer)?;
    let trimmed = Zeroizing::new(buffer.trim_end_matches(['\r', '\n']).to_string());
    Ok(trimmed)
}
