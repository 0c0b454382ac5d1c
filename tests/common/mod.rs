// Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use passvault::crypto::{CryptoEngine, CryptoError, HybridEngine, KdfParams, SessionKey};
use passvault::handler::HandlerConfig;
use passvault::models::{Account, Item, ParsedMetadataKey, ParsedMetadataPrivateKey, SealedPayload};
use passvault::passphrase::{Passphrase, PassphraseMemoryCache, PassphraseProvider};
use passvault::policy::SettingsPolicy;
use passvault::service::{ServiceContext, ResourceService};
use passvault::session_keys::SessionKeyCache;
use passvault::store::{FileStore, LocalRemote, PersistenceStore, RemoteError, RemoteStore, UserRecord};
use passvault::validation::RequiredFieldsValidator;
use passvault::{LeadingContentType, UpdateAction};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const ALICE: &str = "alice";
pub const ALICE_PASSPHRASE: &str = "correct horse battery staple";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn light_engine() -> HybridEngine {
    HybridEngine::new(KdfParams {
        memory_kib: 256,
        iterations: 1,
        parallelism: 1,
    })
}

/// Engine wrapper that counts every call it forwards.
#[derive(Default)]
pub struct CountingEngine {
    inner: HybridEngine,
    pub sign_encrypts: AtomicUsize,
    pub decrypts: AtomicUsize,
    pub derivations: AtomicUsize,
    pub session_decrypts: AtomicUsize,
}

impl CountingEngine {
    pub fn total(&self) -> usize {
        self.sign_encrypts.load(Ordering::SeqCst)
            + self.decrypts.load(Ordering::SeqCst)
            + self.derivations.load(Ordering::SeqCst)
            + self.session_decrypts.load(Ordering::SeqCst)
    }

    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::SeqCst)
    }

    pub fn sign_encrypts(&self) -> usize {
        self.sign_encrypts.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.sign_encrypts.store(0, Ordering::SeqCst);
        self.decrypts.store(0, Ordering::SeqCst);
        self.derivations.store(0, Ordering::SeqCst);
        self.session_decrypts.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl CryptoEngine for CountingEngine {
    async fn sign_encrypt(
        &self,
        plaintext: &str,
        recipient_public_key: &str,
        acting_private_key: &str,
        passphrase: &[u8],
    ) -> Result<String, CryptoError> {
        self.sign_encrypts.fetch_add(1, Ordering::SeqCst);
        self.inner
            .sign_encrypt(plaintext, recipient_public_key, acting_private_key, passphrase)
            .await
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        private_key: &str,
        passphrase: &[u8],
    ) -> Result<String, CryptoError> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        self.inner.decrypt(ciphertext, private_key, passphrase).await
    }

    async fn derive_session_key(
        &self,
        ciphertext: &str,
        private_key: &str,
        passphrase: &[u8],
    ) -> Result<SessionKey, CryptoError> {
        self.derivations.fetch_add(1, Ordering::SeqCst);
        self.inner
            .derive_session_key(ciphertext, private_key, passphrase)
            .await
    }

    async fn decrypt_with_session_key(
        &self,
        session_key: &SessionKey,
        ciphertext: &str,
    ) -> Result<String, CryptoError> {
        self.session_decrypts.fetch_add(1, Ordering::SeqCst);
        self.inner
            .decrypt_with_session_key(session_key, ciphertext)
            .await
    }
}

/// Remote that rejects every request with the same error.
pub struct FailingRemote(pub RemoteError);

#[async_trait]
impl RemoteStore for FailingRemote {
    async fn create_item(&self, _payload: &SealedPayload) -> Result<Item, RemoteError> {
        Err(self.0.clone())
    }

    async fn update_item(&self, _id: &str, _payload: &SealedPayload) -> Result<Item, RemoteError> {
        Err(self.0.clone())
    }
}

/// Remote that rejects the first request, then behaves like [`LocalRemote`].
pub struct RejectOnceRemote {
    failure: Mutex<Option<RemoteError>>,
    inner: LocalRemote,
}

impl RejectOnceRemote {
    pub fn new(failure: RemoteError, store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            failure: Mutex::new(Some(failure)),
            inner: LocalRemote::new(store),
        }
    }

    fn take_failure(&self) -> Option<RemoteError> {
        self.failure.lock().unwrap().take()
    }
}

#[async_trait]
impl RemoteStore for RejectOnceRemote {
    async fn create_item(&self, payload: &SealedPayload) -> Result<Item, RemoteError> {
        match self.take_failure() {
            Some(err) => Err(err),
            None => self.inner.create_item(payload).await,
        }
    }

    async fn update_item(&self, id: &str, payload: &SealedPayload) -> Result<Item, RemoteError> {
        match self.take_failure() {
            Some(err) => Err(err),
            None => self.inner.update_item(id, payload).await,
        }
    }
}

/// A store file with one local user, plus the collaborators around it.
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<FileStore>,
    pub engine: Arc<CountingEngine>,
    pub cache: Arc<SessionKeyCache>,
    pub passphrases: Arc<PassphraseMemoryCache>,
}

impl Fixture {
    pub async fn new() -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::create(&dir.path().join("passvault.json")).unwrap());
        let pair = light_engine()
            .generate_key_pair(ALICE_PASSPHRASE.as_bytes())
            .unwrap();
        store
            .add_user(UserRecord {
                user_id: ALICE.to_string(),
                public_key: pair.public_key.clone(),
                private_key: Some(pair.private_key.clone()),
            })
            .await
            .unwrap();

        Self {
            dir,
            store,
            engine: Arc::new(CountingEngine::default()),
            cache: Arc::new(SessionKeyCache::new()),
            passphrases: Arc::new(PassphraseMemoryCache::holding(Passphrase::from(
                ALICE_PASSPHRASE,
            ))),
        }
    }

    /// Register another user. Only the public half is stored.
    pub async fn add_recipient(&self, user_id: &str) {
        let pair = light_engine().generate_key_pair(b"not used").unwrap();
        self.add_recipient_key(user_id, &pair.public_key).await;
    }

    pub async fn add_recipient_key(&self, user_id: &str, public_key: &str) {
        self.store
            .add_user(UserRecord {
                user_id: user_id.to_string(),
                public_key: public_key.to_string(),
                private_key: None,
            })
            .await
            .unwrap();
    }

    /// Register a shared metadata key readable by alice.
    pub async fn add_shared_key(&self, id: &str) {
        let passphrase = format!("{id}-passphrase");
        let pair = light_engine()
            .generate_key_pair(passphrase.as_bytes())
            .unwrap();
        self.store
            .add_metadata_key(ParsedMetadataKey {
                id: id.to_string(),
                public_key: pair.public_key.clone(),
                private_keys: vec![ParsedMetadataPrivateKey {
                    user_id: Some(ALICE.to_string()),
                    key_material: pair.private_key.clone(),
                    passphrase,
                }],
            })
            .await
            .unwrap();
    }

    pub fn service(&self, policy: SettingsPolicy) -> ResourceService {
        let persistence: Arc<dyn PersistenceStore> = self.store.clone();
        self.service_with(
            policy,
            Arc::new(LocalRemote::new(Arc::clone(&persistence))),
            self.passphrases.clone(),
            HandlerConfig::default(),
        )
    }

    pub fn service_with(
        &self,
        policy: SettingsPolicy,
        remote: Arc<dyn RemoteStore>,
        passphrases: Arc<dyn PassphraseProvider>,
        config: HandlerConfig,
    ) -> ResourceService {
        let engine: Arc<dyn CryptoEngine> = self.engine.clone();
        ResourceService::new(ServiceContext {
            account: Account::new(ALICE),
            engine,
            store: self.store.clone(),
            remote,
            passphrases,
            cache: Arc::clone(&self.cache),
            policy: Arc::new(policy),
            validator: Arc::new(RequiredFieldsValidator::new()),
            config,
        })
    }
}

/// Create a v5 password item named `name`.
pub async fn create_login(
    service: &ResourceService,
    name: &str,
    password: &str,
    note: &str,
) -> Item {
    let mut handler = service.handler();
    handler
        .initialize_for_creation(LeadingContentType::Password)
        .unwrap();
    handler
        .apply_edit(UpdateAction::EditMetadata, |_, metadata| {
            metadata.name = name.to_string();
            metadata.username = Some("alice@example.com".to_string());
            metadata.uris = vec!["https://example.com".to_string()];
        })
        .unwrap();
    handler
        .apply_edit(UpdateAction::AddPassword, |secret, _| {
            secret.password = Some(password.to_string());
        })
        .unwrap();
    handler
        .apply_edit(UpdateAction::AddNote, |secret, _| {
            secret.description = Some(note.to_string());
        })
        .unwrap();
    service.create(&mut handler).await.unwrap()
}
